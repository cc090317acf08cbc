use std::process::Command;

fn main() {
    // embed git hash in both binaries, referenced with env!()
    let output = Command::new("git").args(["describe", "--always", "--dirty"]).output();
    let git_hash = match output {
        Ok(o) if o.status.success() => String::from_utf8_lossy(&o.stdout).trim().to_string(),
        _ => "unknown".to_string(),
    };
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/main");
    println!("cargo:rerun-if-changed=src/");
    println!("cargo:rustc-env=BUILD_TIME_GIT_HASH={git_hash}");
}
