//! Push a device's friendly name, area or labels into the host automation
//! platform's device registry.

use clap::Parser;
use log::{info, warn};
use smart_home_planner::config::RegistryConfig;
use smart_home_planner::env_file;
use smart_home_planner::registry::{self, MessageChannel, RegistryError, RegistryUpdate, WebSocketChannel};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ha-device-update", version)]
#[command(about = "Update a device in the host platform's device registry")]
#[command(after_help = "Environment:\n  SUPERVISOR_TOKEN    Access token (required)\n  SUPERVISOR_WS_URL   WebSocket endpoint (default ws://supervisor/core/websocket)")]
struct Args {
    // A bare flag reads as an empty value so argument validation reports it.
    /// Registry device id
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    id: Option<String>,
    /// New friendly name
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    name: Option<String>,
    /// Area id; an empty value clears the area
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    area_id: Option<String>,
    /// JSON array or comma-separated list
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    labels: Option<String>,
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,
}

fn run(args: Args) -> Result<String, RegistryError> {
    let update = RegistryUpdate::from_args(
        args.id.as_deref(),
        args.name.as_deref(),
        args.area_id.as_deref(),
        args.labels.as_deref(),
    )?;
    let cfg = RegistryConfig::from_env()?;

    info!("Connecting to {}", cfg.ws_url);
    let mut channel = WebSocketChannel::connect(&cfg.ws_url)?;
    let outcome = registry::update_device(&mut channel, &cfg.token, &update);
    if let Err(e) = channel.close() {
        warn!("Closing connection failed: {}", e);
    }
    outcome
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => {
            let _ = err.print();
            std::process::exit(1);
        }
    };
    if let Err(err) = env_file::load(args.env_file.as_deref()) {
        eprintln!("{}", err);
        std::process::exit(1);
    }

    // Quiet by default: stdout carries the registry response.
    let default_filter = env_logger::Env::default().default_filter_or("warn");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    match run(args) {
        Ok(response) => println!("{}", response),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("ha-device-update").chain(args.iter().copied())).expect("arguments parse")
    }

    #[test]
    fn bare_name_flag_is_a_missing_argument() {
        let err = run(parse(&["--id", "abc", "--name"])).unwrap_err();
        assert_eq!(err.to_string(), "Missing required argument: --name");

        let err = run(parse(&["--id", "abc", "--name", "--area-id", "kitchen"])).unwrap_err();
        assert_eq!(err.to_string(), "Missing required argument: --name");
    }

    #[test]
    fn bare_id_flag_is_a_missing_argument() {
        let err = run(parse(&["--id", "--name", "Lamp"])).unwrap_err();
        assert_eq!(err.to_string(), "Missing required argument: --id");
    }

    #[test]
    fn bare_area_and_labels_flags_clear_them() {
        let args = parse(&["--id", "abc", "--area-id", "--labels"]);
        assert_eq!(args.area_id.as_deref(), Some(""));
        assert_eq!(args.labels.as_deref(), Some(""));
        let update = RegistryUpdate::from_args(
            args.id.as_deref(),
            args.name.as_deref(),
            args.area_id.as_deref(),
            args.labels.as_deref(),
        )
        .unwrap();
        let payload = update.payload(1);
        assert!(payload["area_id"].is_null());
        assert_eq!(payload["labels"], serde_json::json!([]));
    }
}
