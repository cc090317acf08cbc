use clap::Parser;
use log::{error, info};
use smart_home_planner::cli::{self, Cli};
use smart_home_planner::config::Config;
use smart_home_planner::confirm::TerminalPrompt;
use smart_home_planner::env_file;
use smart_home_planner::repository::HomeScopedRepository;
use smart_home_planner::storage::JsonFileStore;

fn run(cli: Cli) -> Result<(), cli::CliError> {
    // 1) Load config
    let cfg = Config::from_env().with_data_file(cli.data_file);
    info!("Config loaded (data_file={})", cfg.data_file.display());

    // 2) Open storage and load (repairing orphaned records)
    let store = JsonFileStore::open(&cfg.data_file)?;
    let mut repo = HomeScopedRepository::open(store)?;
    let home = repo.selected_home().map(|h| h.name.as_str()).unwrap_or_default();
    info!("Loaded {} home(s); selected {}", repo.homes().len(), home);

    // 3) Run the subcommand
    let mut prompt = TerminalPrompt::stdio();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    cli::execute(&mut repo, cli.command, &mut prompt, &mut out)
}

fn main() {
    let cli = Cli::parse();
    let loaded_env = match env_file::load(cli.env_file.as_deref()) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!(
            "Environment loaded from {} .env file: {} ({} variable(s) applied)",
            origin,
            info.path.display(),
            info.applied
        );
    }

    info!(
        "smart-home-planner {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    match run(cli) {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => info!("Cancelled; nothing changed"),
        Err(e) if e.is_fatal() => {
            error!("fatal: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
