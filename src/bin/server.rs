use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dvdyellow_server::config::Config;
use dvdyellow_server::mux::Mux;
use dvdyellow_server::persistence::Store;
use dvdyellow_server::server::{Server, DEFAULT_MAX_GAMES};

/// Server for the territorial two-player board game: framed TCP protocol,
/// authentication, presence, matchmaking, and game arbitration.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// YAML configuration file. Recognized keys: network.port,
    /// database.driver, database.{username,password,host,port,name,options,file}.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides network.port from the config with an explicit socket address.
    #[arg(long)]
    bind: Option<String>,

    /// Increase log verbosity; repeatable.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Soft cap on concurrently running games. Default is effectively
    /// unbounded, limited only by memory.
    #[arg(short = 'g', long, default_value_t = DEFAULT_MAX_GAMES)]
    max_games: usize,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args = Args::parse();

    let filter = match args.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();

    let config = match &args.config {
        Some(path) => match Config::load_from_file(path) {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "failed to load configuration");
                return std::process::ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    let store = match Store::open(&config.database) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "failed to open storage");
            return std::process::ExitCode::FAILURE;
        }
    };

    let mux = Arc::new(Mux::new(store));
    let server = Server::new(mux, args.max_games);
    let bind_addr = args.bind.unwrap_or_else(|| format!("0.0.0.0:{}", config.network.port));

    info!(bind_addr, "starting server");
    match server.run(&bind_addr).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server terminated with error");
            std::process::ExitCode::FAILURE
        }
    }
}
