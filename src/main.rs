use clap::Parser;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;
use zsync::cli::{Cli, EXIT_FAILURE, EXIT_USAGE};
use zsync::Config;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr: in server mode stdout is the transport.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };
    cli.apply(&mut config);

    if cli.server {
        return match zsync::server::run_server(&config).await {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                error!("server: {:#}", e);
                ExitCode::from(EXIT_FAILURE)
            }
        };
    }

    let (Some(source), Some(destination)) = (&cli.source, &cli.destination) else {
        eprintln!("error: a source dataset and a destination are required");
        return ExitCode::from(EXIT_USAGE);
    };

    match zsync::sync::replicate(&config, source, destination).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
