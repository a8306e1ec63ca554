//! argus: browser telemetry watcher fleet and its command-line front-end.
//! Single binary embedding both the watcher runtime (`argus watch`) and
//! the client commands that talk to running watchers.

use clap::Parser;
use std::process::ExitCode;

mod cli;
mod commands;
mod dispatch;
mod resolve;

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::Cli::parse();

    let filter = std::env::var("ARGUS_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_filter(&args.command).to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    // Watch runs its own signal handling; client commands exit 130 when
    // interrupted mid-flight.
    if matches!(args.command, cli::Command::Watch(_)) {
        return match commands::run(args).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => err.report(),
        };
    }

    tokio::select! {
        result = commands::run(args) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => err.report(),
        },
        _ = tokio::signal::ctrl_c() => ExitCode::from(130),
    }
}

fn default_filter(command: &cli::Command) -> &'static str {
    match command {
        cli::Command::Watch(_) => "info",
        _ => "warn",
    }
}
