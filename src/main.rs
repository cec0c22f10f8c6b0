use anyhow::Result;
use clap::Parser;
use notetaker::{
    app,
    cli::{
        handle_login_command, handle_logout_command, handle_meeting_command,
        handle_status_command, Cli, CliCommand,
    },
};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Some(CliCommand::Version) => {
            println!("notetaker {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(CliCommand::Login) => return handle_login_command().await,
        Some(CliCommand::Logout) => return handle_logout_command().await,
        Some(CliCommand::Status) => return handle_status_command().await,
        Some(CliCommand::Meeting(args)) => return handle_meeting_command(args).await,
        None => {}
    }

    app::run_service().await
}
