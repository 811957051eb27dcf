use anyhow::Result;
use clap::Parser;
use specforge_core::AppConfig;
use specforge_server::{init_tracing, App, Cli, Command};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    info!("Starting Specforge v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load_with_env(cli.config.as_deref())?;
    let app = App::open(config).await?;

    match cli.command() {
        Command::Serve => {
            let shutdown = CancellationToken::new();
            let running = app.start(shutdown.clone()).await?;
            info!("Serving on {}", running.gateway_addr());

            tokio::signal::ctrl_c().await?;
            info!("Shutdown requested");
            shutdown.cancel();
            running.wait().await?;
        }
        Command::Normalize { pass } => {
            let reports = app.normalize(pass.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        Command::Reap => {
            let report = app.reap().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
