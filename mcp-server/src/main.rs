use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use lotto_tracker::{RecordingNotifier, config, connection};

mod mcp_handler;
mod use_cases;

use mcp_handler::{MCPHandler, stdio};
use use_cases::{AdminUseCase, DashboardUseCase};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("Let's track some lottery draws.");

    let (client, auth) = connection::connect(&config).await?;

    // Replies carry the notifications raised while serving each call.
    let notifier = Arc::new(RecordingNotifier::new());

    let admin_use_case = AdminUseCase::new(Arc::clone(&client), notifier);
    let dashboard_use_case = DashboardUseCase::new(auth);

    let handler = MCPHandler::new(Arc::new(admin_use_case), Arc::new(dashboard_use_case));

    let (reader, writer) = stdio();

    handler.serve(reader, writer).await.inspect_err(|e| {
        tracing::error!("serving error: {:?}", e);
    })?;

    Ok(())
}
