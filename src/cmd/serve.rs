//! Dashboard server command — `packflow serve`.

use anyhow::Result;
use packflow::config::PackflowToml;
use packflow::dashboard::{self, ServerConfig, Workflow};

pub async fn cmd_serve(
    mut settings: PackflowToml,
    port: Option<u16>,
    dev: bool,
    open: bool,
    memory: bool,
) -> Result<()> {
    if let Some(port) = port {
        settings.server.port = port;
    }
    if dev {
        settings.server.dev_mode = true;
    }
    for warning in settings.validate() {
        tracing::warn!("{}", warning);
    }

    let store = super::open_store(&settings, memory)?;
    let config = ServerConfig::from(&settings);

    // No browser inside containers, which is where dev mode runs.
    if open && !config.dev_mode {
        let url = format!("http://localhost:{}", config.port);
        tokio::spawn(async move {
            tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
            if let Err(e) = open::that(&url) {
                tracing::warn!(error = %e, "failed to open browser");
            }
        });
    }

    dashboard::start_server(config, Workflow::new(store, settings)).await
}
