use anyhow::{Context, Result, bail};
use tracing::info;

use vnc_relay::{RelayConfig, RelayServer, RunMode};

/// Entry point for running the relay as its own process, typically spawned in
/// the background by the CLI: `vnc-relay [--interactive] '<json-config>'`.
/// The JSON argument carries the full `RelayConfig`.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut mode = RunMode::Headless;
    let mut config_json = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--interactive" => mode = RunMode::Interactive,
            _ if config_json.is_none() => config_json = Some(arg),
            other => bail!("Unexpected argument: {other}"),
        }
    }
    let config_json = config_json.context("Usage: vnc-relay [--interactive] '<json-config>'")?;

    let config = RelayConfig::from_json(&config_json)?;
    let bound = RelayServer::new(config)?.bind().await?;
    info!(url = %bound.browser_url(), mode = ?mode, "Console relay ready");

    bound.serve(mode).await
}
