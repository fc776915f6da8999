//! Caxton - multi-agent orchestration runtime
//!
//! Entry point for running a bare distributed-runtime node: no agents are
//! registered here (agent implementations are a library concern, wired up
//! by whatever embeds `caxton`), but the node will serve the
//! `AgentService` gRPC surface and can `connect` out to peers once a host
//! application registers agents on the wrapped local `Runtime` and calls
//! `distributed::server::serve`.

use std::sync::Arc;

use anyhow::{Context, Result};
use caxton::config::CaxtonConfig;
use caxton::distributed::server;
use caxton::Runtime;
use tracing::info;

fn load_config() -> Result<CaxtonConfig> {
    let Ok(path) = std::env::var("CAXTON_CONFIG") else {
        info!("CAXTON_CONFIG unset, using default configuration");
        return Ok(CaxtonConfig::default());
    };
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config file {path}"))?;
    toml::from_str(&raw).with_context(|| format!("parsing config file {path}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("caxton=info".parse()?),
        )
        .init();

    let config = load_config()?;
    info!(listen_addr = %config.distributed.listen_addr, "starting caxton node");

    let local = Arc::new(Runtime::new(config.runtime));
    local.start().await?;

    server::serve(local, &config.distributed).await?;

    Ok(())
}
