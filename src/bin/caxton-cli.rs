//! Caxton CLI - administrative commands for a caxton node: validating a
//! config file, listing a session store's sessions, and running the
//! `AgentService` gRPC server standalone.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use caxton::agent::AgentName;
use caxton::config::{CaxtonConfig, SessionStore};
use caxton::distributed::server;
use caxton::session::SessionManager;
use caxton::storage::file::FileStorageBackend;
use caxton::storage::remote_kv::RemoteKvStorageBackend;
use caxton::storage::{SessionFilter, StorageBackend};
use caxton::Runtime;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "caxton-cli", version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parses a config file and prints it back as pretty TOML.
    ValidateConfig {
        /// Path to the TOML config file.
        #[arg(long)]
        config: PathBuf,
    },
    /// Starts the `AgentService` gRPC server with no agents registered
    /// (agents are registered by whatever embeds this as a library).
    Serve {
        /// Path to the TOML config file.
        #[arg(long)]
        config: PathBuf,
    },
    /// Lists sessions belonging to an agent in the configured session
    /// store.
    ListSessions {
        /// Path to the TOML config file.
        #[arg(long)]
        config: PathBuf,
        /// Agent whose sessions to list.
        #[arg(long)]
        agent: String,
    },
}

fn load_config(path: &PathBuf) -> Result<CaxtonConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
}

async fn session_backend(config: &CaxtonConfig) -> Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match config.session.store {
        SessionStore::File => Arc::new(FileStorageBackend::new(config.session.base_dir.clone())),
        SessionStore::RemoteKv => {
            let redis_url = std::env::var("CAXTON_REDIS_URL")
                .context("CAXTON_REDIS_URL must be set for the remote-kv session store")?;
            Arc::new(RemoteKvStorageBackend::connect(&redis_url).await?)
        }
    };
    Ok(backend)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    match args.command {
        Command::ValidateConfig { config } => {
            let parsed = load_config(&config)?;
            println!("{}", toml::to_string_pretty(&parsed)?);
        }
        Command::Serve { config } => {
            let config = load_config(&config)?;
            let runtime = Arc::new(Runtime::new(config.runtime));
            runtime.start().await?;
            server::serve(runtime, &config.distributed).await?;
        }
        Command::ListSessions { config, agent } => {
            let config = load_config(&config)?;
            if !config.session.enabled {
                anyhow::bail!("session persistence is disabled in this config");
            }
            let agent_name = AgentName::try_new(agent)
                .map_err(|e| anyhow::anyhow!("invalid agent name: {e}"))?;
            let backend = session_backend(&config).await?;
            let manager = SessionManager::new(backend);
            for metadata in manager.list(&agent_name, SessionFilter::default()).await? {
                println!(
                    "{}\tuser={}\tmessages={}",
                    metadata.id,
                    metadata.user_id.as_deref().unwrap_or("-"),
                    metadata.message_count
                );
            }
        }
    }

    Ok(())
}
