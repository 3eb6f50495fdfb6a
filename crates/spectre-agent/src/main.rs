//! Spectre Agent Daemon
//!
//! Serves PTY shell sessions to controllers over WebSocket. The agent always
//! listens; with `--host` it also dials out to a controller and keeps that
//! connection alive.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spectre_agent::service::{self, ServiceDefinition};
use spectre_agent::{run_client, server, AgentIdentity, AgentState, LocalProbe};
use spectre_core::auth::is_default_token;
use spectre_core::config::{self, AgentConfig};
use spectre_core::endpoint::build_connection_url;
use spectre_core::instance::{try_acquire_instance_lock, InstanceInfo, InstanceLock};

#[derive(Parser)]
#[command(name = "spectre-agent")]
#[command(about = "Spectre agent - remote shell sessions over WebSocket")]
#[command(version)]
struct Args {
    /// Address to listen on (e.g. :8081 or 127.0.0.1:8081)
    #[arg(long)]
    listen: Option<String>,

    /// Shared secret controllers must present
    #[arg(long)]
    token: Option<String>,

    /// Controller to dial out to (host:port or ws:// URL)
    #[arg(long)]
    host: Option<String>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Install and start the agent as a system service
    Up {
        #[arg(long)]
        listen: Option<String>,
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        host: Option<String>,
    },

    /// Stop and remove the system service
    Down,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.foreground {
        "debug"
    } else {
        &args.log_level
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = load_config(args.config.as_deref());
    apply_overrides(&mut config, args.listen, args.token, args.host);

    match args.command {
        Some(Command::Up {
            listen,
            token,
            host,
        }) => {
            apply_overrides(&mut config, listen, token, host);
            config.validate().context("Invalid configuration")?;
            let definition = ServiceDefinition::for_current_exe(
                &config.listen,
                &config.token,
                config.host.as_deref(),
            )?;
            service::install(&definition).context("Failed to install service")?;
            println!("spectre-agent service installed and started");
            Ok(())
        }
        Some(Command::Down) => {
            service::uninstall().context("Failed to remove service")?;
            println!("spectre-agent service stopped and removed");
            Ok(())
        }
        None => run_agent(config).await,
    }
}

fn load_config(path: Option<&std::path::Path>) -> AgentConfig {
    let path = path
        .map(PathBuf::from)
        .unwrap_or_else(config::default_config_path);

    if !path.exists() {
        return AgentConfig::default();
    }
    config::load_config(&path).unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from {:?}: {}", path, e);
        AgentConfig::default()
    })
}

fn apply_overrides(
    config: &mut AgentConfig,
    listen: Option<String>,
    token: Option<String>,
    host: Option<String>,
) {
    if let Some(listen) = listen {
        config.listen = listen;
    }
    if let Some(token) = token {
        config.token = token;
    }
    if let Some(host) = host.filter(|h| !h.is_empty()) {
        config.host = Some(host);
    }
}

async fn run_agent(config: AgentConfig) -> Result<()> {
    tracing::info!("Spectre agent {} starting...", spectre_core::AGENT_VERSION);
    config.validate().context("Invalid configuration")?;

    if is_default_token(&config.token) {
        tracing::warn!("Using the default token; pass --token to set a real secret");
    }

    let identity = AgentIdentity::load().context("Failed to load device identity")?;
    let state = Arc::new(AgentState::new(config, identity, Arc::new(LocalProbe)));

    let shell = state
        .shell
        .validate()
        .context("Cannot start without a usable shell")?;
    tracing::info!("Sessions will run {}", shell.display());

    let connection_url = build_connection_url(&state.config.listen);
    let info = InstanceInfo {
        pid: std::process::id(),
        agent_id: state.identity.agent_id.clone(),
        listen: state.config.listen.clone(),
        connection_url: connection_url.clone(),
        host: state.config.host.clone(),
        token: state.config.token.clone(),
    };
    let _guard = match try_acquire_instance_lock(&info).context("Failed to check instance lock")? {
        InstanceLock::Acquired(guard) => guard,
        InstanceLock::Running(owner) => {
            println!("spectre-agent is already running (pid {})", owner.pid);
            println!("  agent id: {}", owner.agent_id);
            println!("  connect:  {}", owner.connection_url);
            println!("  token:    {}", owner.token);
            if let Some(host) = owner.host {
                println!("  dialing:  {}", host);
            }
            return Ok(());
        }
    };

    let listener = server::bind(&state.config.listen).await?;
    println!("Connect with: {}  (token: {})", connection_url, state.config.token);

    spawn_signal_handler(state.shutdown.clone());

    let client = state.config.host.clone().map(|host| {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = run_client(state, &host).await {
                tracing::error!("Client mode disabled: {}", e);
            }
        })
    });

    let served = server::serve(listener, Arc::clone(&state)).await;
    state.shutdown.cancel();
    if let Some(client) = client {
        if let Err(e) = client.await {
            tracing::warn!("Client task ended abnormally: {}", e);
        }
    }

    tracing::info!("Spectre agent stopped");
    served
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        shutdown.cancel();
    });
}
