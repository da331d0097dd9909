//! Sensigate - federated device-abstraction gateway

use clap::{Parser, Subcommand};
use sensigate_core::{BindMode, GatewayConfig};
use sensigate_gateway::start_gateway;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sensigate", about = "Sensigate gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway and its peer links
    Serve {
        #[arg(short, long, default_value = "sensigate.toml")]
        config: PathBuf,
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(short, long)]
        bind: Option<BindMode>,
        #[arg(short, long)]
        namespace: Option<String>,
        /// Peer gateway to federate with (ws://host:port/peer), repeatable
        #[arg(long = "peer")]
        peers: Vec<String>,
        #[arg(short, long)]
        token: Option<String>,
        #[arg(long)]
        log_file: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML
    Config {
        #[arg(short, long, default_value = "sensigate.toml")]
        config: PathBuf,
    },
    /// Show version
    Version,
}

fn init_tracing(log_file: Option<&Path>) -> Option<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sensigate=info,tower_http=info".into());
    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| "sensigate.log".into());
            let (writer, guard) = tracing_appender::non_blocking(RollingFileAppender::new(Rotation::DAILY, dir, name));
            let layer = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            port,
            bind,
            namespace,
            peers,
            token,
            log_file,
        } => {
            let _guard = init_tracing(log_file.as_deref());
            let mut config = GatewayConfig::load(&config);
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(namespace) = namespace {
                config.namespace = namespace;
            }
            if token.is_some() {
                config.peer.token = token;
            }
            config.peer.peers.extend(peers);
            start_gateway(config).await?;
        }

        Commands::Config { config } => {
            print!("{}", GatewayConfig::load(&config).to_toml());
        }

        Commands::Version => {
            println!("sensigate v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
