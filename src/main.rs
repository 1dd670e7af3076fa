mod chats;
mod ledger;
mod session;

use clap::{Parser, Subcommand};
use session::Services;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, Instrument};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wairc_bridge::HttpConnector;
use wairc_core::config::{self, Config};
use wairc_memory::{FileServer, Store};

#[derive(Parser)]
#[command(name = "wairc", version, about = "WhatsApp Web to IRC bridge")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept IRC clients and bridge them to WhatsApp.
    Start,
    /// Show the resolved configuration and storage health.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;
    let _guard = init_logging(&cfg);

    match cli.command {
        Commands::Start => start(cfg).await?,
        Commands::Status => status(&cli.config, &cfg).await?,
    }

    Ok(())
}

/// Console logging, plus a daily rolling file when `log_dir` is set. The
/// returned guard flushes the file writer and must outlive the program.
fn init_logging(cfg: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.wairc.log_level));

    match cfg.wairc.log_dir.as_deref() {
        Some(dir) => {
            let appender =
                tracing_appender::rolling::daily(wairc_core::shellexpand(dir), "wairc.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
            None
        }
    }
}

async fn start(cfg: Config) -> anyhow::Result<()> {
    let files = FileServer::new(&cfg.files)?;
    let store = Store::new(&cfg.memory).await?;
    let connector = HttpConnector::new(&cfg.bridge);
    let addr = format!("{}:{}", cfg.irc.host, cfg.irc.port);

    let services = Arc::new(Services {
        connector: Arc::new(connector),
        files: Arc::new(files),
        store: Arc::new(store),
        config: Arc::new(cfg),
        started_at: chrono::Utc::now(),
    });

    let listener = TcpListener::bind(&addr).await?;
    info!("wairc listening for IRC clients on {addr}");

    loop {
        let (socket, peer) = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down, no longer accepting clients");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("accept failed: {e}");
                    continue;
                }
            },
        };

        let services = services.clone();
        let span = tracing::info_span!("conn", id = %uuid::Uuid::new_v4(), peer = %peer);
        tokio::spawn(
            async move {
                info!("client connected");
                let (reader, writer) = socket.into_split();
                if let Err(e) = session::serve(reader, writer, services).await {
                    error!("session ended with error: {e}");
                }
                info!("client disconnected");
            }
            .instrument(span),
        );
    }

    Ok(())
}

async fn status(path: &str, cfg: &Config) -> anyhow::Result<()> {
    println!("wairc status\n");
    println!("Config: {path}");
    println!("  irc: {}:{} as {}", cfg.irc.host, cfg.irc.port, cfg.irc.server_name);
    println!("  bridge: {}", cfg.bridge.endpoint);
    println!("  replay mode: {:?}", cfg.replay.mode);
    println!();

    match Store::new(&cfg.memory).await {
        Ok(store) => match store.session_count().await {
            Ok(n) => println!("  sessions: {n} stored"),
            Err(e) => println!("  sessions: unreadable ({e})"),
        },
        Err(e) => println!("  sessions: database unavailable ({e})"),
    }

    match FileServer::new(&cfg.files) {
        Ok(files) => println!("  files: {} reachable", files.dir().display()),
        Err(e) => println!("  files: unavailable ({e})"),
    }

    Ok(())
}
