mod config;
mod context;
mod controller;
mod pipelines;
mod placeholder;
mod processor;
mod response;
mod routes;
mod storage;
mod transform;
mod utils;
mod validation;


#[macro_use]
extern crate tracing;

#[macro_use]
extern crate serde_json;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use poem::listener::TcpListener;
use poem::middleware::Tracing;
use poem::{get, Endpoint, EndpointExt, Route, Server};

use crate::config::RuntimeConfig;
use crate::controller::ImageController;
use crate::storage::retention::RetentionPolicy;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Debug, Parser)]
#[clap(author, version, about)]
pub struct ServerConfig {
    #[clap(long, env = "IMAGINI_LOG", default_value = "info")]
    /// The maximum level of log events emitted.
    log_level: tracing::Level,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Writes an example config file for the given storage backend.
    Init {
        #[clap(short, long)]
        /// One of `postgres`, `mysql`, `sqlite`, `redis` or `filesystem`.
        backend: String,

        #[clap(short, long, default_value = "config.yaml")]
        out: PathBuf,
    },

    /// Runs the server with the given config file.
    Run {
        #[clap(short, long, env = "IMAGINI_CONFIG", default_value = "config.yaml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: ServerConfig = ServerConfig::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    match args.command {
        Commands::Init { backend, out } => init(&backend, out).await,
        Commands::Run { config } => run(config).await,
    }
}

async fn init(backend: &str, out: PathBuf) -> anyhow::Result<()> {
    let template = RuntimeConfig::template(backend)?;
    tokio::fs::write(&out, template).await?;
    info!("Wrote example {} config to {}", backend, out.display());
    Ok(())
}

async fn run(path: PathBuf) -> anyhow::Result<()> {
    let cfg = RuntimeConfig::from_file(&path)?;

    let storage = cfg.backend.connect().await?;

    if cfg.expiry.enabled {
        let policy = RetentionPolicy::from(&cfg.expiry);
        let every = Duration::from_secs(cfg.expiry.interval_secs.max(1));
        storage::sweeper::spawn(storage.clone(), policy, every);
        info!("Expiry sweep scheduled every {:?}", every);
    }

    let controller = Arc::new(ImageController::new(cfg.serving.clone(), storage));

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    info!("Imagini listening on http://{}", addr);

    Server::new(TcpListener::bind(addr)).run(app(controller)).await?;

    Ok(())
}

/// Every route of the server bound to a shared controller.
pub fn app(controller: Arc<ImageController>) -> impl Endpoint {
    Route::new()
        .at(
            "/uploads/:name",
            get(routes::get_image)
                .post(routes::upload_image)
                .head(routes::head_image)
                .delete(routes::delete_image),
        )
        .at("/stats", get(routes::stats))
        .at("/thumbnail.jpg", get(routes::thumbnail_jpeg))
        .at("/thumbnail.png", get(routes::thumbnail_png))
        .with(Tracing)
        .data(controller)
}
