//! can-api - gRPC control-plane gateway for pods.

use anyhow::{Context, Result};
use can_api::runtime::RuntimeClient;
use can_api::runtime::youki::YoukiClient;
use can_api::services::reporter::StateReporter;
use can_api::{Config, api_router};
use clap::Parser;
use log::info;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// gRPC control-plane gateway for pods.
#[derive(Parser)]
#[command(name = "can-api")]
#[command(version = VERSION)]
#[command(about = "gRPC control-plane gateway for pods")]
struct Args {
    /// gRPC listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Base directory for pod bundles
    #[arg(long)]
    pods_dir: Option<PathBuf>,

    /// Base directory for pulled images
    #[arg(long)]
    images_dir: Option<PathBuf>,

    /// Path to youki binary
    #[arg(long)]
    youki: Option<PathBuf>,

    /// Root directory for youki container state
    #[arg(long)]
    youki_root: Option<PathBuf>,

    /// Interval between progress snapshots during pod creation
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    progress_interval_ms: u64,

    /// Interval between state reports
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    report_interval_secs: u64,
}

impl Args {
    fn into_config(self) -> Config {
        let mut config = Config::default();
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(pods_dir) = self.pods_dir {
            config.pods_dir = pods_dir;
        }
        if let Some(images_dir) = self.images_dir {
            config.images_dir = images_dir;
        }
        if let Some(youki) = self.youki {
            config.youki_path = youki;
        }
        if let Some(youki_root) = self.youki_root {
            config.youki_root = youki_root;
        }
        config.progress_interval = Duration::from_millis(self.progress_interval_ms);
        config.report_interval = Duration::from_secs(self.report_interval_secs);
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let config = Args::parse().into_config();
    info!("can-api v{} starting", VERSION);

    tokio::fs::create_dir_all(&config.pods_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.pods_dir.display()))?;
    tokio::fs::create_dir_all(&config.images_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.images_dir.display()))?;

    let runtime: Arc<dyn RuntimeClient> = Arc::new(YoukiClient::new(config.youki()));
    info!(
        "Runtime: youki at {}, bundles in {}",
        config.youki_path.display(),
        config.pods_dir.display()
    );

    let reporter = StateReporter::new(runtime.clone(), config.report_interval);
    tokio::spawn(reporter.run());

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!("Listening on {}", config.listen);

    api_router(runtime, config.progress_interval)
        .serve_with_incoming(TcpListenerStream::new(listener))
        .await?;

    Ok(())
}
