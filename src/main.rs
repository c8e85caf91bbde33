//! posixstore -- Swift-style object server on a POSIX filesystem.
//!
//! Startup prepares the run directory, claims a worker mount slot when
//! per-server mounts are enabled, loads the ring, and waits for every ring
//! device to be mounted when `mount_check` is on.  Any of these failing
//! exits non-zero.  SIGTERM/SIGINT stop accepting connections and wait up
//! to `server.shutdown_timeout` for in-flight requests.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use posixstore::config::{Config, LoggingConfig};
use posixstore::fs::mount::{
    prepare_run_dir, wait_for_mount, MountLayout, MountLock, WorkerSlot, WORKER_SLOTS,
};
use posixstore::ring::Ring;

/// Attempts and spacing of the startup mount wait.
const MOUNT_ATTEMPTS: u32 = 5;
const MOUNT_INTERVAL: Duration = Duration::from_secs(2);

/// Command-line arguments for the object server.
#[derive(Parser, Debug)]
#[command(
    name = "posixstore",
    version,
    about = "Swift-style object server on a POSIX filesystem"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "posixstore.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for each ring device to be a mount point, holding its mount lock
/// while waiting.
fn check_mounts(config: &Config, ring: &Ring, worker: Option<u32>) -> anyhow::Result<()> {
    let layout = MountLayout::new(&config.storage.devices, worker, false);
    for dev in ring.devices() {
        let path = layout.device_path(&dev.device);
        let _lock = MountLock::acquire(&config.storage.run_dir, &dev.device)?;
        if !wait_for_mount(&path, MOUNT_ATTEMPTS, MOUNT_INTERVAL) {
            bail!("device {} is not mounted at {}", dev.device, path.display());
        }
        info!("device {} mounted at {}", dev.device, path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = posixstore::config::load_config(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config))?;
    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config);

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    let sentinel = prepare_run_dir(&config.storage.run_dir)?;
    info!("Run directory ready, sentinel at {}", sentinel.display());

    // Held until exit so no other server claims the same slot.
    let slot = if config.storage.allow_mount_per_server {
        match WorkerSlot::acquire(&config.storage.run_dir, WORKER_SLOTS)? {
            Some(slot) => Some(slot),
            None => bail!(
                "no free worker mount slot in {}",
                config.storage.run_dir.display()
            ),
        }
    } else {
        None
    };
    let worker = slot.as_ref().map(WorkerSlot::number);

    let ring = Ring::load(&config.ring.path, &config.ring.reseller_prefix)?;
    info!(
        "Loaded ring from {} with {} devices",
        config.ring.path.display(),
        ring.devices().len()
    );

    if config.storage.mount_check {
        check_mounts(&config, &ring, worker)?;
    }

    if config.observability.metrics {
        posixstore::metrics::init_metrics()?;
        posixstore::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let state = Arc::new(posixstore::AppState::new(config, ring, worker));
    let app = posixstore::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    info!("posixstore listening on {}", bind_addr);

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                stop_rx.await.ok();
            })
            .await
    });

    tokio::select! {
        result = &mut server => {
            result??;
            return Ok(());
        }
        _ = shutdown_signal() => {}
    }

    let _ = stop_tx.send(());
    match tokio::time::timeout(shutdown_timeout, server).await {
        Ok(result) => result??,
        Err(_) => warn!(
            "In-flight requests still running after {}s, exiting",
            shutdown_timeout.as_secs()
        ),
    }

    info!("posixstore shut down");
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
