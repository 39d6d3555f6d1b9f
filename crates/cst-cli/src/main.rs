// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use clap::{Parser, Subcommand};
use cst_api::{AppState, build_app};
use cst_queue::file::FileQueue;
use cst_queue::Queue;
use cst_scanner::Scanner;
use cst_scanner_clair::ClairScanner;
use cst_scheduler::Scheduler;
use cst_store::file::FileStore;
use cst_store::Store;
use cst_worker::ScanTask;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Shutdown grace period for in-flight HTTP responses.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "cst", version, about = "Container Scan Tracker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the web server and listen for scan requests.
    Server {
        /// Port to listen on.
        #[arg(long, default_value_t = 8443)]
        port: u16,

        /// Root directory for the file-backed store and queue. Falls back
        /// to the `STORAGE_URL` environment variable.
        #[arg(long, env = "STORAGE_URL")]
        database: PathBuf,

        /// TLS certificate file. Required unless `--insecure` is set.
        #[arg(long)]
        cert_file: Option<PathBuf>,

        /// TLS private key file. Required unless `--insecure` is set.
        #[arg(long)]
        key_file: Option<PathBuf>,

        /// Serve plain HTTP instead of HTTPS. Intended for local
        /// development and test environments only.
        #[arg(long)]
        insecure: bool,
    },

    /// Run the worker that fires on scheduled scans.
    Worker {
        /// Root directory for the file-backed store and queue. Falls back
        /// to the `STORAGE_URL` environment variable.
        #[arg(long, env = "STORAGE_URL")]
        database: PathBuf,

        /// Address of the Clair-like vulnerability-analysis service.
        #[arg(long)]
        clair_address: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("cst=debug")
    } else {
        EnvFilter::new("cst=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Server {
            port,
            database,
            cert_file,
            key_file,
            insecure,
        } => run_server(port, database, cert_file, key_file, insecure).await,
        Commands::Worker {
            database,
            clair_address,
        } => run_worker(database, clair_address).await,
    }
}

async fn run_server(
    port: u16,
    database: PathBuf,
    cert_file: Option<PathBuf>,
    key_file: Option<PathBuf>,
    insecure: bool,
) -> Result<()> {
    let bind = SocketAddr::from(([0, 0, 0, 0], port));
    let store: Arc<dyn Store> = Arc::new(
        FileStore::open(database.join("store"))
            .await
            .context("open store")?,
    );
    let queue: Arc<dyn Queue> = Arc::new(
        FileQueue::open(database.join("queue"))
            .await
            .context("open queue")?,
    );
    let scheduler = Arc::new(Scheduler::new(store.clone(), queue));
    let store_for_close = store.clone();

    let app = build_app(Arc::new(AppState { store, scheduler }));

    let handle = Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        wait_for_interrupt().await;
        info!("shutting down the web server");
        shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });

    if insecure {
        info!(%bind, "cst server listening (insecure)");
        axum_server::bind(bind)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .context("serve")?;
    } else {
        let cert_file = cert_file.context("--cert-file is required unless --insecure is set")?;
        let key_file = key_file.context("--key-file is required unless --insecure is set")?;
        let tls_config = RustlsConfig::from_pem_file(cert_file, key_file)
            .await
            .context("load tls certificate")?;

        info!(%bind, "cst server listening");
        axum_server::bind_rustls(bind, tls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .context("serve")?;
    }

    info!("closing the store");
    store_for_close.close().await;

    Ok(())
}

async fn run_worker(database: PathBuf, clair_address: String) -> Result<()> {
    let store: Arc<dyn Store> = Arc::new(
        FileStore::open(database.join("store"))
            .await
            .context("open store")?,
    );
    let queue: Arc<dyn Queue> = Arc::new(
        FileQueue::open(database.join("queue"))
            .await
            .context("open queue")?,
    );

    let scanners: Vec<Arc<dyn Scanner>> = vec![Arc::new(ClairScanner::new("clair", clair_address))];
    let task = Arc::new(ScanTask::new(store.clone(), scanners));
    queue.register_task(task).await.context("register scan task")?;

    let process_queue = queue.clone();
    let process_handle = tokio::spawn(async move { process_queue.process_loop().await });

    wait_for_interrupt().await;
    info!("stopping the worker");
    queue.stop().await;
    process_handle.await.context("join worker loop")?;
    store.close().await;

    Ok(())
}

async fn wait_for_interrupt() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install sigterm handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
