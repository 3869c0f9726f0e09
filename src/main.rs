//! Blob Provisioner
//!
//! Keeps every profile supplied with one blob container, persistent volume
//! and claim per storage tier in the catalog.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Scheduler                            │
//! │            (tick, sleep, repeat until cancelled)             │
//! ├──────────────────────────────────────────────────────────────┤
//! │                         Reconciler                           │
//! │   ┌──────────────────┐  ┌────────────────┐  ┌─────────────┐  │
//! │   │  Desired State   │  │   Existence    │  │ Tick Report │  │
//! │   │     Builder      │  │    Checker     │  │             │  │
//! │   └──────────────────┘  └────────────────┘  └─────────────┘  │
//! ├──────────────────────────────────────────────────────────────┤
//! │                          Backends                            │
//! │   ┌──────────────────┐  ┌────────────────┐  ┌─────────────┐  │
//! │   │    Kubernetes    │  │   Azure Blob   │  │  In-Memory  │  │
//! │   │  (PV/PVC/Secret) │  │  (Shared Key)  │  │ (standalone)│  │
//! │   └──────────────────┘  └────────────────┘  └─────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use blob_provisioner::{
    backends::{
        create_client, kubeconfig_path, AzureBlobConfig, AzureBlobProvider, InMemoryCluster,
        InMemoryObjectStorage, KubeCluster,
    },
    domain::{
        ClusterStateReaderRef, ClusterStateWriterRef, ObjectStorageProviderRef, StaticProfiles,
    },
    Catalog, CapacitySource, DesiredStateConfig, Error, ProvisionerMetrics, Reconciler,
    ReconcilerConfig, Result, Scheduler, SchedulerConfig, StorageCapacity,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Blob Provisioner - per-profile blob containers, volumes and claims
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a kubeconfig; unset uses $KUBECONFIG, ~/.kube/config, then in-cluster
    #[arg(long, env = "PROVISIONER_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Catalog file (stream of JSON instance objects); built-in tiers if unset
    #[arg(long, env = "CATALOG")]
    catalog: Option<PathBuf>,

    /// Profiles to provision, comma separated
    #[arg(long, env = "PROFILES", value_delimiter = ',', default_value = "alice,bob")]
    profiles: Vec<String>,

    /// Pause between ticks in seconds
    #[arg(long, env = "INTERVAL_SECS", default_value = "10")]
    interval_secs: u64,

    /// Size requested for every volume and claim
    #[arg(long, env = "CAPACITY", default_value = "100G")]
    capacity: String,

    /// Where sizes come from (fixed, catalog)
    #[arg(long, env = "CAPACITY_SOURCE", default_value = "fixed")]
    capacity_source: String,

    /// Timeout for any single backend call in seconds
    #[arg(long, env = "CALL_TIMEOUT_SECS", default_value = "30")]
    call_timeout_secs: u64,

    /// Timeout for a whole tick in seconds
    #[arg(long, env = "TICK_DEADLINE_SECS", default_value = "300")]
    tick_deadline_secs: u64,

    /// DNS suffix of the blob service endpoint
    #[arg(long, env = "BLOB_ENDPOINT_SUFFIX", default_value = "blob.core.windows.net")]
    blob_endpoint_suffix: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Run against in-memory backends (no Kubernetes, no Azure)
    #[arg(long, env = "STANDALONE")]
    standalone: bool,

    /// Run a single tick and exit
    #[arg(long)]
    once: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args);

    if let Err(e) = run(args).await {
        error!(error = %e, class = ?e.class(), "Provisioner stopped");
        std::process::exit(exit_code(&e));
    }
}

/// Configuration and startup errors exit with 2, anything else with 1
fn exit_code(error: &Error) -> i32 {
    if error.is_fatal() {
        2
    } else {
        1
    }
}

async fn run(args: Args) -> Result<()> {
    info!("Starting Blob Provisioner");
    info!("  Version: {}", blob_provisioner::VERSION);
    info!("  Profiles: {}", args.profiles.join(","));
    info!("  Interval: {}s", args.interval_secs);
    info!("  Standalone mode: {}", args.standalone);

    let catalog = Arc::new(match &args.catalog {
        Some(path) => Catalog::from_path(path)?,
        None => Catalog::builtin()?,
    });
    info!(instances = catalog.len(), "Catalog loaded");

    let reconciler_config = ReconcilerConfig {
        desired: DesiredStateConfig {
            capacity: StorageCapacity::parse(&args.capacity)?,
            capacity_source: parse_capacity_source(&args.capacity_source)?,
            ..Default::default()
        },
        call_timeout: Duration::from_secs(args.call_timeout_secs),
    };

    let (reader, writer, storage) = build_backends(&args, &catalog).await?;

    let reconciler = Reconciler::new(
        reconciler_config,
        catalog,
        Arc::new(StaticProfiles::new(args.profiles.iter().cloned())),
        reader,
        writer,
        storage,
    );

    let metrics = Arc::new(ProvisionerMetrics::new()?);
    let scheduler = Scheduler::new(
        SchedulerConfig {
            interval: Duration::from_secs(args.interval_secs),
            tick_deadline: Duration::from_secs(args.tick_deadline_secs),
        },
        Arc::new(reconciler),
    )
    .with_metrics(metrics.clone());

    if args.once {
        let report = scheduler.run_once().await?;
        if !report.is_clean() {
            warn!(failures = report.failures(), "Tick finished with failures");
        }
        return Ok(());
    }

    // Start health server
    let health_addr = args.health_addr.clone();
    let ready = scheduler.readiness();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, ready).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics).await {
            error!("Metrics server error: {}", e);
        }
    });

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    scheduler.run(cancel).await;

    info!("Provisioner shutdown complete");
    Ok(())
}

type Backends = (
    ClusterStateReaderRef,
    ClusterStateWriterRef,
    ObjectStorageProviderRef,
);

async fn build_backends(args: &Args, catalog: &Catalog) -> Result<Backends> {
    if args.standalone {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.seed_catalog_secrets(catalog);
        let storage = Arc::new(InMemoryObjectStorage::new(cluster.clone()));
        info!("Using in-memory cluster and object storage");
        let reader: ClusterStateReaderRef = cluster.clone();
        let writer: ClusterStateWriterRef = cluster;
        let storage: ObjectStorageProviderRef = storage;
        return Ok((reader, writer, storage));
    }

    let kubeconfig = kubeconfig_path(args.kubeconfig.as_deref());
    let client = create_client(
        kubeconfig.as_deref(),
        Duration::from_secs(args.call_timeout_secs),
    )
    .await?;
    let cluster = Arc::new(KubeCluster::new(client));

    let blob_config = AzureBlobConfig {
        endpoint_suffix: args.blob_endpoint_suffix.clone(),
        request_timeout: Duration::from_secs(args.call_timeout_secs),
    };
    let storage: ObjectStorageProviderRef =
        Arc::new(AzureBlobProvider::new(cluster.clone(), blob_config)?);
    let reader: ClusterStateReaderRef = cluster.clone();
    let writer: ClusterStateWriterRef = cluster;

    Ok((reader, writer, storage))
}

fn parse_capacity_source(value: &str) -> Result<CapacitySource> {
    match value.to_lowercase().as_str() {
        "fixed" => Ok(CapacitySource::Fixed),
        "catalog" => Ok(CapacitySource::Catalog),
        other => Err(Error::Configuration(format!(
            "unknown capacity source '{}', expected fixed or catalog",
            other
        ))),
    }
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutdown signal received");
    cancel.cancel();
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("kube=info".parse().unwrap())
        .add_directive("reqwest=warn".parse().unwrap());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

fn text_response(status: hyper::StatusCode, body: &'static str) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(hyper::Body::from(body));
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str, ready: Arc<AtomicBool>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let ready = ready.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let ready = ready.load(Ordering::Relaxed);
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
                        "/readyz" if ready => text_response(StatusCode::OK, "ok"),
                        "/readyz" => text_response(StatusCode::SERVICE_UNAVAILABLE, "not ready"),
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, metrics: Arc<ProvisionerMetrics>) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match metrics.encode() {
                            Ok((buffer, content_type)) => {
                                let mut response = Response::new(Body::from(buffer));
                                if let Ok(value) = HeaderValue::from_str(&content_type) {
                                    response.headers_mut().insert(CONTENT_TYPE, value);
                                }
                                response
                            }
                            Err(e) => {
                                warn!("Metrics encoding failed: {}", e);
                                text_response(StatusCode::INTERNAL_SERVER_ERROR, "encoding failed")
                            }
                        },
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_follow_error_class() {
        let fatal = Error::Configuration("bad --capacity-source".into());
        assert_eq!(exit_code(&fatal), 2);

        let transient = Error::ListFailed {
            kind: "PersistentVolume".into(),
            scope: "cluster".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(exit_code(&transient), 1);
    }

    #[test]
    fn test_parse_capacity_source() {
        assert_eq!(parse_capacity_source("Catalog").unwrap(), CapacitySource::Catalog);
        assert_eq!(parse_capacity_source("fixed").unwrap(), CapacitySource::Fixed);
        assert!(parse_capacity_source("per-tier").unwrap_err().is_fatal());
    }
}
