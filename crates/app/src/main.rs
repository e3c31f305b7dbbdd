#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing::{info, warn};
use vsync_core::TranslationContext;
use vsync_kubehub::{connect, KubeStore};
use vsync_store::ObjectStore;
use vsync_syncer::{register_import, register_syncer, EngineConfig, GenericSyncer, ImportSyncer, SyncContext};

#[derive(Parser, Debug)]
#[command(name = "vsync", version, about = "Sync a virtual control plane against a host cluster")]
struct Cli {
    /// Host namespace the tenant's objects are written to
    #[arg(long = "target-namespace", env = "VSYNC_TARGET_NAMESPACE")]
    target_namespace: String,

    /// Tenant name; becomes the managed marker and name suffix
    #[arg(long = "name", env = "VSYNC_NAME")]
    name: String,

    /// Give every virtual namespace its own host namespace
    #[arg(long = "multi-namespace", env = "VSYNC_MULTI_NAMESPACE", action = ArgAction::SetTrue)]
    multi_namespace: bool,

    /// Kubeconfig of the virtual API server
    #[arg(long = "virtual-kubeconfig", env = "VSYNC_VIRTUAL_KUBECONFIG")]
    virtual_kubeconfig: PathBuf,

    /// Kubeconfig of the host cluster (default: in-cluster / current context)
    #[arg(long = "host-kubeconfig", env = "VSYNC_HOST_KUBECONFIG")]
    host_kubeconfig: Option<PathBuf>,

    /// Namespaced kinds to sync, e.g. "v1/ConfigMap"
    #[arg(long = "sync", env = "VSYNC_SYNC", value_delimiter = ',')]
    sync: Vec<String>,

    /// Cluster-scoped kinds to sync
    #[arg(long = "sync-cluster", env = "VSYNC_SYNC_CLUSTER", value_delimiter = ',')]
    sync_cluster: Vec<String>,

    /// Host kinds mirrored read-only into the virtual cluster
    #[arg(long = "import", env = "VSYNC_IMPORT", value_delimiter = ',')]
    import: Vec<String>,

    /// Label keys copied verbatim to host objects ("prefix/*" allowed)
    #[arg(long = "sync-labels", env = "VSYNC_SYNC_LABELS", value_delimiter = ',')]
    sync_labels: Vec<String>,

    /// Copy host status back into virtual objects
    #[arg(long = "status-backsync", env = "VSYNC_STATUS_BACKSYNC", action = ArgAction::SetTrue)]
    status_backsync: bool,
}

fn init_tracing() {
    let env = std::env::var("VSYNC_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("VSYNC_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid VSYNC_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let translation = TranslationContext::new(&cli.target_namespace, &cli.name)
        .with_multi_namespace(cli.multi_namespace)
        .with_synced_labels(cli.sync_labels.clone());
    let config = EngineConfig::from_env();
    info!(
        target_namespace = %cli.target_namespace,
        tenant = %cli.name,
        multi_namespace = cli.multi_namespace,
        gc_period_secs = config.gc_period.as_secs(),
        "starting vsync"
    );

    let host_client = connect(cli.host_kubeconfig.as_deref()).await.context("connecting to host cluster")?;
    let virtual_client = connect(Some(cli.virtual_kubeconfig.as_path())).await.context("connecting to virtual API server")?;
    let host = KubeStore::new("host", host_client).with_namespace_creation(cli.multi_namespace);
    let virt = KubeStore::new("virtual", virtual_client);

    let kinds: Vec<String> = cli.sync.iter().chain(&cli.sync_cluster).chain(&cli.import).cloned().collect();
    host.preload(&kinds).await.context("resolving kinds on host cluster")?;
    virt.preload(&kinds).await.context("resolving kinds on virtual API server")?;

    let virt: Arc<dyn ObjectStore> = Arc::new(virt);
    let host: Arc<dyn ObjectStore> = Arc::new(host);
    let ctx = SyncContext::new(virt, host, translation, config);

    let mut registrations = Vec::new();
    for kind in &cli.sync {
        let s = GenericSyncer::namespaced(kind.as_str(), ctx.translation.clone())?.with_status_backsync(cli.status_backsync);
        registrations.push(register_syncer(&ctx, Arc::new(s)).await.with_context(|| format!("registering {}", kind))?);
    }
    for kind in &cli.sync_cluster {
        let s = GenericSyncer::cluster(kind.as_str(), ctx.translation.clone())?.with_status_backsync(cli.status_backsync);
        registrations.push(register_syncer(&ctx, Arc::new(s)).await.with_context(|| format!("registering {}", kind))?);
    }
    for kind in &cli.import {
        let s = ImportSyncer::new(kind.as_str());
        registrations.push(register_import(&ctx, Arc::new(s)).await.with_context(|| format!("registering import {}", kind))?);
    }
    if registrations.is_empty() {
        warn!("no kinds configured; pass --sync, --sync-cluster or --import");
    }
    info!(syncers = registrations.len(), "vsync running");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    ctx.cancel.cancel();
    futures::future::join_all(registrations.into_iter().map(|r| r.join())).await;
    Ok(())
}
