//! Agent CSI driver daemon.
//!
//! Runs on every node and serves the CSI Identity and Node services to
//! kubelet. Alongside the gRPC server it runs:
//!
//! - the provisioner's `DynaKube` reconcile loop, which installs agents and
//!   triggers the per-tenant garbage collection
//! - the `/healthz` endpoint
//!
//! The metadata correctness sweep runs once before serving.

use std::fs;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::oneshot;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_csi_core::SystemMounter;
use agent_csi_driver::{health, serve, Args, KubeClusterView, NodeService, Publisher, PublisherConfig};
use agent_csi_gc::{GarbageCollector, KubeClusterState};
use agent_csi_provisioner::{Controller, JobImageInstaller, Provisioner};
use agent_csi_store::SqliteStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,agent_csi=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!(
        endpoint = %args.endpoint,
        node_id = %args.node_id,
        root_dir = %args.root_dir.display(),
        namespace = %args.pod_namespace,
        flavors = ?args.flavors,
        "Starting agent CSI driver"
    );

    let paths = args.paths();
    fs::create_dir_all(paths.root_dir())?;
    let db_path = paths.metadata_db();
    tracing::info!(path = %db_path.display(), "Opening metadata store");
    let store = Arc::new(SqliteStore::open(&db_path)?);

    let client = kube::Client::try_default().await?;

    let gc = Arc::new(GarbageCollector::new(store.clone(), paths.clone()));
    let cluster_state = KubeClusterState::new(client.clone(), &args.pod_namespace, &args.node_id);
    match gc.check_metadata(&cluster_state).await {
        Ok(report) => tracing::info!(
            deleted_volumes = report.deleted_volumes.len(),
            deleted_tenants = report.deleted_tenants.len(),
            "Metadata sweep complete"
        ),
        Err(e) => tracing::warn!(error = %e, "Metadata sweep failed, continuing"),
    }

    let provisioner_config = args.provisioner_config();
    let images = Arc::new(JobImageInstaller::new(client.clone(), provisioner_config.clone()));
    let provisioner = Arc::new(Provisioner::new(
        store.clone(),
        paths.clone(),
        provisioner_config,
        images,
    ));
    tokio::spawn(Controller::new(client.clone(), provisioner, gc).run());

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let health_addr = args.health_probe_bind_address;
    tokio::spawn(async move {
        let shutdown = async move {
            let _ = stop_rx.await;
        };
        if let Err(e) = health::serve(health_addr, shutdown).await {
            tracing::error!(error = %e, "Health endpoint failed");
        }
    });

    let publisher = Publisher::new(
        store,
        paths,
        Arc::new(SystemMounter),
        Arc::new(KubeClusterView::new(client, &args.pod_namespace)),
        PublisherConfig {
            support_namespaces: args.support_namespaces(),
        },
    );
    let node = NodeService::new(&args.node_id, Arc::new(publisher));

    serve(&args.endpoint, args.max_grpc_requests, node, async move {
        shutdown_signal().await;
        let _ = stop_tx.send(());
    })
    .await?;

    tracing::info!("Agent CSI driver stopped");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
