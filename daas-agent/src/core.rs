use daas_config::shared::AgentConfig;
use daas_provisioner::concurrency::shutdown::create_shutdown_channel;
use daas_provisioner::events::watch::ServiceWatch;
use daas_provisioner::k8s::http::KubeClusterClient;
use daas_provisioner::workers::base::{Worker, WorkerHandle};
use tracing::{error, info};

/// Starts the provisioning agent and runs it until a shutdown signal arrives.
///
/// The agent connects to the cluster and keeps a single watch over the
/// Services that expose tenant database servers; execution requests are
/// served by per-database runners spawned against the same client.
pub async fn start_agent_with_config(config: AgentConfig) -> anyhow::Result<()> {
    let cluster = KubeClusterClient::connect(config.cluster.namespace.clone()).await?;

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let service_watch = ServiceWatch::new(cluster, shutdown_rx);
    let watch_handle = service_watch.start().await?;

    info!(
        namespace = %config.cluster.namespace,
        "provisioning agent started, waiting for shutdown signal"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping the provisioning agent");

    // Dropping the sender side also works, but sending the signal first lets
    // the watch actor log its own shutdown.
    if shutdown_tx.shutdown().is_err() {
        error!("the service watch stopped before the shutdown signal was sent");
    }

    watch_handle.wait().await?;

    Ok(())
}
