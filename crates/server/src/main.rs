use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use herald_ingest::{EventWatcher, Pipeline};
use herald_kube::{ApiMetadataFetcher, KubeClient, KubeConfig, KubeEventSource, KubeLeaseLock};
use herald_leader::{identity, Coordinator, ElectorConfig, LeaderElector, Workload};
use herald_notify::ChannelRegistry;
use herald_server::metrics::{self, MetricsState};
use herald_server::{logging, startup, AppConfig, Cli, LeaderElectionConfig};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    herald_core::config::load_dotenv();
    let cli = Cli::parse();

    let config = AppConfig::load(&cli.conf)?;
    logging::init(&config.log_level, &config.log_format)?;
    let max_age = config.validate().context("invalid configuration")?;
    info!(
        conf = %cli.conf.display(),
        max_event_age_seconds = max_age,
        cluster = config.cluster_name().unwrap_or("<unset>"),
        "configuration loaded"
    );

    let registry = startup::build_registry(&config)?;

    let kube = KubeClient::new(&KubeConfig::from_env()?)?;
    let watcher = startup::build_watcher(
        &config,
        startup::watcher_config(&config, max_age, cli.strict_caching),
        Arc::new(ApiMetadataFetcher::new(kube.clone())),
        Arc::clone(&registry),
    );
    let namespace = Some(config.namespace.clone()).filter(|ns| !ns.is_empty());
    let source = KubeEventSource::new(kube.clone(), namespace);
    let pipeline = Arc::new(Pipeline::new(Arc::clone(&watcher), Arc::new(source)));

    spawn_metrics(&cli.metrics_address, &watcher, &registry).await?;

    if config.leader_election.enabled {
        run_with_election(&config.leader_election, kube, pipeline).await?;
    } else {
        pipeline.start();
        shutdown_signal().await;
        pipeline.stop().await;
    }

    registry.close().await;
    info!("Exiting");
    Ok(())
}

async fn spawn_metrics(
    addr: &str,
    watcher: &Arc<EventWatcher>,
    registry: &Arc<ChannelRegistry>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot listen on {addr}"))?;
    let app = metrics::router(MetricsState {
        watcher: Arc::clone(watcher),
        registry: Arc::clone(registry),
    });
    info!(address = %addr, "metrics endpoint listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "metrics server failed");
        }
    });
    Ok(())
}

/// Lead, then on a signal release the lease and stop the pipeline only
/// after the safety window.
async fn run_with_election(
    election: &LeaderElectionConfig,
    kube: KubeClient,
    pipeline: Arc<Pipeline>,
) -> anyhow::Result<()> {
    let identity = identity(&election.leader_election_id);
    let lock = KubeLeaseLock::new(kube, election.lease_namespace(), &election.leader_election_id);
    let elector = LeaderElector::new(
        ElectorConfig {
            identity: identity.clone(),
            lease_duration: election.lease_duration(),
            renew_deadline: election.renew_deadline(),
            retry_period: election.retry_period(),
        },
        Arc::new(lock),
    );

    let workload: Arc<dyn Workload> = pipeline;
    let (coordinator, handle) = Coordinator::new(identity, workload, election.lease_duration());
    let (lease_tx, lease_rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = watch::channel(false);

    let coordinator = tokio::spawn(coordinator.run());
    let forwarder = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.forward(lease_rx).await })
    };
    let elector = tokio::spawn(async move { elector.run(lease_tx, stop_rx).await });

    shutdown_signal().await;
    handle.shutdown();
    let _ = stop_tx.send(true);

    elector.await.context("leader elector task failed")?;
    forwarder.await.context("lease forwarder task failed")?;
    let state = coordinator.await.context("leader coordinator task failed")?;
    info!(state = %state, "leadership released");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(signal = "SIGINT", "Received signal to exit"),
        _ = terminate => info!(signal = "SIGTERM", "Received signal to exit"),
    }
}
