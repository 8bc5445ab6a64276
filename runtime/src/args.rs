use crate::server::ReviewServer;
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use rbacgraph_controller_k8s_api::{self as k8s, watcher};
use rbacgraph_controller_k8s_index as index;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{info_span, Instrument};

const REBUILD_DEBOUNCE: Duration = Duration::from_millis(500);
const DISCOVERY_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Parser)]
#[clap(name = "rbacgraph", about = "Serves RoleGraphReview queries over the cluster's RBAC objects")]
pub struct Args {
    #[clap(
        long,
        default_value = "rbacgraph=info,warn",
        env = "RBACGRAPH_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Triggers a full snapshot rebuild on this cadence even without watch
    /// events. 0 disables periodic resync.
    #[clap(long, default_value = "0")]
    resync_interval_secs: u64,

    /// Restrict query results to the RBAC objects the caller has permission
    /// to list.
    #[clap(long)]
    enforce_caller_scope: bool,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            resync_interval_secs,
            enforce_caller_scope,
        } = self;

        let mut prom = <Registry>::default();
        let metrics = index::Metrics::register(prom.sub_registry_with_prefix("rbacgraph_index"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(Some(server))
            .build()
            .await?;

        // The raw caches are fed by the watches below; a single task rebuilds
        // and publishes snapshots from them.
        let idx = index::Index::shared();
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let resync =
            (resync_interval_secs > 0).then(|| Duration::from_secs(resync_interval_secs));
        tokio::spawn(
            index::rebuilds(idx.clone(), snapshot_tx, metrics, REBUILD_DEBOUNCE, resync)
                .instrument(info_span!("rebuilds")),
        );

        let roles = runtime.watch_all::<k8s::Role>(watcher::Config::default());
        tokio::spawn(kubert::index::namespaced(idx.clone(), roles).instrument(info_span!("roles")));

        let cluster_roles = runtime.watch_all::<k8s::ClusterRole>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(idx.clone(), cluster_roles).instrument(info_span!("clusterroles")),
        );

        let role_bindings = runtime.watch_all::<k8s::RoleBinding>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(idx.clone(), role_bindings)
                .instrument(info_span!("rolebindings")),
        );

        let cluster_role_bindings =
            runtime.watch_all::<k8s::ClusterRoleBinding>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(idx.clone(), cluster_role_bindings)
                .instrument(info_span!("clusterrolebindings")),
        );

        let pods = runtime.watch_all::<k8s::Pod>(watcher::Config::default());
        tokio::spawn(kubert::index::namespaced(idx.clone(), pods).instrument(info_span!("pods")));

        let deployments = runtime.watch_all::<k8s::Deployment>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(idx.clone(), deployments).instrument(info_span!("deployments")),
        );

        let replica_sets = runtime.watch_all::<k8s::ReplicaSet>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(idx.clone(), replica_sets)
                .instrument(info_span!("replicasets")),
        );

        let stateful_sets = runtime.watch_all::<k8s::StatefulSet>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(idx.clone(), stateful_sets)
                .instrument(info_span!("statefulsets")),
        );

        let daemon_sets = runtime.watch_all::<k8s::DaemonSet>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(idx.clone(), daemon_sets).instrument(info_span!("daemonsets")),
        );

        let jobs = runtime.watch_all::<k8s::Job>(watcher::Config::default());
        tokio::spawn(kubert::index::namespaced(idx.clone(), jobs).instrument(info_span!("jobs")));

        let cron_jobs = runtime.watch_all::<k8s::CronJob>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(idx.clone(), cron_jobs).instrument(info_span!("cronjobs")),
        );

        let (discovery_rx, discovery_task) =
            index::discovery::refresh(runtime.client(), DISCOVERY_REFRESH_INTERVAL);
        tokio::spawn(discovery_task.instrument(info_span!("discovery")));

        let handle = index::Handle::new(snapshot_rx, discovery_rx);
        let runtime = runtime.spawn_server(move || ReviewServer::new(handle, enforce_caller_scope));

        // Block on the shutdown signal; the watch and rebuild tasks end with
        // the process.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
