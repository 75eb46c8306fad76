use crate::{
    k8s,
    sync::{
        router, BuiltinGenerator, Controller, ControllerConfig, ControllerMetrics, KubeStore,
        KubeWorkloadNotifier, StatusManagerHandle,
    },
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "policy", about = "A workload security policy controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "warden=info,warn",
        env = "WARDEN_POLICY_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Concurrent sync workers per policy scope.
    #[clap(long, default_value = "2")]
    workers: usize,

    /// Namespace holding the profiles derived from cluster-wide policies.
    #[clap(long, default_value = "warden")]
    controller_namespace: String,

    /// Roll the workloads a policy targets when its profile appears or
    /// vanishes.
    #[clap(long)]
    restart_existing_workloads: bool,

    /// Accept policies in the BehaviorModeling mode.
    #[clap(long)]
    enable_behavior_modeling: bool,

    /// Mark annotated workloads for exclusive BPF enforcement.
    #[clap(long)]
    bpf_exclusive_mode: bool,
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
            workers,
            controller_namespace,
            restart_existing_workloads,
            enable_behavior_modeling,
            bpf_exclusive_mode,
        } = self;

        let mut prom = <Registry>::default();
        let reconcile = prom.sub_registry_with_prefix("policy_reconcile");
        let namespaced_metrics =
            ControllerMetrics::register(reconcile.sub_registry_with_prefix("namespaced"));
        let cluster_metrics =
            ControllerMetrics::register(reconcile.sub_registry_with_prefix("cluster"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let client = runtime.client();
        let store = Arc::new(KubeStore::new(client.clone()));
        let generator = Arc::new(BuiltinGenerator);
        let workloads = Arc::new(KubeWorkloadNotifier::new(client));

        // The status aggregation subsystem runs in its own deployment; drain
        // its mailbox here so reconciliation never blocks on it.
        let (status_manager, mut status_events) = StatusManagerHandle::channel();
        tokio::spawn(async move {
            while let Some(event) = status_events.recv().await {
                tracing::debug!(?event, "status event");
            }
        });

        let config = ControllerConfig {
            controller_namespace,
            restart_existing_workloads,
            behavior_modeling_enabled: enable_behavior_modeling,
            exclusive_mode: bpf_exclusive_mode,
        };

        // Namespace-scoped policies.
        let (ready_tx, ready_rx) = watch::channel(false);
        let controller = Arc::new(Controller::<k8s::WorkloadPolicy, _, _, _>::new(
            store.clone(),
            generator.clone(),
            workloads.clone(),
            status_manager.clone(),
            namespaced_metrics.clone(),
            config.clone(),
            ready_rx,
        ));
        let policies = runtime.watch_all::<k8s::WorkloadPolicy>(watcher::Config::default());
        tokio::spawn(
            router::run(policies, controller.queue(), ready_tx, namespaced_metrics)
                .instrument(info_span!("workloadpolicies")),
        );
        tokio::spawn(
            controller
                .run(workers, runtime.shutdown_handle())
                .instrument(info_span!("workloadpolicy_sync")),
        );

        // Cluster-wide policies.
        let (ready_tx, ready_rx) = watch::channel(false);
        let controller = Arc::new(Controller::<k8s::ClusterWorkloadPolicy, _, _, _>::new(
            store,
            generator,
            workloads,
            status_manager,
            cluster_metrics.clone(),
            config,
            ready_rx,
        ));
        let policies = runtime.watch_all::<k8s::ClusterWorkloadPolicy>(watcher::Config::default());
        tokio::spawn(
            router::run(policies, controller.queue(), ready_tx, cluster_metrics)
                .instrument(info_span!("clusterworkloadpolicies")),
        );
        tokio::spawn(
            controller
                .run(workers, runtime.shutdown_handle())
                .instrument(info_span!("clusterworkloadpolicy_sync")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
