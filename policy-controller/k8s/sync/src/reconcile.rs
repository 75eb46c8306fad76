use crate::{
    manager::StatusManagerHandle,
    metrics::ControllerMetrics,
    profile::{self, GenerateError, ProfileGenerator},
    queue::WorkQueue,
    resource::{PolicyResource, ResourceId},
    status,
    store::{ResourceStore, StoreError},
    validation::{self, UpdateDecision},
    workload::{WorkloadNotifier, WorkloadRefresh},
};
use std::{
    hash::{Hash, Hasher},
    marker::PhantomData,
    sync::Arc,
};
use tokio::sync::watch;
use warden_policy_controller_k8s_api::{
    BehaviorModeling, EnforcementProfile, EnforcementProfileSpec, EnforcementProfileStatus,
    PolicyConditionType, PolicyMode, PolicyPhase, Target,
};

/// Maximum sync attempts per key before it is dropped from the queue.
const MAX_RETRIES: u32 = 5;

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Namespace holding profiles derived from cluster-wide policies.
    pub controller_namespace: String,
    /// Roll existing target workloads when profiles appear or vanish.
    pub restart_existing_workloads: bool,
    /// Whether this controller instance accepts BehaviorModeling policies.
    pub behavior_modeling_enabled: bool,
    /// Pass the exclusive-mode marker to annotated workloads.
    pub exclusive_mode: bool,
}

/// The reconciliation engine for one policy scope. Drains policy keys from
/// the change queue and drives the owned enforcement profile to match,
/// reporting every decision through the policy's own status conditions.
pub struct Controller<P, S, G, W> {
    store: Arc<S>,
    generator: Arc<G>,
    workloads: Arc<W>,
    status_manager: StatusManagerHandle,
    queue: Arc<WorkQueue<ResourceId>>,
    metrics: ControllerMetrics,
    config: ControllerConfig,
    ready: watch::Receiver<bool>,
    _kind: PhantomData<fn() -> P>,
}

impl<P, S, G, W> Controller<P, S, G, W>
where
    P: PolicyResource,
    S: ResourceStore<P>,
    G: ProfileGenerator,
    W: WorkloadNotifier,
{
    pub fn new(
        store: Arc<S>,
        generator: Arc<G>,
        workloads: Arc<W>,
        status_manager: StatusManagerHandle,
        metrics: ControllerMetrics,
        config: ControllerConfig,
        ready: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            generator,
            workloads,
            status_manager,
            queue: WorkQueue::new(),
            metrics,
            config,
            ready,
            _kind: PhantomData,
        }
    }

    /// The change queue fed by the event router.
    pub fn queue(&self) -> Arc<WorkQueue<ResourceId>> {
        self.queue.clone()
    }

    /// Blocks until the policy cache is warm, then runs `workers` concurrent
    /// drain loops until `shutdown` fires. Returns an error only if the watch
    /// terminates before the initial sync; the process must then restart.
    pub async fn run(
        self: Arc<Self>,
        workers: usize,
        shutdown: drain::Watch,
    ) -> anyhow::Result<()> {
        let mut ready = self.ready.clone();
        while !*ready.borrow_and_update() {
            if ready.changed().await.is_err() {
                self.queue.shut_down();
                anyhow::bail!("policy watch terminated before the initial sync completed");
            }
        }
        tracing::info!(workers, "policy cache synced; starting workers");

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..workers.max(1) {
            let controller = self.clone();
            tasks.spawn(async move { while controller.process_next().await {} });
        }

        let release = shutdown.signaled().await;
        tracing::info!("shutdown signaled; draining in-flight work");
        self.queue.shut_down();
        while tasks.join_next().await.is_some() {}
        drop(release);
        Ok(())
    }

    /// Drains and shuts down the queue.
    pub fn cleanup(&self) {
        self.queue.shut_down();
    }

    /// Processes one key; returns false once the queue has shut down.
    pub(crate) async fn process_next(&self) -> bool {
        let Some(id) = self.queue.get().await else {
            return false;
        };
        self.metrics.queue_depth.set(self.queue.len() as i64);
        let result = self.sync(&id).await;
        self.complete(&id, result);
        self.queue.done(&id);
        true
    }

    fn complete(&self, id: &ResourceId, result: Result<(), StoreError>) {
        let error = match result {
            Ok(()) => {
                self.queue.forget(id);
                return;
            }
            Err(error) => error,
        };
        if self.queue.num_requeues(id) < MAX_RETRIES {
            tracing::warn!(%id, %error, "failed to sync policy; requeueing");
            self.metrics.retries.inc();
            self.queue.add_rate_limited(id.clone());
        } else {
            tracing::error!(%id, %error, "failed to sync policy; dropping out of the queue");
            self.metrics.drops.inc();
            self.queue.forget(id);
        }
    }

    /// Level-triggered reconciliation: recompute the decision from current
    /// store state, never from the triggering event.
    pub(crate) async fn sync(&self, id: &ResourceId) -> Result<(), StoreError> {
        let policy = match self.store.get_policy(id).await {
            Ok(policy) => policy,
            Err(StoreError::NotFound) => return self.handle_delete(id).await,
            Err(error) => return Err(error),
        };

        let name = profile::profile_name(id.namespace.as_deref(), &id.name);
        let namespace = validation::profile_namespace(id, &self.config.controller_namespace);
        match self.store.get_profile(namespace, &name).await {
            Ok(existing) => self.handle_update(policy, existing).await,
            Err(StoreError::NotFound) => self.handle_create(policy).await,
            Err(error) => Err(error),
        }
    }

    /// Tears down the profile derived from a deleted policy. Idempotent: a
    /// missing profile means the work is already done.
    async fn handle_delete(&self, id: &ResourceId) -> Result<(), StoreError> {
        let name = profile::profile_name(id.namespace.as_deref(), &id.name);
        let namespace = validation::profile_namespace(id, &self.config.controller_namespace);

        let existing = match self.store.get_profile(namespace, &name).await {
            Ok(profile) => profile,
            Err(StoreError::NotFound) => return Ok(()),
            Err(error) => return Err(error),
        };

        tracing::info!(%id, profile = %name, "deleting enforcement profile");
        self.store.delete_profile(namespace, &name).await?;

        if self.config.restart_existing_workloads {
            self.spawn_workload_refresh(
                id.namespace.clone(),
                existing.spec.profile.enforcer.clone(),
                existing.spec.target.clone(),
                String::new(),
                String::new(),
            );
        }

        self.status_manager.delete(id);
        Ok(())
    }

    async fn handle_create(&self, mut policy: P) -> Result<(), StoreError> {
        let id = policy.id();
        tracing::info!(%id, target = ?policy.target(), "policy created");

        if let Some(rejection) =
            validation::validate_create(&policy, self.config.behavior_modeling_enabled)
        {
            tracing::warn!(%id, reason = %rejection.reason, %rejection.message, "refusing policy");
            // A forbidden policy will not become valid by retrying; record the
            // condition and stop.
            if let Err(error) = self
                .record(
                    &mut policy,
                    None,
                    rejection.reset_ready,
                    rejection.phase,
                    rejection.condition,
                    false,
                    rejection.reason,
                    &rejection.message,
                )
                .await
            {
                tracing::warn!(%id, %error, "failed to record rejection");
            }
            return Ok(());
        }

        let name = profile::profile_name(id.namespace.as_deref(), &id.name);
        let namespace = validation::profile_namespace(&id, &self.config.controller_namespace);
        let profile = match self.build_profile(&policy, namespace, &name) {
            Ok(profile) => profile,
            Err(error) => {
                tracing::warn!(%id, %error, "profile generation failed");
                self.record(
                    &mut policy,
                    None,
                    true,
                    Some(PolicyPhase::Error),
                    PolicyConditionType::Created,
                    false,
                    "Error",
                    &error.to_string(),
                )
                .await?;
                return Ok(());
            }
        };

        self.record(
            &mut policy,
            Some(&name),
            true,
            Some(PolicyPhase::Pending),
            PolicyConditionType::Created,
            true,
            "",
            "",
        )
        .await?;

        if policy.protection().mode == PolicyMode::BehaviorModeling {
            if let Err(error) = self.reset_model_status(namespace, &name).await {
                tracing::warn!(%id, %error, "failed to reset behavior model status");
            }
        }

        self.status_manager.desired_count_stale();

        tracing::info!(%id, profile = %name, "creating enforcement profile");
        self.store.create_profile(namespace, &profile).await?;

        if self.config.restart_existing_workloads {
            self.spawn_workload_refresh(
                id.namespace.clone(),
                policy.protection().enforcer.clone(),
                policy.target().clone(),
                name,
                profile.spec.behavior_modeling.unique_id.clone(),
            );
        }

        Ok(())
    }

    async fn handle_update(
        &self,
        mut policy: P,
        existing: EnforcementProfile,
    ) -> Result<(), StoreError> {
        let id = policy.id();
        tracing::info!(%id, target = ?policy.target(), "policy updated");

        match validation::validate_update(&policy, &existing) {
            UpdateDecision::Skip => {
                tracing::debug!(%id, "nothing to update");
                return Ok(());
            }
            UpdateDecision::Reject(rejection) => {
                tracing::warn!(%id, reason = %rejection.reason, %rejection.message, "refusing policy update");
                return self
                    .record(
                        &mut policy,
                        None,
                        rejection.reset_ready,
                        rejection.phase,
                        rejection.condition,
                        false,
                        rejection.reason,
                        &rejection.message,
                    )
                    .await;
            }
            UpdateDecision::Proceed => {}
        }

        self.record(
            &mut policy,
            None,
            true,
            Some(PolicyPhase::Pending),
            PolicyConditionType::Updated,
            true,
            "",
            "",
        )
        .await?;

        // Recompile the desired spec, preserving everything else from the
        // existing profile.
        let mut desired = existing.clone();
        desired.spec.profile = match self
            .generator
            .generate(policy.protection(), &existing.spec.profile.name)
        {
            Ok(compiled) => compiled,
            Err(error) => {
                tracing::warn!(%id, %error, "profile generation failed");
                self.record(
                    &mut policy,
                    None,
                    true,
                    Some(PolicyPhase::Error),
                    PolicyConditionType::Created,
                    false,
                    "Error",
                    &error.to_string(),
                )
                .await?;
                return Ok(());
            }
        };
        if policy.protection().mode == PolicyMode::BehaviorModeling {
            desired.spec.behavior_modeling.duration = policy.protection().modeling_duration();
        }

        let namespace = validation::profile_namespace(&id, &self.config.controller_namespace);
        self.status_manager.desired_count_stale();

        if desired.spec != existing.spec {
            // Rebuild: the compiled content changed, so every node must
            // reload. Reset the load-tracking status before the spec write.
            tracing::info!(%id, profile = %existing.spec.profile.name, "rebuilding enforcement profile");
            let mut profile = existing;
            profile.status = Some(EnforcementProfileStatus::default());
            self.store.update_profile_status(namespace, &profile).await?;

            if policy.protection().mode == PolicyMode::BehaviorModeling {
                if let Err(error) = self
                    .reset_model_status(namespace, &profile.spec.profile.name)
                    .await
                {
                    tracing::warn!(%id, %error, "failed to reset behavior model status");
                }
            }

            self.status_manager.reset(&id);

            profile.spec = desired.spec;
            self.store.update_profile(namespace, &profile).await?;
        } else {
            // Only cosmetic policy fields changed; avoid profile churn and let
            // the aggregator refresh the reported status.
            tracing::debug!(%id, "profile spec unchanged; refreshing status only");
            self.status_manager.refresh(&id);
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        policy: &mut P,
        profile_name: Option<&str>,
        reset_ready: bool,
        phase: Option<PolicyPhase>,
        condition_type: PolicyConditionType,
        value: bool,
        reason: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        status::set_condition(
            policy.status_mut(),
            profile_name,
            reset_ready,
            phase,
            condition_type,
            value,
            reason,
            message,
        );
        self.store.update_policy_status(policy).await
    }

    async fn reset_model_status(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let mut model = match self.store.get_model(namespace, name).await {
            Ok(model) => model,
            Err(StoreError::NotFound) => return Ok(()),
            Err(error) => return Err(error),
        };
        model.status = Some(Default::default());
        self.store.update_model_status(namespace, &model).await
    }

    fn build_profile(
        &self,
        policy: &P,
        namespace: &str,
        name: &str,
    ) -> Result<EnforcementProfile, GenerateError> {
        let compiled = self.generator.generate(policy.protection(), name)?;
        let duration = policy.protection().modeling_duration();
        let unique_id = if duration > 0 {
            modeling_id(name)
        } else {
            String::new()
        };

        let mut profile = EnforcementProfile::new(
            name,
            EnforcementProfileSpec {
                target: policy.target().clone(),
                profile: compiled,
                behavior_modeling: BehaviorModeling {
                    duration,
                    unique_id,
                },
            },
        );
        profile.metadata.namespace = Some(namespace.to_string());
        Ok(profile)
    }

    fn spawn_workload_refresh(
        &self,
        namespace: Option<String>,
        enforcer: String,
        target: Target,
        profile_name: String,
        modeling_id: String,
    ) {
        let refresh = WorkloadRefresh {
            namespace,
            enforcer,
            target,
            profile_name,
            modeling_id,
            exclusive_mode: self.config.exclusive_mode,
        };
        let workloads = self.workloads.clone();
        tokio::spawn(async move {
            if let Err(error) = workloads.notify(refresh).await {
                tracing::warn!(%error, "workload refresh failed");
            }
        });
    }
}

/// A nonce tying a profile instance to one round of behavior collection.
fn modeling_id(name: &str) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    name.hash(&mut hasher);
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default()
        .hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
