use async_trait::async_trait;
use kube::{
    api::{ListParams, Patch, PatchParams},
    Api, Client, Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use std::{collections::BTreeMap, fmt};
use warden_policy_controller_k8s_api::{DaemonSet, Deployment, LabelSelector, Pod, StatefulSet, Target};

/// Pod-template annotation naming the enforcement profile a workload runs
/// under. Adding or changing it rolls the workload.
pub const PROFILE_ANNOTATION: &str = "policy.warden.io/enforcement-profile";

/// Nonce annotation forcing a template change on profile recreation.
pub const NONCE_ANNOTATION: &str = "policy.warden.io/rollout-nonce";

/// Marks the workload for exclusive-mode enforcement.
pub const EXCLUSIVE_MODE_ANNOTATION: &str = "policy.warden.io/exclusive-mode";

/// A request to (de)annotate the workloads a policy targets. An empty
/// `profile_name` strips the enforcement annotations instead.
#[derive(Clone, Debug)]
pub struct WorkloadRefresh {
    /// `None` addresses workloads in every namespace (cluster scope).
    pub namespace: Option<String>,
    pub enforcer: String,
    pub target: Target,
    pub profile_name: String,
    pub modeling_id: String,
    pub exclusive_mode: bool,
}

/// Rewrites target workloads to pick up (or drop) an enforcement profile.
///
/// Always invoked detached from the reconciliation critical path; failures are
/// logged here and never retried by the policy controller.
#[async_trait]
pub trait WorkloadNotifier: Send + Sync + 'static {
    async fn notify(&self, refresh: WorkloadRefresh) -> anyhow::Result<()>;
}

pub struct KubeWorkloadNotifier {
    client: Client,
}

impl KubeWorkloadNotifier {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
            + DeserializeOwned,
    {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    async fn patch_matching<K>(
        &self,
        api: Api<K>,
        refresh: &WorkloadRefresh,
        patch: &serde_json::Value,
    ) -> anyhow::Result<()>
    where
        K: Resource<DynamicType = ()> + Clone + DeserializeOwned + fmt::Debug,
    {
        let params = PatchParams::default();
        for workload in api.list(&ListParams::default()).await? {
            if !target_matches(&refresh.target, &workload.name_any(), workload.labels()) {
                continue;
            }
            let name = workload.name_any();
            tracing::info!(
                kind = %refresh.target.kind,
                workload = %name,
                profile = %refresh.profile_name,
                "annotating workload"
            );
            api.patch(&name, &params, &Patch::Merge(patch)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl WorkloadNotifier for KubeWorkloadNotifier {
    async fn notify(&self, refresh: WorkloadRefresh) -> anyhow::Result<()> {
        let ns = refresh.namespace.as_deref();
        match refresh.target.kind.as_str() {
            "Deployment" => {
                let api: Api<Deployment> = self.api(ns);
                self.patch_matching(api, &refresh, &template_patch(&refresh))
                    .await
            }
            "StatefulSet" => {
                let api: Api<StatefulSet> = self.api(ns);
                self.patch_matching(api, &refresh, &template_patch(&refresh))
                    .await
            }
            "DaemonSet" => {
                let api: Api<DaemonSet> = self.api(ns);
                self.patch_matching(api, &refresh, &template_patch(&refresh))
                    .await
            }
            // Bare pods cannot be rolled; annotate them in place so the agent
            // can observe the change.
            "Pod" => {
                let api: Api<Pod> = self.api(ns);
                self.patch_matching(api, &refresh, &metadata_patch(&refresh))
                    .await
            }
            kind => anyhow::bail!("unsupported target kind {kind:?}"),
        }
    }
}

fn annotations(refresh: &WorkloadRefresh) -> serde_json::Value {
    if refresh.profile_name.is_empty() {
        // Merge-patch nulls delete the keys.
        return serde_json::json!({
            PROFILE_ANNOTATION: null,
            NONCE_ANNOTATION: null,
            EXCLUSIVE_MODE_ANNOTATION: null,
        });
    }
    let mut value = serde_json::json!({
        PROFILE_ANNOTATION: format!("{}://{}", refresh.enforcer.to_lowercase(), refresh.profile_name),
        NONCE_ANNOTATION: refresh.modeling_id,
    });
    if refresh.exclusive_mode {
        value[EXCLUSIVE_MODE_ANNOTATION] = "true".into();
    }
    value
}

fn template_patch(refresh: &WorkloadRefresh) -> serde_json::Value {
    serde_json::json!({
        "spec": { "template": { "metadata": { "annotations": annotations(refresh) } } }
    })
}

fn metadata_patch(refresh: &WorkloadRefresh) -> serde_json::Value {
    serde_json::json!({ "metadata": { "annotations": annotations(refresh) } })
}

/// Matches a workload against a policy target: by exact name, or by
/// `matchLabels` subset. `matchExpressions` are not evaluated here; targets
/// are validated to use simple selectors.
fn target_matches(target: &Target, name: &str, labels: &BTreeMap<String, String>) -> bool {
    if let Some(target_name) = target.name.as_deref() {
        if !target_name.is_empty() {
            return target_name == name;
        }
    }
    match &target.selector {
        Some(LabelSelector {
            match_labels: Some(wanted),
            ..
        }) => wanted
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|have| have == v)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn matches_by_name() {
        let target = Target {
            kind: "Deployment".to_string(),
            name: Some("app".to_string()),
            selector: None,
        };
        assert!(target_matches(&target, "app", &labels(&[])));
        assert!(!target_matches(&target, "other", &labels(&[])));
    }

    #[test]
    fn matches_by_label_subset() {
        let target = Target {
            kind: "Deployment".to_string(),
            name: None,
            selector: Some(LabelSelector {
                match_labels: Some(labels(&[("app", "web")])),
                ..Default::default()
            }),
        };
        assert!(target_matches(
            &target,
            "anything",
            &labels(&[("app", "web"), ("tier", "frontend")])
        ));
        assert!(!target_matches(&target, "anything", &labels(&[("app", "db")])));
    }

    #[test]
    fn strip_patch_nulls_annotations() {
        let refresh = WorkloadRefresh {
            namespace: Some("ns".to_string()),
            enforcer: "AppArmor".to_string(),
            target: Target::default(),
            profile_name: String::new(),
            modeling_id: String::new(),
            exclusive_mode: false,
        };
        let patch = template_patch(&refresh);
        assert!(patch["spec"]["template"]["metadata"]["annotations"][PROFILE_ANNOTATION].is_null());
    }
}
