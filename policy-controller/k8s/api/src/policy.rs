use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace-scoped security intent for a workload.
#[derive(Clone, Debug, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "policy.warden.io",
    version = "v1beta1",
    kind = "WorkloadPolicy",
    status = "PolicyStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadPolicySpec {
    pub target: Target,
    pub policy: Protection,
}

/// Cluster-wide security intent. Shares the spec and status bodies with
/// `WorkloadPolicy`; its generated profile lives in the controller namespace.
#[derive(Clone, Debug, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "policy.warden.io",
    version = "v1beta1",
    kind = "ClusterWorkloadPolicy",
    status = "PolicyStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterWorkloadPolicySpec {
    pub target: Target,
    pub policy: Protection,
}

/// Selects the workload a policy protects, by name or by label selector
/// (mutually exclusive).
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Protection {
    pub enforcer: String,
    pub mode: PolicyMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modeling_options: Option<ModelingOptions>,
}

impl Protection {
    /// Modeling duration in minutes; zero when the policy does not model.
    pub fn modeling_duration(&self) -> u32 {
        if self.mode != PolicyMode::BehaviorModeling {
            return 0;
        }
        self.modeling_options.as_ref().map_or(0, |o| o.duration)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum PolicyMode {
    AlwaysAllow,
    RuntimeDefault,
    EnhanceProtect,
    BehaviorModeling,
}

impl fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyMode::AlwaysAllow => "AlwaysAllow".fmt(f),
            PolicyMode::RuntimeDefault => "RuntimeDefault".fmt(f),
            PolicyMode::EnhanceProtect => "EnhanceProtect".fmt(f),
            PolicyMode::BehaviorModeling => "BehaviorModeling".fmt(f),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelingOptions {
    /// How long to observe the workload before the profile is finalized,
    /// in minutes.
    pub duration: u32,
}

/// Status subtree owned exclusively by the controller.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub profile_name: String,
    #[serde(default)]
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<PolicyPhase>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<PolicyCondition>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum PolicyPhase {
    Pending,
    Modeling,
    Completed,
    Protecting,
    Error,
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum PolicyConditionType {
    Created,
    Updated,
    Ready,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCondition {
    #[serde(rename = "type")]
    pub condition_type: PolicyConditionType,
    /// `"True"` or `"False"`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}
