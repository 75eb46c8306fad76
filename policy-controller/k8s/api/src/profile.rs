use super::policy::Target;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Compiled enforcement state derived from a policy, loaded by the per-node
/// agents. One profile exists per live policy, addressed by a deterministic
/// name.
#[derive(Clone, Debug, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "policy.warden.io",
    version = "v1beta1",
    kind = "EnforcementProfile",
    status = "EnforcementProfileStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct EnforcementProfileSpec {
    /// Copied from the owning policy at creation; immutable thereafter.
    pub target: Target,
    pub profile: Profile,
    #[serde(default)]
    pub behavior_modeling: BehaviorModeling,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub name: String,
    pub enforcer: String,
    pub mode: String,
    /// Enforcer-specific compiled rule content.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorModeling {
    /// Modeling duration in minutes; zero when the policy does not model.
    #[serde(default)]
    pub duration: u32,
    /// Correlates this profile instance with in-flight behavior collection.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unique_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnforcementProfileStatus {
    /// Number of nodes that have loaded the current profile revision.
    #[serde(default)]
    pub loaded_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ProfileCondition>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileCondition {
    pub node_name: String,
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Behavior data collected while a policy runs in modeling mode. The policy
/// controller only ever resets its status; the content is produced by the
/// status aggregation subsystem.
#[derive(Clone, Debug, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "policy.warden.io",
    version = "v1beta1",
    kind = "BehaviorModel",
    status = "BehaviorModelStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorModelSpec {
    #[serde(default)]
    pub profile_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorModelStatus {
    #[serde(default)]
    pub completed_count: u32,
    #[serde(default)]
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ProfileCondition>,
}
