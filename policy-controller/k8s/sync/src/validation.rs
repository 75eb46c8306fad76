use crate::{
    profile,
    resource::{PolicyResource, ResourceId},
};
use warden_policy_controller_k8s_api::{
    EnforcementProfile, PolicyConditionType, PolicyMode, PolicyPhase,
};

pub const SUPPORTED_TARGET_KINDS: &[&str] = &["Deployment", "StatefulSet", "DaemonSet", "Pod"];

/// Maximum length of a generated profile name, per the Kubernetes object name
/// limit.
pub const MAX_PROFILE_NAME_LEN: usize = 63;

pub const REASON_FORBIDDEN: &str = "Forbidden";

/// A refused transition, to be recorded on the policy's status. `phase: None`
/// leaves the current phase untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    pub phase: Option<PolicyPhase>,
    pub condition: PolicyConditionType,
    pub reason: &'static str,
    pub message: String,
    pub reset_ready: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateDecision {
    Proceed,
    /// Nothing to do; no status write either.
    Skip,
    Reject(Rejection),
}

fn forbidden_create(message: String) -> Rejection {
    Rejection {
        phase: Some(PolicyPhase::Error),
        condition: PolicyConditionType::Created,
        reason: REASON_FORBIDDEN,
        message,
        reset_ready: true,
    }
}

fn forbidden_update(message: &str) -> Rejection {
    Rejection {
        phase: None,
        condition: PolicyConditionType::Updated,
        reason: REASON_FORBIDDEN,
        message: message.to_string(),
        reset_ready: true,
    }
}

/// Checks the creation invariants. Returns the rejection to record, or `None`
/// to proceed with profile creation.
pub fn validate_create<P: PolicyResource>(policy: &P, modeling_enabled: bool) -> Option<Rejection> {
    let target = policy.target();
    if !SUPPORTED_TARGET_KINDS.contains(&target.kind.as_str()) {
        return Some(forbidden_create(
            "This kind of target workload is not supported.".to_string(),
        ));
    }

    let named = target.name.as_deref().is_some_and(|n| !n.is_empty());
    if !named && target.selector.is_none() {
        return Some(forbidden_create(
            "The target workload must be specified by name or by selector.".to_string(),
        ));
    }
    if named && target.selector.is_some() {
        return Some(forbidden_create(
            "The target workload must not be specified by both name and selector.".to_string(),
        ));
    }

    if policy.protection().mode == PolicyMode::BehaviorModeling {
        if P::CLUSTER_SCOPED {
            return Some(forbidden_create(
                "The BehaviorModeling mode is not supported for cluster-wide policies."
                    .to_string(),
            ));
        }
        if !modeling_enabled {
            return Some(forbidden_create(
                "The BehaviorModeling feature is not enabled.".to_string(),
            ));
        }
    }

    let id = policy.id();
    let name = profile::profile_name(id.namespace.as_deref(), &id.name);
    if name.len() > MAX_PROFILE_NAME_LEN {
        let budget = profile::name_budget(id.namespace.as_deref());
        return Some(forbidden_create(format!(
            "The generated profile name is too long; limit the policy name to {budget} bytes.",
        )));
    }

    None
}

/// Checks the mutation invariants against the profile recorded at creation.
/// Rules are evaluated in order; the first match wins.
pub fn validate_update<P: PolicyResource>(
    policy: &P,
    profile: &EnforcementProfile,
) -> UpdateDecision {
    if policy.target() != &profile.spec.target {
        return UpdateDecision::Reject(forbidden_update(
            "The target of a policy cannot be changed. Delete and recreate the policy.",
        ));
    }

    let mode = policy.protection().mode;
    let recorded_duration = profile.spec.behavior_modeling.duration;

    if mode == PolicyMode::BehaviorModeling && recorded_duration == 0 {
        return UpdateDecision::Reject(forbidden_update(
            "Switching into the BehaviorModeling mode is not allowed. Delete and recreate the policy.",
        ));
    }
    if mode != PolicyMode::BehaviorModeling && recorded_duration != 0 {
        return UpdateDecision::Reject(forbidden_update(
            "Switching out of the BehaviorModeling mode is not allowed. Delete and recreate the policy.",
        ));
    }

    if mode == PolicyMode::BehaviorModeling {
        match policy.phase() {
            Some(PolicyPhase::Completed) | Some(PolicyPhase::Protecting) => {
                let mut rejection = forbidden_update(
                    "A policy whose behavior modeling has completed cannot be modified. Delete and recreate the policy.",
                );
                rejection.reset_ready = false;
                return UpdateDecision::Reject(rejection);
            }
            Some(PolicyPhase::Modeling)
                if policy.protection().modeling_duration() == recorded_duration =>
            {
                return UpdateDecision::Skip;
            }
            _ => {}
        }
    }

    if policy.protection().enforcer != profile.spec.profile.enforcer {
        return UpdateDecision::Reject(forbidden_update(
            "The enforcer cannot be changed. Delete and recreate the policy.",
        ));
    }

    UpdateDecision::Proceed
}

/// Profile namespace for a policy: its own namespace, or the controller
/// namespace for cluster-wide policies.
pub fn profile_namespace<'a>(id: &'a ResourceId, controller_namespace: &'a str) -> &'a str {
    id.namespace.as_deref().unwrap_or(controller_namespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{cluster_policy, named_policy, profile_for, selector_policy};
    use warden_policy_controller_k8s_api::{ModelingOptions, PolicyStatus};

    #[test]
    fn accepts_a_plain_named_target() {
        assert_eq!(validate_create(&named_policy("ns", "app"), false), None);
    }

    #[test]
    fn rejects_unsupported_target_kind() {
        let mut policy = named_policy("ns", "app");
        policy.spec.target.kind = "CronJob".to_string();
        let rejection = validate_create(&policy, false).expect("must reject");
        assert_eq!(rejection.phase, Some(PolicyPhase::Error));
        assert_eq!(rejection.condition, PolicyConditionType::Created);
        assert_eq!(rejection.reason, REASON_FORBIDDEN);
    }

    #[test]
    fn rejects_target_without_name_or_selector() {
        let mut policy = named_policy("ns", "app");
        policy.spec.target.name = None;
        assert!(validate_create(&policy, false).is_some());
    }

    #[test]
    fn rejects_target_with_both_name_and_selector() {
        let mut policy = selector_policy("ns", "app");
        policy.spec.target.name = Some("app".to_string());
        assert!(validate_create(&policy, false).is_some());
    }

    #[test]
    fn behavior_modeling_requires_the_feature() {
        let mut policy = named_policy("ns", "app");
        policy.spec.policy.mode = PolicyMode::BehaviorModeling;
        policy.spec.policy.modeling_options = Some(ModelingOptions { duration: 30 });
        assert!(validate_create(&policy, false).is_some());
        assert_eq!(validate_create(&policy, true), None);
    }

    #[test]
    fn behavior_modeling_is_never_cluster_scoped() {
        let mut policy = cluster_policy("app");
        policy.spec.policy.mode = PolicyMode::BehaviorModeling;
        assert!(validate_create(&policy, true).is_some());
    }

    #[test]
    fn rejects_names_beyond_the_length_ceiling() {
        let long = "a".repeat(64);
        let policy = named_policy("ns", &long);
        let rejection = validate_create(&policy, false).expect("must reject");
        let budget = profile::name_budget(Some("ns"));
        assert!(
            rejection.message.contains(&budget.to_string()),
            "message must carry the byte budget: {}",
            rejection.message
        );
    }

    #[test]
    fn cluster_policies_fall_back_to_the_controller_namespace() {
        assert_eq!(profile_namespace(&ResourceId::cluster("x"), "warden"), "warden");
        assert_eq!(
            profile_namespace(&ResourceId::namespaced("ns", "x"), "warden"),
            "ns"
        );
    }

    #[test]
    fn update_rejects_target_change() {
        let policy = named_policy("ns", "app");
        let mut profile = profile_for(&policy);
        profile.spec.target.name = Some("other".to_string());
        match validate_update(&policy, &profile) {
            UpdateDecision::Reject(rejection) => {
                assert_eq!(rejection.condition, PolicyConditionType::Updated);
                assert_eq!(rejection.phase, None);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn update_rejects_switching_into_modeling() {
        let mut policy = named_policy("ns", "app");
        let profile = profile_for(&policy);
        policy.spec.policy.mode = PolicyMode::BehaviorModeling;
        policy.spec.policy.modeling_options = Some(ModelingOptions { duration: 30 });
        assert!(matches!(
            validate_update(&policy, &profile),
            UpdateDecision::Reject(_)
        ));
    }

    #[test]
    fn update_rejects_switching_out_of_modeling() {
        let policy = named_policy("ns", "app");
        let mut profile = profile_for(&policy);
        profile.spec.behavior_modeling.duration = 30;
        assert!(matches!(
            validate_update(&policy, &profile),
            UpdateDecision::Reject(_)
        ));
    }

    #[test]
    fn update_rejects_completed_modeling() {
        let mut policy = named_policy("ns", "app");
        policy.spec.policy.mode = PolicyMode::BehaviorModeling;
        policy.spec.policy.modeling_options = Some(ModelingOptions { duration: 30 });
        policy.status = Some(PolicyStatus {
            phase: Some(PolicyPhase::Completed),
            ..Default::default()
        });
        let mut profile = profile_for(&policy);
        profile.spec.behavior_modeling.duration = 30;
        match validate_update(&policy, &profile) {
            UpdateDecision::Reject(rejection) => assert!(!rejection.reset_ready),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn update_skips_unchanged_modeling_duration() {
        let mut policy = named_policy("ns", "app");
        policy.spec.policy.mode = PolicyMode::BehaviorModeling;
        policy.spec.policy.modeling_options = Some(ModelingOptions { duration: 30 });
        policy.status = Some(PolicyStatus {
            phase: Some(PolicyPhase::Modeling),
            ..Default::default()
        });
        let mut profile = profile_for(&policy);
        profile.spec.behavior_modeling.duration = 30;
        assert_eq!(validate_update(&policy, &profile), UpdateDecision::Skip);

        // A changed duration proceeds.
        policy.spec.policy.modeling_options = Some(ModelingOptions { duration: 60 });
        assert_eq!(validate_update(&policy, &profile), UpdateDecision::Proceed);
    }

    #[test]
    fn update_rejects_enforcer_change() {
        let mut policy = named_policy("ns", "app");
        let profile = profile_for(&policy);
        policy.spec.policy.enforcer = "BPF".to_string();
        assert!(matches!(
            validate_update(&policy, &profile),
            UpdateDecision::Reject(_)
        ));
    }

    #[test]
    fn target_immutability_wins_over_later_rules() {
        // Both the target and the enforcer differ; the target rule fires.
        let mut policy = named_policy("ns", "app");
        let mut profile = profile_for(&policy);
        profile.spec.target.name = Some("other".to_string());
        policy.spec.policy.enforcer = "BPF".to_string();
        match validate_update(&policy, &profile) {
            UpdateDecision::Reject(rejection) => {
                assert!(rejection.message.contains("target"), "{}", rejection.message)
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }
}
