use chrono::Utc;
use warden_policy_controller_k8s_api::{
    PolicyCondition, PolicyConditionType, PolicyPhase, PolicyStatus, Time,
};

pub(crate) fn condition_status(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// Applies a condition and the associated bookkeeping to a policy status.
///
/// Only the `Updated` condition type is replaced in place when present;
/// `Created` and other types append a new entry. This asymmetry is
/// deliberate: `Updated` is the only condition expected to recur over a
/// policy's lifetime, while the create-time history is kept append-only.
///
/// `phase: None` leaves the recorded phase untouched.
#[allow(clippy::too_many_arguments)]
pub fn set_condition(
    status: &mut PolicyStatus,
    profile_name: Option<&str>,
    reset_ready: bool,
    phase: Option<PolicyPhase>,
    condition_type: PolicyConditionType,
    value: bool,
    reason: &str,
    message: &str,
) {
    let now = Time(Utc::now());

    let mut replaced = false;
    if condition_type == PolicyConditionType::Updated {
        if let Some(condition) = status
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == PolicyConditionType::Updated)
        {
            condition.status = condition_status(value).to_string();
            condition.last_transition_time = Some(now.clone());
            condition.reason = reason.to_string();
            condition.message = message.to_string();
            replaced = true;
        }
    }

    if !replaced {
        status.conditions.push(PolicyCondition {
            condition_type,
            status: condition_status(value).to_string(),
            last_transition_time: Some(now),
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }

    if let Some(name) = profile_name {
        if !name.is_empty() {
            status.profile_name = name.to_string();
        }
    }
    if reset_ready {
        status.ready = false;
    }
    if let Some(phase) = phase {
        status.phase = Some(phase);
    }
}
