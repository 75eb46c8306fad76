use warden_policy_controller_k8s_api::{PolicyMode, Profile, Protection};

/// Prefix of every generated profile name.
pub const PROFILE_NAME_PREFIX: &str = "warden";

/// Namespace token used in names derived from cluster-wide policies.
pub const CLUSTER_SCOPE_TOKEN: &str = "cluster";

const SUPPORTED_ENFORCERS: &[&str] = &["AppArmor", "BPF", "Seccomp"];

/// Derives the deterministic profile name for a policy identity.
pub fn profile_name(namespace: Option<&str>, name: &str) -> String {
    format!(
        "{}-{}-{}",
        PROFILE_NAME_PREFIX,
        namespace.unwrap_or(CLUSTER_SCOPE_TOKEN),
        name
    )
}

/// Remaining byte budget for a policy name given the 63-byte object-name
/// ceiling, the name template, and the namespace.
pub fn name_budget(namespace: Option<&str>) -> usize {
    let overhead = PROFILE_NAME_PREFIX.len() + 2 + namespace.unwrap_or(CLUSTER_SCOPE_TOKEN).len();
    63usize.saturating_sub(overhead)
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("unknown enforcer {0:?}")]
    UnknownEnforcer(String),
    #[error("the {0} enforcer cannot run in {1} mode")]
    UnsupportedMode(String, String),
}

/// Compiles a policy's protection intent into enforcer-specific profile
/// content. Deterministic given identical inputs; an error is a permanent
/// validation failure, never retried.
pub trait ProfileGenerator: Send + Sync + 'static {
    fn generate(&self, protection: &Protection, profile_name: &str)
        -> Result<Profile, GenerateError>;
}

/// The built-in generator shipped with the controller.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuiltinGenerator;

impl ProfileGenerator for BuiltinGenerator {
    fn generate(
        &self,
        protection: &Protection,
        profile_name: &str,
    ) -> Result<Profile, GenerateError> {
        if !SUPPORTED_ENFORCERS.contains(&protection.enforcer.as_str()) {
            return Err(GenerateError::UnknownEnforcer(protection.enforcer.clone()));
        }
        if protection.mode == PolicyMode::BehaviorModeling && protection.enforcer == "Seccomp" {
            return Err(GenerateError::UnsupportedMode(
                protection.enforcer.clone(),
                protection.mode.to_string(),
            ));
        }

        let content = match protection.enforcer.as_str() {
            "AppArmor" => apparmor_content(profile_name, protection.mode),
            // The BPF and Seccomp enforcers build their rule sets agent-side
            // from the mode; the profile carries no inline content.
            _ => String::new(),
        };

        Ok(Profile {
            name: profile_name.to_string(),
            enforcer: protection.enforcer.clone(),
            mode: protection.mode.to_string(),
            content,
        })
    }
}

fn apparmor_content(name: &str, mode: PolicyMode) -> String {
    let body = match mode {
        PolicyMode::AlwaysAllow => {
            "  file,\n  capability,\n  network,\n  signal,\n  ptrace,\n  mount,\n  umount,\n"
        }
        PolicyMode::RuntimeDefault | PolicyMode::BehaviorModeling => {
            "  include <abstractions/base>\n  file,\n  network,\n  signal,\n  deny mount,\n  deny umount,\n  deny ptrace (trace),\n"
        }
        PolicyMode::EnhanceProtect => {
            "  include <abstractions/base>\n  file,\n  network,\n  deny mount,\n  deny umount,\n  deny ptrace,\n  deny signal (send) peer=unconfined,\n  deny capability sys_admin,\n  deny capability sys_module,\n  deny capability sys_ptrace,\n"
        }
    };
    let flags = if mode == PolicyMode::BehaviorModeling {
        "attach_disconnected,mediate_deleted,complain"
    } else {
        "attach_disconnected,mediate_deleted"
    };
    format!(
        "abi <abi/3.0>,\n#include <tunables/global>\nprofile {name} flags=({flags}) {{\n{body}}}\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_policy_controller_k8s_api::ModelingOptions;

    fn protection(enforcer: &str, mode: PolicyMode) -> Protection {
        Protection {
            enforcer: enforcer.to_string(),
            mode,
            modeling_options: Some(ModelingOptions { duration: 30 }),
        }
    }

    #[test]
    fn names_are_deterministic() {
        assert_eq!(profile_name(Some("demo"), "app"), "warden-demo-app");
        assert_eq!(profile_name(None, "app"), "warden-cluster-app");
        assert_eq!(
            profile_name(Some("demo"), "app"),
            profile_name(Some("demo"), "app")
        );
    }

    #[test]
    fn budget_accounts_for_template_and_namespace() {
        let ns = "demo";
        let budget = name_budget(Some(ns));
        assert_eq!(profile_name(Some(ns), &"a".repeat(budget)).len(), 63);
        assert_eq!(profile_name(Some(ns), &"a".repeat(budget + 1)).len(), 64);
    }

    #[test]
    fn generation_is_deterministic() {
        let generator = BuiltinGenerator;
        let p = protection("AppArmor", PolicyMode::EnhanceProtect);
        let a = generator.generate(&p, "warden-ns-app").unwrap();
        let b = generator.generate(&p, "warden-ns-app").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.enforcer, "AppArmor");
        assert!(a.content.contains("profile warden-ns-app"));
    }

    #[test]
    fn unknown_enforcer_is_rejected() {
        let generator = BuiltinGenerator;
        let p = protection("SELinux", PolicyMode::AlwaysAllow);
        assert!(generator.generate(&p, "warden-ns-app").is_err());
    }
}
