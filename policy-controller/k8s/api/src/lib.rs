#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod policy;
pub mod profile;

pub use self::{
    policy::{
        ClusterWorkloadPolicy, ClusterWorkloadPolicySpec, ModelingOptions, PolicyCondition,
        PolicyConditionType, PolicyMode, PolicyPhase, PolicyStatus, Protection, Target,
        WorkloadPolicy, WorkloadPolicySpec,
    },
    profile::{
        BehaviorModel, BehaviorModelStatus, BehaviorModeling, EnforcementProfile,
        EnforcementProfileSpec, EnforcementProfileStatus, Profile,
    },
};
pub use k8s_openapi::{
    api::{
        apps::v1::{DaemonSet, Deployment, StatefulSet},
        core::v1::Pod,
    },
    apimachinery::pkg::apis::meta::v1::{LabelSelector, Time},
};
pub use kube::api::{Api, ObjectMeta, Patch, PatchParams, ResourceExt};
pub use kube::Client;
