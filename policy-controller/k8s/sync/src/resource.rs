use kube::{Api, Client, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use warden_policy_controller_k8s_api::{
    ClusterWorkloadPolicy, PolicyPhase, PolicyStatus, Protection, Target, WorkloadPolicy,
};

/// Stable identity of a policy object; the unit of work-queue keying.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ResourceId {
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceId {
    pub fn namespaced(namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }

    pub fn cluster(name: impl ToString) -> Self {
        Self {
            namespace: None,
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => self.name.fmt(f),
        }
    }
}

/// Unifies the namespace-scoped and cluster-scoped policy kinds so a single
/// reconciler serves both.
pub trait PolicyResource:
    kube::Resource<DynamicType = ()>
    + Clone
    + fmt::Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + Sized
    + 'static
{
    const CLUSTER_SCOPED: bool;

    /// An API handle scoped the way this kind requires. A `None` namespace
    /// addresses all namespaces for the namespaced kind.
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;

    fn target(&self) -> &Target;

    fn protection(&self) -> &Protection;

    fn status(&self) -> Option<&PolicyStatus>;

    fn status_mut(&mut self) -> &mut PolicyStatus;

    fn id(&self) -> ResourceId {
        ResourceId {
            namespace: self.namespace(),
            name: self.name_unchecked(),
        }
    }

    fn phase(&self) -> Option<PolicyPhase> {
        self.status().and_then(|s| s.phase)
    }

    fn spec_changed(&self, other: &Self) -> bool {
        self.target() != other.target() || self.protection() != other.protection()
    }
}

impl PolicyResource for WorkloadPolicy {
    const CLUSTER_SCOPED: bool = false;

    fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
        match namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        }
    }

    fn target(&self) -> &Target {
        &self.spec.target
    }

    fn protection(&self) -> &Protection {
        &self.spec.policy
    }

    fn status(&self) -> Option<&PolicyStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut PolicyStatus {
        self.status.get_or_insert_with(Default::default)
    }
}

impl PolicyResource for ClusterWorkloadPolicy {
    const CLUSTER_SCOPED: bool = true;

    fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
        Api::all(client)
    }

    fn target(&self) -> &Target {
        &self.spec.target
    }

    fn protection(&self) -> &Protection {
        &self.spec.policy
    }

    fn status(&self) -> Option<&PolicyStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut PolicyStatus {
        self.status.get_or_insert_with(Default::default)
    }
}
