use crate::resource::{PolicyResource, ResourceId};
use async_trait::async_trait;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};
use warden_policy_controller_k8s_api::{BehaviorModel, EnforcementProfile};

/// Resource-store failures, classified for retry policy. `NotFound` and
/// `Conflict` are distinguishable so callers can treat absence as a state and
/// conflicts as retryable.
#[derive(Clone, Debug, thiserror::Error)]
pub enum StoreError {
    #[error("resource not found")]
    NotFound,
    #[error("write conflicted with a newer revision")]
    Conflict,
    #[error("api error: {0}")]
    Api(String),
}

impl From<kube::Error> for StoreError {
    fn from(error: kube::Error) -> Self {
        if let kube::Error::Api(response) = &error {
            match response.code {
                404 => return StoreError::NotFound,
                409 => return StoreError::Conflict,
                _ => {}
            }
        }
        StoreError::Api(error.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        StoreError::Api(error.to_string())
    }
}

/// The declarative resource store: the single source of truth for policies,
/// profiles, and behavior models. All writes use resource-version semantics;
/// a stale write surfaces as `Conflict` and must be retried with fresh state.
#[async_trait]
pub trait ResourceStore<P: PolicyResource>: Send + Sync + 'static {
    async fn get_policy(&self, id: &ResourceId) -> Result<P, StoreError>;
    async fn update_policy_status(&self, policy: &P) -> Result<(), StoreError>;

    async fn get_profile(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<EnforcementProfile, StoreError>;
    async fn create_profile(
        &self,
        namespace: &str,
        profile: &EnforcementProfile,
    ) -> Result<(), StoreError>;
    async fn update_profile(
        &self,
        namespace: &str,
        profile: &EnforcementProfile,
    ) -> Result<(), StoreError>;
    async fn update_profile_status(
        &self,
        namespace: &str,
        profile: &EnforcementProfile,
    ) -> Result<(), StoreError>;
    async fn delete_profile(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    async fn get_model(&self, namespace: &str, name: &str) -> Result<BehaviorModel, StoreError>;
    async fn update_model_status(
        &self,
        namespace: &str,
        model: &BehaviorModel,
    ) -> Result<(), StoreError>;
}

/// Production store backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn profiles(&self, namespace: &str) -> Api<EnforcementProfile> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn models(&self, namespace: &str) -> Api<BehaviorModel> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl<P: PolicyResource> ResourceStore<P> for KubeStore {
    async fn get_policy(&self, id: &ResourceId) -> Result<P, StoreError> {
        let api = P::api(self.client.clone(), id.namespace.as_deref());
        Ok(api.get(&id.name).await?)
    }

    async fn update_policy_status(&self, policy: &P) -> Result<(), StoreError> {
        let id = policy.id();
        let api = P::api(self.client.clone(), id.namespace.as_deref());
        api.replace_status(
            &id.name,
            &PostParams::default(),
            serde_json::to_vec(policy)?,
        )
        .await?;
        Ok(())
    }

    async fn get_profile(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<EnforcementProfile, StoreError> {
        Ok(self.profiles(namespace).get(name).await?)
    }

    async fn create_profile(
        &self,
        namespace: &str,
        profile: &EnforcementProfile,
    ) -> Result<(), StoreError> {
        self.profiles(namespace)
            .create(&PostParams::default(), profile)
            .await?;
        Ok(())
    }

    async fn update_profile(
        &self,
        namespace: &str,
        profile: &EnforcementProfile,
    ) -> Result<(), StoreError> {
        let name = profile.metadata.name.as_deref().unwrap_or_default();
        self.profiles(namespace)
            .replace(name, &PostParams::default(), profile)
            .await?;
        Ok(())
    }

    async fn update_profile_status(
        &self,
        namespace: &str,
        profile: &EnforcementProfile,
    ) -> Result<(), StoreError> {
        let name = profile.metadata.name.as_deref().unwrap_or_default();
        self.profiles(namespace)
            .replace_status(name, &PostParams::default(), serde_json::to_vec(profile)?)
            .await?;
        Ok(())
    }

    async fn delete_profile(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.profiles(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn get_model(&self, namespace: &str, name: &str) -> Result<BehaviorModel, StoreError> {
        Ok(self.models(namespace).get(name).await?)
    }

    async fn update_model_status(
        &self,
        namespace: &str,
        model: &BehaviorModel,
    ) -> Result<(), StoreError> {
        let name = model.metadata.name.as_deref().unwrap_or_default();
        self.models(namespace)
            .replace_status(name, &PostParams::default(), serde_json::to_vec(model)?)
            .await?;
        Ok(())
    }
}
