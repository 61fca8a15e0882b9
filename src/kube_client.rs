//! Object store abstraction over the Kubernetes API
//!
//! The reconcilers, the drift scanner and the shared-secret guard only talk
//! to the cluster through [`ObjectStore`], which allows mocking the API in
//! tests while using the real client in production.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{OnePasswordItem, OnePasswordItemStatus};
use crate::{Error, FIELD_MANAGER};

/// Read/write access to the objects the operator manages
///
/// `namespace: None` in list calls means cluster-wide.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get a Secret; `Ok(None)` when it does not exist
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error>;

    /// List Secrets in a namespace or cluster-wide
    async fn list_secrets(&self, namespace: Option<String>) -> Result<Vec<Secret>, Error>;

    /// Create a Secret
    async fn create_secret(&self, secret: &Secret) -> Result<(), Error>;

    /// Replace a Secret; the resourceVersion on `secret` guards concurrent writers
    async fn update_secret(&self, secret: &Secret) -> Result<(), Error>;

    /// Delete a Secret; deleting a missing Secret succeeds
    async fn delete_secret(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// List Deployments in a namespace or cluster-wide
    async fn list_deployments(&self, namespace: Option<String>) -> Result<Vec<Deployment>, Error>;

    /// Replace a Deployment
    async fn update_deployment(&self, deployment: &Deployment) -> Result<(), Error>;

    /// Replace the finalizer list of a Deployment
    async fn set_deployment_finalizers(
        &self,
        name: &str,
        namespace: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error>;

    /// List all Namespaces
    async fn list_namespaces(&self) -> Result<Vec<Namespace>, Error>;

    /// Get a OnePasswordItem; `Ok(None)` when it does not exist
    async fn get_item(&self, name: &str, namespace: &str)
        -> Result<Option<OnePasswordItem>, Error>;

    /// Replace the finalizer list of a OnePasswordItem
    async fn set_item_finalizers(
        &self,
        name: &str,
        namespace: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error>;

    /// Patch the status subresource of a OnePasswordItem
    async fn patch_item_status(
        &self,
        name: &str,
        namespace: &str,
        status: &OnePasswordItemStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Create a new KubeStore wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn scoped<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

/// Merge patch replacing `metadata.finalizers`
fn finalizers_patch(finalizers: Vec<String>) -> serde_json::Value {
    serde_json::json!({
        "metadata": {
            "finalizers": finalizers
        }
    })
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_secrets(&self, namespace: Option<String>) -> Result<Vec<Secret>, Error> {
        let api: Api<Secret> = self.scoped(namespace.as_deref());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), Error> {
        let namespace = secret
            .namespace()
            .ok_or_else(|| Error::validation("secret has no namespace"))?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&post_params(), secret).await?;
        debug!(secret = %secret.name_any(), namespace = %namespace, "created secret");
        Ok(())
    }

    async fn update_secret(&self, secret: &Secret) -> Result<(), Error> {
        let namespace = secret
            .namespace()
            .ok_or_else(|| Error::validation("secret has no namespace"))?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        api.replace(&secret.name_any(), &post_params(), secret).await?;
        debug!(secret = %secret.name_any(), namespace = %namespace, "updated secret");
        Ok(())
    }

    async fn delete_secret(&self, name: &str, namespace: &str) -> Result<(), Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(secret = %name, namespace = %namespace, "secret already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_deployments(&self, namespace: Option<String>) -> Result<Vec<Deployment>, Error> {
        let api: Api<Deployment> = self.scoped(namespace.as_deref());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<(), Error> {
        let namespace = deployment
            .namespace()
            .ok_or_else(|| Error::validation("deployment has no namespace"))?;
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);
        api.replace(&deployment.name_any(), &post_params(), deployment).await?;
        Ok(())
    }

    async fn set_deployment_finalizers(
        &self,
        name: &str,
        namespace: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.patch(
            name,
            &PatchParams::default(),
            &Patch::Merge(&finalizers_patch(finalizers)),
        )
        .await?;
        Ok(())
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_item(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<OnePasswordItem>, Error> {
        let api: Api<OnePasswordItem> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(item) => Ok(Some(item)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_item_finalizers(
        &self,
        name: &str,
        namespace: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let api: Api<OnePasswordItem> = Api::namespaced(self.client.clone(), namespace);
        api.patch(
            name,
            &PatchParams::default(),
            &Patch::Merge(&finalizers_patch(finalizers)),
        )
        .await?;
        Ok(())
    }

    async fn patch_item_status(
        &self,
        name: &str,
        namespace: &str,
        status: &OnePasswordItemStatus,
    ) -> Result<(), Error> {
        let api: Api<OnePasswordItem> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
