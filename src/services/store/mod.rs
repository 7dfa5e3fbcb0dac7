#[cfg(test)]
pub mod inmemory;

use std::{fmt::Debug, future::Future, time::Duration};

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Patch, PatchParams, PostParams},
    Api, Client, Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::time;
use tracing::{debug, span, Instrument, Level};
use typed_builder::TypedBuilder;

use crate::{common::ResourceKey, crds::MCPServer};

/// Any namespaced kind the controller reads or writes.
pub trait ManagedObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<K> ManagedObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("conflicting write: {0}")]
    Conflict(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("object has no resource version: {0}")]
    MissingResourceVersion(String),
    #[error(transparent)]
    Kube(kube::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl From<kube::Error> for StoreError {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => StoreError::AlreadyExists(response.message),
            kube::Error::Api(response) if response.code == 409 => StoreError::Conflict(response.message),
            error => StoreError::Kube(error),
        }
    }
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Read and write access to the cluster object store.
///
/// Every pass goes through this trait so nothing is cached between passes and tests can swap in an in-memory store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get<K: ManagedObject>(&self, key: &ResourceKey) -> Result<Option<K>, StoreError>;

    async fn create<K: ManagedObject>(&self, object: &K) -> Result<K, StoreError>;

    /// Full replacement; the object must carry the resource version it was read at.
    async fn replace<K: ManagedObject>(&self, object: &K) -> Result<K, StoreError>;

    /// Writes the status sub-resource, failing with `Conflict` if the server changed since it was read.
    async fn replace_status(&self, server: &MCPServer) -> Result<MCPServer, StoreError>;
}

#[derive(Clone, TypedBuilder)]
pub struct KubeStore {
    client: Client,
    request_timeout: Duration,
    field_manager: String,
}

impl KubeStore {
    fn api<K: ManagedObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params(&self) -> PostParams {
        PostParams { field_manager: Some(self.field_manager.clone()), ..Default::default() }
    }

    async fn call<T, F>(&self, operation: &str, key: &ResourceKey, request: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, kube::Error>> + Send,
    {
        let span = span!(Level::DEBUG, "KubeStore", operation, kind = %key.kind, id = %key);
        match time::timeout(self.request_timeout, request).instrument(span).await {
            Ok(response) => response.map_err(StoreError::from),
            Err(_) => {
                debug!("{operation} {} {key} exceeded {:?}", key.kind, self.request_timeout);
                Err(StoreError::Timeout(format!("{operation} {} {key}", key.kind)))
            },
        }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: ManagedObject>(&self, key: &ResourceKey) -> Result<Option<K>, StoreError> {
        let api = self.api::<K>(&key.namespace);
        self.call("get", key, api.get_opt(&key.name)).await
    }

    async fn create<K: ManagedObject>(&self, object: &K) -> Result<K, StoreError> {
        let key = ResourceKey::from(object);
        let api = self.api::<K>(&key.namespace);
        let params = self.post_params();
        self.call("create", &key, api.create(&params, object)).await
    }

    async fn replace<K: ManagedObject>(&self, object: &K) -> Result<K, StoreError> {
        let key = ResourceKey::from(object);
        let api = self.api::<K>(&key.namespace);
        let params = self.post_params();
        self.call("replace", &key, api.replace(&key.name, &params, object)).await
    }

    async fn replace_status(&self, server: &MCPServer) -> Result<MCPServer, StoreError> {
        let key = ResourceKey::from(server);
        let Some(resource_version) = server.metadata.resource_version.clone() else {
            return Err(StoreError::MissingResourceVersion(key.to_string()));
        };
        let api = self.api::<MCPServer>(&key.namespace);
        // resourceVersion in a merge patch acts as a precondition
        let patch = serde_json::json!({
            "apiVersion": MCPServer::api_version(&()),
            "kind": MCPServer::kind(&()),
            "metadata": { "resourceVersion": resource_version },
            "status": serde_json::to_value(&server.status)?,
        });
        let params = PatchParams { field_manager: Some(self.field_manager.clone()), ..Default::default() };
        self.call("replace_status", &key, api.patch_status(&key.name, &params, &Patch::Merge(&patch))).await
    }
}
