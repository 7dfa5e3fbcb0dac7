use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use kube::Resource;
use kube_core::ErrorResponse;

use super::{ManagedObject, ObjectStore, StoreError};
use crate::{common::ResourceKey, crds::MCPServer};

#[derive(Default)]
struct Objects {
    objects: BTreeMap<ResourceKey, serde_json::Value>,
    version: u64,
    mutations: usize,
    failing_reads: BTreeSet<String>,
    failing_writes: BTreeSet<String>,
    create_races: BTreeSet<String>,
    status_conflicts: usize,
}

/// Object store keeping every object as JSON, enforcing resource versions like the API server does.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Objects>>,
}

fn unavailable(kind: &str) -> StoreError {
    StoreError::from(kube::Error::Api(ErrorResponse {
        status: "Failure".to_owned(),
        message: format!("{kind} storage unavailable"),
        reason: "ServiceUnavailable".to_owned(),
        code: 503,
    }))
}

fn not_found(key: &ResourceKey) -> StoreError {
    StoreError::from(kube::Error::Api(ErrorResponse {
        status: "Failure".to_owned(),
        message: format!("{} {key} not found", key.kind),
        reason: "NotFound".to_owned(),
        code: 404,
    }))
}

impl InMemoryStore {
    fn lock(&self) -> MutexGuard<'_, Objects> {
        self.inner.lock().expect("We expect the lock to work")
    }

    /// Stores an object as if an external actor wrote it; not counted as a mutation.
    pub fn seed<K: ManagedObject>(&self, object: &K) {
        let mut objects = self.lock();
        objects.version += 1;
        let mut object = object.clone();
        object.meta_mut().resource_version = Some(objects.version.to_string());
        let value = serde_json::to_value(&object).expect("serializable");
        objects.objects.insert(ResourceKey::from(&object), value);
    }

    pub fn object<K: ManagedObject>(&self, name: &str, namespace: &str) -> Option<K> {
        self.lock().objects.get(&ResourceKey::of_kind::<K>(name, namespace)).map(|value| serde_json::from_value(value.clone()).expect("stored object"))
    }

    pub fn mutations(&self) -> usize {
        self.lock().mutations
    }

    pub fn fail_reads_of<K: ManagedObject>(&self) {
        self.lock().failing_reads.insert(K::kind(&()).into_owned());
    }

    pub fn fail_writes_of<K: ManagedObject>(&self) {
        self.lock().failing_writes.insert(K::kind(&()).into_owned());
    }

    pub fn heal(&self) {
        let mut objects = self.lock();
        objects.failing_reads.clear();
        objects.failing_writes.clear();
    }

    /// The next create of `K` loses a race against another writer.
    pub fn race_next_create_of<K: ManagedObject>(&self) {
        self.lock().create_races.insert(K::kind(&()).into_owned());
    }

    /// The next `n` status writes see a concurrent edit.
    pub fn conflict_next_status_writes(&self, n: usize) {
        self.lock().status_conflicts = n;
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get<K: ManagedObject>(&self, key: &ResourceKey) -> Result<Option<K>, StoreError> {
        let key = ResourceKey::of_kind::<K>(&key.name, &key.namespace);
        let objects = self.lock();
        if objects.failing_reads.contains(&key.kind) {
            return Err(unavailable(&key.kind));
        }
        objects.objects.get(&key).map(|value| serde_json::from_value(value.clone())).transpose().map_err(StoreError::from)
    }

    async fn create<K: ManagedObject>(&self, object: &K) -> Result<K, StoreError> {
        let key = ResourceKey::from(object);
        let mut objects = self.lock();
        if objects.failing_writes.contains(&key.kind) {
            return Err(unavailable(&key.kind));
        }
        if objects.create_races.remove(&key.kind) {
            objects.version += 1;
            let mut winner = object.clone();
            winner.meta_mut().annotations = None;
            winner.meta_mut().resource_version = Some(objects.version.to_string());
            objects.objects.insert(key.clone(), serde_json::to_value(&winner)?);
        }
        if objects.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        objects.version += 1;
        objects.mutations += 1;
        let mut created = object.clone();
        created.meta_mut().resource_version = Some(objects.version.to_string());
        objects.objects.insert(key, serde_json::to_value(&created)?);
        Ok(created)
    }

    async fn replace<K: ManagedObject>(&self, object: &K) -> Result<K, StoreError> {
        let key = ResourceKey::from(object);
        let mut objects = self.lock();
        if objects.failing_writes.contains(&key.kind) {
            return Err(unavailable(&key.kind));
        }
        let Some(existing) = objects.objects.get(&key) else {
            return Err(not_found(&key));
        };
        let existing_version = existing["metadata"]["resourceVersion"].as_str().map(ToOwned::to_owned);
        if existing_version != object.meta().resource_version {
            return Err(StoreError::Conflict(key.to_string()));
        }
        objects.version += 1;
        objects.mutations += 1;
        let mut replaced = object.clone();
        replaced.meta_mut().resource_version = Some(objects.version.to_string());
        objects.objects.insert(key, serde_json::to_value(&replaced)?);
        Ok(replaced)
    }

    async fn replace_status(&self, server: &MCPServer) -> Result<MCPServer, StoreError> {
        let key = ResourceKey::from(server);
        let mut objects = self.lock();
        if objects.status_conflicts > 0 {
            objects.status_conflicts -= 1;
            return Err(StoreError::Conflict(key.to_string()));
        }
        let Some(existing) = objects.objects.get(&key) else {
            return Err(not_found(&key));
        };
        let mut stored: MCPServer = serde_json::from_value(existing.clone())?;
        if stored.metadata.resource_version != server.metadata.resource_version {
            return Err(StoreError::Conflict(key.to_string()));
        }
        objects.version += 1;
        objects.mutations += 1;
        stored.status.clone_from(&server.status);
        stored.metadata.resource_version = Some(objects.version.to_string());
        objects.objects.insert(key, serde_json::to_value(&stored)?);
        Ok(stored)
    }
}
