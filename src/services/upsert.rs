use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, span, warn, Instrument, Level};

use super::store::{ManagedObject, ObjectStore, StoreError};
use crate::common::{ResourceKey, APPLIED_HASH_ANNOTATION};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Digest of the desired object, stamped on it so an identical later pass can skip the write.
pub fn applied_hash<K: ManagedObject>(object: &K) -> Result<String, StoreError> {
    let mut object = object.clone();
    let meta = object.meta_mut();
    if let Some(annotations) = meta.annotations.as_mut() {
        annotations.remove(APPLIED_HASH_ANNOTATION);
        if annotations.is_empty() {
            meta.annotations = None;
        }
    }
    meta.resource_version = None;
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(&object)?);
    Ok(format!("{:x}", hasher.finalize()))
}

fn stored_hash<K: ManagedObject>(object: &K) -> Option<&String> {
    object.meta().annotations.as_ref().and_then(|annotations| annotations.get(APPLIED_HASH_ANNOTATION))
}

/// Every field set in `desired` holds the same value in `live`.
///
/// Fields only present on `live` are ignored; the API server fills those in (status, uid, defaults).
fn is_subset(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Object(desired), Value::Object(live)) => desired.iter().all(|(field, value)| live.get(field).is_some_and(|live| is_subset(value, live))),
        (Value::Array(desired), Value::Array(live)) => desired.len() == live.len() && desired.iter().zip(live).all(|(value, live)| is_subset(value, live)),
        _ => desired == live,
    }
}

/// The live object was written from the same desired state and nobody edited what we set since.
fn is_current<K: ManagedObject>(desired: &K, live: &K, hash: &str) -> Result<bool, StoreError> {
    if !stored_hash(live).is_some_and(|stored| stored == hash) {
        return Ok(false);
    }
    Ok(is_subset(&serde_json::to_value(desired)?, &serde_json::to_value(live)?))
}

/// Ensures the object exists and matches `desired`.
///
/// A live object is left alone only when it carries the hash of `desired` and still holds every field `desired` sets.
/// Absent objects are created. Present objects are replaced wholesale with the live resource version, so fields dropped
/// from `desired` are cleared on the server. A create that loses a race re-runs the read and replace once.
pub async fn upsert<S, K>(store: &S, desired: K) -> Result<UpsertOutcome, StoreError>
where
    S: ObjectStore,
    K: ManagedObject,
{
    let key = ResourceKey::from(&desired);
    let span = span!(Level::INFO, "Upsert", kind = %key.kind, id = %key);

    let hash = applied_hash(&desired)?;
    let mut desired = desired;
    desired.meta_mut().annotations.get_or_insert_with(Default::default).insert(APPLIED_HASH_ANNOTATION.to_owned(), hash.clone());

    let result = match try_upsert(store, &key, &desired, &hash).instrument(span.clone()).await {
        Err(StoreError::AlreadyExists(_)) => {
            span.in_scope(|| debug!("lost create race, retrying as update"));
            try_upsert(store, &key, &desired, &hash).instrument(span.clone()).await
        },
        result => result,
    };

    match &result {
        Ok(UpsertOutcome::Unchanged) => span.in_scope(|| debug!("upsert unchanged")),
        Ok(outcome) => span.in_scope(|| info!("upsert {outcome:?}")),
        Err(e) => span.in_scope(|| warn!("upsert failed {e}")),
    }
    result
}

async fn try_upsert<S, K>(store: &S, key: &ResourceKey, desired: &K, hash: &str) -> Result<UpsertOutcome, StoreError>
where
    S: ObjectStore,
    K: ManagedObject,
{
    let Some(existing) = store.get::<K>(key).await? else {
        store.create(desired).await?;
        return Ok(UpsertOutcome::Created);
    };
    if is_current(desired, &existing, hash)? {
        return Ok(UpsertOutcome::Unchanged);
    }
    let mut desired = desired.clone();
    desired.meta_mut().resource_version.clone_from(&existing.meta().resource_version);
    store.replace(&desired).await?;
    Ok(UpsertOutcome::Updated)
}
