pub mod mcp_server;
pub mod secret_router;
pub mod status;

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use crate::{backends::agentgateway::TranslationError, common::ResourceKey, crds::ValidationError, services::StoreError};

#[derive(thiserror::Error, Debug)]
pub enum ControllerError {
    InvalidPayload(String),
    Validation(#[from] ValidationError),
    Translation(#[from] TranslationError),
    Store(#[from] StoreError),
}

impl std::fmt::Display for ControllerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl ControllerError {
    /// A concurrent edit got in between the read and the write; the pass is redone from a fresh read.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ControllerError::Store(e) if e.is_conflict())
    }
}

const RECONCILE_CONFLICT_WAIT: Duration = Duration::ZERO;

/// Per-object exponential retry delays, doubling from `base` up to `max` and forgotten after a successful pass.
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<ResourceKey, u32>>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max, failures: Mutex::new(HashMap::new()) }
    }

    fn failures(&self) -> MutexGuard<'_, HashMap<ResourceKey, u32>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn next_delay(&self, key: &ResourceKey) -> Duration {
        let mut failures = self.failures();
        let attempt = failures.entry(key.clone()).or_default();
        let delay = self.base.saturating_mul(2_u32.saturating_pow(*attempt)).min(self.max);
        *attempt = attempt.saturating_add(1);
        delay
    }

    pub fn reset(&self, key: &ResourceKey) {
        self.failures().remove(key);
    }
}
