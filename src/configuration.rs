use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::{backends::agentgateway::DEFAULT_AGENTGATEWAY_IMAGE, Result};

const DEFAULT_CONCURRENCY: u16 = 4;
const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_BACKOFF_BASE_SECONDS: u64 = 1;
const DEFAULT_BACKOFF_MAX_SECONDS: u64 = 300;

#[derive(Clone, Debug, TypedBuilder, Deserialize)]
pub struct AgentgatewayConfiguration {
    pub image: String,
}

impl Default for AgentgatewayConfiguration {
    fn default() -> Self {
        Self { image: DEFAULT_AGENTGATEWAY_IMAGE.to_owned() }
    }
}

#[derive(Clone, Debug, TypedBuilder, Deserialize)]
#[serde(default)]
pub struct ReconcileConfiguration {
    #[builder(default = DEFAULT_CONCURRENCY)]
    pub concurrency: u16,
    #[builder(default = DEFAULT_REQUEST_TIMEOUT_SECONDS)]
    pub request_timeout_seconds: u64,
    #[builder(default = DEFAULT_BACKOFF_BASE_SECONDS)]
    pub backoff_base_seconds: u64,
    #[builder(default = DEFAULT_BACKOFF_MAX_SECONDS)]
    pub backoff_max_seconds: u64,
}

impl Default for ReconcileConfiguration {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ReconcileConfiguration {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_seconds)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_seconds)
    }
}

#[derive(Debug, TypedBuilder, Deserialize)]
pub struct Configuration {
    pub controller_name: String,
    #[builder(default)]
    pub enable_open_telemetry: Option<bool>,
    #[builder(default)]
    pub watch_namespace: Option<String>,
    #[builder(default)]
    #[serde(default)]
    pub agentgateway: AgentgatewayConfiguration,
    #[builder(default)]
    #[serde(default)]
    pub reconcile: ReconcileConfiguration,
}

#[derive(Error, Debug)]
enum ConfigurationError {
    #[error("controller name must be not empty")]
    ControllerName,
    #[error("agentgateway image must be not empty")]
    AgentgatewayImage,
    #[error("reconcile concurrency must be greater than zero")]
    Concurrency,
    #[error("request timeout must be greater than zero")]
    RequestTimeout,
    #[error("backoff base {0}s must be greater than zero and not exceed backoff max {1}s")]
    Backoff(u64, u64),
}

impl Configuration {
    pub fn validate(&self) -> Result<()> {
        if self.controller_name.is_empty() {
            return Err(ConfigurationError::ControllerName.into());
        }
        if self.agentgateway.image.is_empty() {
            return Err(ConfigurationError::AgentgatewayImage.into());
        }
        let reconcile = &self.reconcile;
        if reconcile.concurrency == 0 {
            return Err(ConfigurationError::Concurrency.into());
        }
        if reconcile.request_timeout_seconds == 0 {
            return Err(ConfigurationError::RequestTimeout.into());
        }
        if reconcile.backoff_base_seconds == 0 || reconcile.backoff_base_seconds > reconcile.backoff_max_seconds {
            return Err(ConfigurationError::Backoff(reconcile.backoff_base_seconds, reconcile.backoff_max_seconds).into());
        }
        Ok(())
    }
}
