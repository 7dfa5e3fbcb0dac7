use std::collections::HashMap;

use k8s_openapi::{
    api::apps::v1::Deployment,
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
    chrono::Utc,
};

use crate::crds::{MCPServer, MCPServerStatus, ValidationError};

const VALIDATION_FAILED_MESSAGE: &str = "Configuration validation failed";
const NOT_CREATED_MESSAGE: &str = "Resources failed to be created";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionType {
    Accepted,
    ResolvedRefs,
    Programmed,
    Ready,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionReason {
    Accepted,
    InvalidConfig,
    UnsupportedTransport,
    ResolvedRefs,
    Programmed,
    TranslationFailed,
    DeploymentFailed,
    ServiceFailed,
    ConfigMapFailed,
    Ready,
    PodsNotReady,
    DeploymentNotFound,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Derived objects in the order they are applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyStep {
    Deployment,
    Service,
    ConfigMap,
}

impl ApplyStep {
    fn failure_reason(self) -> ConditionReason {
        match self {
            ApplyStep::Deployment => ConditionReason::DeploymentFailed,
            ApplyStep::Service => ConditionReason::ServiceFailed,
            ApplyStep::ConfigMap => ConditionReason::ConfigMapFailed,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    Replicas { ready: i32, desired: i32 },
    DeploymentNotFound,
    Unobserved(String),
}

impl Readiness {
    /// Desired replicas default to one when the deployment leaves them unset.
    pub fn of(deployment: Option<&Deployment>) -> Self {
        let Some(deployment) = deployment else {
            return Readiness::DeploymentNotFound;
        };
        let desired = deployment.spec.as_ref().and_then(|spec| spec.replicas).unwrap_or(1);
        let ready = deployment.status.as_ref().and_then(|status| status.ready_replicas).unwrap_or_default();
        Readiness::Replicas { ready, desired }
    }
}

/// What one reconcile pass got to, from which every condition is recomputed.
#[derive(Clone, Debug)]
pub enum PassReport {
    Invalid(ValidationError),
    TranslationFailed(String),
    ApplyFailed(ApplyStep, String),
    Applied(Readiness),
}

/// Conditions keyed by type, serialized back in the order each type was first seen.
pub struct ConditionSet {
    order: Vec<String>,
    conditions: HashMap<String, Condition>,
    observed_generation: Option<i64>,
}

impl ConditionSet {
    pub fn new(existing: &[Condition], observed_generation: Option<i64>) -> Self {
        let mut set = Self { order: Vec::with_capacity(existing.len()), conditions: HashMap::new(), observed_generation };
        for condition in existing {
            if set.conditions.insert(condition.type_.clone(), condition.clone()).is_none() {
                set.order.push(condition.type_.clone());
            }
        }
        set
    }

    /// Transition time only moves when the status flips.
    pub fn set(&mut self, type_: ConditionType, status: bool, reason: ConditionReason, message: impl Into<String>) {
        let type_ = type_.to_string();
        let status = if status { "True" } else { "False" }.to_owned();
        let last_transition_time = match self.conditions.get(&type_) {
            Some(existing) if existing.status == status => existing.last_transition_time.clone(),
            _ => Time(Utc::now()),
        };
        let condition = Condition {
            last_transition_time,
            message: message.into(),
            observed_generation: self.observed_generation,
            reason: reason.to_string(),
            status,
            type_: type_.clone(),
        };
        if self.conditions.insert(type_.clone(), condition).is_none() {
            self.order.push(type_);
        }
    }

    pub fn into_conditions(mut self) -> Vec<Condition> {
        self.order.iter().filter_map(|type_| self.conditions.remove(type_)).collect()
    }
}

pub fn compute_status(server: &MCPServer, report: &PassReport) -> MCPServerStatus {
    let generation = server.metadata.generation;
    let existing = server.status.as_ref().map(|status| status.conditions.as_slice()).unwrap_or_default();
    let mut conditions = ConditionSet::new(existing, generation);

    match report {
        PassReport::Invalid(error) => {
            let reason = match error {
                ValidationError::UnsupportedTransport => ConditionReason::UnsupportedTransport,
                _ => ConditionReason::InvalidConfig,
            };
            conditions.set(ConditionType::Accepted, false, reason, error.to_string());
            conditions.set(ConditionType::ResolvedRefs, false, ConditionReason::InvalidConfig, VALIDATION_FAILED_MESSAGE);
            conditions.set(ConditionType::Programmed, false, ConditionReason::InvalidConfig, VALIDATION_FAILED_MESSAGE);
            conditions.set(ConditionType::Ready, false, ConditionReason::PodsNotReady, VALIDATION_FAILED_MESSAGE);
        },
        PassReport::TranslationFailed(message) => {
            set_accepted(&mut conditions);
            conditions.set(ConditionType::Programmed, false, ConditionReason::TranslationFailed, message.clone());
            conditions.set(ConditionType::Ready, false, ConditionReason::PodsNotReady, NOT_CREATED_MESSAGE);
        },
        PassReport::ApplyFailed(step, message) => {
            set_accepted(&mut conditions);
            conditions.set(ConditionType::Programmed, false, step.failure_reason(), message.clone());
            conditions.set(ConditionType::Ready, false, ConditionReason::PodsNotReady, NOT_CREATED_MESSAGE);
        },
        PassReport::Applied(readiness) => {
            set_accepted(&mut conditions);
            conditions.set(ConditionType::Programmed, true, ConditionReason::Programmed, "All resources created successfully");
            set_ready(&mut conditions, readiness);
        },
    }

    MCPServerStatus { observed_generation: generation.unwrap_or_default(), conditions: conditions.into_conditions() }
}

// Only the JWKS secret is looked up; other references count as resolved once the server is accepted.
fn set_accepted(conditions: &mut ConditionSet) {
    conditions.set(ConditionType::Accepted, true, ConditionReason::Accepted, "MCPServer configuration is valid");
    conditions.set(ConditionType::ResolvedRefs, true, ConditionReason::ResolvedRefs, "All references resolved successfully");
}

fn set_ready(conditions: &mut ConditionSet, readiness: &Readiness) {
    match readiness {
        Readiness::Replicas { ready, desired } if ready == desired && *ready > 0 => {
            conditions.set(ConditionType::Ready, true, ConditionReason::Ready, "Deployment is ready and all pods are running");
        },
        Readiness::Replicas { ready, desired } => {
            conditions.set(ConditionType::Ready, false, ConditionReason::PodsNotReady, format!("Deployment not ready: {ready}/{desired} replicas ready"));
        },
        Readiness::DeploymentNotFound => {
            conditions.set(ConditionType::Ready, false, ConditionReason::DeploymentNotFound, "Deployment not found");
        },
        Readiness::Unobserved(error) => {
            conditions.set(ConditionType::Ready, false, ConditionReason::PodsNotReady, format!("Error getting deployment: {error}"));
        },
    }
}
