use std::sync::Arc;

use futures::{future::BoxFuture, FutureExt, StreamExt};
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{ConfigMap, Secret, Service},
};
use kube::{
    runtime::{
        controller::{self, Action},
        watcher::Config,
        Controller,
    },
    Api, Client, Resource,
};
use tracing::{debug, info, span, warn, Instrument, Level};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use super::{
    secret_router::servers_for_secret,
    status::{compute_status, ApplyStep, PassReport, Readiness},
    Backoff, ControllerError, RECONCILE_CONFLICT_WAIT,
};
use crate::{
    backends::agentgateway::{AgentgatewayTranslator, TranslatedOutputs},
    common::ResourceKey,
    crds::MCPServer,
    services::{upsert, KubeStore, ManagedObject, ObjectStore, StoreError},
};

type Result<T, E = ControllerError> = std::result::Result<T, E>;

#[derive(Clone, TypedBuilder)]
pub struct McpServerControllerContext<S> {
    controller_name: String,
    store: S,
    gateway_image: String,
    backoff: Arc<Backoff>,
}

#[derive(TypedBuilder)]
pub struct McpServerController {
    client: Client,
    #[builder(default)]
    watch_namespace: Option<String>,
    concurrency: u16,
    ctx: Arc<McpServerControllerContext<KubeStore>>,
}

impl McpServerController {
    pub fn get_controller(&'_ self) -> BoxFuture<'_, ()> {
        let controller = Controller::new(self.api::<MCPServer>(), Config::default());
        let servers = controller.store();
        let controller_name = self.ctx.controller_name.clone();

        controller
            .owns(self.api::<Deployment>(), Config::default())
            .owns(self.api::<Service>(), Config::default())
            .owns(self.api::<ConfigMap>(), Config::default())
            .watches(self.api::<Secret>(), Config::default(), move |secret| servers_for_secret(servers.state(), &secret))
            .with_config(controller::Config::default().concurrency(self.concurrency))
            .shutdown_on_signal()
            .run(reconcile_server::<KubeStore>, error_policy::<KubeStore>, Arc::clone(&self.ctx))
            .for_each(move |result| {
                match result {
                    Ok((object, action)) => debug!("mcp_server_controller: {controller_name} reconciled {object} {action:?}"),
                    Err(e) => warn!("mcp_server_controller: {controller_name} {e}"),
                }
                futures::future::ready(())
            })
            .boxed()
    }

    fn api<K: ManagedObject>(&self) -> Api<K> {
        match &self.watch_namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }
}

/// Conflicts are redone from a fresh read straight away; everything else backs off per object.
#[allow(clippy::needless_pass_by_value)]
pub fn error_policy<S>(object: Arc<MCPServer>, err: &ControllerError, ctx: Arc<McpServerControllerContext<S>>) -> Action {
    let key = ResourceKey::from(&*object);
    if err.is_conflict() {
        debug!("error_policy: {} {key} conflicting write, requeue now", ctx.controller_name);
        return Action::requeue(RECONCILE_CONFLICT_WAIT);
    }
    let delay = ctx.backoff.next_delay(&key);
    warn!("error_policy: {} {key} {err} requeue in {delay:?}", ctx.controller_name);
    Action::requeue(delay)
}

pub async fn reconcile_server<S: ObjectStore>(resource: Arc<MCPServer>, ctx: Arc<McpServerControllerContext<S>>) -> Result<Action> {
    let Some(name) = resource.meta().name.clone() else {
        return Err(ControllerError::InvalidPayload("Resource name is not provided".to_owned()));
    };
    let Some(maybe_id) = resource.metadata.uid.clone() else {
        return Err(ControllerError::InvalidPayload("Uid must be present".to_owned()));
    };
    let Ok(_) = Uuid::parse_str(&maybe_id) else {
        return Err(ControllerError::InvalidPayload("Uid in wrong format".to_owned()));
    };

    let key = ResourceKey::from(&*resource);
    let span = span!(Level::INFO, "ReconcileMCPServer", id = %key);
    let result = McpServerReconciler { ctx: ctx.as_ref(), key: &key, name: &name }.reconcile().instrument(span).await;
    if result.is_ok() {
        ctx.backoff.reset(&key);
    }
    result
}

struct McpServerReconciler<'a, S> {
    ctx: &'a McpServerControllerContext<S>,
    key: &'a ResourceKey,
    name: &'a str,
}

impl<S: ObjectStore> McpServerReconciler<'_, S> {
    /// One pass: fetch, translate, apply deployment then service then config map, persist status.
    ///
    /// The status is written even when the pass failed; the failure is returned afterwards so the controller retries.
    async fn reconcile(&self) -> Result<Action> {
        let controller_name = &self.ctx.controller_name;
        let name = self.name;

        let Some(server) = self.ctx.store.get::<MCPServer>(self.key).await? else {
            info!("reconcile_server: {controller_name} {name} not found, nothing to do");
            return Ok(Action::await_change());
        };
        info!("reconcile_server: {controller_name} {name} generation {:?} version {:?}", server.metadata.generation, server.metadata.resource_version);

        let (report, pass_error) = self.evaluate(&server).await;
        self.persist_status(&server, &report).await?;

        match pass_error {
            Some(e) => Err(e),
            None => Ok(Action::await_change()),
        }
    }

    async fn evaluate(&self, server: &MCPServer) -> (PassReport, Option<ControllerError>) {
        let controller_name = &self.ctx.controller_name;
        let name = self.name;

        if let Err(e) = server.spec.validate(name) {
            info!("reconcile_server: {controller_name} {name} invalid spec {e}");
            return (PassReport::Invalid(e.clone()), Some(ControllerError::Validation(e)));
        }

        let translator = AgentgatewayTranslator::builder().store(&self.ctx.store).gateway_image(&self.ctx.gateway_image).build();
        let outputs = match translator.translate(server).await {
            Ok(outputs) => outputs,
            Err(e) => {
                warn!("reconcile_server: {controller_name} {name} translation failed {e}");
                return (PassReport::TranslationFailed(e.to_string()), Some(ControllerError::Translation(e)));
            },
        };
        debug!("reconcile_server: {controller_name} {name} config hash {}", outputs.config_hash);

        if let Err((step, e)) = self.apply(outputs).await {
            warn!("reconcile_server: {controller_name} {name} applying {step:?} failed {e}");
            return (PassReport::ApplyFailed(step, e.to_string()), Some(ControllerError::Store(e)));
        }

        (PassReport::Applied(self.observe_readiness().await), None)
    }

    async fn apply(&self, outputs: TranslatedOutputs) -> Result<(), (ApplyStep, StoreError)> {
        let store = &self.ctx.store;
        upsert(store, outputs.deployment).await.map_err(|e| (ApplyStep::Deployment, e))?;
        upsert(store, outputs.service).await.map_err(|e| (ApplyStep::Service, e))?;
        upsert(store, outputs.config_map).await.map_err(|e| (ApplyStep::ConfigMap, e))?;
        Ok(())
    }

    async fn observe_readiness(&self) -> Readiness {
        let key = ResourceKey::of_kind::<Deployment>(&self.key.name, &self.key.namespace);
        match self.ctx.store.get::<Deployment>(&key).await {
            Ok(deployment) => Readiness::of(deployment.as_ref()),
            Err(e) => {
                warn!("reconcile_server: {} {} unable to read deployment {e}", self.ctx.controller_name, self.name);
                Readiness::Unobserved(e.to_string())
            },
        }
    }

    async fn persist_status(&self, server: &MCPServer, report: &PassReport) -> Result<()> {
        let status = compute_status(server, report);
        if server.status.as_ref() == Some(&status) {
            debug!("reconcile_server: {} {} status unchanged", self.ctx.controller_name, self.name);
            return Ok(());
        }
        let mut updated = server.clone();
        updated.status = Some(status);
        self.ctx.store.replace_status(&updated).await?;
        info!("reconcile_server: {} {} status updated", self.ctx.controller_name, self.name);
        Ok(())
    }
}
