use std::sync::Arc;

use configuration::Configuration;
use controllers::{
    mcp_server::{McpServerController, McpServerControllerContext},
    Backoff,
};
use kube::Client;
use services::KubeStore;
use tracing::info;

pub mod backends;
mod common;
pub mod configuration;
mod controllers;
pub mod crds;
mod services;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;

pub async fn start(configuration: Configuration) -> Result<()> {
    info!("kmcp started {}", configuration.controller_name);
    let client = Client::try_default().await?;
    let reconcile = &configuration.reconcile;

    let store = KubeStore::builder()
        .client(client.clone())
        .request_timeout(reconcile.request_timeout())
        .field_manager(common::MANAGED_BY_VALUE.to_owned())
        .build();

    let ctx = McpServerControllerContext::builder()
        .controller_name(configuration.controller_name.clone())
        .store(store)
        .gateway_image(configuration.agentgateway.image.clone())
        .backoff(Arc::new(Backoff::new(reconcile.backoff_base(), reconcile.backoff_max())))
        .build();

    let mcp_server_controller = McpServerController::builder()
        .client(client)
        .watch_namespace(configuration.watch_namespace.clone())
        .concurrency(reconcile.concurrency)
        .ctx(Arc::new(ctx))
        .build();

    info!(
        "Watching {} with {} workers",
        configuration.watch_namespace.as_deref().unwrap_or("all namespaces"),
        reconcile.concurrency
    );
    mcp_server_controller.get_controller().await;
    info!("kmcp stopped");
    Ok(())
}
