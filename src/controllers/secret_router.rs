use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use kube::{runtime::reflector::ObjectRef, ResourceExt};

use crate::crds::MCPServer;

/// Servers whose JWKS secret reference names `secret`.
///
/// Scans every cached server; references are matched on exact name and namespace.
pub fn servers_for_secret<I>(servers: I, secret: &Secret) -> Vec<ObjectRef<MCPServer>>
where
    I: IntoIterator<Item = Arc<MCPServer>>,
{
    let Some(secret_namespace) = secret.namespace() else {
        return vec![];
    };
    let secret_name = secret.name_any();

    servers
        .into_iter()
        .filter(|server| server.namespace().as_deref() == Some(secret_namespace.as_str()))
        .filter(|server| server.spec.jwks_secret().is_some_and(|reference| reference.name == secret_name))
        .map(|server| ObjectRef::from_obj(server.as_ref()))
        .collect()
}
