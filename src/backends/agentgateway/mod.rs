mod agentgateway_deployer;
pub mod model;
mod resource_generator;

use k8s_openapi::{
    api::{
        apps::v1::Deployment,
        core::v1::{ConfigMap, Secret, Service},
    },
    apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kube::Resource;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use typed_builder::TypedBuilder;

pub use agentgateway_deployer::{
    BINARY_VOLUME, CONFIG_FILE_NAME, CONFIG_VOLUME, COPY_BINARY_CONTAINER, GATEWAY_CONTAINER, JWKS_MOUNT_PATH, JWKS_VOLUME, MCP_SERVER_CONTAINER,
};
use agentgateway_deployer::{create_config_map, create_deployment, create_service, DeploymentParameters};
use model::Jwks;
use resource_generator::ResourceGenerator;

use crate::{
    common::ResourceKey,
    crds::{MCPServer, MCPServerSpec, ValidationError},
    services::ObjectStore,
};

pub const DEFAULT_AGENTGATEWAY_IMAGE: &str = "ghcr.io/agentgateway/agentgateway:0.7.4-musl";
pub const CONFIG_HASH_LENGTH: usize = 8;

#[derive(Error, Debug)]
pub enum TranslationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("JWT authentication requires jwksRef or jwksInline")]
    MissingJwks,
    #[error("failed to get JWKS secret {name}: {reason}")]
    SecretResolutionFailed { name: String, reason: String },
    #[error("keycloak realm must be specified when using the keycloak provider")]
    MissingRealm,
    #[error("failed to serialize agentgateway config: {0}")]
    Serialization(#[from] serde_yaml::Error),
    #[error("owner reference for {0} can not be set, name and uid are required")]
    OwnerReference(String),
}

/// Objects derived from one MCPServer, each owned by it.
#[derive(Clone, Debug)]
pub struct TranslatedOutputs {
    pub deployment: Deployment,
    pub service: Service,
    pub config_map: ConfigMap,
    pub config_hash: String,
}

/// Truncated SHA-256 of the serialized config, stamped on the pod template to roll pods on config changes.
pub fn config_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..CONFIG_HASH_LENGTH].to_owned()
}

fn set_owner<K: Resource>(object: &mut K, owner: &OwnerReference) {
    object.meta_mut().owner_references = Some(vec![owner.clone()]);
}

#[derive(TypedBuilder)]
pub struct AgentgatewayTranslator<'a, S> {
    store: &'a S,
    gateway_image: &'a str,
}

impl<S: ObjectStore> AgentgatewayTranslator<'_, S> {
    /// Derives the workload, service and config map for `server`.
    ///
    /// The only store access is the JWKS secret lookup; a failure there aborts the whole translation.
    pub async fn translate(&self, server: &MCPServer) -> Result<TranslatedOutputs, TranslationError> {
        let key = ResourceKey::from(server);
        let owner = server.controller_owner_ref(&()).ok_or_else(|| TranslationError::OwnerReference(key.to_string()))?;
        let spec = &server.spec;

        spec.validate(&key.name)?;
        let transport = spec.transport()?;
        let image = spec.deployment.resolve_image(&key.name)?;
        let jwks = self.resolve_jwks(spec, &key.namespace).await?;

        let config = ResourceGenerator::new(&key.name, spec, jwks).generate_config(transport)?;
        let content = config.to_yaml()?;
        let config_hash = config_hash(&content);
        debug!("translate: {key} transport {transport:?} image {image} config hash {config_hash}");

        let parameters = DeploymentParameters::builder()
            .name(&key.name)
            .namespace(&key.namespace)
            .spec(spec)
            .transport(transport)
            .image(image)
            .gateway_image(self.gateway_image)
            .config_hash(&config_hash)
            .build();

        let mut deployment = create_deployment(&parameters);
        let mut service = create_service(&key.name, &key.namespace, spec.deployment.port);
        let mut config_map = create_config_map(&key.name, &key.namespace, content);
        set_owner(&mut deployment, &owner);
        set_owner(&mut service, &owner);
        set_owner(&mut config_map, &owner);

        Ok(TranslatedOutputs { deployment, service, config_map, config_hash })
    }

    async fn resolve_jwks(&self, spec: &MCPServerSpec, namespace: &str) -> Result<Option<Jwks>, TranslationError> {
        let Some(jwt) = spec.jwt() else {
            return Ok(None);
        };

        match (&jwt.jwks_ref, &jwt.jwks_inline) {
            (Some(secret_ref), _) => {
                let key = ResourceKey::of_kind::<Secret>(&secret_ref.name, namespace);
                let failed = |reason: String| TranslationError::SecretResolutionFailed { name: key.to_string(), reason };
                let secret = match self.store.get::<Secret>(&key).await {
                    Ok(Some(secret)) => secret,
                    Ok(None) => return Err(failed("secret not found".to_owned())),
                    Err(e) => return Err(failed(e.to_string())),
                };
                let has_key = secret.data.as_ref().is_some_and(|data| data.contains_key(&secret_ref.key))
                    || secret.string_data.as_ref().is_some_and(|data| data.contains_key(&secret_ref.key));
                if !has_key {
                    return Err(failed(format!("key {} not found", secret_ref.key)));
                }
                Ok(Some(Jwks::file(format!("{JWKS_MOUNT_PATH}/{}", secret_ref.key))))
            },
            (None, Some(inline)) if !inline.is_empty() => Ok(Some(Jwks::inline(inline.clone()))),
            _ => Err(TranslationError::MissingJwks),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::ByteString;
    use kube_core::ObjectMeta;

    use super::*;
    use crate::{
        crds::{
            AuthorizationServer, HttpTransport, JwtAuthentication, MCPServerAuthentication, MCPServerAuthorization, SecretKeyReference,
            TransportType, UVX_IMAGE,
        },
        common::test::echo_server,
        services::store::inmemory::InMemoryStore,
    };

    fn with_jwks_secret(mut server: MCPServer) -> MCPServer {
        server.spec.authn = Some(MCPServerAuthentication {
            jwt: Some(JwtAuthentication {
                issuer: "https://issuer".to_owned(),
                audiences: vec!["kmcp".to_owned()],
                jwks_ref: Some(SecretKeyReference { name: "jwks".to_owned(), key: "jwks.json".to_owned() }),
                jwks_inline: None,
            }),
        });
        server
    }

    fn jwks_secret() -> Secret {
        Secret {
            metadata: ObjectMeta { name: Some("jwks".to_owned()), namespace: Some("tools".to_owned()), ..Default::default() },
            data: Some(BTreeMap::from([("jwks.json".to_owned(), ByteString(b"{\"keys\":[]}".to_vec()))])),
            ..Default::default()
        }
    }

    async fn translate(store: &InMemoryStore, server: &MCPServer) -> Result<TranslatedOutputs, TranslationError> {
        AgentgatewayTranslator::builder().store(store).gateway_image(DEFAULT_AGENTGATEWAY_IMAGE).build().translate(server).await
    }

    #[tokio::test]
    async fn test_echo_stdio_scenario() {
        let store = InMemoryStore::default();
        let outputs = translate(&store, &echo_server()).await.unwrap();

        let pod = outputs.deployment.spec.as_ref().and_then(|s| s.template.spec.as_ref()).unwrap();
        assert_eq!(pod.init_containers.as_ref().map(Vec::len), Some(1));
        assert_eq!(pod.init_containers.as_ref().unwrap()[0].name, COPY_BINARY_CONTAINER);
        assert_eq!(pod.containers.len(), 1);
        assert_eq!(pod.containers[0].name, MCP_SERVER_CONTAINER);
        let volumes: Vec<_> = pod.volumes.as_ref().unwrap().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(volumes, vec![CONFIG_VOLUME, BINARY_VOLUME]);

        let ports = outputs.service.spec.as_ref().and_then(|s| s.ports.clone()).unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!((ports[0].port, ports[0].protocol.as_deref()), (3000, Some("TCP")));

        let content = &outputs.config_map.data.as_ref().unwrap()[CONFIG_FILE_NAME];
        assert!(content.contains("pathPrefix: /sse"), "{content}");
        assert!(!content.contains('!'), "{content}");
        let config: model::LocalConfig = serde_yaml::from_str(content).unwrap();
        assert_eq!(config.binds.len(), 1);
        assert_eq!(config.binds[0].port, 3000);
        let matches = &config.binds[0].listeners[0].routes[0].matches;
        assert_eq!(matches, &vec![model::RouteMatch::prefix("/sse"), model::RouteMatch::prefix("/mcp")]);
        assert_eq!(outputs.config_hash, config_hash(content));
        assert_eq!(outputs.config_hash.len(), CONFIG_HASH_LENGTH);
        assert_eq!(store.mutations(), 0);
    }

    #[tokio::test]
    async fn test_outputs_are_owned_by_server() {
        let store = InMemoryStore::default();
        let outputs = translate(&store, &echo_server()).await.unwrap();
        for owners in [&outputs.deployment.metadata.owner_references, &outputs.service.metadata.owner_references, &outputs.config_map.metadata.owner_references] {
            let owners = owners.as_ref().unwrap();
            assert_eq!(owners.len(), 1);
            assert_eq!(owners[0].kind, "MCPServer");
            assert_eq!(owners[0].name, "echo");
            assert_eq!(owners[0].controller, Some(true));
        }
    }

    #[tokio::test]
    async fn test_missing_uid_is_an_error() {
        let store = InMemoryStore::default();
        let mut server = echo_server();
        server.metadata.uid = None;
        assert!(matches!(translate(&store, &server).await, Err(TranslationError::OwnerReference(_))));
    }

    #[tokio::test]
    async fn test_http_without_target_port_fails() {
        let store = InMemoryStore::default();
        let mut server = echo_server();
        server.spec.transport_type = Some(TransportType::Http);
        server.spec.http_transport = Some(HttpTransport::default());
        let error = translate(&store, &server).await.unwrap_err();
        assert!(matches!(error, TranslationError::Validation(ValidationError::MissingTargetPort)));
        assert!(error.to_string().contains("target port"));
    }

    #[tokio::test]
    async fn test_http_two_containers() {
        let store = InMemoryStore::default();
        let mut server = echo_server();
        server.spec.transport_type = Some(TransportType::Http);
        server.spec.http_transport = Some(HttpTransport { target_port: Some(8080), target_path: None });
        let outputs = translate(&store, &server).await.unwrap();
        let pod = outputs.deployment.spec.as_ref().and_then(|s| s.template.spec.as_ref()).unwrap();
        assert!(pod.init_containers.is_none());
        assert_eq!(pod.containers.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_jwks_secret_fails_resolution() {
        let store = InMemoryStore::default();
        let server = with_jwks_secret(echo_server());
        let error = translate(&store, &server).await.unwrap_err();
        assert!(matches!(error, TranslationError::SecretResolutionFailed { .. }));
        assert!(error.to_string().contains("tools.jwks"));
    }

    #[tokio::test]
    async fn test_jwks_secret_without_key_fails_resolution() {
        let store = InMemoryStore::default();
        let mut secret = jwks_secret();
        secret.data = Some(BTreeMap::new());
        store.seed(&secret);
        let error = translate(&store, &with_jwks_secret(echo_server())).await.unwrap_err();
        assert!(error.to_string().contains("key jwks.json not found"));
    }

    #[tokio::test]
    async fn test_jwks_secret_is_mounted_as_file() {
        let store = InMemoryStore::default();
        store.seed(&jwks_secret());
        let outputs = translate(&store, &with_jwks_secret(echo_server())).await.unwrap();
        let content = &outputs.config_map.data.as_ref().unwrap()[CONFIG_FILE_NAME];
        let config: model::LocalConfig = serde_yaml::from_str(content).unwrap();
        let policies = config.binds[0].listeners[0].routes[0].policies.clone().unwrap();
        assert_eq!(policies.jwt_auth.map(|jwt| jwt.jwks), Some(Jwks::file("/jwks/jwks.json".to_owned())));
        let pod = outputs.deployment.spec.as_ref().and_then(|s| s.template.spec.as_ref()).unwrap();
        assert_eq!(pod.volumes.as_ref().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_hash_stability() {
        let store = InMemoryStore::default();
        let first = translate(&store, &echo_server()).await.unwrap();
        let second = translate(&store, &echo_server()).await.unwrap();
        assert_eq!(first.config_hash, second.config_hash);

        let mut renamed_namespace = echo_server();
        renamed_namespace.metadata.namespace = Some("other".to_owned());
        assert_eq!(translate(&store, &renamed_namespace).await.unwrap().config_hash, first.config_hash);

        let mut with_policy = echo_server();
        with_policy.spec.authz = Some(MCPServerAuthorization { rules: vec!["true".to_owned()], server: None });
        assert_ne!(translate(&store, &with_policy).await.unwrap().config_hash, first.config_hash);

        let mut with_authentication = echo_server();
        with_authentication.spec.authz = Some(MCPServerAuthorization {
            rules: vec![],
            server: Some(AuthorizationServer {
                issuer: "https://auth".to_owned(),
                audience: "mcp".to_owned(),
                jwks_url: "https://auth/certs".to_owned(),
                ..Default::default()
            }),
        });
        assert_ne!(translate(&store, &with_authentication).await.unwrap().config_hash, first.config_hash);
    }

    #[tokio::test]
    async fn test_package_runner_image_substitution() {
        let store = InMemoryStore::default();
        let mut server = echo_server();
        server.spec.deployment.image = None;
        server.spec.deployment.cmd = Some("uvx".to_owned());
        let outputs = translate(&store, &server).await.unwrap();
        let pod = outputs.deployment.spec.as_ref().and_then(|s| s.template.spec.as_ref()).unwrap();
        assert_eq!(pod.containers[0].image.as_deref(), Some(UVX_IMAGE));

        server.spec.deployment.cmd = Some("python".to_owned());
        assert!(matches!(translate(&store, &server).await, Err(TranslationError::Validation(ValidationError::MissingImage(_)))));
    }
}
