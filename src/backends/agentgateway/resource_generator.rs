use super::{
    model::{
        AuthenticationProvider, Bind, Cors, GatewaySettings, Jwks, JwtAuth, Listener, ListenerProtocol, LocalConfig,
        McpAuthentication, McpAuthorization, McpBackend, McpTarget, McpTargetSpec, Policies, ResourceMetadataConfig, Route, RouteBackend,
        RouteMatch, SseTarget, StdioTarget, DEFAULT_LISTENER_NAME, DEFAULT_ROUTE_NAME, FULL_WEIGHT,
    },
    TranslationError,
};
use crate::crds::{AuthorizationProvider, AuthorizationServer, MCPServerSpec, TransportType, ValidationError, DEFAULT_HTTP_TARGET_PATH};

const LOOPBACK_HOST: &str = "localhost";
const SSE_PATH_PREFIX: &str = "/sse";
const MCP_PATH_PREFIX: &str = "/mcp";
const PROTECTED_RESOURCE_METADATA_PATH: &str = "/.well-known/oauth-protected-resource/mcp";
const CLIENT_REGISTRATION_PATH: &str = "/.well-known/oauth-authorization-server/mcp/client-registration";
const AUTHORIZATION_SERVER_METADATA_PATH: &str = "/.well-known/oauth-authorization-server/mcp";

/// Builds the agentgateway configuration for one MCPServer.
pub(crate) struct ResourceGenerator<'a> {
    server_name: &'a str,
    spec: &'a MCPServerSpec,
    jwks: Option<Jwks>,
}

impl<'a> ResourceGenerator<'a> {
    pub fn new(server_name: &'a str, spec: &'a MCPServerSpec, jwks: Option<Jwks>) -> Self {
        Self { server_name, spec, jwks }
    }

    pub fn generate_config(&self, transport: TransportType) -> Result<LocalConfig, TranslationError> {
        let route = Route {
            name: DEFAULT_ROUTE_NAME.to_owned(),
            matches: self.generate_matches()?,
            backends: vec![RouteBackend { weight: FULL_WEIGHT, mcp: McpBackend { targets: vec![self.generate_target(transport)?] } }],
            policies: self.generate_policies()?,
        };

        Ok(LocalConfig {
            config: GatewaySettings::default(),
            binds: vec![Bind {
                port: self.spec.deployment.port,
                listeners: vec![Listener {
                    name: DEFAULT_LISTENER_NAME.to_owned(),
                    protocol: ListenerProtocol::Http,
                    routes: vec![route],
                }],
            }],
        })
    }

    fn generate_target(&self, transport: TransportType) -> Result<McpTarget, TranslationError> {
        let deployment = &self.spec.deployment;
        let spec = match transport {
            TransportType::Stdio => McpTargetSpec::Stdio(StdioTarget {
                cmd: deployment.cmd.clone().filter(|cmd| !cmd.is_empty()).ok_or(ValidationError::MissingCommand)?,
                args: deployment.args.clone(),
                env: deployment.env.clone(),
            }),
            TransportType::Http => {
                let path = self.spec.http_transport.as_ref().map_or(DEFAULT_HTTP_TARGET_PATH, |http| http.target_path());
                McpTargetSpec::Sse(SseTarget { host: LOOPBACK_HOST.to_owned(), port: self.spec.http_target_port()?, path: path.to_owned() })
            },
            TransportType::Unsupported => return Err(ValidationError::UnsupportedTransport.into()),
        };
        Ok(McpTarget { name: self.server_name.to_owned(), spec })
    }

    fn authorization_server(&self) -> Option<&AuthorizationServer> {
        self.spec.authz.as_ref().and_then(|authz| authz.server.as_ref())
    }

    fn generate_matches(&self) -> Result<Vec<RouteMatch>, TranslationError> {
        let mut matches = vec![RouteMatch::prefix(SSE_PATH_PREFIX), RouteMatch::prefix(MCP_PATH_PREFIX)];

        if let Some(AuthorizationProvider::Keycloak(keycloak)) = self.authorization_server().and_then(|server| server.provider.as_ref()) {
            if keycloak.realm.is_empty() {
                return Err(TranslationError::MissingRealm);
            }
            matches.extend([
                RouteMatch::prefix(&format!("/realms/{}", keycloak.realm)),
                RouteMatch::exact(PROTECTED_RESOURCE_METADATA_PATH),
                RouteMatch::exact(CLIENT_REGISTRATION_PATH),
                RouteMatch::exact(AUTHORIZATION_SERVER_METADATA_PATH),
            ]);
        }
        Ok(matches)
    }

    fn generate_policies(&self) -> Result<Option<Policies>, TranslationError> {
        let mut policies = Policies::default();

        if let Some(jwt) = self.spec.jwt() {
            let Some(jwks) = self.jwks.clone() else {
                return Err(TranslationError::MissingJwks);
            };
            policies.jwt_auth = Some(JwtAuth { issuer: jwt.issuer.clone(), audiences: jwt.audiences.clone(), jwks });
        }

        if let Some(authz) = &self.spec.authz {
            if !authz.rules.is_empty() {
                policies.mcp_authorization = Some(McpAuthorization { rules: authz.rules.clone() });
            }
            if let Some(server) = &authz.server {
                policies.mcp_authentication = Some(Self::generate_authentication(server)?);
            }
        }

        if let Some(cors) = self.spec.route_filter.as_ref().and_then(|filter| filter.cors.as_ref()) {
            policies.cors = Some(Cors { allow_origins: cors.allow_origins.clone(), allow_headers: cors.allow_headers.clone() });
        }

        Ok(if policies.is_empty() { None } else { Some(policies) })
    }

    fn generate_authentication(server: &AuthorizationServer) -> Result<McpAuthentication, TranslationError> {
        let provider = match &server.provider {
            Some(AuthorizationProvider::Keycloak(keycloak)) if keycloak.realm.is_empty() => return Err(TranslationError::MissingRealm),
            Some(AuthorizationProvider::Keycloak(_)) => Some(AuthenticationProvider::keycloak()),
            None => None,
        };
        let resource_metadata = server.resource_metadata.as_ref().map(|metadata| ResourceMetadataConfig {
            resource: format!("{}{MCP_PATH_PREFIX}", metadata.resource.trim_end_matches('/')),
            scopes_supported: metadata.scopes_supported.clone(),
            bearer_methods_supported: metadata.bearer_methods_supported.clone(),
            additional_fields: metadata.additional_fields.clone(),
        });
        Ok(McpAuthentication {
            issuer: server.issuer.clone(),
            audience: server.audience.clone(),
            jwks_url: server.jwks_url.clone(),
            provider,
            resource_metadata,
        })
    }
}
