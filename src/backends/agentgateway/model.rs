use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const DEFAULT_LISTENER_NAME: &str = "default";
pub const DEFAULT_ROUTE_NAME: &str = "mcp";
pub const FULL_WEIGHT: u32 = 100;

/// Static configuration file consumed by agentgateway, mounted as `local.yaml`.
///
/// Every map is ordered and every optional field is skipped when absent so the same input always
/// serializes to the same bytes.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct LocalConfig {
    pub config: GatewaySettings,
    pub binds: Vec<Bind>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewaySettings {}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Bind {
    pub port: u16,
    pub listeners: Vec<Listener>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ListenerProtocol {
    Http,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Listener {
    pub name: String,
    pub protocol: ListenerProtocol,
    pub routes: Vec<Route>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Route {
    pub name: String,
    pub matches: Vec<RouteMatch>,
    pub backends: Vec<RouteBackend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policies: Option<Policies>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteMatch {
    pub path: PathMatch,
}

/// Exactly one of the two is set; the gateway reads it as a single-key map.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PathMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<String>,
}

impl RouteMatch {
    pub fn prefix(path: &str) -> Self {
        Self { path: PathMatch { path_prefix: Some(path.to_owned()), exact: None } }
    }

    pub fn exact(path: &str) -> Self {
        Self { path: PathMatch { path_prefix: None, exact: Some(path.to_owned()) } }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RouteBackend {
    pub weight: u32,
    pub mcp: McpBackend,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct McpBackend {
    pub targets: Vec<McpTarget>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct McpTarget {
    pub name: String,
    #[serde(flatten)]
    pub spec: McpTargetSpec,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum McpTargetSpec {
    Stdio(StdioTarget),
    Sse(SseTarget),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StdioTarget {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SseTarget {
    pub host: String,
    pub port: u16,
    pub path: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Policies {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_auth: Option<JwtAuth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_authorization: Option<McpAuthorization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_authentication: Option<McpAuthentication>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors: Option<Cors>,
}

impl Policies {
    pub fn is_empty(&self) -> bool {
        self.jwt_auth.is_none() && self.mcp_authorization.is_none() && self.mcp_authentication.is_none() && self.cors.is_none()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JwtAuth {
    pub issuer: String,
    pub audiences: Vec<String>,
    pub jwks: Jwks,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<String>,
}

impl Jwks {
    pub fn file(path: String) -> Self {
        Self { file: Some(path), inline: None }
    }

    pub fn inline(keys: String) -> Self {
        Self { file: None, inline: Some(keys) }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct McpAuthorization {
    pub rules: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct McpAuthentication {
    pub issuer: String,
    pub audience: String,
    pub jwks_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<AuthenticationProvider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_metadata: Option<ResourceMetadataConfig>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthenticationProvider {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keycloak: Option<KeycloakSettings>,
}

impl AuthenticationProvider {
    pub fn keycloak() -> Self {
        Self { keycloak: Some(KeycloakSettings::default()) }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeycloakSettings {}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetadataConfig {
    pub resource: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bearer_methods_supported: Vec<String>,
    #[serde(flatten)]
    pub additional_fields: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cors {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_origins: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_headers: Vec<String>,
}

impl LocalConfig {
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}
