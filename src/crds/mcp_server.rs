use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, LocalObjectReference, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const UVX_COMMAND: &str = "uvx";
pub const NPX_COMMAND: &str = "npx";
pub const UVX_IMAGE: &str = "ghcr.io/astral-sh/uv:debian";
pub const NPX_IMAGE: &str = "node:24-alpine3.21";
pub const DEFAULT_IMAGE_PULL_POLICY: &str = "IfNotPresent";
pub const DEFAULT_HTTP_TARGET_PATH: &str = "/mcp";

/// MCPServer describes one MCP server process and how it is exposed through agentgateway.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "kagent.dev",
    version = "v1alpha1",
    kind = "MCPServer",
    plural = "mcpservers",
    shortname = "mcps",
    shortname = "mcp",
    namespaced,
    status = "MCPServerStatus",
    printcolumn = r#"{"name":"Transport","type":"string","jsonPath":".spec.transportType"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MCPServerSpec {
    pub deployment: MCPServerDeployment,
    pub transport_type: Option<TransportType>,
    pub http_transport: Option<HttpTransport>,
    pub authn: Option<MCPServerAuthentication>,
    pub authz: Option<MCPServerAuthorization>,
    pub route_filter: Option<RouteFilter>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    Stdio,
    Http,
    #[serde(other)]
    #[schemars(skip)]
    Unsupported,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MCPServerDeployment {
    /// Container image. May be omitted when `cmd` is `uvx` or `npx`.
    pub image: Option<String>,
    /// Port agentgateway listens on.
    #[serde(default)]
    pub port: u16,
    pub cmd: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub secret_refs: Vec<LocalObjectReference>,
    #[serde(default)]
    pub config_map_refs: Vec<LocalObjectReference>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(default)]
    pub sidecars: Vec<Container>,
    pub image_pull_policy: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpTransport {
    pub target_port: Option<u16>,
    pub target_path: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MCPServerAuthentication {
    pub jwt: Option<JwtAuthentication>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JwtAuthentication {
    pub issuer: String,
    #[serde(default)]
    pub audiences: Vec<String>,
    /// Secret holding the JWKS document, mounted into the gateway container.
    pub jwks_ref: Option<SecretKeyReference>,
    /// JWKS document embedded in the generated configuration.
    pub jwks_inline: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyReference {
    pub name: String,
    pub key: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MCPServerAuthorization {
    /// CEL expressions evaluated by the gateway for every MCP request.
    #[serde(default)]
    pub rules: Vec<String>,
    pub server: Option<AuthorizationServer>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationServer {
    pub issuer: String,
    pub audience: String,
    pub jwks_url: String,
    pub provider: Option<AuthorizationProvider>,
    pub resource_metadata: Option<ResourceMetadata>,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AuthorizationProvider {
    Keycloak(KeycloakProvider),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakProvider {
    #[serde(default)]
    pub realm: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetadata {
    /// Base URL of the protected resource; `/mcp` is appended.
    pub resource: String,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
    #[serde(default)]
    pub bearer_methods_supported: Vec<String>,
    /// Provider specific metadata passed through unchanged.
    #[serde(default)]
    pub additional_fields: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteFilter {
    pub cors: Option<CorsFilter>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CorsFilter {
    #[serde(default)]
    pub allow_origins: Vec<String>,
    #[serde(default)]
    pub allow_headers: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MCPServerStatus {
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("image must be specified for MCPServer {0} or the command must be 'uvx' or 'npx'")]
    MissingImage(String),
    #[error("unsupported transport type, expected one of stdio, http")]
    UnsupportedTransport,
    #[error("deployment port must be specified")]
    MissingPort,
    #[error("stdio transport requires a command")]
    MissingCommand,
    #[error("HTTP transport requires a target port")]
    MissingTargetPort,
    #[error("HTTP target port {0} must differ from the gateway port")]
    TargetPortConflict(u16),
}

impl MCPServerDeployment {
    /// Explicit image, or the base runtime image for a known package runner.
    pub fn resolve_image(&self, server_name: &str) -> Result<String, ValidationError> {
        match (self.image.as_deref(), self.cmd.as_deref()) {
            (Some(image), _) if !image.is_empty() => Ok(image.to_owned()),
            (_, Some(UVX_COMMAND)) => Ok(UVX_IMAGE.to_owned()),
            (_, Some(NPX_COMMAND)) => Ok(NPX_IMAGE.to_owned()),
            _ => Err(ValidationError::MissingImage(server_name.to_owned())),
        }
    }

    pub fn image_pull_policy(&self) -> String {
        self.image_pull_policy.clone().filter(|policy| !policy.is_empty()).unwrap_or_else(|| DEFAULT_IMAGE_PULL_POLICY.to_owned())
    }
}

impl HttpTransport {
    pub fn target_path(&self) -> &str {
        self.target_path.as_deref().filter(|path| !path.is_empty()).unwrap_or(DEFAULT_HTTP_TARGET_PATH)
    }
}

impl MCPServerSpec {
    pub fn transport(&self) -> Result<TransportType, ValidationError> {
        match self.transport_type {
            Some(transport @ (TransportType::Stdio | TransportType::Http)) => Ok(transport),
            Some(TransportType::Unsupported) | None => Err(ValidationError::UnsupportedTransport),
        }
    }

    /// Target port of the user process for the http transport.
    pub fn http_target_port(&self) -> Result<u16, ValidationError> {
        let target_port = self.http_transport.as_ref().and_then(|http| http.target_port).unwrap_or_default();
        if target_port == 0 {
            Err(ValidationError::MissingTargetPort)
        } else if target_port == self.deployment.port {
            Err(ValidationError::TargetPortConflict(target_port))
        } else {
            Ok(target_port)
        }
    }

    pub fn validate(&self, server_name: &str) -> Result<(), ValidationError> {
        self.deployment.resolve_image(server_name)?;
        let transport = self.transport()?;
        if self.deployment.port == 0 {
            return Err(ValidationError::MissingPort);
        }
        match transport {
            TransportType::Stdio if self.deployment.cmd.as_deref().unwrap_or_default().is_empty() => Err(ValidationError::MissingCommand),
            TransportType::Http => self.http_target_port().map(|_| ()),
            _ => Ok(()),
        }
    }

    pub fn jwt(&self) -> Option<&JwtAuthentication> {
        self.authn.as_ref().and_then(|authn| authn.jwt.as_ref())
    }

    /// Secret backing the JWT key set, when the key set is not inline.
    pub fn jwks_secret(&self) -> Option<&SecretKeyReference> {
        self.jwt().and_then(|jwt| jwt.jwks_ref.as_ref())
    }
}
