use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{
            Capabilities, ConfigMap, ConfigMapEnvSource, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvFromSource,
            EnvVar, PodSpec, PodTemplateSpec, SeccompProfile, SecretEnvSource, SecretVolumeSource, SecurityContext, Service, ServicePort,
            ServiceSpec, Volume, VolumeMount,
        },
    },
    apimachinery::pkg::{apis::meta::v1::LabelSelector, util::intstr::IntOrString},
};
use kube_core::ObjectMeta;
use typed_builder::TypedBuilder;

use crate::{
    common::{CONFIG_HASH_ANNOTATION, INSTANCE_LABEL, MANAGED_BY_LABEL, MANAGED_BY_VALUE, NAME_LABEL},
    crds::{MCPServerSpec, SecretKeyReference, TransportType},
};

pub const CONFIG_FILE_NAME: &str = "local.yaml";
pub const CONFIG_VOLUME: &str = "config";
pub const CONFIG_MOUNT_PATH: &str = "/config";
pub const BINARY_VOLUME: &str = "binary";
pub const BINARY_MOUNT_PATH: &str = "/agentbin";
pub const JWKS_VOLUME: &str = "jwks";
pub const JWKS_MOUNT_PATH: &str = "/jwks";
pub const CONFIG_MAP_REF_MOUNT_ROOT: &str = "/etc/config";

pub const COPY_BINARY_CONTAINER: &str = "copy-binary";
pub const MCP_SERVER_CONTAINER: &str = "mcp-server";
pub const GATEWAY_CONTAINER: &str = "agent-gateway";

const SERVICE_PORT_NAME: &str = "http";
/// Pull policy of the agentgateway containers; the user's policy applies to user containers only.
const GATEWAY_IMAGE_PULL_POLICY: &str = "IfNotPresent";
const NON_ROOT_ID: i64 = 1000;

/// Inputs for the workload of one MCPServer, already validated and resolved.
#[derive(TypedBuilder)]
pub(crate) struct DeploymentParameters<'a> {
    name: &'a str,
    namespace: &'a str,
    spec: &'a MCPServerSpec,
    transport: TransportType,
    image: String,
    gateway_image: &'a str,
    config_hash: &'a str,
}

pub(crate) fn create_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(NAME_LABEL.to_owned(), name.to_owned()), (INSTANCE_LABEL.to_owned(), name.to_owned())])
}

fn create_pod_labels(name: &str) -> BTreeMap<String, String> {
    let mut labels = create_labels(name);
    labels.insert(MANAGED_BY_LABEL.to_owned(), MANAGED_BY_VALUE.to_owned());
    labels
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() { None } else { Some(items) }
}

fn security_context() -> SecurityContext {
    SecurityContext {
        allow_privilege_escalation: Some(false),
        capabilities: Some(Capabilities { drop: Some(vec!["ALL".to_owned()]), ..Default::default() }),
        run_as_non_root: Some(true),
        run_as_user: Some(NON_ROOT_ID),
        run_as_group: Some(NON_ROOT_ID),
        seccomp_profile: Some(SeccompProfile { type_: "RuntimeDefault".to_owned(), ..Default::default() }),
        ..Default::default()
    }
}

fn mount(name: &str, mount_path: &str) -> VolumeMount {
    VolumeMount { name: name.to_owned(), mount_path: mount_path.to_owned(), ..Default::default() }
}

fn config_map_ref_volume_name(config_map: &str) -> String {
    format!("cm-{config_map}")
}

fn gateway_args() -> Vec<String> {
    vec!["-f".to_owned(), format!("{CONFIG_MOUNT_PATH}/{CONFIG_FILE_NAME}")]
}

/// Sorted by name; `env` is a `BTreeMap`.
fn create_env(spec: &MCPServerSpec) -> Option<Vec<EnvVar>> {
    non_empty(
        spec.deployment.env.iter().map(|(name, value)| EnvVar { name: name.clone(), value: Some(value.clone()), ..Default::default() }).collect(),
    )
}

fn create_env_from(spec: &MCPServerSpec) -> Option<Vec<EnvFromSource>> {
    let deployment = &spec.deployment;
    let secrets = deployment
        .secret_refs
        .iter()
        .map(|secret| EnvFromSource { secret_ref: Some(SecretEnvSource { name: secret.name.clone(), ..Default::default() }), ..Default::default() });
    let config_maps = deployment.config_map_refs.iter().map(|config_map| EnvFromSource {
        config_map_ref: Some(ConfigMapEnvSource { name: config_map.name.clone(), ..Default::default() }),
        ..Default::default()
    });
    non_empty(secrets.chain(config_maps).collect())
}

fn create_volumes(parameters: &DeploymentParameters, jwks_secret: Option<&SecretKeyReference>) -> Vec<Volume> {
    let deployment = &parameters.spec.deployment;
    let mut volumes = vec![Volume {
        name: CONFIG_VOLUME.to_owned(),
        config_map: Some(ConfigMapVolumeSource { name: parameters.name.to_owned(), ..Default::default() }),
        ..Default::default()
    }];

    if parameters.transport == TransportType::Stdio {
        volumes.push(Volume { name: BINARY_VOLUME.to_owned(), empty_dir: Some(EmptyDirVolumeSource::default()), ..Default::default() });
    }

    if let Some(secret) = jwks_secret {
        volumes.push(Volume {
            name: JWKS_VOLUME.to_owned(),
            secret: Some(SecretVolumeSource { secret_name: Some(secret.name.clone()), ..Default::default() }),
            ..Default::default()
        });
    }

    volumes.extend(deployment.config_map_refs.iter().map(|config_map| Volume {
        name: config_map_ref_volume_name(&config_map.name),
        config_map: Some(ConfigMapVolumeSource { name: config_map.name.clone(), ..Default::default() }),
        ..Default::default()
    }));
    volumes.extend(deployment.volumes.iter().cloned());
    volumes
}

/// Mounts every topology gives the user process: referenced config maps, then user mounts.
fn user_mounts(spec: &MCPServerSpec) -> impl Iterator<Item = VolumeMount> + '_ {
    let deployment = &spec.deployment;
    deployment
        .config_map_refs
        .iter()
        .map(|config_map| VolumeMount {
            name: config_map_ref_volume_name(&config_map.name),
            mount_path: format!("{CONFIG_MAP_REF_MOUNT_ROOT}/{}", config_map.name),
            read_only: Some(true),
            ..Default::default()
        })
        .chain(deployment.volume_mounts.iter().cloned())
}

fn container_port(port: u16) -> Option<Vec<ContainerPort>> {
    Some(vec![ContainerPort { name: Some(SERVICE_PORT_NAME.to_owned()), container_port: i32::from(port), protocol: Some("TCP".to_owned()), ..Default::default() }])
}

/// stdio: an init container copies agentgateway into the shared `binary` volume and the user image runs it,
/// agentgateway then spawns the user command.
fn create_stdio_containers(parameters: &DeploymentParameters, jwks_secret: Option<&SecretKeyReference>) -> (Vec<Container>, Vec<Container>) {
    let deployment = &parameters.spec.deployment;
    let agentgateway_binary = format!("{BINARY_MOUNT_PATH}/agentgateway");

    let copy_binary = Container {
        name: COPY_BINARY_CONTAINER.to_owned(),
        image: Some(parameters.gateway_image.to_owned()),
        image_pull_policy: Some(GATEWAY_IMAGE_PULL_POLICY.to_owned()),
        args: Some(vec!["--copy-self".to_owned(), agentgateway_binary.clone()]),
        volume_mounts: Some(vec![mount(BINARY_VOLUME, BINARY_MOUNT_PATH)]),
        security_context: Some(security_context()),
        ..Default::default()
    };

    let mut volume_mounts = vec![mount(CONFIG_VOLUME, CONFIG_MOUNT_PATH), mount(BINARY_VOLUME, BINARY_MOUNT_PATH)];
    if jwks_secret.is_some() {
        volume_mounts.push(mount(JWKS_VOLUME, JWKS_MOUNT_PATH));
    }
    volume_mounts.extend(user_mounts(parameters.spec));

    let mcp_server = Container {
        name: MCP_SERVER_CONTAINER.to_owned(),
        image: Some(parameters.image.clone()),
        image_pull_policy: Some(deployment.image_pull_policy()),
        command: Some(vec![agentgateway_binary]),
        args: Some(gateway_args()),
        env: create_env(parameters.spec),
        env_from: create_env_from(parameters.spec),
        ports: container_port(deployment.port),
        volume_mounts: Some(volume_mounts),
        security_context: Some(security_context()),
        ..Default::default()
    };

    (vec![copy_binary], vec![mcp_server])
}

/// http: the user process and agentgateway run side by side, agentgateway reaches the user process over loopback.
fn create_http_containers(parameters: &DeploymentParameters, jwks_secret: Option<&SecretKeyReference>) -> Vec<Container> {
    let deployment = &parameters.spec.deployment;
    let target_port = parameters.spec.http_transport.as_ref().and_then(|http| http.target_port).unwrap_or_default();

    let mcp_server = Container {
        name: MCP_SERVER_CONTAINER.to_owned(),
        image: Some(parameters.image.clone()),
        image_pull_policy: Some(deployment.image_pull_policy()),
        command: deployment.cmd.clone().filter(|cmd| !cmd.is_empty()).map(|cmd| vec![cmd]),
        args: non_empty(deployment.args.clone()),
        env: create_env(parameters.spec),
        env_from: create_env_from(parameters.spec),
        ports: Some(vec![ContainerPort { container_port: i32::from(target_port), protocol: Some("TCP".to_owned()), ..Default::default() }]),
        volume_mounts: non_empty(user_mounts(parameters.spec).collect()),
        security_context: Some(security_context()),
        ..Default::default()
    };

    let mut gateway_mounts = vec![mount(CONFIG_VOLUME, CONFIG_MOUNT_PATH)];
    if jwks_secret.is_some() {
        gateway_mounts.push(mount(JWKS_VOLUME, JWKS_MOUNT_PATH));
    }
    let gateway = Container {
        name: GATEWAY_CONTAINER.to_owned(),
        image: Some(parameters.gateway_image.to_owned()),
        image_pull_policy: Some(GATEWAY_IMAGE_PULL_POLICY.to_owned()),
        args: Some(gateway_args()),
        ports: container_port(deployment.port),
        volume_mounts: Some(gateway_mounts),
        security_context: Some(security_context()),
        ..Default::default()
    };

    vec![mcp_server, gateway]
}

pub(crate) fn create_deployment(parameters: &DeploymentParameters) -> Deployment {
    let spec = parameters.spec;
    let jwks_secret = spec.jwks_secret();
    let labels = create_labels(parameters.name);

    let (init_containers, mut containers) = match parameters.transport {
        TransportType::Http => (vec![], create_http_containers(parameters, jwks_secret)),
        _ => create_stdio_containers(parameters, jwks_secret),
    };
    containers.extend(spec.deployment.sidecars.iter().cloned());

    let annotations = BTreeMap::from([(CONFIG_HASH_ANNOTATION.to_owned(), parameters.config_hash.to_owned())]);

    Deployment {
        metadata: ObjectMeta {
            name: Some(parameters.name.to_owned()),
            namespace: Some(parameters.namespace.to_owned()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            selector: LabelSelector { match_expressions: None, match_labels: Some(labels) },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(create_pod_labels(parameters.name)), annotations: Some(annotations), ..Default::default() }),
                spec: Some(PodSpec {
                    init_containers: non_empty(init_containers),
                    containers,
                    volumes: Some(create_volumes(parameters, jwks_secret)),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn create_service(name: &str, namespace: &str, port: u16) -> Service {
    let labels = create_labels(name);
    Service {
        metadata: ObjectMeta { name: Some(name.to_owned()), namespace: Some(namespace.to_owned()), labels: Some(labels.clone()), ..Default::default() },
        spec: Some(ServiceSpec {
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some(SERVICE_PORT_NAME.to_owned()),
                port: i32::from(port),
                protocol: Some("TCP".to_owned()),
                target_port: Some(IntOrString::Int(i32::from(port))),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

pub(crate) fn create_config_map(name: &str, namespace: &str, content: String) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(namespace.to_owned()),
            labels: Some(create_labels(name)),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(CONFIG_FILE_NAME.to_owned(), content)])),
        ..Default::default()
    }
}
