mod resource_key;

pub use resource_key::ResourceKey;

pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "kmcp";

pub const CONFIG_HASH_ANNOTATION: &str = "kmcp.kagent.dev/mcpserver-config-hash";
pub const APPLIED_HASH_ANNOTATION: &str = "kmcp.kagent.dev/applied-hash";
