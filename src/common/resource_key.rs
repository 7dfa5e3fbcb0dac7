use std::fmt::Display;

use kube::Resource;

pub const DEFAULT_NAMESPACE_NAME: &str = "default";

#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ResourceKey {
    pub group: String,
    pub namespace: String,
    pub name: String,
    pub kind: String,
}

impl ResourceKey {
    /// Key of an object of kind `K`, used where only the name and namespace are known.
    pub fn of_kind<K: Resource<DynamicType = ()>>(name: &str, namespace: &str) -> Self {
        Self { group: K::group(&()).into_owned(), namespace: namespace.to_owned(), name: name.to_owned(), kind: K::kind(&()).into_owned() }
    }
}

impl Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", create_id(&self.name, &self.namespace))
    }
}

fn create_id(name: &str, namespace: &str) -> String {
    namespace.to_owned() + "." + name
}

impl<K> From<&K> for ResourceKey
where
    K: Resource<DynamicType = ()>,
{
    fn from(value: &K) -> Self {
        let meta = value.meta();
        let namespace = meta.namespace.clone().unwrap_or(DEFAULT_NAMESPACE_NAME.to_owned());
        let name = match (meta.name.as_ref(), meta.generate_name.as_ref()) {
            (None, None) => "",
            (Some(name), _) | (None, Some(name)) => name,
        };
        Self::of_kind::<K>(name, &namespace)
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::Secret;
    use kube_core::ObjectMeta;

    use super::*;
    use crate::crds::MCPServer;

    #[test]
    fn test_key_from_resource() {
        let secret = Secret { metadata: ObjectMeta { name: Some("jwks".to_owned()), ..Default::default() }, ..Default::default() };
        let key = ResourceKey::from(&secret);
        assert_eq!(key.namespace, DEFAULT_NAMESPACE_NAME);
        assert_eq!(key.kind, "Secret");
        assert_eq!(key.to_string(), "default.jwks");
    }

    #[test]
    fn test_key_of_kind() {
        let key = ResourceKey::of_kind::<MCPServer>("echo", "tools");
        assert_eq!(key.group, "kagent.dev");
        assert_eq!(key.kind, "MCPServer");
        assert_eq!(key.to_string(), "tools.echo");
        assert_ne!(key, ResourceKey::of_kind::<Secret>("echo", "tools"));
    }
}
