use std::fmt::Display;

use kube::Resource;

/// Stable logical identity of a remote object: `(namespace, name)`.
///
/// Cluster scoped objects carry no namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Returns `None` for objects without a name, those can't be keyed.
    pub fn from_resource<K: Resource>(object: &K) -> Option<Self> {
        let meta = object.meta();

        Some(Self {
            namespace: meta.namespace.to_owned(),
            name: meta.name.to_owned()?,
        })
    }

    pub fn namespace_or_default(&self) -> &str {
        self.namespace.as_deref().unwrap_or("---")
    }
}

impl Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::Secret;
    use kube::core::ObjectMeta;

    use super::ResourceKey;

    #[test]
    fn key_is_built_from_object_metadata() {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("git-token".to_owned()),
                namespace: Some("team-a".to_owned()),
                ..Default::default()
            },
            ..Default::default()
        };

        let key = ResourceKey::from_resource(&secret).unwrap();

        assert_eq!(key, ResourceKey::new("team-a", "git-token"));
        assert_eq!(key.to_string(), "team-a/git-token");
    }

    #[test]
    fn nameless_objects_have_no_key() {
        assert!(ResourceKey::from_resource(&Secret::default()).is_none());
    }

    #[test]
    fn cluster_keys_display_without_namespace() {
        assert_eq!(ResourceKey::cluster("jenkins").to_string(), "jenkins");
    }
}
