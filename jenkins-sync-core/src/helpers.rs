use std::any::type_name;

use kube::Resource;

pub fn pretty_type_name<'a, T>() -> &'a str {
    let full_name = type_name::<T>();

    full_name.rsplit("::").next().unwrap_or(full_name)
}

pub trait RequireMetadata<E> {
    fn require_name_or(&self, error: E) -> Result<&str, E>;
    fn require_namespace_or(&self, error: E) -> Result<&str, E>;
    fn require_uid_or(&self, error: E) -> Result<&str, E>;
}

impl<T: Resource, E> RequireMetadata<E> for T {
    fn require_name_or(&self, error: E) -> Result<&str, E> {
        Ok(self.meta().name.as_ref().ok_or(error)?.as_str())
    }

    fn require_namespace_or(&self, error: E) -> Result<&str, E> {
        Ok(self.meta().namespace.as_ref().ok_or(error)?.as_str())
    }

    fn require_uid_or(&self, error: E) -> Result<&str, E> {
        Ok(self.meta().uid.as_ref().ok_or(error)?.as_str())
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::Secret;
    use kube::core::ObjectMeta;

    use super::{pretty_type_name, RequireMetadata};

    #[test]
    fn pretty_type_name_strips_module_path() {
        assert_eq!(pretty_type_name::<Secret>(), "Secret");
        assert_eq!(pretty_type_name::<u32>(), "u32");
    }

    #[test]
    fn missing_metadata_yields_the_given_error() {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("git".to_owned()),
                ..Default::default()
            },
            ..Default::default()
        };

        assert_eq!(secret.require_name_or("no name"), Ok("git"));
        assert_eq!(secret.require_namespace_or("no namespace"), Err("no namespace"));
        assert_eq!(secret.require_uid_or("no uid"), Err("no uid"));
    }
}
