use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Resource};

pub mod operations;

pub trait GetApi {
    fn global_api<T: Resource<DynamicType = ()>>(&self) -> Api<T>;
    fn namespaced_api<T: Resource<Scope = NamespaceResourceScope, DynamicType = ()>>(
        &self,
        namespace: &str,
    ) -> Api<T>;
    fn scoped_api<T: Resource<Scope = NamespaceResourceScope, DynamicType = ()>>(
        &self,
        namespace: Option<&str>,
    ) -> Api<T>;
}

impl GetApi for Client {
    fn global_api<T: Resource<DynamicType = ()>>(&self) -> Api<T> {
        Api::all(self.clone())
    }

    fn namespaced_api<T: Resource<Scope = NamespaceResourceScope, DynamicType = ()>>(
        &self,
        namespace: &str,
    ) -> Api<T> {
        Api::namespaced(self.clone(), namespace)
    }

    fn scoped_api<T: Resource<Scope = NamespaceResourceScope, DynamicType = ()>>(
        &self,
        namespace: Option<&str>,
    ) -> Api<T> {
        match namespace {
            Some(namespace) => self.namespaced_api(namespace),
            None => self.global_api(),
        }
    }
}
