use std::collections::BTreeMap;

use crate::DEFAULT_BASE_DOMAIN;

pub const BASE_DOMAIN_ANNOTATION: &str = "alauda.io/basedomain";

pub const JENKINS_IDENTITY_ANNOTATION: &str = "jenkins.identity";
pub const PIPELINE_BUILD_ANNOTATION: &str = "jenkins.build";

/// Domain prefix used by the apiserver for annotations owned by this sync.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnotationDomain(String);

impl AnnotationDomain {
    pub fn new(domain: impl Into<String>) -> Self {
        Self(domain.into())
    }

    pub fn from_annotations(annotations: Option<&BTreeMap<String, String>>) -> Self {
        match annotations.and_then(|a| a.get(BASE_DOMAIN_ANNOTATION)) {
            Some(domain) if !domain.is_empty() => Self::new(domain.to_owned()),
            _ => Self::default(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.0
    }

    pub fn format(&self, annotation: &str) -> String {
        format!("{}/{}", self.0, annotation)
    }

    pub fn jenkins_identity(&self) -> String {
        self.format(JENKINS_IDENTITY_ANNOTATION)
    }

    pub fn pipeline_build(&self) -> String {
        self.format(PIPELINE_BUILD_ANNOTATION)
    }
}

impl Default for AnnotationDomain {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DOMAIN)
    }
}
