//! Kubernetes resource reconciliation.
//!
//! - [`ResourceClient`]: generic get/apply/delete against the API server
//! - [`KubernetesResourceHandler`]: renders templates into a
//!   [`DesiredResourceSet`] and applies or deletes it idempotently
//! - [`KubernetesComponent`]: the handler wired into the dependency chain

use core::error::Error;
use std::fmt;

use kube::core::DynamicObject;
use kube::core::GroupVersionKind;

pub mod client;
pub mod component;
pub mod handler;
pub mod resources;

pub use client::init_kube_client;
pub use client::KubeResourceClient;
pub use client::ResourceClient;
pub use component::KubernetesComponent;
pub use handler::ApplySummary;
pub use handler::KubernetesResourceHandler;
pub use handler::ManifestTemplate;
pub use resources::DesiredResourceSet;

/// Errors that can occur during Kubernetes operations.
#[derive(Debug, derive_more::Display)]
pub enum KubernetesError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("Field ownership conflict on {object}")]
    Conflict { object: String },
    #[display("{object} not found")]
    NotFound { object: String },
    #[display("Kubernetes API returned {code} for {object}: {message}")]
    Api {
        object: String,
        code: u16,
        message: String,
    },
    #[display("Invalid manifest in {template}: {message}")]
    InvalidManifest { template: String, message: String },
}

impl Error for KubernetesError {}

impl KubernetesError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Identity of a Kubernetes object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    /// Returns `None` when the object lacks a type or a name.
    pub fn from_object(object: &DynamicObject) -> Option<Self> {
        let types = object.types.as_ref()?;
        Some(Self {
            api_version: types.api_version.clone(),
            kind: types.kind.clone(),
            namespace: object.metadata.namespace.clone(),
            name: object.metadata.name.clone()?,
        })
    }

    pub fn gvk(&self) -> GroupVersionKind {
        let (group, version) = match self.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", self.api_version.as_str()),
        };
        GroupVersionKind::gvk(group, version, &self.kind)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}/{}", self.kind, namespace, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}
