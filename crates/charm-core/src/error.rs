use core::error::Error;

use error_stack::Report;

use crate::status::Status;

/// Result type returned by components and their helpers.
pub type CharmResult<T> = Result<T, Report<CharmError>>;

/// Errors raised while reconciling a charm.
///
/// Not-ready and misconfiguration outcomes are not errors, they are returned
/// as [`Status`] values. The only variant that still maps to a status is
/// [`CharmError::TooManyRelatedApps`], which callers must be able to tell
/// apart from a plain Blocked status.
#[derive(Debug, derive_more::Display)]
pub enum CharmError {
    #[display("Charm runtime call failed: {message}")]
    Model { message: String },
    #[display("Kubernetes operation failed: {message}")]
    Kubernetes { message: String },
    #[display("Failed to render manifests: {message}")]
    Render { message: String },
    #[display("Workload container operation failed: {message}")]
    Workload { message: String },
    #[display("Failed to generate certificates: {message}")]
    Certificate { message: String },
    #[display("Failed to access persisted charm state: {message}")]
    State { message: String },
    #[display("Too many related applications on relation '{relation}': expected at most 1, found {count}")]
    TooManyRelatedApps { relation: String, count: usize },
    #[display("Component '{component}' depends on unregistered component '{dependency}'")]
    UnknownDependency {
        component: String,
        dependency: String,
    },
    #[display("Component '{component}' is registered twice")]
    DuplicateComponent { component: String },
}

impl Error for CharmError {}

impl CharmError {
    /// Status this error resolves to when it reaches the dependency chain.
    ///
    /// `None` means the error is fatal and aborts the reconciliation pass.
    pub fn target_status(&self) -> Option<Status> {
        match self {
            Self::TooManyRelatedApps { .. } => Some(Status::blocked(self.to_string())),
            _ => None,
        }
    }
}
