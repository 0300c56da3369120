//! Reconciliation framework shared by the Katib charms.
//!
//! A charm registers [`Component`](component::Component)s in a
//! [`DependencyChain`](chain::DependencyChain), runs one pass per hook and
//! reports the aggregated [`UnitStatus`](status::UnitStatus).

pub mod certs;
pub mod chain;
pub mod component;
pub mod context;
pub mod dashboard_links;
pub mod error;
pub mod event;
pub mod gates;
pub mod hook_tools;
pub mod interfaces;
pub mod kubernetes;
pub mod model;
pub mod observability;
pub mod pebble;
pub mod runtime;
pub mod service_info;
pub mod service_mesh;
pub mod state;
pub mod status;
pub mod template;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::CharmError;
pub use error::CharmResult;
pub use status::Check;
pub use status::Status;
