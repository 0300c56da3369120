//! Workload configuration through Pebble, the service manager running in
//! each workload container.

pub mod component;
pub mod layer;
pub mod workload;

pub use component::LayerBuilder;
pub use component::PebbleServiceComponent;
pub use component::WorkloadFile;
pub use layer::CheckAction;
pub use layer::CheckLevel;
pub use layer::CheckSpec;
pub use layer::ExecCheck;
pub use layer::Layer;
pub use layer::LogTarget;
pub use layer::Override;
pub use layer::Plan;
pub use layer::Service;
pub use layer::Startup;
pub use workload::CheckInfo;
pub use workload::CheckState;
pub use workload::PebbleCli;
pub use workload::ServiceStatus;
pub use workload::Workload;
pub use workload::WorkloadError;
