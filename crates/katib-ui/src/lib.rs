//! Operator for the Katib web UI.

pub mod charm;
pub mod config;
pub mod ingress;
pub mod workload;
