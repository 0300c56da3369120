//! Operator for the Katib controller: certificates, CRDs, webhooks and the
//! `katib-controller` workload.

pub mod charm;
pub mod config;
pub mod inputs;
pub mod workload;
