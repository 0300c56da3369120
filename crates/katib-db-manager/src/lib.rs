//! Operator for the Katib database manager.

pub mod charm;
pub mod config;
pub mod database;
pub mod workload;
