//! Access to the operator runtime: leadership, config, relations, status.

use core::error::Error;
use std::collections::BTreeMap;

use error_stack::Report;

use crate::status::UnitStatus;

/// Key/value content of one relation data bag.
pub type DataBag = BTreeMap<String, String>;

#[derive(Debug, derive_more::Display)]
pub enum ModelError {
    #[display("Failed to run hook tool {tool}: {message}")]
    HookTool { tool: String, message: String },
    #[display("Unexpected output from hook tool {tool}: {message}")]
    Output { tool: String, message: String },
    #[display("Missing runtime environment variable {name}")]
    MissingEnv { name: String },
    #[display("Relation {relation_id} not found")]
    RelationNotFound { relation_id: String },
}

impl Error for ModelError {}

/// An established relation as seen from this unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// Runtime identifier, e.g. `mysql:3`.
    pub id: String,
    /// Relation endpoint name from `metadata.yaml`.
    pub name: String,
    /// Remote application, once known.
    pub remote_app: Option<String>,
    /// Remote units that have joined.
    pub remote_units: Vec<String>,
}

/// Whose data bag to read on a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BagOwner {
    /// Our own application bag.
    LocalApp,
    /// The remote application bag.
    RemoteApp,
    /// A specific remote unit's bag.
    RemoteUnit(String),
}

/// The operator runtime as seen by one unit during one hook.
///
/// Mutating calls (`set_app_data`) are only valid on the leader; callers sit
/// behind the leadership gate.
pub trait CharmModel: Send + Sync {
    fn app_name(&self) -> &str;

    fn unit_name(&self) -> &str;

    /// Name of the model, which is also the Kubernetes namespace.
    fn model_name(&self) -> &str;

    fn is_leader(&self) -> Result<bool, Report<ModelError>>;

    /// Charm config as returned by the runtime, defaults included.
    fn config(&self) -> Result<serde_json::Value, Report<ModelError>>;

    fn relations(&self, relation_name: &str) -> Result<Vec<Relation>, Report<ModelError>>;

    fn relation_data(
        &self,
        relation: &Relation,
        owner: &BagOwner,
    ) -> Result<DataBag, Report<ModelError>>;

    /// Merges `data` into our application bag on `relation`.
    fn set_app_data(&self, relation: &Relation, data: &DataBag) -> Result<(), Report<ModelError>>;

    /// Merges `data` into this unit's bag on `relation`. Valid on any unit.
    fn set_unit_data(&self, relation: &Relation, data: &DataBag) -> Result<(), Report<ModelError>>;

    fn set_unit_status(&self, status: &UnitStatus) -> Result<(), Report<ModelError>>;
}
