//! Process-level plumbing shared by the charm binaries.

use std::path::PathBuf;

use clap::Args;
use error_stack::Report;
use error_stack::ResultExt;
use serde::de::DeserializeOwned;
use tracing::info;

use crate::chain::PassReport;
use crate::error::CharmError;
use crate::error::CharmResult;
use crate::event::EventError;
use crate::event::HookEvent;
use crate::model::CharmModel;

/// Options every charm binary accepts.
#[derive(Args, Debug, Clone)]
pub struct CharmArgs {
    #[arg(
        long,
        env = "JUJU_DISPATCH_PATH",
        help = "Hook being dispatched, e.g. hooks/config-changed"
    )]
    pub hook: String,

    #[arg(
        long,
        env = "CHARM_STATE_FILE",
        default_value = ".charm-state.json",
        value_hint = clap::ValueHint::FilePath,
        help = "File holding state that must survive between hooks"
    )]
    pub state_file: PathBuf,

    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to the in-cluster service account)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "PEBBLE_BIN",
        default_value = "/charm/bin/pebble",
        value_hint = clap::ValueHint::FilePath,
        help = "Pebble client binary"
    )]
    pub pebble_bin: PathBuf,

    #[arg(
        long,
        env = "PEBBLE_SOCKET",
        value_hint = clap::ValueHint::FilePath,
        help = "Pebble socket of the workload container (defaults to /charm/containers/<container>/pebble.socket)"
    )]
    pub pebble_socket: Option<PathBuf>,
}

impl CharmArgs {
    pub fn event(&self) -> Result<HookEvent, Report<EventError>> {
        HookEvent::from_dispatch_path(&self.hook)
    }

    pub fn pebble_socket(&self, container: &str) -> PathBuf {
        self.pebble_socket.clone().unwrap_or_else(|| {
            PathBuf::from(format!("/charm/containers/{container}/pebble.socket"))
        })
    }
}

/// Reads the charm config into `T`. Missing options take `T`'s serde defaults.
pub fn load_config<T: DeserializeOwned>(model: &dyn CharmModel) -> CharmResult<T> {
    let raw = model.config().change_context(CharmError::Model {
        message: "failed to read charm config".to_string(),
    })?;
    serde_json::from_value(raw).change_context(CharmError::Model {
        message: "charm config does not match its schema".to_string(),
    })
}

/// Shows the pass's aggregated status on the unit.
pub fn publish_status(model: &dyn CharmModel, report: &PassReport) -> CharmResult<()> {
    info!(
        status = report.unit_status.status.wire_name(),
        message = %report.unit_status.message,
        "setting unit status"
    );
    model
        .set_unit_status(&report.unit_status)
        .change_context(CharmError::Model {
            message: "failed to set unit status".to_string(),
        })
}
