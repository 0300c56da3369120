use std::sync::Arc;

use async_trait::async_trait;
use error_stack::ResultExt;

use crate::component::Component;
use crate::error::CharmError;
use crate::error::CharmResult;
use crate::model::CharmModel;
use crate::status::Status;

pub const LEADERSHIP_GATE: &str = "leadership-gate";

/// Root gate: only the elected leader may mutate shared state.
pub struct LeadershipGate {
    model: Arc<dyn CharmModel>,
}

impl LeadershipGate {
    pub fn new(model: Arc<dyn CharmModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Component for LeadershipGate {
    async fn status(&self) -> CharmResult<Status> {
        let leader = self
            .model
            .is_leader()
            .change_context(CharmError::Model {
                message: "failed to query leadership".to_string(),
            })?;

        if leader {
            Ok(Status::Active)
        } else {
            Ok(Status::waiting("Waiting for leadership"))
        }
    }
}
