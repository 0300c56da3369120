use async_trait::async_trait;

use crate::error::CharmResult;
use crate::event::HookEvent;
use crate::status::Check;
use crate::status::Status;

/// One unit of reconciliation work in a [`DependencyChain`](crate::chain::DependencyChain).
///
/// `status` must not mutate anything outside the process; only `reconcile`
/// and `remove` may change cluster, relation or workload state. The chain
/// only calls those two once every dependency reports Active.
#[async_trait]
pub trait Component: Send + Sync {
    /// Evaluates this component's own condition.
    async fn status(&self) -> CharmResult<Status>;

    /// Brings external state in line with what this component wants.
    /// Must be idempotent.
    async fn reconcile(&self, _event: &HookEvent) -> CharmResult<Check<()>> {
        Ok(Check::Pass(()))
    }

    /// Undoes whatever `reconcile` created.
    async fn remove(&self, _event: &HookEvent) -> CharmResult<Check<()>> {
        Ok(Check::Pass(()))
    }
}
