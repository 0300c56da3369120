use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use tracing::info;
use tracing::warn;

use super::DesiredResourceSet;
use super::KubernetesError;
use super::KubernetesResourceHandler;
use crate::check;
use crate::component::Component;
use crate::context::ManifestContext;
use crate::error::CharmError;
use crate::error::CharmResult;
use crate::event::HookEvent;
use crate::status::Check;
use crate::status::Status;

/// Builds the template context for one pass. A `Fail` stops the component
/// before anything is rendered.
pub type ContextGetter = Box<dyn Fn() -> CharmResult<Check<ManifestContext>> + Send + Sync>;

const RESOURCES_MISSING: &str =
    "Not all resources found in cluster. This may be transient if we haven't tried to deploy them yet.";

/// Keeps a [`KubernetesResourceHandler`]'s resources applied as part of the
/// dependency chain.
pub struct KubernetesComponent {
    handler: KubernetesResourceHandler,
    context: ContextGetter,
}

impl KubernetesComponent {
    pub fn new(handler: KubernetesResourceHandler, context: ContextGetter) -> Self {
        Self { handler, context }
    }

    pub fn handler(&self) -> &KubernetesResourceHandler {
        &self.handler
    }

    fn desired(&self) -> CharmResult<Check<DesiredResourceSet>> {
        let context = check!((self.context)());
        let set = self
            .handler
            .render_manifests(&context)
            .change_context_lazy(|| CharmError::Render {
                message: format!("resources of scope {}", self.handler.scope()),
            })?;
        Ok(Check::Pass(set))
    }
}

#[async_trait]
impl Component for KubernetesComponent {
    async fn status(&self) -> CharmResult<Status> {
        let set = check!(self.desired());
        let pending = self
            .handler
            .missing_or_changed(&set)
            .await
            .change_context_lazy(|| kubernetes_failed(self.handler.scope()))?;

        if pending.is_empty() {
            return Ok(Status::Active);
        }
        for object in &pending {
            info!(object = %object, "resource missing or out of date");
        }
        Ok(Status::waiting(RESOURCES_MISSING))
    }

    async fn reconcile(&self, _event: &HookEvent) -> CharmResult<Check<()>> {
        let set = check!(self.desired());
        match self.handler.apply(&set).await {
            Ok(_) => Ok(Check::Pass(())),
            Err(report) => conflict_as_maintenance(report, self.handler.scope()),
        }
    }

    async fn remove(&self, _event: &HookEvent) -> CharmResult<Check<()>> {
        let set = check!(self.desired());
        self.handler
            .delete(&set)
            .await
            .change_context_lazy(|| kubernetes_failed(self.handler.scope()))?;
        Ok(Check::Pass(()))
    }
}

fn kubernetes_failed(scope: &str) -> CharmError {
    CharmError::Kubernetes {
        message: format!("resources of scope {scope}"),
    }
}

/// A conflict that survived the forced retry is reported, anything else is fatal.
fn conflict_as_maintenance(
    report: Report<KubernetesError>,
    scope: &str,
) -> CharmResult<Check<()>> {
    if report.current_context().is_conflict() {
        warn!(error = ?report, "failed to apply resources due to a conflict");
        return Ok(Check::Fail(Status::maintenance(format!(
            "Failed to apply resources of scope {scope}: {}",
            report.current_context()
        ))));
    }
    Err(report.change_context(kubernetes_failed(scope)))
}
