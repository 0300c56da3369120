//! Ordered, dependency-gated execution of [`Component`]s.
//!
//! Components are registered in order, each naming the components it depends
//! on. Dependencies must already be registered, which keeps registration order
//! topological. During a pass a component acts only when every dependency
//! reports Active, and its reported status short-circuits to the first
//! dependency that is not.

use std::collections::HashSet;
use std::sync::Arc;

use error_stack::Report;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::component::Component;
use crate::error::CharmError;
use crate::error::CharmResult;
use crate::event::EventKind;
use crate::event::HookEvent;
use crate::status::Check;
use crate::status::GateOutcome;
use crate::status::Status;
use crate::status::UnitStatus;

struct Registration {
    name: String,
    component: Arc<dyn Component>,
    depends_on: Vec<String>,
    /// Events on which this component acts even if dependencies are not Active.
    exempt: HashSet<EventKind>,
}

/// Outcome of one pass over the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    /// `(component, outcome)` in registration order.
    pub outcomes: Vec<(String, GateOutcome)>,
    pub unit_status: UnitStatus,
}

impl PassReport {
    fn new(outcomes: Vec<(String, GateOutcome)>) -> Self {
        let unit_status = UnitStatus::aggregate(outcomes.iter().map(|(_, outcome)| outcome));
        Self {
            outcomes,
            unit_status,
        }
    }

    pub fn outcome(&self, component: &str) -> Option<&GateOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == component)
            .map(|(_, outcome)| outcome)
    }
}

#[derive(Default)]
pub struct DependencyChain {
    registrations: Vec<Registration>,
}

impl DependencyChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `component` under `name`, gated on `depends_on`.
    pub fn add(
        &mut self,
        name: &str,
        component: Arc<dyn Component>,
        depends_on: &[&str],
    ) -> CharmResult<()> {
        self.add_exempt(name, component, depends_on, &[])
    }

    /// Like [`add`](Self::add), but the component also acts during the
    /// `exempt` lifecycle hooks regardless of its dependencies.
    pub fn add_exempt(
        &mut self,
        name: &str,
        component: Arc<dyn Component>,
        depends_on: &[&str],
        exempt: &[EventKind],
    ) -> CharmResult<()> {
        if self.position(name).is_some() {
            return Err(Report::new(CharmError::DuplicateComponent {
                component: name.to_string(),
            }));
        }
        for dependency in depends_on {
            if self.position(dependency).is_none() {
                return Err(Report::new(CharmError::UnknownDependency {
                    component: name.to_string(),
                    dependency: dependency.to_string(),
                }));
            }
        }

        self.registrations.push(Registration {
            name: name.to_string(),
            component,
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            exempt: exempt.iter().copied().collect(),
        });
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.registrations.iter().map(|r| r.name.as_str())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.registrations.iter().position(|r| r.name == name)
    }

    /// Runs one reconciliation pass.
    #[tracing::instrument(skip(self))]
    pub async fn execute(&self, event: &HookEvent) -> CharmResult<PassReport> {
        let mut outcomes: Vec<(String, GateOutcome)> = Vec::with_capacity(self.registrations.len());

        for registration in &self.registrations {
            let unready = first_unready(&outcomes, &registration.depends_on).cloned();
            let exempt = registration.exempt.contains(&event.kind());

            let mut halted = None;
            if unready.is_none() || exempt {
                debug!(component = %registration.name, "reconciling");
                halted = match registration.component.reconcile(event).await {
                    Ok(Check::Pass(())) => None,
                    Ok(Check::Fail(status)) => Some(status),
                    Err(report) => Some(status_or_abort(&registration.name, report)?),
                };
            } else {
                debug!(component = %registration.name, "dependencies not ready, skipping");
            }

            let outcome = match (unready, halted) {
                (Some(upstream), _) => upstream,
                (None, Some(status)) => GateOutcome::new(&registration.name, status),
                (None, None) => GateOutcome::new(&registration.name, own_status(registration).await?),
            };
            outcomes.push((registration.name.clone(), outcome));
        }

        let report = PassReport::new(outcomes);
        info!(
            status = report.unit_status.status.wire_name(),
            message = %report.unit_status.message,
            "reconciliation pass finished"
        );
        Ok(report)
    }

    /// Computes every outcome without acting on anything.
    pub async fn evaluate(&self) -> CharmResult<PassReport> {
        let mut outcomes: Vec<(String, GateOutcome)> = Vec::with_capacity(self.registrations.len());

        for registration in &self.registrations {
            let outcome = match first_unready(&outcomes, &registration.depends_on) {
                Some(upstream) => upstream.clone(),
                None => GateOutcome::new(&registration.name, own_status(registration).await?),
            };
            outcomes.push((registration.name.clone(), outcome));
        }

        Ok(PassReport::new(outcomes))
    }

    /// Tears components down in reverse registration order.
    ///
    /// A component is only removed when its dependencies are Active, so the
    /// leadership gate keeps non-leader units from deleting shared resources.
    #[tracing::instrument(skip(self))]
    pub async fn remove(&self, event: &HookEvent) -> CharmResult<PassReport> {
        let evaluated = self.evaluate().await?;
        let mut outcomes = evaluated.outcomes;

        for (index, registration) in self.registrations.iter().enumerate().rev() {
            let ready = first_unready(&outcomes[..index], &registration.depends_on).is_none();
            if !ready && !registration.exempt.contains(&event.kind()) {
                debug!(component = %registration.name, "dependencies not ready, not removing");
                continue;
            }

            info!(component = %registration.name, "removing");
            let failed = match registration.component.remove(event).await {
                Ok(Check::Pass(())) => None,
                Ok(Check::Fail(status)) => Some(status),
                Err(report) => Some(status_or_abort(&registration.name, report)?),
            };
            if let Some(status) = failed {
                outcomes[index].1 = GateOutcome::new(&registration.name, status);
            }
        }

        Ok(PassReport::new(outcomes))
    }
}

fn first_unready<'a>(
    outcomes: &'a [(String, GateOutcome)],
    depends_on: &[String],
) -> Option<&'a GateOutcome> {
    depends_on.iter().find_map(|dependency| {
        outcomes
            .iter()
            .find(|(name, _)| name == dependency)
            .map(|(_, outcome)| outcome)
            .filter(|outcome| !outcome.status.is_active())
    })
}

async fn own_status(registration: &Registration) -> CharmResult<Status> {
    match registration.component.status().await {
        Ok(status) => Ok(status),
        Err(report) => status_or_abort(&registration.name, report),
    }
}

/// Converts status-bearing errors into their status; anything else aborts.
fn status_or_abort(component: &str, report: Report<CharmError>) -> CharmResult<Status> {
    match report.current_context().target_status() {
        Some(status) => {
            warn!(component, error = ?report, "component reported an error status");
            Ok(status)
        }
        None => Err(report.attach_printable(format!("while handling component {component}"))),
    }
}
