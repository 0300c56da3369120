use std::sync::Arc;

use async_trait::async_trait;
use error_stack::ResultExt;
use tracing::info;
use tracing::warn;

use super::layer::Layer;
use super::workload::CheckState;
use super::workload::Workload;
use crate::check;
use crate::component::Component;
use crate::error::CharmError;
use crate::error::CharmResult;
use crate::event::HookEvent;
use crate::status::Check;
use crate::status::Status;

/// A file pushed into the workload container before the layer is added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadFile {
    pub path: String,
    pub content: String,
}

impl WorkloadFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Per-charm description of the workload.
pub trait LayerBuilder: Send + Sync {
    fn layer(&self) -> CharmResult<Check<Layer>>;

    fn files(&self) -> CharmResult<Check<Vec<WorkloadFile>>> {
        Ok(Check::Pass(Vec::new()))
    }
}

/// Keeps one Pebble-managed service configured and running.
pub struct PebbleServiceComponent {
    workload: Arc<dyn Workload>,
    service_name: String,
    builder: Box<dyn LayerBuilder>,
}

impl PebbleServiceComponent {
    pub fn new(
        workload: Arc<dyn Workload>,
        service_name: impl Into<String>,
        builder: Box<dyn LayerBuilder>,
    ) -> Self {
        Self {
            workload,
            service_name: service_name.into(),
            builder,
        }
    }

    fn workload_failed(&self, action: &str) -> CharmError {
        CharmError::Workload {
            message: format!("{action} in container {}", self.workload.container()),
        }
    }
}

#[async_trait]
impl Component for PebbleServiceComponent {
    async fn status(&self) -> CharmResult<Status> {
        if !self.workload.can_connect() {
            return Ok(Status::waiting("Waiting for Pebble to be ready."));
        }
        let layer = check!(self.builder.layer());

        let service_names: Vec<&str> = layer.services.keys().map(String::as_str).collect();
        let services = self
            .workload
            .services(&service_names)
            .change_context_lazy(|| self.workload_failed("listing services"))?;
        let stopped: Vec<&str> = service_names
            .iter()
            .copied()
            .filter(|name| {
                !services
                    .iter()
                    .any(|service| service.name == *name && service.is_running())
            })
            .collect();
        if !stopped.is_empty() {
            return Ok(Status::waiting(format!(
                "Waiting for Pebble services ({}).  If this persists, it could be a blocking configuration error.",
                stopped.join(", ")
            )));
        }

        let check_names: Vec<&str> = layer.checks.keys().map(String::as_str).collect();
        if check_names.is_empty() {
            return Ok(Status::Active);
        }
        let checks = self
            .workload
            .check_statuses(&check_names)
            .change_context_lazy(|| self.workload_failed("listing checks"))?;
        if let Some(down) = checks.iter().find(|check| check.state == CheckState::Down) {
            warn!(check = %down.name, failures = down.failures, "workload health check is down");
            return Ok(Status::maintenance("Workload failed health check"));
        }
        Ok(Status::Active)
    }

    async fn reconcile(&self, _event: &HookEvent) -> CharmResult<Check<()>> {
        if !self.workload.can_connect() {
            return Ok(Check::Fail(Status::waiting("Waiting for Pebble to be ready.")));
        }

        let files = check!(self.builder.files());
        for file in &files {
            self.workload
                .push(&file.path, &file.content)
                .change_context_lazy(|| self.workload_failed("pushing files"))?;
        }

        let layer = check!(self.builder.layer());
        let plan = self
            .workload
            .plan()
            .change_context_lazy(|| self.workload_failed("reading the plan"))?;
        if layer.is_applied_in(&plan) {
            info!(service = %self.service_name, "pebble layer unchanged");
            return Ok(Check::Pass(()));
        }

        self.workload
            .add_layer(&self.service_name, &layer)
            .change_context_lazy(|| self.workload_failed("adding the layer"))?;
        self.workload
            .replan()
            .change_context_lazy(|| self.workload_failed("replanning"))?;
        info!(service = %self.service_name, "pebble layer updated and services replanned");
        Ok(Check::Pass(()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::pebble::layer::CheckSpec;
    use crate::pebble::layer::ExecCheck;
    use crate::pebble::layer::Override;
    use crate::pebble::layer::Service;
    use crate::testing::FakeWorkload;

    struct UiLayer;

    impl LayerBuilder for UiLayer {
        fn layer(&self) -> CharmResult<Check<Layer>> {
            Ok(Check::Pass(Layer {
                services: BTreeMap::from([(
                    "katib-ui".to_string(),
                    Service {
                        command: "./katib-ui --port=8080".to_string(),
                        ..Service::default()
                    },
                )]),
                checks: BTreeMap::from([(
                    "katib-ui-up".to_string(),
                    CheckSpec {
                        override_: Override::Replace,
                        level: None,
                        period: None,
                        threshold: None,
                        exec: Some(ExecCheck {
                            command: "true".to_string(),
                        }),
                        http: None,
                        tcp: None,
                    },
                )]),
                ..Layer::default()
            }))
        }

        fn files(&self) -> CharmResult<Check<Vec<WorkloadFile>>> {
            Ok(Check::Pass(vec![WorkloadFile::new("/app/config", "x")]))
        }
    }

    fn component(workload: Arc<FakeWorkload>) -> PebbleServiceComponent {
        PebbleServiceComponent::new(workload, "katib-ui", Box::new(UiLayer))
    }

    #[test(tokio::test)]
    async fn waits_for_pebble() {
        let workload = Arc::new(FakeWorkload::new("katib-ui"));
        workload.set_reachable(false);
        let component = component(workload.clone());

        let result = component
            .reconcile(&HookEvent::Install)
            .await
            .expect("reconcile");

        assert_eq!(
            result,
            Check::Fail(Status::waiting("Waiting for Pebble to be ready."))
        );
        assert_eq!(workload.layers_added(), 0);
    }

    #[test(tokio::test)]
    async fn pushes_files_and_adds_layer_once() {
        let workload = Arc::new(FakeWorkload::new("katib-ui"));
        let component = component(workload.clone());

        component
            .reconcile(&HookEvent::PebbleReady {
                container: "katib-ui".to_string(),
            })
            .await
            .expect("first");
        component
            .reconcile(&HookEvent::ConfigChanged)
            .await
            .expect("second");

        assert_eq!(workload.file("/app/config"), Some("x".to_string()));
        assert_eq!(workload.layers_added(), 1);
        assert_eq!(workload.replans(), 1);
        assert_eq!(component.status().await.expect("status"), Status::Active);
    }

    #[test(tokio::test)]
    async fn failing_check_is_maintenance() {
        let workload = Arc::new(FakeWorkload::new("katib-ui"));
        let component = component(workload.clone());
        component
            .reconcile(&HookEvent::Install)
            .await
            .expect("reconcile");

        workload.set_check_state("katib-ui-up", CheckState::Down);

        assert_eq!(
            component.status().await.expect("status"),
            Status::maintenance("Workload failed health check")
        );
    }

    #[test(tokio::test)]
    async fn unplanned_service_is_waiting() {
        let workload = Arc::new(FakeWorkload::new("katib-ui"));
        let component = component(workload);

        assert!(matches!(
            component.status().await.expect("status"),
            Status::Waiting(message) if message.starts_with("Waiting for Pebble services (katib-ui)")
        ));
    }
}
