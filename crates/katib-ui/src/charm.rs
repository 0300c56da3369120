use std::sync::Arc;

use charm_core::chain::DependencyChain;
use charm_core::chain::PassReport;
use charm_core::context::ManifestContext;
use charm_core::context::ManifestContextBuilder;
use charm_core::dashboard_links::DashboardLink;
use charm_core::dashboard_links::DashboardLinksRequirer;
use charm_core::event::HookEvent;
use charm_core::gates::LeadershipGate;
use charm_core::gates::LEADERSHIP_GATE;
use charm_core::kubernetes::KubernetesComponent;
use charm_core::kubernetes::KubernetesResourceHandler;
use charm_core::kubernetes::ManifestTemplate;
use charm_core::kubernetes::ResourceClient;
use charm_core::model::CharmModel;
use charm_core::observability::LogForwarder;
use charm_core::observability::LOGGING_RELATION;
use charm_core::pebble::PebbleServiceComponent;
use charm_core::pebble::Workload;
use charm_core::runtime::load_config;
use charm_core::runtime::publish_status;
use charm_core::CharmResult;
use charm_core::Check;

use crate::config::UiConfig;
use crate::ingress::IngressComponent;
use crate::workload::UiLayer;
use crate::workload::CONTAINER;

pub const INGRESS: &str = "relation:ingress";
pub const KUBERNETES_RESOURCES: &str = "kubernetes:auth-service";
pub const PEBBLE_SERVICE: &str = "katib-ui-pebble-service";
pub const DASHBOARD_LINKS: &str = "kubeflow-dashboard-links";
pub const LOG_FORWARDING: &str = "log-forwarding";

const MANIFESTS: [ManifestTemplate; 2] = [
    ManifestTemplate {
        name: "auth_manifests.yaml",
        text: include_str!("templates/auth_manifests.yaml"),
    },
    ManifestTemplate {
        name: "service.yaml",
        text: include_str!("templates/service.yaml"),
    },
];

pub struct KatibUiCharm {
    model: Arc<dyn CharmModel>,
    chain: DependencyChain,
}

impl KatibUiCharm {
    pub fn new(
        model: Arc<dyn CharmModel>,
        resources: Arc<dyn ResourceClient>,
        workload: Arc<dyn Workload>,
    ) -> CharmResult<Self> {
        let config: UiConfig = load_config(model.as_ref())?;
        let mut chain = DependencyChain::new();

        chain.add(
            LEADERSHIP_GATE,
            Arc::new(LeadershipGate::new(model.clone())),
            &[],
        )?;

        chain.add(
            INGRESS,
            Arc::new(IngressComponent::new(model.clone(), config.port)),
            &[LEADERSHIP_GATE],
        )?;

        let context = ManifestContextBuilder::new()
            .with("app_name", model.app_name())
            .with("namespace", model.model_name())
            .with("port", config.port)
            .build();
        chain.add(
            KUBERNETES_RESOURCES,
            Arc::new(KubernetesComponent::new(
                KubernetesResourceHandler::new(
                    resources,
                    model.app_name(),
                    model.model_name(),
                    "auth-service",
                    MANIFESTS.to_vec(),
                ),
                Box::new(move || -> CharmResult<Check<ManifestContext>> {
                    Ok(Check::Pass(context.clone()))
                }),
            )),
            &[LEADERSHIP_GATE],
        )?;

        chain.add(
            DASHBOARD_LINKS,
            Arc::new(DashboardLinksRequirer::new(
                model.clone(),
                vec![DashboardLink::menu_item(
                    "Experiments (AutoML)",
                    "/katib/",
                    "kubeflow:katib",
                )],
            )),
            &[LEADERSHIP_GATE],
        )?;

        chain.add(
            PEBBLE_SERVICE,
            Arc::new(PebbleServiceComponent::new(
                workload.clone(),
                CONTAINER,
                Box::new(UiLayer::new(model.clone())),
            )),
            &[KUBERNETES_RESOURCES],
        )?;

        chain.add(
            LOG_FORWARDING,
            Arc::new(LogForwarder::new(model.clone(), workload, LOGGING_RELATION)),
            &[],
        )?;

        Ok(Self { model, chain })
    }

    #[tracing::instrument(skip(self), fields(app = %self.model.app_name()))]
    pub async fn handle(&self, event: &HookEvent) -> CharmResult<PassReport> {
        let report = match event {
            HookEvent::Remove => self.chain.remove(event).await?,
            HookEvent::Stop => self.chain.evaluate().await?,
            HookEvent::Install
            | HookEvent::Start
            | HookEvent::ConfigChanged
            | HookEvent::LeaderElected
            | HookEvent::LeaderSettingsChanged
            | HookEvent::UpgradeCharm
            | HookEvent::UpdateStatus
            | HookEvent::PebbleReady { .. }
            | HookEvent::Relation { .. } => self.chain.execute(event).await?,
        };
        publish_status(self.model.as_ref(), &report)?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use charm_core::testing::FakeModel;
    use charm_core::testing::FakeResourceClient;
    use charm_core::testing::FakeWorkload;
    use charm_core::Status;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::ingress::ISTIO_INGRESS_ROUTE_RELATION;

    fn charm(
        model: &Arc<FakeModel>,
        resources: &Arc<FakeResourceClient>,
        workload: &Arc<FakeWorkload>,
    ) -> KatibUiCharm {
        KatibUiCharm::new(model.clone(), resources.clone(), workload.clone()).expect("charm")
    }

    fn leader_model() -> Arc<FakeModel> {
        let model = Arc::new(FakeModel::new("katib-ui", "Kubeflow"));
        model.set_leader(true);
        model
    }

    #[test(tokio::test)]
    async fn install_starts_ui_on_configured_port() {
        let model = leader_model();
        model.set_config(serde_json::json!({"port": 9090}));
        let resources = Arc::new(FakeResourceClient::new());
        let workload = Arc::new(FakeWorkload::new(CONTAINER));

        let report = charm(&model, &resources, &workload)
            .handle(&HookEvent::Install)
            .await
            .expect("pass");

        assert_eq!(report.unit_status.status, Status::Active);
        assert_eq!(resources.len(), 3);
        let ui_service = resources.find("Service", "katib-ui").expect("service");
        assert_eq!(ui_service.data["spec"]["ports"][0]["name"], "http");
        assert_eq!(ui_service.data["spec"]["ports"][0]["port"], 9090);
        assert_eq!(ui_service.data["spec"]["ports"][0]["targetPort"], 9090);
        let layer = workload.layer(CONTAINER).expect("layer");
        let service = &layer.services[CONTAINER];
        assert_eq!(service.command, "./katib-ui --port=9090");
        assert_eq!(service.working_dir.as_deref(), Some("/app"));
        assert_eq!(service.summary, "entrypoint of the katib-ui-operator image");
        assert_eq!(service.environment["KATIB_CORE_NAMESPACE"], "Kubeflow");
    }

    #[test(tokio::test)]
    async fn conflicting_ingress_relations_block_but_keep_rbac() {
        let model = leader_model();
        model.add_relation("ingress", "istio-pilot");
        model.add_relation(ISTIO_INGRESS_ROUTE_RELATION, "istio-pilot");
        let resources = Arc::new(FakeResourceClient::new());
        let workload = Arc::new(FakeWorkload::new(CONTAINER));

        let report = charm(&model, &resources, &workload)
            .handle(&HookEvent::ConfigChanged)
            .await
            .expect("pass");

        assert!(matches!(report.unit_status.status, Status::Blocked(_)));
        assert!(report.unit_status.message.starts_with("[relation:ingress]"));
        assert_eq!(resources.len(), 3);
    }

    #[test(tokio::test)]
    async fn ambient_route_and_menu_link_published() {
        let model = leader_model();
        let route = model.add_relation(ISTIO_INGRESS_ROUTE_RELATION, "istio-ingress-k8s");
        let dashboard = model.add_relation("dashboard-links", "kubeflow-dashboard");
        let resources = Arc::new(FakeResourceClient::new());
        let workload = Arc::new(FakeWorkload::new(CONTAINER));

        let report = charm(&model, &resources, &workload)
            .handle(&HookEvent::Install)
            .await
            .expect("pass");

        assert_eq!(report.unit_status.status, Status::Active);
        let config: serde_json::Value =
            serde_json::from_str(&model.local_app_data(&route)["config"]).expect("route");
        let backend = &config["http_routes"][0]["backends"][0];
        assert_eq!(backend["service"], "katib-ui");
        // Same port the Service exposes.
        let ui_service = resources.find("Service", "katib-ui").expect("service");
        assert_eq!(backend["port"], ui_service.data["spec"]["ports"][0]["port"]);

        let links: serde_json::Value = serde_json::from_str(
            &model.local_app_data(&dashboard)["kubeflow_dashboard_links"],
        )
        .expect("links");
        assert_eq!(links[0]["link"], "/katib/");
        assert_eq!(links[0]["location"], "menu");
    }

    #[test(tokio::test)]
    async fn non_leader_waits() {
        let model = Arc::new(FakeModel::new("katib-ui", "kubeflow"));
        let resources = Arc::new(FakeResourceClient::new());
        let workload = Arc::new(FakeWorkload::new(CONTAINER));

        let report = charm(&model, &resources, &workload)
            .handle(&HookEvent::LeaderSettingsChanged)
            .await
            .expect("pass");

        assert_eq!(
            report.unit_status.message,
            "[leadership-gate] Waiting for leadership"
        );
        assert!(resources.is_empty());
        assert_eq!(workload.layers_added(), 0);
    }

    #[test(tokio::test)]
    async fn stop_reports_without_acting() {
        let model = leader_model();
        let resources = Arc::new(FakeResourceClient::new());
        let workload = Arc::new(FakeWorkload::new(CONTAINER));

        let report = charm(&model, &resources, &workload)
            .handle(&HookEvent::Stop)
            .await
            .expect("pass");

        assert!(matches!(report.unit_status.status, Status::Waiting(_)));
        assert_eq!(resources.mutations(), 0);
    }
}
