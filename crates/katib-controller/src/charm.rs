use std::sync::Arc;

use charm_core::certs::CertificateComponent;
use charm_core::certs::CertificateGenerator;
use charm_core::certs::CertificateState;
use charm_core::chain::DependencyChain;
use charm_core::chain::PassReport;
use charm_core::context::ManifestContext;
use charm_core::event::HookEvent;
use charm_core::gates::LeadershipGate;
use charm_core::gates::LEADERSHIP_GATE;
use charm_core::kubernetes::KubernetesComponent;
use charm_core::kubernetes::KubernetesResourceHandler;
use charm_core::kubernetes::ResourceClient;
use charm_core::model::CharmModel;
use charm_core::observability::DashboardTemplate;
use charm_core::observability::GrafanaDashboardProvider;
use charm_core::observability::LogForwarder;
use charm_core::observability::MetricsEndpointProvider;
use charm_core::observability::ScrapeJob;
use charm_core::observability::GRAFANA_DASHBOARD_RELATION;
use charm_core::observability::LOGGING_RELATION;
use charm_core::observability::METRICS_ENDPOINT_RELATION;
use charm_core::pebble::PebbleServiceComponent;
use charm_core::pebble::Workload;
use charm_core::runtime::load_config;
use charm_core::runtime::publish_status;
use charm_core::service_info::ServiceInfoRequirer;
use charm_core::service_info::DEFAULT_RELATION_NAME;
use charm_core::service_mesh::ServiceMeshComponent;
use charm_core::state::StateStore;
use charm_core::CharmResult;
use charm_core::Check;

use crate::config::ControllerConfig;
use crate::inputs::controller_inputs;
use crate::inputs::MANIFESTS;
use crate::workload::ControllerLayer;
use crate::workload::CONTAINER;

pub const CERTIFICATES: &str = "certificates";
pub const KUBERNETES_RESOURCES: &str = "kubernetes:auth-crds-webhooks";
pub const SERVICE_INFO: &str = "relation:k8s-service-info";
pub const PEBBLE_SERVICE: &str = "katib-controller-pebble-service";
pub const SERVICE_MESH: &str = "service-mesh";
pub const METRICS_ENDPOINT: &str = "metrics-endpoint-provider";
pub const GRAFANA_DASHBOARD: &str = "grafana-dashboard-provider";
pub const LOG_FORWARDING: &str = "log-forwarding";

const CHARM_NAME: &str = "katib-controller";
const METRICS_JOB: &str = "katib_controller_metrics";

const DASHBOARDS: [DashboardTemplate; 1] = [DashboardTemplate {
    name: "katib-controller.json",
    text: include_str!("grafana_dashboards/katib-controller.json"),
}];

/// External systems the charm talks to.
pub struct Backends {
    pub resources: Arc<dyn ResourceClient>,
    pub workload: Arc<dyn Workload>,
    pub certificate_generator: Box<dyn CertificateGenerator>,
    pub state: Arc<StateStore<CertificateState>>,
}

pub struct KatibControllerCharm {
    model: Arc<dyn CharmModel>,
    chain: DependencyChain,
}

impl KatibControllerCharm {
    pub fn new(model: Arc<dyn CharmModel>, backends: Backends) -> CharmResult<Self> {
        let config: ControllerConfig = load_config(model.as_ref())?;
        let mut chain = DependencyChain::new();

        chain.add(
            LEADERSHIP_GATE,
            Arc::new(LeadershipGate::new(model.clone())),
            &[],
        )?;

        chain.add(
            CERTIFICATES,
            Arc::new(CertificateComponent::new(
                backends.certificate_generator,
                backends.state.clone(),
                model.app_name(),
                model.model_name(),
            )),
            &[LEADERSHIP_GATE],
        )?;

        let context_model = model.clone();
        let context_state = backends.state.clone();
        chain.add(
            KUBERNETES_RESOURCES,
            Arc::new(KubernetesComponent::new(
                KubernetesResourceHandler::new(
                    backends.resources.clone(),
                    model.app_name(),
                    model.model_name(),
                    "auth-crds-webhooks",
                    MANIFESTS.to_vec(),
                ),
                Box::new(move || -> CharmResult<Check<ManifestContext>> {
                    Ok(controller_inputs(context_model.as_ref(), &context_state)?
                        .map(|inputs| inputs.context))
                }),
            )),
            &[LEADERSHIP_GATE, CERTIFICATES],
        )?;

        let db_manager = Arc::new(ServiceInfoRequirer::new(
            model.clone(),
            DEFAULT_RELATION_NAME,
        ));
        chain.add(SERVICE_INFO, db_manager.clone(), &[LEADERSHIP_GATE])?;

        chain.add(
            SERVICE_MESH,
            Arc::new(ServiceMeshComponent::new(model.clone(), backends.resources)),
            &[LEADERSHIP_GATE],
        )?;

        chain.add(
            PEBBLE_SERVICE,
            Arc::new(PebbleServiceComponent::new(
                backends.workload.clone(),
                CONTAINER,
                Box::new(ControllerLayer::new(
                    model.clone(),
                    backends.state,
                    db_manager,
                )),
            )),
            &[KUBERNETES_RESOURCES, SERVICE_INFO],
        )?;

        // Unit-level, so these run on followers too.
        chain.add(
            METRICS_ENDPOINT,
            Arc::new(MetricsEndpointProvider::new(
                model.clone(),
                METRICS_ENDPOINT_RELATION,
                CHARM_NAME,
                vec![ScrapeJob::all_units(METRICS_JOB, config.metrics_port)],
            )),
            &[],
        )?;
        chain.add(
            LOG_FORWARDING,
            Arc::new(LogForwarder::new(
                model.clone(),
                backends.workload,
                LOGGING_RELATION,
            )),
            &[],
        )?;

        chain.add(
            GRAFANA_DASHBOARD,
            Arc::new(GrafanaDashboardProvider::new(
                model.clone(),
                GRAFANA_DASHBOARD_RELATION,
                CHARM_NAME,
                DASHBOARDS.to_vec(),
            )),
            &[LEADERSHIP_GATE],
        )?;

        Ok(Self { model, chain })
    }

    /// Runs the pass for `event` and shows its outcome on the unit.
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
    use charm_core::model::Relation;
    use charm_core::testing::FakeCertificateGenerator;
    use charm_core::testing::FakeModel;
    use charm_core::testing::FakeResourceClient;
    use charm_core::testing::FakeWorkload;
    use charm_core::Status;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    struct Harness {
        dir: tempfile::TempDir,
        model: Arc<FakeModel>,
        resources: Arc<FakeResourceClient>,
        workload: Arc<FakeWorkload>,
        charm: KatibControllerCharm,
    }

    fn harness(leader: bool) -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let model = Arc::new(FakeModel::new("katib-controller", "Kubeflow"));
        model.set_leader(leader);
        let resources = Arc::new(FakeResourceClient::new());
        let workload = Arc::new(FakeWorkload::new(CONTAINER));
        let state = Arc::new(StateStore::open(dir.path().join("state.json")).expect("state"));

        let charm = KatibControllerCharm::new(
            model.clone(),
            Backends {
                resources: resources.clone(),
                workload: workload.clone(),
                certificate_generator: Box::new(FakeCertificateGenerator::new()),
                state,
            },
        )
        .expect("charm");

        Harness {
            dir,
            model,
            resources,
            workload,
            charm,
        }
    }

    fn relate_db_manager(model: &FakeModel) -> Relation {
        let relation = model.add_relation(DEFAULT_RELATION_NAME, "katib-db-manager");
        model.set_remote_app_data(&relation, [("name", "katib-db-manager"), ("port", "6789")]);
        relation
    }

    #[test(tokio::test)]
    async fn non_leader_waits_on_leadership_gate() {
        let harness = harness(false);

        let report = harness.charm.handle(&HookEvent::Install).await.expect("pass");

        assert!(!report.unit_status.status.is_active());
        assert!(report.unit_status.message.starts_with("[leadership-gate]"));
        assert_eq!(harness.resources.mutations(), 0);
        assert_eq!(harness.model.last_status(), Some(report.unit_status));
    }

    #[test(tokio::test)]
    async fn leader_applies_all_resources_and_starts_workload() {
        let harness = harness(true);
        relate_db_manager(&harness.model);

        let report = harness.charm.handle(&HookEvent::Install).await.expect("pass");

        assert_eq!(report.unit_status.status, Status::Active);
        assert_eq!(harness.resources.len(), 10);

        let layer = harness.workload.layer(CONTAINER).expect("layer");
        let service = &layer.services[CONTAINER];
        assert_eq!(
            service.command,
            "./katib-controller --katib-config=/katib-config/katib-config.yaml"
        );
        assert_eq!(service.environment["KATIB_CORE_NAMESPACE"], "kubeflow");
        assert_eq!(service.environment["KATIB_DB_MANAGER_SERVICE_PORT"], "6789");

        for path in [
            "/tmp/cert/tls.crt",
            "/tmp/cert/tls.key",
            "/tmp/cert/ca.crt",
            "/katib-config/katib-config.yaml",
        ] {
            assert!(harness.workload.file(path).is_some(), "{path} not pushed");
        }
    }

    #[test(tokio::test)]
    async fn second_pass_changes_nothing() {
        let harness = harness(true);
        relate_db_manager(&harness.model);
        harness.charm.handle(&HookEvent::Install).await.expect("first");
        let mutations = harness.resources.mutations();

        harness
            .charm
            .handle(&HookEvent::UpdateStatus)
            .await
            .expect("second");

        assert_eq!(harness.resources.mutations(), mutations);
        assert_eq!(harness.workload.layers_added(), 1);
    }

    #[test(tokio::test)]
    async fn malformed_custom_images_blocks_without_applying() {
        let harness = harness(true);
        harness
            .model
            .set_config(serde_json::json!({"custom_images": "default_trial_template: [oops"}));

        let report = harness
            .charm
            .handle(&HookEvent::ConfigChanged)
            .await
            .expect("pass");

        assert!(matches!(report.unit_status.status, Status::Blocked(_)));
        assert!(report
            .unit_status
            .message
            .starts_with("[kubernetes:auth-crds-webhooks] Error parsing the 'custom_images' config option"));
        assert_eq!(harness.resources.mutations(), 0);
    }

    #[test(tokio::test)]
    async fn custom_trial_image_reaches_trial_template() {
        let harness = harness(true);
        harness.model.set_config(serde_json::json!({
            "custom_images": "{\"default_trial_template\": \"custom:1.0\"}"
        }));

        harness.charm.handle(&HookEvent::ConfigChanged).await.expect("pass");

        let trial_template = harness
            .resources
            .find("ConfigMap", "trial-template")
            .expect("trial-template");
        let data = &trial_template.data["data"];
        let default_template = data["defaultTrialTemplate.yaml"].as_str().expect("template");
        assert!(default_template.contains("image: custom:1.0"));
        assert!(default_template.contains("--lr=${trialParameters.learningRate}"));
        let pytorch = data["pytorchJobTemplate"].as_str().expect("pytorch");
        assert!(pytorch.contains("image: ghcr.io/kubeflow/katib/pytorch-mnist-cpu:v0.18.0"));
    }

    #[test(tokio::test)]
    async fn webhooks_carry_encoded_ca() {
        let harness = harness(true);

        harness.charm.handle(&HookEvent::Install).await.expect("pass");

        let validating = harness
            .resources
            .find("ValidatingWebhookConfiguration", "katib.kubeflow.org")
            .expect("validating webhook");
        let ca_bundle = validating.data["webhooks"][0]["clientConfig"]["caBundle"]
            .as_str()
            .expect("caBundle");
        assert!(!ca_bundle.is_empty());
        assert!(!ca_bundle.contains("BEGIN"));

        let katib_config = harness
            .resources
            .find("ConfigMap", "katib-config")
            .expect("katib-config");
        let embedded = katib_config.data["data"]["katib-config.yaml"]
            .as_str()
            .expect("katib-config.yaml");
        assert!(embedded.starts_with("apiVersion: config.kubeflow.org/v1beta1"));
    }

    #[test(tokio::test)]
    async fn missing_db_manager_relation_blocks_workload() {
        let harness = harness(true);

        let report = harness.charm.handle(&HookEvent::Install).await.expect("pass");

        assert_eq!(
            report.unit_status.message,
            "[relation:k8s-service-info] Missing relation with a k8s service info provider. Please add the missing relation."
        );
        assert_eq!(harness.workload.layers_added(), 0);
    }

    #[test(tokio::test)]
    async fn unreachable_pebble_waits() {
        let harness = harness(true);
        relate_db_manager(&harness.model);
        harness.workload.set_reachable(false);

        let report = harness
            .charm
            .handle(&HookEvent::PebbleReady {
                container: CONTAINER.to_string(),
            })
            .await
            .expect("pass");

        assert_eq!(
            report.unit_status.message,
            "[katib-controller-pebble-service] Waiting for Pebble to be ready."
        );
        assert_eq!(harness.resources.len(), 10);
    }

    #[test(tokio::test)]
    async fn publishes_scrape_job_on_configured_metrics_port() {
        let harness = harness(true);
        harness.model.set_config(serde_json::json!({"metrics-port": 9090}));
        let charm = KatibControllerCharm::new(
            harness.model.clone(),
            Backends {
                resources: harness.resources.clone(),
                workload: harness.workload.clone(),
                certificate_generator: Box::new(FakeCertificateGenerator::new()),
                state: Arc::new(
                    StateStore::open(harness.dir.path().join("other.json")).expect("state"),
                ),
            },
        )
        .expect("charm");
        let prometheus = harness
            .model
            .add_relation(METRICS_ENDPOINT_RELATION, "prometheus-k8s");
        let grafana = harness
            .model
            .add_relation(GRAFANA_DASHBOARD_RELATION, "grafana-k8s");

        charm.handle(&HookEvent::Install).await.expect("pass");

        let jobs: serde_json::Value =
            serde_json::from_str(&harness.model.local_app_data(&prometheus)["scrape_jobs"])
                .expect("jobs");
        assert_eq!(jobs[0]["job_name"], "katib_controller_metrics");
        assert_eq!(jobs[0]["static_configs"][0]["targets"][0], "*:9090");

        let dashboards: serde_json::Value =
            serde_json::from_str(&harness.model.local_app_data(&grafana)["dashboards"])
                .expect("dashboards");
        assert_eq!(
            dashboards["templates"]["file:katib-controller.json"]["charm"],
            "katib-controller"
        );
    }

    #[test(tokio::test)]
    async fn mesh_relation_adds_allow_all_policy() {
        let harness = harness(true);
        relate_db_manager(&harness.model);
        harness
            .model
            .add_relation("service-mesh", "istio-beacon-k8s");

        let report = harness.charm.handle(&HookEvent::Install).await.expect("pass");

        assert_eq!(report.unit_status.status, Status::Active);
        assert_eq!(harness.resources.len(), 11);
        assert!(harness
            .resources
            .find("AuthorizationPolicy", "katib-controller-allow-all")
            .is_some());
    }

    #[test(tokio::test)]
    async fn follower_still_forwards_logs() {
        let harness = harness(false);
        let loki = harness.model.add_relation("logging", "loki-k8s");
        harness.model.set_remote_unit_data(
            &loki,
            "loki-k8s/0",
            [("endpoint", r#"{"url": "http://loki-k8s-0:3100/loki/api/v1/push"}"#)],
        );

        harness.charm.handle(&HookEvent::Install).await.expect("pass");

        let layer = harness.workload.layer("log-forwarding").expect("layer");
        assert!(layer.log_targets.contains_key("loki-k8s-0"));
        assert_eq!(harness.resources.mutations(), 0);
    }

    #[test(tokio::test)]
    async fn remove_deletes_resources_on_leader() {
        let harness = harness(true);
        relate_db_manager(&harness.model);
        harness.charm.handle(&HookEvent::Install).await.expect("install");

        harness.charm.handle(&HookEvent::Remove).await.expect("remove");

        assert!(harness.resources.is_empty());
    }
}
