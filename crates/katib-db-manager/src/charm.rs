use std::sync::Arc;

use charm_core::chain::DependencyChain;
use charm_core::chain::PassReport;
use charm_core::context::ManifestContext;
use charm_core::context::ManifestContextBuilder;
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
use charm_core::service_info::ServiceInfoProvider;
use charm_core::service_info::DEFAULT_RELATION_NAME;
use charm_core::CharmResult;
use charm_core::Check;

use crate::config::DbManagerConfig;
use crate::database::DatabaseRequirer;
use crate::workload::DbManagerLayer;
use crate::workload::CONTAINER;

pub const DATABASE: &str = "relation:database";
pub const KUBERNETES_RESOURCES: &str = "kubernetes:auth-service";
pub const SERVICE_INFO: &str = "k8s-service-info-provider";
pub const PEBBLE_SERVICE: &str = "katib-db-manager-pebble-service";
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

pub struct KatibDbManagerCharm {
    model: Arc<dyn CharmModel>,
    chain: DependencyChain,
}

impl KatibDbManagerCharm {
    pub fn new(
        model: Arc<dyn CharmModel>,
        resources: Arc<dyn ResourceClient>,
        workload: Arc<dyn Workload>,
    ) -> CharmResult<Self> {
        let config: DbManagerConfig = load_config(model.as_ref())?;
        let mut chain = DependencyChain::new();

        chain.add(
            LEADERSHIP_GATE,
            Arc::new(LeadershipGate::new(model.clone())),
            &[],
        )?;

        let database = Arc::new(DatabaseRequirer::new(model.clone()));
        chain.add(DATABASE, database.clone(), &[LEADERSHIP_GATE])?;

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
            SERVICE_INFO,
            Arc::new(ServiceInfoProvider::new(
                model.clone(),
                DEFAULT_RELATION_NAME,
                model.app_name(),
                config.port,
            )),
            &[LEADERSHIP_GATE],
        )?;

        chain.add(
            PEBBLE_SERVICE,
            Arc::new(PebbleServiceComponent::new(
                workload.clone(),
                CONTAINER,
                Box::new(DbManagerLayer::new(model.clone(), database)),
            )),
            &[KUBERNETES_RESOURCES, DATABASE],
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
    use charm_core::event::RelationEventKind;
    use charm_core::pebble::CheckAction;
    use charm_core::pebble::CheckState;
    use charm_core::testing::FakeModel;
    use charm_core::testing::FakeResourceClient;
    use charm_core::testing::FakeWorkload;
    use charm_core::Status;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::database::RELATIONAL_DB_RELATION;
    use crate::workload::HEALTH_CHECK;

    struct Harness {
        model: Arc<FakeModel>,
        resources: Arc<FakeResourceClient>,
        workload: Arc<FakeWorkload>,
        charm: KatibDbManagerCharm,
    }

    fn harness(leader: bool) -> Harness {
        let model = Arc::new(FakeModel::new("katib-db-manager", "kubeflow"));
        model.set_leader(leader);
        let resources = Arc::new(FakeResourceClient::new());
        let workload = Arc::new(FakeWorkload::new(CONTAINER));
        let charm = KatibDbManagerCharm::new(model.clone(), resources.clone(), workload.clone())
            .expect("charm");
        Harness {
            model,
            resources,
            workload,
            charm,
        }
    }

    fn relate_database(model: &FakeModel) {
        let relation = model.add_relation(RELATIONAL_DB_RELATION, "mysql-k8s");
        model.set_remote_app_data(
            &relation,
            [
                ("endpoints", "mysql-k8s-primary:3306"),
                ("username", "katib"),
                ("password", "pw"),
            ],
        );
    }

    fn relation_changed(relation: &str) -> HookEvent {
        HookEvent::Relation {
            relation: relation.to_string(),
            kind: RelationEventKind::Changed,
        }
    }

    #[test(tokio::test)]
    async fn missing_database_blocks() {
        let harness = harness(true);

        let report = harness.charm.handle(&HookEvent::Install).await.expect("pass");

        assert_eq!(
            report.unit_status.message,
            "[relation:database] Please add required database relation: eg. relational-db"
        );
        assert_eq!(harness.workload.layers_added(), 0);
        // RBAC and the Service do not depend on the database.
        assert_eq!(harness.resources.len(), 3);
        let service = harness
            .resources
            .find("Service", "katib-db-manager")
            .expect("service");
        assert_eq!(service.data["spec"]["ports"][0]["name"], "api");
        assert_eq!(service.data["spec"]["ports"][0]["port"], 6789);
    }

    #[test(tokio::test)]
    async fn both_database_relations_block() {
        let harness = harness(true);
        relate_database(&harness.model);
        harness.model.add_relation("mysql", "mysql");

        let report = harness
            .charm
            .handle(&relation_changed("mysql"))
            .await
            .expect("pass");

        assert!(matches!(report.unit_status.status, Status::Blocked(_)));
        assert!(report
            .unit_status
            .message
            .contains("Please remove the deprecated 'mysql' relation."));
    }

    #[test(tokio::test)]
    async fn related_database_configures_workload() {
        let harness = harness(true);
        relate_database(&harness.model);
        let controller = harness
            .model
            .add_relation(DEFAULT_RELATION_NAME, "katib-controller");

        let report = harness
            .charm
            .handle(&relation_changed(RELATIONAL_DB_RELATION))
            .await
            .expect("pass");

        assert_eq!(report.unit_status.status, Status::Active);

        let layer = harness.workload.layer(CONTAINER).expect("layer");
        let service = &layer.services[CONTAINER];
        assert_eq!(service.command, "./katib-db-manager");
        let environment: Vec<(&str, &str)> = service
            .environment
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect();
        assert_eq!(
            environment,
            vec![
                ("DB_NAME", "mysql"),
                ("DB_PASSWORD", "pw"),
                ("DB_USER", "katib"),
                ("KATIB_MYSQL_DB_DATABASE", "katib"),
                ("KATIB_MYSQL_DB_HOST", "mysql-k8s-primary"),
                ("KATIB_MYSQL_DB_PORT", "3306"),
            ]
        );
        assert_eq!(service.on_check_failure[HEALTH_CHECK], CheckAction::Restart);
        let check = &layer.checks[HEALTH_CHECK];
        assert_eq!(
            check.exec.as_ref().map(|exec| exec.command.as_str()),
            Some("/bin/grpc_health_probe -addr=:6789")
        );
        assert_eq!(check.period.as_deref(), Some("60s"));
        assert_eq!(check.threshold, Some(5));

        let published = harness.model.local_app_data(&controller);
        assert_eq!(published["name"], "katib-db-manager");
        assert_eq!(published["port"], "6789");
    }

    #[test(tokio::test)]
    async fn failing_health_check_is_maintenance() {
        let harness = harness(true);
        relate_database(&harness.model);
        harness.charm.handle(&HookEvent::Install).await.expect("install");
        harness
            .workload
            .set_check_state(HEALTH_CHECK, CheckState::Down);

        let report = harness
            .charm
            .handle(&HookEvent::UpdateStatus)
            .await
            .expect("pass");

        assert_eq!(
            report.unit_status.message,
            "[katib-db-manager-pebble-service] Workload failed health check"
        );
    }

    #[test(tokio::test)]
    async fn non_leader_does_not_remove_rbac() {
        let leader = harness(true);
        leader.charm.handle(&HookEvent::Install).await.expect("install");

        let follower_model = Arc::new(FakeModel::new("katib-db-manager", "kubeflow"));
        follower_model.set_leader(false);
        let follower = KatibDbManagerCharm::new(
            follower_model,
            leader.resources.clone(),
            Arc::new(FakeWorkload::new(CONTAINER)),
        )
        .expect("charm");

        follower.handle(&HookEvent::Remove).await.expect("remove");

        assert_eq!(leader.resources.len(), 3);
    }

    #[test(tokio::test)]
    async fn published_port_is_the_service_port() {
        let harness = harness(true);
        harness.model.set_config(serde_json::json!({"port": 7000}));
        let charm = KatibDbManagerCharm::new(
            harness.model.clone(),
            harness.resources.clone(),
            harness.workload.clone(),
        )
        .expect("charm");
        relate_database(&harness.model);
        let controller = harness
            .model
            .add_relation(DEFAULT_RELATION_NAME, "katib-controller");

        let report = charm
            .handle(&relation_changed(DEFAULT_RELATION_NAME))
            .await
            .expect("pass");
        assert_eq!(report.unit_status.status, Status::Active);

        let published = harness.model.local_app_data(&controller);
        let service = harness
            .resources
            .find("Service", &published["name"])
            .expect("published name is a Service");
        let ports = service.data["spec"]["ports"].as_array().expect("ports");
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0]["port"].to_string(), published["port"]);
        assert_eq!(ports[0]["targetPort"], 7000);
        assert_eq!(
            service.data["spec"]["selector"]["app.kubernetes.io/name"],
            "katib-db-manager"
        );
    }
}
