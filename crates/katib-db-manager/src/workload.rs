use std::collections::BTreeMap;
use std::sync::Arc;

use charm_core::check;
use charm_core::model::CharmModel;
use charm_core::pebble::CheckAction;
use charm_core::pebble::CheckLevel;
use charm_core::pebble::CheckSpec;
use charm_core::pebble::ExecCheck;
use charm_core::pebble::Layer;
use charm_core::pebble::LayerBuilder;
use charm_core::pebble::Override;
use charm_core::pebble::Service;
use charm_core::runtime::load_config;
use charm_core::CharmResult;
use charm_core::Check;

use crate::config::DbManagerConfig;
use crate::database::DatabaseRequirer;

pub const CONTAINER: &str = "katib-db-manager";
pub const HEALTH_CHECK: &str = "katib-db-manager-up";

/// Pebble layer of the `katib-db-manager` container.
pub struct DbManagerLayer {
    model: Arc<dyn CharmModel>,
    database: Arc<DatabaseRequirer>,
}

impl DbManagerLayer {
    pub fn new(model: Arc<dyn CharmModel>, database: Arc<DatabaseRequirer>) -> Self {
        Self { model, database }
    }
}

impl LayerBuilder for DbManagerLayer {
    fn layer(&self) -> CharmResult<Check<Layer>> {
        let config: DbManagerConfig = load_config(self.model.as_ref())?;
        let database = check!(self.database.database_info());

        let environment = BTreeMap::from([
            ("DB_NAME".to_string(), "mysql".to_string()),
            ("DB_USER".to_string(), database.user),
            ("DB_PASSWORD".to_string(), database.password),
            ("KATIB_MYSQL_DB_HOST".to_string(), database.host),
            ("KATIB_MYSQL_DB_PORT".to_string(), database.port),
            ("KATIB_MYSQL_DB_DATABASE".to_string(), database.database),
        ]);

        Ok(Check::Pass(Layer {
            summary: "katib-db-manager layer".to_string(),
            description: "Pebble config layer for katib-db-manager".to_string(),
            services: BTreeMap::from([(
                CONTAINER.to_string(),
                Service {
                    summary: "entrypoint of the katib-db-manager-operator image".to_string(),
                    command: "./katib-db-manager".to_string(),
                    environment,
                    on_check_failure: BTreeMap::from([(
                        HEALTH_CHECK.to_string(),
                        CheckAction::Restart,
                    )]),
                    ..Service::default()
                },
            )]),
            checks: BTreeMap::from([(
                HEALTH_CHECK.to_string(),
                CheckSpec {
                    override_: Override::Replace,
                    level: Some(CheckLevel::Alive),
                    period: Some("60s".to_string()),
                    threshold: Some(5),
                    exec: Some(ExecCheck {
                        command: format!("/bin/grpc_health_probe -addr=:{}", config.port),
                    }),
                    http: None,
                    tcp: None,
                },
            )]),
            ..Layer::default()
        }))
    }
}
