use std::collections::BTreeMap;
use std::sync::Arc;

use charm_core::certs::CertificateState;
use charm_core::check;
use charm_core::model::CharmModel;
use charm_core::pebble::Layer;
use charm_core::pebble::LayerBuilder;
use charm_core::pebble::Service;
use charm_core::pebble::WorkloadFile;
use charm_core::service_info::ServiceInfoRequirer;
use charm_core::state::StateStore;
use charm_core::CharmResult;
use charm_core::Check;
use tracing::info;

use crate::inputs::controller_inputs;

pub const CONTAINER: &str = "katib-controller";

const KATIB_CONFIG_PATH: &str = "/katib-config/katib-config.yaml";
const CERT_DIR: &str = "/tmp/cert";

/// Pebble layer and files of the `katib-controller` container.
pub struct ControllerLayer {
    model: Arc<dyn CharmModel>,
    certs: Arc<StateStore<CertificateState>>,
    db_manager: Arc<ServiceInfoRequirer>,
}

impl ControllerLayer {
    pub fn new(
        model: Arc<dyn CharmModel>,
        certs: Arc<StateStore<CertificateState>>,
        db_manager: Arc<ServiceInfoRequirer>,
    ) -> Self {
        Self {
            model,
            certs,
            db_manager,
        }
    }
}

impl LayerBuilder for ControllerLayer {
    fn layer(&self) -> CharmResult<Check<Layer>> {
        info!("building katib-controller pebble layer");
        let db_manager = check!(self.db_manager.service_info());

        let environment = BTreeMap::from([
            (
                "KATIB_CORE_NAMESPACE".to_string(),
                self.model.model_name().to_lowercase(),
            ),
            ("KATIB_DB_MANAGER_SERVICE_PORT".to_string(), db_manager.port),
        ]);

        Ok(Check::Pass(Layer {
            summary: "katib-controller layer".to_string(),
            description: "Pebble config layer for katib-controller".to_string(),
            services: BTreeMap::from([(
                CONTAINER.to_string(),
                Service {
                    summary: "Entry point for katib-controller image".to_string(),
                    command: format!("./katib-controller --katib-config={KATIB_CONFIG_PATH}"),
                    environment,
                    ..Service::default()
                },
            )]),
            ..Layer::default()
        }))
    }

    fn files(&self) -> CharmResult<Check<Vec<WorkloadFile>>> {
        let inputs = check!(controller_inputs(self.model.as_ref(), &self.certs));
        Ok(Check::Pass(vec![
            WorkloadFile::new(format!("{CERT_DIR}/tls.crt"), inputs.certs.cert),
            WorkloadFile::new(format!("{CERT_DIR}/tls.key"), inputs.certs.key),
            WorkloadFile::new(format!("{CERT_DIR}/ca.crt"), inputs.certs.ca),
            WorkloadFile::new(KATIB_CONFIG_PATH, inputs.katib_config),
        ]))
    }
}
