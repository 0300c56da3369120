use std::collections::BTreeMap;
use std::sync::Arc;

use charm_core::model::CharmModel;
use charm_core::pebble::Layer;
use charm_core::pebble::LayerBuilder;
use charm_core::pebble::Service;
use charm_core::runtime::load_config;
use charm_core::CharmResult;
use charm_core::Check;

use crate::config::UiConfig;

pub const CONTAINER: &str = "katib-ui";

pub struct UiLayer {
    model: Arc<dyn CharmModel>,
}

impl UiLayer {
    pub fn new(model: Arc<dyn CharmModel>) -> Self {
        Self { model }
    }
}

impl LayerBuilder for UiLayer {
    fn layer(&self) -> CharmResult<Check<Layer>> {
        let config: UiConfig = load_config(self.model.as_ref())?;

        Ok(Check::Pass(Layer {
            summary: "katib-ui layer".to_string(),
            description: "Pebble config layer for katib-ui".to_string(),
            services: BTreeMap::from([(
                CONTAINER.to_string(),
                Service {
                    summary: "entrypoint of the katib-ui-operator image".to_string(),
                    command: format!("./katib-ui --port={}", config.port),
                    working_dir: Some("/app".to_string()),
                    environment: BTreeMap::from([(
                        "KATIB_CORE_NAMESPACE".to_string(),
                        self.model.model_name().to_string(),
                    )]),
                    ..Service::default()
                },
            )]),
            ..Layer::default()
        }))
    }
}
