//! Everything the controller's manifests and workload are rendered from.

use std::collections::BTreeMap;

use charm_core::certs::CertificateBundle;
use charm_core::certs::CertificateState;
use charm_core::context::merge_images;
use charm_core::context::parse_image_overrides;
use charm_core::context::ContextValue;
use charm_core::context::ManifestContext;
use charm_core::context::ManifestContextBuilder;
use charm_core::kubernetes::ManifestTemplate;
use charm_core::model::CharmModel;
use charm_core::runtime::load_config;
use charm_core::state::StateStore;
use charm_core::template;
use charm_core::CharmError;
use charm_core::CharmResult;
use charm_core::Check;
use charm_core::Status;
use error_stack::ResultExt;

use crate::config::ControllerConfig;

const DEFAULT_IMAGES: &str = include_str!("default-custom-images.json");
const KATIB_CONFIG: &str = include_str!("templates/katib-config.yaml");

/// Applied in this order, deleted in reverse.
pub const MANIFESTS: [ManifestTemplate; 5] = [
    ManifestTemplate {
        name: "auth_manifests.yaml",
        text: include_str!("templates/auth_manifests.yaml"),
    },
    ManifestTemplate {
        name: "crds.yaml",
        text: include_str!("templates/crds.yaml"),
    },
    ManifestTemplate {
        name: "webhooks.yaml",
        text: include_str!("templates/webhooks.yaml"),
    },
    ManifestTemplate {
        name: "configmaps.yaml",
        text: include_str!("templates/configmaps.yaml"),
    },
    ManifestTemplate {
        name: "service.yaml",
        text: include_str!("templates/service.yaml"),
    },
];

/// Inputs of one reconciliation pass.
#[derive(Debug, Clone)]
pub struct ControllerInputs {
    pub config: ControllerConfig,
    pub certs: CertificateBundle,
    /// Rendered `katib-config.yaml`, pushed into the workload and stored in
    /// the `katib-config` ConfigMap.
    pub katib_config: String,
    pub context: ManifestContext,
}

pub fn default_images() -> CharmResult<BTreeMap<String, String>> {
    serde_json::from_str(DEFAULT_IMAGES).change_context(CharmError::Render {
        message: "embedded default image list is not a JSON object of strings".to_string(),
    })
}

pub fn controller_inputs(
    model: &dyn CharmModel,
    certs: &StateStore<CertificateState>,
) -> CharmResult<Check<ControllerInputs>> {
    let config: ControllerConfig = load_config(model)?;

    let overrides = match parse_image_overrides("custom_images", &config.custom_images) {
        Check::Pass(overrides) => overrides,
        Check::Fail(status) => return Ok(Check::Fail(status)),
    };
    let images = merge_images(&default_images()?, &overrides);

    let Some(bundle) = certs.get()?.bundle() else {
        return Ok(Check::Fail(Status::waiting(
            "Waiting for certificates to be generated",
        )));
    };

    let mut values: Vec<(String, ContextValue)> = vec![
        ("app_name".to_string(), model.app_name().into()),
        ("namespace".to_string(), model.model_name().into()),
        ("webhook_port".to_string(), config.webhook_port.into()),
        ("metrics_port".to_string(), config.metrics_port.into()),
        ("ca_bundle".to_string(), bundle.ca_bundle().into()),
    ];
    values.extend(images.into_iter().map(|(name, image)| (name, image.into())));

    let katib_config = template::render(
        "katib-config.yaml",
        KATIB_CONFIG,
        &ManifestContextBuilder::new()
            .with_all(values.clone())
            .build(),
    )
    .change_context(CharmError::Render {
        message: "katib-config.yaml".to_string(),
    })?;
    // A JSON string is a valid double-quoted YAML scalar.
    let embedded = serde_json::to_string(&katib_config).change_context(CharmError::Render {
        message: "katib-config.yaml".to_string(),
    })?;

    let context = ManifestContextBuilder::new()
        .with_all(values)
        .with("katib_config", embedded)
        .build();

    Ok(Check::Pass(ControllerInputs {
        config,
        certs: bundle,
        katib_config,
        context,
    }))
}

#[cfg(test)]
mod tests {
    use charm_core::testing::FakeModel;
    use similar_asserts::assert_eq;

    use super::*;

    fn seeded_store(dir: &tempfile::TempDir) -> StateStore<CertificateState> {
        let store = StateStore::open(dir.path().join("state.json")).expect("open");
        store
            .update(|state| {
                *state = CertificateState {
                    cert: Some("cert".to_string()),
                    key: Some("key".to_string()),
                    ca: Some("ca".to_string()),
                }
            })
            .expect("seed");
        store
    }

    #[test]
    fn default_images_parse() {
        let images = default_images().expect("images");
        assert_eq!(
            images["default_trial_template"],
            "ghcr.io/kubeflow/katib/pytorch-mnist-cpu:v0.18.0"
        );
        assert!(images.keys().any(|name| name.starts_with("suggestion__")));
    }

    #[test]
    fn builds_context_with_images_and_ca_bundle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = seeded_store(&dir);
        let model = FakeModel::new("katib-controller", "kubeflow");

        let inputs = match controller_inputs(&model, &store).expect("inputs") {
            Check::Pass(inputs) => inputs,
            Check::Fail(status) => panic!("unexpected {status}"),
        };

        assert_eq!(
            inputs.context.get("ca_bundle"),
            Some(&ContextValue::from("Y2E="))
        );
        assert!(inputs.katib_config.contains("webhookPort: 443"));
        assert!(inputs
            .katib_config
            .contains("image: ghcr.io/kubeflow/katib/earlystopping-medianstop:v0.18.0"));
    }

    #[test]
    fn waits_for_certificates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::open(dir.path().join("state.json")).expect("open");
        let model = FakeModel::new("katib-controller", "kubeflow");

        let check = controller_inputs(&model, &store).expect("inputs");

        assert!(matches!(check, Check::Fail(Status::Waiting(_))));
    }

    #[test]
    fn malformed_custom_images_block() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = seeded_store(&dir);
        let model = FakeModel::new("katib-controller", "kubeflow");
        model.set_config(serde_json::json!({"custom_images": "{ not: [valid"}));

        let check = controller_inputs(&model, &store).expect("inputs");

        assert!(matches!(
            check,
            Check::Fail(Status::Blocked(message))
                if message.starts_with("Error parsing the 'custom_images' config option")
        ));
    }
}
