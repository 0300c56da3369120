use charm_core::runtime::CharmArgs;
use clap::Parser;
use serde::Deserialize;
use utils::version;

#[derive(Parser)]
#[command(about = "Katib controller charm", long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(flatten)]
    pub charm: CharmArgs,
}

/// Charm options, defaults as declared in `config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ControllerConfig {
    #[serde(rename = "webhook-port", default = "default_webhook_port")]
    pub webhook_port: u16,

    #[serde(rename = "metrics-port", default = "default_metrics_port")]
    pub metrics_port: u16,

    /// YAML mapping of image name to image reference.
    #[serde(default)]
    pub custom_images: String,
}

fn default_webhook_port() -> u16 {
    443
}

fn default_metrics_port() -> u16 {
    8080
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            webhook_port: default_webhook_port(),
            metrics_port: default_metrics_port(),
            custom_images: String::new(),
        }
    }
}
