use charm_core::runtime::CharmArgs;
use clap::Parser;
use serde::Deserialize;
use utils::version;

#[derive(Parser)]
#[command(about = "Katib UI charm", long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(flatten)]
    pub charm: CharmArgs,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UiConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use charm_core::testing::config_yaml_defaults;
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_config_yaml() {
        let declared = config_yaml_defaults(include_str!("../config.yaml"));

        let config: UiConfig = serde_json::from_value(declared).expect("config");

        assert_eq!(config, UiConfig::default());
    }
}
