use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Override {
    #[default]
    Replace,
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Startup {
    #[default]
    Enabled,
    Disabled,
}

/// What the service manager does when a check fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckAction {
    Restart,
    Shutdown,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckLevel {
    Alive,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Service {
    #[serde(rename = "override")]
    pub override_: Override,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    pub command: String,
    #[serde(default)]
    pub startup: Startup,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub on_check_failure: BTreeMap<String, CheckAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecCheck {
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpCheck {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpCheck {
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSpec {
    #[serde(rename = "override")]
    pub override_: Override,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<CheckLevel>,
    /// Go duration string, e.g. `60s`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<TcpCheck>,
}

/// Where Pebble ships service logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogTarget {
    #[serde(rename = "override")]
    pub override_: Override,
    #[serde(rename = "type")]
    pub type_: String,
    pub location: String,
    /// Service names, `all`, or `-all` to stop forwarding.
    #[serde(default)]
    pub services: Vec<String>,
}

/// A Pebble configuration layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Layer {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, Service>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: BTreeMap<String, CheckSpec>,
    #[serde(rename = "log-targets", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub log_targets: BTreeMap<String, LogTarget>,
}

impl Layer {
    /// Whether every service and check of this layer is already in `plan`
    /// exactly as defined here.
    pub fn is_applied_in(&self, plan: &Plan) -> bool {
        self.services
            .iter()
            .all(|(name, service)| plan.services.get(name) == Some(service))
            && self
                .checks
                .iter()
                .all(|(name, check)| plan.checks.get(name) == Some(check))
            && self
                .log_targets
                .iter()
                .all(|(name, target)| plan.log_targets.get(name) == Some(target))
    }
}

/// The combined plan of every layer, as printed by `pebble plan`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Plan {
    #[serde(default)]
    pub services: BTreeMap<String, Service>,
    #[serde(default)]
    pub checks: BTreeMap<String, CheckSpec>,
    #[serde(rename = "log-targets", default)]
    pub log_targets: BTreeMap<String, LogTarget>,
}

impl Plan {
    /// Folds `layer` into the plan the way `pebble add --combine` does.
    pub fn combine(&mut self, layer: &Layer) {
        for (name, service) in &layer.services {
            self.services.insert(name.clone(), service.clone());
        }
        for (name, check) in &layer.checks {
            self.checks.insert(name.clone(), check.clone());
        }
        for (name, target) in &layer.log_targets {
            self.log_targets.insert(name.clone(), target.clone());
        }
    }
}
