//! Providers for the observability relations.
//!
//! - [`MetricsEndpointProvider`]: Prometheus scrape jobs on `metrics-endpoint`
//! - [`GrafanaDashboardProvider`]: dashboards on `grafana-dashboard`
//! - [`LogForwarder`]: Pebble log targets for every Loki unit on `logging`

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use error_stack::ResultExt;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::component::Component;
use crate::error::CharmError;
use crate::error::CharmResult;
use crate::event::HookEvent;
use crate::interfaces::publish_app_data;
use crate::interfaces::to_json;
use crate::model::BagOwner;
use crate::model::CharmModel;
use crate::model::DataBag;
use crate::pebble::Layer;
use crate::pebble::LogTarget;
use crate::pebble::Override;
use crate::pebble::Workload;
use crate::status::Check;
use crate::status::Status;

pub const METRICS_ENDPOINT_RELATION: &str = "metrics-endpoint";
pub const GRAFANA_DASHBOARD_RELATION: &str = "grafana-dashboard";
pub const LOGGING_RELATION: &str = "logging";

const LOG_FORWARDING_LAYER: &str = "log-forwarding";

/// Identifies where telemetry came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JujuTopology {
    pub model: String,
    pub application: String,
    pub unit: String,
    pub charm_name: String,
}

impl JujuTopology {
    pub fn new(model: &dyn CharmModel, charm_name: &str) -> Self {
        Self {
            model: model.model_name().to_string(),
            application: model.app_name().to_string(),
            unit: model.unit_name().to_string(),
            charm_name: charm_name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticConfig {
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeJob {
    pub job_name: String,
    pub static_configs: Vec<StaticConfig>,
}

impl ScrapeJob {
    /// Scrapes `port` on every unit of the application; the scraper
    /// replaces `*` with each unit's address.
    pub fn all_units(job_name: impl Into<String>, port: u16) -> Self {
        Self {
            job_name: job_name.into(),
            static_configs: vec![StaticConfig {
                targets: vec![format!("*:{port}")],
            }],
        }
    }
}

/// The in-cluster DNS name of this unit's pod.
fn unit_address(model: &dyn CharmModel) -> String {
    format!(
        "{}.{}-endpoints.{}.svc.cluster.local",
        model.unit_name().replace('/', "-"),
        model.app_name(),
        model.model_name()
    )
}

fn relation_failed(relation_name: &str) -> CharmError {
    CharmError::Model {
        message: format!("failed to access relation {relation_name}"),
    }
}

/// Offers scrape jobs to Prometheus.
///
/// Every unit publishes its own address; only the leader writes the jobs,
/// so this component does not sit behind the leadership gate.
pub struct MetricsEndpointProvider {
    model: Arc<dyn CharmModel>,
    relation_name: String,
    charm_name: String,
    jobs: Vec<ScrapeJob>,
}

impl MetricsEndpointProvider {
    pub fn new(
        model: Arc<dyn CharmModel>,
        relation_name: impl Into<String>,
        charm_name: impl Into<String>,
        jobs: Vec<ScrapeJob>,
    ) -> Self {
        Self {
            model,
            relation_name: relation_name.into(),
            charm_name: charm_name.into(),
            jobs,
        }
    }

    fn app_bag(&self) -> CharmResult<DataBag> {
        let topology = JujuTopology::new(self.model.as_ref(), &self.charm_name);
        Ok(DataBag::from([
            ("scrape_jobs".to_string(), to_json("scrape_jobs", &self.jobs)?),
            (
                "scrape_metadata".to_string(),
                to_json("scrape_metadata", &topology)?,
            ),
        ]))
    }

    fn unit_bag(&self) -> DataBag {
        DataBag::from([
            (
                "prometheus_scrape_unit_address".to_string(),
                unit_address(self.model.as_ref()),
            ),
            (
                "prometheus_scrape_unit_name".to_string(),
                self.model.unit_name().to_string(),
            ),
        ])
    }
}

#[async_trait]
impl Component for MetricsEndpointProvider {
    async fn status(&self) -> CharmResult<Status> {
        Ok(Status::Active)
    }

    async fn reconcile(&self, _event: &HookEvent) -> CharmResult<Check<()>> {
        let relations = self
            .model
            .relations(&self.relation_name)
            .change_context_lazy(|| relation_failed(&self.relation_name))?;
        if relations.is_empty() {
            return Ok(Check::Pass(()));
        }

        let unit_bag = self.unit_bag();
        for relation in &relations {
            self.model
                .set_unit_data(relation, &unit_bag)
                .change_context_lazy(|| relation_failed(&self.relation_name))?;
        }

        let leader = self
            .model
            .is_leader()
            .change_context_lazy(|| relation_failed(&self.relation_name))?;
        if leader {
            publish_app_data(self.model.as_ref(), &self.relation_name, &self.app_bag()?)?;
            info!(jobs = self.jobs.len(), relations = relations.len(), "published scrape jobs");
        }
        Ok(Check::Pass(()))
    }
}

/// A Grafana dashboard embedded in the charm binary.
#[derive(Debug, Clone, Copy)]
pub struct DashboardTemplate {
    pub name: &'static str,
    pub text: &'static str,
}

#[derive(Debug, Serialize)]
struct DashboardEntry<'a> {
    charm: &'a str,
    content: String,
    juju_topology: &'a JujuTopology,
    inject_dropdowns: bool,
}

#[derive(Debug, Serialize)]
struct Dashboards<'a> {
    templates: BTreeMap<String, DashboardEntry<'a>>,
}

/// xz-compressed, then base64: the encoding Grafana expects on the relation.
fn encode_dashboard(text: &str) -> CharmResult<String> {
    let mut input = text.as_bytes();
    let mut compressed = Vec::new();
    lzma_rs::xz_compress(&mut input, &mut compressed).change_context_lazy(|| {
        CharmError::Render {
            message: "failed to compress dashboard".to_string(),
        }
    })?;
    Ok(STANDARD.encode(compressed))
}

/// Publishes dashboards to Grafana. Writes application data, so it belongs
/// behind the leadership gate.
pub struct GrafanaDashboardProvider {
    model: Arc<dyn CharmModel>,
    relation_name: String,
    charm_name: String,
    dashboards: Vec<DashboardTemplate>,
}

impl GrafanaDashboardProvider {
    pub fn new(
        model: Arc<dyn CharmModel>,
        relation_name: impl Into<String>,
        charm_name: impl Into<String>,
        dashboards: Vec<DashboardTemplate>,
    ) -> Self {
        Self {
            model,
            relation_name: relation_name.into(),
            charm_name: charm_name.into(),
            dashboards,
        }
    }

    fn bag(&self) -> CharmResult<DataBag> {
        let topology = JujuTopology::new(self.model.as_ref(), &self.charm_name);
        let mut templates = BTreeMap::new();
        for dashboard in &self.dashboards {
            serde_json::from_str::<serde_json::Value>(dashboard.text).change_context_lazy(|| {
                CharmError::Render {
                    message: format!("dashboard {} is not valid JSON", dashboard.name),
                }
            })?;
            templates.insert(
                format!("file:{}", dashboard.name),
                DashboardEntry {
                    charm: &self.charm_name,
                    content: encode_dashboard(dashboard.text)?,
                    juju_topology: &topology,
                    inject_dropdowns: true,
                },
            );
        }
        Ok(DataBag::from([(
            "dashboards".to_string(),
            to_json("dashboards", &Dashboards { templates })?,
        )]))
    }
}

#[async_trait]
impl Component for GrafanaDashboardProvider {
    async fn status(&self) -> CharmResult<Status> {
        Ok(Status::Active)
    }

    async fn reconcile(&self, _event: &HookEvent) -> CharmResult<Check<()>> {
        let bag = self.bag()?;
        let written = publish_app_data(self.model.as_ref(), &self.relation_name, &bag)?;
        if written > 0 {
            info!(dashboards = self.dashboards.len(), relations = written, "published dashboards");
        }
        Ok(Check::Pass(()))
    }
}

#[derive(Debug, Deserialize)]
struct LokiEndpoint {
    url: String,
}

/// Forwards the workload's logs to every related Loki unit.
///
/// Runs on every unit. Targets of departed Loki units are switched off
/// rather than removed, since Pebble cannot drop a target from its plan.
pub struct LogForwarder {
    model: Arc<dyn CharmModel>,
    workload: Arc<dyn Workload>,
    relation_name: String,
}

impl LogForwarder {
    pub fn new(
        model: Arc<dyn CharmModel>,
        workload: Arc<dyn Workload>,
        relation_name: impl Into<String>,
    ) -> Self {
        Self {
            model,
            workload,
            relation_name: relation_name.into(),
        }
    }

    /// Push URL of every remote unit that published one, keyed by target
    /// name.
    fn endpoints(&self) -> CharmResult<BTreeMap<String, String>> {
        let relations = self
            .model
            .relations(&self.relation_name)
            .change_context_lazy(|| relation_failed(&self.relation_name))?;

        let mut endpoints = BTreeMap::new();
        for relation in &relations {
            for unit in &relation.remote_units {
                let bag = self
                    .model
                    .relation_data(relation, &BagOwner::RemoteUnit(unit.clone()))
                    .change_context_lazy(|| relation_failed(&self.relation_name))?;
                let Some(raw) = bag.get("endpoint") else {
                    debug!(unit = %unit, "no loki endpoint yet");
                    continue;
                };
                match serde_json::from_str::<LokiEndpoint>(raw) {
                    Ok(endpoint) => {
                        endpoints.insert(unit.replace('/', "-"), endpoint.url);
                    }
                    Err(err) => warn!(unit = %unit, error = %err, "unreadable loki endpoint"),
                }
            }
        }
        Ok(endpoints)
    }

    fn layer(
        &self,
        endpoints: BTreeMap<String, String>,
        current: &BTreeMap<String, LogTarget>,
    ) -> Layer {
        let mut log_targets: BTreeMap<String, LogTarget> = endpoints
            .into_iter()
            .map(|(name, location)| {
                let target = LogTarget {
                    override_: Override::Replace,
                    type_: "loki".to_string(),
                    location,
                    services: vec!["all".to_string()],
                };
                (name, target)
            })
            .collect();

        for (name, target) in current {
            let disabled = target.services.is_empty() || target.services == ["-all"];
            if log_targets.contains_key(name) || disabled {
                continue;
            }
            log_targets.insert(
                name.clone(),
                LogTarget {
                    override_: Override::Merge,
                    services: vec!["-all".to_string()],
                    ..target.clone()
                },
            );
        }

        Layer {
            summary: "log forwarding".to_string(),
            log_targets,
            ..Layer::default()
        }
    }
}

#[async_trait]
impl Component for LogForwarder {
    async fn status(&self) -> CharmResult<Status> {
        Ok(Status::Active)
    }

    async fn reconcile(&self, _event: &HookEvent) -> CharmResult<Check<()>> {
        if !self.workload.can_connect() {
            debug!(container = %self.workload.container(), "pebble not ready, log forwarding deferred");
            return Ok(Check::Pass(()));
        }

        let workload_failed = || CharmError::Workload {
            message: format!("configuring log forwarding in container {}", self.workload.container()),
        };
        let endpoints = self.endpoints()?;
        let plan = self.workload.plan().change_context_lazy(workload_failed)?;
        let layer = self.layer(endpoints, &plan.log_targets);
        if layer.log_targets.is_empty() || layer.is_applied_in(&plan) {
            return Ok(Check::Pass(()));
        }

        self.workload
            .add_layer(LOG_FORWARDING_LAYER, &layer)
            .change_context_lazy(workload_failed)?;
        info!(targets = layer.log_targets.len(), "updated log forwarding");
        Ok(Check::Pass(()))
    }
}
