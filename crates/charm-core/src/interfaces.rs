//! Relation interfaces.
//!
//! Negotiated interfaces (`ingress`): each side lists the versions it speaks
//! under `_supported_versions` in its application bag (a YAML list) and
//! payloads travel as YAML under `data`.
//!
//! Unversioned interfaces (`istio-ingress-route` and the observability ones)
//! carry JSON values under fixed keys, written with [`publish_app_data`].

use std::sync::Arc;

use error_stack::ResultExt;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::error::CharmError;
use crate::error::CharmResult;
use crate::model::BagOwner;
use crate::model::CharmModel;
use crate::model::DataBag;
use crate::model::Relation;
use crate::status::Check;
use crate::status::Status;

const VERSIONS_KEY: &str = "_supported_versions";
const DATA_KEY: &str = "data";

/// Interfaces this crate knows how to negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum InterfaceKind {
    #[display("ingress")]
    Ingress,
}

impl InterfaceKind {
    pub fn relation_name(self) -> &'static str {
        match self {
            Self::Ingress => "ingress",
        }
    }

    /// Versions we speak, newest last.
    pub fn supported_versions(self) -> &'static [&'static str] {
        match self {
            Self::Ingress => &["v1"],
        }
    }
}

/// Payload of the `ingress` interface, version `v1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRoute {
    pub prefix: String,
    pub service: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite: Option<String>,
}

/// Writes `bag` into our application bag on every `relation_name` relation.
/// Returns the number of relations written.
pub fn publish_app_data(
    model: &dyn CharmModel,
    relation_name: &str,
    bag: &DataBag,
) -> CharmResult<usize> {
    let model_failed = || CharmError::Model {
        message: format!("failed to publish data on relation {relation_name}"),
    };
    let relations = model
        .relations(relation_name)
        .change_context_lazy(model_failed)?;
    for relation in &relations {
        model
            .set_app_data(relation, bag)
            .change_context_lazy(model_failed)?;
        debug!(relation = %relation.id, keys = bag.len(), "published application data");
    }
    Ok(relations.len())
}

/// Serializes one relation data value as JSON.
pub fn to_json<T: Serialize>(key: &str, value: &T) -> CharmResult<String> {
    serde_json::to_string(value).change_context_lazy(|| CharmError::Model {
        message: format!("failed to encode relation data {key}"),
    })
}

pub const ISTIO_INGRESS_ROUTE_KEY: &str = "config";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RouteProtocol {
    Http,
    Grpc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub port: u16,
    pub protocol: RouteProtocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMatch {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMatch {
    pub path: PathMatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendRef {
    pub service: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRoute {
    pub name: String,
    pub listener: Listener,
    pub matches: Vec<RouteMatch>,
    pub backends: Vec<BackendRef>,
}

/// Payload of the `istio-ingress-route` interface, JSON under
/// [`ISTIO_INGRESS_ROUTE_KEY`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IstioIngressRouteConfig {
    pub model: String,
    pub listeners: Vec<Listener>,
    pub http_routes: Vec<HttpRoute>,
}

impl IstioIngressRouteConfig {
    /// One plain HTTP listener on `listener_port` routing `prefix` to
    /// `service:port`.
    pub fn path_prefix(
        model: &str,
        route_name: &str,
        listener_port: u16,
        prefix: &str,
        service: &str,
        port: u16,
    ) -> Self {
        let listener = Listener {
            port: listener_port,
            protocol: RouteProtocol::Http,
        };
        Self {
            model: model.to_string(),
            listeners: vec![listener.clone()],
            http_routes: vec![HttpRoute {
                name: route_name.to_string(),
                listener,
                matches: vec![RouteMatch {
                    path: PathMatch {
                        type_: "PathPrefix".to_string(),
                        value: prefix.to_string(),
                    },
                }],
                backends: vec![BackendRef {
                    service: service.to_string(),
                    port,
                }],
            }],
        }
    }

    pub fn to_bag(&self) -> CharmResult<DataBag> {
        Ok(DataBag::from([(
            ISTIO_INGRESS_ROUTE_KEY.to_string(),
            to_json(ISTIO_INGRESS_ROUTE_KEY, self)?,
        )]))
    }
}

/// An interface both ends agreed on a version for.
pub struct NegotiatedInterface {
    model: Arc<dyn CharmModel>,
    kind: InterfaceKind,
    version: String,
    relations: Vec<Relation>,
}

impl std::fmt::Debug for NegotiatedInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiatedInterface")
            .field("kind", &self.kind)
            .field("version", &self.version)
            .field("relations", &self.relations)
            .finish()
    }
}

impl NegotiatedInterface {
    pub fn kind(&self) -> InterfaceKind {
        self.kind
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Writes our versions and `data` to every relation of this interface.
    pub fn send_data<T: Serialize>(&self, data: &T) -> CharmResult<()> {
        let model_failed = || CharmError::Model {
            message: format!("failed to send {} data", self.kind),
        };
        let versions = serde_yaml::to_string(self.kind.supported_versions())
            .change_context_lazy(model_failed)?;
        let payload = serde_yaml::to_string(data).change_context_lazy(model_failed)?;

        let bag = DataBag::from([
            (VERSIONS_KEY.to_string(), versions),
            (DATA_KEY.to_string(), payload),
        ]);
        for relation in &self.relations {
            self.model
                .set_app_data(relation, &bag)
                .change_context_lazy(model_failed)?;
            debug!(relation = %relation.id, version = %self.version, "sent interface data");
        }
        Ok(())
    }
}

/// Negotiates `kind` with every related application.
///
/// `Pass(None)` when the relation does not exist. Waiting while a remote
/// application has not listed its versions yet, Blocked when it shares none
/// of ours.
pub fn negotiate(
    model: &Arc<dyn CharmModel>,
    kind: InterfaceKind,
) -> CharmResult<Check<Option<NegotiatedInterface>>> {
    let relation_name = kind.relation_name();
    let model_failed = || CharmError::Model {
        message: format!("failed to read relation {relation_name}"),
    };

    let relations = model
        .relations(relation_name)
        .change_context_lazy(model_failed)?;
    if relations.is_empty() {
        return Ok(Check::Pass(None));
    }

    let ours = kind.supported_versions();
    let mut shared: Vec<&str> = ours.to_vec();
    for relation in &relations {
        let remote_app = relation.remote_app.as_deref().unwrap_or("<unknown>");
        let bag = match relation.remote_app {
            Some(_) => model
                .relation_data(relation, &BagOwner::RemoteApp)
                .change_context_lazy(model_failed)?,
            None => DataBag::new(),
        };

        let Some(listed) = bag.get(VERSIONS_KEY) else {
            return Ok(Check::Fail(Status::waiting(format!(
                "List of {kind} versions not found for apps: {remote_app}"
            ))));
        };
        let theirs: Vec<String> = match serde_yaml::from_str(listed) {
            Ok(versions) => versions,
            Err(err) => {
                warn!(relation = %relation.id, error = %err, "unreadable version list");
                Vec::new()
            }
        };
        shared.retain(|version| theirs.iter().any(|theirs| theirs == version));
        if shared.is_empty() {
            return Ok(Check::Fail(Status::blocked(format!(
                "No compatible {kind} versions found for apps: {remote_app}"
            ))));
        }
    }

    // Newest version both ends speak.
    let version = shared.last().copied().unwrap_or_default().to_string();
    Ok(Check::Pass(Some(NegotiatedInterface {
        model: model.clone(),
        kind,
        version,
        relations,
    })))
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::testing::FakeModel;

    fn model() -> Arc<FakeModel> {
        let model = Arc::new(FakeModel::new("katib-ui", "kubeflow"));
        model.set_leader(true);
        model
    }

    fn negotiated(model: Arc<FakeModel>) -> Check<Option<NegotiatedInterface>> {
        let model: Arc<dyn CharmModel> = model;
        negotiate(&model, InterfaceKind::Ingress).expect("negotiate")
    }

    #[test]
    fn absent_relation_is_none() {
        assert!(matches!(negotiated(model()), Check::Pass(None)));
    }

    #[test]
    fn unlisted_versions_wait() {
        let model = model();
        model.add_relation("ingress", "istio-pilot");

        let check = negotiated(model);

        assert_eq!(
            check.status(),
            Status::waiting("List of ingress versions not found for apps: istio-pilot")
        );
    }

    #[test]
    fn incompatible_versions_block() {
        let model = model();
        let relation = model.add_relation("ingress", "istio-pilot");
        model.set_remote_app_data(&relation, [(VERSIONS_KEY, "- v2\n")]);

        assert!(matches!(negotiated(model).status(), Status::Blocked(_)));
    }

    #[test]
    fn sends_versions_and_yaml_payload() {
        let model = model();
        let relation = model.add_relation("ingress", "istio-pilot");
        model.set_remote_app_data(&relation, [(VERSIONS_KEY, "- v1\n")]);

        let interface = match negotiated(model.clone()) {
            Check::Pass(Some(interface)) => interface,
            other => panic!("expected negotiated interface, got {other:?}"),
        };
        assert_eq!(interface.version(), "v1");
        interface
            .send_data(&IngressRoute {
                prefix: "/katib/".to_string(),
                service: "katib-ui".to_string(),
                port: 8080,
                rewrite: None,
            })
            .expect("send");

        let bag = model.local_app_data(&relation);
        assert_eq!(bag[VERSIONS_KEY], "- v1\n");
        let sent: IngressRoute = serde_yaml::from_str(&bag[DATA_KEY]).expect("yaml");
        assert_eq!(sent.prefix, "/katib/");
        assert_eq!(sent.port, 8080);
    }
    #[test]
    fn publishes_to_every_relation() {
        let model = model();
        let first = model.add_relation("metrics-endpoint", "prometheus");
        let second = model.add_relation("metrics-endpoint", "grafana-agent");
        model.add_relation("ingress", "istio-pilot");

        let bag = DataBag::from([("key".to_string(), "value".to_string())]);
        let written = publish_app_data(model.as_ref(), "metrics-endpoint", &bag).expect("publish");

        assert_eq!(written, 2);
        assert_eq!(model.local_app_data(&first)["key"], "value");
        assert_eq!(model.local_app_data(&second)["key"], "value");
    }

    #[test]
    fn istio_route_json_layout() {
        let config = IstioIngressRouteConfig::path_prefix(
            "kubeflow",
            "katib-ui-http",
            80,
            "/katib/",
            "katib-ui",
            8080,
        );

        let bag = config.to_bag().expect("bag");
        let value: serde_json::Value =
            serde_json::from_str(&bag[ISTIO_INGRESS_ROUTE_KEY]).expect("json");

        assert_eq!(
            value,
            serde_json::json!({
                "model": "kubeflow",
                "listeners": [{"port": 80, "protocol": "HTTP"}],
                "http_routes": [{
                    "name": "katib-ui-http",
                    "listener": {"port": 80, "protocol": "HTTP"},
                    "matches": [{"path": {"type": "PathPrefix", "value": "/katib/"}}],
                    "backends": [{"service": "katib-ui", "port": 8080}],
                }],
            })
        );
    }
}
