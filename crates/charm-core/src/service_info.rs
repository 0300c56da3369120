//! Exchange of a Kubernetes service's name and port between charms.
//!
//! The provider writes `{name, port}` into its application bag on every
//! `k8s-service-info` relation; the requirer reads it back from the single
//! related provider.

use std::sync::Arc;

use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;

use crate::check;
use crate::component::Component;
use crate::error::CharmError;
use crate::error::CharmResult;
use crate::event::HookEvent;
use crate::model::BagOwner;
use crate::model::CharmModel;
use crate::model::DataBag;
use crate::status::Check;
use crate::status::Status;

pub const DEFAULT_RELATION_NAME: &str = "k8s-service-info";

const MISSING_RELATION: &str =
    "Missing relation with a k8s service info provider. Please add the missing relation.";

/// Name and port of a Kubernetes service, both strings on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub port: String,
}

impl ServiceInfo {
    fn to_bag(&self) -> DataBag {
        DataBag::from([
            ("name".to_string(), self.name.clone()),
            ("port".to_string(), self.port.clone()),
        ])
    }

    /// `None` unless both fields are present and non-empty.
    fn from_bag(bag: &DataBag) -> Option<Self> {
        let field = |key: &str| bag.get(key).filter(|value| !value.is_empty()).cloned();
        Some(Self {
            name: field("name")?,
            port: field("port")?,
        })
    }
}

fn model_failed(relation_name: &str) -> CharmError {
    CharmError::Model {
        message: format!("failed to access relation {relation_name}"),
    }
}

/// Publishes this application's service info to every related requirer.
pub struct ServiceInfoProvider {
    model: Arc<dyn CharmModel>,
    relation_name: String,
    info: ServiceInfo,
}

impl ServiceInfoProvider {
    pub fn new(
        model: Arc<dyn CharmModel>,
        relation_name: impl Into<String>,
        name: impl Into<String>,
        port: impl ToString,
    ) -> Self {
        Self {
            model,
            relation_name: relation_name.into(),
            info: ServiceInfo {
                name: name.into(),
                port: port.to_string(),
            },
        }
    }
}

#[async_trait]
impl Component for ServiceInfoProvider {
    async fn status(&self) -> CharmResult<Status> {
        Ok(Status::Active)
    }

    async fn reconcile(&self, _event: &HookEvent) -> CharmResult<Check<()>> {
        let relations = self
            .model
            .relations(&self.relation_name)
            .change_context_lazy(|| model_failed(&self.relation_name))?;

        let bag = self.info.to_bag();
        for relation in &relations {
            self.model
                .set_app_data(relation, &bag)
                .change_context_lazy(|| model_failed(&self.relation_name))?;
            debug!(relation = %relation.id, name = %self.info.name, port = %self.info.port, "published service info");
        }
        Ok(Check::Pass(()))
    }
}

/// Reads the service info of the one related provider.
pub struct ServiceInfoRequirer {
    model: Arc<dyn CharmModel>,
    relation_name: String,
}

impl ServiceInfoRequirer {
    pub fn new(model: Arc<dyn CharmModel>, relation_name: impl Into<String>) -> Self {
        Self {
            model,
            relation_name: relation_name.into(),
        }
    }

    /// The provider's data, or why it is not available.
    ///
    /// More than one related provider is an error carrying a Blocked target
    /// status, so callers can tell it apart from a missing relation.
    pub fn service_info(&self) -> CharmResult<Check<ServiceInfo>> {
        let relations = self
            .model
            .relations(&self.relation_name)
            .change_context_lazy(|| model_failed(&self.relation_name))?;

        let relation = match relations.as_slice() {
            [] => return Ok(Check::Fail(Status::blocked(MISSING_RELATION))),
            [relation] => relation,
            _ => {
                return Err(Report::new(CharmError::TooManyRelatedApps {
                    relation: self.relation_name.clone(),
                    count: relations.len(),
                }))
            }
        };

        let bag = match relation.remote_app {
            Some(_) => self
                .model
                .relation_data(relation, &BagOwner::RemoteApp)
                .change_context_lazy(|| model_failed(&self.relation_name))?,
            None => DataBag::new(),
        };

        match ServiceInfo::from_bag(&bag) {
            Some(info) => Ok(Check::Pass(info)),
            None => {
                info!(relation = %relation.id, "service info incomplete");
                Ok(Check::Fail(Status::waiting(format!(
                    "Waiting for data on relation {}",
                    self.relation_name
                ))))
            }
        }
    }
}

#[async_trait]
impl Component for ServiceInfoRequirer {
    async fn status(&self) -> CharmResult<Status> {
        check!(self.service_info());
        Ok(Status::Active)
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::testing::FakeModel;

    fn model() -> Arc<FakeModel> {
        let model = Arc::new(FakeModel::new("katib-controller", "kubeflow"));
        model.set_leader(true);
        model
    }

    #[test(tokio::test)]
    async fn provider_publishes_on_every_relation() {
        let model = model();
        let first = model.add_relation(DEFAULT_RELATION_NAME, "katib-controller");
        let second = model.add_relation(DEFAULT_RELATION_NAME, "other");
        let provider =
            ServiceInfoProvider::new(model.clone(), DEFAULT_RELATION_NAME, "katib-db-manager", 6789);

        provider
            .reconcile(&HookEvent::ConfigChanged)
            .await
            .expect("reconcile");

        for relation in [first, second] {
            let bag = model.local_app_data(&relation);
            assert_eq!(bag["name"], "katib-db-manager");
            assert_eq!(bag["port"], "6789");
        }
    }

    #[test]
    fn requirer_without_relation_is_blocked() {
        let requirer = ServiceInfoRequirer::new(model(), DEFAULT_RELATION_NAME);

        assert_eq!(
            requirer.service_info().expect("service info"),
            Check::Fail(Status::blocked(MISSING_RELATION))
        );
    }

    #[test]
    fn requirer_with_two_providers_errors() {
        let model = model();
        model.add_relation(DEFAULT_RELATION_NAME, "db-one");
        model.add_relation(DEFAULT_RELATION_NAME, "db-two");
        let requirer = ServiceInfoRequirer::new(model, DEFAULT_RELATION_NAME);

        let err = requirer.service_info().expect_err("too many");

        assert!(matches!(
            err.current_context(),
            CharmError::TooManyRelatedApps { count: 2, .. }
        ));
    }

    #[test(tokio::test)]
    async fn requirer_waits_for_complete_data() {
        let model = model();
        let relation = model.add_relation(DEFAULT_RELATION_NAME, "katib-db-manager");
        model.set_remote_app_data(&relation, [("name", "katib-db-manager")]);
        let requirer = ServiceInfoRequirer::new(model.clone(), DEFAULT_RELATION_NAME);

        assert!(matches!(
            requirer.status().await.expect("status"),
            Status::Waiting(_)
        ));

        model.set_remote_app_data(&relation, [("name", "katib-db-manager"), ("port", "6789")]);

        assert_eq!(requirer.status().await.expect("status"), Status::Active);
        assert_eq!(
            requirer.service_info().expect("service info"),
            Check::Pass(ServiceInfo {
                name: "katib-db-manager".to_string(),
                port: "6789".to_string(),
            })
        );
    }
}
