//! Links shown in the Kubeflow central dashboard.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;

use crate::component::Component;
use crate::error::CharmResult;
use crate::event::HookEvent;
use crate::interfaces::publish_app_data;
use crate::interfaces::to_json;
use crate::model::CharmModel;
use crate::model::DataBag;
use crate::status::Check;
use crate::status::Status;

pub const DASHBOARD_LINKS_RELATION: &str = "dashboard-links";

const LINKS_KEY: &str = "kubeflow_dashboard_links";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkLocation {
    Menu,
    External,
    Quick,
    Documentation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardLink {
    pub text: String,
    pub link: String,
    pub location: LinkLocation,
    pub icon: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub desc: String,
}

impl DashboardLink {
    pub fn menu_item(text: &str, link: &str, icon: &str) -> Self {
        Self {
            text: text.to_string(),
            link: link.to_string(),
            location: LinkLocation::Menu,
            icon: icon.to_string(),
            type_: "item".to_string(),
            desc: String::new(),
        }
    }
}

/// Sends this application's links to the dashboard. Leader only.
pub struct DashboardLinksRequirer {
    model: Arc<dyn CharmModel>,
    links: Vec<DashboardLink>,
}

impl DashboardLinksRequirer {
    pub fn new(model: Arc<dyn CharmModel>, links: Vec<DashboardLink>) -> Self {
        Self { model, links }
    }
}

#[async_trait]
impl Component for DashboardLinksRequirer {
    async fn status(&self) -> CharmResult<Status> {
        Ok(Status::Active)
    }

    async fn reconcile(&self, _event: &HookEvent) -> CharmResult<Check<()>> {
        let bag = DataBag::from([(LINKS_KEY.to_string(), to_json(LINKS_KEY, &self.links)?)]);
        let written = publish_app_data(self.model.as_ref(), DASHBOARD_LINKS_RELATION, &bag)?;
        if written > 0 {
            info!(links = self.links.len(), "sent dashboard links");
        }
        Ok(Check::Pass(()))
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::testing::FakeModel;

    #[test(tokio::test)]
    async fn sends_links_as_json_list() {
        let model = Arc::new(FakeModel::new("katib-ui", "kubeflow"));
        model.set_leader(true);
        let relation = model.add_relation(DASHBOARD_LINKS_RELATION, "kubeflow-dashboard");
        let requirer = DashboardLinksRequirer::new(
            model.clone(),
            vec![DashboardLink::menu_item("Experiments (AutoML)", "/katib/", "kubeflow:katib")],
        );

        requirer
            .reconcile(&HookEvent::Install)
            .await
            .expect("reconcile");

        let sent: serde_json::Value =
            serde_json::from_str(&model.local_app_data(&relation)[LINKS_KEY]).expect("json");
        assert_eq!(
            sent,
            serde_json::json!([{
                "text": "Experiments (AutoML)",
                "link": "/katib/",
                "location": "menu",
                "icon": "kubeflow:katib",
                "type": "item",
                "desc": "",
            }])
        );
    }
}
