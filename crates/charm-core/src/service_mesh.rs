//! Membership in an ambient service mesh.
//!
//! While the `service-mesh` relation exists the application gets an
//! allow-all `AuthorizationPolicy`, so the API server can still reach its
//! webhooks. The policy is deleted again once the relation is gone.

use std::sync::Arc;

use async_trait::async_trait;
use error_stack::ResultExt;
use tracing::info;

use crate::component::Component;
use crate::context::ManifestContext;
use crate::context::ManifestContextBuilder;
use crate::error::CharmError;
use crate::error::CharmResult;
use crate::event::HookEvent;
use crate::kubernetes::KubernetesComponent;
use crate::kubernetes::KubernetesResourceHandler;
use crate::kubernetes::ManifestTemplate;
use crate::kubernetes::ResourceClient;
use crate::model::CharmModel;
use crate::status::Check;
use crate::status::Status;

pub const SERVICE_MESH_RELATION: &str = "service-mesh";

const ALLOW_ALL_POLICY: ManifestTemplate = ManifestTemplate {
    name: "allow_all_policy.yaml",
    text: include_str!("templates/allow_all_policy.yaml"),
};

pub struct ServiceMeshComponent {
    model: Arc<dyn CharmModel>,
    policy: KubernetesComponent,
}

impl ServiceMeshComponent {
    pub fn new(model: Arc<dyn CharmModel>, client: Arc<dyn ResourceClient>) -> Self {
        let context = ManifestContextBuilder::new()
            .with("app_name", model.app_name())
            .with("namespace", model.model_name())
            .build();
        let handler = KubernetesResourceHandler::new(
            client,
            model.app_name(),
            model.model_name(),
            format!("{}-allow-all", model.app_name()),
            vec![ALLOW_ALL_POLICY],
        );
        let policy = KubernetesComponent::new(
            handler,
            Box::new(move || -> CharmResult<Check<ManifestContext>> {
                Ok(Check::Pass(context.clone()))
            }),
        );
        Self { model, policy }
    }

    fn in_mesh(&self) -> CharmResult<bool> {
        let relations = self
            .model
            .relations(SERVICE_MESH_RELATION)
            .change_context_lazy(|| CharmError::Model {
                message: format!("failed to read relation {SERVICE_MESH_RELATION}"),
            })?;
        Ok(!relations.is_empty())
    }
}

#[async_trait]
impl Component for ServiceMeshComponent {
    async fn status(&self) -> CharmResult<Status> {
        if self.in_mesh()? {
            return self.policy.status().await;
        }
        Ok(Status::Active)
    }

    async fn reconcile(&self, event: &HookEvent) -> CharmResult<Check<()>> {
        if self.in_mesh()? {
            info!("in service mesh, applying allow-all policy");
            return self.policy.reconcile(event).await;
        }
        self.policy.remove(event).await
    }

    async fn remove(&self, event: &HookEvent) -> CharmResult<Check<()>> {
        self.policy.remove(event).await
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::testing::FakeModel;
    use crate::testing::FakeResourceClient;

    fn setup() -> (Arc<FakeModel>, Arc<FakeResourceClient>, ServiceMeshComponent) {
        let model = Arc::new(FakeModel::new("katib-controller", "kubeflow"));
        model.set_leader(true);
        let client = Arc::new(FakeResourceClient::new());
        let component = ServiceMeshComponent::new(model.clone(), client.clone());
        (model, client, component)
    }

    #[test(tokio::test)]
    async fn outside_mesh_creates_nothing() {
        let (_model, client, component) = setup();

        let check = component
            .reconcile(&HookEvent::Install)
            .await
            .expect("reconcile");

        assert!(check.is_pass());
        assert!(client.is_empty());
        assert_eq!(component.status().await.expect("status"), Status::Active);
    }

    #[test(tokio::test)]
    async fn policy_follows_relation() {
        let (model, client, component) = setup();
        let relation = model.add_relation(SERVICE_MESH_RELATION, "istio-beacon-k8s");

        component
            .reconcile(&HookEvent::ConfigChanged)
            .await
            .expect("apply");

        let policy = client
            .find("AuthorizationPolicy", "katib-controller-allow-all")
            .expect("policy");
        assert_eq!(policy.data["spec"]["action"], "ALLOW");
        assert_eq!(
            policy.data["spec"]["selector"]["matchLabels"]["app.kubernetes.io/name"],
            "katib-controller"
        );
        assert_eq!(component.status().await.expect("status"), Status::Active);

        model.remove_relation(&relation);
        component
            .reconcile(&HookEvent::Relation {
                relation: SERVICE_MESH_RELATION.to_string(),
                kind: crate::event::RelationEventKind::Broken,
            })
            .await
            .expect("prune");

        assert!(client.is_empty());
    }
}
