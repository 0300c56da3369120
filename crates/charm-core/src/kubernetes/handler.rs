use std::sync::Arc;

use error_stack::Report;
use error_stack::ResultExt;
use kube::core::DynamicObject;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::resources::is_subset;
use super::resources::INSTANCE_LABEL;
use super::resources::SCOPE_LABEL;
use super::DesiredResourceSet;
use super::KubernetesError;
use super::ObjectRef;
use super::ResourceClient;
use crate::context::ManifestContext;
use crate::template;

/// A manifest template embedded in the charm binary.
#[derive(Debug, Clone, Copy)]
pub struct ManifestTemplate {
    pub name: &'static str,
    pub text: &'static str,
}

/// What one [`KubernetesResourceHandler::apply`] call did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplySummary {
    pub applied: usize,
    /// Applied only after taking ownership of conflicting fields.
    pub forced: usize,
    pub unchanged: usize,
}

/// Renders a fixed list of templates and keeps the result applied.
///
/// Every rendered object carries the `app.kubernetes.io/instance` and
/// `kubernetes-resource-handler-scope` labels so the objects owned by one
/// handler can be told apart from everything else in the cluster.
pub struct KubernetesResourceHandler {
    client: Arc<dyn ResourceClient>,
    templates: Vec<ManifestTemplate>,
    instance: String,
    scope: String,
}

impl KubernetesResourceHandler {
    pub fn new(
        client: Arc<dyn ResourceClient>,
        app_name: &str,
        model_name: &str,
        scope: impl Into<String>,
        templates: Vec<ManifestTemplate>,
    ) -> Self {
        Self {
            client,
            templates,
            instance: format!("{app_name}-{model_name}"),
            scope: scope.into(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Renders every template against `context`. Needs no cluster access.
    pub fn render_manifests(
        &self,
        context: &ManifestContext,
    ) -> Result<DesiredResourceSet, Report<KubernetesError>> {
        let labels = [
            (INSTANCE_LABEL, self.instance.as_str()),
            (SCOPE_LABEL, self.scope.as_str()),
        ];

        let mut set = DesiredResourceSet::new(&self.scope);
        for manifest in &self.templates {
            let rendered = template::render(manifest.name, manifest.text, context)
                .change_context_lazy(|| KubernetesError::InvalidManifest {
                    template: manifest.name.to_string(),
                    message: "failed to render template".to_string(),
                })?;
            set.extend_from_yaml(manifest.name, &rendered, &labels)?;
        }
        Ok(set)
    }

    /// Applies every object that is missing or differs from its live copy.
    ///
    /// A field ownership conflict is retried once with force; the forced
    /// path is never taken first.
    #[tracing::instrument(skip_all, fields(scope = %self.scope))]
    pub async fn apply(
        &self,
        set: &DesiredResourceSet,
    ) -> Result<ApplySummary, Report<KubernetesError>> {
        let mut summary = ApplySummary::default();

        for (object_ref, object) in set.entries() {
            if self.is_current(object_ref, object).await? {
                summary.unchanged += 1;
                continue;
            }

            match self.client.apply(object, false).await {
                Ok(()) => summary.applied += 1,
                Err(report) if report.current_context().is_conflict() => {
                    warn!(object = %object_ref, "field ownership conflict, retrying with force");
                    self.client
                        .apply(object, true)
                        .await
                        .attach_printable_lazy(|| format!("forced apply of {object_ref}"))?;
                    summary.forced += 1;
                }
                Err(report) => return Err(report),
            }
        }

        info!(
            applied = summary.applied,
            forced = summary.forced,
            unchanged = summary.unchanged,
            "applied resources"
        );
        Ok(summary)
    }

    /// Objects whose live copy is absent or differs from the desired one.
    pub async fn missing_or_changed(
        &self,
        set: &DesiredResourceSet,
    ) -> Result<Vec<ObjectRef>, Report<KubernetesError>> {
        let mut pending = Vec::new();
        for (object_ref, object) in set.entries() {
            if !self.is_current(object_ref, object).await? {
                pending.push(object_ref.clone());
            }
        }
        Ok(pending)
    }

    /// Deletes every object in reverse apply order.
    ///
    /// Objects that are already gone count as deleted; any other failure is
    /// returned unchanged.
    #[tracing::instrument(skip_all, fields(scope = %self.scope))]
    pub async fn delete(&self, set: &DesiredResourceSet) -> Result<usize, Report<KubernetesError>> {
        let mut deleted = 0;
        for object_ref in set.refs().rev() {
            match self.client.delete(object_ref).await {
                Ok(()) => deleted += 1,
                Err(report) if report.current_context().is_not_found() => {
                    debug!(object = %object_ref, "already absent");
                }
                Err(report) => return Err(report),
            }
        }
        info!(deleted, "deleted resources");
        Ok(deleted)
    }

    async fn is_current(
        &self,
        object_ref: &ObjectRef,
        desired: &DynamicObject,
    ) -> Result<bool, Report<KubernetesError>> {
        let Some(live) = self.client.get(object_ref).await? else {
            return Ok(false);
        };

        let serialization_failed = || KubernetesError::InvalidManifest {
            template: object_ref.to_string(),
            message: "cannot serialize object".to_string(),
        };
        let desired = serde_json::to_value(desired).change_context_lazy(serialization_failed)?;
        let live = serde_json::to_value(&live).change_context_lazy(serialization_failed)?;
        Ok(is_subset(&desired, &live))
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::context::ManifestContextBuilder;
    use crate::testing::FakeResourceClient;

    const CONFIG_MAP: &str = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: ${app_name}-config
  namespace: ${namespace}
data:
  port: "${port}"
"#;

    const ROLE: &str = r#"
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: ${app_name}
rules:
- apiGroups: [""]
  resources: ["configmaps"]
  verbs: ["*"]
"#;

    fn handler(client: Arc<FakeResourceClient>) -> KubernetesResourceHandler {
        KubernetesResourceHandler::new(
            client,
            "katib-ui",
            "kubeflow",
            "auth",
            vec![
                ManifestTemplate {
                    name: "role.yaml",
                    text: ROLE,
                },
                ManifestTemplate {
                    name: "config.yaml",
                    text: CONFIG_MAP,
                },
            ],
        )
    }

    fn context() -> ManifestContext {
        ManifestContextBuilder::new()
            .with("app_name", "katib-ui")
            .with("namespace", "kubeflow")
            .with("port", 8080u16)
            .build()
    }

    #[test]
    fn renders_without_cluster_access() {
        let client = Arc::new(FakeResourceClient::new());
        let set = handler(client.clone())
            .render_manifests(&context())
            .expect("render");

        assert_eq!(set.len(), 2);
        assert_eq!(set.scope, "auth");
        let config = set.get("ConfigMap", "katib-ui-config").expect("config map");
        assert_eq!(config.data["data"]["port"], "8080");
        assert_eq!(client.mutations(), 0);
    }

    #[test(tokio::test)]
    async fn second_apply_is_a_no_op() {
        let client = Arc::new(FakeResourceClient::new());
        let handler = handler(client.clone());
        let set = handler.render_manifests(&context()).expect("render");

        let first = handler.apply(&set).await.expect("first apply");
        assert_eq!(first.applied, 2);
        let mutations = client.mutations();

        let second = handler.apply(&set).await.expect("second apply");
        assert_eq!(
            second,
            ApplySummary {
                applied: 0,
                forced: 0,
                unchanged: 2
            }
        );
        assert_eq!(client.mutations(), mutations);
        assert!(handler
            .missing_or_changed(&set)
            .await
            .expect("check")
            .is_empty());
    }

    #[test(tokio::test)]
    async fn conflict_retries_with_force_only_after_plain_apply() {
        let client = Arc::new(FakeResourceClient::new());
        let handler = handler(client.clone());
        let set = handler.render_manifests(&context()).expect("render");
        let role = set.refs().next().expect("role").clone();
        client.conflict_on(&role);

        let summary = handler.apply(&set).await.expect("apply");

        assert_eq!(summary.forced, 1);
        assert_eq!(summary.applied, 1);
        assert_eq!(client.apply_calls(&role), vec![false, true]);
    }

    #[test(tokio::test)]
    async fn delete_tolerates_missing_objects() {
        let client = Arc::new(FakeResourceClient::new());
        let handler = handler(client.clone());
        let set = handler.render_manifests(&context()).expect("render");
        let role = set.refs().next().expect("role").clone();
        client
            .insert(set.objects().next().expect("role object").clone())
            .expect("insert");

        let deleted = handler.delete(&set).await.expect("delete");

        assert_eq!(deleted, 1);
        assert!(client.object(&role).is_none());
    }

    #[test(tokio::test)]
    async fn delete_propagates_other_errors() {
        let client = Arc::new(FakeResourceClient::new());
        let handler = handler(client.clone());
        let set = handler.render_manifests(&context()).expect("render");
        let config = set.refs().last().expect("config").clone();
        client.fail_delete(&config, 403);

        let err = handler.delete(&set).await.expect_err("forbidden");

        assert!(matches!(
            err.current_context(),
            KubernetesError::Api { code: 403, .. }
        ));
    }
}
