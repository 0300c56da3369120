use std::path::PathBuf;

use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use kube::api::DeleteParams;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::core::DynamicObject;
use kube::discovery;
use kube::discovery::Scope;
use kube::Api;
use kube::Client;
use kube::Config;
use tracing::debug;

use super::KubernetesError;
use super::ObjectRef;

/// Generic object access against the API server.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Live object, or `None` if it does not exist.
    async fn get(&self, object: &ObjectRef)
        -> Result<Option<DynamicObject>, Report<KubernetesError>>;

    /// Server-side apply. `force` takes ownership of conflicting fields.
    async fn apply(&self, object: &DynamicObject, force: bool)
        -> Result<(), Report<KubernetesError>>;

    async fn delete(&self, object: &ObjectRef) -> Result<(), Report<KubernetesError>>;
}

pub async fn init_kube_client(
    kubeconfig: Option<PathBuf>,
) -> Result<Client, Report<KubernetesError>> {
    let client = match kubeconfig {
        Some(kubeconfig_path) => {
            let kubeconfig = Kubeconfig::read_from(&kubeconfig_path).change_context(
                KubernetesError::ConnectionFailed {
                    message: format!(
                        "Failed to read kubeconfig file: {}",
                        kubeconfig_path.display()
                    ),
                },
            )?;

            let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .change_context(KubernetesError::ConnectionFailed {
                    message: format!(
                        "Failed to create config from kubeconfig: {}",
                        kubeconfig_path.display()
                    ),
                })?;

            Client::try_from(config).change_context(KubernetesError::ConnectionFailed {
                message: "Failed to create Kubernetes client from custom kubeconfig".to_string(),
            })?
        }
        None => {
            // In-cluster service account when running as a charm.
            Client::try_default()
                .await
                .change_context(KubernetesError::ConnectionFailed {
                    message: "Failed to create Kubernetes client".to_string(),
                })?
        }
    };
    Ok(client)
}

/// [`ResourceClient`] on top of a `kube` client, resolving each object's
/// resource and scope through API discovery.
pub struct KubeResourceClient {
    client: Client,
    field_manager: String,
}

impl KubeResourceClient {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    async fn api_for(
        &self,
        object: &ObjectRef,
    ) -> Result<Api<DynamicObject>, Report<KubernetesError>> {
        let (resource, capabilities) = discovery::pinned_kind(&self.client, &object.gvk())
            .await
            .map_err(|err| classify(err, object))?;

        let api = match (&capabilities.scope, &object.namespace) {
            (Scope::Namespaced, Some(namespace)) => {
                Api::namespaced_with(self.client.clone(), namespace, &resource)
            }
            (Scope::Namespaced, None) => Api::default_namespaced_with(self.client.clone(), &resource),
            (Scope::Cluster, _) => Api::all_with(self.client.clone(), &resource),
        };
        Ok(api)
    }
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn get(
        &self,
        object: &ObjectRef,
    ) -> Result<Option<DynamicObject>, Report<KubernetesError>> {
        let api = match self.api_for(object).await {
            Ok(api) => api,
            // Unknown kind (CRD not installed yet): the object cannot exist.
            Err(report) if report.current_context().is_not_found() => return Ok(None),
            Err(report) => return Err(report),
        };
        api.get_opt(&object.name)
            .await
            .map_err(|err| classify(err, object))
    }

    async fn apply(
        &self,
        object: &DynamicObject,
        force: bool,
    ) -> Result<(), Report<KubernetesError>> {
        let object_ref = ObjectRef::from_object(object).ok_or_else(|| {
            Report::new(KubernetesError::InvalidManifest {
                template: "<in-memory>".to_string(),
                message: "object lacks apiVersion, kind or name".to_string(),
            })
        })?;
        let api = self.api_for(&object_ref).await?;

        let mut params = PatchParams::apply(&self.field_manager);
        if force {
            params = params.force();
        }
        debug!(object = %object_ref, force, "applying");
        api.patch(&object_ref.name, &params, &Patch::Apply(object))
            .await
            .map_err(|err| classify(err, &object_ref))?;
        Ok(())
    }

    async fn delete(&self, object: &ObjectRef) -> Result<(), Report<KubernetesError>> {
        let api = self.api_for(object).await?;
        debug!(object = %object, "deleting");
        api.delete(&object.name, &DeleteParams::default())
            .await
            .map_err(|err| classify(err, object))?;
        Ok(())
    }
}

fn classify(err: kube::Error, object: &ObjectRef) -> Report<KubernetesError> {
    let context = match &err {
        kube::Error::Api(response) if response.code == 409 => KubernetesError::Conflict {
            object: object.to_string(),
        },
        kube::Error::Api(response) if response.code == 404 => KubernetesError::NotFound {
            object: object.to_string(),
        },
        kube::Error::Api(response) => KubernetesError::Api {
            object: object.to_string(),
            code: response.code,
            message: response.message.clone(),
        },
        // Group/version served but kind unknown to discovery.
        kube::Error::Discovery(_) => KubernetesError::NotFound {
            object: object.to_string(),
        },
        other => KubernetesError::ConnectionFailed {
            message: other.to_string(),
        },
    };
    Report::new(err).change_context(context)
}
