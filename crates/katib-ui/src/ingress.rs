use std::sync::Arc;

use async_trait::async_trait;
use charm_core::check;
use charm_core::component::Component;
use charm_core::event::HookEvent;
use charm_core::interfaces::negotiate;
use charm_core::interfaces::publish_app_data;
use charm_core::interfaces::IngressRoute;
use charm_core::interfaces::InterfaceKind;
use charm_core::interfaces::IstioIngressRouteConfig;
use charm_core::interfaces::NegotiatedInterface;
use charm_core::model::CharmModel;
use charm_core::CharmError;
use charm_core::CharmResult;
use charm_core::Check;
use charm_core::Status;
use error_stack::ResultExt;
use tracing::info;

pub const ISTIO_INGRESS_ROUTE_RELATION: &str = "istio-ingress-route";

const URL_PREFIX: &str = "/katib/";
const GATEWAY_HTTP_PORT: u16 = 80;
const BOTH_RELATIONS: &str = "Cannot have both 'istio-ingress-route' and 'ingress' relations. Please remove the deprecated 'ingress' relation.";

/// Routes `/katib/` on the gateway to the UI service, through either the
/// sidecar `ingress` interface or the ambient `istio-ingress-route` one.
pub struct IngressComponent {
    model: Arc<dyn CharmModel>,
    port: u16,
}

impl IngressComponent {
    pub fn new(model: Arc<dyn CharmModel>, port: u16) -> Self {
        Self { model, port }
    }

    fn has_relation(&self, relation_name: &str) -> CharmResult<bool> {
        let relations = self
            .model
            .relations(relation_name)
            .change_context_lazy(|| CharmError::Model {
                message: format!("failed to read relation {relation_name}"),
            })?;
        Ok(!relations.is_empty())
    }

    /// The negotiated `ingress` interface, `None` when not related.
    fn interface(&self) -> CharmResult<Check<Option<NegotiatedInterface>>> {
        if self.has_relation(ISTIO_INGRESS_ROUTE_RELATION)?
            && self.has_relation(InterfaceKind::Ingress.relation_name())?
        {
            return Ok(Check::Fail(Status::blocked(BOTH_RELATIONS)));
        }
        negotiate(&self.model, InterfaceKind::Ingress)
    }

    fn route(&self) -> IngressRoute {
        IngressRoute {
            prefix: URL_PREFIX.to_string(),
            service: self.model.app_name().to_string(),
            port: self.port,
            rewrite: None,
        }
    }

    fn istio_route(&self) -> IstioIngressRouteConfig {
        IstioIngressRouteConfig::path_prefix(
            self.model.model_name(),
            &format!("{}-http", self.model.app_name()),
            GATEWAY_HTTP_PORT,
            URL_PREFIX,
            self.model.app_name(),
            self.port,
        )
    }
}

#[async_trait]
impl Component for IngressComponent {
    async fn status(&self) -> CharmResult<Status> {
        check!(self.interface());
        Ok(Status::Active)
    }

    async fn reconcile(&self, _event: &HookEvent) -> CharmResult<Check<()>> {
        if let Some(interface) = check!(self.interface()) {
            let route = self.route();
            interface.send_data(&route)?;
            info!(prefix = %route.prefix, port = route.port, version = %interface.version(), "published ingress route");
        }

        let written = publish_app_data(
            self.model.as_ref(),
            ISTIO_INGRESS_ROUTE_RELATION,
            &self.istio_route().to_bag()?,
        )?;
        if written > 0 {
            info!(prefix = URL_PREFIX, port = self.port, "submitted istio ingress route");
        }
        Ok(Check::Pass(()))
    }
}
