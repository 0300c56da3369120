use std::sync::Arc;

use anyhow::Result;
use charm_core::certs::OpensslGenerator;
use charm_core::hook_tools::HookTools;
use charm_core::kubernetes::init_kube_client;
use charm_core::kubernetes::KubeResourceClient;
use charm_core::model::CharmModel;
use charm_core::pebble::PebbleCli;
use charm_core::state::StateStore;
use clap::Parser;
use katib_controller::charm::Backends;
use katib_controller::charm::KatibControllerCharm;
use katib_controller::config::Cli;
use katib_controller::workload::CONTAINER;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    utils::logging::init();

    tracing::info!("Starting katib-controller charm {}", &**version::VERSION);

    let event = match cli.charm.event() {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("Ignoring hook {}: {e}", cli.charm.hook);
            return Ok(());
        }
    };

    let model = Arc::new(
        HookTools::from_env().map_err(|e| anyhow::anyhow!("Failed to read unit context: {e:?}"))?,
    );
    let client = init_kube_client(cli.charm.kubeconfig.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {e:?}"))?;
    let state = StateStore::open(cli.charm.state_file.clone())
        .map_err(|e| anyhow::anyhow!("Failed to open charm state: {e:?}"))?;

    let charm = KatibControllerCharm::new(
        model.clone(),
        Backends {
            resources: Arc::new(KubeResourceClient::new(client, model.app_name())),
            workload: Arc::new(PebbleCli::new(
                CONTAINER,
                cli.charm.pebble_bin.clone(),
                cli.charm.pebble_socket(CONTAINER),
            )),
            certificate_generator: Box::new(OpensslGenerator::default()),
            state: Arc::new(state),
        },
    )
    .map_err(|e| anyhow::anyhow!("Failed to set up charm: {e:?}"))?;

    charm
        .handle(&event)
        .await
        .map_err(|e| anyhow::anyhow!("Hook {} failed: {e:?}", cli.charm.hook))?;

    Ok(())
}
