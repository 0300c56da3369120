use std::sync::Arc;

use anyhow::Result;
use charm_core::hook_tools::HookTools;
use charm_core::kubernetes::init_kube_client;
use charm_core::kubernetes::KubeResourceClient;
use charm_core::model::CharmModel;
use charm_core::pebble::PebbleCli;
use clap::Parser;
use katib_ui::charm::KatibUiCharm;
use katib_ui::config::Cli;
use katib_ui::workload::CONTAINER;
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

    tracing::info!("Starting katib-ui charm {}", &**version::VERSION);

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

    let charm = KatibUiCharm::new(
        model.clone(),
        Arc::new(KubeResourceClient::new(client, model.app_name())),
        Arc::new(PebbleCli::new(
            CONTAINER,
            cli.charm.pebble_bin.clone(),
            cli.charm.pebble_socket(CONTAINER),
        )),
    )
    .map_err(|e| anyhow::anyhow!("Failed to set up charm: {e:?}"))?;

    charm
        .handle(&event)
        .await
        .map_err(|e| anyhow::anyhow!("Hook {} failed: {e:?}", cli.charm.hook))?;

    Ok(())
}
