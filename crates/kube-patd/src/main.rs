//! kube-patd daemon entry point.
//!
//! Parses the command line, initializes logging, waits for the resource
//! caches to sync and runs the reconciliation worker until SIGINT/SIGTERM.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use k8s_openapi::api::core::v1::Service;
use kube::{Api, Client};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use kube_pat_common::{AddressTranslationSpec, Protocol, ServiceSnapshot};
use kube_patd::k8s::{crd_yaml, KubeCollection, KubeLoadBalancer, PortAddressTranslation};
use kube_patd::tables::defaults;
use kube_patd::{
    Controller, ControllerOptions, Iptables, PortForwarder, ReconcileTrigger, ResourceCache,
};

/// Port Address Translation controller
#[derive(Parser, Debug)]
#[command(name = "kube-patd")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Load-balancer service (namespace/name) exposing TCP ports, empty to disable
    #[arg(long, default_value = defaults::TCP_SERVICE, global = true)]
    tcp_service: String,

    /// Load-balancer service (namespace/name) exposing UDP ports, empty to disable
    #[arg(long, default_value = defaults::UDP_SERVICE, global = true)]
    udp_service: String,

    /// Network interface receiving the translated traffic
    #[arg(short = 'i', long, default_value = defaults::INTERFACE, global = true)]
    interface: String,

    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG
    #[arg(short = 'l', long, default_value = defaults::LOG_LEVEL, global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run the controller (default)
    Run,
    /// Print the PortAddressTranslation CustomResourceDefinition
    Crd,
}

impl Args {
    fn controller_options(&self) -> anyhow::Result<ControllerOptions> {
        let options = ControllerOptions::default()
            .with_interface(self.interface.clone())
            .with_load_balancer(Protocol::Tcp, &self.tcp_service)?
            .with_load_balancer(Protocol::Udp, &self.udp_service)?;
        Ok(options)
    }
}

/// Initialize tracing with an env filter, falling back to `log_level`.
fn init_logging(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

/// Cancels `shutdown` on SIGINT or SIGTERM.
async fn wait_for_signal(shutdown: CancellationToken) {
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for SIGINT");
                return;
            }
            info!("Received SIGINT, shutting down");
        }
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}

async fn run(args: &Args) -> anyhow::Result<()> {
    let options = args.controller_options()?;
    for (protocol, target) in &options.load_balancers {
        info!(%protocol, %target, "Synchronizing load balancer");
    }

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let (specs, specs_driver) = KubeCollection::<AddressTranslationSpec>::spawn(
        "portaddresstranslations",
        Api::<PortAddressTranslation>::all(client.clone()),
    );
    let (services, services_driver) =
        KubeCollection::<ServiceSnapshot>::spawn("services", Api::<Service>::all(client.clone()));

    info!("Waiting for caches to sync");
    specs.ready().await?;
    services.ready().await?;

    let forwarder = PortForwarder::new(Arc::new(Iptables::default()), options.interface.clone())
        .await
        .context("Failed to configure masquerade")?;

    let cache = ResourceCache::new(Arc::new(specs), Arc::new(services));
    let controller = Controller::new(
        cache.clone(),
        forwarder,
        Arc::new(KubeLoadBalancer::new(client)),
        options,
    );

    let trigger = ReconcileTrigger::new();
    let forwarders = cache.forward_events(&trigger);

    let shutdown = CancellationToken::new();
    let signals = tokio::spawn(wait_for_signal(shutdown.clone()));

    controller.run(trigger, shutdown).await;

    signals.abort();
    for task in forwarders
        .into_iter()
        .chain([specs_driver, services_driver])
    {
        task.abort();
    }
    Ok(())
}

fn print_crd() -> anyhow::Result<()> {
    let yaml = crd_yaml().context("Failed to render CustomResourceDefinition")?;
    print!("{}", yaml);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    let result = match args.command.unwrap_or(Command::Run) {
        Command::Crd => print_crd(),
        Command::Run => {
            info!("--- Starting kube-patd ---");
            run(&args).await
        }
    };

    match result {
        Ok(()) => {
            info!("kube-patd exiting normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("kube-patd error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
