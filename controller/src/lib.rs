//! Library entry for the `vmgate_controller` crate.
//!
//! Exposes `inner_main` so the workspace-level shim binary can call into the
//! controller logic.

extern crate alloc;
extern crate core;

pub mod app;
pub mod cli;
pub mod config;
pub mod http;
pub mod provider;
pub mod run;

use core::time::Duration;
use std::sync::Once;

use eyre::Result;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt::time::ChronoLocal};

use crate::cli::{Cli, Command, LogFormat};
use crate::config::ControllerConfig;
use crate::provider::{GceClient, InstanceBackend, SimClient};

static INIT_TRACING: Once = Once::new();

/// The controller's main function; can be called from a shim binary.
///
/// Parses the already-collected CLI invocation and launches the control
/// service against either the real compute provider or a simulated instance.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the server fails to
/// start.
pub async fn inner_main(invocation: Cli) -> Result<()> {
    init_tracing(invocation.command.common().log_format);

    match invocation.command {
        Command::Serve(ref args) => {
            let config = ControllerConfig::from_serve_args(args)?;
            info!(
                project = %config.instance.project,
                zone = %config.instance.zone,
                instance = %config.instance.name,
                version = env!("CARGO_PKG_VERSION"),
                "Starting controller"
            );
            let backend = InstanceBackend::Gce(GceClient::new(config.instance.clone())?);
            run::start(config, backend).await
        }
        Command::Demo(ref args) => {
            let config = ControllerConfig::for_demo(args);
            info!(
                version = env!("CARGO_PKG_VERSION"),
                "Starting controller against a simulated instance"
            );
            let backend =
                InstanceBackend::Sim(SimClient::new(Duration::from_millis(args.transition_ms)));
            run::start(config, backend).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    INIT_TRACING.call_once(move || {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_timer(ChronoLocal::rfc_3339());

        match format {
            LogFormat::Compact => builder.compact().init(),
            LogFormat::Json => builder.json().init(),
            LogFormat::Pretty => builder.pretty().init(),
        }
    });
}
