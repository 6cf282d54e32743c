//! Command-line interface definitions for the controller.
//!
//! Configuration is flag-driven with environment fallbacks, matching the
//! hosting platform's convention of injecting settings via the process
//! environment (`GCP_PROJECT_ID`, `VM_ZONE`, `VM_NAME`, `PORT`, ...).

use clap::{Parser, Subcommand, ValueEnum};

/// Top-level command-line interface definition.
#[derive(Debug, Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands for the controller.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Launch the control service against the configured compute instance.
    Serve(ServeArgs),

    /// Launch the control service against a simulated instance (no cloud calls).
    Demo(DemoArgs),
}

impl Command {
    pub(crate) const fn common(&self) -> &CommonArgs {
        match *self {
            Self::Serve(ref args) => &args.common,
            Self::Demo(ref args) => &args.common,
        }
    }
}

/// Output format for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
    Pretty,
}

/// Arguments shared between the real and the simulated control service.
#[derive(Debug, Parser)]
pub struct CommonArgs {
    /// TCP port for the HTTP control surface (the hosting platform injects PORT).
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Bind address for the HTTP listener.
    #[arg(long, env = "BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Hard deadline for one start/stop operation, provider polling included.
    #[arg(long, env = "OPERATION_DEADLINE_SECS", default_value_t = 300)]
    pub operation_deadline_secs: u64,

    /// Interval between provider polls while an operation is in flight.
    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 2000)]
    pub poll_interval_ms: u64,

    /// Age beyond which a cached status is reported stale and re-queried.
    #[arg(long, env = "STATUS_STALENESS_SECS", default_value_t = 15)]
    pub status_staleness_secs: u64,

    /// Upper bound for a single HTTP request, aligned with the platform's own
    /// request timeout.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 3600)]
    pub request_timeout_secs: u64,

    /// Comma-separated list of allowed CORS origins; unset allows any origin.
    #[arg(long, env = "CORS_ALLOW_ORIGINS", value_delimiter = ',')]
    pub cors_allow_origins: Option<Vec<String>>,

    #[arg(long, value_enum, env = "LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,
}

/// Arguments for the control service command.
#[derive(Debug, Parser)]
pub struct ServeArgs {
    /// Project the managed instance lives in.
    #[arg(long, env = "GCP_PROJECT_ID")]
    pub project: String,

    /// Zone of the managed instance.
    #[arg(long, env = "VM_ZONE")]
    pub zone: String,

    /// Name of the managed instance.
    #[arg(long, env = "VM_NAME")]
    pub name: String,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Arguments for the demo service command.
#[derive(Debug, Parser)]
pub struct DemoArgs {
    /// How long simulated start/stop transitions take to settle.
    #[arg(long, env = "DEMO_TRANSITION_MS", default_value_t = 1500)]
    pub transition_ms: u64,

    #[command(flatten)]
    pub common: CommonArgs,
}
