//! Runtime configuration, resolved once at startup.
//!
//! The controller is stateless and its configuration is immutable for the
//! process lifetime; anything invalid here is a fatal startup error rather
//! than a runtime fault.

use core::time::Duration;

use crate::app::coordinator::OperationPolicy;
use crate::cli::{CommonArgs, DemoArgs, ServeArgs};

/// Immutable identity of the managed instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdentity {
    pub project: String,
    pub zone: String,
    pub name: String,
}

impl InstanceIdentity {
    /// Rejects identifiers the provider API could not address.
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending field when a value is empty or
    /// contains characters outside the provider's resource-name alphabet.
    pub fn validate(&self) -> eyre::Result<()> {
        for (field, value) in [
            ("project", &self.project),
            ("zone", &self.zone),
            ("vm name", &self.name),
        ] {
            eyre::ensure!(!value.is_empty(), "{field} must not be empty");
            eyre::ensure!(
                value
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
                "{field} '{value}' contains characters the provider API does not accept"
            );
        }
        Ok(())
    }
}

/// HTTP server binding configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port for the control surface.
    pub port: u16,
    /// Bind address for the HTTP listener.
    pub bind: String,
}

/// Request-level HTTP settings.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Upper bound for a single inbound request.
    pub request_timeout: Duration,
    /// Allowed CORS origins; `None` allows any origin (the browser clients of
    /// this service are cross-origin by design).
    pub cors_allow_origins: Option<Vec<String>>,
}

/// Root configuration for the controller process.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Identity of the single managed instance.
    pub instance: InstanceIdentity,
    /// HTTP server binding configuration.
    pub server: ServerConfig,
    /// Operation handling tunables.
    pub policy: OperationPolicy,
    /// Request-level HTTP settings.
    pub http: HttpConfig,
}

impl ControllerConfig {
    /// Builds and validates the configuration for the real control service.
    ///
    /// # Errors
    ///
    /// Returns an error when the instance identity is invalid.
    pub fn from_serve_args(args: &ServeArgs) -> eyre::Result<Self> {
        let instance = InstanceIdentity {
            project: args.project.clone(),
            zone: args.zone.clone(),
            name: args.name.clone(),
        };
        instance.validate()?;
        Ok(Self::assemble(instance, &args.common))
    }

    /// Configuration for the demo service: a fixed placeholder identity, the
    /// same tunables as the real service.
    pub fn for_demo(args: &DemoArgs) -> Self {
        let instance = InstanceIdentity {
            project: "demo-project".to_string(),
            zone: "demo-zone-a".to_string(),
            name: "demo-instance".to_string(),
        };
        Self::assemble(instance, &args.common)
    }

    fn assemble(instance: InstanceIdentity, common: &CommonArgs) -> Self {
        Self {
            instance,
            server: ServerConfig {
                port: common.port,
                bind: common.bind.clone(),
            },
            policy: OperationPolicy {
                deadline: Duration::from_secs(common.operation_deadline_secs),
                poll_interval: Duration::from_millis(common.poll_interval_ms),
                staleness_threshold: Duration::from_secs(common.status_staleness_secs),
            },
            http: HttpConfig {
                request_timeout: Duration::from_secs(common.request_timeout_secs),
                cors_allow_origins: common.cors_allow_origins.clone(),
            },
        }
    }
}
