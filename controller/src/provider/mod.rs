//! Instance State Client: the narrow adapter to the compute control plane.
//!
//! The coordinator only ever sees this module's types, so its logic is
//! testable against a fake implementation instead of a real cloud API.

pub mod gce;
pub mod sim;

pub use gce::GceClient;
pub use sim::SimClient;

use core::fmt;
use core::future::Future;

use thiserror::Error as ThisError;

use crate::app::lifecycle::Phase;

/// Errors surfaced by provider calls, split by retry eligibility.
#[derive(Debug, ThisError)]
pub enum ProviderError {
    #[error("instance not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("provider rejected request: {0}")]
    Rejected(String),
    #[error("transient provider failure: {0}")]
    Transient(String),
}

impl ProviderError {
    /// Transient failures are retried with backoff inside the client;
    /// everything else fails the operation immediately.
    pub const fn is_transient(&self) -> bool {
        matches!(*self, Self::Transient(_))
    }
}

/// Provider-side instance status, as reported by `describe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceStatus {
    Provisioning,
    Staging,
    Running,
    Stopping,
    Terminated,
    /// Anything this controller does not recognize; mapped to an unknown
    /// phase so the next reconciliation decides.
    Other(String),
}

impl InstanceStatus {
    pub(crate) fn parse(raw: &str) -> Self {
        match raw {
            "PROVISIONING" => Self::Provisioning,
            "STAGING" => Self::Staging,
            "RUNNING" => Self::Running,
            "STOPPING" => Self::Stopping,
            "TERMINATED" => Self::Terminated,
            other => Self::Other(other.to_string()),
        }
    }

    /// Maps the provider status onto the controller's lifecycle phase.
    pub(crate) fn phase(&self) -> Phase {
        match *self {
            Self::Provisioning | Self::Staging => Phase::Starting,
            Self::Running => Phase::Running,
            Self::Stopping => Phase::Stopping,
            Self::Terminated => Phase::Stopped,
            Self::Other(_) => Phase::Unknown,
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match *self {
            Self::Provisioning => "PROVISIONING",
            Self::Staging => "STAGING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Terminated => "TERMINATED",
            Self::Other(ref raw) => raw,
        };
        f.write_str(label)
    }
}

/// Subset of the provider's instance resource the controller exposes.
#[derive(Debug, Clone)]
pub struct InstanceDescription {
    pub name: String,
    pub status: InstanceStatus,
    pub machine_type: Option<String>,
    pub internal_ip: Option<String>,
    pub external_ip: Option<String>,
}

/// Narrow contract against the compute control plane.
pub trait InstanceClient: Clone + Send + Sync + 'static {
    /// Requests an instance start; returns the provider operation id.
    fn start_instance(&self) -> impl Future<Output = Result<String, ProviderError>> + Send;

    /// Requests an instance stop; returns the provider operation id.
    fn stop_instance(&self) -> impl Future<Output = Result<String, ProviderError>> + Send;

    /// Queries the instance's current provider-side state.
    fn describe_instance(
        &self,
    ) -> impl Future<Output = Result<InstanceDescription, ProviderError>> + Send;
}

/// Concrete client selected at startup: the real provider or the simulation.
#[derive(Clone)]
pub enum InstanceBackend {
    Gce(GceClient),
    Sim(SimClient),
}

impl InstanceClient for InstanceBackend {
    async fn start_instance(&self) -> Result<String, ProviderError> {
        match *self {
            Self::Gce(ref client) => client.start_instance().await,
            Self::Sim(ref client) => client.start_instance().await,
        }
    }

    async fn stop_instance(&self) -> Result<String, ProviderError> {
        match *self {
            Self::Gce(ref client) => client.stop_instance().await,
            Self::Sim(ref client) => client.stop_instance().await,
        }
    }

    async fn describe_instance(&self) -> Result<InstanceDescription, ProviderError> {
        match *self {
            Self::Gce(ref client) => client.describe_instance().await,
            Self::Sim(ref client) => client.describe_instance().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_status_maps_onto_phases() {
        assert_eq!(InstanceStatus::parse("RUNNING").phase(), Phase::Running);
        assert_eq!(InstanceStatus::parse("TERMINATED").phase(), Phase::Stopped);
        assert_eq!(InstanceStatus::parse("PROVISIONING").phase(), Phase::Starting);
        assert_eq!(InstanceStatus::parse("STAGING").phase(), Phase::Starting);
        assert_eq!(InstanceStatus::parse("STOPPING").phase(), Phase::Stopping);
    }

    #[test]
    fn unrecognized_status_maps_to_unknown() {
        assert_eq!(InstanceStatus::parse("REPAIRING").phase(), Phase::Unknown);
        assert_eq!(InstanceStatus::parse("SUSPENDED").phase(), Phase::Unknown);
        assert_eq!(InstanceStatus::parse("").phase(), Phase::Unknown);
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(ProviderError::Transient("connect".to_string()).is_transient());
        assert!(!ProviderError::NotFound("vm".to_string()).is_transient());
        assert!(!ProviderError::PermissionDenied("vm".to_string()).is_transient());
        assert!(!ProviderError::Rejected("bad request".to_string()).is_transient());
    }
}
