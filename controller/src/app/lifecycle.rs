//! The controller's belief about the managed instance.
//!
//! The instance's true state is only observable asynchronously through the
//! provider API, so the controller keeps its own lifecycle record and only
//! lets the coordinator move it.

use serde::Serialize;
use tokio::time::Instant;

/// Lifecycle position of the managed instance, as currently believed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Unknown,
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

/// Direction of a power-state operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Start,
    Stop,
}

impl OperationKind {
    /// Phase the record moves to when a request of this kind is accepted.
    pub(crate) const fn transient_phase(self) -> Phase {
        match self {
            Self::Start => Phase::Starting,
            Self::Stop => Phase::Stopping,
        }
    }

    /// Phase the instance must reach for this operation to complete.
    pub(crate) const fn target_phase(self) -> Phase {
        match self {
            Self::Start => Phase::Running,
            Self::Stop => Phase::Stopped,
        }
    }
}

/// Decision for an incoming start/stop request given the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// The instance already is (or is moving to) the desired state; no new
    /// provider call.
    AlreadyThere,
    /// A new operation may begin.
    Accept,
    /// Opposite-direction transition in progress; the request is rejected.
    Conflict,
}

/// The idempotency guard: requesting a transition the instance is already in
/// (or moving towards) is a no-op success, an opposite-direction transition
/// is a conflict, everything else is accepted.
pub(crate) const fn admit(kind: OperationKind, phase: Phase) -> Admission {
    use OperationKind as K;

    match (kind, phase) {
        (K::Start, Phase::Running | Phase::Starting) | (K::Stop, Phase::Stopped | Phase::Stopping) => {
            Admission::AlreadyThere
        }
        (K::Start, Phase::Stopping) | (K::Stop, Phase::Starting) => Admission::Conflict,
        _ => Admission::Accept,
    }
}

/// The controller's record of the one instance it manages.
#[derive(Debug, Clone)]
pub(crate) struct LifecycleRecord {
    /// Current believed phase.
    pub phase: Phase,
    /// When the provider last confirmed an observation; `None` until the
    /// first successful query after process start.
    pub last_observed_at: Option<Instant>,
    /// Detail of the last failure, cleared on the next successful transition.
    pub last_error: Option<String>,
    /// Incremented on every accepted mutation; stale completions carry an
    /// older value and are discarded.
    pub generation: u64,
}

impl LifecycleRecord {
    /// A fresh process trusts nothing until it has reconciled.
    pub(crate) const fn new() -> Self {
        Self {
            phase: Phase::Unknown,
            last_observed_at: None,
            last_error: None,
            generation: 0,
        }
    }
}
