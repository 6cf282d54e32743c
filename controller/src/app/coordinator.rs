//! Operation coordinator: serializes concurrent start/stop/status requests
//! against the single managed instance.
//!
//! All phase transitions and ticket handling go through one mutex, so status
//! reads never observe a half-applied transition. Completions and
//! reconciliations capture the record's generation and are discarded when a
//! newer request has superseded them.

use alloc::sync::Arc;
use core::time::Duration;

use thiserror::Error as ThisError;
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, MissedTickBehavior, interval, timeout, timeout_at};
use tracing::{Instrument as _, debug, info, warn};

use crate::app::lifecycle::{Admission, LifecycleRecord, OperationKind, Phase, admit};
use crate::provider::{InstanceClient, InstanceDescription, ProviderError};

/// Tunables for operation handling, derived from configuration at startup.
#[derive(Debug, Clone)]
pub struct OperationPolicy {
    /// Hard deadline for one start/stop attempt, provider polling included.
    pub deadline: Duration,
    /// Interval between describe calls while an operation is in flight.
    pub poll_interval: Duration,
    /// Age beyond which a cached phase is reported stale and re-queried.
    pub staleness_threshold: Duration,
}

/// Result of one finished start/stop attempt, fanned out to every caller
/// coalesced onto the ticket.
#[derive(Debug, Clone)]
pub(crate) struct OperationOutcome {
    pub phase: Phase,
    pub error: Option<String>,
}

type OutcomeTx = watch::Sender<Option<OperationOutcome>>;
type OutcomeRx = watch::Receiver<Option<OperationOutcome>>;

/// One in-flight start or stop attempt. At most one exists at a time.
#[derive(Debug)]
struct Ticket {
    kind: OperationKind,
    generation: u64,
    outcome_rx: OutcomeRx,
}

/// Handle onto an accepted (or coalesced) operation's eventual outcome.
#[derive(Debug)]
pub(crate) struct OperationHandle {
    rx: OutcomeRx,
}

impl OperationHandle {
    /// Awaits the operation outcome, bounded by `bound`. Returns `None` when
    /// the bound passes first or the driver vanished without reporting.
    pub(crate) async fn wait(mut self, bound: Duration) -> Option<OperationOutcome> {
        let waited = timeout(bound, async {
            loop {
                if let Some(ref outcome) = *self.rx.borrow_and_update() {
                    return Some(outcome.clone());
                }
                if self.rx.changed().await.is_err() {
                    return None;
                }
            }
        })
        .await;
        waited.ok().flatten()
    }
}

/// Why a start/stop request was not admitted.
#[derive(Debug, ThisError)]
pub(crate) enum ControlError {
    #[error(
        "instance is {phase:?}; conflicting request rejected, retry once the in-flight transition completes"
    )]
    Conflict { phase: Phase },
}

/// Decision returned for an admitted start/stop request.
#[derive(Debug)]
pub(crate) enum ControlOutcome {
    /// The instance already is (or is moving to) the desired state.
    AlreadyInDesiredState(Phase),
    /// A new ticket was created and its driver task spawned.
    Accepted {
        phase: Phase,
        handle: OperationHandle,
    },
    /// Coalesced onto the existing same-kind ticket; no new provider call.
    Reused {
        phase: Phase,
        handle: OperationHandle,
    },
}

/// Snapshot returned by [`Coordinator::status`].
#[derive(Debug, Clone)]
pub(crate) struct StatusSnapshot {
    pub phase: Phase,
    /// Time since the last successful provider observation; `None` until the
    /// first one lands after process start.
    pub age: Option<Duration>,
    pub stale: bool,
    pub last_error: Option<String>,
    pub in_flight: Option<OperationKind>,
}

/// Why a start/stop attempt failed.
#[derive(Debug, ThisError)]
enum OperationError {
    #[error(transparent)]
    Provider(ProviderError),
    #[error("inconclusive: {kind:?} did not reach a terminal state within {after:?}")]
    Inconclusive { kind: OperationKind, after: Duration },
}

/// Mutable coordinator state; every access goes through the one lock.
struct Inner {
    record: LifecycleRecord,
    ticket: Option<Ticket>,
    reconciling: bool,
}

/// The single coordination point for the managed instance.
pub struct Coordinator<C> {
    client: C,
    policy: OperationPolicy,
    inner: Mutex<Inner>,
}

impl<C: InstanceClient> Coordinator<C> {
    pub(crate) fn new(client: C, policy: OperationPolicy) -> Arc<Self> {
        Arc::new(Self {
            client,
            policy,
            inner: Mutex::new(Inner {
                record: LifecycleRecord::new(),
                ticket: None,
                reconciling: false,
            }),
        })
    }

    pub(crate) async fn request_start(self: &Arc<Self>) -> Result<ControlOutcome, ControlError> {
        self.request(OperationKind::Start).await
    }

    pub(crate) async fn request_stop(self: &Arc<Self>) -> Result<ControlOutcome, ControlError> {
        self.request(OperationKind::Stop).await
    }

    async fn request(self: &Arc<Self>, kind: OperationKind) -> Result<ControlOutcome, ControlError> {
        let mut inner = self.inner.lock().await;

        if let Some(ref ticket) = inner.ticket {
            if ticket.kind == kind {
                debug!(?kind, generation = ticket.generation, "Coalescing onto in-flight ticket");
                return Ok(ControlOutcome::Reused {
                    phase: inner.record.phase,
                    handle: OperationHandle {
                        rx: ticket.outcome_rx.clone(),
                    },
                });
            }
            return Err(ControlError::Conflict {
                phase: inner.record.phase,
            });
        }

        match admit(kind, inner.record.phase) {
            Admission::AlreadyThere => Ok(ControlOutcome::AlreadyInDesiredState(inner.record.phase)),
            Admission::Conflict => Err(ControlError::Conflict {
                phase: inner.record.phase,
            }),
            Admission::Accept => {
                inner.record.generation += 1;
                inner.record.phase = kind.transient_phase();
                inner.record.last_error = None;
                let generation = inner.record.generation;

                let (outcome_tx, outcome_rx) = watch::channel(None);
                inner.ticket = Some(Ticket {
                    kind,
                    generation,
                    outcome_rx: outcome_rx.clone(),
                });
                info!(?kind, generation, "Accepted operation");
                self.spawn_operation(kind, generation, outcome_tx);

                Ok(ControlOutcome::Accepted {
                    phase: inner.record.phase,
                    handle: OperationHandle { rx: outcome_rx },
                })
            }
        }
    }

    fn spawn_operation(self: &Arc<Self>, kind: OperationKind, generation: u64, outcome_tx: OutcomeTx) {
        let coordinator = Arc::clone(self);
        tokio::spawn(
            async move {
                let result = coordinator.drive(kind).await;
                coordinator.complete(kind, generation, result, &outcome_tx).await;
            }
            .in_current_span(),
        );
    }

    /// Issues the provider call, then polls `describe` until the instance
    /// reaches the operation's target state or the ticket deadline passes.
    async fn drive(&self, kind: OperationKind) -> Result<Phase, OperationError> {
        let deadline = Instant::now() + self.policy.deadline;
        let work = async {
            let operation_id = match kind {
                OperationKind::Start => self.client.start_instance().await?,
                OperationKind::Stop => self.client.stop_instance().await?,
            };
            debug!(%operation_id, ?kind, "Provider accepted operation");

            let target = kind.target_phase();
            let mut ticker = interval(self.policy.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let description = self.client.describe_instance().await?;
                let observed = description.status.phase();
                debug!(?observed, ?target, "Polled instance during operation");
                if observed == target {
                    return Ok(target);
                }
            }
        };

        match timeout_at(deadline, work).await {
            Ok(result) => result.map_err(OperationError::Provider),
            Err(_elapsed) => Err(OperationError::Inconclusive {
                kind,
                after: self.policy.deadline,
            }),
        }
    }

    /// Applies a finished operation, unless a newer generation superseded it.
    async fn complete(
        &self,
        kind: OperationKind,
        generation: u64,
        result: Result<Phase, OperationError>,
        outcome_tx: &OutcomeTx,
    ) {
        let outcome = {
            let mut inner = self.inner.lock().await;
            if inner.record.generation == generation {
                inner.ticket = None;
                match result {
                    Ok(phase) => {
                        inner.record.phase = phase;
                        inner.record.last_observed_at = Some(Instant::now());
                        inner.record.last_error = None;
                        info!(?kind, ?phase, generation, "Operation completed");
                        OperationOutcome { phase, error: None }
                    }
                    Err(error) => {
                        inner.record.phase = Phase::Error;
                        inner.record.last_error = Some(error.to_string());
                        warn!(?kind, generation, %error, "Operation failed");
                        OperationOutcome {
                            phase: Phase::Error,
                            error: Some(error.to_string()),
                        }
                    }
                }
            } else {
                debug!(
                    generation,
                    current = inner.record.generation,
                    "Discarding stale completion"
                );
                OperationOutcome {
                    phase: inner.record.phase,
                    error: Some("superseded by a newer request".to_string()),
                }
            }
        };
        // Ignore send error: all coalesced waiters may have gone away.
        drop(outcome_tx.send(Some(outcome)));
    }

    /// Returns the current record without mutating it. A stale or unsettled
    /// record triggers a background reconciliation when no operation is in
    /// flight; the caller is never blocked on the provider.
    pub(crate) async fn status(self: &Arc<Self>) -> StatusSnapshot {
        let mut inner = self.inner.lock().await;
        let age = inner.record.last_observed_at.map(|at| at.elapsed());
        let stale = age.is_none_or(|observed| observed > self.policy.staleness_threshold);
        let unsettled = matches!(inner.record.phase, Phase::Unknown | Phase::Error);

        if (stale || unsettled) && inner.ticket.is_none() && !inner.reconciling {
            inner.reconciling = true;
            let generation = inner.record.generation;
            let coordinator = Arc::clone(self);
            debug!(generation, "Spawning background reconciliation");
            tokio::spawn(
                async move {
                    coordinator.reconcile(generation).await;
                }
                .in_current_span(),
            );
        }

        StatusSnapshot {
            phase: inner.record.phase,
            age,
            stale,
            last_error: inner.record.last_error.clone(),
            in_flight: inner.ticket.as_ref().map(|ticket| ticket.kind),
        }
    }

    /// Background requery of the provider, applied only when still current.
    async fn reconcile(&self, captured_generation: u64) {
        let result = self.client.describe_instance().await;
        let mut inner = self.inner.lock().await;
        inner.reconciling = false;
        match result {
            Ok(description) => apply_observation(&mut inner, captured_generation, &description),
            Err(error) => {
                warn!(%error, "Reconciliation query failed; keeping cached phase");
            }
        }
    }

    /// Forces a fresh provider query and returns the full description. Used
    /// by read paths that need instance details beyond the phase.
    pub(crate) async fn reconcile_now(
        self: &Arc<Self>,
    ) -> Result<InstanceDescription, ProviderError> {
        let captured_generation = self.inner.lock().await.record.generation;
        let description = self.client.describe_instance().await?;
        let mut inner = self.inner.lock().await;
        apply_observation(&mut inner, captured_generation, &description);
        Ok(description)
    }
}

/// Overwrites the cached phase with a provider observation, unless a mutation
/// was accepted in the meantime (generation moved) or an operation is in
/// flight.
fn apply_observation(inner: &mut Inner, captured_generation: u64, description: &InstanceDescription) {
    if inner.record.generation != captured_generation || inner.ticket.is_some() {
        debug!(
            captured_generation,
            current = inner.record.generation,
            "Discarding stale observation"
        );
        return;
    }
    inner.record.phase = description.status.phase();
    inner.record.last_observed_at = Some(Instant::now());
    inner.record.last_error = None;
}
