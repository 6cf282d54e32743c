//! Instance control endpoints: start, stop, status and connection info.

use core::time::Duration;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse as _, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::app::{AppState, ControlError, ControlOutcome, OperationKind, Phase};

/// Scheduling slack added on top of the ticket deadline when a caller opts
/// into waiting for the outcome.
const WAIT_MARGIN: Duration = Duration::from_secs(5);

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/start", post(start_instance))
        .route("/stop", post(stop_instance))
        .route("/status", get(instance_status))
        .route("/connection-info", get(connection_info))
}

/// Optional knobs for start/stop requests.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ControlParams {
    /// When true the request waits for the operation outcome (bounded by the
    /// ticket deadline) instead of returning right after acceptance.
    #[serde(default)]
    wait: bool,
}

#[derive(Debug, Serialize)]
struct ControlBody {
    outcome: &'static str,
    phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[axum::debug_handler]
async fn start_instance(
    State(state): State<AppState>,
    Query(params): Query<ControlParams>,
) -> Response {
    let result = state.coordinator.request_start().await;
    control_response(&state, OperationKind::Start, result, params.wait).await
}

#[axum::debug_handler]
async fn stop_instance(
    State(state): State<AppState>,
    Query(params): Query<ControlParams>,
) -> Response {
    let result = state.coordinator.request_stop().await;
    control_response(&state, OperationKind::Stop, result, params.wait).await
}

/// Maps a coordinator decision onto the wire: 200 for accepted, coalesced and
/// already-satisfied requests, 409 for conflicts, 502 when a waited-on
/// operation fails.
async fn control_response(
    state: &AppState,
    kind: OperationKind,
    result: Result<ControlOutcome, ControlError>,
    wait: bool,
) -> Response {
    let (outcome_label, phase, handle) = match result {
        Err(error @ ControlError::Conflict { .. }) => {
            return (
                StatusCode::CONFLICT,
                Json(ErrorBody {
                    error: error.to_string(),
                }),
            )
                .into_response();
        }
        Ok(ControlOutcome::AlreadyInDesiredState(phase)) => {
            return Json(ControlBody {
                outcome: "already-in-desired-state",
                phase,
                error: None,
            })
            .into_response();
        }
        Ok(ControlOutcome::Accepted { phase, handle }) => ("accepted", phase, handle),
        Ok(ControlOutcome::Reused { phase, handle }) => ("reused", phase, handle),
    };

    if !wait {
        return Json(ControlBody {
            outcome: outcome_label,
            phase,
            error: None,
        })
        .into_response();
    }

    // Outcomes arrive by the ticket deadline at the latest.
    let bound = state.config.policy.deadline + WAIT_MARGIN;
    match handle.wait(bound).await {
        Some(outcome) => match outcome.error {
            None => Json(ControlBody {
                outcome: "completed",
                phase: outcome.phase,
                error: None,
            })
            .into_response(),
            Some(reason) => (
                StatusCode::BAD_GATEWAY,
                Json(ControlBody {
                    outcome: "failed",
                    phase: outcome.phase,
                    error: Some(reason),
                }),
            )
                .into_response(),
        },
        None => (
            StatusCode::BAD_GATEWAY,
            Json(ControlBody {
                outcome: "failed",
                phase: kind.transient_phase(),
                error: Some("operation outcome not observed within the wait bound".to_string()),
            }),
        )
            .into_response(),
    }
}

#[derive(Debug, Serialize)]
struct StatusBody {
    phase: Phase,
    /// Seconds since the last successful provider observation; absent until
    /// the first one lands after process start.
    #[serde(skip_serializing_if = "Option::is_none")]
    age_secs: Option<u64>,
    stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    operation_in_flight: Option<OperationKind>,
}

/// Never fails due to provider unavailability: degrades to the last known
/// phase plus its age.
#[axum::debug_handler]
async fn instance_status(State(state): State<AppState>) -> Json<StatusBody> {
    let snapshot = state.coordinator.status().await;
    Json(StatusBody {
        phase: snapshot.phase,
        age_secs: snapshot.age.map(|age| age.as_secs()),
        stale: snapshot.stale,
        last_error: snapshot.last_error,
        operation_in_flight: snapshot.in_flight,
    })
}

#[derive(Debug, Serialize)]
struct ConnectionInfoBody {
    status: &'static str,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    machine_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    internal_ip: Option<String>,
    vm_ip: String,
}

/// Resolves the instance's reachable address for clients that talk to the
/// workload directly; forces a fresh provider query.
#[axum::debug_handler]
async fn connection_info(State(state): State<AppState>) -> Response {
    let description = match state.coordinator.reconcile_now().await {
        Ok(description) => description,
        Err(error) => {
            return (
                StatusCode::BAD_GATEWAY,
                Json(ErrorBody {
                    error: format!("failed to query instance: {error}"),
                }),
            )
                .into_response();
        }
    };

    if description.status.phase() != Phase::Running {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorBody {
                error: format!("instance is not running (status: {})", description.status),
            }),
        )
            .into_response();
    }

    let Some(external_ip) = description.external_ip else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorBody {
                error: "instance has no external IP configured".to_string(),
            }),
        )
            .into_response();
    };

    Json(ConnectionInfoBody {
        status: "running",
        name: description.name,
        machine_type: description.machine_type,
        internal_ip: description.internal_ip,
        vm_ip: external_ip,
    })
    .into_response()
}

#[derive(Debug, Serialize)]
pub(crate) struct ServiceInfoBody {
    service: &'static str,
    version: &'static str,
    project: String,
    zone: String,
    vm_name: String,
}

/// Service info for the root path: which instance this controller gates.
#[axum::debug_handler]
pub(crate) async fn service_info(State(state): State<AppState>) -> Json<ServiceInfoBody> {
    let instance = &state.config.instance;
    Json(ServiceInfoBody {
        service: "vm-controller",
        version: env!("CARGO_PKG_VERSION"),
        project: instance.project.clone(),
        zone: instance.zone.clone(),
        vm_name: instance.name.clone(),
    })
}
