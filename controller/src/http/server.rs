//! Router assembly and middleware stack for the control surface.

use axum::{
    Json, Router,
    body::Body,
    http::{HeaderValue, Request, StatusCode},
    routing::{self, IntoMakeService, get},
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{
    ServiceBuilderExt as _,
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::MakeRequestUuid,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::warn;

use crate::app::AppState;
use crate::http::api;

/// Creates the application router: liveness and info endpoints plus the
/// instance control API under `/vm`.
pub(crate) fn create_app_router() -> Router<AppState> {
    Router::new()
        .route("/", get(api::service_info))
        .route("/health", get(health))
        .nest("/vm", api::routes())
}

/// Assembles the full service with middleware applied.
pub(crate) fn create_app(app_state: AppState) -> IntoMakeService<Router<()>> {
    let cors = cors_layer(app_state.config.http.cors_allow_origins.as_deref());

    let middleware_stack = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .propagate_x_request_id()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            app_state.config.http.request_timeout,
        ));

    create_app_router()
        .with_state(app_state)
        .fallback(routing::any(|req: Request<Body>| async move {
            warn!(method = %req.method(), uri = %req.uri(), "Unhandled request");
            StatusCode::NOT_FOUND
        }))
        .layer(middleware_stack)
        .into_make_service()
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    service: &'static str,
}

/// Pure process liveness probe; never touches the coordinator or provider.
#[axum::debug_handler]
async fn health() -> Json<HealthBody> {
    Json(HealthBody {
        status: "healthy",
        service: "vm-controller",
    })
}

fn cors_layer(origins: Option<&[String]>) -> CorsLayer {
    let allow_origin = match origins {
        Some(list) => {
            let parsed = list
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!(%origin, "Ignoring unparseable CORS origin");
                        None
                    }
                })
                .collect::<Vec<_>>();
            AllowOrigin::list(parsed)
        }
        None => AllowOrigin::any(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}
