//! HTTP routes exposing the computed permissions.
//!
//! These exist to drive the pipeline end to end:
//!
//! - `GET /health`
//! - `GET /permissions`: the caller's identity and role-level flags
//! - `GET /events/:event_ref/permissions`: the same, scoped to one event

use axum::{routing::get, Json, Router};
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::events::EventId;
use crate::identity::Identity;
use crate::middleware::AuthLayer;
use crate::permissions::PermissionSet;
use crate::pipeline::{AuthPipeline, RequestAuth};

/// Route parameter carrying the event id or slug.
pub const EVENT_PARAM: &str = "event_ref";

/// Envelope for successful responses.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Permission summary returned to callers.
#[derive(Debug, Serialize)]
pub struct PermissionsView {
    pub user: Identity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
    pub permissions: PermissionSet,
}

impl From<RequestAuth> for PermissionsView {
    fn from(auth: RequestAuth) -> Self {
        Self {
            user: auth.identity,
            event_id: auth.event.map(|e| e.id),
            permissions: auth.permissions,
        }
    }
}

/// Build the application router.
pub fn build_router(pipeline: AuthPipeline) -> Router {
    let user_routes = Router::new()
        .route("/permissions", get(permissions))
        .route_layer(AuthLayer::new(pipeline.clone()).with_profile());

    let event_routes = Router::new()
        .route(&format!("/events/:{}/permissions", EVENT_PARAM), get(permissions))
        .route_layer(
            AuthLayer::new(pipeline)
                .with_profile()
                .with_event_param(EVENT_PARAM),
        );

    Router::new()
        .route("/health", get(health))
        .merge(user_routes)
        .merge(event_routes)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn permissions(auth: RequestAuth) -> Json<ApiResponse<PermissionsView>> {
    Json(ApiResponse::success(PermissionsView::from(auth)))
}
