//! Operator API: verdicts and restart records, behind a bearer token.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{middleware, routing::get, Router};

use crate::health::HealthBoard;
use crate::routing::UpstreamRegistry;
use crate::supervisor::RestartView;

use self::auth::admin_auth_middleware;
use self::handlers::*;

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<UpstreamRegistry>,
    pub health: HealthBoard,
    pub restarts: RestartView,
    pub api_key: Arc<str>,
    pub started_at: Instant,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/upstreams", get(get_upstreams))
        .route("/admin/restarts", get(get_restarts))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
