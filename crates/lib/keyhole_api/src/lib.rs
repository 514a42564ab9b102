//! # keyhole_api
//!
//! HTTP API library for Keyhole.

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use keyhole_core::Gateway;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::handlers::{admin, health, session, setup_code, token};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Authentication gateway.
    pub gateway: Arc<Gateway>,
    /// API configuration.
    pub config: ApiConfig,
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (code + redirect URI or session token only)
    let public = Router::new()
        .route(routes::GET_HEALTH, get(health::health_handler))
        .route(routes::POST_TOKEN, post(token::exchange_handler))
        .route(routes::POST_SESSION_VERIFY, post(session::verify_handler))
        .route(routes::POST_SESSION_LOGOUT, post(session::logout_handler))
        .route(
            routes::POST_SETUP_CODE_EXCHANGE,
            post(setup_code::exchange_handler),
        );

    // Project-scoped routes (require x-api-key)
    let scoped = Router::new()
        .route(routes::POST_API_TOKEN, post(token::api_exchange_handler))
        .route(routes::POST_SETUP_CODE, post(setup_code::issue_handler))
        .route(routes::GET_ADMIN_SESSIONS, get(admin::list_sessions_handler))
        .route(
            routes::DELETE_ADMIN_SESSIONS_USER_ID,
            delete(admin::revoke_session_handler),
        )
        .route(routes::GET_ADMIN_AUDIT, get(admin::list_audit_handler))
        .route(
            routes::GET_ADMIN_SECURITY_BRUTE_FORCE,
            get(admin::brute_force_handler),
        )
        .route(
            routes::POST_ADMIN_API_KEY_ROTATE,
            post(admin::rotate_api_key_handler),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::api_key::require_api_key,
        ));

    Router::new()
        .merge(public)
        .merge(scoped)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
