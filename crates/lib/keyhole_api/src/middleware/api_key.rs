//! `x-api-key` authentication for project-scoped routes.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use keyhole_core::models::Project;

use crate::AppState;
use crate::error::AppError;
use crate::middleware::client::client_info;

pub const API_KEY_HEADER: &str = "x-api-key";

/// The project the request's API key resolved to.
#[derive(Debug, Clone)]
pub struct ApiProject(pub Project);

/// Axum middleware: resolves `x-api-key` to a project (counting the call
/// against the API rate limit) and injects [`ApiProject`] into request
/// extensions.
pub async fn require_api_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Missing x-api-key header".into()))?
        .to_string();

    let (parts, body) = request.into_parts();
    let client = client_info(&parts, state.config.trust_proxy_headers);
    request = Request::from_parts(parts, body);

    let project = state.gateway.authenticate_api_key(&key, &client).await?;
    request.extensions_mut().insert(ApiProject(project));

    Ok(next.run(request).await)
}
