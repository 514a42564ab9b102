//! Authorization code exchange.

use axum::Json;
use axum::extract::{Extension, State};
use keyhole_core::gateway::ExchangeRequest;

use crate::AppState;
use crate::error::AppResult;
use crate::extract::JsonBody;
use crate::middleware::api_key::ApiProject;
use crate::middleware::client::ClientMeta;
use crate::models::{ApiTokenResponse, TokenRequest, TokenResponse};

/// `POST /token`: exchange a code for a session token (public variant).
pub async fn exchange_handler(
    State(state): State<AppState>,
    ClientMeta(client): ClientMeta,
    JsonBody(body): JsonBody<TokenRequest>,
) -> AppResult<Json<TokenResponse>> {
    let outcome = state
        .gateway
        .exchange_code(&ExchangeRequest::from(body), None, &client)
        .await?;
    Ok(Json(TokenResponse::from(&outcome)))
}

/// `POST /api/token`: server-to-server exchange scoped to the API key's project.
pub async fn api_exchange_handler(
    State(state): State<AppState>,
    Extension(ApiProject(project)): Extension<ApiProject>,
    ClientMeta(client): ClientMeta,
    JsonBody(body): JsonBody<TokenRequest>,
) -> AppResult<Json<ApiTokenResponse>> {
    let outcome = state
        .gateway
        .exchange_code(&ExchangeRequest::from(body), Some(&project), &client)
        .await?;
    Ok(Json(ApiTokenResponse {
        token: TokenResponse::from(&outcome),
        token_version: outcome.user.token_version,
    }))
}
