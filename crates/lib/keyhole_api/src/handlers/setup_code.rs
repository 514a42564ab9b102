//! One-time setup codes for client configuration bootstrap.

use axum::Json;
use axum::extract::{Extension, State};

use crate::AppState;
use crate::error::AppResult;
use crate::extract::JsonBody;
use crate::middleware::api_key::ApiProject;
use crate::middleware::client::ClientMeta;
use crate::models::{SetupCodeExchangeRequest, SetupCodeResponse, SetupConfigResponse};

/// `POST /setup-code`: issue a code for the API key's project.
pub async fn issue_handler(
    State(state): State<AppState>,
    Extension(ApiProject(project)): Extension<ApiProject>,
    ClientMeta(client): ClientMeta,
) -> AppResult<Json<SetupCodeResponse>> {
    let issued = state.gateway.issue_setup_code(&project, &client).await?;
    Ok(Json(SetupCodeResponse {
        code: issued.code,
        expires_at: issued.expires_at,
    }))
}

/// `POST /setup-code/exchange`: redeem a code for the project's public configuration.
pub async fn exchange_handler(
    State(state): State<AppState>,
    ClientMeta(client): ClientMeta,
    JsonBody(body): JsonBody<SetupCodeExchangeRequest>,
) -> AppResult<Json<SetupConfigResponse>> {
    let bootstrap = state
        .gateway
        .exchange_setup_code(body.code.as_deref().unwrap_or_default(), &client)
        .await?;
    Ok(Json(bootstrap.into()))
}
