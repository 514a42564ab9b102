//! Session verification and logout.

use axum::Json;
use axum::extract::State;
use keyhole_core::GatewayError;

use crate::AppState;
use crate::error::AppResult;
use crate::extract::JsonBody;
use crate::middleware::client::ClientMeta;
use crate::models::{
    LogoutRequest, LogoutResponse, ProjectInfo, UserInfo, VerifyRequest, VerifyResponse,
};

/// `POST /session/verify`: authentication failures answer 200 with
/// `valid: false` and a reason.
pub async fn verify_handler(
    State(state): State<AppState>,
    ClientMeta(client): ClientMeta,
    JsonBody(body): JsonBody<VerifyRequest>,
) -> AppResult<Json<VerifyResponse>> {
    let token = body.token.as_deref().unwrap_or_default();
    match state
        .gateway
        .verify_session(token, body.project_id, &client)
        .await
    {
        Ok(verified) => Ok(Json(VerifyResponse {
            valid: true,
            reason: None,
            user: Some(UserInfo::from(&verified.user)),
            project: Some(ProjectInfo::from(&verified.project)),
        })),
        Err(GatewayError::SessionRejected(rejection)) => {
            Ok(Json(VerifyResponse::invalid(rejection.reason())))
        }
        Err(e) => Err(e.into()),
    }
}

/// `POST /session/logout`: end the token's session.
pub async fn logout_handler(
    State(state): State<AppState>,
    ClientMeta(client): ClientMeta,
    JsonBody(body): JsonBody<LogoutRequest>,
) -> AppResult<Json<LogoutResponse>> {
    let token = body.token.as_deref().unwrap_or_default();
    let removed = state.gateway.logout(token, &client).await?;
    Ok(Json(LogoutResponse { logged_out: removed }))
}
