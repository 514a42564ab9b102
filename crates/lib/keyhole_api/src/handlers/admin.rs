//! Administrative endpoints, scoped to the API key's project.

use axum::Json;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use keyhole_core::models::{AuditAction, AuditFilter, AuditStatus};
use uuid::Uuid;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::extract::{PathParam, QueryParams};
use crate::middleware::api_key::ApiProject;
use crate::middleware::client::ClientMeta;
use crate::models::{
    AuditListResponse, AuditQuery, BruteForceQuery, BruteForceResponse, RotateKeyResponse,
    SessionListResponse,
};

/// `GET /admin/sessions`
pub async fn list_sessions_handler(
    State(state): State<AppState>,
    Extension(ApiProject(project)): Extension<ApiProject>,
) -> AppResult<Json<SessionListResponse>> {
    let sessions = state.gateway.list_sessions(project.id).await?;
    Ok(Json(SessionListResponse {
        sessions: sessions.into_iter().map(Into::into).collect(),
    }))
}

/// `DELETE /admin/sessions/{user_id}`
pub async fn revoke_session_handler(
    State(state): State<AppState>,
    Extension(ApiProject(project)): Extension<ApiProject>,
    ClientMeta(client): ClientMeta,
    PathParam(user_id): PathParam<Uuid>,
) -> AppResult<StatusCode> {
    if state
        .gateway
        .revoke_session(project.id, user_id, &client)
        .await?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("Session not found".into()))
    }
}

/// `GET /admin/audit?action=&status=&limit=`
pub async fn list_audit_handler(
    State(state): State<AppState>,
    Extension(ApiProject(project)): Extension<ApiProject>,
    QueryParams(query): QueryParams<AuditQuery>,
) -> AppResult<Json<AuditListResponse>> {
    let action = match query.action.as_deref() {
        Some(a) => Some(
            AuditAction::parse(a)
                .ok_or_else(|| AppError::Validation(format!("unknown action '{a}'")))?,
        ),
        None => None,
    };
    let status = match query.status.as_deref() {
        Some(s) => Some(
            AuditStatus::parse(s)
                .ok_or_else(|| AppError::Validation(format!("unknown status '{s}'")))?,
        ),
        None => None,
    };
    let entries = state
        .gateway
        .list_audit(AuditFilter {
            project_id: Some(project.id),
            action,
            status,
            limit: query.limit.unwrap_or(0),
        })
        .await?;
    Ok(Json(AuditListResponse {
        entries: entries.into_iter().map(Into::into).collect(),
    }))
}

/// `GET /admin/security/brute-force?identifier=`: counts only failures
/// recorded against the API key's project.
pub async fn brute_force_handler(
    State(state): State<AppState>,
    Extension(ApiProject(project)): Extension<ApiProject>,
    QueryParams(query): QueryParams<BruteForceQuery>,
) -> AppResult<Json<BruteForceResponse>> {
    let identifier = query.identifier.as_deref().unwrap_or_default();
    let assessment = state
        .gateway
        .detect_brute_force(identifier, Some(project.id))
        .await?;
    Ok(Json(assessment.into()))
}

/// `POST /admin/api-key/rotate`: the old key stops working immediately.
pub async fn rotate_api_key_handler(
    State(state): State<AppState>,
    Extension(ApiProject(project)): Extension<ApiProject>,
    ClientMeta(client): ClientMeta,
) -> AppResult<Json<RotateKeyResponse>> {
    let api_key = state.gateway.rotate_api_key(project.id, &client).await?;
    Ok(Json(RotateKeyResponse { api_key }))
}
