use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};
use chrono::SecondsFormat;
use tower_cookies::Cookies;

use crate::{
    error::{AppError, Result},
    middleware_layer::auth::{remove_cookie, SESSION_COOKIE},
    models::session::Session,
    repositories::session::SessionStore,
    state::AppState,
};

fn json_response(status: StatusCode, body: sonic_rs::Value) -> Result<Response> {
    let body = sonic_rs::to_string(&body)
        .map_err(|e| AppError::Internal(format!("Failed to serialize response: {}", e)))?;

    Ok((status, [(header::CONTENT_TYPE, "application/json")], body).into_response())
}

/// Describes the current session.
pub async fn auth_info(Extension(session): Extension<Session>) -> Result<Response> {
    json_response(
        StatusCode::OK,
        sonic_rs::json!({
            "sessionId": session.id,
            "sessionCreationTime": session
                .creation_time
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            "issuer": session.issuer,
            "idAtIssuer": session.id_at_issuer,
        }),
    )
}

/// Ends the current session.
pub async fn logout<S: SessionStore>(
    State(state): State<AppState<S>>,
    Extension(session): Extension<Session>,
    cookies: Cookies,
) -> Result<Response> {
    tracing::info!("👋 Logout for account: {}", session.account_id);

    state.store.delete(&session.id).await?;
    remove_cookie(&cookies, SESSION_COOKIE);

    tracing::info!("✅ Session deleted: {}", session.id);
    json_response(StatusCode::OK, sonic_rs::json!({ "success": true }))
}
