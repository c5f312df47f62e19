//! Session endpoints: current identity, logout and staff elevation.

use axum::{
    extract::Extension,
    http::{
        header::{InvalidHeaderValue, AUTHORIZATION, COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Json, Response},
};
use secrecy::ExposeSecret;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;

use super::{load_session, save_session};
use crate::api::{AppState, AuthEvent};
use crate::plugins::AuthenticationPlugin;
use crate::session::SESSION_COOKIE_NAME;
use crate::types::{AuthAttribute, FormAuth};

#[derive(ToSchema, Serialize, Debug, PartialEq, Eq)]
pub struct FormAuthSummary {
    pub plugin: String,
    pub attribute: AuthAttribute,
    /// Identifier masked except its last four characters.
    pub value: String,
    pub loa: String,
}

impl From<&FormAuth> for FormAuthSummary {
    fn from(form_auth: &FormAuth) -> Self {
        Self {
            plugin: form_auth.plugin.clone(),
            attribute: form_auth.attribute,
            value: form_auth.masked_value(),
            loa: form_auth.loa.clone(),
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v2/authentication/session",
    responses(
        (status = 200, description = "Authenticated identity", body = FormAuthSummary),
        (status = 204, description = "No authenticated identity")
    ),
    tag = "session"
)]
pub async fn session(headers: HeaderMap, state: Extension<Arc<AppState>>) -> impl IntoResponse {
    let Some(token) = extract_session_token(&headers) else {
        return StatusCode::NO_CONTENT.into_response();
    };
    let (_, session) = state.sessions.load(Some(&token)).await;
    match session.form_auth() {
        Some(form_auth) => (StatusCode::OK, Json(FormAuthSummary::from(form_auth))).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/api/v2/authentication/session",
    responses(
        (status = 204, description = "Identity cleared, also when there was none")
    ),
    tag = "session"
)]
#[instrument(skip_all)]
pub async fn logout(headers: HeaderMap, state: Extension<Arc<AppState>>) -> Response {
    let Some(token) = extract_session_token(&headers) else {
        return StatusCode::NO_CONTENT.into_response();
    };
    let (token, mut session) = state.sessions.load(Some(&token)).await;
    let Some(plugin_id) = session.form_auth().map(|form_auth| form_auth.plugin.clone()) else {
        debug!("logout without an authenticated identity");
        return StatusCode::NO_CONTENT.into_response();
    };

    match state.registry.resolve(&plugin_id) {
        Ok(plugin) => plugin.logout(&mut session).await,
        Err(err) => warn!("Logout for unregistered plugin: {err}"),
    }
    session.clear_identity();
    state.events.emit(AuthEvent::Logout { plugin: plugin_id });

    save_session(&state, &token, session, StatusCode::NO_CONTENT.into_response()).await
}

/// Compare SHA-256 digests of both tokens, without short-circuiting on the
/// first differing byte.
fn token_matches(expected: &str, given: &str) -> bool {
    let expected = Sha256::digest(expected.as_bytes());
    let given = Sha256::digest(given.as_bytes());
    expected
        .iter()
        .zip(given.iter())
        .fold(0_u8, |diff, (left, right)| diff | (left ^ right))
        == 0
}

#[utoipa::path(
    post,
    path = "/api/v2/authentication/staff",
    responses(
        (status = 204, description = "Session marked as staff"),
        (status = 403, description = "Missing or wrong staff token")
    ),
    tag = "session"
)]
pub async fn staff(headers: HeaderMap, state: Extension<Arc<AppState>>) -> Response {
    let authorized = match (&state.staff_token, extract_bearer_token(&headers)) {
        (Some(expected), Some(given)) => token_matches(expected.expose_secret(), &given),
        _ => false,
    };
    if !authorized {
        return (StatusCode::FORBIDDEN, "staff token required".to_string()).into_response();
    }

    let (token, mut session) = load_session(&state, &headers).await;
    session.set_staff(true);
    save_session(&state, &token, session, StatusCode::NO_CONTENT.into_response()).await
}

/// Build an `HttpOnly` cookie for the session token.
pub(crate) fn session_cookie(
    state: &AppState,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = state.sessions.ttl().as_secs();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    );
    if state.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(COOKIE)?.to_str().ok()?;
    for pair in value.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == SESSION_COOKIE_NAME && !val.is_empty() {
            return Some(val.to_string());
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// `Set-Cookie` value of a response, if any.
#[cfg(test)]
pub(crate) fn response_cookie(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::SET_COOKIE)?.to_str().ok()?;
    let mut parts = value.split(';').next()?.splitn(2, '=');
    let _ = parts.next()?;
    parts.next().map(str::to_string)
}
