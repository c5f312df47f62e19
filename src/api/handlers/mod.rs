//! HTTP handlers.
//!
//! Errors are returned as `(StatusCode, String)` with a short plain-text reason.

pub mod flow;
pub mod health;
pub mod plugins;
pub mod session;
pub mod submissions;

use axum::{
    http::{header::SET_COOKIE, HeaderMap},
    response::Response,
};
use tracing::error;

use super::AppState;
use crate::session::Session;

/// Load the session referenced by the request cookie, or start a new one.
pub(crate) async fn load_session(state: &AppState, headers: &HeaderMap) -> (String, Session) {
    let token = session::extract_session_token(headers);
    state.sessions.load(token.as_deref()).await
}

/// Persist `session` and attach its cookie to `response`.
pub(crate) async fn save_session(
    state: &AppState,
    token: &str,
    session: Session,
    mut response: Response,
) -> Response {
    state.sessions.save(token, session).await;
    match session::session_cookie(state, token) {
        Ok(cookie) => {
            response.headers_mut().insert(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build session cookie: {err}"),
    }
    response
}
