//! Start and return endpoints of the authentication flow.
//!
//! `start` validates the request, records a pending login in the session and
//! hands off to the plugin. `complete` (the return endpoint) matches the
//! provider response to that pending login, lets the plugin turn it into an
//! identity and redirects back to `next`. Provider trouble never surfaces as
//! a 5xx; the user is sent back to `next` with a marker parameter instead.

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query},
    http::{
        header::{ALLOW, LOCATION},
        HeaderMap, HeaderValue, Method, StatusCode,
    },
    response::{Html, IntoResponse, Response},
};
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, error, instrument, warn};
use url::Url;
use uuid::Uuid;

use super::{load_session, save_session};
use crate::api::{AppState, AuthEvent};
use crate::plugins::{
    state_param, AuthenticationPlugin, LoginRequest, PluginError, ProviderFamily, ReturnRequest,
    StartOutcome,
};

/// Outage marker carrying the failing plugin identifier.
pub const AUTH_PROBLEM_PARAM: &str = "of-auth-problem";
pub const CO_SIGN_PARAM: &str = "coSignSubmission";
const NEXT_PARAM: &str = "next";

fn bad_request(reason: &str) -> Response {
    (StatusCode::BAD_REQUEST, reason.to_string()).into_response()
}

fn redirect(target: &Url) -> Response {
    match HeaderValue::from_str(target.as_str()) {
        Ok(location) => (StatusCode::FOUND, [(LOCATION, location)]).into_response(),
        Err(err) => {
            error!("Failed to build redirect header: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn non_empty<'a>(params: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    params
        .get(name)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

/// Broker return endpoint for `form`/`plugin`, carrying `next` and the co-sign marker.
///
/// # Errors
/// Returns an error if the base URL cannot be joined with the return path.
pub fn return_url(
    base_url: &Url,
    form: &str,
    plugin: &str,
    next: &Url,
    co_sign: Option<Uuid>,
) -> Result<Url, url::ParseError> {
    let mut url = base_url.join(&format!("auth/{form}/{plugin}/return"))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair(NEXT_PARAM, next.as_str());
        if let Some(submission) = co_sign {
            query.append_pair(CO_SIGN_PARAM, &submission.to_string());
        }
    }
    Ok(url)
}

/// `next` with the failure parameters for `err` appended.
///
/// Provider outages report the plugin identifier, cancellations and claim
/// failures the provider family.
#[must_use]
pub fn failure_url(next: &Url, plugin_id: &str, family: ProviderFamily, err: &PluginError) -> Url {
    let mut url = next.clone();
    {
        let mut query = url.query_pairs_mut();
        match err {
            PluginError::Cancelled => {
                query.append_pair(&family.message_param(), "login-cancelled");
            }
            PluginError::Claims(_) => {
                query.append_pair(&family.message_param(), "error");
                query.append_pair(AUTH_PROBLEM_PARAM, plugin_id);
            }
            _ => {
                query.append_pair(AUTH_PROBLEM_PARAM, plugin_id);
            }
        }
    }
    url
}

#[utoipa::path(
    get,
    path = "/auth/{form}/{plugin}/start",
    params(
        ("form" = String, Path, description = "Form slug"),
        ("plugin" = String, Path, description = "Plugin identifier"),
        ("next" = String, Query, description = "Where to go after authentication"),
        ("coSignSubmission" = Option<Uuid>, Query, description = "Submission to co-sign")
    ),
    responses(
        (status = 200, description = "Local credential form (demo plugins)", content_type = "text/html"),
        (status = 302, description = "Redirect to the identity provider"),
        (status = 400, description = "Missing next, unknown plugin, plugin not allowed or redirect not allowed", body = String),
        (status = 403, description = "Demo plugin without a staff session", body = String),
        (status = 404, description = "Unknown form", body = String)
    ),
    tag = "flow"
)]
#[instrument(skip_all, fields(form = %form_slug, plugin = %plugin_id))]
pub async fn start(
    Path((form_slug, plugin_id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Response {
    let Some(raw_next) = non_empty(&params, NEXT_PARAM) else {
        return bad_request("missing 'next' parameter");
    };
    let Some(form) = state.forms.get(&form_slug) else {
        return (StatusCode::NOT_FOUND, "form not found".to_string()).into_response();
    };
    let Ok(plugin) = state.registry.resolve(&plugin_id) else {
        return bad_request("unknown plugin");
    };
    if !state.registry.is_enabled(&plugin_id) || !form.allows_plugin(&plugin_id) {
        return bad_request("plugin not allowed");
    }
    let Some(next) = state.redirects.allowed_target(raw_next) else {
        return bad_request("redirect not allowed");
    };
    let co_sign = match non_empty(&params, CO_SIGN_PARAM).map(Uuid::parse_str) {
        None => None,
        Some(Ok(submission)) => Some(submission),
        Some(Err(_)) => return bad_request("invalid data"),
    };

    let (token, mut session) = load_session(&state, &headers).await;
    if plugin.metadata().is_demo_plugin && !session.is_staff() {
        return (
            StatusCode::FORBIDDEN,
            "demo plugins require a staff session".to_string(),
        )
            .into_response();
    }

    let Ok(return_to) = return_url(&state.base_url, &form.slug, &plugin_id, &next, co_sign) else {
        error!("Failed to build return URL from base {}", state.base_url);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let options = form.plugin_options(&plugin_id).cloned().unwrap_or_default();
    let pending_state = session.begin_pending(&plugin_id, &form.slug, next.clone(), co_sign);
    let request = LoginRequest {
        form,
        options: &options,
        return_url: &return_to,
        state: &pending_state,
    };

    match plugin.start_login(&request).await {
        Ok(StartOutcome::Redirect(target)) => {
            debug!(%plugin_id, "redirecting to identity provider");
            save_session(&state, &token, session, redirect(&target)).await
        }
        Ok(StartOutcome::RenderForm(html)) => {
            save_session(&state, &token, session, Html(html).into_response()).await
        }
        Err(err) => {
            warn!(%plugin_id, "Failed to start login: {err}");
            state.events.emit(AuthEvent::Failure {
                plugin: plugin_id.clone(),
                form: form.slug.clone(),
                reason: err.to_string(),
            });
            let mut target = next;
            target
                .query_pairs_mut()
                .append_pair(AUTH_PROBLEM_PARAM, &plugin_id);
            redirect(&target)
        }
    }
}

/// Merge query parameters with an urlencoded body; body values win.
fn merge_params(query: HashMap<String, String>, body: &Bytes) -> HashMap<String, String> {
    let mut params = query;
    params.extend(
        url::form_urlencoded::parse(body)
            .map(|(key, value)| (key.into_owned(), value.into_owned())),
    );
    params
}

#[utoipa::path(
    method(get, post),
    path = "/auth/{form}/{plugin}/return",
    params(
        ("form" = String, Path, description = "Form slug"),
        ("plugin" = String, Path, description = "Plugin identifier"),
        ("next" = String, Query, description = "Where to go after authentication"),
        ("coSignSubmission" = Option<Uuid>, Query, description = "Submission to co-sign")
    ),
    request_body(content = String, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 302, description = "Back to next, possibly with a failure marker"),
        (status = 400, description = "Missing next, invalid data, unknown plugin or redirect not allowed", body = String),
        (status = 403, description = "Not allowed for this session", body = String),
        (status = 405, description = "Wrong method for this plugin; see the Allow header")
    ),
    tag = "flow"
)]
#[instrument(skip_all, fields(form = %form_slug, plugin = %plugin_id))]
#[allow(clippy::too_many_lines)]
pub async fn complete(
    method: Method,
    Path((form_slug, plugin_id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    body: Bytes,
) -> Response {
    let params = merge_params(params, &body);
    let Some(raw_next) = non_empty(&params, NEXT_PARAM) else {
        return bad_request("missing 'next' parameter");
    };
    let Ok(plugin) = state.registry.resolve(&plugin_id) else {
        return bad_request("unknown plugin");
    };
    let Some(form) = state.forms.get(&form_slug) else {
        return (StatusCode::NOT_FOUND, "form not found".to_string()).into_response();
    };
    if !state.registry.is_enabled(&plugin_id) || !form.allows_plugin(&plugin_id) {
        return bad_request("plugin not allowed");
    }
    let metadata = plugin.metadata();
    if !metadata.return_method.matches(&method) {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            [(ALLOW, HeaderValue::from_static(metadata.return_method.as_str()))],
        )
            .into_response();
    }
    let Some(next) = state.redirects.allowed_target(raw_next) else {
        return bad_request("redirect not allowed");
    };

    let (token, mut session) = load_session(&state, &headers).await;
    let Some(pending) = state_param(&params)
        .and_then(|state_token| session.pending(state_token))
        .filter(|pending| {
            pending.plugin == plugin_id && pending.form_slug == form.slug && pending.next == next
        })
        .cloned()
    else {
        debug!(%plugin_id, "no matching pending authentication");
        return bad_request("invalid data");
    };
    if metadata.is_demo_plugin && !session.is_staff() {
        return (
            StatusCode::FORBIDDEN,
            "demo plugins require a staff session".to_string(),
        )
            .into_response();
    }
    if let Some(submission) = pending.co_sign_submission {
        if !session.owns_submission(submission) {
            return (
                StatusCode::FORBIDDEN,
                "submission does not belong to this session".to_string(),
            )
                .into_response();
        }
    }
    if !state.redirects.is_allowed(&pending.next) {
        return bad_request("redirect not allowed");
    }

    let Ok(return_to) = return_url(
        &state.base_url,
        &form.slug,
        &plugin_id,
        &pending.next,
        pending.co_sign_submission,
    ) else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let options = form.plugin_options(&plugin_id).cloned().unwrap_or_default();
    let request = ReturnRequest {
        form,
        options: &options,
        params: &params,
        return_url: &return_to,
        pending: &pending,
    };

    let authenticated = match plugin.handle_return(&request, &mut session).await {
        Ok(authenticated) => authenticated,
        Err(PluginError::InvalidPayload(reason)) => {
            debug!(%plugin_id, "invalid return payload: {reason}");
            return bad_request("invalid data");
        }
        Err(PluginError::InvalidState) => return bad_request("invalid data"),
        Err(PluginError::InvalidCoSignData(reason)) => return bad_request(&reason),
        Err(PluginError::NotAllowed(reason)) => {
            return (StatusCode::FORBIDDEN, reason).into_response();
        }
        Err(err) => {
            warn!(%plugin_id, "Authentication failed: {err}");
            session.take_pending(&pending.state);
            state.events.emit(AuthEvent::Failure {
                plugin: plugin_id.clone(),
                form: form.slug.clone(),
                reason: err.to_string(),
            });
            let target = failure_url(&pending.next, &plugin_id, metadata.family, &err);
            return save_session(&state, &token, session, redirect(&target)).await;
        }
    };
    session.take_pending(&pending.state);

    let mut co_signed = false;
    if let Some(submission) = pending.co_sign_submission {
        let data = match plugin.handle_co_sign(&authenticated) {
            Ok(data) => data,
            Err(err) => return bad_request(&err.to_string()),
        };
        if let Err(err) = state.store.upsert_co_sign(submission, &data).await {
            error!(%submission, "Failed to store co-sign data: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        state.events.emit(AuthEvent::CoSign {
            plugin: plugin_id.clone(),
            submission,
        });
        co_signed = true;
    } else {
        session.set_form_auth(authenticated.form_auth);
    }

    if !co_signed && session.form_auth().is_some() {
        state.events.emit(AuthEvent::Success {
            plugin: plugin_id,
            form: form.slug.clone(),
        });
    }
    save_session(&state, &token, session, redirect(&pending.next)).await
}
