//! Submission-scoped endpoints: attach the session identity, read the
//! authentication context, and finish the submission.

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{load_session, save_session};
use crate::api::{AppState, AuthEvent};
use crate::plugins::AuthenticationPlugin;
use crate::store::{
    hash_identifying_attributes, store_auth_details, AuthenticationContext, StoreError,
};
use crate::types::AuthAttribute;

#[derive(Debug, Deserialize, ToSchema)]
pub struct StoreAuthenticationRequest {
    /// Slug of the form the submission belongs to.
    pub form: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoredAuthentication {
    pub submission: Uuid,
    pub plugin: String,
    pub attribute: AuthAttribute,
    /// Absent when the record does not satisfy the context schema.
    pub authentication_context: Option<AuthenticationContext>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct CompleteRequest {
    pub defer_hashing: bool,
}

fn foreign_submission() -> Response {
    (
        StatusCode::FORBIDDEN,
        "submission does not belong to this session".to_string(),
    )
        .into_response()
}

fn internal_error(err: &StoreError) -> Response {
    error!("Auth info store failure: {err}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "failed to store authentication details".to_string(),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/api/v2/submissions/{uuid}/authentication",
    params(("uuid" = Uuid, Path, description = "Submission id")),
    request_body = StoreAuthenticationRequest,
    responses(
        (
            status = 201,
            description = "Identity attached to the submission",
            body = StoredAuthentication
        ),
        (status = 401, description = "Session has no authenticated identity", body = String),
        (
            status = 403,
            description = "Submission belongs to another session, or the identity no longer \
                satisfies the form requirements",
            body = String
        ),
        (status = 404, description = "Unknown form", body = String)
    ),
    tag = "submissions"
)]
#[instrument(skip_all, fields(%submission))]
pub async fn store_authentication(
    Path(submission): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(request): Json<StoreAuthenticationRequest>,
) -> Response {
    let (token, mut session) = load_session(&state, &headers).await;
    let Some(form_auth) = session.form_auth().cloned() else {
        return (StatusCode::UNAUTHORIZED, "not authenticated".to_string()).into_response();
    };
    let Some(form) = state.forms.get(&request.form) else {
        return (StatusCode::NOT_FOUND, "form not found".to_string()).into_response();
    };
    let (Ok(plugin), Ok(descriptor)) = (
        state.registry.resolve(&form_auth.plugin),
        state.registry.descriptor(&form_auth.plugin),
    ) else {
        return (StatusCode::BAD_REQUEST, "unknown plugin".to_string()).into_response();
    };
    let Some(options) = form.plugin_options(&form_auth.plugin) else {
        return (StatusCode::FORBIDDEN, "plugin not allowed".to_string()).into_response();
    };

    if !session.owns_submission(submission) {
        match state.store.get(submission).await {
            Ok(None) => {}
            Ok(Some(_)) => {
                warn!(%submission, "refusing to overwrite a submission of another session");
                return foreign_submission();
            }
            Err(err) => return internal_error(&err),
        }
    }

    if !plugin.check_requirements(&form_auth, options) {
        warn!(plugin = %form_auth.plugin, "identity does not meet form requirements");
        session.take_form_auth();
        state.events.emit(AuthEvent::Failure {
            plugin: form_auth.plugin.clone(),
            form: form.slug.clone(),
            reason: "insufficient level of assurance".to_string(),
        });
        let response =
            (StatusCode::FORBIDDEN, "insufficient level of assurance".to_string()).into_response();
        return save_session(&state, &token, session, response).await;
    }

    let stored =
        store_auth_details(state.store.as_ref(), &descriptor, submission, &form_auth).await;
    let info = match stored {
        Ok(info) => info,
        Err(err) => return internal_error(&err),
    };
    session.add_submission(submission);

    let source = descriptor.family.context_source();
    let authentication_context = match info.to_authentication_context(source) {
        Ok(context) => Some(context),
        Err(err) => {
            warn!(%submission, "Authentication context does not validate: {err}");
            None
        }
    };
    let body = StoredAuthentication {
        submission,
        plugin: info.plugin,
        attribute: info.attribute,
        authentication_context,
    };
    save_session(&state, &token, session, (StatusCode::CREATED, Json(body)).into_response()).await
}

#[utoipa::path(
    get,
    path = "/api/v2/submissions/{uuid}/authentication-context",
    params(("uuid" = Uuid, Path, description = "Submission id")),
    responses(
        (
            status = 200,
            description = "Authentication context document",
            body = AuthenticationContext
        ),
        (status = 403, description = "Submission does not belong to this session", body = String),
        (status = 404, description = "Submission has no authentication details", body = String),
        (status = 422, description = "Stored details do not satisfy the context schema", body = String)
    ),
    tag = "submissions"
)]
#[instrument(skip_all, fields(%submission))]
pub async fn authentication_context(
    Path(submission): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Response {
    let (_, session) = load_session(&state, &headers).await;
    if !session.owns_submission(submission) {
        return foreign_submission();
    }
    let info = match state.store.get(submission).await {
        Ok(Some(info)) => info,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, "no authentication details".to_string()).into_response();
        }
        Err(err) => return internal_error(&err),
    };
    let source = match state.registry.descriptor(&info.plugin) {
        Ok(descriptor) => descriptor.family.context_source(),
        Err(err) => {
            warn!(%submission, "Stored plugin is no longer registered: {err}");
            crate::types::ContextSource::Custom
        }
    };
    match info.to_authentication_context(source) {
        Ok(context) => (StatusCode::OK, Json(context)).into_response(),
        Err(err) => (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/api/v2/submissions/{uuid}/_complete",
    params(("uuid" = Uuid, Path, description = "Submission id")),
    request_body = CompleteRequest,
    responses(
        (status = 204, description = "Submission completed; identifiers hashed or queued"),
        (status = 403, description = "Submission does not belong to this session", body = String)
    ),
    tag = "submissions"
)]
#[instrument(skip_all, fields(%submission))]
pub async fn complete(
    Path(submission): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    request: Option<Json<CompleteRequest>>,
) -> Response {
    let (token, mut session) = load_session(&state, &headers).await;
    if !session.owns_submission(submission) {
        return foreign_submission();
    }
    let request = request.map(|Json(request)| request).unwrap_or_default();

    if request.defer_hashing && state.hashing_queue.enqueue(submission) {
        debug!(%submission, "hashing deferred");
    } else if let Err(err) =
        hash_identifying_attributes(state.store.as_ref(), &state.hasher, submission).await
    {
        return internal_error(&err);
    }

    session.take_form_auth();
    save_session(&state, &token, session, StatusCode::NO_CONTENT.into_response()).await
}
