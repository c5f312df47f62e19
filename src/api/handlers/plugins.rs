use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::IntoParams;

use crate::api::AppState;
use crate::registry::PluginDescriptor;

#[derive(Debug, Deserialize, IntoParams)]
pub struct PluginQuery {
    /// Only plugins configured on this form, in form order.
    form: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/v2/authentication/plugins",
    params(PluginQuery),
    responses(
        (status = 200, description = "Enabled plugins", body = [PluginDescriptor]),
        (status = 404, description = "Unknown form", body = String)
    ),
    tag = "plugins"
)]
pub async fn list_plugins(
    Query(query): Query<PluginQuery>,
    state: Extension<Arc<AppState>>,
) -> Response {
    let form = match query.form.as_deref() {
        None => None,
        Some(slug) => match state.forms.get(slug) {
            Some(form) => Some(form),
            None => return (StatusCode::NOT_FOUND, "form not found".to_string()).into_response(),
        },
    };
    Json(state.registry.list_enabled(form)).into_response()
}
