use utoipa::OpenApi;

use super::handlers::{flow, health, plugins, session, submissions};
use crate::{
    plugins::{ProviderFamily, ReturnMethod},
    registry::PluginDescriptor,
    store::context::{AuthenticationContext, Authorizee, Subject},
    types::{AuthAttribute, CoSignData, ContextSource, MandateContext, MandateService},
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        flow::start,
        flow::complete,
        session::session,
        session::logout,
        session::staff,
        plugins::list_plugins,
        submissions::store_authentication,
        submissions::authentication_context,
        submissions::complete
    ),
    components(schemas(
        health::Health,
        session::FormAuthSummary,
        submissions::StoreAuthenticationRequest,
        submissions::StoredAuthentication,
        submissions::CompleteRequest,
        PluginDescriptor,
        ReturnMethod,
        ProviderFamily,
        AuthAttribute,
        AuthenticationContext,
        Subject,
        Authorizee,
        MandateContext,
        MandateService,
        ContextSource,
        CoSignData
    )),
    tags(
        (name = "health", description = "Liveness of the broker and its store"),
        (name = "flow", description = "Browser login flow against identity providers"),
        (name = "session", description = "Authenticated identity held by the session"),
        (name = "plugins", description = "Registered authentication plugins"),
        (name = "submissions", description = "Identity attached to form submissions")
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_every_route() {
        let doc = openapi();
        for path in [
            "/health",
            "/auth/{form}/{plugin}/start",
            "/auth/{form}/{plugin}/return",
            "/api/v2/authentication/session",
            "/api/v2/authentication/staff",
            "/api/v2/authentication/plugins",
            "/api/v2/submissions/{uuid}/authentication",
            "/api/v2/submissions/{uuid}/authentication-context",
            "/api/v2/submissions/{uuid}/_complete",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
