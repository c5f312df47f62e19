use anyhow::Result;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    routing::{get, post},
    Extension, Router,
};
use secrecy::SecretString;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    forms::FormStore,
    redirect::RedirectPolicy,
    registry::PluginRegistry,
    session::SessionStore,
    store::{AuthInfoStore, HashingQueue, IdentifierHasher},
};

pub mod events;
pub(crate) mod handlers;
mod openapi;


pub use events::{AuthEvent, EventBus};
pub use openapi::openapi;

use handlers::{flow, health, plugins, session, submissions};

/// Everything the handlers share, behind one `Arc`.
pub struct AppState {
    pub registry: PluginRegistry,
    pub forms: FormStore,
    pub sessions: SessionStore,
    pub store: Arc<dyn AuthInfoStore>,
    pub hasher: IdentifierHasher,
    pub hashing_queue: HashingQueue,
    pub redirects: RedirectPolicy,
    pub events: EventBus,
    pub base_url: Url,
    pub staff_token: Option<SecretString>,
}

impl AppState {
    /// Build the state and spawn the hashing worker on the current runtime.
    #[must_use]
    pub fn new(
        registry: PluginRegistry,
        forms: FormStore,
        store: Arc<dyn AuthInfoStore>,
        hasher: IdentifierHasher,
        base_url: Url,
    ) -> Self {
        let hashing_queue = HashingQueue::spawn(Arc::clone(&store), hasher.clone());
        Self {
            registry,
            forms,
            sessions: SessionStore::default(),
            store,
            hasher,
            hashing_queue,
            redirects: RedirectPolicy::new(&base_url),
            events: EventBus::new(),
            base_url,
            staff_token: None,
        }
    }

    #[must_use]
    pub fn with_sessions(mut self, sessions: SessionStore) -> Self {
        self.sessions = sessions;
        self
    }

    #[must_use]
    pub fn with_redirects(mut self, redirects: RedirectPolicy) -> Self {
        self.redirects = redirects;
        self
    }

    #[must_use]
    pub fn with_staff_token(mut self, token: Option<SecretString>) -> Self {
        self.staff_token = token;
        self
    }

    /// Mark cookies `Secure` only when the broker is served over https.
    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.base_url.scheme() == "https"
    }
}

/// Build the application router with every route and layer.
pub fn router(state: Arc<AppState>) -> Router {
    let origins: Vec<HeaderValue> = state
        .redirects
        .origins()
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true);

    Router::new()
        .route("/health", get(health::health).options(health::health))
        .route("/auth/:form/:plugin/start", get(flow::start))
        .route(
            "/auth/:form/:plugin/return",
            get(flow::complete).post(flow::complete),
        )
        .route(
            "/api/v2/authentication/session",
            get(session::session).delete(session::logout),
        )
        .route("/api/v2/authentication/staff", post(session::staff))
        .route("/api/v2/authentication/plugins", get(plugins::list_plugins))
        .route(
            "/api/v2/submissions/:uuid/authentication",
            post(submissions::store_authentication),
        )
        .route(
            "/api/v2/submissions/:uuid/authentication-context",
            get(submissions::authentication_context),
        )
        .route(
            "/api/v2/submissions/:uuid/_complete",
            post(submissions::complete),
        )
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(state)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn serve(port: u16, state: Arc<AppState>) -> Result<()> {
    let logger = state.events.spawn_logger();
    let app = router(state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    logger.abort();

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
