use crate::{
    api::{self, AppState},
    cli::telemetry,
    config::BrokerConfig,
    protocol::{HttpProtocolClient, ProtocolClient},
    redirect::RedirectPolicy,
    session::SessionStore,
    store::{AuthInfoStore, IdentifierHasher, MemoryAuthInfoStore, PgAuthInfoStore},
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub config: PathBuf,
    pub base_url: Url,
    pub allowed_redirect_origins: Vec<String>,
    pub hash_salt: SecretString,
    pub session_ttl_seconds: u64,
    pub staff_token: Option<SecretString>,
}

async fn auth_info_store(dsn: Option<&str>) -> Result<Arc<dyn AuthInfoStore>> {
    let Some(dsn) = dsn else {
        warn!("No DSN configured, authentication details are kept in memory");
        return Ok(Arc::new(MemoryAuthInfoStore::new()));
    };
    let store = PgAuthInfoStore::connect(dsn)
        .await
        .context("Failed to connect to database")?;
    store
        .migrate()
        .await
        .context("Failed to apply database schema")?;
    Ok(Arc::new(store))
}

/// Execute the server action.
/// # Errors
/// Returns an error if the config cannot be loaded, the store is unreachable or
/// the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let config = BrokerConfig::load(&args.config)?;

    let client: Arc<dyn ProtocolClient> =
        Arc::new(HttpProtocolClient::new().context("Failed to build HTTP client")?);
    let registry = config
        .build_registry(&client)
        .context("Invalid plugin configuration")?;

    let store = auth_info_store(args.dsn.as_deref()).await?;

    let redirects = args
        .allowed_redirect_origins
        .iter()
        .chain(&config.allowed_redirect_origins)
        .fold(RedirectPolicy::new(&args.base_url), |policy, origin| {
            policy.with_origin(origin)
        });

    info!(
        plugins = registry.len(),
        forms = config.forms.len(),
        store = store.kind(),
        "Broker configured"
    );

    let state = AppState::new(
        registry,
        config.form_store(),
        store,
        IdentifierHasher::new(args.hash_salt),
        args.base_url,
    )
    .with_sessions(SessionStore::new(Duration::from_secs(
        args.session_ttl_seconds,
    )))
    .with_redirects(redirects)
    .with_staff_token(args.staff_token);

    let result = api::serve(args.port, Arc::new(state)).await;

    telemetry::shutdown_tracer();

    result
}
