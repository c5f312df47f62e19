//! Authentication plugins.
//!
//! Every identity-provider family implements [`AuthenticationPlugin`]. The
//! registry stores them as the closed [`Plugin`] enum so dispatch stays static
//! and the set of variants is known at compile time.
//!
//! Shared state machine:
//! `Unauthenticated -> start_login -> PendingExternal -> handle_return -> Authenticated`.
//! The pending step lives in the session under an opaque state token; plugins
//! never write the `FormAuth` themselves, the flow controller does that after a
//! successful return.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use url::Url;
use utoipa::ToSchema;

use crate::{
    claims::{CanonicalClaims, ClaimError, LoaOrdering},
    forms::{Form, PluginOptions},
    protocol::ProviderError,
    session::{PendingAuthentication, Session},
    types::{AuthAttribute, ContextSource, CoSignData, FormAuth},
};

pub mod demo;
pub mod oidc;
pub mod saml;
pub mod schemas;
pub mod yivi;

pub use demo::{DemoKind, DemoPlugin};
pub use oidc::OidcPlugin;
pub use saml::{SamlPlugin, SamlService};
pub use schemas::OidcSchema;
pub use yivi::{AttributeGroup, YiviPlugin};

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("invalid data: {0}")]
    InvalidPayload(String),
    #[error("unknown or expired authentication state")]
    InvalidState,
    #[error("login cancelled")]
    Cancelled,
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Claims(#[from] ClaimError),
    #[error("invalid co-sign data: {0}")]
    InvalidCoSignData(String),
    #[error("not allowed: {0}")]
    NotAllowed(String),
}

/// HTTP method the provider uses to come back to the return endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReturnMethod {
    Get,
    Post,
}

impl ReturnMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }

    #[must_use]
    pub fn matches(self, method: &axum::http::Method) -> bool {
        method.as_str() == self.as_str()
    }
}

/// Identity-provider family, used for message parameters and the context source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderFamily {
    Digid,
    Eherkenning,
    Eidas,
    Yivi,
    OrgOidc,
    Demo,
}

impl ProviderFamily {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Digid => "digid",
            Self::Eherkenning => "eherkenning",
            Self::Eidas => "eidas",
            Self::Yivi => "yivi",
            Self::OrgOidc => "org-oidc",
            Self::Demo => "demo",
        }
    }

    /// Query parameter carrying the failure message for this family.
    #[must_use]
    pub fn message_param(self) -> String {
        format!("_{}-message", self.as_str())
    }

    #[must_use]
    pub const fn context_source(self) -> ContextSource {
        match self {
            Self::Digid => ContextSource::Digid,
            Self::Eherkenning => ContextSource::Eherkenning,
            Self::Eidas => ContextSource::Eidas,
            Self::Yivi => ContextSource::Yivi,
            Self::OrgOidc | Self::Demo => ContextSource::Custom,
        }
    }
}

/// Static facts about a plugin, fixed at construction.
#[derive(Clone, Debug)]
pub struct PluginMetadata {
    pub verbose_name: String,
    pub provides_auth_attributes: BTreeSet<AuthAttribute>,
    pub is_demo_plugin: bool,
    pub return_method: ReturnMethod,
    pub family: ProviderFamily,
    pub loa_ordering: Option<LoaOrdering>,
}

/// Inputs for `start_login`.
pub struct LoginRequest<'a> {
    pub form: &'a Form,
    pub options: &'a PluginOptions,
    /// Broker return endpoint, including `next` and the co-sign marker.
    pub return_url: &'a Url,
    pub state: &'a str,
}

pub enum StartOutcome {
    Redirect(Url),
    RenderForm(String),
}

/// Inputs for `handle_return`: query and body parameters merged.
pub struct ReturnRequest<'a> {
    pub form: &'a Form,
    pub options: &'a PluginOptions,
    pub params: &'a HashMap<String, String>,
    pub return_url: &'a Url,
    pub pending: &'a PendingAuthentication,
}

impl ReturnRequest<'_> {
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// Successful return: the identity plus the canonical claims it came from.
#[derive(Clone, Debug)]
pub struct Authenticated {
    pub form_auth: FormAuth,
    pub claims: CanonicalClaims,
}

/// Name of the parameter carrying the state token back, per return method.
pub const STATE_PARAMS: [&str; 2] = ["state", "RelayState"];

/// `error` values providers use when the user aborted the login.
const CANCELLED_ERRORS: [&str; 3] = ["access_denied", "login_cancelled", "login_required"];

#[must_use]
pub fn state_param(params: &HashMap<String, String>) -> Option<&str> {
    STATE_PARAMS
        .iter()
        .find_map(|name| params.get(*name))
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

/// Map a provider `error` parameter onto the plugin error taxonomy.
pub(crate) fn provider_error_param(request: &ReturnRequest<'_>) -> Result<(), PluginError> {
    match request.param("error") {
        None => Ok(()),
        Some(error) if CANCELLED_ERRORS.contains(&error) => Err(PluginError::Cancelled),
        Some(error) => Err(PluginError::Provider(ProviderError::InvalidResponse(
            format!("provider returned error '{error}'"),
        ))),
    }
}

#[async_trait]
pub trait AuthenticationPlugin: Send + Sync {
    fn identifier(&self) -> &str;

    fn metadata(&self) -> &PluginMetadata;

    /// Build the outbound redirect, or a local form for demo variants.
    async fn start_login(&self, request: &LoginRequest<'_>) -> Result<StartOutcome, PluginError>;

    /// Consume the provider response and produce the canonical identity.
    ///
    /// Only plugin-specific session keys may be written here.
    async fn handle_return(
        &self,
        request: &ReturnRequest<'_>,
        session: &mut Session,
    ) -> Result<Authenticated, PluginError>;

    /// Whether `form_auth` still satisfies the form's requirements.
    fn check_requirements(&self, form_auth: &FormAuth, options: &PluginOptions) -> bool {
        let Some(required) = options.min_loa() else {
            return true;
        };
        self.metadata()
            .loa_ordering
            .map_or(true, |ordering| ordering.meets_requirement(&form_auth.loa, required))
    }

    /// Drop plugin-specific session keys. Never fails.
    async fn logout(&self, _session: &mut Session) {}

    /// Identity a co-signer attaches to an existing submission.
    fn handle_co_sign(&self, authenticated: &Authenticated) -> Result<CoSignData, PluginError> {
        let identifier = authenticated.form_auth.value.trim();
        if identifier.is_empty() {
            return Err(PluginError::InvalidCoSignData(format!(
                "missing '{}' identifier",
                authenticated.form_auth.attribute
            )));
        }
        Ok(CoSignData {
            plugin: self.identifier().to_string(),
            identifier: identifier.to_string(),
            fields: Map::new(),
        })
    }
}

pub enum Plugin {
    Oidc(OidcPlugin),
    Saml(SamlPlugin),
    Yivi(YiviPlugin),
    Demo(DemoPlugin),
}

impl Plugin {
    /// Override the label shown in plugin listings.
    #[must_use]
    pub fn with_verbose_name(self, name: &str) -> Self {
        match self {
            Self::Oidc(plugin) => Self::Oidc(plugin.with_verbose_name(name)),
            Self::Saml(plugin) => Self::Saml(plugin.with_verbose_name(name)),
            Self::Yivi(plugin) => Self::Yivi(plugin.with_verbose_name(name)),
            Self::Demo(plugin) => Self::Demo(plugin.with_verbose_name(name)),
        }
    }

    fn inner(&self) -> &dyn AuthenticationPlugin {
        match self {
            Self::Oidc(plugin) => plugin,
            Self::Saml(plugin) => plugin,
            Self::Yivi(plugin) => plugin,
            Self::Demo(plugin) => plugin,
        }
    }
}

#[async_trait]
impl AuthenticationPlugin for Plugin {
    fn identifier(&self) -> &str {
        self.inner().identifier()
    }

    fn metadata(&self) -> &PluginMetadata {
        self.inner().metadata()
    }

    async fn start_login(&self, request: &LoginRequest<'_>) -> Result<StartOutcome, PluginError> {
        self.inner().start_login(request).await
    }

    async fn handle_return(
        &self,
        request: &ReturnRequest<'_>,
        session: &mut Session,
    ) -> Result<Authenticated, PluginError> {
        self.inner().handle_return(request, session).await
    }

    fn check_requirements(&self, form_auth: &FormAuth, options: &PluginOptions) -> bool {
        self.inner().check_requirements(form_auth, options)
    }

    async fn logout(&self, session: &mut Session) {
        self.inner().logout(session).await;
    }

    fn handle_co_sign(&self, authenticated: &Authenticated) -> Result<CoSignData, PluginError> {
        self.inner().handle_co_sign(authenticated)
    }
}
