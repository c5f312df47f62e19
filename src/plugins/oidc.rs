//! OIDC broker plugin (DigiD, eHerkenning, eIDAS and organization login).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::claims::{process, ClaimPath, ProcessingInstructions, ValidationMode};
use crate::protocol::{OidcEndpoints, ProtocolClient};
use crate::session::{Session, OIDC_ID_TOKEN_KEY};

use super::schemas::{LoaSettings, OidcSchema};
use super::{
    provider_error_param, Authenticated, AuthenticationPlugin, LoginRequest, PluginError,
    PluginMetadata, ReturnMethod, ReturnRequest, StartOutcome,
};

pub struct OidcPlugin {
    identifier: String,
    metadata: PluginMetadata,
    schema: OidcSchema,
    endpoints: OidcEndpoints,
    instructions: ProcessingInstructions,
    mode: ValidationMode,
    client: Arc<dyn ProtocolClient>,
}

impl OidcPlugin {
    #[must_use]
    pub fn new(
        identifier: &str,
        schema: OidcSchema,
        endpoints: OidcEndpoints,
        client: Arc<dyn ProtocolClient>,
    ) -> Self {
        Self {
            identifier: identifier.to_string(),
            metadata: PluginMetadata {
                verbose_name: schema.verbose_name().to_string(),
                provides_auth_attributes: schema.provides(),
                is_demo_plugin: false,
                return_method: ReturnMethod::Get,
                family: schema.family(),
                loa_ordering: schema.loa_ordering(),
            },
            schema,
            endpoints,
            instructions: schema.default_instructions(),
            mode: ValidationMode::default(),
            client,
        }
    }

    #[must_use]
    pub fn with_verbose_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.verbose_name = name.into();
        self
    }

    #[must_use]
    pub fn with_claim_paths(
        mut self,
        overrides: &HashMap<String, ClaimPath>,
        loa: Option<&LoaSettings>,
    ) -> Self {
        self.instructions = self.schema.instructions(overrides, loa);
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ValidationMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn schema(&self) -> OidcSchema {
        self.schema
    }
}

#[async_trait]
impl AuthenticationPlugin for OidcPlugin {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn start_login(&self, request: &LoginRequest<'_>) -> Result<StartOutcome, PluginError> {
        let url = self
            .endpoints
            .authorization_url(request.return_url, request.state, &[]);
        Ok(StartOutcome::Redirect(url))
    }

    #[instrument(skip_all, fields(plugin = %self.identifier))]
    async fn handle_return(
        &self,
        request: &ReturnRequest<'_>,
        session: &mut Session,
    ) -> Result<Authenticated, PluginError> {
        provider_error_param(request)?;
        let code = request
            .param("code")
            .ok_or_else(|| PluginError::InvalidPayload("missing 'code' parameter".to_string()))?;

        let tokens = self
            .client
            .exchange_code(&self.endpoints, code, request.return_url)
            .await?;
        let claims = process(&tokens.claims, &self.instructions, self.mode)?;
        let form_auth = self.schema.to_form_auth(&self.identifier, &claims)?;

        session.set_plugin_key(OIDC_ID_TOKEN_KEY, tokens.id_token);
        debug!(attribute = %form_auth.attribute, "oidc login completed");
        Ok(Authenticated { form_auth, claims })
    }

    async fn logout(&self, session: &mut Session) {
        let Some(id_token) = session.remove_plugin_key(OIDC_ID_TOKEN_KEY) else {
            return;
        };
        let Some(endpoint) = &self.endpoints.end_session_endpoint else {
            return;
        };
        if let Err(err) = self.client.end_session(endpoint, &id_token).await {
            warn!(plugin = %self.identifier, "RP-initiated logout failed: {err}");
        }
    }
}
