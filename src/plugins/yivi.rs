//! Yivi via an OIDC bridge.
//!
//! Unlike the other plugins the claim instructions depend on the form: the
//! attributes the user may disclose and the additional attribute groups come
//! from the per-form options, so they are rebuilt on every return.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::claims::{
    process, ClaimError, ClaimPath, ClaimPathSpec, LoaInstructions, LoaOrdering,
    ProcessingInstructions, Requirement, ValidationMode,
};
use crate::forms::PluginOptions;
use crate::protocol::{OidcEndpoints, ProtocolClient};
use crate::session::{Session, OIDC_ID_TOKEN_KEY};
use crate::types::{AuthAttribute, FormAuth};

use super::schemas::{LoaSettings, ADDITIONAL_CLAIMS, LOA_CLAIM};
use super::{
    provider_error_param, Authenticated, AuthenticationPlugin, LoginRequest, PluginError,
    PluginMetadata, ProviderFamily, ReturnMethod, ReturnRequest, StartOutcome,
};

pub const BSN_ATTRIBUTE: &str = "pbdf.gemeente.personalData.bsn";
pub const KVK_ATTRIBUTE: &str = "pbdf.signicat.kvkTradeRegister.kvkNumber";
pub const PSEUDO_ATTRIBUTE: &str = "sub";

/// Disclosure order when more than one identifier is present.
const ATTRIBUTE_PRECEDENCE: [AuthAttribute; 3] =
    [AuthAttribute::Bsn, AuthAttribute::Kvk, AuthAttribute::Pseudo];

/// A named set of extra attributes a form may request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeGroup {
    pub name: String,
    pub attributes: Vec<String>,
}

fn identifier_path(attribute: AuthAttribute) -> Option<&'static str> {
    match attribute {
        AuthAttribute::Bsn => Some(BSN_ATTRIBUTE),
        AuthAttribute::Kvk => Some(KVK_ATTRIBUTE),
        AuthAttribute::Pseudo => Some(PSEUDO_ATTRIBUTE),
        AuthAttribute::EmployeeId | AuthAttribute::NationalId => None,
    }
}

fn output_key(attribute: AuthAttribute) -> String {
    format!("{attribute}_claim")
}

pub struct YiviPlugin {
    identifier: String,
    metadata: PluginMetadata,
    endpoints: OidcEndpoints,
    groups: Vec<AttributeGroup>,
    bsn_loa: Option<LoaSettings>,
    kvk_loa: Option<LoaSettings>,
    client: Arc<dyn ProtocolClient>,
}

impl YiviPlugin {
    #[must_use]
    pub fn new(
        identifier: &str,
        endpoints: OidcEndpoints,
        client: Arc<dyn ProtocolClient>,
    ) -> Self {
        Self {
            identifier: identifier.to_string(),
            metadata: PluginMetadata {
                verbose_name: "Yivi".to_string(),
                provides_auth_attributes: BTreeSet::from(ATTRIBUTE_PRECEDENCE),
                is_demo_plugin: false,
                return_method: ReturnMethod::Get,
                family: ProviderFamily::Yivi,
                loa_ordering: None,
            },
            endpoints,
            groups: Vec::new(),
            bsn_loa: None,
            kvk_loa: None,
            client,
        }
    }

    #[must_use]
    pub fn with_verbose_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.verbose_name = name.into();
        self
    }

    #[must_use]
    pub fn with_attribute_groups(mut self, groups: Vec<AttributeGroup>) -> Self {
        self.groups = groups;
        self
    }

    #[must_use]
    pub fn with_bsn_loa(mut self, settings: LoaSettings) -> Self {
        self.bsn_loa = Some(settings);
        self
    }

    #[must_use]
    pub fn with_kvk_loa(mut self, settings: LoaSettings) -> Self {
        self.kvk_loa = Some(settings);
        self
    }

    /// Identifier attributes the form allows, in precedence order.
    fn allowed_attributes(options: &PluginOptions) -> Vec<AuthAttribute> {
        ATTRIBUTE_PRECEDENCE
            .into_iter()
            .filter(|attribute| {
                options.authentication_options.is_empty()
                    || options.authentication_options.contains(attribute)
            })
            .collect()
    }

    fn requested_groups<'a>(
        &'a self,
        options: &'a PluginOptions,
    ) -> impl Iterator<Item = &'a AttributeGroup> {
        options
            .additional_attributes_groups
            .iter()
            .filter_map(|name| {
                let group = self.groups.iter().find(|group| group.name == *name);
                if group.is_none() {
                    warn!(
                        plugin = %self.identifier,
                        group = %name,
                        "unknown attribute group requested"
                    );
                }
                group
            })
    }

    /// Instructions for this request: identifiers plus requested groups.
    #[must_use]
    pub fn instructions(&self, options: &PluginOptions) -> ProcessingInstructions {
        let mut instructions = ProcessingInstructions::new();
        for attribute in Self::allowed_attributes(options) {
            if let Some(path) = identifier_path(attribute) {
                instructions.push(
                    Requirement::Optional,
                    ClaimPathSpec::new(ClaimPath::key(path), ClaimPath::key(output_key(attribute))),
                );
            }
        }
        for group in self.requested_groups(options) {
            for attribute in &group.attributes {
                instructions.push(
                    Requirement::Optional,
                    ClaimPathSpec::new(
                        ClaimPath::key(attribute.as_str()),
                        ClaimPath::new([ADDITIONAL_CLAIMS, attribute.as_str()]),
                    ),
                );
            }
        }
        instructions
    }

    fn loa_settings(&self, attribute: AuthAttribute) -> Option<&LoaSettings> {
        match attribute {
            AuthAttribute::Bsn => self.bsn_loa.as_ref(),
            AuthAttribute::Kvk => self.kvk_loa.as_ref(),
            _ => None,
        }
    }

    fn resolve_loa(&self, attribute: AuthAttribute, claims: &Value) -> String {
        let Some(settings) = self.loa_settings(attribute) else {
            return String::new();
        };
        let instructions = ProcessingInstructions::new().with_loa(LoaInstructions {
            path: settings.path.clone(),
            output_path: ClaimPath::key(LOA_CLAIM),
            default: settings.default.clone(),
            value_mapping: settings.value_mapping.clone(),
        });
        process(claims, &instructions, ValidationMode::Lax)
            .ok()
            .and_then(|output| output.get_string(&ClaimPath::key(LOA_CLAIM)))
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuthenticationPlugin for YiviPlugin {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn start_login(&self, request: &LoginRequest<'_>) -> Result<StartOutcome, PluginError> {
        let mut endpoints = self.endpoints.clone();
        for attribute in Self::allowed_attributes(request.options) {
            endpoints.scopes.push(attribute.to_string());
        }
        for group in self.requested_groups(request.options) {
            endpoints.scopes.push(group.name.clone());
        }
        let url = endpoints.authorization_url(request.return_url, request.state, &[]);
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
        let instructions = self.instructions(request.options);
        let claims = process(&tokens.claims, &instructions, ValidationMode::Lax)?;

        let allowed = Self::allowed_attributes(request.options);
        let (attribute, value) = allowed
            .iter()
            .find_map(|attribute| {
                claims
                    .get_string(&ClaimPath::key(output_key(*attribute)))
                    .filter(|value| !value.is_empty())
                    .map(|value| (*attribute, value))
            })
            .ok_or_else(|| {
                let path = allowed
                    .first()
                    .and_then(|attribute| identifier_path(*attribute))
                    .unwrap_or(PSEUDO_ATTRIBUTE);
                ClaimError::RequiredClaimMissing(ClaimPath::key(path))
            })?;

        let additional = claims
            .get(&ClaimPath::key(ADDITIONAL_CLAIMS))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let form_auth = FormAuth::new(&self.identifier, attribute, value)
            .with_loa(self.resolve_loa(attribute, &tokens.claims))
            .with_additional_claims(additional);

        session.set_plugin_key(OIDC_ID_TOKEN_KEY, tokens.id_token);
        debug!(attribute = %attribute, "yivi disclosure completed");
        Ok(Authenticated { form_auth, claims })
    }

    fn check_requirements(&self, form_auth: &FormAuth, options: &PluginOptions) -> bool {
        let (required, ordering) = match form_auth.attribute {
            AuthAttribute::Bsn => (options.bsn_loa.as_deref(), LoaOrdering::DIGID),
            AuthAttribute::Kvk => (options.kvk_loa.as_deref(), LoaOrdering::EHERKENNING),
            _ => return true,
        };
        match required.filter(|loa| !loa.is_empty()) {
            Some(required) => ordering.meets_requirement(&form_auth.loa, required),
            None => true,
        }
    }

    async fn logout(&self, session: &mut Session) {
        let Some(id_token) = session.remove_plugin_key(OIDC_ID_TOKEN_KEY) else {
            return;
        };
        if let Some(endpoint) = &self.endpoints.end_session_endpoint {
            if let Err(err) = self.client.end_session(endpoint, &id_token).await {
                warn!(plugin = %self.identifier, "RP-initiated logout failed: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::Form;
    use crate::plugins::oidc::tests::endpoints;
    use crate::protocol::testing::FakeProtocolClient;
    use crate::session::PendingAuthentication;
    use serde_json::json;
    use std::collections::HashMap;
    use url::Url;

    fn plugin(claims: Value) -> YiviPlugin {
        YiviPlugin::new("yivi_oidc", endpoints(), Arc::new(FakeProtocolClient::with_claims(claims)))
            .with_attribute_groups(vec![AttributeGroup {
                name: "address".to_string(),
                attributes: vec!["pbdf.gemeente.address.city".to_string()],
            }])
            .with_bsn_loa(LoaSettings {
                path: None,
                default: Some(
                    "urn:oasis:names:tc:SAML:2.0:ac:classes:MobileTwoFactorContract".to_string(),
                ),
                value_mapping: crate::claims::LoaValueMapping::default(),
            })
    }

    async fn login(
        plugin: &YiviPlugin,
        options: &PluginOptions,
    ) -> Result<Authenticated, PluginError> {
        let form = Form::new("melding", "Melding");
        let return_url =
            Url::parse("https://auth.example.nl/return").unwrap_or_else(|_| unreachable!());
        let pending = PendingAuthentication {
            state: "s".to_string(),
            plugin: "yivi_oidc".to_string(),
            form_slug: "melding".to_string(),
            next: return_url.clone(),
            co_sign_submission: None,
        };
        let params = HashMap::from([("code".to_string(), "c".to_string())]);
        let request = ReturnRequest {
            form: &form,
            options,
            params: &params,
            return_url: &return_url,
            pending: &pending,
        };
        plugin.handle_return(&request, &mut Session::new()).await
    }

    #[tokio::test]
    async fn bsn_wins_over_pseudo_and_groups_land_in_additional_claims(
    ) -> Result<(), PluginError> {
        let plugin = plugin(json!({
            "sub": "pseudo-1",
            "pbdf.gemeente.personalData.bsn": "123456782",
            "pbdf.gemeente.address.city": "Utrecht"
        }));
        let options = PluginOptions {
            additional_attributes_groups: vec!["address".to_string(), "unknown".to_string()],
            ..PluginOptions::default()
        };

        let authenticated = login(&plugin, &options).await?;
        let auth = authenticated.form_auth;
        assert_eq!(auth.attribute, AuthAttribute::Bsn);
        assert_eq!(auth.value, "123456782");
        assert_eq!(auth.loa, "urn:oasis:names:tc:SAML:2.0:ac:classes:MobileTwoFactorContract");
        assert_eq!(
            auth.additional_claims
                .and_then(|claims| claims.get("pbdf.gemeente.address.city").cloned()),
            Some(json!("Utrecht"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn form_options_restrict_disclosed_attribute() -> Result<(), PluginError> {
        let plugin = plugin(json!({
            "sub": "pseudo-1",
            "pbdf.gemeente.personalData.bsn": "123456782"
        }));
        let options = PluginOptions {
            authentication_options: vec![AuthAttribute::Pseudo],
            ..PluginOptions::default()
        };

        let auth = login(&plugin, &options).await?.form_auth;
        assert_eq!(auth.attribute, AuthAttribute::Pseudo);
        assert_eq!(auth.value, "pseudo-1");
        assert!(auth.loa.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn no_identifier_fails() {
        let plugin = plugin(json!({"pbdf.gemeente.address.city": "Utrecht"}));
        let result = login(&plugin, &PluginOptions::default()).await;
        assert!(matches!(
            result,
            Err(PluginError::Claims(ClaimError::RequiredClaimMissing(_)))
        ));
    }

    #[test]
    fn check_requirements_uses_attribute_specific_loa() {
        let plugin = plugin(json!({}));
        let options = PluginOptions {
            kvk_loa: Some("urn:etoegang:core:assurance-class:loa3".to_string()),
            ..PluginOptions::default()
        };
        let bsn = FormAuth::new("yivi_oidc", AuthAttribute::Bsn, "123456782");
        let kvk = FormAuth::new("yivi_oidc", AuthAttribute::Kvk, "12345678")
            .with_loa("urn:etoegang:core:assurance-class:loa2");

        assert!(plugin.check_requirements(&bsn, &options));
        assert!(!plugin.check_requirements(&kvk, &options));
    }
}
