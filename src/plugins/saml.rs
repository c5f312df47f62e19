//! SAML broker plugin using the artifact binding.
//!
//! The broker returns with `SAMLart` and `RelayState`; the artifact is resolved
//! by the signing sidecar behind [`ProtocolClient`]. Assertions are flattened
//! into a claim document so the same processor and schemas apply as for OIDC.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::claims::{
    process, ClaimPath, ClaimPathSpec, LoaInstructions, LoaOrdering, ProcessingInstructions,
    Requirement, ValidationMode,
};
use crate::protocol::{ProtocolClient, SamlAssertion, SamlEndpoints};
use crate::session::Session;

use super::schemas::{
    apply_loa_settings, apply_overrides, LoaSettings, OidcSchema, ACTING_SUBJECT_CLAIM,
    BRANCH_NUMBER_CLAIM, BSN_CLAIM, LEGAL_SUBJECT_CLAIM, LEGAL_SUBJECT_DATE_OF_BIRTH_CLAIM,
    LEGAL_SUBJECT_FAMILY_NAME_CLAIM, LEGAL_SUBJECT_FIRST_NAME_CLAIM,
    LEGAL_SUBJECT_IDENTIFIER_CLAIM, LEGAL_SUBJECT_IDENTIFIER_TYPE_CLAIM, LOA_CLAIM,
};
use super::{
    provider_error_param, Authenticated, AuthenticationPlugin, LoginRequest, PluginError,
    PluginMetadata, ProviderFamily, ReturnMethod, ReturnRequest, StartOutcome,
};

/// DigiD sector code prefix on the NameID.
const BSN_SECTOR_PREFIX: &str = "s00000000:";

const NAME_ID: &str = "name_id";
const AUTHN_CONTEXT: &str = "authn_context";
const IDENTIFIER_TYPE: &str = "identifier_type";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamlService {
    Digid,
    Eherkenning,
    Eidas,
}

fn spec(output: &str, path: &str) -> ClaimPathSpec {
    ClaimPathSpec::new(ClaimPath::key(path), ClaimPath::key(output))
}

impl SamlService {
    /// Schema used to turn canonical claims into a `FormAuth`.
    #[must_use]
    pub const fn schema(self) -> OidcSchema {
        match self {
            Self::Digid => OidcSchema::Digid,
            Self::Eherkenning => OidcSchema::Eherkenning,
            Self::Eidas => OidcSchema::EidasPerson,
        }
    }

    #[must_use]
    pub const fn family(self) -> ProviderFamily {
        match self {
            Self::Digid => ProviderFamily::Digid,
            Self::Eherkenning => ProviderFamily::Eherkenning,
            Self::Eidas => ProviderFamily::Eidas,
        }
    }

    /// eIDAS over the eToegang broker uses the eHerkenning assurance classes.
    #[must_use]
    pub const fn loa_ordering(self) -> LoaOrdering {
        match self {
            Self::Digid => LoaOrdering::DIGID,
            Self::Eherkenning | Self::Eidas => LoaOrdering::EHERKENNING,
        }
    }

    #[must_use]
    pub const fn verbose_name(self) -> &'static str {
        match self {
            Self::Digid => "DigiD",
            Self::Eherkenning => "eHerkenning",
            Self::Eidas => "eIDAS",
        }
    }

    #[must_use]
    pub fn default_instructions(self) -> ProcessingInstructions {
        let base = ProcessingInstructions::new();
        let instructions = match self {
            Self::Digid => base.with_claim(Requirement::Always, spec(BSN_CLAIM, NAME_ID)),
            Self::Eherkenning => base
                .with_claim(
                    Requirement::Always,
                    spec(LEGAL_SUBJECT_CLAIM, "urn:etoegang:core:LegalSubjectID"),
                )
                .with_claim(Requirement::StrictOnly, spec(ACTING_SUBJECT_CLAIM, NAME_ID))
                .with_claim(
                    Requirement::Optional,
                    spec(
                        BRANCH_NUMBER_CLAIM,
                        "urn:etoegang:1.9:ServiceRestriction:Vestigingsnr",
                    ),
                ),
            Self::Eidas => base
                .with_claim(
                    Requirement::Always,
                    spec(LEGAL_SUBJECT_IDENTIFIER_CLAIM, "urn:etoegang:core:LegalSubjectID"),
                )
                .with_claim(
                    Requirement::Always,
                    spec(LEGAL_SUBJECT_IDENTIFIER_TYPE_CLAIM, IDENTIFIER_TYPE),
                )
                .with_claim(
                    Requirement::Optional,
                    spec(LEGAL_SUBJECT_FIRST_NAME_CLAIM, "urn:etoegang:1.9:attribute:FirstName"),
                )
                .with_claim(
                    Requirement::Optional,
                    spec(
                        LEGAL_SUBJECT_FAMILY_NAME_CLAIM,
                        "urn:etoegang:1.9:attribute:FamilyName",
                    ),
                )
                .with_claim(
                    Requirement::Optional,
                    spec(
                        LEGAL_SUBJECT_DATE_OF_BIRTH_CLAIM,
                        "urn:etoegang:1.9:attribute:DateOfBirth",
                    ),
                ),
        };
        instructions.with_loa(LoaInstructions {
            path: Some(ClaimPath::key(AUTHN_CONTEXT)),
            output_path: ClaimPath::key(LOA_CLAIM),
            default: None,
            value_mapping: crate::claims::LoaValueMapping::default(),
        })
    }

    /// Flatten an assertion into a claim document.
    #[must_use]
    pub fn claim_document(self, assertion: &SamlAssertion) -> Value {
        let mut document: Map<String, Value> = assertion.attributes.clone();
        let name_id = match self {
            Self::Digid => assertion
                .name_id
                .strip_prefix(BSN_SECTOR_PREFIX)
                .unwrap_or(&assertion.name_id),
            Self::Eherkenning | Self::Eidas => assertion.name_id.as_str(),
        };
        document.insert(NAME_ID.to_string(), Value::String(name_id.to_string()));
        if let Some(context) = &assertion.authn_context_class_ref {
            document.insert(AUTHN_CONTEXT.to_string(), Value::String(context.clone()));
        }
        if self == Self::Eidas {
            document
                .entry(IDENTIFIER_TYPE.to_string())
                .or_insert_with(|| Value::String("nationalID".to_string()));
        }
        Value::Object(document)
    }
}

pub struct SamlPlugin {
    identifier: String,
    metadata: PluginMetadata,
    service: SamlService,
    endpoints: SamlEndpoints,
    instructions: ProcessingInstructions,
    mode: ValidationMode,
    client: Arc<dyn ProtocolClient>,
}

impl SamlPlugin {
    #[must_use]
    pub fn new(
        identifier: &str,
        service: SamlService,
        endpoints: SamlEndpoints,
        client: Arc<dyn ProtocolClient>,
    ) -> Self {
        let schema = service.schema();
        Self {
            identifier: identifier.to_string(),
            metadata: PluginMetadata {
                verbose_name: service.verbose_name().to_string(),
                provides_auth_attributes: schema.provides(),
                is_demo_plugin: false,
                return_method: ReturnMethod::Get,
                family: service.family(),
                loa_ordering: Some(service.loa_ordering()),
            },
            service,
            endpoints,
            instructions: service.default_instructions(),
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
        let mut instructions = self.service.default_instructions();
        apply_overrides(&mut instructions, overrides);
        if let Some(settings) = loa {
            apply_loa_settings(&mut instructions, settings);
        }
        self.instructions = instructions;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ValidationMode) -> Self {
        self.mode = mode;
        self
    }
}

#[async_trait]
impl AuthenticationPlugin for SamlPlugin {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn start_login(&self, request: &LoginRequest<'_>) -> Result<StartOutcome, PluginError> {
        let url = self
            .endpoints
            .login_url(request.return_url, request.state, request.options.min_loa());
        Ok(StartOutcome::Redirect(url))
    }

    #[instrument(skip_all, fields(plugin = %self.identifier))]
    async fn handle_return(
        &self,
        request: &ReturnRequest<'_>,
        _session: &mut Session,
    ) -> Result<Authenticated, PluginError> {
        provider_error_param(request)?;
        let artifact = request
            .param("SAMLart")
            .ok_or_else(|| PluginError::InvalidPayload("missing 'SAMLart' parameter".to_string()))?;

        let assertion = self
            .client
            .resolve_artifact(&self.endpoints, artifact)
            .await?;
        let document = self.service.claim_document(&assertion);
        let claims = process(&document, &self.instructions, self.mode)?;
        let form_auth = self.service.schema().to_form_auth(&self.identifier, &claims)?;

        debug!(attribute = %form_auth.attribute, "saml login completed");
        Ok(Authenticated { form_auth, claims })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::{Form, PluginOptions};
    use crate::protocol::testing::FakeProtocolClient;
    use crate::session::PendingAuthentication;
    use crate::types::AuthAttribute;
    use serde_json::json;
    use url::Url;

    fn endpoints() -> SamlEndpoints {
        SamlEndpoints {
            sso_url: Url::parse("https://broker.example.nl/sso").unwrap_or_else(|_| unreachable!()),
            artifact_resolution_url: Url::parse("http://saml-sidecar:8000/resolve")
                .unwrap_or_else(|_| unreachable!()),
            entity_id: "urn:forms".to_string(),
        }
    }

    #[test]
    fn digid_name_id_prefix_is_stripped() {
        let assertion = SamlAssertion {
            name_id: "s00000000:123456782".to_string(),
            authn_context_class_ref: Some(
                "urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport".to_string(),
            ),
            attributes: Map::new(),
        };
        let document = SamlService::Digid.claim_document(&assertion);
        assert_eq!(document.get(NAME_ID), Some(&json!("123456782")));
    }

    #[tokio::test]
    async fn eherkenning_assertion_becomes_kvk_login() -> Result<(), PluginError> {
        let mut attributes = Map::new();
        attributes.insert("urn:etoegang:core:LegalSubjectID".to_string(), json!("12345678"));
        let client = Arc::new(FakeProtocolClient::with_assertion(SamlAssertion {
            name_id: "4B75A0EA107B3D36".to_string(),
            authn_context_class_ref: Some("urn:etoegang:core:assurance-class:loa3".to_string()),
            attributes,
        }));
        let plugin = SamlPlugin::new("eherkenning", SamlService::Eherkenning, endpoints(), client)
            .with_mode(ValidationMode::Strict);

        let form = Form::new("melding", "Melding");
        let options = PluginOptions::default();
        let return_url =
            Url::parse("https://auth.example.nl/return").unwrap_or_else(|_| unreachable!());
        let pending = PendingAuthentication {
            state: "relay".to_string(),
            plugin: "eherkenning".to_string(),
            form_slug: "melding".to_string(),
            next: return_url.clone(),
            co_sign_submission: None,
        };
        let params = HashMap::from([
            ("SAMLart".to_string(), "AAQAA".to_string()),
            ("RelayState".to_string(), "relay".to_string()),
        ]);
        let request = ReturnRequest {
            form: &form,
            options: &options,
            params: &params,
            return_url: &return_url,
            pending: &pending,
        };
        let mut session = Session::new();

        let authenticated = plugin.handle_return(&request, &mut session).await?;
        assert_eq!(authenticated.form_auth.attribute, AuthAttribute::Kvk);
        assert_eq!(authenticated.form_auth.value, "12345678");
        assert_eq!(authenticated.form_auth.acting_subject_identifier_value, "4B75A0EA107B3D36");
        assert_eq!(authenticated.form_auth.loa, "urn:etoegang:core:assurance-class:loa3");
        Ok(())
    }

    #[test]
    fn configured_loa_path_replaces_authn_context() -> Result<(), crate::claims::ClaimError> {
        let settings = LoaSettings {
            path: Some(ClaimPath::key("urn:etoegang:core:LevelOfAssurance")),
            ..LoaSettings::default()
        };
        let plugin = SamlPlugin::new(
            "eherkenning",
            SamlService::Eherkenning,
            endpoints(),
            Arc::new(FakeProtocolClient::failing()),
        )
        .with_claim_paths(&HashMap::new(), Some(&settings));

        let mut attributes = Map::new();
        attributes.insert("urn:etoegang:core:LegalSubjectID".to_string(), json!("12345678"));
        attributes.insert(
            "urn:etoegang:core:LevelOfAssurance".to_string(),
            json!("urn:etoegang:core:assurance-class:loa4"),
        );
        let document = SamlService::Eherkenning.claim_document(&SamlAssertion {
            name_id: "4B75A0EA107B3D36".to_string(),
            authn_context_class_ref: Some("urn:etoegang:core:assurance-class:loa2".to_string()),
            attributes,
        });

        let claims = process(&document, &plugin.instructions, ValidationMode::Lax)?;
        assert_eq!(
            claims.get_string(&ClaimPath::key(LOA_CLAIM)).as_deref(),
            Some("urn:etoegang:core:assurance-class:loa4")
        );
        Ok(())
    }

    #[test]
    fn eidas_document_gets_identifier_type() {
        let assertion = SamlAssertion {
            name_id: "opaque".to_string(),
            authn_context_class_ref: None,
            attributes: Map::new(),
        };
        let document = SamlService::Eidas.claim_document(&assertion);
        assert_eq!(document.get(IDENTIFIER_TYPE), Some(&json!("nationalID")));
    }
}
