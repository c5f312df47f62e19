//! Per-provider claim schemas.
//!
//! Each schema is data: default [`ProcessingInstructions`] keyed by canonical
//! output names, plus the mapping from canonical claims onto a [`FormAuth`].
//! Deployments override the input paths per output name.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};

use crate::claims::{
    CanonicalClaims, ClaimError, ClaimPath, ClaimPathSpec, LoaInstructions, LoaOrdering,
    ProcessingInstructions, Requirement,
};
use crate::types::{AuthAttribute, FormAuth, MandateContext, MandateService};

use super::ProviderFamily;

pub const BSN_CLAIM: &str = "bsn_claim";
pub const LOA_CLAIM: &str = "loa_claim";
pub const REPRESENTEE_BSN_CLAIM: &str = "representee_bsn_claim";
pub const AUTHORIZEE_BSN_CLAIM: &str = "authorizee_bsn_claim";
pub const MANDATE_SERVICE_ID_CLAIM: &str = "mandate_service_id_claim";
pub const MANDATE_SERVICE_UUID_CLAIM: &str = "mandate_service_uuid_claim";
pub const LEGAL_SUBJECT_CLAIM: &str = "legal_subject_claim";
pub const ACTING_SUBJECT_CLAIM: &str = "acting_subject_claim";
pub const IDENTIFIER_TYPE_CLAIM: &str = "identifier_type_claim";
pub const BRANCH_NUMBER_CLAIM: &str = "branch_number_claim";
pub const REPRESENTEE_CLAIM: &str = "representee_claim";
pub const LEGAL_SUBJECT_IDENTIFIER_CLAIM: &str = "legal_subject_identifier_claim";
pub const LEGAL_SUBJECT_IDENTIFIER_TYPE_CLAIM: &str = "legal_subject_identifier_type_claim";
pub const LEGAL_SUBJECT_FIRST_NAME_CLAIM: &str = "legal_subject_first_name_claim";
pub const LEGAL_SUBJECT_FAMILY_NAME_CLAIM: &str = "legal_subject_family_name_claim";
pub const LEGAL_SUBJECT_DATE_OF_BIRTH_CLAIM: &str = "legal_subject_date_of_birth_claim";
pub const COMPANY_NAME_CLAIM: &str = "company_name_claim";
pub const ACTING_SUBJECT_IDENTIFIER_CLAIM: &str = "acting_subject_identifier_claim";
pub const ACTING_SUBJECT_IDENTIFIER_TYPE_CLAIM: &str = "acting_subject_identifier_type_claim";
pub const ACTING_SUBJECT_FIRST_NAME_CLAIM: &str = "acting_subject_first_name_claim";
pub const ACTING_SUBJECT_FAMILY_NAME_CLAIM: &str = "acting_subject_family_name_claim";
pub const ACTING_SUBJECT_DATE_OF_BIRTH_CLAIM: &str = "acting_subject_date_of_birth_claim";
pub const EMPLOYEE_ID_CLAIM: &str = "employee_id_claim";
pub const USERNAME_CLAIM: &str = "username_claim";
pub const GROUPS_CLAIM: &str = "groups_claim";

/// Canonical key for sidecar claims.
pub const ADDITIONAL_CLAIMS: &str = "additional_claims";

const BEWINDVOERING_ROLE: &str = "bewindvoerder";

/// LoA settings from configuration, overriding the schema default path.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaSettings {
    pub path: Option<ClaimPath>,
    pub default: Option<String>,
    pub value_mapping: crate::claims::LoaValueMapping,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OidcSchema {
    Digid,
    DigidMachtigen,
    Eherkenning,
    EherkenningBewindvoering,
    EidasPerson,
    EidasCompany,
    OrgOidc,
}

fn spec(output: &str, path: &[&str]) -> ClaimPathSpec {
    ClaimPathSpec::new(ClaimPath::new(path.iter().copied()), ClaimPath::key(output))
}

fn eherkenning_claims(instructions: ProcessingInstructions) -> ProcessingInstructions {
    instructions
        .with_claim(Requirement::Always, spec(LEGAL_SUBJECT_CLAIM, &["legalSubjectID"]))
        .with_claim(Requirement::StrictOnly, spec(ACTING_SUBJECT_CLAIM, &["actingSubjectID"]))
        .with_claim(Requirement::Optional, spec(IDENTIFIER_TYPE_CLAIM, &["namequalifier"]))
        .with_claim(
            Requirement::Optional,
            spec(
                BRANCH_NUMBER_CLAIM,
                &["urn:etoegang:1.9:ServiceRestriction:Vestigingsnr"],
            ),
        )
}

impl OidcSchema {
    #[must_use]
    pub const fn family(self) -> ProviderFamily {
        match self {
            Self::Digid | Self::DigidMachtigen => ProviderFamily::Digid,
            Self::Eherkenning | Self::EherkenningBewindvoering => ProviderFamily::Eherkenning,
            Self::EidasPerson | Self::EidasCompany => ProviderFamily::Eidas,
            Self::OrgOidc => ProviderFamily::OrgOidc,
        }
    }

    #[must_use]
    pub const fn loa_ordering(self) -> Option<LoaOrdering> {
        match self {
            Self::Digid | Self::DigidMachtigen => Some(LoaOrdering::DIGID),
            Self::Eherkenning | Self::EherkenningBewindvoering => Some(LoaOrdering::EHERKENNING),
            Self::EidasPerson | Self::EidasCompany => Some(LoaOrdering::EIDAS),
            Self::OrgOidc => None,
        }
    }

    #[must_use]
    pub const fn verbose_name(self) -> &'static str {
        match self {
            Self::Digid => "DigiD via OpenID Connect",
            Self::DigidMachtigen => "DigiD Machtigen via OpenID Connect",
            Self::Eherkenning => "eHerkenning via OpenID Connect",
            Self::EherkenningBewindvoering => "eHerkenning bewindvoering via OpenID Connect",
            Self::EidasPerson => "eIDAS via OpenID Connect",
            Self::EidasCompany => "eIDAS (company) via OpenID Connect",
            Self::OrgOidc => "Organization via OpenID Connect",
        }
    }

    /// The attribute this schema writes into `FormAuth::attribute`.
    #[must_use]
    pub const fn attribute(self) -> AuthAttribute {
        match self {
            Self::Digid | Self::DigidMachtigen | Self::EherkenningBewindvoering => {
                AuthAttribute::Bsn
            }
            Self::Eherkenning => AuthAttribute::Kvk,
            Self::EidasPerson | Self::EidasCompany => AuthAttribute::NationalId,
            Self::OrgOidc => AuthAttribute::EmployeeId,
        }
    }

    #[must_use]
    pub fn provides(self) -> BTreeSet<AuthAttribute> {
        BTreeSet::from([self.attribute()])
    }

    /// Default instructions with the schema's stock LoA path.
    #[must_use]
    pub fn default_instructions(self) -> ProcessingInstructions {
        let loa = LoaInstructions {
            path: Some(match self {
                Self::Digid | Self::DigidMachtigen => ClaimPath::key("authsp_level"),
                _ => ClaimPath::key("loa_authn"),
            }),
            output_path: ClaimPath::key(LOA_CLAIM),
            default: None,
            value_mapping: crate::claims::LoaValueMapping::default(),
        };
        let base = ProcessingInstructions::new();

        match self {
            Self::Digid => base
                .with_claim(Requirement::Always, spec(BSN_CLAIM, &["bsn"]))
                .with_loa(loa),
            Self::DigidMachtigen => base
                .with_claim(Requirement::Always, spec(REPRESENTEE_BSN_CLAIM, &["representee"]))
                .with_claim(Requirement::Always, spec(AUTHORIZEE_BSN_CLAIM, &["authorizee"]))
                .with_claim(
                    Requirement::StrictOnly,
                    spec(MANDATE_SERVICE_ID_CLAIM, &["service_id"]),
                )
                .with_loa(loa),
            Self::Eherkenning => eherkenning_claims(base).with_loa(loa),
            Self::EherkenningBewindvoering => eherkenning_claims(base)
                .with_claim(Requirement::Always, spec(REPRESENTEE_CLAIM, &["representeeBSN"]))
                .with_claim(
                    Requirement::StrictOnly,
                    spec(MANDATE_SERVICE_ID_CLAIM, &["urn:etoegang:core:ServiceID"]),
                )
                .with_claim(
                    Requirement::StrictOnly,
                    spec(MANDATE_SERVICE_UUID_CLAIM, &["urn:etoegang:core:ServiceUUID"]),
                )
                .with_loa(loa),
            Self::EidasPerson => base
                .with_claim(
                    Requirement::Always,
                    spec(LEGAL_SUBJECT_IDENTIFIER_CLAIM, &["person_identifier"]),
                )
                .with_claim(
                    Requirement::Always,
                    spec(LEGAL_SUBJECT_IDENTIFIER_TYPE_CLAIM, &["person_identifier_type"]),
                )
                .with_claim(
                    Requirement::Always,
                    spec(LEGAL_SUBJECT_FIRST_NAME_CLAIM, &["first_name"]),
                )
                .with_claim(
                    Requirement::Always,
                    spec(LEGAL_SUBJECT_FAMILY_NAME_CLAIM, &["family_name"]),
                )
                .with_claim(
                    Requirement::Always,
                    spec(LEGAL_SUBJECT_DATE_OF_BIRTH_CLAIM, &["birthdate"]),
                )
                .with_loa(loa),
            Self::EidasCompany => base
                .with_claim(Requirement::Always, spec(COMPANY_NAME_CLAIM, &["company_name"]))
                .with_claim(
                    Requirement::Always,
                    spec(LEGAL_SUBJECT_IDENTIFIER_CLAIM, &["company_identifier"]),
                )
                .with_claim(
                    Requirement::Always,
                    spec(ACTING_SUBJECT_IDENTIFIER_CLAIM, &["person_identifier"]),
                )
                .with_claim(
                    Requirement::Always,
                    spec(ACTING_SUBJECT_IDENTIFIER_TYPE_CLAIM, &["person_identifier_type"]),
                )
                .with_claim(
                    Requirement::Always,
                    spec(ACTING_SUBJECT_FIRST_NAME_CLAIM, &["first_name"]),
                )
                .with_claim(
                    Requirement::Always,
                    spec(ACTING_SUBJECT_FAMILY_NAME_CLAIM, &["family_name"]),
                )
                .with_claim(
                    Requirement::Always,
                    spec(ACTING_SUBJECT_DATE_OF_BIRTH_CLAIM, &["birthdate"]),
                )
                .with_claim(
                    Requirement::StrictOnly,
                    spec(MANDATE_SERVICE_ID_CLAIM, &["service_id"]),
                )
                .with_loa(loa),
            Self::OrgOidc => base
                .with_claim(Requirement::Always, spec(EMPLOYEE_ID_CLAIM, &["sub"]))
                .with_claim(Requirement::Optional, spec(USERNAME_CLAIM, &["preferred_username"]))
                .with_claim(Requirement::Optional, spec(GROUPS_CLAIM, &["roles"])),
        }
    }

    /// Instructions with configured path overrides and LoA settings applied.
    #[must_use]
    pub fn instructions(
        self,
        overrides: &HashMap<String, ClaimPath>,
        loa: Option<&LoaSettings>,
    ) -> ProcessingInstructions {
        let mut instructions = self.default_instructions();
        apply_overrides(&mut instructions, overrides);
        if let Some(settings) = loa {
            apply_loa_settings(&mut instructions, settings);
        }
        instructions
    }

    /// Turn canonical claims into the session identity.
    ///
    /// # Errors
    /// `RequiredClaimMissing` when the identifying claim did not make it into
    /// the canonical output.
    pub fn to_form_auth(
        self,
        plugin: &str,
        claims: &CanonicalClaims,
    ) -> Result<FormAuth, ClaimError> {
        let text = |name: &str| claims.get_string(&ClaimPath::key(name));
        let required = |name: &str| {
            text(name)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| ClaimError::RequiredClaimMissing(ClaimPath::key(name)))
        };
        let loa = text(LOA_CLAIM).unwrap_or_default();

        let form_auth = match self {
            Self::Digid => FormAuth::new(plugin, AuthAttribute::Bsn, required(BSN_CLAIM)?),
            Self::DigidMachtigen => {
                let representee = required(REPRESENTEE_BSN_CLAIM)?;
                let mut auth = FormAuth::new(plugin, AuthAttribute::Bsn, representee)
                    .with_legal_subject("bsn", required(AUTHORIZEE_BSN_CLAIM)?);
                if let Some(service) = text(MANDATE_SERVICE_ID_CLAIM) {
                    auth = auth.with_mandate(MandateContext {
                        role: None,
                        services: vec![MandateService { id: service, uuid: None }],
                    });
                }
                auth
            }
            Self::Eherkenning => {
                let company = required(LEGAL_SUBJECT_CLAIM)?;
                let mut auth = FormAuth::new(plugin, AuthAttribute::Kvk, company.clone());
                if text(IDENTIFIER_TYPE_CLAIM).is_some_and(|kind| kind.ends_with(":RSIN")) {
                    auth = auth.with_legal_subject("rsin", company);
                }
                if let Some(acting) = text(ACTING_SUBJECT_CLAIM) {
                    auth = auth.with_acting_subject("opaque", acting);
                }
                if let Some(branch) = text(BRANCH_NUMBER_CLAIM) {
                    auth = auth.with_service_restriction(branch);
                }
                auth
            }
            Self::EherkenningBewindvoering => {
                let representee = required(REPRESENTEE_CLAIM)?;
                let mut auth = FormAuth::new(plugin, AuthAttribute::Bsn, representee)
                    .with_legal_subject("kvk", required(LEGAL_SUBJECT_CLAIM)?);
                if let Some(acting) = text(ACTING_SUBJECT_CLAIM) {
                    auth = auth.with_acting_subject("opaque", acting);
                }
                if let Some(branch) = text(BRANCH_NUMBER_CLAIM) {
                    auth = auth.with_service_restriction(branch);
                }
                let services = text(MANDATE_SERVICE_ID_CLAIM)
                    .map(|id| MandateService {
                        id,
                        uuid: text(MANDATE_SERVICE_UUID_CLAIM),
                    })
                    .into_iter()
                    .collect();
                auth.with_mandate(MandateContext {
                    role: Some(BEWINDVOERING_ROLE.to_string()),
                    services,
                })
            }
            Self::EidasPerson => {
                let identifier = required(LEGAL_SUBJECT_IDENTIFIER_CLAIM)?;
                let kind = required(LEGAL_SUBJECT_IDENTIFIER_TYPE_CLAIM)?;
                FormAuth::new(plugin, AuthAttribute::NationalId, identifier.clone())
                    .with_legal_subject(kind, identifier)
                    .with_additional_claims(sidecar(
                        claims,
                        &[
                            ("first_name", LEGAL_SUBJECT_FIRST_NAME_CLAIM),
                            ("family_name", LEGAL_SUBJECT_FAMILY_NAME_CLAIM),
                            ("date_of_birth", LEGAL_SUBJECT_DATE_OF_BIRTH_CLAIM),
                        ],
                    ))
            }
            Self::EidasCompany => {
                let company = required(LEGAL_SUBJECT_IDENTIFIER_CLAIM)?;
                let mut auth = FormAuth::new(plugin, AuthAttribute::NationalId, company.clone())
                    .with_legal_subject("opaque", company)
                    .with_acting_subject(
                        required(ACTING_SUBJECT_IDENTIFIER_TYPE_CLAIM)?,
                        required(ACTING_SUBJECT_IDENTIFIER_CLAIM)?,
                    )
                    .with_additional_claims(sidecar(
                        claims,
                        &[
                            ("company_name", COMPANY_NAME_CLAIM),
                            ("first_name", ACTING_SUBJECT_FIRST_NAME_CLAIM),
                            ("family_name", ACTING_SUBJECT_FAMILY_NAME_CLAIM),
                            ("date_of_birth", ACTING_SUBJECT_DATE_OF_BIRTH_CLAIM),
                        ],
                    ));
                if let Some(service) = text(MANDATE_SERVICE_ID_CLAIM) {
                    auth = auth.with_mandate(MandateContext {
                        role: None,
                        services: vec![MandateService { id: service, uuid: None }],
                    });
                }
                auth
            }
            Self::OrgOidc => {
                FormAuth::new(plugin, AuthAttribute::EmployeeId, required(EMPLOYEE_ID_CLAIM)?)
                    .with_additional_claims(sidecar(
                        claims,
                        &[("username", USERNAME_CLAIM), ("groups", GROUPS_CLAIM)],
                    ))
            }
        };

        Ok(form_auth.with_loa(loa))
    }
}

/// Replace input paths of specs whose output key has a configured override.
pub fn apply_overrides(
    instructions: &mut ProcessingInstructions,
    overrides: &HashMap<String, ClaimPath>,
) {
    let specs = instructions
        .always_required
        .iter_mut()
        .chain(instructions.strict_required.iter_mut())
        .chain(instructions.optional.iter_mut());
    for spec in specs {
        if let Some(path) = overrides.get(&spec.output_path.to_string()) {
            spec.path = path.clone();
        }
    }
}

/// Replace the LoA path (when configured), default and value mapping.
pub fn apply_loa_settings(instructions: &mut ProcessingInstructions, settings: &LoaSettings) {
    if let Some(current) = instructions.loa.as_mut() {
        if let Some(path) = &settings.path {
            current.path = Some(path.clone());
        }
        current.default.clone_from(&settings.default);
        current.value_mapping = settings.value_mapping.clone();
    }
}

fn sidecar(claims: &CanonicalClaims, keys: &[(&str, &str)]) -> Map<String, Value> {
    keys.iter()
        .filter_map(|(name, source)| {
            claims
                .get(&ClaimPath::key(*source))
                .map(|value| ((*name).to_string(), value.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::{process, ValidationMode};
    use serde_json::json;

    #[test]
    fn digid_claims_become_bsn_form_auth() -> Result<(), ClaimError> {
        let schema = OidcSchema::Digid;
        let claims = json!({
            "bsn": "123456782",
            "authsp_level": "urn:oasis:names:tc:SAML:2.0:ac:classes:Smartcard"
        });
        let canonical = process(&claims, &schema.default_instructions(), ValidationMode::Strict)?;
        let auth = schema.to_form_auth("digid_oidc", &canonical)?;

        assert_eq!(auth.attribute, AuthAttribute::Bsn);
        assert_eq!(auth.value, "123456782");
        assert_eq!(auth.loa, "urn:oasis:names:tc:SAML:2.0:ac:classes:Smartcard");
        Ok(())
    }

    #[test]
    fn bewindvoering_strict_requires_service_uuid() {
        let schema = OidcSchema::EherkenningBewindvoering;
        let claims = json!({
            "legalSubjectID": "12345678",
            "actingSubjectID": "4B75A0EA107B3D36",
            "representeeBSN": "999991607",
            "urn:etoegang:core:ServiceID": "urn:etoegang:DV:00000001002308836000:services:9113",
            "loa_authn": "urn:etoegang:core:assurance-class:loa3"
        });
        let result = process(&claims, &schema.default_instructions(), ValidationMode::Strict);
        assert_eq!(
            result,
            Err(ClaimError::RequiredClaimMissing(ClaimPath::key(
                "urn:etoegang:core:ServiceUUID"
            )))
        );
    }

    #[test]
    fn bewindvoering_builds_mandate_context() -> Result<(), ClaimError> {
        let schema = OidcSchema::EherkenningBewindvoering;
        let claims = json!({
            "legalSubjectID": "12345678",
            "actingSubjectID": "4B75A0EA107B3D36",
            "representeeBSN": "999991607",
            "urn:etoegang:core:ServiceID": "urn:etoegang:DV:1:services:9113",
            "urn:etoegang:core:ServiceUUID": "34085d78-21aa-4481-a219-b28d7f3282fc",
            "loa_authn": "urn:etoegang:core:assurance-class:loa3"
        });
        let canonical = process(&claims, &schema.default_instructions(), ValidationMode::Strict)?;
        let auth = schema.to_form_auth("eherkenning_bewindvoering_oidc", &canonical)?;

        assert_eq!(auth.value, "999991607");
        assert_eq!(auth.legal_subject_identifier_value, "12345678");
        assert_eq!(auth.acting_subject_identifier_type, "opaque");
        let mandate = auth.mandate_context.unwrap_or_default();
        assert_eq!(mandate.role.as_deref(), Some("bewindvoerder"));
        assert_eq!(
            mandate.services.first().and_then(|service| service.uuid.as_deref()),
            Some("34085d78-21aa-4481-a219-b28d7f3282fc")
        );
        Ok(())
    }

    #[test]
    fn overrides_replace_input_paths() -> Result<(), ClaimError> {
        let overrides = HashMap::from([(
            EMPLOYEE_ID_CLAIM.to_string(),
            ClaimPath::new(["extra", "employee"]),
        )]);
        let schema = OidcSchema::OrgOidc;
        let instructions = schema.instructions(&overrides, None);
        let claims = json!({"sub": "ignored", "extra": {"employee": "E-42"}, "roles": ["editor"]});
        let canonical = process(&claims, &instructions, ValidationMode::Lax)?;
        let auth = schema.to_form_auth("org_oidc", &canonical)?;

        assert_eq!(auth.value, "E-42");
        assert_eq!(
            auth.additional_claims.and_then(|claims| claims.get("groups").cloned()),
            Some(json!(["editor"]))
        );
        Ok(())
    }

    #[test]
    fn eidas_person_names_land_in_additional_claims() -> Result<(), ClaimError> {
        let schema = OidcSchema::EidasPerson;
        let claims = json!({
            "person_identifier": "NL/NL/12345",
            "person_identifier_type": "nationalID",
            "first_name": "Jan",
            "family_name": "Jansen",
            "birthdate": "1980-01-01",
            "loa_authn": "http://eidas.europa.eu/LoA/substantial"
        });
        let canonical = process(&claims, &schema.default_instructions(), ValidationMode::Strict)?;
        let auth = schema.to_form_auth("eidas_oidc", &canonical)?;

        assert_eq!(auth.attribute, AuthAttribute::NationalId);
        assert_eq!(auth.legal_subject_identifier_type, "nationalID");
        let extra = auth.additional_claims.unwrap_or_default();
        assert_eq!(extra.get("first_name"), Some(&json!("Jan")));
        assert_eq!(extra.get("date_of_birth"), Some(&json!("1980-01-01")));
        Ok(())
    }

    #[test]
    fn loa_settings_override_default_and_mapping() -> Result<(), ClaimError> {
        let settings = LoaSettings {
            path: None,
            default: Some(
                "urn:oasis:names:tc:SAML:2.0:ac:classes:MobileTwoFactorContract".to_string(),
            ),
            value_mapping: crate::claims::LoaValueMapping::from_pairs([(
                "25",
                "urn:oasis:names:tc:SAML:2.0:ac:classes:MobileTwoFactorContract",
            )]),
        };
        let instructions = OidcSchema::Digid.instructions(&HashMap::new(), Some(&settings));
        let canonical = process(
            &json!({"bsn": "123456782", "authsp_level": 25}),
            &instructions,
            ValidationMode::Strict,
        )?;
        assert_eq!(
            canonical.get_string(&ClaimPath::key(LOA_CLAIM)).as_deref(),
            Some("urn:oasis:names:tc:SAML:2.0:ac:classes:MobileTwoFactorContract")
        );
        Ok(())
    }
}
