//! Authentication context document.
//!
//! A pure projection of [`AuthInfo`] for downstream consumers (registration
//! backends, audit logging). Every document is validated against the rules of
//! its source before it is handed out.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::AuthInfo;
use crate::types::{AuthAttribute, ContextSource, MandateContext};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextSchemaError {
    #[error("missing identifier for '{0}'")]
    MissingIdentifier(&'static str),
    #[error("identifier type '{identifier_type}' is not valid for {field} of source {context_source:?}")]
    InvalidIdentifierType {
        context_source: ContextSource,
        field: &'static str,
        identifier_type: String,
    },
    #[error("source {0:?} requires a level of assurance")]
    MissingLevelOfAssurance(ContextSource),
    #[error("mandate requires at least one service")]
    EmptyMandate,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub identifier_type: String,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_number: Option<String>,
}

impl Subject {
    fn new(identifier_type: &str, identifier: &str) -> Self {
        Self {
            identifier_type: identifier_type.to_string(),
            identifier: identifier.to_string(),
            branch_number: None,
        }
    }

    fn with_branch(mut self, branch: &str) -> Self {
        if !branch.is_empty() {
            self.branch_number = Some(branch.to_string());
        }
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Authorizee {
    pub legal_subject: Subject,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acting_subject: Option<Subject>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationContext {
    pub source: ContextSource,
    pub level_of_assurance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub representee: Option<Subject>,
    pub authorizee: Authorizee,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mandate: Option<MandateContext>,
}

fn attribute_identifier_type(attribute: AuthAttribute) -> &'static str {
    match attribute {
        AuthAttribute::Bsn => "bsn",
        AuthAttribute::Kvk => "kvkNummer",
        AuthAttribute::NationalId => "nationalID",
        AuthAttribute::Pseudo | AuthAttribute::EmployeeId => "opaque",
    }
}

fn non_empty(kind: &str, value: &str) -> Option<Subject> {
    (!value.is_empty()).then(|| Subject::new(kind, value))
}

impl AuthInfo {
    fn acting_subject(&self) -> Option<Subject> {
        non_empty(
            &self.acting_subject_identifier_type,
            &self.acting_subject_identifier_value,
        )
    }

    fn company_identifier_type(&self) -> &'static str {
        if self.legal_subject_identifier_type == "rsin" {
            "rsin"
        } else {
            "kvkNummer"
        }
    }

    /// Project the record onto the context document for `source`.
    ///
    /// # Errors
    /// Returns the first schema rule the document violates.
    pub fn to_authentication_context(
        &self,
        source: ContextSource,
    ) -> Result<AuthenticationContext, ContextSchemaError> {
        let represented = !self.legal_subject_identifier_value.is_empty();
        let (representee, authorizee) = match source {
            ContextSource::Digid if represented => (
                Some(Subject::new("bsn", &self.value)),
                Authorizee {
                    legal_subject: Subject::new("bsn", &self.legal_subject_identifier_value),
                    acting_subject: None,
                },
            ),
            ContextSource::Eherkenning if self.attribute == AuthAttribute::Bsn => (
                Some(Subject::new("bsn", &self.value)),
                Authorizee {
                    legal_subject: Subject::new("kvkNummer", &self.legal_subject_identifier_value)
                        .with_branch(&self.legal_subject_service_restriction),
                    acting_subject: self.acting_subject(),
                },
            ),
            ContextSource::Eherkenning => (
                None,
                Authorizee {
                    legal_subject: Subject::new(self.company_identifier_type(), &self.value)
                        .with_branch(&self.legal_subject_service_restriction),
                    acting_subject: self.acting_subject(),
                },
            ),
            ContextSource::Eidas => (
                None,
                Authorizee {
                    legal_subject: Subject::new(
                        if self.legal_subject_identifier_type.is_empty() {
                            attribute_identifier_type(self.attribute)
                        } else {
                            &self.legal_subject_identifier_type
                        },
                        &self.value,
                    ),
                    acting_subject: self.acting_subject(),
                },
            ),
            ContextSource::Digid | ContextSource::Yivi | ContextSource::Custom => (
                None,
                Authorizee {
                    legal_subject: Subject::new(
                        attribute_identifier_type(self.attribute),
                        &self.value,
                    ),
                    acting_subject: None,
                },
            ),
        };

        let context = AuthenticationContext {
            source,
            level_of_assurance: self.loa.clone(),
            representee,
            authorizee,
            mandate: self.mandate_context.clone(),
        };
        context.validate()?;
        Ok(context)
    }
}

impl AuthenticationContext {
    /// Check the document against the rules for its source.
    ///
    /// # Errors
    /// Returns the first violated rule.
    pub fn validate(&self) -> Result<(), ContextSchemaError> {
        let check = |field: &'static str, subject: &Subject, allowed: &[&str]| {
            if subject.identifier.is_empty() {
                return Err(ContextSchemaError::MissingIdentifier(field));
            }
            if !allowed.is_empty() && !allowed.contains(&subject.identifier_type.as_str()) {
                return Err(ContextSchemaError::InvalidIdentifierType {
                    context_source: self.source,
                    field,
                    identifier_type: subject.identifier_type.clone(),
                });
            }
            Ok(())
        };

        let (legal, acting): (&[&str], &[&str]) = match self.source {
            ContextSource::Digid => (&["bsn"], &[]),
            ContextSource::Eherkenning => (&["kvkNummer", "rsin"], &["opaque"]),
            ContextSource::Eidas => (
                &["bsn", "nationalID", "opaque"],
                &["bsn", "nationalID", "opaque"],
            ),
            ContextSource::Yivi => (&["bsn", "kvkNummer", "opaque"], &[]),
            ContextSource::Custom => (&[], &[]),
        };

        check("authorizee.legalSubject", &self.authorizee.legal_subject, legal)?;
        if let Some(subject) = &self.authorizee.acting_subject {
            check("authorizee.actingSubject", subject, acting)?;
        }
        if let Some(representee) = &self.representee {
            check("representee", representee, &["bsn"])?;
        }

        if matches!(
            self.source,
            ContextSource::Digid | ContextSource::Eherkenning | ContextSource::Eidas
        ) && self.level_of_assurance.is_empty()
        {
            return Err(ContextSchemaError::MissingLevelOfAssurance(self.source));
        }

        if let Some(mandate) = &self.mandate {
            if mandate.services.is_empty() && mandate.role.is_none() {
                return Err(ContextSchemaError::EmptyMandate);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FormAuth, MandateService};
    use serde_json::json;
    use uuid::Uuid;

    fn info(form_auth: &FormAuth) -> AuthInfo {
        AuthInfo::from_form_auth(Uuid::nil(), form_auth)
    }

    #[test]
    fn digid_context() -> Result<(), ContextSchemaError> {
        let auth = FormAuth::new("digid_oidc", AuthAttribute::Bsn, "123456782")
            .with_loa("urn:oasis:names:tc:SAML:2.0:ac:classes:Smartcard");
        let context = info(&auth).to_authentication_context(ContextSource::Digid)?;

        assert_eq!(
            serde_json::to_value(&context).unwrap_or_default(),
            json!({
                "source": "digid",
                "levelOfAssurance": "urn:oasis:names:tc:SAML:2.0:ac:classes:Smartcard",
                "authorizee": {"legalSubject": {"identifierType": "bsn", "identifier": "123456782"}}
            })
        );
        Ok(())
    }

    #[test]
    fn digid_machtigen_context_has_representee_and_mandate() -> Result<(), ContextSchemaError> {
        let auth = FormAuth::new("digid_machtigen_oidc", AuthAttribute::Bsn, "999991607")
            .with_loa("urn:oasis:names:tc:SAML:2.0:ac:classes:MobileTwoFactorContract")
            .with_legal_subject("bsn", "123456782")
            .with_mandate(MandateContext {
                role: None,
                services: vec![MandateService {
                    id: "34085d78".to_string(),
                    uuid: None,
                }],
            });
        let context = info(&auth).to_authentication_context(ContextSource::Digid)?;

        assert_eq!(
            context.representee.map(|subject| subject.identifier),
            Some("999991607".to_string())
        );
        assert_eq!(context.authorizee.legal_subject.identifier, "123456782");
        assert!(context.mandate.is_some());
        Ok(())
    }

    #[test]
    fn eherkenning_context_keeps_branch_and_acting_subject() -> Result<(), ContextSchemaError> {
        let auth = FormAuth::new("eherkenning_oidc", AuthAttribute::Kvk, "12345678")
            .with_loa("urn:etoegang:core:assurance-class:loa3")
            .with_acting_subject("opaque", "4B75A0EA107B3D36")
            .with_service_restriction("123456789012");
        let context = info(&auth).to_authentication_context(ContextSource::Eherkenning)?;

        assert_eq!(context.authorizee.legal_subject.identifier_type, "kvkNummer");
        assert_eq!(
            context.authorizee.legal_subject.branch_number.as_deref(),
            Some("123456789012")
        );
        assert_eq!(
            context.authorizee.acting_subject.map(|subject| subject.identifier_type),
            Some("opaque".to_string())
        );
        Ok(())
    }

    #[test]
    fn missing_loa_fails_for_government_sources() {
        let auth = FormAuth::new("digid_oidc", AuthAttribute::Bsn, "123456782");
        assert_eq!(
            info(&auth).to_authentication_context(ContextSource::Digid),
            Err(ContextSchemaError::MissingLevelOfAssurance(ContextSource::Digid))
        );
    }

    #[test]
    fn wrong_identifier_type_is_rejected() {
        let auth = FormAuth::new("digid_oidc", AuthAttribute::Kvk, "12345678")
            .with_loa("urn:oasis:names:tc:SAML:2.0:ac:classes:Smartcard");
        let err = info(&auth).to_authentication_context(ContextSource::Digid);
        assert!(matches!(
            err,
            Err(ContextSchemaError::InvalidIdentifierType {
                context_source: ContextSource::Digid,
                ..
            })
        ));
        assert_eq!(
            err.map_err(|err| err.to_string()).err().as_deref(),
            Some(
                "identifier type 'kvkNummer' is not valid for authorizee.legalSubject \
                 of source Digid"
            )
        );
    }

    #[test]
    fn projection_does_not_mutate_record() -> Result<(), ContextSchemaError> {
        let auth = FormAuth::new("yivi_oidc", AuthAttribute::Pseudo, "pseudo-1");
        let record = info(&auth);
        let before = record.clone();
        let context = record.to_authentication_context(ContextSource::Yivi)?;

        assert_eq!(record, before);
        assert_eq!(context.authorizee.legal_subject.identifier_type, "opaque");
        Ok(())
    }
}
