//! Identity types shared by plugins, the session and the auth-info store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fmt, str::FromStr};
use thiserror::Error;
use utoipa::ToSchema;

/// The kind of identifier a plugin asserts.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum AuthAttribute {
    Bsn,
    Kvk,
    Pseudo,
    EmployeeId,
    NationalId,
}

impl AuthAttribute {
    pub const ALL: [Self; 5] = [
        Self::Bsn,
        Self::Kvk,
        Self::Pseudo,
        Self::EmployeeId,
        Self::NationalId,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bsn => "bsn",
            Self::Kvk => "kvk",
            Self::Pseudo => "pseudo",
            Self::EmployeeId => "employee_id",
            Self::NationalId => "national_id",
        }
    }
}

impl fmt::Display for AuthAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unexpected auth attribute '{0}'")]
pub struct UnknownAttribute(pub String);

impl FromStr for AuthAttribute {
    type Err = UnknownAttribute;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|attribute| attribute.as_str() == value)
            .ok_or_else(|| UnknownAttribute(value.to_string()))
    }
}

/// Source family reported in the authentication context document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ContextSource {
    Digid,
    Eherkenning,
    Eidas,
    Yivi,
    Custom,
}

/// A service the acting subject is mandated for.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MandateService {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

/// Mandate details for on-behalf-of authentication.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MandateContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub services: Vec<MandateService>,
}

/// Session-scoped result of a successful authentication.
///
/// For on-behalf-of flows `value` holds the represented party while the
/// `legal_subject_*`/`acting_subject_*` fields describe who actually logged in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormAuth {
    pub plugin: String,
    pub attribute: AuthAttribute,
    pub value: String,
    #[serde(default)]
    pub loa: String,
    #[serde(default)]
    pub acting_subject_identifier_type: String,
    #[serde(default)]
    pub acting_subject_identifier_value: String,
    #[serde(default)]
    pub legal_subject_identifier_type: String,
    #[serde(default)]
    pub legal_subject_identifier_value: String,
    #[serde(default)]
    pub legal_subject_service_restriction: String,
    #[serde(default)]
    pub mandate_context: Option<MandateContext>,
    #[serde(default)]
    pub additional_claims: Option<Map<String, Value>>,
}

impl FormAuth {
    #[must_use]
    pub fn new(
        plugin: impl Into<String>,
        attribute: AuthAttribute,
        value: impl Into<String>,
    ) -> Self {
        Self {
            plugin: plugin.into(),
            attribute,
            value: value.into(),
            loa: String::new(),
            acting_subject_identifier_type: String::new(),
            acting_subject_identifier_value: String::new(),
            legal_subject_identifier_type: String::new(),
            legal_subject_identifier_value: String::new(),
            legal_subject_service_restriction: String::new(),
            mandate_context: None,
            additional_claims: None,
        }
    }

    #[must_use]
    pub fn with_loa(mut self, loa: impl Into<String>) -> Self {
        self.loa = loa.into();
        self
    }

    #[must_use]
    pub fn with_acting_subject(
        mut self,
        kind: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.acting_subject_identifier_type = kind.into();
        self.acting_subject_identifier_value = value.into();
        self
    }

    #[must_use]
    pub fn with_legal_subject(mut self, kind: impl Into<String>, value: impl Into<String>) -> Self {
        self.legal_subject_identifier_type = kind.into();
        self.legal_subject_identifier_value = value.into();
        self
    }

    #[must_use]
    pub fn with_service_restriction(mut self, restriction: impl Into<String>) -> Self {
        self.legal_subject_service_restriction = restriction.into();
        self
    }

    #[must_use]
    pub fn with_mandate(mut self, mandate: MandateContext) -> Self {
        self.mandate_context = Some(mandate);
        self
    }

    #[must_use]
    pub fn with_additional_claims(mut self, claims: Map<String, Value>) -> Self {
        if !claims.is_empty() {
            self.additional_claims = Some(claims);
        }
        self
    }

    /// Identifier with everything but the last four characters masked.
    #[must_use]
    pub fn masked_value(&self) -> String {
        let chars: Vec<char> = self.value.chars().collect();
        let visible = chars.len().min(4);
        let hidden = chars.len() - visible;
        let mut masked = "*".repeat(hidden);
        masked.extend(&chars[hidden..]);
        masked
    }
}

/// Identity a co-signer attaches to an existing submission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CoSignData {
    pub plugin: String,
    pub identifier: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub fields: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_attribute_parses_known_values() {
        for attribute in AuthAttribute::ALL {
            assert_eq!(attribute.as_str().parse::<AuthAttribute>(), Ok(attribute));
        }
        assert_eq!(
            "passport".parse::<AuthAttribute>(),
            Err(UnknownAttribute("passport".to_string()))
        );
    }

    #[test]
    fn auth_attribute_serializes_snake_case() -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(AuthAttribute::EmployeeId)?;
        assert_eq!(value, serde_json::json!("employee_id"));
        Ok(())
    }

    #[test]
    fn masked_value_keeps_last_four() {
        let auth = FormAuth::new("digid", AuthAttribute::Bsn, "123456782");
        assert_eq!(auth.masked_value(), "*****6782");

        let short = FormAuth::new("demo", AuthAttribute::Pseudo, "abc");
        assert_eq!(short.masked_value(), "abc");
    }

    #[test]
    fn empty_additional_claims_are_dropped() {
        let auth =
            FormAuth::new("yivi", AuthAttribute::Pseudo, "p").with_additional_claims(Map::new());
        assert!(auth.additional_claims.is_none());
    }
}
