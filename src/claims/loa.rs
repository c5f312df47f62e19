//! Level-of-assurance normalization and ordering.
//!
//! Normalization maps raw provider tokens onto canonical values through a
//! configured table. Ordering ranks canonical values per provider family; the
//! tables are independent and a value is only ever compared against the table of
//! the plugin that produced it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// DigiD authentication context classes, weakest first.
pub const DIGID_LOA_ORDER: &[&str] = &[
    "urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport",
    "urn:oasis:names:tc:SAML:2.0:ac:classes:MobileTwoFactorContract",
    "urn:oasis:names:tc:SAML:2.0:ac:classes:Smartcard",
    "urn:oasis:names:tc:SAML:2.0:ac:classes:SmartcardPKI",
];

/// eHerkenning / eToegang assurance classes, weakest first.
pub const EHERKENNING_LOA_ORDER: &[&str] = &[
    "urn:etoegang:core:assurance-class:loa1",
    "urn:etoegang:core:assurance-class:loa2",
    "urn:etoegang:core:assurance-class:loa2plus",
    "urn:etoegang:core:assurance-class:loa3",
    "urn:etoegang:core:assurance-class:loa4",
];

/// eIDAS levels as issued by OIDC brokers, weakest first.
pub const EIDAS_LOA_ORDER: &[&str] = &[
    "http://eidas.europa.eu/LoA/low",
    "http://eidas.europa.eu/LoA/substantial",
    "http://eidas.europa.eu/LoA/high",
];

/// Fixed rank table for one provider family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoaOrdering {
    name: &'static str,
    levels: &'static [&'static str],
}

impl LoaOrdering {
    pub const DIGID: Self = Self::new("digid", DIGID_LOA_ORDER);
    pub const EHERKENNING: Self = Self::new("eherkenning", EHERKENNING_LOA_ORDER);
    pub const EIDAS: Self = Self::new("eidas", EIDAS_LOA_ORDER);

    #[must_use]
    pub const fn new(name: &'static str, levels: &'static [&'static str]) -> Self {
        Self { name, levels }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn levels(&self) -> &'static [&'static str] {
        self.levels
    }

    /// Index of `loa` in the table, `-1` for unknown tokens.
    #[must_use]
    pub fn rank(&self, loa: &str) -> i32 {
        self.levels
            .iter()
            .position(|level| *level == loa)
            .and_then(|index| i32::try_from(index).ok())
            .unwrap_or(-1)
    }

    #[must_use]
    pub fn meets_requirement(&self, achieved: &str, required: &str) -> bool {
        self.rank(achieved) >= self.rank(required)
    }

    #[must_use]
    pub fn is_known(&self, loa: &str) -> bool {
        self.rank(loa) >= 0
    }
}

/// One row of a value-mapping table. `from` may be a string or a number.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoaMappingEntry {
    pub from: Value,
    pub to: String,
}

/// Raw-token to canonical-LoA table; unmapped values pass through unchanged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoaValueMapping(Vec<LoaMappingEntry>);

impl LoaValueMapping {
    #[must_use]
    pub fn new(entries: Vec<LoaMappingEntry>) -> Self {
        Self(entries)
    }

    /// Build from `(from, to)` string pairs.
    #[must_use]
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(from, to)| LoaMappingEntry {
                    from: Value::String(from.to_string()),
                    to: to.to_string(),
                })
                .collect(),
        )
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Apply the table to a raw value.
    ///
    /// Numbers and strings match each other by their textual form, so a numeric
    /// claim `20` hits an entry keyed `"20"` and vice versa.
    #[must_use]
    pub fn apply(&self, raw: &Value) -> Value {
        let Some(needle) = mapping_key(raw) else {
            return raw.clone();
        };
        self.0
            .iter()
            .find(|entry| mapping_key(&entry.from).as_deref() == Some(needle.as_str()))
            .map_or_else(|| raw.clone(), |entry| Value::String(entry.to.clone()))
    }
}

fn mapping_key(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Render a resolved LoA value for storage in a `FormAuth`.
#[must_use]
pub fn loa_to_string(value: &Value) -> String {
    mapping_key(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rank_follows_table_order() {
        let ordering = LoaOrdering::EHERKENNING;
        for (index, level) in EHERKENNING_LOA_ORDER.iter().enumerate() {
            assert_eq!(ordering.rank(level), i32::try_from(index).unwrap_or(-2));
        }
        assert_eq!(ordering.rank("urn:etoegang:core:assurance-class:loa9"), -1);
    }

    #[test]
    fn meets_requirement_matches_rank_comparison_for_all_pairs() {
        for ordering in [LoaOrdering::DIGID, LoaOrdering::EHERKENNING, LoaOrdering::EIDAS] {
            for achieved in ordering.levels() {
                for required in ordering.levels() {
                    assert_eq!(
                        ordering.meets_requirement(achieved, required),
                        ordering.rank(achieved) >= ordering.rank(required),
                        "{achieved} vs {required}"
                    );
                }
            }
        }
    }

    #[test]
    fn unknown_never_meets_known_requirement() {
        for ordering in [LoaOrdering::DIGID, LoaOrdering::EHERKENNING, LoaOrdering::EIDAS] {
            for required in ordering.levels() {
                assert!(!ordering.meets_requirement("bogus", required));
                assert!(!ordering.meets_requirement("", required));
            }
        }
    }

    #[test]
    fn tables_are_not_interchangeable() {
        let eidas_high = "http://eidas.europa.eu/LoA/high";
        let digid_low = DIGID_LOA_ORDER[0];
        assert!(!LoaOrdering::DIGID.meets_requirement(eidas_high, digid_low));
        assert!(!LoaOrdering::EIDAS.is_known(digid_low));
    }

    #[test]
    fn mapping_passes_unmapped_through() {
        let mapping = LoaValueMapping::from_pairs([("30", "high")]);
        assert_eq!(mapping.apply(&json!("30")), json!("high"));
        assert_eq!(mapping.apply(&json!("20")), json!("20"));
    }

    #[test]
    fn mapping_accepts_numeric_sources_and_keys() {
        let mapping = LoaValueMapping::new(vec![
            LoaMappingEntry {
                from: json!(25),
                to: "urn:oasis:names:tc:SAML:2.0:ac:classes:MobileTwoFactorContract".to_string(),
            },
            LoaMappingEntry {
                from: json!("10"),
                to: "urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport"
                    .to_string(),
            },
        ]);

        assert_eq!(
            mapping.apply(&json!(25)),
            json!("urn:oasis:names:tc:SAML:2.0:ac:classes:MobileTwoFactorContract")
        );
        assert_eq!(
            mapping.apply(&json!("25")),
            json!("urn:oasis:names:tc:SAML:2.0:ac:classes:MobileTwoFactorContract")
        );
        assert_eq!(
            mapping.apply(&json!(10)),
            json!("urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport")
        );
        assert_eq!(mapping.apply(&json!(99)), json!(99));
    }

    #[test]
    fn loa_to_string_renders_numbers() {
        assert_eq!(loa_to_string(&json!(20)), "20");
        assert_eq!(loa_to_string(&json!("middle")), "middle");
        assert_eq!(loa_to_string(&json!(null)), "");
    }
}
