//! Provider-agnostic claim processing.
//!
//! Plugins describe their provider's claim shape as [`ProcessingInstructions`];
//! [`process`] validates an incoming claim document against them and produces
//! the canonical claim map. Checks run in a fixed order so the first failure is
//! deterministic: always-required, strict-required, optional, then LoA.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use super::loa::LoaValueMapping;
use super::path::{assign, extract, ClaimPath};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimError {
    #[error("required claim '{0}' is missing")]
    RequiredClaimMissing(ClaimPath),
    #[error("no level of assurance claim and no usable default")]
    NoLoaClaim,
}

/// Whether strict-only claims are enforced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    Strict,
    #[default]
    Lax,
}

impl ValidationMode {
    #[must_use]
    pub const fn from_strict(strict: bool) -> Self {
        if strict {
            Self::Strict
        } else {
            Self::Lax
        }
    }

    #[must_use]
    pub const fn is_strict(self) -> bool {
        matches!(self, Self::Strict)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    Always,
    StrictOnly,
    Optional,
}

/// Where to read a claim and where to write it in the canonical output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimPathSpec {
    pub path: ClaimPath,
    pub output_path: ClaimPath,
}

impl ClaimPathSpec {
    #[must_use]
    pub fn new(path: ClaimPath, output_path: ClaimPath) -> Self {
        Self { path, output_path }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoaInstructions {
    pub path: Option<ClaimPath>,
    pub output_path: ClaimPath,
    pub default: Option<String>,
    pub value_mapping: LoaValueMapping,
}

impl LoaInstructions {
    fn configured_path(&self) -> Option<&ClaimPath> {
        self.path.as_ref().filter(|path| !path.is_empty())
    }

    fn usable_default(&self) -> Option<&str> {
        self.default.as_deref().filter(|default| !default.is_empty())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingInstructions {
    pub always_required: Vec<ClaimPathSpec>,
    pub strict_required: Vec<ClaimPathSpec>,
    pub optional: Vec<ClaimPathSpec>,
    pub loa: Option<LoaInstructions>,
}

impl ProcessingInstructions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_claim(mut self, requirement: Requirement, spec: ClaimPathSpec) -> Self {
        self.push(requirement, spec);
        self
    }

    #[must_use]
    pub fn with_loa(mut self, loa: LoaInstructions) -> Self {
        self.loa = Some(loa);
        self
    }

    pub fn push(&mut self, requirement: Requirement, spec: ClaimPathSpec) {
        match requirement {
            Requirement::Always => self.always_required.push(spec),
            Requirement::StrictOnly => self.strict_required.push(spec),
            Requirement::Optional => self.optional.push(spec),
        }
    }
}

/// Result of processing: a map keyed by output paths.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalClaims(Map<String, Value>);

impl CanonicalClaims {
    #[must_use]
    pub fn get(&self, path: &ClaimPath) -> Option<&Value> {
        let (first, rest) = path.segments().split_first()?;
        let root = self.0.get(first)?;
        if rest.is_empty() {
            return Some(root);
        }
        extract(root, &ClaimPath::new(rest.iter().cloned()))
    }

    /// String form of a scalar claim; numbers are rendered as text.
    #[must_use]
    pub fn get_string(&self, path: &ClaimPath) -> Option<String> {
        match self.get(path)? {
            Value::String(text) => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        }
    }

    pub fn insert(&mut self, path: &ClaimPath, value: Value) {
        assign(&mut self.0, path, value);
    }

    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|value| !value.is_null())
}

/// Validate `claims` against `instructions` and build the canonical claims.
///
/// # Errors
/// `RequiredClaimMissing` for a missing always-required claim (any mode) or a
/// missing strict-required claim in strict mode; `NoLoaClaim` in strict mode when
/// LoA is configured but neither the claim nor a non-empty default is available.
pub fn process(
    claims: &Value,
    instructions: &ProcessingInstructions,
    mode: ValidationMode,
) -> Result<CanonicalClaims, ClaimError> {
    let mut found: Vec<(&ClaimPath, Value)> = Vec::new();

    for spec in &instructions.always_required {
        let value = present(extract(claims, &spec.path))
            .ok_or_else(|| ClaimError::RequiredClaimMissing(spec.path.clone()))?;
        found.push((&spec.output_path, value.clone()));
    }

    for spec in &instructions.strict_required {
        match present(extract(claims, &spec.path)) {
            Some(value) => found.push((&spec.output_path, value.clone())),
            None if mode.is_strict() => {
                return Err(ClaimError::RequiredClaimMissing(spec.path.clone()));
            }
            None => debug!(claim = %spec.path, "strict-only claim absent in lax mode"),
        }
    }

    for spec in &instructions.optional {
        if let Some(value) = present(extract(claims, &spec.path)) {
            found.push((&spec.output_path, value.clone()));
        }
    }

    let mut output = CanonicalClaims::default();
    for (path, value) in found {
        output.insert(path, value);
    }

    if let Some(loa) = &instructions.loa {
        match resolve_loa(claims, loa) {
            Ok(Some(value)) => output.insert(&loa.output_path, value),
            Ok(None) => {}
            Err(err) if mode.is_strict() => return Err(err),
            Err(_) => debug!("no level of assurance available in lax mode"),
        }
    }

    Ok(output)
}

/// Resolve the LoA claim. `Ok(None)` means LoA is not configured at all.
fn resolve_loa(claims: &Value, loa: &LoaInstructions) -> Result<Option<Value>, ClaimError> {
    let path = loa.configured_path();
    let default = loa.usable_default();
    if path.is_none() && default.is_none() {
        return Ok(None);
    }

    let raw = path
        .and_then(|path| present(extract(claims, path)))
        .filter(|value| value.as_str() != Some(""))
        .cloned()
        .or_else(|| default.map(|default| Value::String(default.to_string())))
        .ok_or(ClaimError::NoLoaClaim)?;

    Ok(Some(loa.value_mapping.apply(&raw)))
}
