//! Form definitions as far as authentication is concerned.
//!
//! Forms are owned by the form engine; the broker only needs the slug and the
//! ordered list of authentication backends with their per-form options.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::types::AuthAttribute;

/// Per-form options for one authentication backend.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginOptions {
    /// Minimum level of assurance; empty means no requirement.
    pub loa: Option<String>,
    /// Attributes the end user may disclose (Yivi).
    pub authentication_options: Vec<AuthAttribute>,
    /// Additional attribute groups requested on top of the identifier (Yivi).
    pub additional_attributes_groups: Vec<String>,
    /// Minimum LoA per disclosed attribute (Yivi).
    pub bsn_loa: Option<String>,
    pub kvk_loa: Option<String>,
}

impl PluginOptions {
    #[must_use]
    pub fn min_loa(&self) -> Option<&str> {
        self.loa.as_deref().filter(|loa| !loa.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormAuthBackend {
    pub backend: String,
    #[serde(default)]
    pub options: PluginOptions,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Form {
    #[serde(default = "Uuid::new_v4")]
    pub uuid: Uuid,
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub auth_backends: Vec<FormAuthBackend>,
}

impl Form {
    #[must_use]
    pub fn new(slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            slug: slug.into(),
            name: name.into(),
            auth_backends: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_backend(mut self, backend: impl Into<String>, options: PluginOptions) -> Self {
        self.auth_backends.push(FormAuthBackend {
            backend: backend.into(),
            options,
        });
        self
    }

    /// Backend identifiers in form-declared order.
    pub fn backend_ids(&self) -> impl Iterator<Item = &str> {
        self.auth_backends.iter().map(|backend| backend.backend.as_str())
    }

    #[must_use]
    pub fn allows_plugin(&self, plugin_id: &str) -> bool {
        self.backend_ids().any(|id| id == plugin_id)
    }

    #[must_use]
    pub fn plugin_options(&self, plugin_id: &str) -> Option<&PluginOptions> {
        self.auth_backends
            .iter()
            .find(|backend| backend.backend == plugin_id)
            .map(|backend| &backend.options)
    }
}

/// Read-only lookup of forms by slug, loaded once at startup.
#[derive(Clone, Debug, Default)]
pub struct FormStore {
    forms: HashMap<String, Form>,
}

impl FormStore {
    #[must_use]
    pub fn new(forms: Vec<Form>) -> Self {
        Self {
            forms: forms
                .into_iter()
                .map(|form| (form.slug.clone(), form))
                .collect(),
        }
    }

    #[must_use]
    pub fn get(&self, slug: &str) -> Option<&Form> {
        self.forms.get(slug)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.forms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_backends_keep_declared_order() {
        let form = Form::new("aanvraag", "Aanvraag")
            .with_backend("eherkenning_oidc", PluginOptions::default())
            .with_backend("digid_oidc", PluginOptions::default());

        assert_eq!(
            form.backend_ids().collect::<Vec<_>>(),
            vec!["eherkenning_oidc", "digid_oidc"]
        );
        assert!(form.allows_plugin("digid_oidc"));
        assert!(!form.allows_plugin("yivi_oidc"));
    }

    #[test]
    fn empty_loa_is_no_requirement() {
        let options = PluginOptions {
            loa: Some(String::new()),
            ..PluginOptions::default()
        };
        assert!(options.min_loa().is_none());
    }

    #[test]
    fn forms_deserialize_with_defaults() -> Result<(), serde_json::Error> {
        let form: Form = serde_json::from_value(serde_json::json!({
            "slug": "melding",
            "name": "Melding",
            "auth_backends": [
                {"backend": "digid_oidc", "options": {"loa": "urn:oasis:names:tc:SAML:2.0:ac:classes:Smartcard"}},
                {"backend": "demo"}
            ]
        }))?;
        let store = FormStore::new(vec![form]);

        let form = store.get("melding");
        assert_eq!(
            form.and_then(|form| form.plugin_options("digid_oidc"))
                .and_then(PluginOptions::min_loa),
            Some("urn:oasis:names:tc:SAML:2.0:ac:classes:Smartcard")
        );
        assert_eq!(
            form.and_then(|form| form.plugin_options("demo")),
            Some(&PluginOptions::default())
        );
        Ok(())
    }
}
