//! Process-wide plugin registry.
//!
//! Built once at startup and shared read-only afterwards; only the enabled flag
//! can change, and it is atomic so lookups never take a lock.

use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use utoipa::ToSchema;

use crate::forms::Form;
use crate::plugins::{AuthenticationPlugin, Plugin, ProviderFamily, ReturnMethod};
use crate::types::AuthAttribute;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("plugin identifier '{0}' is already registered")]
    DuplicateIdentifier(String),
    #[error("invalid plugin identifier '{0}'")]
    InvalidIdentifier(String),
    #[error("unknown plugin '{0}'")]
    UnknownPlugin(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct PluginDescriptor {
    pub identifier: String,
    pub verbose_name: String,
    pub provides_auth_attributes: BTreeSet<AuthAttribute>,
    pub is_enabled: bool,
    pub is_demo_plugin: bool,
    pub return_method: ReturnMethod,
    pub family: ProviderFamily,
}

static IDENTIFIER_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

/// Identifier grammar: 1-50 of `[a-zA-Z0-9_-]`.
#[must_use]
pub fn valid_identifier(identifier: &str) -> bool {
    IDENTIFIER_PATTERN
        .get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]{1,50}$").ok())
        .as_ref()
        .is_some_and(|regex| regex.is_match(identifier))
}

struct Entry {
    plugin: Arc<Plugin>,
    enabled: AtomicBool,
}

#[derive(Default)]
pub struct PluginRegistry {
    entries: HashMap<String, Entry>,
    order: Vec<String>,
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin built by `factory` under `identifier`.
    ///
    /// # Errors
    /// `InvalidIdentifier` for identifiers outside the grammar and
    /// `DuplicateIdentifier` when the identifier is taken.
    pub fn register<F>(&mut self, identifier: &str, factory: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&str) -> Plugin,
    {
        if !valid_identifier(identifier) {
            return Err(RegistryError::InvalidIdentifier(identifier.to_string()));
        }
        if self.entries.contains_key(identifier) {
            return Err(RegistryError::DuplicateIdentifier(identifier.to_string()));
        }
        let plugin = factory(identifier);
        self.entries.insert(
            identifier.to_string(),
            Entry {
                plugin: Arc::new(plugin),
                enabled: AtomicBool::new(true),
            },
        );
        self.order.push(identifier.to_string());
        Ok(())
    }

    /// # Errors
    /// `UnknownPlugin` if nothing is registered under `identifier`.
    pub fn resolve(&self, identifier: &str) -> Result<Arc<Plugin>, RegistryError> {
        self.entry(identifier).map(|entry| Arc::clone(&entry.plugin))
    }

    /// # Errors
    /// `UnknownPlugin` if nothing is registered under `identifier`.
    pub fn set_enabled(&self, identifier: &str, enabled: bool) -> Result<(), RegistryError> {
        self.entry(identifier)?.enabled.store(enabled, Ordering::Relaxed);
        Ok(())
    }

    #[must_use]
    pub fn is_enabled(&self, identifier: &str) -> bool {
        self.entry(identifier)
            .is_ok_and(|entry| entry.enabled.load(Ordering::Relaxed))
    }

    /// # Errors
    /// `UnknownPlugin` if nothing is registered under `identifier`.
    pub fn descriptor(&self, identifier: &str) -> Result<PluginDescriptor, RegistryError> {
        self.entry(identifier).map(|entry| Self::describe(identifier, entry))
    }

    /// Enabled plugins; in form order for a form, registration order otherwise.
    ///
    /// Backends on the form that are not registered are skipped.
    #[must_use]
    pub fn list_enabled(&self, form: Option<&Form>) -> Vec<PluginDescriptor> {
        let identifiers: Vec<&str> = match form {
            Some(form) => form.backend_ids().collect(),
            None => self.order.iter().map(String::as_str).collect(),
        };
        identifiers
            .into_iter()
            .filter_map(|identifier| {
                self.entries
                    .get(identifier)
                    .filter(|entry| entry.enabled.load(Ordering::Relaxed))
                    .map(|entry| Self::describe(identifier, entry))
            })
            .collect()
    }

    /// `(identifier, label)` pairs for form-builder dropdowns.
    #[must_use]
    pub fn choices(&self) -> Vec<(String, String)> {
        self.order
            .iter()
            .filter_map(|identifier| {
                self.entries.get(identifier).map(|entry| {
                    (
                        identifier.clone(),
                        entry.plugin.metadata().verbose_name.clone(),
                    )
                })
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn entry(&self, identifier: &str) -> Result<&Entry, RegistryError> {
        self.entries
            .get(identifier)
            .ok_or_else(|| RegistryError::UnknownPlugin(identifier.to_string()))
    }

    fn describe(identifier: &str, entry: &Entry) -> PluginDescriptor {
        let metadata = entry.plugin.metadata();
        PluginDescriptor {
            identifier: identifier.to_string(),
            verbose_name: metadata.verbose_name.clone(),
            provides_auth_attributes: metadata.provides_auth_attributes.clone(),
            is_enabled: entry.enabled.load(Ordering::Relaxed),
            is_demo_plugin: metadata.is_demo_plugin,
            return_method: metadata.return_method,
            family: metadata.family,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::PluginOptions;
    use crate::plugins::{DemoKind, DemoPlugin};

    fn demo(kind: DemoKind) -> impl FnOnce(&str) -> Plugin {
        move |identifier| Plugin::Demo(DemoPlugin::new(identifier, kind))
    }

    fn registry() -> Result<PluginRegistry, RegistryError> {
        let mut registry = PluginRegistry::new();
        registry.register("demo", demo(DemoKind::Bsn))?;
        registry.register("demo-kvk", demo(DemoKind::Kvk))?;
        registry.register("demo-outage", demo(DemoKind::Outage))?;
        Ok(registry)
    }

    #[test]
    fn duplicate_identifier_is_rejected() -> Result<(), RegistryError> {
        let mut registry = registry()?;
        assert_eq!(
            registry.register("demo", demo(DemoKind::Kvk)),
            Err(RegistryError::DuplicateIdentifier("demo".to_string()))
        );
        assert_eq!(registry.len(), 3);
        Ok(())
    }

    #[test]
    fn identifier_grammar_is_enforced() {
        let mut registry = PluginRegistry::new();
        for bad in ["", "has space", "dot.ted", &"x".repeat(51)] {
            assert_eq!(
                registry.register(bad, demo(DemoKind::Bsn)),
                Err(RegistryError::InvalidIdentifier(bad.to_string()))
            );
        }
        assert!(registry.register(&"x".repeat(50), demo(DemoKind::Bsn)).is_ok());
    }

    #[test]
    fn resolve_unknown_plugin_fails() -> Result<(), RegistryError> {
        let registry = registry()?;
        assert!(registry.resolve("demo").is_ok());
        assert!(matches!(
            registry.resolve("digid"),
            Err(RegistryError::UnknownPlugin(id)) if id == "digid"
        ));
        Ok(())
    }

    #[test]
    fn list_enabled_follows_registration_order() -> Result<(), RegistryError> {
        let registry = registry()?;
        registry.set_enabled("demo-kvk", false)?;

        let ids: Vec<String> = registry
            .list_enabled(None)
            .into_iter()
            .map(|descriptor| descriptor.identifier)
            .collect();
        assert_eq!(ids, vec!["demo", "demo-outage"]);
        assert!(!registry.is_enabled("demo-kvk"));
        Ok(())
    }

    #[test]
    fn list_enabled_follows_form_order() -> Result<(), RegistryError> {
        let registry = registry()?;
        let form = Form::new("melding", "Melding")
            .with_backend("demo-outage", PluginOptions::default())
            .with_backend("not-registered", PluginOptions::default())
            .with_backend("demo", PluginOptions::default());

        let ids: Vec<String> = registry
            .list_enabled(Some(&form))
            .into_iter()
            .map(|descriptor| descriptor.identifier)
            .collect();
        assert_eq!(ids, vec!["demo-outage", "demo"]);
        Ok(())
    }

    #[test]
    fn choices_use_verbose_names() -> Result<(), RegistryError> {
        let registry = registry()?;
        let choices = registry.choices();
        assert_eq!(choices.len(), 3);
        assert_eq!(choices[0], ("demo".to_string(), "Demo BSN (test)".to_string()));
        Ok(())
    }

    #[test]
    fn descriptor_reports_demo_and_return_method() -> Result<(), RegistryError> {
        let descriptor = registry()?.descriptor("demo-kvk")?;
        assert!(descriptor.is_demo_plugin);
        assert_eq!(descriptor.return_method, ReturnMethod::Post);
        assert_eq!(
            descriptor.provides_auth_attributes,
            BTreeSet::from([AuthAttribute::Kvk])
        );
        Ok(())
    }
}
