//! Broker configuration file.
//!
//! A JSON document listing the plugin instances to register and the forms
//! that use them. Secrets stay in the file only until the endpoints are built;
//! after that they live in [`SecretString`].

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::{collections::HashMap, path::Path, sync::Arc};
use url::Url;

use crate::claims::{ClaimPath, ValidationMode};
use crate::forms::{Form, FormStore};
use crate::plugins::{
    AttributeGroup, DemoKind, DemoPlugin, OidcPlugin, OidcSchema, Plugin, SamlPlugin, SamlService,
    YiviPlugin,
};
use crate::plugins::schemas::LoaSettings;
use crate::protocol::{OidcEndpoints, ProtocolClient, SamlEndpoints};
use crate::registry::{PluginRegistry, RegistryError};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
    #[serde(default)]
    pub forms: Vec<Form>,
    /// Extra origins `next` may point to, besides the public base URL.
    #[serde(default)]
    pub allowed_redirect_origins: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PluginConfig {
    pub identifier: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub verbose_name: Option<String>,
    #[serde(flatten)]
    pub kind: PluginKind,
}

const fn default_enabled() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PluginKind {
    Oidc {
        schema: OidcSchema,
        oidc: OidcSettings,
        #[serde(default)]
        claim_paths: HashMap<String, ClaimPath>,
        #[serde(default)]
        loa: Option<LoaSettings>,
        #[serde(default)]
        strict: bool,
    },
    Saml {
        service: SamlService,
        saml: SamlSettings,
        #[serde(default)]
        claim_paths: HashMap<String, ClaimPath>,
        #[serde(default)]
        loa: Option<LoaSettings>,
        #[serde(default)]
        strict: bool,
    },
    Yivi {
        oidc: OidcSettings,
        #[serde(default)]
        attribute_groups: Vec<AttributeGroup>,
        #[serde(default)]
        bsn_loa: LoaSettings,
        #[serde(default)]
        kvk_loa: LoaSettings,
    },
    DemoBsn,
    DemoKvk,
    DemoOutage,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OidcSettings {
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub userinfo_endpoint: Url,
    #[serde(default)]
    pub end_session_endpoint: Option<Url>,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

fn default_scopes() -> Vec<String> {
    vec!["openid".to_string()]
}

impl OidcSettings {
    fn endpoints(&self) -> OidcEndpoints {
        OidcEndpoints {
            authorization_endpoint: self.authorization_endpoint.clone(),
            token_endpoint: self.token_endpoint.clone(),
            userinfo_endpoint: self.userinfo_endpoint.clone(),
            end_session_endpoint: self.end_session_endpoint.clone(),
            client_id: self.client_id.clone(),
            client_secret: SecretString::from(self.client_secret.clone()),
            scopes: self.scopes.clone(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SamlSettings {
    pub sso_url: Url,
    pub artifact_resolution_url: Url,
    pub entity_id: String,
}

impl SamlSettings {
    fn endpoints(&self) -> SamlEndpoints {
        SamlEndpoints {
            sso_url: self.sso_url.clone(),
            artifact_resolution_url: self.artifact_resolution_url.clone(),
            entity_id: self.entity_id.clone(),
        }
    }
}

impl PluginConfig {
    fn build(&self, identifier: &str, client: Arc<dyn ProtocolClient>) -> Plugin {
        let plugin = match &self.kind {
            PluginKind::Oidc {
                schema,
                oidc,
                claim_paths,
                loa,
                strict,
            } => Plugin::Oidc(
                OidcPlugin::new(identifier, *schema, oidc.endpoints(), client)
                    .with_claim_paths(claim_paths, loa.as_ref())
                    .with_mode(ValidationMode::from_strict(*strict)),
            ),
            PluginKind::Saml {
                service,
                saml,
                claim_paths,
                loa,
                strict,
            } => Plugin::Saml(
                SamlPlugin::new(identifier, *service, saml.endpoints(), client)
                    .with_claim_paths(claim_paths, loa.as_ref())
                    .with_mode(ValidationMode::from_strict(*strict)),
            ),
            PluginKind::Yivi {
                oidc,
                attribute_groups,
                bsn_loa,
                kvk_loa,
            } => Plugin::Yivi(
                YiviPlugin::new(identifier, oidc.endpoints(), client)
                    .with_attribute_groups(attribute_groups.clone())
                    .with_bsn_loa(bsn_loa.clone())
                    .with_kvk_loa(kvk_loa.clone()),
            ),
            PluginKind::DemoBsn => Plugin::Demo(DemoPlugin::new(identifier, DemoKind::Bsn)),
            PluginKind::DemoKvk => Plugin::Demo(DemoPlugin::new(identifier, DemoKind::Kvk)),
            PluginKind::DemoOutage => Plugin::Demo(DemoPlugin::new(identifier, DemoKind::Outage)),
        };
        match &self.verbose_name {
            Some(name) => plugin.with_verbose_name(name),
            None => plugin,
        }
    }
}

impl BrokerConfig {
    /// Read the configuration from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Register every configured plugin; disabled ones stay registered but off.
    ///
    /// # Errors
    /// Returns an error for invalid or duplicate identifiers.
    pub fn build_registry(
        &self,
        client: &Arc<dyn ProtocolClient>,
    ) -> Result<PluginRegistry, RegistryError> {
        let mut registry = PluginRegistry::new();
        for plugin in &self.plugins {
            registry.register(&plugin.identifier, |identifier| {
                plugin.build(identifier, Arc::clone(client))
            })?;
            if !plugin.enabled {
                registry.set_enabled(&plugin.identifier, false)?;
            }
        }
        Ok(registry)
    }

    #[must_use]
    pub fn form_store(&self) -> FormStore {
        FormStore::new(self.forms.clone())
    }
}
