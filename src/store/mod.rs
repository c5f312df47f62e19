//! Submission-scoped persistence of authentication results.
//!
//! One [`AuthInfo`] per submission (upsert), optional co-sign data, hashing of
//! identifying attributes once the submission is processed, and the projection
//! to the external authentication context document.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::registry::PluginDescriptor;
use crate::types::{AuthAttribute, CoSignData, FormAuth, MandateContext};

pub mod context;
pub mod hashing;
pub mod postgres;

pub use context::{AuthenticationContext, ContextSchemaError};
pub use hashing::{HashingQueue, IdentifierHasher};
pub use postgres::PgAuthInfoStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("plugin '{plugin}' does not provide auth attribute '{attribute}'")]
    UnexpectedAttribute { plugin: String, attribute: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persisted identity record for one submission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthInfo {
    pub submission: Uuid,
    pub plugin: String,
    pub attribute: AuthAttribute,
    pub value: String,
    pub loa: String,
    pub acting_subject_identifier_type: String,
    pub acting_subject_identifier_value: String,
    pub legal_subject_identifier_type: String,
    pub legal_subject_identifier_value: String,
    pub legal_subject_service_restriction: String,
    pub mandate_context: Option<MandateContext>,
    pub additional_claims: Option<Map<String, Value>>,
    pub attribute_hashed: bool,
}

impl AuthInfo {
    #[must_use]
    pub fn from_form_auth(submission: Uuid, form_auth: &FormAuth) -> Self {
        Self {
            submission,
            plugin: form_auth.plugin.clone(),
            attribute: form_auth.attribute,
            value: form_auth.value.clone(),
            loa: form_auth.loa.clone(),
            acting_subject_identifier_type: form_auth.acting_subject_identifier_type.clone(),
            acting_subject_identifier_value: form_auth.acting_subject_identifier_value.clone(),
            legal_subject_identifier_type: form_auth.legal_subject_identifier_type.clone(),
            legal_subject_identifier_value: form_auth.legal_subject_identifier_value.clone(),
            legal_subject_service_restriction: form_auth.legal_subject_service_restriction.clone(),
            mandate_context: form_auth.mandate_context.clone(),
            additional_claims: form_auth.additional_claims.clone(),
            attribute_hashed: false,
        }
    }
}

#[async_trait]
pub trait AuthInfoStore: Send + Sync {
    /// Insert or replace the record for `info.submission`.
    async fn upsert(&self, info: &AuthInfo) -> Result<(), StoreError>;

    async fn get(&self, submission: Uuid) -> Result<Option<AuthInfo>, StoreError>;

    async fn upsert_co_sign(&self, submission: Uuid, data: &CoSignData) -> Result<(), StoreError>;

    async fn co_sign(&self, submission: Uuid) -> Result<Option<CoSignData>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    fn kind(&self) -> &'static str;
}

/// Attach `form_auth` to `submission`.
///
/// # Errors
/// `UnexpectedAttribute` when the attribute is not one the plugin provides;
/// storage errors are passed through.
#[instrument(skip(store, descriptor, form_auth), fields(plugin = %descriptor.identifier))]
pub async fn store_auth_details(
    store: &dyn AuthInfoStore,
    descriptor: &PluginDescriptor,
    submission: Uuid,
    form_auth: &FormAuth,
) -> Result<AuthInfo, StoreError> {
    if form_auth.plugin != descriptor.identifier
        || !descriptor
            .provides_auth_attributes
            .contains(&form_auth.attribute)
    {
        return Err(StoreError::UnexpectedAttribute {
            plugin: descriptor.identifier.clone(),
            attribute: form_auth.attribute.to_string(),
        });
    }
    let info = AuthInfo::from_form_auth(submission, form_auth);
    store.upsert(&info).await?;
    debug!(%submission, "auth details stored");
    Ok(info)
}

/// Hash the identifying attributes of the record for `submission` in place.
///
/// Returns `None` when the submission has no auth info. Already hashed records
/// are left alone.
///
/// # Errors
/// Storage errors are passed through.
#[instrument(skip(store, hasher))]
pub async fn hash_identifying_attributes(
    store: &dyn AuthInfoStore,
    hasher: &IdentifierHasher,
    submission: Uuid,
) -> Result<Option<AuthInfo>, StoreError> {
    let Some(mut info) = store.get(submission).await? else {
        return Ok(None);
    };
    if info.attribute_hashed {
        debug!(%submission, "auth info already hashed");
        return Ok(Some(info));
    }
    hasher.hash_auth_info(&mut info);
    store.upsert(&info).await?;
    Ok(Some(info))
}

/// In-memory store for tests and deployments without a database.
#[derive(Default)]
pub struct MemoryAuthInfoStore {
    auth_info: RwLock<HashMap<Uuid, AuthInfo>>,
    co_sign: RwLock<HashMap<Uuid, CoSignData>>,
}

impl MemoryAuthInfoStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.auth_info.read().await.len()
    }
}

#[async_trait]
impl AuthInfoStore for MemoryAuthInfoStore {
    async fn upsert(&self, info: &AuthInfo) -> Result<(), StoreError> {
        self.auth_info
            .write()
            .await
            .insert(info.submission, info.clone());
        Ok(())
    }

    async fn get(&self, submission: Uuid) -> Result<Option<AuthInfo>, StoreError> {
        Ok(self.auth_info.read().await.get(&submission).cloned())
    }

    async fn upsert_co_sign(&self, submission: Uuid, data: &CoSignData) -> Result<(), StoreError> {
        self.co_sign.write().await.insert(submission, data.clone());
        Ok(())
    }

    async fn co_sign(&self, submission: Uuid) -> Result<Option<CoSignData>, StoreError> {
        Ok(self.co_sign.read().await.get(&submission).cloned())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
