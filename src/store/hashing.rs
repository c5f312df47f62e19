//! One-way hashing of identifying attributes.
//!
//! Values are replaced by `base64(sha256(salt || value))`. Hashing can run inline
//! or through [`HashingQueue`], a background worker fed over a channel.

use base64ct::{Base64, Encoding};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, Instrument};
use uuid::Uuid;

use super::{hash_identifying_attributes, AuthInfo, AuthInfoStore};

#[derive(Clone, Debug)]
pub struct IdentifierHasher {
    salt: SecretString,
}

impl IdentifierHasher {
    #[must_use]
    pub fn new(salt: SecretString) -> Self {
        Self { salt }
    }

    #[must_use]
    pub fn hash(&self, value: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.expose_secret().as_bytes());
        hasher.update(value.as_bytes());
        Base64::encode_string(&hasher.finalize())
    }

    fn hash_non_empty(&self, value: &mut String) {
        if !value.is_empty() {
            *value = self.hash(value);
        }
    }

    fn hash_claim(&self, value: &Value) -> Value {
        match value {
            Value::Null => Value::Null,
            Value::String(text) => Value::String(self.hash(text)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| self.hash_claim(item)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, item)| (key.clone(), self.hash_claim(item)))
                    .collect(),
            ),
            other => Value::String(self.hash(&other.to_string())),
        }
    }

    /// Replace every identifying field and mark the record hashed.
    pub fn hash_auth_info(&self, info: &mut AuthInfo) {
        self.hash_non_empty(&mut info.value);
        self.hash_non_empty(&mut info.acting_subject_identifier_value);
        self.hash_non_empty(&mut info.legal_subject_identifier_value);
        if let Some(claims) = info.additional_claims.as_mut() {
            for value in claims.values_mut() {
                *value = self.hash_claim(value);
            }
        }
        info.attribute_hashed = true;
    }
}

/// Deferred hashing: submissions are queued and hashed by a background task.
#[derive(Clone)]
pub struct HashingQueue {
    sender: mpsc::UnboundedSender<Uuid>,
}

impl HashingQueue {
    /// Spawn the worker on the current runtime.
    #[must_use]
    pub fn spawn(store: Arc<dyn AuthInfoStore>, hasher: IdentifierHasher) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Uuid>();
        tokio::spawn(
            async move {
                info!("hashing worker started");
                while let Some(submission) = receiver.recv().await {
                    match hash_identifying_attributes(store.as_ref(), &hasher, submission).await {
                        Ok(Some(_)) => debug!(%submission, "identifying attributes hashed"),
                        Ok(None) => debug!(%submission, "no auth info to hash"),
                        Err(err) => error!(%submission, "failed to hash auth info: {err}"),
                    }
                }
                info!("hashing worker stopped");
            }
            .instrument(tracing::info_span!("hashing.worker")),
        );
        Self { sender }
    }

    /// Queue a submission; returns false when the worker is gone.
    pub fn enqueue(&self, submission: Uuid) -> bool {
        self.sender.send(submission).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryAuthInfoStore;
    use crate::types::{AuthAttribute, FormAuth};
    use serde_json::{json, Map};
    use std::time::Duration;

    fn hasher() -> IdentifierHasher {
        IdentifierHasher::new(SecretString::from("pepper"))
    }

    #[test]
    fn hash_is_salted_and_stable() {
        let other = IdentifierHasher::new(SecretString::from("other"));
        assert_eq!(hasher().hash("123456782"), hasher().hash("123456782"));
        assert_ne!(hasher().hash("123456782"), other.hash("123456782"));
        assert_eq!(hasher().hash("x").len(), 44);
    }

    #[test]
    fn hash_auth_info_covers_all_identifiers() {
        let mut claims = Map::new();
        claims.insert("city".to_string(), json!("Utrecht"));
        claims.insert("age".to_string(), json!(42));
        let form_auth = FormAuth::new("eherkenning_oidc", AuthAttribute::Kvk, "12345678")
            .with_acting_subject("opaque", "4B75A0EA107B3D36")
            .with_additional_claims(claims);
        let mut info = AuthInfo::from_form_auth(Uuid::nil(), &form_auth);

        hasher().hash_auth_info(&mut info);

        assert!(info.attribute_hashed);
        assert_eq!(info.value, hasher().hash("12345678"));
        assert_eq!(info.acting_subject_identifier_value, hasher().hash("4B75A0EA107B3D36"));
        assert_eq!(info.acting_subject_identifier_type, "opaque");
        assert!(info.legal_subject_identifier_value.is_empty());
        let claims = info.additional_claims.unwrap_or_default();
        assert_eq!(claims.get("city"), Some(&json!(hasher().hash("Utrecht"))));
        assert_eq!(claims.get("age"), Some(&json!(hasher().hash("42"))));
    }

    #[tokio::test]
    async fn queue_hashes_in_background() -> Result<(), crate::store::StoreError> {
        let store = Arc::new(MemoryAuthInfoStore::new());
        let submission = Uuid::new_v4();
        let form_auth = FormAuth::new("demo", AuthAttribute::Bsn, "123456782");
        store.upsert(&AuthInfo::from_form_auth(submission, &form_auth)).await?;

        let queue = HashingQueue::spawn(store.clone(), hasher());
        assert!(queue.enqueue(submission));

        let mut hashed = false;
        for _ in 0..50 {
            if store.get(submission).await?.is_some_and(|info| info.attribute_hashed) {
                hashed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(hashed);
        Ok(())
    }
}
