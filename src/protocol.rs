//! Identity-provider protocol collaborator.
//!
//! Token exchange, SAML artifact resolution and RP-initiated logout are
//! delegated to a [`ProtocolClient`]. Signature and token verification happen
//! on the other side of that boundary; the broker only ever sees verified
//! claims. [`HttpProtocolClient`] talks to the provider endpoints with
//! `reqwest`, tests use fakes.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use crate::APP_USER_AGENT;

const PROVIDER_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },
    #[error("unexpected status {status} from {endpoint}")]
    Status { endpoint: String, status: u16 },
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    fn transport(endpoint: &Url, err: &reqwest::Error) -> Self {
        Self::Transport {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        }
    }
}

/// OIDC relying-party settings for one provider.
#[derive(Clone, Debug)]
pub struct OidcEndpoints {
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub userinfo_endpoint: Url,
    pub end_session_endpoint: Option<Url>,
    pub client_id: String,
    pub client_secret: SecretString,
    pub scopes: Vec<String>,
}

impl OidcEndpoints {
    /// Authorization request URL for the code flow.
    #[must_use]
    pub fn authorization_url(
        &self,
        redirect_uri: &Url,
        state: &str,
        extra: &[(&str, &str)],
    ) -> Url {
        let mut url = self.authorization_endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", redirect_uri.as_str())
                .append_pair("scope", &self.scopes.join(" "))
                .append_pair("state", state);
            for (key, value) in extra {
                query.append_pair(key, value);
            }
        }
        url
    }
}

/// Verified result of an authorization code exchange.
#[derive(Clone, Debug, PartialEq)]
pub struct OidcTokens {
    pub id_token: String,
    pub claims: Value,
}

/// SAML broker settings; the artifact resolver is a signing sidecar.
#[derive(Clone, Debug)]
pub struct SamlEndpoints {
    pub sso_url: Url,
    pub artifact_resolution_url: Url,
    pub entity_id: String,
}

impl SamlEndpoints {
    #[must_use]
    pub fn login_url(&self, acs_url: &Url, relay_state: &str, authn_context: Option<&str>) -> Url {
        let mut url = self.sso_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("entityID", &self.entity_id)
                .append_pair("AssertionConsumerServiceURL", acs_url.as_str())
                .append_pair("RelayState", relay_state);
            if let Some(context) = authn_context {
                query.append_pair("RequestedAuthnContext", context);
            }
        }
        url
    }
}

/// Verified SAML assertion.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct SamlAssertion {
    pub name_id: String,
    #[serde(default)]
    pub authn_context_class_ref: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Exchange an authorization code for verified claims.
    async fn exchange_code(
        &self,
        endpoints: &OidcEndpoints,
        code: &str,
        redirect_uri: &Url,
    ) -> Result<OidcTokens, ProviderError>;

    /// Resolve a SAML artifact into a verified assertion.
    async fn resolve_artifact(
        &self,
        endpoints: &SamlEndpoints,
        artifact: &str,
    ) -> Result<SamlAssertion, ProviderError>;

    /// RP-initiated logout at the provider.
    async fn end_session(&self, endpoint: &Url, id_token: &str) -> Result<(), ProviderError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    id_token: String,
    access_token: String,
}

pub struct HttpProtocolClient {
    client: Client,
}

impl HttpProtocolClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECONDS))
            .build()
            .map_err(|err| ProviderError::Unavailable(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ProtocolClient for HttpProtocolClient {
    #[instrument(skip(self, endpoints, code), fields(token_endpoint = %endpoints.token_endpoint))]
    async fn exchange_code(
        &self,
        endpoints: &OidcEndpoints,
        code: &str,
        redirect_uri: &Url,
    ) -> Result<OidcTokens, ProviderError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", endpoints.client_id.as_str()),
            ("client_secret", endpoints.client_secret.expose_secret()),
        ];
        let response = self
            .client
            .post(endpoints.token_endpoint.clone())
            .form(&form)
            .send()
            .await
            .map_err(|err| ProviderError::transport(&endpoints.token_endpoint, &err))?;
        if response.status() != StatusCode::OK {
            return Err(ProviderError::Status {
                endpoint: endpoints.token_endpoint.to_string(),
                status: response.status().as_u16(),
            });
        }
        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::InvalidResponse(err.to_string()))?;

        let response = self
            .client
            .get(endpoints.userinfo_endpoint.clone())
            .bearer_auth(&tokens.access_token)
            .send()
            .await
            .map_err(|err| ProviderError::transport(&endpoints.userinfo_endpoint, &err))?;
        if response.status() != StatusCode::OK {
            return Err(ProviderError::Status {
                endpoint: endpoints.userinfo_endpoint.to_string(),
                status: response.status().as_u16(),
            });
        }
        let claims: Value = response
            .json()
            .await
            .map_err(|err| ProviderError::InvalidResponse(err.to_string()))?;
        if !claims.is_object() {
            return Err(ProviderError::InvalidResponse(
                "userinfo is not a JSON object".to_string(),
            ));
        }

        debug!("authorization code exchanged");
        Ok(OidcTokens {
            id_token: tokens.id_token,
            claims,
        })
    }

    #[instrument(
        skip(self, endpoints, artifact),
        fields(resolver = %endpoints.artifact_resolution_url)
    )]
    async fn resolve_artifact(
        &self,
        endpoints: &SamlEndpoints,
        artifact: &str,
    ) -> Result<SamlAssertion, ProviderError> {
        let body = serde_json::json!({
            "artifact": artifact,
            "entity_id": endpoints.entity_id,
        });
        let response = self
            .client
            .post(endpoints.artifact_resolution_url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|err| ProviderError::transport(&endpoints.artifact_resolution_url, &err))?;
        if response.status() != StatusCode::OK {
            return Err(ProviderError::Status {
                endpoint: endpoints.artifact_resolution_url.to_string(),
                status: response.status().as_u16(),
            });
        }
        response
            .json()
            .await
            .map_err(|err| ProviderError::InvalidResponse(err.to_string()))
    }

    #[instrument(skip(self, id_token))]
    async fn end_session(&self, endpoint: &Url, id_token: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .get(endpoint.clone())
            .query(&[("id_token_hint", id_token)])
            .send()
            .await
            .map_err(|err| ProviderError::transport(endpoint, &err))?;
        // Providers answer logout with either a page or a redirect.
        if response.status().is_server_error() || response.status().is_client_error() {
            return Err(ProviderError::Status {
                endpoint: endpoint.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Scripted provider used by plugin and handler tests.
    #[derive(Default)]
    pub struct FakeProtocolClient {
        pub claims: Mutex<Option<Value>>,
        pub assertion: Mutex<Option<SamlAssertion>>,
        pub fail: Mutex<bool>,
        pub logout_calls: Mutex<Vec<(String, String)>>,
    }

    impl FakeProtocolClient {
        pub fn with_claims(claims: Value) -> Self {
            Self {
                claims: Mutex::new(Some(claims)),
                ..Self::default()
            }
        }

        pub fn with_assertion(assertion: SamlAssertion) -> Self {
            Self {
                assertion: Mutex::new(Some(assertion)),
                ..Self::default()
            }
        }

        pub fn failing() -> Self {
            Self {
                fail: Mutex::new(true),
                ..Self::default()
            }
        }

        pub fn logout_calls(&self) -> Vec<(String, String)> {
            self.logout_calls
                .lock()
                .map(|calls| calls.clone())
                .unwrap_or_default()
        }

        fn failing_now(&self) -> bool {
            self.fail.lock().map(|fail| *fail).unwrap_or(false)
        }
    }

    #[async_trait]
    impl ProtocolClient for FakeProtocolClient {
        async fn exchange_code(
            &self,
            _endpoints: &OidcEndpoints,
            code: &str,
            _redirect_uri: &Url,
        ) -> Result<OidcTokens, ProviderError> {
            if self.failing_now() {
                return Err(ProviderError::Unavailable("fake outage".to_string()));
            }
            let claims = self
                .claims
                .lock()
                .ok()
                .and_then(|claims| claims.clone())
                .ok_or_else(|| ProviderError::InvalidResponse("no claims".to_string()))?;
            Ok(OidcTokens {
                id_token: format!("id-token-for-{code}"),
                claims,
            })
        }

        async fn resolve_artifact(
            &self,
            _endpoints: &SamlEndpoints,
            _artifact: &str,
        ) -> Result<SamlAssertion, ProviderError> {
            if self.failing_now() {
                return Err(ProviderError::Unavailable("fake outage".to_string()));
            }
            self.assertion
                .lock()
                .ok()
                .and_then(|assertion| assertion.clone())
                .ok_or_else(|| ProviderError::InvalidResponse("no assertion".to_string()))
        }

        async fn end_session(&self, endpoint: &Url, id_token: &str) -> Result<(), ProviderError> {
            if let Ok(mut calls) = self.logout_calls.lock() {
                calls.push((endpoint.to_string(), id_token.to_string()));
            }
            if self.failing_now() {
                return Err(ProviderError::Unavailable("fake outage".to_string()));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> Result<OidcEndpoints, url::ParseError> {
        Ok(OidcEndpoints {
            authorization_endpoint: Url::parse("https://idp.example.nl/authorize")?,
            token_endpoint: Url::parse("https://idp.example.nl/token")?,
            userinfo_endpoint: Url::parse("https://idp.example.nl/userinfo")?,
            end_session_endpoint: None,
            client_id: "forms".to_string(),
            client_secret: SecretString::from("secret"),
            scopes: vec!["openid".to_string(), "bsn".to_string()],
        })
    }

    #[test]
    fn authorization_url_carries_state_and_redirect() -> Result<(), url::ParseError> {
        let redirect =
            Url::parse("https://forms.example.nl/auth/melding/digid_oidc/return?next=x")?;
        let url = endpoints()?.authorization_url(&redirect, "state-1", &[("prompt", "login")]);
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        assert!(pairs.contains(&("state".to_string(), "state-1".to_string())));
        assert!(pairs.contains(&("scope".to_string(), "openid bsn".to_string())));
        assert!(pairs.contains(&("redirect_uri".to_string(), redirect.to_string())));
        assert!(pairs.contains(&("prompt".to_string(), "login".to_string())));
        Ok(())
    }

    #[test]
    fn saml_login_url_carries_relay_state() -> Result<(), url::ParseError> {
        let endpoints = SamlEndpoints {
            sso_url: Url::parse("https://broker.example.nl/sso")?,
            artifact_resolution_url: Url::parse("http://saml-sidecar:8000/resolve")?,
            entity_id: "urn:forms".to_string(),
        };
        let acs = Url::parse("https://forms.example.nl/acs")?;
        let url = endpoints.login_url(&acs, "relay", None);
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        assert!(pairs.contains(&("RelayState".to_string(), "relay".to_string())));
        assert!(!pairs.iter().any(|(key, _)| key == "RequestedAuthnContext"));
        Ok(())
    }

    #[test]
    fn saml_assertion_deserializes_with_defaults() -> Result<(), serde_json::Error> {
        let assertion: SamlAssertion =
            serde_json::from_value(serde_json::json!({"name_id": "s00000000:123456782"}))?;
        assert_eq!(assertion.name_id, "s00000000:123456782");
        assert!(assertion.attributes.is_empty());
        Ok(())
    }
}
