//! Browser-session state for the authentication flow.
//!
//! Flow Overview:
//! - `start` records a [`PendingAuthentication`] under a random state token and
//!   sends only that token to the identity provider.
//! - `return` takes the pending entry back out (single use) and, on success,
//!   the flow controller stores a [`FormAuth`].
//! - logout or submission completion clears the identity again.
//!
//! Sessions live in process memory and expire after the configured TTL of
//! inactivity; abandoned pending logins disappear with their session.

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use url::Url;
use uuid::Uuid;

use crate::types::FormAuth;

pub const SESSION_COOKIE_NAME: &str = "formauth_session";

/// Session key holding the OIDC id token used for RP-initiated logout.
pub const OIDC_ID_TOKEN_KEY: &str = "oidc_id_token";

const DEFAULT_SESSION_TTL_SECONDS: u64 = 15 * 60;
const MAX_PENDING_PER_SESSION: usize = 8;

/// Random URL-safe token (256 bits).
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

/// Login started but not yet returned from the identity provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingAuthentication {
    pub state: String,
    pub plugin: String,
    pub form_slug: String,
    pub next: Url,
    pub co_sign_submission: Option<Uuid>,
}

#[derive(Clone, Debug, Default)]
pub struct Session {
    form_auth: Option<FormAuth>,
    pending: Vec<PendingAuthentication>,
    plugin_keys: HashMap<String, String>,
    submissions: HashSet<Uuid>,
    is_staff: bool,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn staff() -> Self {
        Self {
            is_staff: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_staff(&self) -> bool {
        self.is_staff
    }

    pub fn set_staff(&mut self, is_staff: bool) {
        self.is_staff = is_staff;
    }

    #[must_use]
    pub fn form_auth(&self) -> Option<&FormAuth> {
        self.form_auth.as_ref()
    }

    pub fn set_form_auth(&mut self, form_auth: FormAuth) {
        self.form_auth = Some(form_auth);
    }

    pub fn take_form_auth(&mut self) -> Option<FormAuth> {
        self.form_auth.take()
    }

    /// Record a pending login and return its state token.
    ///
    /// Only the most recent pending logins are kept.
    pub fn begin_pending(
        &mut self,
        plugin: &str,
        form_slug: &str,
        next: Url,
        co_sign_submission: Option<Uuid>,
    ) -> String {
        let state = generate_token();
        if self.pending.len() >= MAX_PENDING_PER_SESSION {
            self.pending.remove(0);
        }
        self.pending.push(PendingAuthentication {
            state: state.clone(),
            plugin: plugin.to_string(),
            form_slug: form_slug.to_string(),
            next,
            co_sign_submission,
        });
        state
    }

    #[must_use]
    pub fn pending(&self, state: &str) -> Option<&PendingAuthentication> {
        self.pending.iter().find(|pending| pending.state == state)
    }

    /// Remove and return the pending login for `state`; single use.
    pub fn take_pending(&mut self, state: &str) -> Option<PendingAuthentication> {
        let index = self.pending.iter().position(|pending| pending.state == state)?;
        Some(self.pending.remove(index))
    }

    #[must_use]
    pub fn plugin_key(&self, key: &str) -> Option<&str> {
        self.plugin_keys.get(key).map(String::as_str)
    }

    pub fn set_plugin_key(&mut self, key: &str, value: impl Into<String>) {
        self.plugin_keys.insert(key.to_string(), value.into());
    }

    pub fn remove_plugin_key(&mut self, key: &str) -> Option<String> {
        self.plugin_keys.remove(key)
    }

    pub fn add_submission(&mut self, submission: Uuid) {
        self.submissions.insert(submission);
    }

    #[must_use]
    pub fn owns_submission(&self, submission: Uuid) -> bool {
        self.submissions.contains(&submission)
    }

    /// Drop the authenticated identity and every plugin-specific key.
    pub fn clear_identity(&mut self) {
        self.form_auth = None;
        self.plugin_keys.clear();
    }
}

struct SessionEntry {
    session: Session,
    touched_at: Instant,
}

/// In-memory session storage keyed by the session cookie value.
pub struct SessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_SESSION_TTL_SECONDS))
    }
}

impl SessionStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Load the session for `token`, or a fresh one when missing or expired.
    ///
    /// Returns the token to use for saving; it differs from the input when a new
    /// session was created.
    pub async fn load(&self, token: Option<&str>) -> (String, Session) {
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, entry| entry.touched_at.elapsed() < self.ttl);

        if let Some(token) = token {
            if let Some(entry) = sessions.get(token) {
                return (token.to_string(), entry.session.clone());
            }
        }
        (generate_token(), Session::new())
    }

    pub async fn save(&self, token: &str, session: Session) {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(
            token.to_string(),
            SessionEntry {
                session,
                touched_at: Instant::now(),
            },
        );
    }

    pub async fn remove(&self, token: &str) -> Option<Session> {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(token).map(|entry| entry.session)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
