//! # Formauth (authentication broker for form submissions)
//!
//! `formauth` drives external identity providers (DigiD and eHerkenning through
//! SAML or OIDC brokers, eIDAS, Yivi, organization login and staff-only demo
//! backends) through one start/return contract, and turns what they assert into
//! a single canonical identity.
//!
//! ## Flow
//!
//! 1. `GET /auth/{form}/{plugin}/start?next=...` checks the redirect target,
//!    records a pending login in the session and redirects to the provider.
//! 2. The provider comes back on `/auth/{form}/{plugin}/return`. The plugin
//!    exchanges the response for claims, the claim processor extracts the
//!    identifier and level of assurance (LoA), and the session holds the result.
//! 3. When a submission is confirmed, the identity is stored per submission,
//!    can be projected into an authentication context document, and its
//!    identifying attributes are hashed once the submission is complete.
//!
//! ## Plugins
//!
//! Plugins are registered once at startup from the JSON configuration under a
//! unique identifier. Only enabled plugins that a form lists may be used for it.
//! Demo plugins are limited to staff sessions.

pub mod api;
pub mod claims;
pub mod cli;
pub mod config;
pub mod forms;
pub mod plugins;
pub mod protocol;
pub mod redirect;
pub mod registry;
pub mod session;
pub mod store;
pub mod types;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
