use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::path::PathBuf;
use url::Url;

pub const ARG_CONFIG: &str = "config";
pub const ARG_BASE_URL: &str = "base-url";
pub const ARG_ALLOWED_REDIRECT_ORIGINS: &str = "allowed-redirect-origins";
pub const ARG_HASH_SALT: &str = "hash-salt";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_STAFF_TOKEN: &str = "staff-token";

#[derive(Debug)]
pub struct Options {
    pub config: PathBuf,
    pub base_url: Url,
    pub allowed_redirect_origins: Vec<String>,
    pub hash_salt: SecretString,
    pub session_ttl_seconds: u64,
    pub staff_token: Option<SecretString>,
}

impl Options {
    /// # Errors
    /// Returns an error if a required argument is missing or the base URL is invalid.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let config = matches
            .get_one::<String>(ARG_CONFIG)
            .map(PathBuf::from)
            .context("missing required argument: --config")?;
        let base_url = matches
            .get_one::<String>(ARG_BASE_URL)
            .context("missing required argument: --base-url")?;
        let hash_salt = matches
            .get_one::<String>(ARG_HASH_SALT)
            .cloned()
            .context("missing required argument: --hash-salt")?;

        Ok(Self {
            config,
            base_url: normalize_base_url(base_url)?,
            allowed_redirect_origins: matches
                .get_many::<String>(ARG_ALLOWED_REDIRECT_ORIGINS)
                .map(|origins| {
                    origins
                        .map(|origin| origin.trim().to_string())
                        .filter(|origin| !origin.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            hash_salt: SecretString::from(hash_salt),
            session_ttl_seconds: matches
                .get_one::<u64>(ARG_SESSION_TTL_SECONDS)
                .copied()
                .unwrap_or(900),
            staff_token: matches
                .get_one::<String>(ARG_STAFF_TOKEN)
                .filter(|token| !token.is_empty())
                .map(|token| SecretString::from(token.clone())),
        })
    }
}

/// Return URLs are joined onto the base URL, so it must end with a slash.
///
/// # Errors
/// Returns an error if `raw` is not an absolute URL.
pub fn normalize_base_url(raw: &str) -> Result<Url> {
    let mut base_url = Url::parse(raw).with_context(|| format!("invalid base URL: {raw}"))?;
    if !base_url.path().ends_with('/') {
        let path = format!("{}/", base_url.path());
        base_url.set_path(&path);
    }
    Ok(base_url)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CONFIG)
                .short('c')
                .long("config")
                .help("JSON file with plugin settings and form definitions")
                .env("FORMAUTH_CONFIG")
                .required(true),
        )
        .arg(
            Arg::new(ARG_BASE_URL)
                .long("base-url")
                .help("Public URL of the broker, used to build return URLs")
                .env("FORMAUTH_BASE_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_ALLOWED_REDIRECT_ORIGINS)
                .long("allowed-redirect-origins")
                .help("Comma separated origins that may be used as 'next' targets")
                .env("FORMAUTH_ALLOWED_REDIRECT_ORIGINS")
                .value_delimiter(','),
        )
        .arg(
            Arg::new(ARG_HASH_SALT)
                .long("hash-salt")
                .help("Salt for hashing identifying attributes")
                .env("FORMAUTH_HASH_SALT")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long("session-ttl-seconds")
                .help("Idle lifetime of a session in seconds")
                .env("FORMAUTH_SESSION_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_STAFF_TOKEN)
                .long("staff-token")
                .help("Bearer token that marks a session as staff, enabling demo plugins")
                .env("FORMAUTH_STAFF_TOKEN")
                .hide_env_values(true),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_trailing_slash() -> Result<()> {
        assert_eq!(
            normalize_base_url("https://auth.example.nl/broker")?.as_str(),
            "https://auth.example.nl/broker/"
        );
        assert_eq!(
            normalize_base_url("https://auth.example.nl")?.as_str(),
            "https://auth.example.nl/"
        );
        assert!(normalize_base_url("auth.example.nl").is_err());
        Ok(())
    }
}
