//! Maps validated CLI arguments to the action to run.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::broker;
use anyhow::Result;

/// # Errors
/// Returns an error if required arguments are missing or invalid.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .filter(|dsn| !dsn.is_empty())
        .cloned();
    let broker = broker::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        config: broker.config,
        base_url: broker.base_url,
        allowed_redirect_origins: broker.allowed_redirect_origins,
        hash_salt: broker.hash_salt,
        session_ttl_seconds: broker.session_ttl_seconds,
        staff_token: broker.staff_token,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    fn server_action_from_env() {
        temp_env::with_vars(
            [
                ("FORMAUTH_CONFIG", Some("/etc/formauth/config.json")),
                ("FORMAUTH_BASE_URL", Some("https://auth.example.nl/broker")),
                ("FORMAUTH_HASH_SALT", Some("pepper")),
                ("FORMAUTH_DSN", None),
                ("FORMAUTH_PORT", Some("9090")),
                ("FORMAUTH_STAFF_TOKEN", Some("")),
                (
                    "FORMAUTH_ALLOWED_REDIRECT_ORIGINS",
                    Some("https://forms.example.nl"),
                ),
            ],
            || {
                let matches = commands::new().get_matches_from(vec!["formauth"]);
                let Ok(Action::Server(args)) = handler(&matches) else {
                    panic!("expected a server action");
                };
                assert_eq!(args.port, 9090);
                assert!(args.dsn.is_none());
                assert!(args.staff_token.is_none());
                assert_eq!(args.base_url.as_str(), "https://auth.example.nl/broker/");
                assert_eq!(args.allowed_redirect_origins, vec!["https://forms.example.nl"]);
            },
        );
    }

    #[test]
    fn invalid_base_url_is_an_error() {
        temp_env::with_vars(
            [
                ("FORMAUTH_CONFIG", Some("/etc/formauth/config.json")),
                ("FORMAUTH_BASE_URL", Some("not a url")),
                ("FORMAUTH_HASH_SALT", Some("pepper")),
            ],
            || {
                let matches = commands::new().get_matches_from(vec!["formauth"]);
                assert!(handler(&matches).is_err());
            },
        );
    }
}
