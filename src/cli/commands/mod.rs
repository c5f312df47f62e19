pub mod broker;
pub mod logging;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("formauth")
        .about("Authentication broker for form submissions")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("FORMAUTH_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("dsn")
                .short('d')
                .long("dsn")
                .help("Database connection string")
                .long_help(
                    "Database connection string. Without it authentication details are kept in memory and lost on restart.",
                )
                .env("FORMAUTH_DSN"),
        );

    let command = broker::with_args(command);
    logging::with_args(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    type EnvVar = (&'static str, Option<&'static str>);

    /// Required settings plus `extra`.
    fn vars(extra: &[EnvVar]) -> Vec<EnvVar> {
        let mut vars = vec![
            ("FORMAUTH_CONFIG", Some("/etc/formauth/config.json")),
            ("FORMAUTH_BASE_URL", Some("https://auth.example.nl/")),
            ("FORMAUTH_HASH_SALT", Some("pepper")),
        ];
        vars.extend_from_slice(extra);
        vars
    }

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "formauth");
        assert_eq!(
            command.get_about().map(ToString::to_string),
            Some("Authentication broker for form submissions".to_string())
        );
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn test_required_arguments() {
        temp_env::with_vars(
            [
                ("FORMAUTH_CONFIG", None::<&str>),
                ("FORMAUTH_BASE_URL", None),
                ("FORMAUTH_HASH_SALT", None),
            ],
            || {
                let result = new().try_get_matches_from(vec!["formauth"]);
                assert!(result.is_err());
            },
        );
    }

    #[test]
    fn test_defaults() {
        temp_env::with_vars(
            vars(&[
                ("FORMAUTH_PORT", None),
                ("FORMAUTH_DSN", None),
                ("FORMAUTH_SESSION_TTL_SECONDS", None),
                ("FORMAUTH_ALLOWED_REDIRECT_ORIGINS", None),
            ]),
            || {
                let matches = new().get_matches_from(vec!["formauth"]);
                assert_eq!(matches.get_one::<u16>("port").copied(), Some(8080));
                assert!(matches.get_one::<String>("dsn").is_none());
                assert_eq!(
                    matches
                        .get_one::<u64>(broker::ARG_SESSION_TTL_SECONDS)
                        .copied(),
                    Some(900)
                );
            },
        );
    }

    #[test]
    fn test_redirect_origins_are_comma_separated() {
        temp_env::with_vars(
            vars(&[(
                "FORMAUTH_ALLOWED_REDIRECT_ORIGINS",
                Some("https://forms.example.nl,https://intern.example.nl"),
            )]),
            || {
                let matches = new().get_matches_from(vec!["formauth"]);
                let origins: Vec<&String> = matches
                    .get_many::<String>(broker::ARG_ALLOWED_REDIRECT_ORIGINS)
                    .map(Iterator::collect)
                    .unwrap_or_default();
                assert_eq!(
                    origins,
                    vec!["https://forms.example.nl", "https://intern.example.nl"]
                );
            },
        );
    }

    #[test]
    fn test_check_log_level_env() {
        let levels = vec!["error", "warn", "info", "debug", "trace"];
        for (index, level) in levels.iter().enumerate() {
            temp_env::with_vars(
                vars(&[("FORMAUTH_LOG_LEVEL", Some(*level))]),
                || {
                    let matches = new().get_matches_from(vec!["formauth"]);
                    assert_eq!(
                        matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                        Some(u8::try_from(index).unwrap_or(u8::MAX))
                    );
                },
            );
        }
    }

    #[test]
    fn test_check_log_level_verbosity() {
        for index in 0..5_usize {
            temp_env::with_vars(
                vars(&[("FORMAUTH_LOG_LEVEL", None)]),
                || {
                    let mut args = vec!["formauth".to_string()];
                    if index > 0 {
                        args.push(format!("-{}", "v".repeat(index)));
                    }

                    let matches = new().get_matches_from(args);

                    assert_eq!(
                        matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                        Some(u8::try_from(index).unwrap_or(u8::MAX))
                    );
                },
            );
        }
    }
}
