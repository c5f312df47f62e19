use clap::{builder::ValueParser, Arg, Command};

pub const ARG_VERBOSITY: &str = "verbosity";

const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Accepts a level name or its index (0 = error .. 4 = trace).
#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        let level = level.trim().to_lowercase();
        if let Ok(index) = level.parse::<u8>() {
            return if usize::from(index) < LEVELS.len() {
                Ok(index)
            } else {
                Err(format!("log level index must be 0-{}", LEVELS.len() - 1))
            };
        }
        LEVELS
            .iter()
            .position(|name| *name == level)
            .and_then(|index| u8::try_from(index).ok())
            .ok_or_else(|| format!("invalid log level, expected one of: {}", LEVELS.join(", ")))
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Broker log level; repeat -v to raise it (default: error)")
            .long_help(
                "Broker log level. Each -v raises it one step: warn, info, debug, trace. \
                 FORMAUTH_LOG_LEVEL takes a name or 0-4. RUST_LOG overrides both.",
            )
            .env("FORMAUTH_LOG_LEVEL")
            .global(true)
            .action(clap::ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(level: &str) -> Result<u8, clap::Error> {
        let matches = Command::new("formauth")
            .arg(
                Arg::new("level")
                    .long("level")
                    .value_parser(validator_log_level()),
            )
            .try_get_matches_from(["formauth", "--level", level])?;
        Ok(matches.get_one::<u8>("level").copied().unwrap_or_default())
    }

    #[test]
    fn names_and_indexes_map_to_the_same_level() -> Result<(), clap::Error> {
        assert_eq!(parse("DEBUG")?, 3);
        assert_eq!(parse("3")?, 3);
        assert_eq!(parse(" warn ")?, 1);
        Ok(())
    }

    #[test]
    fn out_of_range_levels_are_rejected() {
        assert!(parse("5").is_err());
        assert!(parse("verbose").is_err());
    }
}
