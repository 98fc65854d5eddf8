use std::fmt;

use pagelog_config::{ConfigurationError, GenericConfiguration};
use pagelog_error::{generic_error, ErrorContext as _, GenericError};
use serde::Deserialize;
use serde_with::serde_as;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

use crate::deser::LenientBool;

fn default_log_level() -> LogLevel {
    LevelFilter::INFO.into()
}

const fn default_true() -> bool {
    true
}

/// Logging configuration.
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct LoggingConfiguration {
    /// Filtering directives, in `EnvFilter` syntax, such as `info` or `pagelog_components=debug,info`.
    ///
    /// Defaults to `info`.
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Whether to emit logs as JSON instead of the pipe-delimited text format.
    ///
    /// Defaults to `false`.
    #[serde_as(as = "LenientBool")]
    #[serde(default)]
    pub log_format_json: bool,

    /// Whether to write logs to standard error.
    ///
    /// Defaults to `true`.
    #[serde_as(as = "LenientBool")]
    #[serde(default = "default_true")]
    pub log_to_console: bool,

    /// Path of a file to append logs to. Empty disables file logging.
    ///
    /// Defaults to empty.
    #[serde(default)]
    pub log_file: String,
}

impl LoggingConfiguration {
    /// Creates a new `LoggingConfiguration` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized as `LoggingConfiguration`, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, ConfigurationError> {
        config.as_typed()
    }

    /// Creates a new `LoggingConfiguration` with default values.
    pub fn with_defaults() -> Self {
        Self {
            log_level: default_log_level(),
            log_format_json: false,
            log_to_console: true,
            log_file: String::new(),
        }
    }
}

/// A parsed log filter.
#[derive(Clone, Deserialize)]
#[serde(try_from = "String")]
pub struct LogLevel {
    raw: String,
    filter: LevelFilterSpec,
}

#[derive(Clone)]
enum LevelFilterSpec {
    Level(LevelFilter),
    Directives(String),
}

impl LogLevel {
    /// Builds an `EnvFilter` from the parsed directives.
    pub fn as_env_filter(&self) -> EnvFilter {
        match &self.filter {
            LevelFilterSpec::Level(level) => EnvFilter::default().add_directive((*level).into()),
            // Directives were validated when parsed.
            LevelFilterSpec::Directives(directives) => EnvFilter::builder().parse_lossy(directives),
        }
    }
}

impl fmt::Debug for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<LevelFilter> for LogLevel {
    fn from(level: LevelFilter) -> Self {
        Self {
            raw: level.to_string().to_lowercase(),
            filter: LevelFilterSpec::Level(level),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = GenericError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let value = value.trim().to_string();
        if value.is_empty() {
            return Err(generic_error!("Log level cannot be empty."));
        }

        if let Ok(level) = value.parse::<LevelFilter>() {
            return Ok(level.into());
        }

        EnvFilter::builder()
            .parse(&value)
            .with_error_context(|| format!("Failed to parse log level '{}'.", value))?;

        Ok(Self {
            raw: value.clone(),
            filter: LevelFilterSpec::Directives(value),
        })
    }
}

#[cfg(test)]
mod tests {
    use pagelog_config::ConfigurationLoader;
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults() {
        let config = ConfigurationLoader::default().into_generic();
        let logging = LoggingConfiguration::from_configuration(&config).unwrap();

        assert_eq!(format!("{:?}", logging.log_level), "info");
        assert!(!logging.log_format_json);
        assert!(logging.log_to_console);
        assert!(logging.log_file.is_empty());
    }

    #[test]
    fn string_flags_and_directives() {
        let config = ConfigurationLoader::default()
            .add_defaults(json!({
                "log_level": "pagelog_components=debug,warn",
                "log_format_json": "yes",
                "log_to_console": "0",
            }))
            .into_generic();
        let logging = LoggingConfiguration::from_configuration(&config).unwrap();

        assert_eq!(format!("{:?}", logging.log_level), "pagelog_components=debug,warn");
        assert!(logging.log_format_json);
        assert!(!logging.log_to_console);
    }

    #[test]
    fn invalid_level() {
        assert!(LogLevel::try_from(String::new()).is_err());
        assert!(LogLevel::try_from("pagelog=loud".to_string()).is_err());
        assert_eq!(format!("{:?}", LogLevel::try_from(" DEBUG ".to_string()).unwrap()), "debug");
    }
}
