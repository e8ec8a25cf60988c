//! Configuration, environment and emission selection.
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;

/// SRI environment the document is emitted against.
///
/// The code (`1` or `2`) is embedded both in the access key and in the
/// `<ambiente>` node of the invoice.
///
/// # Examples
/// ```rust
/// use std::str::FromStr;
/// use factura_core::config::Environment;
///
/// let env = Environment::from_str("test")?;
/// assert_eq!(env.code(), "1");
/// # Ok::<(), factura_core::config::EnvironmentParseError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Test,
    Production,
}

/// Error returned when parsing an [`Environment`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvironmentParseError {
    #[error("invalid environment: {input}")]
    Invalid { input: String },
}

impl FromStr for Environment {
    type Err = EnvironmentParseError;
    fn from_str(env: &str) -> Result<Environment, EnvironmentParseError> {
        match env.to_ascii_lowercase().as_str() {
            "test" | "pruebas" | "1" => Ok(Environment::Test),
            "production" | "produccion" | "2" => Ok(Environment::Production),
            _ => Err(EnvironmentParseError::Invalid {
                input: env.to_string(),
            }),
        }
    }
}

impl Environment {
    pub fn code(&self) -> &'static str {
        match self {
            Environment::Test => "1",
            Environment::Production => "2",
        }
    }
}

/// How the document was emitted. Contingency covers offline emission
/// against a previously requested key range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmissionType {
    Normal,
    Contingency,
}

impl EmissionType {
    pub fn code(&self) -> &'static str {
        match self {
            EmissionType::Normal => "1",
            EmissionType::Contingency => "2",
        }
    }
}

const MIN_RETRIES: u8 = 1;
const MAX_RETRIES: u8 = 5;
const MIN_STEP_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_STEP_TIMEOUT: Duration = Duration::from_secs(300);

/// Configuration for the processing pipeline and the schema validator.
///
/// `max_retries` and `step_timeout` are clamped into their bounds at
/// construction. The timeout applies to external steps (the web-service
/// submission performed by the caller); no in-core stage waits on it.
///
/// # Examples
/// ```rust
/// use factura_core::config::{Config, Environment};
///
/// let config = Config::new(Environment::Test, ["schemas"]);
/// assert_eq!(config.max_retries(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    environment: Environment,
    schema_search_paths: Vec<PathBuf>,
    max_retries: u8,
    step_timeout: Duration,
}

impl Config {
    pub fn new<P: Into<PathBuf>>(
        environment: Environment,
        schema_search_paths: impl IntoIterator<Item = P>,
    ) -> Self {
        Self {
            environment,
            schema_search_paths: schema_search_paths.into_iter().map(Into::into).collect(),
            max_retries: 3,
            step_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_max_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.clamp(MIN_RETRIES, MAX_RETRIES);
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout.clamp(MIN_STEP_TIMEOUT, MAX_STEP_TIMEOUT);
        self
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn schema_search_paths(&self) -> &[PathBuf] {
        &self.schema_search_paths
    }

    pub fn max_retries(&self) -> u8 {
        self.max_retries
    }

    pub fn step_timeout(&self) -> Duration {
        self.step_timeout
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(Environment::Test, ["./schemas"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_aliases() {
        assert_eq!(Environment::from_str("pruebas"), Ok(Environment::Test));
        assert_eq!(Environment::from_str("2"), Ok(Environment::Production));
        assert!(Environment::from_str("staging").is_err());
    }

    #[test]
    fn retry_and_timeout_bounds_are_clamped() {
        let config = Config::default()
            .with_max_retries(0)
            .with_step_timeout(Duration::from_secs(1));
        assert_eq!(config.max_retries(), 1);
        assert_eq!(config.step_timeout(), Duration::from_secs(30));

        let config = Config::default()
            .with_max_retries(99)
            .with_step_timeout(Duration::from_secs(3600));
        assert_eq!(config.max_retries(), 5);
        assert_eq!(config.step_timeout(), Duration::from_secs(300));
    }
}
