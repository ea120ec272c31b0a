//! Loading up an environment from configuration files.

use std::io::{Cursor, Read};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Environment configuration typically loaded from a file.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy, Default)]
pub struct Config {
    /// Simulation time at which the clock starts.
    #[serde(default)]
    pub initial_time: f64,
}

impl Config {
    /// Load config from YAML.
    ///
    /// # Example
    ///
    /// ```
    /// # use procsim::{Config, Environment};
    /// # fn main() -> Result<(), procsim::Error> {
    /// let config = Config::from_yaml(std::io::Cursor::new("initial_time: 2.5"))?;
    /// assert_eq!(Environment::from_config(&config).now(), 2.5);
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the input cannot be parsed, or if the initial time is not a
    /// finite number.
    pub fn from_yaml<R: Read>(reader: R) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_reader(reader)
            .map_err(|err| Error::Config(format!("Failed to parse config: {}", err)))?;
        config.verify()
    }

    fn verify(self) -> Result<Self, Error> {
        if !self.initial_time.is_finite() {
            return Err(Error::Config(format!(
                "Initial time must be finite ({})",
                self.initial_time
            )));
        }
        Ok(self)
    }
}

impl FromStr for Config {
    type Err = Error;
    fn from_str(config: &str) -> Result<Self, Self::Err> {
        Config::from_yaml(Cursor::new(config))
    }
}
