use serde::{Deserialize, Serialize};
use std::fs::read_to_string;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{info, warn};

use super::error::Error;
use super::kerberos::Kerberos;
use super::system::System;

/// keeper.toml
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub system: System,

    #[serde(default)]
    pub kerberos: Kerberos,
}

impl Config {
    /// Load configuration from disk or use defaults.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = match read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(
                    "\"{}\" doesn't exist, loading defaults instead",
                    path.display()
                );
                return Ok(Config::default());
            }
            Err(source) => {
                return Err(Error::Io {
                    path: path.to_owned(),
                    source,
                })
            }
        };

        let config: Config = toml::from_str(&raw).map_err(|err| Error::toml(path, err))?;
        info!(
            "loaded \"{}\" (run mode: {})",
            path.display(),
            config.system.run_mode()
        );

        Ok(config)
    }
}
