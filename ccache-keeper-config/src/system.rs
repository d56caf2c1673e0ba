//! `[system]` section: how the program is being run and where it lives.

use std::env;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How the process is run.
///
/// Decides where Kerberos files live when no explicit location is
/// configured, and what happens to the credential cache on shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Started by a person. Library default locations are used and
    /// the credential cache is kept on disk between runs.
    #[default]
    Manual,
    /// Started by a service manager. Locations come from the configuration
    /// and the credential cache is destroyed when the process stops.
    Service,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Service => "service",
        }
    }
}

impl From<&str> for RunMode {
    /// Only `manual` is interactive, any other value means managed service.
    fn from(value: &str) -> Self {
        if value == "manual" {
            Self::Manual
        } else {
            Self::Service
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct System {
    /// Program type. `manual` or anything else for a managed service.
    #[serde(rename = "type", default = "System::default_program_type")]
    pub program_type: String,

    /// Directory the program is installed in.
    #[serde(default = "System::default_progpath")]
    pub progpath: PathBuf,

    /// Program name, used to name the credential cache.
    #[serde(default = "System::default_progname")]
    pub progname: String,
}

impl Default for System {
    fn default() -> Self {
        Self {
            program_type: Self::default_program_type(),
            progpath: Self::default_progpath(),
            progname: Self::default_progname(),
        }
    }
}

impl System {
    fn default_program_type() -> String {
        RunMode::Manual.as_str().to_string()
    }

    fn default_progpath() -> PathBuf {
        env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn default_progname() -> String {
        env::current_exe()
            .ok()
            .and_then(|exe| exe.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "ccache-keeper".to_string())
    }

    pub fn run_mode(&self) -> RunMode {
        RunMode::from(self.program_type.as_str())
    }
}
