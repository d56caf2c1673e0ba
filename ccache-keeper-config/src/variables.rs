//! Key/value view over the configuration.

use std::collections::HashMap;

use crate::Config;

/// Configuration keys understood by the keeper.
pub mod keys {
    pub const SYSTEM_TYPE: &str = "system/type";
    pub const SYSTEM_PROGPATH: &str = "system/progpath";
    pub const SYSTEM_PROGNAME: &str = "system/progname";
    pub const KERBEROS_KEYTAB: &str = "kerberos/keytab";
    pub const KERBEROS_CCACHE: &str = "kerberos/ccache";
}

/// Look up a configuration value by `section/name`, falling back to `default`.
pub trait Variables: Send + Sync {
    fn variable(&self, key: &str, default: &str) -> String;
}

impl Variables for Config {
    fn variable(&self, key: &str, default: &str) -> String {
        let value = match key {
            keys::SYSTEM_TYPE => Some(self.system.program_type.clone()),
            keys::SYSTEM_PROGPATH => Some(self.system.progpath.display().to_string()),
            keys::SYSTEM_PROGNAME => Some(self.system.progname.clone()),
            keys::KERBEROS_KEYTAB => self
                .kerberos
                .keytab
                .as_ref()
                .map(|path| path.display().to_string()),
            keys::KERBEROS_CCACHE => self
                .kerberos
                .ccache
                .as_ref()
                .map(|path| path.display().to_string()),
            _ => None,
        };

        value.unwrap_or_else(|| default.to_string())
    }
}

impl Variables for HashMap<String, String> {
    fn variable(&self, key: &str, default: &str) -> String {
        self.get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }
}
