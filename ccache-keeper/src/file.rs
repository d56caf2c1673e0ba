//! Locating Kerberos files.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use ccache_keeper_config::{keys, RunMode, Variables};
use tracing::{debug, warn};

use crate::context::AuthContext;
use crate::error::Result;

/// Where a kind of Kerberos file lives by default.
pub trait Location {
    /// Shown in logs.
    const KIND: &'static str;

    /// Location the library picks on its own.
    fn default_name(context: &AuthContext) -> Result<String>;

    /// Location derived from the configuration.
    fn config_name(variables: &dyn Variables) -> String;
}

/// Resolved location of a keytab or credential cache.
///
/// Resolved once on construction and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResource {
    name: String,
    run_mode: RunMode,
}

impl FileResource {
    /// Use `explicit` if given. Otherwise manual runs use the library default
    /// and managed services use the configured location.
    pub fn resolve<L: Location>(
        context: &AuthContext,
        variables: &dyn Variables,
        explicit: Option<&str>,
    ) -> Result<Self> {
        let run_mode = RunMode::from(
            variables
                .variable(keys::SYSTEM_TYPE, RunMode::Manual.as_str())
                .as_str(),
        );

        let name = match explicit {
            Some(name) => name.to_string(),
            None => match run_mode {
                RunMode::Manual => L::default_name(context)?,
                RunMode::Service => L::config_name(variables),
            },
        };

        debug!("[kerberos] {} \"{}\" (run mode: {})", L::KIND, name, run_mode);

        Ok(Self { name, run_mode })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    /// The file is on disk. A `FILE:` prefix is ignored.
    pub fn file_exists(&self) -> bool {
        let path = Path::new(self.name.strip_prefix("FILE:").unwrap_or(&self.name));

        match fs::metadata(path) {
            Ok(_) => true,
            Err(err) if err.kind() == ErrorKind::NotFound => false,
            Err(err) => {
                warn!("[kerberos] can't check \"{}\": {}", path.display(), err);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::MemoryKrb5;
    use std::collections::HashMap;

    struct Test;

    impl Location for Test {
        const KIND: &'static str = "test file";

        fn default_name(_context: &AuthContext) -> Result<String> {
            Ok("FILE:/default/location".into())
        }

        fn config_name(variables: &dyn Variables) -> String {
            format!("{}/configured", variables.variable(keys::SYSTEM_PROGPATH, "."))
        }
    }

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_resolve_by_run_mode() {
        let krb5 = MemoryKrb5::new();
        let context = AuthContext::init(&krb5).unwrap();

        let manual = FileResource::resolve::<Test>(&context, &vars(&[]), None).unwrap();
        assert_eq!(manual.name(), "FILE:/default/location");
        assert_eq!(manual.run_mode(), RunMode::Manual);

        let service = FileResource::resolve::<Test>(
            &context,
            &vars(&[
                (keys::SYSTEM_TYPE, "daemon"),
                (keys::SYSTEM_PROGPATH, "/opt/app"),
            ]),
            None,
        )
        .unwrap();
        assert_eq!(service.name(), "/opt/app/configured");
        assert_eq!(service.run_mode(), RunMode::Service);
    }

    #[test]
    fn test_explicit_wins() {
        let krb5 = MemoryKrb5::new();
        let context = AuthContext::init(&krb5).unwrap();

        let resource = FileResource::resolve::<Test>(
            &context,
            &vars(&[(keys::SYSTEM_TYPE, "service")]),
            Some("/explicit"),
        )
        .unwrap();
        assert_eq!(resource.name(), "/explicit");
        assert_eq!(resource.run_mode(), RunMode::Service);
    }

    #[test]
    fn test_file_exists_strips_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("krb5cc_test");
        let krb5 = MemoryKrb5::new();
        let context = AuthContext::init(&krb5).unwrap();

        let name = format!("FILE:{}", path.display());
        let resource = FileResource::resolve::<Test>(&context, &vars(&[]), Some(&name)).unwrap();
        assert!(!resource.file_exists());

        fs::write(&path, b"").unwrap();
        assert!(resource.file_exists());

        let plain = path.display().to_string();
        let resource = FileResource::resolve::<Test>(&context, &vars(&[]), Some(&plain)).unwrap();
        assert!(resource.file_exists());
    }
}
