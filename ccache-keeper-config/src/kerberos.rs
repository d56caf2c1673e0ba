//! `[kerberos]` section.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kerberos file overrides used when running as a managed service.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Kerberos {
    /// Keytab with the service's long-term keys.
    /// Default: `<system.progpath>/keytab`
    pub keytab: Option<PathBuf>,

    /// Directory holding the credential cache.
    /// Default: `<system.progpath>`. The cache file is `krb5cc_<system.progname>`.
    pub ccache: Option<PathBuf>,
}
