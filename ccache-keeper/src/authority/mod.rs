//! Contract with the Kerberos library.
//!
//! The keeper never talks to a KDC or touches key material itself. Everything
//! cryptographic or protocol related goes through [`Krb5Context`], which mirrors
//! the handful of libkrb5 entry points the keeper needs. Values crossing the
//! boundary are plain Rust values; files, cursors and sessions are opaque handles
//! owned by the library.

#[cfg(any(test, feature = "testing"))]
pub mod memory;
#[cfg(all(unix, feature = "krb5"))]
pub mod system;

#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryKrb5;
#[cfg(all(unix, feature = "krb5"))]
pub use system::SystemKrb5;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::Error;

/// Seconds since the Unix epoch, as used for ticket times.
pub type Timestamp = i64;

/// Name component of every ticket-granting service principal.
pub const TGS_NAME: &str = "krbtgt";

/// User or host principal.
pub const KRB5_NT_PRINCIPAL: i32 = 1;
/// Service and other unique instance, `krbtgt` included.
pub const KRB5_NT_SRV_INST: i32 = 2;

/// Ticket may be renewed.
pub const TKT_FLG_RENEWABLE: u32 = 0x0080_0000;
/// Ticket was issued from a key, not from another ticket.
pub const TKT_FLG_INITIAL: u32 = 0x0040_0000;

/// Error code returned by the library. Zero is never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    pub const ENOENT: ErrorCode = ErrorCode(2);
    pub const EINVAL: ErrorCode = ErrorCode(22);
    pub const KDC_ERR_C_PRINCIPAL_UNKNOWN: ErrorCode = ErrorCode(-1765328378);
    pub const KDC_ERR_BADOPTION: ErrorCode = ErrorCode(-1765328371);
    pub const AP_ERR_TKT_EXPIRED: ErrorCode = ErrorCode(-1765328352);
    pub const CC_BADNAME: ErrorCode = ErrorCode(-1765328245);
    pub const CC_NOTFOUND: ErrorCode = ErrorCode(-1765328243);
    pub const KT_NOTFOUND: ErrorCode = ErrorCode(-1765328203);
    pub const KT_END: ErrorCode = ErrorCode(-1765328202);
    pub const FCC_NOFILE: ErrorCode = ErrorCode(-1765328189);
    pub const FCC_INTERNAL: ErrorCode = ErrorCode(-1765328188);
    pub const CC_WRITE: ErrorCode = ErrorCode(-1765328187);
    pub const CC_FORMAT: ErrorCode = ErrorCode(-1765328185);

    /// The library could not find what was asked for.
    pub fn is_not_found(&self) -> bool {
        matches!(
            *self,
            Self::CC_NOTFOUND | Self::FCC_NOFILE | Self::KT_NOTFOUND | Self::KT_END
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kerberos principal name: `component[/component...]@REALM`.
///
/// The name type travels with the name but, as in the library's own
/// comparison, plays no part in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalName {
    components: Vec<String>,
    realm: String,
    #[serde(default = "default_name_type")]
    name_type: i32,
}

fn default_name_type() -> i32 {
    KRB5_NT_PRINCIPAL
}

impl PrincipalName {
    /// Name with the type the library would infer for it.
    pub fn new<I, S>(components: I, realm: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let components: Vec<String> = components.into_iter().map(Into::into).collect();
        let name_type = if components.len() == 2 && components[0] == TGS_NAME {
            KRB5_NT_SRV_INST
        } else {
            KRB5_NT_PRINCIPAL
        };

        Self {
            components,
            realm: realm.into(),
            name_type,
        }
    }

    pub fn with_name_type(mut self, name_type: i32) -> Self {
        self.name_type = name_type;
        self
    }

    /// Ticket-granting service principal for a realm: `krbtgt/REALM@REALM`.
    pub fn tgs(realm: &str) -> Self {
        Self::new([TGS_NAME, realm], realm)
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn name_type(&self) -> i32 {
        self.name_type
    }
}

impl PartialEq for PrincipalName {
    fn eq(&self, other: &Self) -> bool {
        self.components == other.components && self.realm == other.realm
    }
}

impl Eq for PrincipalName {}

impl Hash for PrincipalName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.components.hash(state);
        self.realm.hash(state);
    }
}

impl fmt::Display for PrincipalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.components.join("/"), self.realm)
    }
}

impl FromStr for PrincipalName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, realm) = s
            .rsplit_once('@')
            .ok_or_else(|| Error::InvalidPrincipal(s.to_string()))?;

        if name.is_empty() || realm.is_empty() || name.split('/').any(str::is_empty) {
            return Err(Error::InvalidPrincipal(s.to_string()));
        }

        Ok(Self::new(name.split('/'), realm))
    }
}

/// Ticket validity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TicketTimes {
    pub auth_time: Timestamp,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub renew_till: Timestamp,
}

/// Credentials as handed out by the library.
#[derive(Clone)]
pub struct CredsData {
    pub client: PrincipalName,
    pub server: PrincipalName,
    pub times: TicketTimes,
    pub flags: u32,
    pub enctype: i32,
    pub session_key: Zeroizing<Vec<u8>>,
    pub ticket: Vec<u8>,
}

impl CredsData {
    pub fn is_renewable(&self) -> bool {
        self.flags & TKT_FLG_RENEWABLE != 0
    }
}

impl fmt::Debug for CredsData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredsData")
            .field("client", &self.client)
            .field("server", &self.server)
            .field("times", &self.times)
            .field("flags", &format_args!("{:#010x}", self.flags))
            .field("enctype", &self.enctype)
            .field("ticket_len", &self.ticket.len())
            .finish_non_exhaustive()
    }
}

/// One keytab record.
#[derive(Clone)]
pub struct KeytabEntry {
    pub principal: PrincipalName,
    pub kvno: u32,
    pub enctype: i32,
    pub key: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for KeytabEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeytabEntry")
            .field("principal", &self.principal)
            .field("kvno", &self.kvno)
            .field("enctype", &self.enctype)
            .finish_non_exhaustive()
    }
}

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, PartialEq, Eq, Hash)]
        pub struct $name(u64);

        impl $name {
            pub fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub fn as_raw(&self) -> u64 {
                self.0
            }
        }
    };
}

handle!(
    /// Open keytab.
    KeytabHandle
);
handle!(
    /// Sequential read position inside a keytab.
    KeytabCursor
);
handle!(
    /// Open credential cache.
    CcacheHandle
);

/// The Kerberos library: creates sessions.
pub trait Krb5: Send + Sync {
    /// `krb5_init_context`. Dropping the returned session frees it.
    fn init_context(&self) -> Result<Box<dyn Krb5Context>, ErrorCode>;
}

/// One library session (`krb5_context`) and the calls made through it.
pub trait Krb5Context: Send + Sync {
    fn error_message(&self, code: ErrorCode) -> String;
    fn timeofday(&self) -> Result<Timestamp, ErrorCode>;
    fn timestamp_to_string(&self, timestamp: Timestamp) -> Result<String, ErrorCode>;

    fn copy_principal(&self, principal: &PrincipalName) -> Result<PrincipalName, ErrorCode>;
    fn build_tgs_principal(&self, realm: &str) -> Result<PrincipalName, ErrorCode>;

    fn kt_default_name(&self) -> Result<String, ErrorCode>;
    fn kt_resolve(&self, name: &str) -> Result<KeytabHandle, ErrorCode>;
    fn kt_close(&self, keytab: KeytabHandle) -> Result<(), ErrorCode>;
    fn kt_start_seq_get(&self, keytab: &KeytabHandle) -> Result<KeytabCursor, ErrorCode>;
    fn kt_next_entry(
        &self,
        keytab: &KeytabHandle,
        cursor: &mut KeytabCursor,
    ) -> Result<KeytabEntry, ErrorCode>;
    fn kt_end_seq_get(&self, keytab: &KeytabHandle, cursor: KeytabCursor)
        -> Result<(), ErrorCode>;

    /// Initial credentials for `client` using its key from `keytab`,
    /// without pre-authentication options.
    fn get_init_creds_keytab(
        &self,
        client: &PrincipalName,
        keytab: &KeytabHandle,
    ) -> Result<CredsData, ErrorCode>;

    /// Renew the ticket-granting ticket of `client` found in `ccache`.
    fn get_renewed_creds(
        &self,
        client: &PrincipalName,
        ccache: &CcacheHandle,
    ) -> Result<CredsData, ErrorCode>;

    fn cc_default_name(&self) -> Result<String, ErrorCode>;
    fn cc_resolve(&self, name: &str) -> Result<CcacheHandle, ErrorCode>;
    fn cc_initialize(
        &self,
        ccache: &CcacheHandle,
        principal: &PrincipalName,
    ) -> Result<(), ErrorCode>;
    fn cc_store_cred(&self, ccache: &CcacheHandle, creds: &CredsData) -> Result<(), ErrorCode>;
    fn cc_retrieve_cred(
        &self,
        ccache: &CcacheHandle,
        client: &PrincipalName,
        server: &PrincipalName,
    ) -> Result<CredsData, ErrorCode>;
    fn cc_get_principal(&self, ccache: &CcacheHandle) -> Result<PrincipalName, ErrorCode>;
    fn cc_close(&self, ccache: CcacheHandle) -> Result<(), ErrorCode>;
    fn cc_destroy(&self, ccache: CcacheHandle) -> Result<(), ErrorCode>;
}
