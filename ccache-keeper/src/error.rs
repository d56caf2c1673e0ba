//! Keeper errors.

use thiserror::Error;

use crate::authority::ErrorCode;

/// Result type for keeper operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A library call returned a non-zero code.
    #[error("kerberos error ({call}): {message}")]
    Authority {
        call: &'static str,
        code: ErrorCode,
        message: String,
    },

    #[error("invalid principal: {0}")]
    InvalidPrincipal(String),

    /// The library session could not be created.
    #[error("kerberos context is not initialized")]
    Disabled,

    #[error("{0}")]
    Config(#[from] ccache_keeper_config::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The library reported that the thing asked for doesn't exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Authority { code, .. } if code.is_not_found())
    }

    /// Name of the failed library call, if any.
    pub fn call(&self) -> Option<&'static str> {
        match self {
            Self::Authority { call, .. } => Some(*call),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authority_error_display() {
        let err = Error::Authority {
            call: "krb5_cc_store_cred",
            code: ErrorCode::CC_WRITE,
            message: "Error writing to credentials cache".into(),
        };
        assert_eq!(
            err.to_string(),
            "kerberos error (krb5_cc_store_cred): Error writing to credentials cache"
        );
        assert_eq!(err.call(), Some("krb5_cc_store_cred"));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_not_found() {
        let err = Error::Authority {
            call: "krb5_cc_get_principal",
            code: ErrorCode::FCC_NOFILE,
            message: "No credentials cache found".into(),
        };
        assert!(err.is_not_found());
        assert!(!Error::Disabled.is_not_found());
        assert_eq!(Error::Disabled.call(), None);
    }
}
