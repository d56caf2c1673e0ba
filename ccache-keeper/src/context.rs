//! Shared Kerberos library session.

use std::fmt;
use std::sync::Arc;

use tracing::error;

use crate::authority::{ErrorCode, Krb5, Krb5Context};
use crate::error::{Error, Result};

/// Library session shared by every principal, ticket, keytab and cache.
///
/// Cloning is cheap; the session is freed when the last clone goes away.
#[derive(Clone)]
pub struct AuthContext {
    inner: Arc<Box<dyn Krb5Context>>,
}

impl AuthContext {
    /// Open a new library session.
    pub fn init(library: &dyn Krb5) -> Result<Self> {
        match library.init_context() {
            Ok(session) => Ok(Self {
                inner: Arc::new(session),
            }),
            Err(code) => {
                let message = format!("error code {}", code);
                error!("kerberos error (krb5_init_context): {}", message);
                Err(Error::Authority {
                    call: "krb5_init_context",
                    code,
                    message,
                })
            }
        }
    }

    /// The session, for making library calls.
    pub fn session(&self) -> &dyn Krb5Context {
        &**self.inner
    }

    /// Log a library error with the library's own message.
    pub fn report_error(&self, code: ErrorCode, call: &'static str) -> String {
        let message = self.session().error_message(code);
        error!("kerberos error ({}): {}", call, message);
        message
    }

    /// Turn a library result into a keeper result, logging failures.
    pub fn check<T>(
        &self,
        result: std::result::Result<T, ErrorCode>,
        call: &'static str,
    ) -> Result<T> {
        result.map_err(|code| {
            let message = self.report_error(code, call);
            Error::Authority {
                call,
                code,
                message,
            }
        })
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("holders", &Arc::strong_count(&self.inner))
            .finish()
    }
}
