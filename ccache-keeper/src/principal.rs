use std::fmt;

use crate::authority::PrincipalName;
use crate::context::AuthContext;
use crate::error::Result;

/// Client or server identity, copied out of the library.
#[derive(Debug, Clone)]
pub struct Principal {
    context: AuthContext,
    name: PrincipalName,
}

impl Principal {
    /// Copy a principal handed out by the library.
    pub fn copy(context: &AuthContext, name: &PrincipalName) -> Result<Self> {
        let name = context.check(
            context.session().copy_principal(name),
            "krb5_copy_principal",
        )?;

        Ok(Self {
            context: context.clone(),
            name,
        })
    }

    /// Ticket-granting service principal of `realm`.
    pub fn tgs(context: &AuthContext, realm: &str) -> Result<Self> {
        let name = context.check(
            context.session().build_tgs_principal(realm),
            "krb5_build_principal_ext",
        )?;

        Ok(Self {
            context: context.clone(),
            name,
        })
    }

    pub fn realm(&self) -> &str {
        self.name.realm()
    }

    /// Name to pass back into library calls.
    pub fn name(&self) -> &PrincipalName {
        &self.name
    }

    pub fn context(&self) -> &AuthContext {
        &self.context
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.name, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{ErrorCode, MemoryKrb5};

    #[test]
    fn test_copy() {
        let krb5 = MemoryKrb5::new();
        let context = AuthContext::init(&krb5).unwrap();
        let name: PrincipalName = "alice@EXAMPLE.COM".parse().unwrap();

        let principal = Principal::copy(&context, &name).unwrap();
        assert_eq!(principal.realm(), "EXAMPLE.COM");
        assert_eq!(principal.name(), &name);
        assert_eq!(principal.to_string(), "alice@EXAMPLE.COM");
    }

    #[test]
    fn test_copy_failure() {
        let krb5 = MemoryKrb5::new();
        krb5.fail("krb5_copy_principal", ErrorCode::EINVAL);
        let context = AuthContext::init(&krb5).unwrap();
        let name: PrincipalName = "alice@EXAMPLE.COM".parse().unwrap();

        let err = Principal::copy(&context, &name).unwrap_err();
        assert_eq!(err.call(), Some("krb5_copy_principal"));
    }

    #[test]
    fn test_tgs() {
        let krb5 = MemoryKrb5::new();
        let context = AuthContext::init(&krb5).unwrap();

        let tgs = Principal::tgs(&context, "EXAMPLE.COM").unwrap();
        assert_eq!(tgs.to_string(), "krbtgt/EXAMPLE.COM@EXAMPLE.COM");
        assert!(Principal::tgs(&context, "").is_err());
    }
}
