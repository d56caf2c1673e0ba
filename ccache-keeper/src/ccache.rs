//! Credential cache.

use ccache_keeper_config::{keys, RunMode, Variables};
use tracing::{debug, info};

use crate::authority::CcacheHandle;
use crate::context::AuthContext;
use crate::creds::Creds;
use crate::env::{self, KRB5CCNAME};
use crate::error::Result;
use crate::file::{FileResource, Location};
use crate::principal::Principal;

/// Open credential cache.
///
/// Opening one points `KRB5CCNAME` at it for the whole process. A managed
/// service destroys its cache when this is dropped, a manual run leaves the
/// cache on disk for the next one.
#[derive(Debug)]
pub struct Ccache {
    context: AuthContext,
    resource: FileResource,
    handle: CcacheHandle,
}

impl Location for Ccache {
    const KIND: &'static str = "credential cache";

    fn default_name(context: &AuthContext) -> Result<String> {
        context.check(context.session().cc_default_name(), "krb5_cc_default_name")
    }

    /// `<kerberos/ccache>/krb5cc_<progname>`, the directory defaulting to `progpath`.
    fn config_name(variables: &dyn Variables) -> String {
        let progpath = variables.variable(keys::SYSTEM_PROGPATH, ".");
        let dir = variables.variable(keys::KERBEROS_CCACHE, &progpath);
        let progname = variables.variable(keys::SYSTEM_PROGNAME, "ccache-keeper");
        format!("{}/krb5cc_{}", dir, progname)
    }
}

impl Ccache {
    pub fn open(
        context: &AuthContext,
        variables: &dyn Variables,
        explicit: Option<&str>,
    ) -> Result<Self> {
        let resource = FileResource::resolve::<Self>(context, variables, explicit)?;
        env::export(KRB5CCNAME, resource.name());

        let handle = context.check(
            context.session().cc_resolve(resource.name()),
            "krb5_cc_resolve",
        )?;

        Ok(Self {
            context: context.clone(),
            resource,
            handle,
        })
    }

    pub fn name(&self) -> &str {
        self.resource.name()
    }

    pub fn resource(&self) -> &FileResource {
        &self.resource
    }

    pub fn file_exists(&self) -> bool {
        self.resource.file_exists()
    }

    /// Start the cache over for `principal` and store `creds` in it.
    ///
    /// If storing fails the cache stays initialized and empty.
    pub fn create(&self, principal: &Principal, creds: &Creds) -> Result<()> {
        let session = self.context.session();

        self.context.check(
            session.cc_initialize(&self.handle, principal.name()),
            "krb5_cc_initialize",
        )?;
        self.context.check(
            session.cc_store_cred(&self.handle, creds.data()),
            "krb5_cc_store_cred",
        )?;

        debug!("[kerberos] stored ticket for {} in \"{}\"", principal, self.name());
        Ok(())
    }

    /// Renew the cached ticket and store the renewed one.
    ///
    /// Fails without asking for a renewal if the cache has no principal or
    /// no ticket.
    pub fn update(&self) -> Result<()> {
        let principal = self.principal()?;
        self.creds()?;

        let renewed = self.context.check(
            self.context
                .session()
                .get_renewed_creds(principal.name(), &self.handle),
            "krb5_get_renewed_creds",
        )?;

        self.create(&principal, &Creds::new(&self.context, renewed))?;
        info!("[kerberos] renewed ticket for {}", principal);

        Ok(())
    }

    /// Ticket-granting ticket of the cache's principal.
    pub fn creds(&self) -> Result<Creds> {
        let client = self.principal()?;
        let server = Principal::tgs(&self.context, client.realm())?;

        let data = self.context.check(
            self.context
                .session()
                .cc_retrieve_cred(&self.handle, client.name(), server.name()),
            "krb5_cc_retrieve_cred",
        )?;

        Ok(Creds::new(&self.context, data))
    }

    pub fn principal(&self) -> Result<Principal> {
        let name = self.context.check(
            self.context.session().cc_get_principal(&self.handle),
            "krb5_cc_get_principal",
        )?;

        Principal::copy(&self.context, &name)
    }
}

impl Drop for Ccache {
    fn drop(&mut self) {
        let handle = CcacheHandle::from_raw(self.handle.as_raw());
        let session = self.context.session();

        let (result, call) = match self.resource.run_mode() {
            RunMode::Service => (session.cc_destroy(handle), "krb5_cc_destroy"),
            RunMode::Manual => (session.cc_close(handle), "krb5_cc_close"),
        };

        if let Err(code) = result {
            self.context.report_error(code, call);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{ErrorCode, MemoryKrb5, PrincipalName};
    use crate::creds::TicketState;
    use crate::keytab::Keytab;
    use std::collections::HashMap;
    use std::path::Path;

    const KEYTAB: &str = "/etc/app/app.keytab";

    struct Fixture {
        krb5: MemoryKrb5,
        context: AuthContext,
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let krb5 = MemoryKrb5::new();
            krb5.set_time(1_000_000);
            krb5.set_lifetimes(3600, 7 * 24 * 3600);
            krb5.add_keytab_entry(KEYTAB, "alice@EXAMPLE.COM".parse().unwrap());
            let context = AuthContext::init(&krb5).unwrap();

            Self {
                krb5,
                context,
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn cache_name(&self) -> String {
            format!("FILE:{}", self.dir.path().join("krb5cc_test").display())
        }

        fn ccache(&self) -> Ccache {
            Ccache::open(&self.context, &HashMap::new(), Some(&self.cache_name())).unwrap()
        }

        fn keytab(&self) -> Keytab {
            Keytab::open(&self.context, &HashMap::new(), Some(KEYTAB)).unwrap()
        }

        fn cache_path(&self) -> std::path::PathBuf {
            self.dir.path().join("krb5cc_test")
        }
    }

    fn service_vars(dir: &Path) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert(keys::SYSTEM_TYPE.to_string(), "service".to_string());
        vars.insert(keys::SYSTEM_PROGNAME.to_string(), "app".to_string());
        vars.insert(
            keys::KERBEROS_CCACHE.to_string(),
            dir.display().to_string(),
        );
        vars
    }

    #[test]
    fn test_config_name() {
        let mut vars = HashMap::new();
        vars.insert(keys::SYSTEM_PROGPATH.to_string(), "/opt/app".to_string());
        vars.insert(keys::SYSTEM_PROGNAME.to_string(), "app".to_string());
        assert_eq!(Ccache::config_name(&vars), "/opt/app/krb5cc_app");

        vars.insert(keys::KERBEROS_CCACHE.to_string(), "/run/app".to_string());
        assert_eq!(Ccache::config_name(&vars), "/run/app/krb5cc_app");
    }

    #[test]
    fn test_open_exports_name() {
        let fixture = Fixture::new();
        let ccache = fixture.ccache();
        assert!(env::var(KRB5CCNAME).is_some());
        assert_eq!(ccache.name(), fixture.cache_name());
        assert!(!ccache.file_exists());
    }

    #[test]
    fn test_create_and_read_back() {
        let fixture = Fixture::new();
        let ccache = fixture.ccache();
        let keytab = fixture.keytab();

        let principal = keytab.principal().unwrap();
        let creds = keytab.creds().unwrap();
        ccache.create(&principal, &creds).unwrap();

        assert!(ccache.file_exists());
        assert_eq!(ccache.principal().unwrap().to_string(), "alice@EXAMPLE.COM");

        let cached = ccache.creds().unwrap();
        assert_eq!(cached.end_time(), creds.end_time());
        assert_eq!(
            cached.data().server,
            PrincipalName::tgs("EXAMPLE.COM")
        );
        assert_eq!(cached.state().unwrap(), TicketState::Fresh);
    }

    #[test]
    fn test_store_failure_leaves_initialized_cache() {
        let fixture = Fixture::new();
        let ccache = fixture.ccache();
        let keytab = fixture.keytab();
        fixture.krb5.fail("krb5_cc_store_cred", ErrorCode::CC_WRITE);

        let principal = keytab.principal().unwrap();
        let creds = keytab.creds().unwrap();
        let err = ccache.create(&principal, &creds).unwrap_err();
        assert_eq!(err.call(), Some("krb5_cc_store_cred"));

        assert!(ccache.file_exists());
        assert!(ccache.principal().is_ok());
        assert!(ccache.creds().unwrap_err().is_not_found());
    }

    #[test]
    fn test_update_renews() {
        let fixture = Fixture::new();
        let ccache = fixture.ccache();
        let keytab = fixture.keytab();
        ccache
            .create(&keytab.principal().unwrap(), &keytab.creds().unwrap())
            .unwrap();

        fixture.krb5.advance(4000);
        assert_eq!(ccache.creds().unwrap().state().unwrap(), TicketState::Renewable);

        ccache.update().unwrap();
        let renewed = ccache.creds().unwrap();
        assert_eq!(renewed.start_time(), 1_004_000);
        assert_eq!(renewed.state().unwrap(), TicketState::Fresh);
        assert_eq!(fixture.krb5.calls("krb5_get_renewed_creds"), 1);
    }

    #[test]
    fn test_update_without_cache_skips_renewal() {
        let fixture = Fixture::new();
        let ccache = fixture.ccache();

        let err = ccache.update().unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(fixture.krb5.calls("krb5_get_renewed_creds"), 0);
    }

    #[test]
    fn test_update_without_ticket_skips_renewal() {
        let fixture = Fixture::new();
        let ccache = fixture.ccache();
        let keytab = fixture.keytab();
        fixture.krb5.fail("krb5_cc_store_cred", ErrorCode::CC_WRITE);
        let _ = ccache.create(&keytab.principal().unwrap(), &keytab.creds().unwrap());
        fixture.krb5.clear_failure("krb5_cc_store_cred");

        assert!(ccache.update().is_err());
        assert_eq!(fixture.krb5.calls("krb5_get_renewed_creds"), 0);
    }

    #[test]
    fn test_renewal_failure_is_terminal() {
        let fixture = Fixture::new();
        let ccache = fixture.ccache();
        let keytab = fixture.keytab();
        ccache
            .create(&keytab.principal().unwrap(), &keytab.creds().unwrap())
            .unwrap();
        fixture.krb5.reset_calls();
        fixture
            .krb5
            .fail("krb5_get_renewed_creds", ErrorCode::KDC_ERR_BADOPTION);

        let err = ccache.update().unwrap_err();
        assert_eq!(err.call(), Some("krb5_get_renewed_creds"));
        assert_eq!(fixture.krb5.calls("krb5_cc_initialize"), 0);
        assert_eq!(fixture.krb5.calls("krb5_get_init_creds_keytab"), 0);
    }

    #[test]
    fn test_manual_drop_keeps_cache() {
        let fixture = Fixture::new();
        let ccache = fixture.ccache();
        let keytab = fixture.keytab();
        ccache
            .create(&keytab.principal().unwrap(), &keytab.creds().unwrap())
            .unwrap();

        drop(ccache);
        assert!(fixture.cache_path().exists());
        assert_eq!(fixture.krb5.calls("krb5_cc_close"), 1);
        assert_eq!(fixture.krb5.calls("krb5_cc_destroy"), 0);
    }

    #[test]
    fn test_service_drop_destroys_cache() {
        let fixture = Fixture::new();
        let vars = service_vars(fixture.dir.path());
        let ccache = Ccache::open(&fixture.context, &vars, None).unwrap();
        let keytab = fixture.keytab();
        ccache
            .create(&keytab.principal().unwrap(), &keytab.creds().unwrap())
            .unwrap();

        let path = fixture.dir.path().join("krb5cc_app");
        assert_eq!(ccache.name(), path.display().to_string());
        assert!(path.exists());

        drop(ccache);
        assert!(!path.exists());
        assert_eq!(fixture.krb5.calls("krb5_cc_destroy"), 1);
    }
}
