//! Keytab: the service's long-term keys.

use ccache_keeper_config::{keys, Variables};
use tracing::debug;

use crate::authority::KeytabHandle;
use crate::context::AuthContext;
use crate::creds::Creds;
use crate::error::Result;
use crate::file::{FileResource, Location};
use crate::principal::Principal;

/// Open keytab.
#[derive(Debug)]
pub struct Keytab {
    context: AuthContext,
    resource: FileResource,
    handle: KeytabHandle,
}

impl Location for Keytab {
    const KIND: &'static str = "keytab";

    fn default_name(context: &AuthContext) -> Result<String> {
        context.check(context.session().kt_default_name(), "krb5_kt_default_name")
    }

    /// `kerberos/keytab`, or `<progpath>/keytab`.
    fn config_name(variables: &dyn Variables) -> String {
        let progpath = variables.variable(keys::SYSTEM_PROGPATH, ".");
        variables.variable(keys::KERBEROS_KEYTAB, &format!("{}/keytab", progpath))
    }
}

impl Keytab {
    pub fn open(
        context: &AuthContext,
        variables: &dyn Variables,
        explicit: Option<&str>,
    ) -> Result<Self> {
        let resource = FileResource::resolve::<Self>(context, variables, explicit)?;
        let handle = context.check(
            context.session().kt_resolve(resource.name()),
            "krb5_kt_resolve",
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

    /// Principal of the first keytab entry.
    pub fn principal(&self) -> Result<Principal> {
        let session = self.context.session();

        let mut cursor = self.context.check(
            session.kt_start_seq_get(&self.handle),
            "krb5_kt_start_seq_get",
        )?;

        let entry = self.context.check(
            session.kt_next_entry(&self.handle, &mut cursor),
            "krb5_kt_next_entry",
        );

        // The entry stays good even if the cursor can't be closed.
        if let Err(code) = session.kt_end_seq_get(&self.handle, cursor) {
            self.context.report_error(code, "krb5_kt_end_seq_get");
        }

        let entry = entry?;
        debug!(
            "[kerberos] keytab \"{}\" principal {} (kvno {})",
            self.name(),
            entry.principal,
            entry.kvno
        );

        Principal::copy(&self.context, &entry.principal)
    }

    /// Fresh credentials for the keytab's principal.
    pub fn creds(&self) -> Result<Creds> {
        let principal = self.principal()?;
        let data = self.context.check(
            self.context
                .session()
                .get_init_creds_keytab(principal.name(), &self.handle),
            "krb5_get_init_creds_keytab",
        )?;

        Ok(Creds::new(&self.context, data))
    }
}

impl Drop for Keytab {
    fn drop(&mut self) {
        let handle = KeytabHandle::from_raw(self.handle.as_raw());
        if let Err(code) = self.context.session().kt_close(handle) {
            self.context.report_error(code, "krb5_kt_close");
        }
    }
}
