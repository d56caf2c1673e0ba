//! Keeps one credential cache filled from one keytab.

use std::fmt;

use ccache_keeper_config::Variables;
use parking_lot::ReentrantMutex;
use tracing::{debug, info, warn};

use crate::ccache::Ccache;
use crate::context::AuthContext;
use crate::creds::{Creds, TicketState};
use crate::error::Result;
use crate::keytab::Keytab;

/// What a manager call did to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// New ticket from the keytab.
    Created,
    /// Cached ticket renewed.
    Renewed,
    /// Cached ticket couldn't be used or renewed, replaced from the keytab.
    Reinitialized,
    /// Cached ticket still valid.
    Unchanged,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = match self {
            Self::Created => "created",
            Self::Renewed => "renewed",
            Self::Reinitialized => "reinitialized",
            Self::Unchanged => "unchanged",
        };
        write!(f, "{}", outcome)
    }
}

/// Explicit keytab and cache locations. Unset ones are resolved from the
/// run mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Locations {
    pub keytab: Option<String>,
    pub ccache: Option<String>,
}

/// Cached ticket as seen right now.
#[derive(Debug)]
pub struct Status {
    pub principal: String,
    pub state: TicketState,
    /// Seconds until the ticket expires.
    pub remaining: u64,
    pub creds: Creds,
}

pub struct CredentialManager {
    lock: ReentrantMutex<()>,
    context: AuthContext,
    keytab: Keytab,
    ccache: Ccache,
}

impl CredentialManager {
    pub fn new(
        context: &AuthContext,
        variables: &dyn Variables,
        locations: &Locations,
    ) -> Result<Self> {
        let keytab = Keytab::open(context, variables, locations.keytab.as_deref())?;
        let ccache = Ccache::open(context, variables, locations.ccache.as_deref())?;

        info!(
            "[kerberos] keytab \"{}\", credential cache \"{}\" (run mode: {})",
            keytab.name(),
            ccache.name(),
            ccache.resource().run_mode()
        );

        Ok(Self {
            lock: ReentrantMutex::new(()),
            context: context.clone(),
            keytab,
            ccache,
        })
    }

    pub fn keytab(&self) -> &Keytab {
        &self.keytab
    }

    pub fn ccache(&self) -> &Ccache {
        &self.ccache
    }

    pub fn context(&self) -> &AuthContext {
        &self.context
    }

    /// Replace whatever is cached with a new ticket from the keytab.
    pub fn ensure_fresh_ticket(&self) -> Result<Outcome> {
        let _lock = self.lock.lock();

        let principal = self.keytab.principal()?;
        let creds = self.keytab.creds()?;
        self.ccache.create(&principal, &creds)?;

        info!(
            "[kerberos] new ticket for {} in \"{}\"",
            principal,
            self.ccache.name()
        );
        self.log_ticket_window();

        Ok(Outcome::Created)
    }

    /// Renew or replace the cached ticket if it has expired.
    pub fn refresh_if_needed(&self) -> Result<Outcome> {
        let _lock = self.lock.lock();

        if !self.ccache.file_exists() {
            debug!(
                "[kerberos] credential cache \"{}\" doesn't exist",
                self.ccache.name()
            );
            return self.ensure_fresh_ticket();
        }

        let creds = self.ccache.creds()?;

        match creds.state()? {
            TicketState::Fresh => {
                debug!("[kerberos] ticket is still valid");
                Ok(Outcome::Unchanged)
            }

            TicketState::Renewable => match self.ccache.update() {
                Ok(()) => {
                    self.log_ticket_window();
                    Ok(Outcome::Renewed)
                }
                Err(err) => {
                    warn!("[kerberos] renewal failed, reinitialising: {}", err);
                    self.ensure_fresh_ticket()?;
                    Ok(Outcome::Reinitialized)
                }
            },

            TicketState::MustReinit => {
                info!("[kerberos] ticket can't be renewed anymore, reinitialising");
                self.ensure_fresh_ticket()?;
                Ok(Outcome::Reinitialized)
            }
        }
    }

    /// Principal and ticket currently in the cache.
    pub fn status(&self) -> Result<Status> {
        let principal = self.ccache.principal()?;
        let creds = self.ccache.creds()?;
        let now = self
            .context
            .check(self.context.session().timeofday(), "krb5_timeofday")?;

        Ok(Status {
            principal: principal.to_string(),
            state: creds.state_at(now),
            remaining: creds.remaining_at(now),
            creds,
        })
    }

    fn log_ticket_window(&self) {
        match self.ccache.creds() {
            Ok(creds) => info!("[kerberos] ticket window:\n{}", creds.times_info()),
            Err(err) => warn!("[kerberos] can't read back ticket: {}", err),
        }
    }
}
