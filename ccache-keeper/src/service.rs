//! Process-wide entry point.

use std::sync::Arc;

use ccache_keeper_config::Variables;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::authority::Krb5;
use crate::config::config;
use crate::context::AuthContext;
use crate::error::{Error, Result};
use crate::manager::{CredentialManager, Locations, Outcome, Status};

struct Installed {
    library: Box<dyn Krb5>,
    locations: Locations,
}

static INSTALLED: OnceCell<Installed> = OnceCell::new();
static INSTANCE: OnceCell<AuthService> = OnceCell::new();

/// Creates and refreshes the process's credential cache.
///
/// The process-wide instance lives in a static and is never dropped, so
/// [`AuthService::shutdown`] has to be called on the way out for the cache
/// to be released.
pub struct AuthService {
    manager: Mutex<Option<Arc<CredentialManager>>>,
}

impl AuthService {
    /// Kerberos library used by [`AuthService::instance`].
    ///
    /// Only the first call counts and it has to happen before the instance
    /// is first used. Returns `false` if it came too late.
    pub fn install(library: impl Krb5 + 'static) -> bool {
        Self::install_with(library, Locations::default())
    }

    /// Same as [`AuthService::install`], with explicit file locations.
    pub fn install_with(library: impl Krb5 + 'static, locations: Locations) -> bool {
        let installed = Installed {
            library: Box::new(library),
            locations,
        };

        if INSTALLED.set(installed).is_err() || INSTANCE.get().is_some() {
            warn!("[kerberos] service already set up, ignoring kerberos library");
            return false;
        }

        true
    }

    /// The process-wide service, built from the global configuration on first
    /// use. Disabled for good if no library was installed or it failed to start.
    pub fn instance() -> &'static AuthService {
        INSTANCE.get_or_init(|| match INSTALLED.get() {
            Some(installed) => {
                let config = config();
                Self::new(&*installed.library, &*config, &installed.locations)
            }
            None => {
                error!("[kerberos] no kerberos library installed, service disabled");
                Self::disabled()
            }
        })
    }

    /// Standalone service. Disabled if the library or the files can't be opened.
    pub fn new(library: &dyn Krb5, variables: &dyn Variables, locations: &Locations) -> Self {
        let manager = AuthContext::init(library)
            .and_then(|context| CredentialManager::new(&context, variables, locations));

        match manager {
            Ok(manager) => Self {
                manager: Mutex::new(Some(Arc::new(manager))),
            },
            Err(err) => {
                error!("[kerberos] service disabled: {}", err);
                Self::disabled()
            }
        }
    }

    fn disabled() -> Self {
        Self {
            manager: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.manager.lock().is_some()
    }

    pub fn manager(&self) -> Result<Arc<CredentialManager>> {
        self.manager.lock().clone().ok_or(Error::Disabled)
    }

    /// Release the keytab and the cache. A managed service's cache is
    /// destroyed once calls already running have returned. The service is
    /// disabled afterwards.
    pub fn shutdown(&self) {
        let manager = self.manager.lock().take();
        if let Some(manager) = manager {
            info!(
                "[kerberos] releasing credential cache \"{}\"",
                manager.ccache().name()
            );
        }
    }

    /// Put a new ticket from the keytab into the cache.
    pub fn create_ccache(&self) -> bool {
        self.manager()
            .and_then(|manager| manager.ensure_fresh_ticket())
            .is_ok()
    }

    /// Make sure the cache holds a usable ticket, renewing or replacing it
    /// as needed.
    pub fn update_ccache(&self) -> bool {
        self.refresh().is_ok()
    }

    pub fn refresh(&self) -> Result<Outcome> {
        self.manager()?.refresh_if_needed()
    }

    pub fn status(&self) -> Result<Status> {
        self.manager()?.status()
    }
}
