//! Keeps a Kerberos credential cache filled with a valid ticket from a keytab.
//!
//! On every check the cached ticket is classified against the clock: still
//! valid tickets are left alone, expired but renewable ones are renewed, and
//! anything else is replaced with new credentials issued from the keytab.
//! All Kerberos work is delegated to the library behind [`authority::Krb5`].

pub mod authority;
pub mod ccache;
pub mod cli;
pub mod config;
pub mod context;
pub mod creds;
pub mod env;
pub mod error;
pub mod file;
pub mod keytab;
pub mod manager;
pub mod principal;
pub mod service;
pub mod shutdown;
pub mod util;


pub use ccache::Ccache;
pub use context::AuthContext;
pub use creds::{Creds, TicketState};
pub use error::{Error, Result};
pub use keytab::Keytab;
pub use manager::{CredentialManager, Locations, Outcome};
pub use principal::Principal;
pub use service::AuthService;
