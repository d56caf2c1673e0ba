//! Process environment shared with the Kerberos library.

use std::env;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// Credential cache the library picks when none is named.
pub const KRB5CCNAME: &str = "KRB5CCNAME";

static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Set a variable for the whole process. Readers and writers going through
/// this module never see each other halfway.
pub fn export(key: &str, value: &str) {
    let _lock = ENV_LOCK.lock();
    env::set_var(key, value);
}

pub fn var(key: &str) -> Option<String> {
    let _lock = ENV_LOCK.lock();
    env::var(key).ok()
}
