//! In-process Kerberos library.
//!
//! Keytabs live in memory and the library acts as its own KDC: initial
//! credentials are issued to any principal found in the keytab, renewals are
//! honored until `renew_till`. Credential caches named `MEMORY:<name>` are kept
//! in memory, any other name (with or without a `FILE:` prefix) is a file
//! holding a JSON document.
//!
//! Tests drive it through a settable clock, per-call failure injection,
//! call counters, an ordered log of mutating calls and a gauge of
//! concurrently running ones.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use super::{
    CcacheHandle, CredsData, ErrorCode, KeytabCursor, KeytabEntry, KeytabHandle, Krb5,
    Krb5Context, PrincipalName, TicketTimes, Timestamp, TKT_FLG_INITIAL, TKT_FLG_RENEWABLE,
};

const DEFAULT_TICKET_LIFETIME: i64 = 10 * 3600;
const DEFAULT_RENEW_LIFETIME: i64 = 7 * 24 * 3600;
const ENCTYPE_AES256_CTS: i32 = 18;

/// Calls that issue tickets or write caches.
const MUTATING_CALLS: &[&str] = &[
    "krb5_get_init_creds_keytab",
    "krb5_get_renewed_creds",
    "krb5_cc_initialize",
    "krb5_cc_store_cred",
    "krb5_cc_destroy",
];

/// Kerberos library kept entirely inside the process.
#[derive(Clone, Default)]
pub struct MemoryKrb5 {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    calls: Mutex<HashMap<&'static str, usize>>,
    log: Mutex<Vec<(ThreadId, &'static str)>>,
    failures: Mutex<HashMap<&'static str, ErrorCode>>,
    init_failure: Mutex<Option<ErrorCode>>,
    delay: Mutex<Option<Duration>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    contexts: AtomicUsize,
}

struct State {
    keytabs: HashMap<String, Vec<KeytabEntry>>,
    memory_caches: HashMap<String, StoredCache>,
    keytab_handles: HashMap<u64, String>,
    ccache_handles: HashMap<u64, Location>,
    cursors: HashMap<u64, usize>,
    next_id: u64,
    issued: u64,
    clock: Option<Timestamp>,
    ticket_lifetime: i64,
    renew_lifetime: i64,
    default_keytab: String,
    default_ccache: String,
}

impl Default for State {
    fn default() -> Self {
        Self {
            keytabs: HashMap::new(),
            memory_caches: HashMap::new(),
            keytab_handles: HashMap::new(),
            ccache_handles: HashMap::new(),
            cursors: HashMap::new(),
            next_id: 1,
            issued: 0,
            clock: None,
            ticket_lifetime: DEFAULT_TICKET_LIFETIME,
            renew_lifetime: DEFAULT_RENEW_LIFETIME,
            default_keytab: "FILE:/etc/krb5.keytab".to_string(),
            default_ccache: "FILE:/tmp/krb5cc_keeper".to_string(),
        }
    }
}

impl State {
    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn now(&self) -> Timestamp {
        self.clock.unwrap_or_else(|| Utc::now().timestamp())
    }

    fn issue(&mut self, client: &PrincipalName, times: TicketTimes) -> CredsData {
        self.issued += 1;
        let renewable = times.renew_till > times.end_time;

        CredsData {
            client: client.clone(),
            server: PrincipalName::tgs(client.realm()),
            times,
            flags: TKT_FLG_INITIAL | if renewable { TKT_FLG_RENEWABLE } else { 0 },
            enctype: ENCTYPE_AES256_CTS,
            session_key: Zeroizing::new(format!("session-key-{}", self.issued).into_bytes()),
            ticket: format!("tgt:{}:{}", client, self.issued).into_bytes(),
        }
    }

    fn load(&self, location: &Location) -> Result<Option<StoredCache>, ErrorCode> {
        match location {
            Location::Memory(name) => Ok(self.memory_caches.get(name).cloned()),
            Location::File(path) => match fs::read_to_string(path) {
                Ok(raw) => serde_json::from_str(&raw)
                    .map(Some)
                    .map_err(|_| ErrorCode::CC_FORMAT),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
                Err(_) => Err(ErrorCode::FCC_INTERNAL),
            },
        }
    }

    fn load_existing(&self, location: &Location) -> Result<StoredCache, ErrorCode> {
        self.load(location)?.ok_or(ErrorCode::FCC_NOFILE)
    }

    fn save(&mut self, location: &Location, cache: StoredCache) -> Result<(), ErrorCode> {
        match location {
            Location::Memory(name) => {
                self.memory_caches.insert(name.clone(), cache);
                Ok(())
            }
            Location::File(path) => {
                let raw = serde_json::to_string(&cache).map_err(|_| ErrorCode::CC_FORMAT)?;
                fs::write(path, raw).map_err(|_| ErrorCode::CC_WRITE)
            }
        }
    }

    fn remove(&mut self, location: &Location) -> Result<(), ErrorCode> {
        match location {
            Location::Memory(name) => self
                .memory_caches
                .remove(name)
                .map(|_| ())
                .ok_or(ErrorCode::FCC_NOFILE),
            Location::File(path) => fs::remove_file(path).map_err(|err| match err.kind() {
                ErrorKind::NotFound => ErrorCode::FCC_NOFILE,
                _ => ErrorCode::FCC_INTERNAL,
            }),
        }
    }

    fn ccache(&self, handle: &CcacheHandle) -> Result<Location, ErrorCode> {
        self.ccache_handles
            .get(&handle.as_raw())
            .cloned()
            .ok_or(ErrorCode::EINVAL)
    }

    fn keytab(&self, handle: &KeytabHandle) -> Result<String, ErrorCode> {
        self.keytab_handles
            .get(&handle.as_raw())
            .cloned()
            .ok_or(ErrorCode::EINVAL)
    }
}

/// Where a credential cache lives.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    Memory(String),
    File(PathBuf),
}

impl Location {
    fn parse(name: &str) -> Result<Self, ErrorCode> {
        let location = if let Some(name) = name.strip_prefix("MEMORY:") {
            Location::Memory(name.to_string())
        } else {
            Location::File(PathBuf::from(name.strip_prefix("FILE:").unwrap_or(name)))
        };

        match &location {
            Location::Memory(name) if name.is_empty() => Err(ErrorCode::CC_BADNAME),
            Location::File(path) if path.as_os_str().is_empty() => Err(ErrorCode::CC_BADNAME),
            _ => Ok(location),
        }
    }
}

fn keytab_key(name: &str) -> String {
    name.strip_prefix("FILE:").unwrap_or(name).to_string()
}

/// Cache contents as written to disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredCache {
    principal: Option<PrincipalName>,
    creds: Vec<StoredCreds>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCreds {
    client: PrincipalName,
    server: PrincipalName,
    times: TicketTimes,
    flags: u32,
    enctype: i32,
    session_key: Vec<u8>,
    ticket: Vec<u8>,
}

impl StoredCreds {
    fn to_creds(&self) -> CredsData {
        CredsData {
            client: self.client.clone(),
            server: self.server.clone(),
            times: self.times,
            flags: self.flags,
            enctype: self.enctype,
            session_key: Zeroizing::new(self.session_key.clone()),
            ticket: self.ticket.clone(),
        }
    }
}

impl From<&CredsData> for StoredCreds {
    fn from(creds: &CredsData) -> Self {
        Self {
            client: creds.client.clone(),
            server: creds.server.clone(),
            times: creds.times,
            flags: creds.flags,
            enctype: creds.enctype,
            session_key: creds.session_key.to_vec(),
            ticket: creds.ticket.clone(),
        }
    }
}

impl Drop for StoredCreds {
    fn drop(&mut self) {
        self.session_key.zeroize();
    }
}

impl MemoryKrb5 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key for `principal` to the keytab called `keytab`.
    pub fn add_keytab_entry(&self, keytab: &str, principal: PrincipalName) {
        let mut state = self.shared.state.lock();
        let entries = state.keytabs.entry(keytab_key(keytab)).or_default();
        let kvno = entries.len() as u32 + 1;
        entries.push(KeytabEntry {
            key: Zeroizing::new(format!("long-term-key:{}:{}", principal, kvno).into_bytes()),
            principal,
            kvno,
            enctype: ENCTYPE_AES256_CTS,
        });
    }

    /// Freeze the clock at `now`.
    pub fn set_time(&self, now: Timestamp) {
        self.shared.state.lock().clock = Some(now);
    }

    /// Move the clock forward, freezing it first if it was running.
    pub fn advance(&self, seconds: i64) {
        let mut state = self.shared.state.lock();
        let now = state.now();
        state.clock = Some(now + seconds);
    }

    pub fn now(&self) -> Timestamp {
        self.shared.state.lock().now()
    }

    /// Lifetime of issued tickets and how long they can be renewed, in seconds.
    pub fn set_lifetimes(&self, ticket: i64, renew: i64) {
        let mut state = self.shared.state.lock();
        state.ticket_lifetime = ticket;
        state.renew_lifetime = renew;
    }

    pub fn set_default_names(&self, keytab: &str, ccache: &str) {
        let mut state = self.shared.state.lock();
        state.default_keytab = keytab.to_string();
        state.default_ccache = ccache.to_string();
    }

    /// Make every call to `call` fail with `code` until cleared.
    pub fn fail(&self, call: &'static str, code: ErrorCode) {
        self.shared.failures.lock().insert(call, code);
    }

    pub fn clear_failure(&self, call: &'static str) {
        self.shared.failures.lock().remove(call);
    }

    /// Make context creation fail.
    pub fn fail_init(&self, code: ErrorCode) {
        *self.shared.init_failure.lock() = Some(code);
    }

    /// Number of times `call` was made, failed calls included.
    pub fn calls(&self, call: &str) -> usize {
        self.shared.calls.lock().get(call).copied().unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        self.shared.calls.lock().clear();
        self.shared.log.lock().clear();
    }

    /// Mutating calls that got past failure injection, in the order they
    /// started, with the thread that made them.
    pub fn mutating_calls(&self) -> Vec<(ThreadId, &'static str)> {
        self.shared.log.lock().clone()
    }

    /// Hold every mutating call for `delay` before it runs.
    pub fn set_call_delay(&self, delay: Duration) {
        *self.shared.delay.lock() = Some(delay);
    }

    /// Highest number of mutating calls seen running at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.shared.max_active.load(Ordering::SeqCst)
    }

    /// Sessions created and not yet dropped.
    pub fn live_contexts(&self) -> usize {
        self.shared.contexts.load(Ordering::SeqCst)
    }

    /// Ticket-granting ticket currently stored in cache `name`, if any.
    /// Not counted as a library call.
    pub fn cached_tgt(&self, name: &str) -> Option<CredsData> {
        let location = Location::parse(name).ok()?;
        let state = self.shared.state.lock();
        let cache = state.load(&location).ok()??;
        let client = cache.principal.as_ref()?;
        let server = PrincipalName::tgs(client.realm());

        cache
            .creds
            .iter()
            .find(|creds| &creds.client == client && creds.server == server)
            .map(StoredCreds::to_creds)
    }
}

impl Krb5 for MemoryKrb5 {
    fn init_context(&self) -> Result<Box<dyn Krb5Context>, ErrorCode> {
        *self.shared.calls.lock().entry("krb5_init_context").or_default() += 1;
        if let Some(code) = *self.shared.init_failure.lock() {
            return Err(code);
        }

        self.shared.contexts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryContext {
            shared: Arc::clone(&self.shared),
        }))
    }
}

/// Session handed out by [`MemoryKrb5`].
struct MemoryContext {
    shared: Arc<Shared>,
}

/// Tracks one running library call.
struct CallGuard<'a> {
    shared: &'a Shared,
    mutating: bool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if self.mutating {
            self.shared.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl MemoryContext {
    fn enter(&self, call: &'static str) -> Result<CallGuard<'_>, ErrorCode> {
        *self.shared.calls.lock().entry(call).or_default() += 1;
        if let Some(code) = self.shared.failures.lock().get(call).copied() {
            return Err(code);
        }

        let mutating = MUTATING_CALLS.contains(&call);
        if mutating {
            self.shared.log.lock().push((thread::current().id(), call));
            let active = self.shared.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.shared.max_active.fetch_max(active, Ordering::SeqCst);

            let delay = *self.shared.delay.lock();
            if let Some(delay) = delay {
                thread::sleep(delay);
            }
        }

        Ok(CallGuard {
            shared: &self.shared,
            mutating,
        })
    }
}

impl Drop for MemoryContext {
    fn drop(&mut self) {
        self.shared.contexts.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Krb5Context for MemoryContext {
    fn error_message(&self, code: ErrorCode) -> String {
        let message = match code {
            ErrorCode::ENOENT => "No such file or directory",
            ErrorCode::EINVAL => "Invalid argument",
            ErrorCode::KDC_ERR_C_PRINCIPAL_UNKNOWN => "Client not found in Kerberos database",
            ErrorCode::KDC_ERR_BADOPTION => "KDC can't fulfill requested option",
            ErrorCode::AP_ERR_TKT_EXPIRED => "Ticket expired",
            ErrorCode::CC_BADNAME => "Credential cache name malformed",
            ErrorCode::CC_NOTFOUND => "Matching credential not found",
            ErrorCode::KT_NOTFOUND => "Key table entry not found",
            ErrorCode::KT_END => "End of key table reached",
            ErrorCode::FCC_NOFILE => "No credentials cache found",
            ErrorCode::FCC_INTERNAL => "Internal credentials cache error",
            ErrorCode::CC_WRITE => "Error writing to credentials cache",
            ErrorCode::CC_FORMAT => "Bad format in credentials cache",
            _ => return format!("Unknown code {}", code),
        };

        message.to_string()
    }

    fn timeofday(&self) -> Result<Timestamp, ErrorCode> {
        let _call = self.enter("krb5_timeofday")?;
        Ok(self.shared.state.lock().now())
    }

    fn timestamp_to_string(&self, timestamp: Timestamp) -> Result<String, ErrorCode> {
        let _call = self.enter("krb5_timestamp_to_string")?;
        DateTime::<Utc>::from_timestamp(timestamp, 0)
            .map(|time| {
                time.with_timezone(&Local)
                    .format("%m/%d/%Y %H:%M:%S")
                    .to_string()
            })
            .ok_or(ErrorCode::EINVAL)
    }

    fn copy_principal(&self, principal: &PrincipalName) -> Result<PrincipalName, ErrorCode> {
        let _call = self.enter("krb5_copy_principal")?;
        Ok(principal.clone())
    }

    fn build_tgs_principal(&self, realm: &str) -> Result<PrincipalName, ErrorCode> {
        let _call = self.enter("krb5_build_principal_ext")?;
        if realm.is_empty() {
            return Err(ErrorCode::EINVAL);
        }
        Ok(PrincipalName::tgs(realm))
    }

    fn kt_default_name(&self) -> Result<String, ErrorCode> {
        let _call = self.enter("krb5_kt_default_name")?;
        Ok(self.shared.state.lock().default_keytab.clone())
    }

    fn kt_resolve(&self, name: &str) -> Result<KeytabHandle, ErrorCode> {
        let _call = self.enter("krb5_kt_resolve")?;
        if name.is_empty() {
            return Err(ErrorCode::KT_NOTFOUND);
        }

        let mut state = self.shared.state.lock();
        let id = state.next_id();
        state.keytab_handles.insert(id, keytab_key(name));
        Ok(KeytabHandle::from_raw(id))
    }

    fn kt_close(&self, keytab: KeytabHandle) -> Result<(), ErrorCode> {
        let _call = self.enter("krb5_kt_close")?;
        self.shared
            .state
            .lock()
            .keytab_handles
            .remove(&keytab.as_raw())
            .map(|_| ())
            .ok_or(ErrorCode::EINVAL)
    }

    fn kt_start_seq_get(&self, keytab: &KeytabHandle) -> Result<KeytabCursor, ErrorCode> {
        let _call = self.enter("krb5_kt_start_seq_get")?;
        let mut state = self.shared.state.lock();
        let name = state.keytab(keytab)?;
        if !state.keytabs.contains_key(&name) {
            return Err(ErrorCode::ENOENT);
        }

        let id = state.next_id();
        state.cursors.insert(id, 0);
        Ok(KeytabCursor::from_raw(id))
    }

    fn kt_next_entry(
        &self,
        keytab: &KeytabHandle,
        cursor: &mut KeytabCursor,
    ) -> Result<KeytabEntry, ErrorCode> {
        let _call = self.enter("krb5_kt_next_entry")?;
        let mut state = self.shared.state.lock();
        let name = state.keytab(keytab)?;
        let position = *state
            .cursors
            .get(&cursor.as_raw())
            .ok_or(ErrorCode::EINVAL)?;

        let entry = state
            .keytabs
            .get(&name)
            .and_then(|entries| entries.get(position))
            .cloned()
            .ok_or(ErrorCode::KT_END)?;

        state.cursors.insert(cursor.as_raw(), position + 1);
        Ok(entry)
    }

    fn kt_end_seq_get(
        &self,
        _keytab: &KeytabHandle,
        cursor: KeytabCursor,
    ) -> Result<(), ErrorCode> {
        let _call = self.enter("krb5_kt_end_seq_get")?;
        self.shared
            .state
            .lock()
            .cursors
            .remove(&cursor.as_raw())
            .map(|_| ())
            .ok_or(ErrorCode::EINVAL)
    }

    fn get_init_creds_keytab(
        &self,
        client: &PrincipalName,
        keytab: &KeytabHandle,
    ) -> Result<CredsData, ErrorCode> {
        let _call = self.enter("krb5_get_init_creds_keytab")?;
        let mut state = self.shared.state.lock();
        let name = state.keytab(keytab)?;
        let known = state
            .keytabs
            .get(&name)
            .ok_or(ErrorCode::ENOENT)?
            .iter()
            .any(|entry| &entry.principal == client);
        if !known {
            return Err(ErrorCode::KT_NOTFOUND);
        }

        let now = state.now();
        let times = TicketTimes {
            auth_time: now,
            start_time: now,
            end_time: now + state.ticket_lifetime,
            renew_till: now + state.renew_lifetime.max(state.ticket_lifetime),
        };

        Ok(state.issue(client, times))
    }

    fn get_renewed_creds(
        &self,
        client: &PrincipalName,
        ccache: &CcacheHandle,
    ) -> Result<CredsData, ErrorCode> {
        let _call = self.enter("krb5_get_renewed_creds")?;
        let mut state = self.shared.state.lock();
        let location = state.ccache(ccache)?;
        let cache = state.load_existing(&location)?;
        let server = PrincipalName::tgs(client.realm());

        let current = cache
            .creds
            .iter()
            .find(|creds| &creds.client == client && creds.server == server)
            .map(StoredCreds::to_creds)
            .ok_or(ErrorCode::CC_NOTFOUND)?;

        if !current.is_renewable() {
            return Err(ErrorCode::KDC_ERR_BADOPTION);
        }

        let now = state.now();
        if now >= current.times.renew_till {
            return Err(ErrorCode::AP_ERR_TKT_EXPIRED);
        }

        let times = TicketTimes {
            auth_time: current.times.auth_time,
            start_time: now,
            end_time: (now + state.ticket_lifetime).min(current.times.renew_till),
            renew_till: current.times.renew_till,
        };

        let mut renewed = state.issue(client, times);
        renewed.flags = current.flags & !TKT_FLG_INITIAL;
        Ok(renewed)
    }

    fn cc_default_name(&self) -> Result<String, ErrorCode> {
        let _call = self.enter("krb5_cc_default_name")?;
        Ok(self.shared.state.lock().default_ccache.clone())
    }

    fn cc_resolve(&self, name: &str) -> Result<CcacheHandle, ErrorCode> {
        let _call = self.enter("krb5_cc_resolve")?;
        let location = Location::parse(name)?;

        let mut state = self.shared.state.lock();
        let id = state.next_id();
        state.ccache_handles.insert(id, location);
        Ok(CcacheHandle::from_raw(id))
    }

    fn cc_initialize(
        &self,
        ccache: &CcacheHandle,
        principal: &PrincipalName,
    ) -> Result<(), ErrorCode> {
        let _call = self.enter("krb5_cc_initialize")?;
        let mut state = self.shared.state.lock();
        let location = state.ccache(ccache)?;
        state.save(
            &location,
            StoredCache {
                principal: Some(principal.clone()),
                creds: vec![],
            },
        )
    }

    fn cc_store_cred(&self, ccache: &CcacheHandle, creds: &CredsData) -> Result<(), ErrorCode> {
        let _call = self.enter("krb5_cc_store_cred")?;
        let mut state = self.shared.state.lock();
        let location = state.ccache(ccache)?;
        let mut cache = state.load_existing(&location)?;
        if cache.principal.is_none() {
            return Err(ErrorCode::CC_FORMAT);
        }

        cache
            .creds
            .retain(|stored| !(stored.client == creds.client && stored.server == creds.server));
        cache.creds.push(StoredCreds::from(creds));
        state.save(&location, cache)
    }

    fn cc_retrieve_cred(
        &self,
        ccache: &CcacheHandle,
        client: &PrincipalName,
        server: &PrincipalName,
    ) -> Result<CredsData, ErrorCode> {
        let _call = self.enter("krb5_cc_retrieve_cred")?;
        let state = self.shared.state.lock();
        let location = state.ccache(ccache)?;
        let cache = state.load_existing(&location)?;

        cache
            .creds
            .iter()
            .find(|creds| &creds.client == client && &creds.server == server)
            .map(StoredCreds::to_creds)
            .ok_or(ErrorCode::CC_NOTFOUND)
    }

    fn cc_get_principal(&self, ccache: &CcacheHandle) -> Result<PrincipalName, ErrorCode> {
        let _call = self.enter("krb5_cc_get_principal")?;
        let state = self.shared.state.lock();
        let location = state.ccache(ccache)?;
        state
            .load_existing(&location)?
            .principal
            .ok_or(ErrorCode::CC_FORMAT)
    }

    fn cc_close(&self, ccache: CcacheHandle) -> Result<(), ErrorCode> {
        let _call = self.enter("krb5_cc_close")?;
        self.shared
            .state
            .lock()
            .ccache_handles
            .remove(&ccache.as_raw())
            .map(|_| ())
            .ok_or(ErrorCode::EINVAL)
    }

    fn cc_destroy(&self, ccache: CcacheHandle) -> Result<(), ErrorCode> {
        let _call = self.enter("krb5_cc_destroy")?;
        let mut state = self.shared.state.lock();
        let location = state
            .ccache_handles
            .remove(&ccache.as_raw())
            .ok_or(ErrorCode::EINVAL)?;
        state.remove(&location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> PrincipalName {
        "alice@EXAMPLE.COM".parse().unwrap()
    }

    fn context(krb5: &MemoryKrb5) -> Box<dyn Krb5Context> {
        krb5.init_context().unwrap()
    }

    #[test]
    fn test_keytab_iteration() {
        let krb5 = MemoryKrb5::new();
        krb5.add_keytab_entry("FILE:/etc/app.keytab", alice());
        krb5.add_keytab_entry("/etc/app.keytab", "bob@EXAMPLE.COM".parse().unwrap());
        let ctx = context(&krb5);

        let keytab = ctx.kt_resolve("/etc/app.keytab").unwrap();
        let mut cursor = ctx.kt_start_seq_get(&keytab).unwrap();
        assert_eq!(ctx.kt_next_entry(&keytab, &mut cursor).unwrap().principal, alice());
        assert_eq!(ctx.kt_next_entry(&keytab, &mut cursor).unwrap().kvno, 2);
        assert_eq!(
            ctx.kt_next_entry(&keytab, &mut cursor).unwrap_err(),
            ErrorCode::KT_END
        );
        ctx.kt_end_seq_get(&keytab, cursor).unwrap();
        ctx.kt_close(keytab).unwrap();
    }

    #[test]
    fn test_missing_keytab() {
        let krb5 = MemoryKrb5::new();
        let ctx = context(&krb5);
        let keytab = ctx.kt_resolve("/nonexistent/keytab").unwrap();
        assert_eq!(
            ctx.kt_start_seq_get(&keytab).unwrap_err(),
            ErrorCode::ENOENT
        );
    }

    #[test]
    fn test_issue_store_retrieve() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("krb5cc_test");
        let cache_name = format!("FILE:{}", cache_path.display());

        let krb5 = MemoryKrb5::new();
        krb5.set_time(1_000_000);
        krb5.set_lifetimes(3600, 7200);
        krb5.add_keytab_entry("/etc/app.keytab", alice());
        let ctx = context(&krb5);

        let keytab = ctx.kt_resolve("/etc/app.keytab").unwrap();
        let creds = ctx.get_init_creds_keytab(&alice(), &keytab).unwrap();
        assert_eq!(creds.times.end_time, 1_000_000 + 3600);
        assert_eq!(creds.times.renew_till, 1_000_000 + 7200);
        assert!(creds.is_renewable());

        let ccache = ctx.cc_resolve(&cache_name).unwrap();
        assert_eq!(
            ctx.cc_get_principal(&ccache).unwrap_err(),
            ErrorCode::FCC_NOFILE
        );
        ctx.cc_initialize(&ccache, &alice()).unwrap();
        ctx.cc_store_cred(&ccache, &creds).unwrap();
        assert!(cache_path.exists());

        let stored = ctx
            .cc_retrieve_cred(&ccache, &alice(), &PrincipalName::tgs("EXAMPLE.COM"))
            .unwrap();
        assert_eq!(stored.times, creds.times);
        assert_eq!(stored.ticket, creds.ticket);
        assert_eq!(krb5.cached_tgt(&cache_name).unwrap().times, creds.times);

        ctx.cc_destroy(ccache).unwrap();
        assert!(!cache_path.exists());
    }

    #[test]
    fn test_renewal_window() {
        let krb5 = MemoryKrb5::new();
        krb5.set_time(1_000_000);
        krb5.set_lifetimes(100, 300);
        krb5.add_keytab_entry("/etc/app.keytab", alice());
        let ctx = context(&krb5);

        let keytab = ctx.kt_resolve("/etc/app.keytab").unwrap();
        let ccache = ctx.cc_resolve("MEMORY:renewal").unwrap();
        let creds = ctx.get_init_creds_keytab(&alice(), &keytab).unwrap();
        ctx.cc_initialize(&ccache, &alice()).unwrap();
        ctx.cc_store_cred(&ccache, &creds).unwrap();

        krb5.advance(150);
        let renewed = ctx.get_renewed_creds(&alice(), &ccache).unwrap();
        assert_eq!(renewed.times.start_time, 1_000_150);
        assert_eq!(renewed.times.end_time, 1_000_250);
        assert_eq!(renewed.times.renew_till, 1_000_300);
        assert_eq!(renewed.times.auth_time, 1_000_000);

        krb5.advance(200);
        assert_eq!(
            ctx.get_renewed_creds(&alice(), &ccache).unwrap_err(),
            ErrorCode::AP_ERR_TKT_EXPIRED
        );
    }

    #[test]
    fn test_not_renewable() {
        let krb5 = MemoryKrb5::new();
        krb5.set_lifetimes(100, 0);
        krb5.add_keytab_entry("/etc/app.keytab", alice());
        let ctx = context(&krb5);

        let keytab = ctx.kt_resolve("/etc/app.keytab").unwrap();
        let ccache = ctx.cc_resolve("MEMORY:short").unwrap();
        let creds = ctx.get_init_creds_keytab(&alice(), &keytab).unwrap();
        assert!(!creds.is_renewable());
        ctx.cc_initialize(&ccache, &alice()).unwrap();
        ctx.cc_store_cred(&ccache, &creds).unwrap();

        assert_eq!(
            ctx.get_renewed_creds(&alice(), &ccache).unwrap_err(),
            ErrorCode::KDC_ERR_BADOPTION
        );
    }

    #[test]
    fn test_failure_injection_and_counters() {
        let krb5 = MemoryKrb5::new();
        krb5.fail("krb5_cc_resolve", ErrorCode::CC_BADNAME);
        let ctx = context(&krb5);

        assert_eq!(
            ctx.cc_resolve("MEMORY:x").unwrap_err(),
            ErrorCode::CC_BADNAME
        );
        krb5.clear_failure("krb5_cc_resolve");
        assert!(ctx.cc_resolve("MEMORY:x").is_ok());
        assert_eq!(krb5.calls("krb5_cc_resolve"), 2);

        krb5.reset_calls();
        assert_eq!(krb5.calls("krb5_cc_resolve"), 0);
    }

    #[test]
    fn test_mutating_call_log() {
        let krb5 = MemoryKrb5::new();
        krb5.add_keytab_entry("FILE:/etc/app.keytab", alice());
        let ctx = context(&krb5);
        let keytab = ctx.kt_resolve("FILE:/etc/app.keytab").unwrap();
        let ccache = ctx.cc_resolve("MEMORY:log").unwrap();

        krb5.fail("krb5_cc_store_cred", ErrorCode::CC_WRITE);
        let creds = ctx.get_init_creds_keytab(&alice(), &keytab).unwrap();
        ctx.cc_initialize(&ccache, &alice()).unwrap();
        assert!(ctx.cc_store_cred(&ccache, &creds).is_err());

        let me = thread::current().id();
        assert_eq!(
            krb5.mutating_calls(),
            vec![
                (me, "krb5_get_init_creds_keytab"),
                (me, "krb5_cc_initialize"),
            ]
        );

        krb5.reset_calls();
        assert!(krb5.mutating_calls().is_empty());
    }

    #[test]
    fn test_context_lifetime() {
        let krb5 = MemoryKrb5::new();
        let ctx = context(&krb5);
        assert_eq!(krb5.live_contexts(), 1);
        drop(ctx);
        assert_eq!(krb5.live_contexts(), 0);

        krb5.fail_init(ErrorCode::EINVAL);
        assert!(krb5.init_context().is_err());
        assert_eq!(krb5.live_contexts(), 0);
    }

    #[test]
    fn test_error_messages() {
        let krb5 = MemoryKrb5::new();
        let ctx = context(&krb5);
        assert_eq!(
            ctx.error_message(ErrorCode::FCC_NOFILE),
            "No credentials cache found"
        );
        assert_eq!(ctx.error_message(ErrorCode(42)), "Unknown code 42");
    }
}
