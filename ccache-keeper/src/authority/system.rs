//! Binding to the system MIT Kerberos library.
//!
//! A `krb5_context` must not be used from two threads at once, so every call
//! made through a session goes through one mutex. Keytabs, cursors and caches
//! stay inside the session; callers only see numbered handles.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::mem;
use std::ptr;

use libc::{c_char, c_int, c_uint};
use libkrb5_sys::*;
use parking_lot::Mutex;
use zeroize::Zeroizing;

use super::{
    CcacheHandle, CredsData, ErrorCode, KeytabCursor, KeytabEntry, KeytabHandle, Krb5,
    Krb5Context, PrincipalName, TicketTimes, Timestamp, TGS_NAME,
};

/// The system libkrb5.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemKrb5;

impl SystemKrb5 {
    pub fn new() -> Self {
        Self
    }
}

impl Krb5 for SystemKrb5 {
    fn init_context(&self) -> Result<Box<dyn Krb5Context>, ErrorCode> {
        let mut ctx: krb5_context = ptr::null_mut();
        check(unsafe { krb5_init_context(&mut ctx) })?;

        Ok(Box::new(SystemContext {
            inner: Mutex::new(Inner {
                ctx,
                keytabs: HashMap::new(),
                cursors: HashMap::new(),
                ccaches: HashMap::new(),
                next_id: 1,
            }),
        }))
    }
}

struct Inner {
    ctx: krb5_context,
    keytabs: HashMap<u64, krb5_keytab>,
    cursors: HashMap<u64, krb5_kt_cursor>,
    ccaches: HashMap<u64, krb5_ccache>,
    next_id: u64,
}

// The raw pointers are only touched with the session mutex held.
unsafe impl Send for Inner {}

impl Inner {
    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn keytab(&self, handle: &KeytabHandle) -> Result<krb5_keytab, ErrorCode> {
        self.keytabs
            .get(&handle.as_raw())
            .copied()
            .ok_or(ErrorCode::EINVAL)
    }

    fn ccache(&self, handle: &CcacheHandle) -> Result<krb5_ccache, ErrorCode> {
        self.ccaches
            .get(&handle.as_raw())
            .copied()
            .ok_or(ErrorCode::EINVAL)
    }

    /// Library principal with the same components, realm and name type.
    fn principal(&self, name: &PrincipalName) -> Result<OwnedPrincipal, ErrorCode> {
        let text = cstring(&unparse(name))?;
        let mut principal: krb5_principal = ptr::null_mut();
        check(unsafe { krb5_parse_name(self.ctx, text.as_ptr(), &mut principal) })?;

        let principal = OwnedPrincipal {
            ctx: self.ctx,
            principal,
        };
        unsafe { (*principal.principal).type_ = name.name_type() };

        Ok(principal)
    }

    /// Run `f` on a library credentials struct pointing at `creds`.
    fn with_raw_creds<T>(
        &self,
        creds: &CredsData,
        f: impl FnOnce(&mut krb5_creds) -> T,
    ) -> Result<T, ErrorCode> {
        let client = self.principal(&creds.client)?;
        let server = self.principal(&creds.server)?;
        let mut key = Zeroizing::new(creds.session_key.to_vec());
        let mut ticket = creds.ticket.clone();

        let mut raw: krb5_creds = unsafe { mem::zeroed() };
        raw.client = client.principal;
        raw.server = server.principal;
        raw.keyblock.enctype = creds.enctype as _;
        raw.keyblock.length = key.len() as _;
        raw.keyblock.contents = key.as_mut_ptr();
        raw.times.authtime = creds.times.auth_time as _;
        raw.times.starttime = creds.times.start_time as _;
        raw.times.endtime = creds.times.end_time as _;
        raw.times.renew_till = creds.times.renew_till as _;
        raw.ticket_flags = creds.flags as _;
        raw.ticket.length = ticket.len() as _;
        raw.ticket.data = ticket.as_mut_ptr() as *mut c_char;

        Ok(f(&mut raw))
    }

    /// Copy and free credentials filled in by the library.
    fn take_creds(&self, raw: &mut krb5_creds) -> Result<CredsData, ErrorCode> {
        let creds = unsafe { creds_data(raw) };
        unsafe { krb5_free_cred_contents(self.ctx, raw) };
        creds
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        unsafe {
            for (_, keytab) in self.keytabs.drain() {
                krb5_kt_close(self.ctx, keytab);
            }
            for (_, ccache) in self.ccaches.drain() {
                krb5_cc_close(self.ctx, ccache);
            }
            krb5_free_context(self.ctx);
        }
    }
}

struct OwnedPrincipal {
    ctx: krb5_context,
    principal: krb5_principal,
}

impl Drop for OwnedPrincipal {
    fn drop(&mut self) {
        unsafe { krb5_free_principal(self.ctx, self.principal) };
    }
}

struct SystemContext {
    inner: Mutex<Inner>,
}

fn check(code: krb5_error_code) -> Result<(), ErrorCode> {
    if code == 0 {
        Ok(())
    } else {
        Err(ErrorCode(code))
    }
}

fn cstring(value: &str) -> Result<CString, ErrorCode> {
    CString::new(value).map_err(|_| ErrorCode::EINVAL)
}

/// Principal in the text form `krb5_parse_name` reads back unchanged.
fn unparse(name: &PrincipalName) -> String {
    let mut text = String::new();
    for (i, component) in name.components().iter().enumerate() {
        if i > 0 {
            text.push('/');
        }
        quote(component, &mut text);
    }
    text.push('@');
    quote(name.realm(), &mut text);
    text
}

fn quote(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '/' => out.push_str("\\/"),
            '@' => out.push_str("\\@"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
}

/// Library timestamps are unsigned 32-bit seconds stored in a signed field.
fn timestamp(value: krb5_timestamp) -> Timestamp {
    value as u32 as Timestamp
}

unsafe fn bytes(data: &krb5_data) -> Vec<u8> {
    if data.data.is_null() || data.length == 0 {
        return vec![];
    }
    std::slice::from_raw_parts(data.data as *const u8, data.length as usize).to_vec()
}

unsafe fn principal_name(principal: krb5_const_principal) -> Result<PrincipalName, ErrorCode> {
    let principal = principal.as_ref().ok_or(ErrorCode::EINVAL)?;
    let realm = String::from_utf8_lossy(&bytes(&principal.realm)).into_owned();

    let mut components = vec![];
    for i in 0..principal.length.max(0) as usize {
        let component = &*principal.data.add(i);
        components.push(String::from_utf8_lossy(&bytes(component)).into_owned());
    }

    Ok(PrincipalName::new(components, realm).with_name_type(principal.type_))
}

unsafe fn creds_data(raw: &krb5_creds) -> Result<CredsData, ErrorCode> {
    let key = if raw.keyblock.contents.is_null() {
        vec![]
    } else {
        std::slice::from_raw_parts(raw.keyblock.contents, raw.keyblock.length as usize).to_vec()
    };

    Ok(CredsData {
        client: principal_name(raw.client)?,
        server: principal_name(raw.server)?,
        times: TicketTimes {
            auth_time: timestamp(raw.times.authtime),
            start_time: timestamp(raw.times.starttime),
            end_time: timestamp(raw.times.endtime),
            renew_till: timestamp(raw.times.renew_till),
        },
        flags: raw.ticket_flags as u32,
        enctype: raw.keyblock.enctype as i32,
        session_key: Zeroizing::new(key),
        ticket: bytes(&raw.ticket),
    })
}

impl Krb5Context for SystemContext {
    fn error_message(&self, code: ErrorCode) -> String {
        let inner = self.inner.lock();
        unsafe {
            let message = krb5_get_error_message(inner.ctx, code.0);
            if message.is_null() {
                return format!("Unknown code {}", code);
            }
            let text = CStr::from_ptr(message).to_string_lossy().into_owned();
            krb5_free_error_message(inner.ctx, message);
            text
        }
    }

    fn timeofday(&self) -> Result<Timestamp, ErrorCode> {
        let inner = self.inner.lock();
        let mut now: krb5_timestamp = 0;
        check(unsafe { krb5_timeofday(inner.ctx, &mut now) })?;
        Ok(timestamp(now))
    }

    fn timestamp_to_string(&self, timestamp: Timestamp) -> Result<String, ErrorCode> {
        let mut buffer = [0 as c_char; 64];
        check(unsafe {
            krb5_timestamp_to_sfstring(
                timestamp as krb5_timestamp,
                buffer.as_mut_ptr(),
                buffer.len() as _,
                ptr::null_mut(),
            )
        })?;

        Ok(unsafe { CStr::from_ptr(buffer.as_ptr()) }
            .to_string_lossy()
            .into_owned())
    }

    fn copy_principal(&self, principal: &PrincipalName) -> Result<PrincipalName, ErrorCode> {
        let inner = self.inner.lock();
        let source = inner.principal(principal)?;
        let mut copy: krb5_principal = ptr::null_mut();
        check(unsafe { krb5_copy_principal(inner.ctx, source.principal, &mut copy) })?;

        let copy = OwnedPrincipal {
            ctx: inner.ctx,
            principal: copy,
        };
        unsafe { principal_name(copy.principal) }
    }

    fn build_tgs_principal(&self, realm: &str) -> Result<PrincipalName, ErrorCode> {
        let inner = self.inner.lock();
        let tgs = TGS_NAME.as_bytes();
        let realm_bytes = realm.as_bytes();
        let mut principal: krb5_principal = ptr::null_mut();

        check(unsafe {
            krb5_build_principal_ext(
                inner.ctx,
                &mut principal,
                realm_bytes.len() as c_uint,
                realm_bytes.as_ptr() as *const c_char,
                tgs.len() as c_uint,
                tgs.as_ptr() as *const c_char,
                realm_bytes.len() as c_uint,
                realm_bytes.as_ptr() as *const c_char,
                0 as c_uint,
            )
        })?;

        let principal = OwnedPrincipal {
            ctx: inner.ctx,
            principal,
        };
        unsafe { principal_name(principal.principal) }
    }

    fn kt_default_name(&self) -> Result<String, ErrorCode> {
        let inner = self.inner.lock();
        let mut buffer = [0 as c_char; MAX_KEYTAB_NAME_LEN as usize];
        check(unsafe {
            krb5_kt_default_name(inner.ctx, buffer.as_mut_ptr(), buffer.len() as c_int)
        })?;

        Ok(unsafe { CStr::from_ptr(buffer.as_ptr()) }
            .to_string_lossy()
            .into_owned())
    }

    fn kt_resolve(&self, name: &str) -> Result<KeytabHandle, ErrorCode> {
        let mut inner = self.inner.lock();
        let name = cstring(name)?;
        let mut keytab: krb5_keytab = ptr::null_mut();
        check(unsafe { krb5_kt_resolve(inner.ctx, name.as_ptr(), &mut keytab) })?;

        let id = inner.next_id();
        inner.keytabs.insert(id, keytab);
        Ok(KeytabHandle::from_raw(id))
    }

    fn kt_close(&self, keytab: KeytabHandle) -> Result<(), ErrorCode> {
        let mut inner = self.inner.lock();
        let raw = inner
            .keytabs
            .remove(&keytab.as_raw())
            .ok_or(ErrorCode::EINVAL)?;
        check(unsafe { krb5_kt_close(inner.ctx, raw) })
    }

    fn kt_start_seq_get(&self, keytab: &KeytabHandle) -> Result<KeytabCursor, ErrorCode> {
        let mut inner = self.inner.lock();
        let raw = inner.keytab(keytab)?;
        let mut cursor: krb5_kt_cursor = ptr::null_mut();
        check(unsafe { krb5_kt_start_seq_get(inner.ctx, raw, &mut cursor) })?;

        let id = inner.next_id();
        inner.cursors.insert(id, cursor);
        Ok(KeytabCursor::from_raw(id))
    }

    fn kt_next_entry(
        &self,
        keytab: &KeytabHandle,
        cursor: &mut KeytabCursor,
    ) -> Result<KeytabEntry, ErrorCode> {
        let mut inner = self.inner.lock();
        let raw = inner.keytab(keytab)?;
        let ctx = inner.ctx;
        let position = inner
            .cursors
            .get_mut(&cursor.as_raw())
            .ok_or(ErrorCode::EINVAL)?;

        let mut entry: krb5_keytab_entry = unsafe { mem::zeroed() };
        check(unsafe { krb5_kt_next_entry(ctx, raw, &mut entry, position) })?;

        let result = unsafe {
            principal_name(entry.principal).map(|principal| {
                let key = if entry.key.contents.is_null() {
                    vec![]
                } else {
                    std::slice::from_raw_parts(entry.key.contents, entry.key.length as usize)
                        .to_vec()
                };

                KeytabEntry {
                    principal,
                    kvno: entry.vno as u32,
                    enctype: entry.key.enctype as i32,
                    key: Zeroizing::new(key),
                }
            })
        };
        unsafe { krb5_free_keytab_entry_contents(ctx, &mut entry) };

        result
    }

    fn kt_end_seq_get(&self, keytab: &KeytabHandle, cursor: KeytabCursor) -> Result<(), ErrorCode> {
        let mut inner = self.inner.lock();
        let raw = inner.keytab(keytab)?;
        let mut position = inner
            .cursors
            .remove(&cursor.as_raw())
            .ok_or(ErrorCode::EINVAL)?;
        check(unsafe { krb5_kt_end_seq_get(inner.ctx, raw, &mut position) })
    }

    fn get_init_creds_keytab(
        &self,
        client: &PrincipalName,
        keytab: &KeytabHandle,
    ) -> Result<CredsData, ErrorCode> {
        let inner = self.inner.lock();
        let raw_keytab = inner.keytab(keytab)?;
        let client = inner.principal(client)?;

        let mut creds: krb5_creds = unsafe { mem::zeroed() };
        let code = unsafe {
            krb5_get_init_creds_keytab(
                inner.ctx,
                &mut creds,
                client.principal,
                raw_keytab,
                0,
                ptr::null(),
                ptr::null_mut(),
            )
        };
        if code != 0 {
            unsafe { krb5_free_cred_contents(inner.ctx, &mut creds) };
            return Err(ErrorCode(code));
        }

        inner.take_creds(&mut creds)
    }

    fn get_renewed_creds(
        &self,
        client: &PrincipalName,
        ccache: &CcacheHandle,
    ) -> Result<CredsData, ErrorCode> {
        let inner = self.inner.lock();
        let raw_ccache = inner.ccache(ccache)?;
        let client = inner.principal(client)?;

        let mut creds: krb5_creds = unsafe { mem::zeroed() };
        let code = unsafe {
            krb5_get_renewed_creds(
                inner.ctx,
                &mut creds,
                client.principal,
                raw_ccache,
                ptr::null(),
            )
        };
        if code != 0 {
            unsafe { krb5_free_cred_contents(inner.ctx, &mut creds) };
            return Err(ErrorCode(code));
        }

        inner.take_creds(&mut creds)
    }

    fn cc_default_name(&self) -> Result<String, ErrorCode> {
        let inner = self.inner.lock();
        let name = unsafe { krb5_cc_default_name(inner.ctx) };
        if name.is_null() {
            return Err(ErrorCode::CC_BADNAME);
        }

        Ok(unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned())
    }

    fn cc_resolve(&self, name: &str) -> Result<CcacheHandle, ErrorCode> {
        let mut inner = self.inner.lock();
        let name = cstring(name)?;
        let mut ccache: krb5_ccache = ptr::null_mut();
        check(unsafe { krb5_cc_resolve(inner.ctx, name.as_ptr(), &mut ccache) })?;

        let id = inner.next_id();
        inner.ccaches.insert(id, ccache);
        Ok(CcacheHandle::from_raw(id))
    }

    fn cc_initialize(
        &self,
        ccache: &CcacheHandle,
        principal: &PrincipalName,
    ) -> Result<(), ErrorCode> {
        let inner = self.inner.lock();
        let raw = inner.ccache(ccache)?;
        let principal = inner.principal(principal)?;
        check(unsafe { krb5_cc_initialize(inner.ctx, raw, principal.principal) })
    }

    fn cc_store_cred(&self, ccache: &CcacheHandle, creds: &CredsData) -> Result<(), ErrorCode> {
        let inner = self.inner.lock();
        let raw = inner.ccache(ccache)?;
        let code = inner.with_raw_creds(creds, |creds| unsafe {
            krb5_cc_store_cred(inner.ctx, raw, creds)
        })?;
        check(code)
    }

    fn cc_retrieve_cred(
        &self,
        ccache: &CcacheHandle,
        client: &PrincipalName,
        server: &PrincipalName,
    ) -> Result<CredsData, ErrorCode> {
        let inner = self.inner.lock();
        let raw = inner.ccache(ccache)?;
        let client = inner.principal(client)?;
        let server = inner.principal(server)?;

        let mut wanted: krb5_creds = unsafe { mem::zeroed() };
        wanted.client = client.principal;
        wanted.server = server.principal;

        let mut creds: krb5_creds = unsafe { mem::zeroed() };
        check(unsafe { krb5_cc_retrieve_cred(inner.ctx, raw, 0, &mut wanted, &mut creds) })?;

        inner.take_creds(&mut creds)
    }

    fn cc_get_principal(&self, ccache: &CcacheHandle) -> Result<PrincipalName, ErrorCode> {
        let inner = self.inner.lock();
        let raw = inner.ccache(ccache)?;
        let mut principal: krb5_principal = ptr::null_mut();
        check(unsafe { krb5_cc_get_principal(inner.ctx, raw, &mut principal) })?;

        let principal = OwnedPrincipal {
            ctx: inner.ctx,
            principal,
        };
        unsafe { principal_name(principal.principal) }
    }

    fn cc_close(&self, ccache: CcacheHandle) -> Result<(), ErrorCode> {
        let mut inner = self.inner.lock();
        let raw = inner
            .ccaches
            .remove(&ccache.as_raw())
            .ok_or(ErrorCode::EINVAL)?;
        check(unsafe { krb5_cc_close(inner.ctx, raw) })
    }

    fn cc_destroy(&self, ccache: CcacheHandle) -> Result<(), ErrorCode> {
        let mut inner = self.inner.lock();
        let raw = inner
            .ccaches
            .remove(&ccache.as_raw())
            .ok_or(ErrorCode::EINVAL)?;
        check(unsafe { krb5_cc_destroy(inner.ctx, raw) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KRB5_NT_SRV_HST: i32 = 3;

    #[test]
    fn test_timestamp_is_unsigned() {
        assert_eq!(timestamp(-1), u32::MAX as Timestamp);
        assert_eq!(timestamp(1_700_000_000), 1_700_000_000);
    }

    #[test]
    fn test_check() {
        assert!(check(0).is_ok());
        assert_eq!(check(-1765328189), Err(ErrorCode::FCC_NOFILE));
    }

    #[test]
    fn test_unparse_quotes_separators() {
        let name = PrincipalName::new(["svc/a", "host@x"], "EXAMPLE.COM");
        assert_eq!(unparse(&name), "svc\\/a/host\\@x@EXAMPLE.COM");
        assert_eq!(
            unparse(&PrincipalName::tgs("EXAMPLE.COM")),
            "krbtgt/EXAMPLE.COM@EXAMPLE.COM"
        );
    }

    #[test]
    fn test_principal_keeps_components_and_type() {
        let krb5 = SystemKrb5::new();
        let Ok(context) = krb5.init_context() else {
            return;
        };

        let name = PrincipalName::new(["svc/a", "host@x"], "EXAMPLE.COM")
            .with_name_type(KRB5_NT_SRV_HST);
        let copy = context.copy_principal(&name).unwrap();
        assert_eq!(copy.components(), name.components());
        assert_eq!(copy.name_type(), KRB5_NT_SRV_HST);
    }

    #[test]
    fn test_principal_roundtrip() {
        let krb5 = SystemKrb5::new();
        let Ok(context) = krb5.init_context() else {
            return;
        };

        let name: PrincipalName = "HTTP/web.example.com@EXAMPLE.COM".parse().unwrap();
        assert_eq!(context.copy_principal(&name).unwrap(), name);
        assert_eq!(
            context.build_tgs_principal("EXAMPLE.COM").unwrap(),
            PrincipalName::tgs("EXAMPLE.COM")
        );
    }
}
