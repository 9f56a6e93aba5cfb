//! DRM engine backed by the platform DRM manager (`libdrmmanager`).
//!
//! Every session-scoped operation goes through `DMGRSetData` /
//! `DMGRGetData` with a string key. Callbacks registered with the manager
//! receive a pointer to a shared [`SessionRecord`]. Released records are
//! retired rather than freed and live as long as the engine, so a callback
//! racing a release never sees a dangling pointer.

use super::{byte_slice, c_string_lossy, guard_callback, symbol, CapabilitySet, LoadError, NativeLibrary};
use crate::drm::{
    status, ChallengeCallback, ChallengeMessage, DrmEngine, EngineSession, ErrorSink, KeySessionId,
};
use crate::engine::{NativeError, NativeResult, PipelineContext};
use crate::error::Result;
use bytes::Bytes;
use libloading::Library;
use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_long, c_uint, c_void, CString};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

pub const LIBRARY_NAME: &str = "libdrmmanager.so.0";

/// `DM_TYPE_EME`
const DM_TYPE_EME: c_int = 14;

/// Generic four-slot parameter block of `DMGRSetData`
#[repr(C)]
#[derive(Debug)]
struct SetDataParam {
    param1: *mut c_void,
    param2: *mut c_void,
    param3: *mut c_void,
    param4: *mut c_void,
}

impl Default for SetDataParam {
    fn default() -> Self {
        Self {
            param1: std::ptr::null_mut(),
            param2: std::ptr::null_mut(),
            param3: std::ptr::null_mut(),
            param4: std::ptr::null_mut(),
        }
    }
}

type ErrorEventFn = unsafe extern "C" fn(c_long, *mut c_char, *mut c_void);
type RequestKeyFn = unsafe extern "C" fn(*mut c_void, c_int, *mut c_void, c_int, *mut c_void) -> c_int;

/// Entry points of the DRM manager
#[derive(Clone)]
pub struct DrmManagerApi {
    _lib: Arc<Library>,
    set_local_mode: unsafe extern "C" fn(),
    create_session: unsafe extern "C" fn(c_int, *const c_char) -> *mut c_void,
    release_session: unsafe extern "C" fn(*mut c_void) -> c_int,
    set_data: unsafe extern "C" fn(*mut c_void, *const c_char, *mut c_void) -> c_int,
    get_data: unsafe extern "C" fn(*mut c_void, *const c_char, *mut c_void) -> c_int,
    security_init_complete: unsafe extern "C" fn(*mut c_int, c_uint, *mut u8, *mut c_void) -> bool,
}

impl CapabilitySet for DrmManagerApi {
    fn resolve(library: &Arc<Library>) -> std::result::Result<Self, LoadError> {
        // SAFETY: signatures follow drmmanager_api.h.
        unsafe {
            Ok(Self {
                set_local_mode: symbol(library, b"DMGRSetDRMLocalMode\0")?,
                create_session: symbol(library, b"DMGRCreateDRMSession\0")?,
                release_session: symbol(library, b"DMGRReleaseDRMSession\0")?,
                set_data: symbol(library, b"DMGRSetData\0")?,
                get_data: symbol(library, b"DMGRGetData\0")?,
                security_init_complete: symbol(library, b"DMGRSecurityInitCompleteCB\0")?,
                _lib: library.clone(),
            })
        }
    }
}

impl std::fmt::Debug for DrmManagerApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrmManagerApi").field("loaded", &true).finish()
    }
}

/// Per-session callback state reachable from C callbacks
struct SessionRecord {
    raw: *mut c_void,
    retired: AtomicBool,
    error_sink: Mutex<Option<ErrorSink>>,
    challenge: Mutex<Option<ChallengeCallback>>,
    /// Reused across `DMGRSecurityInitCompleteCB` calls; the manager may keep
    /// the pointer.
    security_param: Mutex<SetDataParam>,
}

impl SessionRecord {
    fn new(raw: *mut c_void) -> Self {
        Self {
            raw,
            retired: AtomicBool::new(false),
            error_sink: Mutex::new(None),
            challenge: Mutex::new(None),
            security_param: Mutex::new(SetDataParam::default()),
        }
    }

    /// Address handed to the manager as callback user data
    fn user_data(self: &Arc<Self>) -> *mut c_void {
        Arc::as_ptr(self) as *mut c_void
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    fn retire(&self) {
        self.retired.store(true, Ordering::Release);
        lock(&self.error_sink).take();
        lock(&self.challenge).take();
    }
}

// SAFETY: `raw` is an opaque handle only passed back to the DRM manager,
// which is thread-safe. Parameter blocks are only touched under their mutex.
unsafe impl Send for SessionRecord {}
unsafe impl Sync for SessionRecord {}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Live and retired session records.
///
/// Lookups hand out `Arc` clones taken under the lock, so a record stays
/// valid for the whole of an operation even if the session is released
/// meanwhile. Retired records keep their address until the table drops.
#[derive(Default)]
struct SessionTable {
    live: HashMap<usize, Arc<SessionRecord>>,
    retired: Vec<Arc<SessionRecord>>,
}

impl SessionTable {
    fn insert(&mut self, raw: *mut c_void) -> Arc<SessionRecord> {
        let record = Arc::new(SessionRecord::new(raw));
        self.live.insert(raw as usize, record.clone());
        record
    }

    fn get(&self, session: EngineSession) -> NativeResult<Arc<SessionRecord>> {
        self.live
            .get(&session.0)
            .cloned()
            .ok_or_else(|| NativeError::new(status::INVALID_SESSION, "unknown drm session"))
    }

    fn retire(&mut self, session: EngineSession) -> bool {
        match self.live.remove(&session.0) {
            Some(record) => {
                record.retire();
                self.retired.push(record);
                true
            }
            None => false,
        }
    }

    fn live_count(&self) -> usize {
        self.live.len()
    }
}

/// [`DrmEngine`] over `libdrmmanager`
pub struct NativeDrmEngine {
    api: DrmManagerApi,
    sessions: Mutex<SessionTable>,
}

impl NativeDrmEngine {
    pub fn load() -> Result<Self> {
        let library = NativeLibrary::open(LIBRARY_NAME)?;
        Ok(Self::new(library.resolve()?))
    }

    pub fn new(api: DrmManagerApi) -> Self {
        Self {
            api,
            sessions: Mutex::new(SessionTable::default()),
        }
    }

    fn record(&self, session: EngineSession) -> NativeResult<Arc<SessionRecord>> {
        lock(&self.sessions).get(session)
    }

    fn set_data(&self, session: EngineSession, key: &'static str, value: *mut c_void) -> NativeResult<()> {
        let record = self.record(session)?;
        self.set_record_data(&record, key, value)
    }

    fn set_record_data(&self, record: &SessionRecord, key: &'static str, value: *mut c_void) -> NativeResult<()> {
        let key_c = CString::new(key).map_err(|e| NativeError::new(status::INVALID_PARAM, e.to_string()))?;
        // SAFETY: `raw` is a manager session owned by the record; `value`
        // matches `key`.
        let code = unsafe { (self.api.set_data)(record.raw, key_c.as_ptr(), value) };
        check(code, key)
    }
}

fn check(code: c_int, action: &str) -> NativeResult<()> {
    if code == status::NONE {
        Ok(())
    } else {
        Err(NativeError::new(code, format!("DMGRSetData({action}) returned {code}")))
    }
}

impl DrmEngine for NativeDrmEngine {
    fn set_local_mode(&self) -> NativeResult<()> {
        // SAFETY: no arguments, process-wide switch.
        unsafe { (self.api.set_local_mode)() };
        Ok(())
    }

    fn create_session(&self, key_system: &str) -> NativeResult<EngineSession> {
        let sub_type = CString::new(key_system).map_err(|e| NativeError::new(status::INVALID_PARAM, e.to_string()))?;
        // SAFETY: `sub_type` outlives the call.
        let raw = unsafe { (self.api.create_session)(DM_TYPE_EME, sub_type.as_ptr()) };
        if raw.is_null() {
            return Err(NativeError::new(status::INTERNAL_ERROR, "DMGRCreateDRMSession returned null"));
        }
        let session = EngineSession(raw as usize);
        lock(&self.sessions).insert(raw);
        info!(key_system, "DRM manager session created");
        Ok(session)
    }

    fn release_session(&self, session: EngineSession) -> NativeResult<()> {
        let record = self.record(session)?;
        // SAFETY: `raw` is a live manager session.
        let code = unsafe { (self.api.release_session)(record.raw) };
        if code != status::NONE {
            return Err(NativeError::new(code, format!("DMGRReleaseDRMSession returned {code}")));
        }
        lock(&self.sessions).retire(session);
        Ok(())
    }

    fn set_error_sink(&self, session: EngineSession, sink: ErrorSink) -> NativeResult<()> {
        let record = self.record(session)?;
        *lock(&record.error_sink) = Some(sink);
        let mut param = SetDataParam {
            param1: on_error_event as ErrorEventFn as *mut c_void,
            param2: record.user_data(),
            ..Default::default()
        };
        self.set_record_data(&record, "error_event_callback", &mut param as *mut _ as *mut c_void)
    }

    fn set_challenge_callback(&self, session: EngineSession, callback: ChallengeCallback) -> NativeResult<()> {
        let record = self.record(session)?;
        *lock(&record.challenge) = Some(callback);
        let mut param = SetDataParam {
            param1: on_request_key as RequestKeyFn as *mut c_void,
            param2: record.user_data(),
            ..Default::default()
        };
        self.set_record_data(&record, "eme_request_key_callback", &mut param as *mut _ as *mut c_void)
    }

    fn set_manifest(&self, session: EngineSession, manifest_url: &str) -> NativeResult<()> {
        let url = CString::new(manifest_url).map_err(|e| NativeError::new(status::INVALID_PARAM, e.to_string()))?;
        self.set_data(session, "set_playready_manifest", url.as_ptr() as *mut c_void)
    }

    fn initialize(&self, session: EngineSession) -> NativeResult<()> {
        self.set_data(session, "Initialize", std::ptr::null_mut())
    }

    fn finalize(&self, session: EngineSession) -> NativeResult<()> {
        self.set_data(session, "Finalize", std::ptr::null_mut())
    }

    fn drm_handle(&self, session: EngineSession) -> NativeResult<i32> {
        let record = self.record(session)?;
        let mut handle: c_int = 0;
        // SAFETY: "drm_handle" writes one int.
        let code = unsafe {
            (self.api.get_data)(record.raw, b"drm_handle\0".as_ptr() as *const c_char, &mut handle as *mut c_int as *mut c_void)
        };
        if code != status::NONE {
            return Err(NativeError::new(code, format!("DMGRGetData(drm_handle) returned {code}")));
        }
        Ok(handle)
    }

    fn update_pssh(&self, session: EngineSession, data: &[u8]) -> i32 {
        let mut param = SetDataParam {
            param1: data.as_ptr() as *mut c_void,
            param2: data.len() as *mut c_void,
            ..Default::default()
        };
        match self.set_data(session, "update_pssh_data", &mut param as *mut _ as *mut c_void) {
            Ok(()) => status::NONE,
            Err(e) => e.code,
        }
    }

    fn install_key(&self, session: EngineSession, key_session: KeySessionId, response: Bytes) -> NativeResult<()> {
        let mut buffer = response.to_vec();
        let mut param = SetDataParam {
            param1: key_session.0 as *mut c_void,
            param2: buffer.as_mut_ptr() as *mut c_void,
            param3: buffer.len() as *mut c_void,
            ..Default::default()
        };
        let result = self.set_data(session, "install_eme_key", &mut param as *mut _ as *mut c_void);
        drop(buffer);
        result
    }

    fn complete_security_init(
        &self,
        session: EngineSession,
        drm_handle: i32,
        init_data: &[u8],
        context: PipelineContext,
    ) -> bool {
        let record = match self.record(session) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Security init for unknown session");
                return false;
            }
        };
        let mut param = lock(&record.security_param);
        param.param1 = context.0 as *mut c_void;
        param.param2 = record.raw;

        let mut handle = drm_handle;
        let mut pssh = init_data.to_vec();
        // SAFETY: all pointers are valid for the call; the parameter block
        // lives as long as the record, which outlives the engine's table.
        unsafe {
            (self.api.security_init_complete)(
                &mut handle,
                pssh.len() as c_uint,
                pssh.as_mut_ptr(),
                &mut *param as *mut SetDataParam as *mut c_void,
            )
        }
    }
}

impl std::fmt::Debug for NativeDrmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeDrmEngine")
            .field("sessions", &lock(&self.sessions).live_count())
            .finish()
    }
}

unsafe extern "C" fn on_error_event(code: c_long, message: *mut c_char, user_data: *mut c_void) {
    guard_callback("error_event", (), || {
        // SAFETY: `user_data` is null or a record kept alive by the table.
        let Some(record) = (unsafe { (user_data as *const SessionRecord).as_ref() }) else {
            return;
        };
        // SAFETY: the manager passes a NUL-terminated message or null.
        let message = unsafe { c_string_lossy(message) };
        if record.is_retired() {
            debug!(code, reason = %message, "DRM manager error after release");
            return;
        }
        let sink = lock(&record.error_sink).clone();
        match sink {
            Some(sink) => sink(code as i64, &message),
            None => error!(code, reason = %message, "DRM manager error"),
        }
    })
}

unsafe extern "C" fn on_request_key(
    key_session: *mut c_void,
    message_type: c_int,
    message: *mut c_void,
    length: c_int,
    user_data: *mut c_void,
) -> c_int {
    guard_callback("request_key", status::INTERNAL_ERROR, || {
        // SAFETY: `user_data` is null or a record kept alive by the table.
        let Some(record) = (unsafe { (user_data as *const SessionRecord).as_ref() }) else {
            return status::INVALID_PARAM;
        };
        if record.is_retired() {
            debug!(message_type, "Key request for a released session");
            return status::INVALID_SESSION;
        }
        let Some(callback) = lock(&record.challenge).clone() else {
            warn!("Challenge without a registered handler");
            return status::INTERNAL_ERROR;
        };
        // SAFETY: the manager passes `length` readable bytes.
        let payload = Bytes::copy_from_slice(unsafe { byte_slice(message as *const u8, length as i64) });
        debug!(message_type, len = payload.len(), "Key request from DRM manager");

        match callback(ChallengeMessage {
            key_session: KeySessionId(key_session as usize),
            message_type,
            payload,
        }) {
            Ok(()) => status::NONE,
            Err(e) => e.code,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fake_raw(n: usize) -> *mut c_void {
        n as *mut c_void
    }

    #[test]
    fn test_lookup_outlives_release() {
        let mut table = SessionTable::default();
        table.insert(fake_raw(0x10));
        let session = EngineSession(0x10);

        let held = table.get(session).unwrap();
        assert!(table.retire(session));
        assert!(table.get(session).is_err());
        assert_eq!(table.live_count(), 0);

        // the clone taken before release still reads the record
        assert_eq!(held.raw as usize, 0x10);
        assert!(held.is_retired());
        assert!(!table.retire(session));
    }

    #[test]
    fn test_retired_record_keeps_callback_address() {
        let mut table = SessionTable::default();
        let record = table.insert(fake_raw(0x20));
        let user_data = record.user_data();
        drop(record);
        table.retire(EngineSession(0x20));

        // the manager may still call back with the registered address
        // SAFETY: retired records live as long as the table.
        let code = unsafe { on_request_key(std::ptr::null_mut(), 0, std::ptr::null_mut(), 0, user_data) };
        assert_eq!(code, status::INVALID_SESSION);
        // SAFETY: as above.
        unsafe { on_error_event(5, std::ptr::null_mut(), user_data) };
    }

    #[test]
    fn test_request_key_reaches_challenge_handler() {
        let mut table = SessionTable::default();
        let record = table.insert(fake_raw(0x30));
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        *lock(&record.challenge) = Some(Arc::new(move |message: ChallengeMessage| -> NativeResult<()> {
            counter.store(message.payload.len(), Ordering::SeqCst);
            Ok(())
        }));

        let mut challenge = *b"challenge";
        // SAFETY: `challenge` outlives the call; the record is live.
        let code = unsafe {
            on_request_key(
                std::ptr::null_mut(),
                1,
                challenge.as_mut_ptr() as *mut c_void,
                challenge.len() as c_int,
                record.user_data(),
            )
        };
        assert_eq!(code, status::NONE);
        assert_eq!(seen.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn test_panicking_handlers_do_not_unwind_into_c() {
        let mut table = SessionTable::default();
        let record = table.insert(fake_raw(0x40));
        *lock(&record.challenge) = Some(Arc::new(|_: ChallengeMessage| -> NativeResult<()> {
            panic!("challenge handler failed")
        }));
        *lock(&record.error_sink) = Some(Arc::new(|_: i64, _: &str| panic!("sink failed")));

        // SAFETY: the record is live.
        let code = unsafe { on_request_key(std::ptr::null_mut(), 0, std::ptr::null_mut(), 0, record.user_data()) };
        assert_eq!(code, status::INTERNAL_ERROR);
        // SAFETY: as above.
        unsafe { on_error_event(1, std::ptr::null_mut(), record.user_data()) };
    }

    #[test]
    fn test_null_user_data_is_rejected() {
        // SAFETY: null user data is rejected before any dereference.
        unsafe {
            assert_eq!(
                on_request_key(std::ptr::null_mut(), 0, std::ptr::null_mut(), 0, std::ptr::null_mut()),
                status::INVALID_PARAM
            );
            on_error_event(0, std::ptr::null_mut(), std::ptr::null_mut());
        }
    }
}
