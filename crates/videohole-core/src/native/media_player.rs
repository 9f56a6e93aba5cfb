//! Playback engine backed by the platform C media player
//! (`libcapi-media-player`), plus the window geometry lookup used to size
//! its overlay surface.
//!
//! Callbacks are plain `extern "C"` trampolines. Their user data points at a
//! boxed [`CallbackContext`] owned by the engine, which forwards everything
//! into an [`EngineEventSender`]. A panic inside a callback is caught and
//! logged before it can reach the C caller.

use super::{byte_slice, c_string_lossy, guard_callback, symbol, CapabilitySet, LoadError, NativeLibrary};
use crate::drm::status;
use crate::engine::{
    DisplayMode, DisplayProvider, DrmBinding, DrmHooks, NativeError, NativeResult, PipelineContext, PlaybackEngine,
};
use crate::error::Result;
use crate::events::{EngineEvent, EngineEventSender};
use crate::types::{BackendKind, DisplayRotation, EngineState, Geometry, MediaPlayerState, VideoSize, WindowHandle};
use libloading::Library;
use std::ffi::{c_char, c_int, c_uint, c_ulong, c_void, CString};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub const LIBRARY_NAME: &str = "libcapi-media-player.so.0";
pub const ECORE_WL2_LIBRARY_NAME: &str = "libecore_wl2.so.1";

type PlayerHandle = *mut c_void;

const PLAYER_ERROR_NONE: c_int = 0;
const PLAYER_DISPLAY_TYPE_OVERLAY: c_int = 0;
const PLAYER_DRM_TYPE_EME: c_int = 14;

type PreparedFn = unsafe extern "C" fn(*mut c_void);
type CompletedFn = unsafe extern "C" fn(*mut c_void);
type SeekCompletedFn = unsafe extern "C" fn(*mut c_void);
type BufferingFn = unsafe extern "C" fn(c_int, *mut c_void);
type InterruptedFn = unsafe extern "C" fn(c_int, *mut c_void);
type ErrorFn = unsafe extern "C" fn(c_int, *mut c_void);
type SubtitleUpdatedFn = unsafe extern "C" fn(c_ulong, *mut c_char, *mut c_void);
type SecurityInitCompleteFn = unsafe extern "C" fn(*mut c_int, c_uint, *mut u8, *mut c_void) -> bool;
type InitDataFn = unsafe extern "C" fn(c_int, *mut c_void, c_int, *mut c_void) -> c_int;

fn display_mode_code(mode: DisplayMode) -> c_int {
    match mode {
        DisplayMode::LetterBox => 0,
        DisplayMode::FullScreen => 2,
        DisplayMode::DstRoi => 5,
    }
}

// ---------------------------------------------------------------------------
// Capability sets
// ---------------------------------------------------------------------------

/// Public C API of the media player
#[derive(Clone)]
pub struct MediaPlayerApi {
    _lib: Arc<Library>,
    create: unsafe extern "C" fn(*mut PlayerHandle) -> c_int,
    destroy: unsafe extern "C" fn(PlayerHandle) -> c_int,
    set_uri: unsafe extern "C" fn(PlayerHandle, *const c_char) -> c_int,
    prepare_async: unsafe extern "C" fn(PlayerHandle, PreparedFn, *mut c_void) -> c_int,
    unprepare: unsafe extern "C" fn(PlayerHandle) -> c_int,
    start: unsafe extern "C" fn(PlayerHandle) -> c_int,
    pause: unsafe extern "C" fn(PlayerHandle) -> c_int,
    get_state: unsafe extern "C" fn(PlayerHandle, *mut c_int) -> c_int,
    set_display_mode: unsafe extern "C" fn(PlayerHandle, c_int) -> c_int,
    set_display_roi_area: unsafe extern "C" fn(PlayerHandle, c_int, c_int, c_int, c_int) -> c_int,
    set_display_visible: unsafe extern "C" fn(PlayerHandle, bool) -> c_int,
    get_display_rotation: unsafe extern "C" fn(PlayerHandle, *mut c_int) -> c_int,
    set_looping: unsafe extern "C" fn(PlayerHandle, bool) -> c_int,
    set_volume: unsafe extern "C" fn(PlayerHandle, f32, f32) -> c_int,
    set_playback_rate: unsafe extern "C" fn(PlayerHandle, f32) -> c_int,
    set_play_position: unsafe extern "C" fn(PlayerHandle, c_int, bool, SeekCompletedFn, *mut c_void) -> c_int,
    get_play_position: unsafe extern "C" fn(PlayerHandle, *mut c_int) -> c_int,
    get_duration: unsafe extern "C" fn(PlayerHandle, *mut c_int) -> c_int,
    get_video_size: unsafe extern "C" fn(PlayerHandle, *mut c_int, *mut c_int) -> c_int,
    set_buffering_cb: unsafe extern "C" fn(PlayerHandle, BufferingFn, *mut c_void) -> c_int,
    set_completed_cb: unsafe extern "C" fn(PlayerHandle, CompletedFn, *mut c_void) -> c_int,
    set_interrupted_cb: unsafe extern "C" fn(PlayerHandle, InterruptedFn, *mut c_void) -> c_int,
    set_error_cb: unsafe extern "C" fn(PlayerHandle, ErrorFn, *mut c_void) -> c_int,
    set_subtitle_updated_cb: unsafe extern "C" fn(PlayerHandle, SubtitleUpdatedFn, *mut c_void) -> c_int,
    unset_buffering_cb: unsafe extern "C" fn(PlayerHandle) -> c_int,
    unset_completed_cb: unsafe extern "C" fn(PlayerHandle) -> c_int,
    unset_interrupted_cb: unsafe extern "C" fn(PlayerHandle) -> c_int,
    unset_error_cb: unsafe extern "C" fn(PlayerHandle) -> c_int,
    unset_subtitle_updated_cb: unsafe extern "C" fn(PlayerHandle) -> c_int,
}

impl CapabilitySet for MediaPlayerApi {
    fn resolve(library: &Arc<Library>) -> std::result::Result<Self, LoadError> {
        // SAFETY: signatures follow player.h.
        unsafe {
            Ok(Self {
                create: symbol(library, b"player_create\0")?,
                destroy: symbol(library, b"player_destroy\0")?,
                set_uri: symbol(library, b"player_set_uri\0")?,
                prepare_async: symbol(library, b"player_prepare_async\0")?,
                unprepare: symbol(library, b"player_unprepare\0")?,
                start: symbol(library, b"player_start\0")?,
                pause: symbol(library, b"player_pause\0")?,
                get_state: symbol(library, b"player_get_state\0")?,
                set_display_mode: symbol(library, b"player_set_display_mode\0")?,
                set_display_roi_area: symbol(library, b"player_set_display_roi_area\0")?,
                set_display_visible: symbol(library, b"player_set_display_visible\0")?,
                get_display_rotation: symbol(library, b"player_get_display_rotation\0")?,
                set_looping: symbol(library, b"player_set_looping\0")?,
                set_volume: symbol(library, b"player_set_volume\0")?,
                set_playback_rate: symbol(library, b"player_set_playback_rate\0")?,
                set_play_position: symbol(library, b"player_set_play_position\0")?,
                get_play_position: symbol(library, b"player_get_play_position\0")?,
                get_duration: symbol(library, b"player_get_duration\0")?,
                get_video_size: symbol(library, b"player_get_video_size\0")?,
                set_buffering_cb: symbol(library, b"player_set_buffering_cb\0")?,
                set_completed_cb: symbol(library, b"player_set_completed_cb\0")?,
                set_interrupted_cb: symbol(library, b"player_set_interrupted_cb\0")?,
                set_error_cb: symbol(library, b"player_set_error_cb\0")?,
                set_subtitle_updated_cb: symbol(library, b"player_set_subtitle_updated_cb\0")?,
                unset_buffering_cb: symbol(library, b"player_unset_buffering_cb\0")?,
                unset_completed_cb: symbol(library, b"player_unset_completed_cb\0")?,
                unset_interrupted_cb: symbol(library, b"player_unset_interrupted_cb\0")?,
                unset_error_cb: symbol(library, b"player_unset_error_cb\0")?,
                unset_subtitle_updated_cb: symbol(library, b"player_unset_subtitle_updated_cb\0")?,
                _lib: library.clone(),
            })
        }
    }
}

/// Private entry points for overlay display and DRM binding
#[derive(Clone)]
pub struct MediaPlayerPrivateApi {
    _lib: Arc<Library>,
    set_ecore_wl_display:
        unsafe extern "C" fn(PlayerHandle, c_int, *mut c_void, c_int, c_int, c_int, c_int) -> c_int,
    set_drm_handle: unsafe extern "C" fn(PlayerHandle, c_int, c_int) -> c_int,
    set_drm_init_complete_cb: unsafe extern "C" fn(PlayerHandle, SecurityInitCompleteFn, *mut c_void) -> c_int,
    set_drm_init_data_cb: unsafe extern "C" fn(PlayerHandle, InitDataFn, *mut c_void) -> c_int,
}

impl CapabilitySet for MediaPlayerPrivateApi {
    fn resolve(library: &Arc<Library>) -> std::result::Result<Self, LoadError> {
        // SAFETY: signatures follow the platform's private player header.
        unsafe {
            Ok(Self {
                set_ecore_wl_display: symbol(library, b"player_set_ecore_wl_display\0")?,
                set_drm_handle: symbol(library, b"player_set_drm_handle\0")?,
                set_drm_init_complete_cb: symbol(library, b"player_set_drm_init_complete_cb\0")?,
                set_drm_init_data_cb: symbol(library, b"player_set_drm_init_data_cb\0")?,
                _lib: library.clone(),
            })
        }
    }
}

/// Window geometry lookup from the Wayland toolkit
#[derive(Clone)]
pub struct EcoreWl2Api {
    _lib: Arc<Library>,
    window_geometry_get: unsafe extern "C" fn(*mut c_void, *mut c_int, *mut c_int, *mut c_int, *mut c_int),
}

impl CapabilitySet for EcoreWl2Api {
    fn resolve(library: &Arc<Library>) -> std::result::Result<Self, LoadError> {
        // SAFETY: signature follows Ecore_Wl2.h.
        unsafe {
            Ok(Self {
                window_geometry_get: symbol(library, b"ecore_wl2_window_geometry_get\0")?,
                _lib: library.clone(),
            })
        }
    }
}

macro_rules! opaque_debug {
    ($($ty:ident),*) => {
        $(impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($ty)).field("loaded", &true).finish()
            }
        })*
    };
}

opaque_debug!(MediaPlayerApi, MediaPlayerPrivateApi, EcoreWl2Api);

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

/// [`DisplayProvider`] that asks the toolkit for the window geometry
#[derive(Debug, Clone)]
pub struct EcoreWindowDisplay {
    api: EcoreWl2Api,
    window: WindowHandle,
}

impl EcoreWindowDisplay {
    pub fn load(window: WindowHandle) -> Result<Self> {
        let library = NativeLibrary::open(ECORE_WL2_LIBRARY_NAME)?;
        Ok(Self {
            api: library.resolve()?,
            window,
        })
    }
}

impl DisplayProvider for EcoreWindowDisplay {
    fn window(&self) -> WindowHandle {
        self.window
    }

    fn geometry(&self) -> Result<Geometry> {
        let (mut x, mut y, mut width, mut height) = (0, 0, 0, 0);
        // SAFETY: the window handle comes from the embedder and outlives the
        // player; the out-pointers are valid locals.
        unsafe {
            (self.api.window_geometry_get)(self.window.0 as *mut c_void, &mut x, &mut y, &mut width, &mut height)
        };
        Ok(Geometry::new(x, y, width, height))
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// State reachable from C callbacks
#[derive(Default)]
struct CallbackContext {
    events: Mutex<Option<EngineEventSender>>,
    drm: Mutex<Option<Arc<dyn DrmHooks>>>,
    player: Mutex<usize>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CallbackContext {
    fn send(&self, event: EngineEvent) {
        match lock(&self.events).as_ref() {
            Some(events) => events.send(event),
            None => debug!(event = ?event, "No listener for media player callback"),
        }
    }

    fn drm(&self) -> Option<Arc<dyn DrmHooks>> {
        lock(&self.drm).clone()
    }
}

/// [`PlaybackEngine`] over the C media player
pub struct NativeMediaPlayer {
    api: MediaPlayerApi,
    private: MediaPlayerPrivateApi,
    player: PlayerHandle,
    context: Box<CallbackContext>,
}

// SAFETY: the player handle is only used through the C API, which may be
// called from any thread. Callback state is behind mutexes.
unsafe impl Send for NativeMediaPlayer {}

fn check(code: c_int, action: &str) -> NativeResult<()> {
    if code == PLAYER_ERROR_NONE {
        Ok(())
    } else {
        Err(NativeError::new(code, format!("{action} returned {code:#x}")))
    }
}

impl NativeMediaPlayer {
    /// Load both capability sets from the media player library
    pub fn load() -> Result<Self> {
        let mut library = NativeLibrary::open(LIBRARY_NAME)?;
        let api = library.resolve()?;
        let private = library.resolve()?;
        library.close();
        Ok(Self::new(api, private))
    }

    pub fn new(api: MediaPlayerApi, private: MediaPlayerPrivateApi) -> Self {
        Self {
            api,
            private,
            player: std::ptr::null_mut(),
            context: Box::default(),
        }
    }

    fn user_data(&self) -> *mut c_void {
        &*self.context as *const CallbackContext as *mut c_void
    }

    fn handle(&self) -> NativeResult<PlayerHandle> {
        if self.player.is_null() {
            Err(NativeError::new(-1, "media player is not created"))
        } else {
            Ok(self.player)
        }
    }

    fn call(&self, action: &str, f: impl FnOnce(PlayerHandle) -> c_int) -> NativeResult<()> {
        let player = self.handle()?;
        check(f(player), action)
    }
}

impl PlaybackEngine for NativeMediaPlayer {
    fn kind(&self) -> BackendKind {
        BackendKind::MediaPlayer
    }

    fn create(&mut self) -> NativeResult<()> {
        let mut player: PlayerHandle = std::ptr::null_mut();
        // SAFETY: out-pointer to a local.
        check(unsafe { (self.api.create)(&mut player) }, "player_create")?;
        self.player = player;
        *lock(&self.context.player) = player as usize;
        info!("Media player created");
        Ok(())
    }

    fn destroy(&mut self) -> NativeResult<()> {
        let player = self.handle()?;
        // SAFETY: live handle; no callbacks fire after destroy returns.
        check(unsafe { (self.api.destroy)(player) }, "player_destroy")?;
        self.player = std::ptr::null_mut();
        *lock(&self.context.player) = 0;
        *lock(&self.context.drm) = None;
        Ok(())
    }

    fn register_listener(&mut self, events: EngineEventSender) -> NativeResult<()> {
        *lock(&self.context.events) = Some(events);
        let data = self.user_data();
        let api = &self.api;
        // SAFETY: `data` points at the boxed context, which outlives the
        // player handle.
        unsafe {
            self.call("player_set_buffering_cb", |p| (api.set_buffering_cb)(p, on_buffering, data))?;
            self.call("player_set_completed_cb", |p| (api.set_completed_cb)(p, on_completed, data))?;
            self.call("player_set_interrupted_cb", |p| (api.set_interrupted_cb)(p, on_interrupted, data))?;
            self.call("player_set_error_cb", |p| (api.set_error_cb)(p, on_error, data))?;
            self.call("player_set_subtitle_updated_cb", |p| {
                (api.set_subtitle_updated_cb)(p, on_subtitle_updated, data)
            })?;
        }
        Ok(())
    }

    fn unregister_listener(&mut self) {
        if let Ok(player) = self.handle() {
            // SAFETY: live handle.
            unsafe {
                (self.api.unset_buffering_cb)(player);
                (self.api.unset_completed_cb)(player);
                (self.api.unset_interrupted_cb)(player);
                (self.api.unset_error_cb)(player);
                (self.api.unset_subtitle_updated_cb)(player);
            }
        }
        *lock(&self.context.events) = None;
    }

    fn set_drm(&mut self, binding: DrmBinding) -> NativeResult<()> {
        *lock(&self.context.drm) = Some(binding.hooks.clone());
        let data = self.user_data();
        let private = &self.private;
        // SAFETY: live handle; `data` outlives it.
        unsafe {
            self.call("player_set_drm_handle", |p| {
                (private.set_drm_handle)(p, PLAYER_DRM_TYPE_EME, binding.handle)
            })?;
            self.call("player_set_drm_init_complete_cb", |p| {
                (private.set_drm_init_complete_cb)(p, on_security_init_complete, data)
            })?;
            self.call("player_set_drm_init_data_cb", |p| {
                (private.set_drm_init_data_cb)(p, on_init_data, data)
            })?;
        }
        Ok(())
    }

    fn set_display(&mut self, window: WindowHandle, geometry: Geometry) -> NativeResult<()> {
        let private = &self.private;
        // SAFETY: the window handle comes from the embedder.
        self.call("player_set_ecore_wl_display", |p| unsafe {
            (private.set_ecore_wl_display)(
                p,
                PLAYER_DISPLAY_TYPE_OVERLAY,
                window.0 as *mut c_void,
                geometry.x,
                geometry.y,
                geometry.width,
                geometry.height,
            )
        })
    }

    fn set_display_mode(&mut self, mode: DisplayMode) -> NativeResult<()> {
        let api = &self.api;
        // SAFETY: live handle.
        self.call("player_set_display_mode", |p| unsafe {
            (api.set_display_mode)(p, display_mode_code(mode))
        })
    }

    fn set_display_roi(&mut self, roi: Geometry) -> NativeResult<()> {
        let api = &self.api;
        // SAFETY: live handle.
        self.call("player_set_display_roi_area", |p| unsafe {
            (api.set_display_roi_area)(p, roi.x, roi.y, roi.width, roi.height)
        })
    }

    fn set_display_visible(&mut self, visible: bool) -> NativeResult<()> {
        let api = &self.api;
        // SAFETY: live handle.
        self.call("player_set_display_visible", |p| unsafe { (api.set_display_visible)(p, visible) })
    }

    fn open(&mut self, uri: &str) -> NativeResult<()> {
        let uri = CString::new(uri).map_err(|e| NativeError::new(-1, e.to_string()))?;
        let api = &self.api;
        // SAFETY: `uri` outlives the call.
        self.call("player_set_uri", |p| unsafe { (api.set_uri)(p, uri.as_ptr()) })
    }

    fn prepare_async(&mut self) -> NativeResult<()> {
        let data = self.user_data();
        let api = &self.api;
        // SAFETY: live handle; `data` outlives it.
        self.call("player_prepare_async", |p| unsafe { (api.prepare_async)(p, on_prepared, data) })
    }

    fn unprepare(&mut self) -> NativeResult<()> {
        let api = &self.api;
        // SAFETY: live handle.
        self.call("player_unprepare", |p| unsafe { (api.unprepare)(p) })
    }

    fn start(&mut self) -> NativeResult<()> {
        let api = &self.api;
        // SAFETY: live handle.
        self.call("player_start", |p| unsafe { (api.start)(p) })
    }

    fn pause(&mut self) -> NativeResult<()> {
        let api = &self.api;
        // SAFETY: live handle.
        self.call("player_pause", |p| unsafe { (api.pause)(p) })
    }

    fn set_playback_rate(&mut self, rate: f64) -> NativeResult<()> {
        let api = &self.api;
        // SAFETY: live handle.
        self.call("player_set_playback_rate", |p| unsafe { (api.set_playback_rate)(p, rate as f32) })
    }

    fn set_looping(&mut self, looping: bool) -> NativeResult<()> {
        let api = &self.api;
        // SAFETY: live handle.
        self.call("player_set_looping", |p| unsafe { (api.set_looping)(p, looping) })
    }

    fn set_volume(&mut self, volume: f64) -> NativeResult<()> {
        let api = &self.api;
        let volume = volume as f32;
        // SAFETY: live handle.
        self.call("player_set_volume", |p| unsafe { (api.set_volume)(p, volume, volume) })
    }

    fn seek(&mut self, position_ms: i64) -> NativeResult<()> {
        let position = c_int::try_from(position_ms)
            .map_err(|_| NativeError::new(-1, format!("seek position {position_ms} out of range")))?;
        let data = self.user_data();
        let api = &self.api;
        // SAFETY: live handle; `data` outlives it.
        self.call("player_set_play_position", |p| unsafe {
            (api.set_play_position)(p, position, true, on_seek_completed, data)
        })
    }

    fn state(&self) -> NativeResult<EngineState> {
        let player = self.handle()?;
        let mut raw: c_int = 0;
        // SAFETY: live handle; out-pointer to a local.
        check(unsafe { (self.api.get_state)(player, &mut raw) }, "player_get_state")?;
        Ok(MediaPlayerState::from_raw(raw).into())
    }

    fn duration(&self) -> NativeResult<i64> {
        let player = self.handle()?;
        let mut duration: c_int = 0;
        // SAFETY: live handle; out-pointer to a local.
        check(unsafe { (self.api.get_duration)(player, &mut duration) }, "player_get_duration")?;
        Ok(duration as i64)
    }

    fn position(&self) -> NativeResult<i64> {
        let player = self.handle()?;
        let mut position: c_int = 0;
        // SAFETY: live handle; out-pointer to a local.
        check(
            unsafe { (self.api.get_play_position)(player, &mut position) },
            "player_get_play_position",
        )?;
        Ok(position as i64)
    }

    fn video_size(&self) -> NativeResult<VideoSize> {
        let player = self.handle()?;
        let (mut width, mut height): (c_int, c_int) = (0, 0);
        // SAFETY: live handle; out-pointers to locals.
        check(
            unsafe { (self.api.get_video_size)(player, &mut width, &mut height) },
            "player_get_video_size",
        )?;
        Ok(VideoSize::new(width, height))
    }

    fn display_rotation(&self) -> NativeResult<DisplayRotation> {
        let player = self.handle()?;
        let mut raw: c_int = 0;
        // SAFETY: live handle; out-pointer to a local.
        check(
            unsafe { (self.api.get_display_rotation)(player, &mut raw) },
            "player_get_display_rotation",
        )?;
        Ok(DisplayRotation::from_raw(raw))
    }
}

impl Drop for NativeMediaPlayer {
    fn drop(&mut self) {
        if !self.player.is_null() {
            warn!("Media player dropped without destroy");
            if let Err(e) = self.destroy() {
                warn!(error = %e, "Failed to destroy media player");
            }
        }
    }
}

impl std::fmt::Debug for NativeMediaPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeMediaPlayer")
            .field("created", &!self.player.is_null())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Trampolines
// ---------------------------------------------------------------------------

/// Run `body` against the registered context, or return `fallback` when
/// the user data is null or the body panics.
///
/// # Safety
/// `user_data` must be null or the context registered with the callback.
unsafe fn with_context<T>(
    callback: &'static str,
    user_data: *mut c_void,
    fallback: T,
    body: impl FnOnce(&CallbackContext) -> T,
) -> T {
    // SAFETY: forwarded to the caller.
    let Some(ctx) = (unsafe { (user_data as *const CallbackContext).as_ref() }) else {
        return fallback;
    };
    guard_callback(callback, fallback, || body(ctx))
}

unsafe extern "C" fn on_prepared(user_data: *mut c_void) {
    // SAFETY: registered user data.
    unsafe { with_context("prepared", user_data, (), |ctx| ctx.send(EngineEvent::Prepared { success: true })) }
}

unsafe extern "C" fn on_buffering(percent: c_int, user_data: *mut c_void) {
    // SAFETY: registered user data.
    unsafe { with_context("buffering", user_data, (), |ctx| ctx.send(EngineEvent::Buffering { percent })) }
}

unsafe extern "C" fn on_seek_completed(user_data: *mut c_void) {
    // SAFETY: registered user data.
    unsafe { with_context("seek_completed", user_data, (), |ctx| ctx.send(EngineEvent::SeekCompleted)) }
}

unsafe extern "C" fn on_completed(user_data: *mut c_void) {
    // SAFETY: registered user data.
    unsafe { with_context("completed", user_data, (), |ctx| ctx.send(EngineEvent::Completed)) }
}

unsafe extern "C" fn on_interrupted(code: c_int, user_data: *mut c_void) {
    // SAFETY: registered user data.
    unsafe { with_context("interrupted", user_data, (), |ctx| ctx.send(EngineEvent::Interrupted { code })) }
}

unsafe extern "C" fn on_error(code: c_int, user_data: *mut c_void) {
    // SAFETY: registered user data.
    unsafe {
        with_context("error", user_data, (), |ctx| {
            ctx.send(EngineEvent::Error {
                code,
                message: format!("media player error {code:#x}"),
            })
        })
    }
}

unsafe extern "C" fn on_subtitle_updated(duration: c_ulong, text: *mut c_char, user_data: *mut c_void) {
    // SAFETY: registered user data.
    unsafe {
        with_context("subtitle_updated", user_data, (), |ctx| {
            // SAFETY: the player passes a C string or null.
            let text = unsafe { c_string_lossy(text) };
            ctx.send(EngineEvent::SubtitleUpdated {
                duration: duration as i64,
                text,
            })
        })
    }
}

unsafe extern "C" fn on_security_init_complete(
    drm_handle: *mut c_int,
    length: c_uint,
    pssh: *mut u8,
    user_data: *mut c_void,
) -> bool {
    // SAFETY: registered user data.
    unsafe {
        with_context("security_init_complete", user_data, false, |ctx| {
            let Some(hooks) = ctx.drm() else {
                return false;
            };
            if drm_handle.is_null() {
                return false;
            }
            // SAFETY: the pipeline passes a valid handle and `length` pssh bytes.
            let (handle, init_data) = unsafe { (*drm_handle, byte_slice(pssh, length as i64)) };
            let player = *lock(&ctx.player);
            hooks.complete_security_init(handle, init_data, PipelineContext(player))
        })
    }
}

unsafe extern "C" fn on_init_data(_init_type: c_int, data: *mut c_void, length: c_int, user_data: *mut c_void) -> c_int {
    // SAFETY: registered user data.
    unsafe {
        with_context("init_data", user_data, 0, |ctx| {
            let Some(hooks) = ctx.drm() else {
                return 0;
            };
            // SAFETY: the pipeline passes `length` readable bytes.
            let data = unsafe { byte_slice(data as *const u8, length as i64) };
            guard_callback("init_data", status::INTERNAL_ERROR, || hooks.init_data(data))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_mode_codes() {
        assert_eq!(display_mode_code(DisplayMode::DstRoi), 5);
        assert_eq!(display_mode_code(DisplayMode::LetterBox), 0);
    }

    #[test]
    fn test_trampolines_ignore_null_user_data() {
        // SAFETY: null user data is rejected before any dereference.
        unsafe {
            on_buffering(50, std::ptr::null_mut());
            on_completed(std::ptr::null_mut());
            assert!(!on_security_init_complete(
                std::ptr::null_mut(),
                0,
                std::ptr::null_mut(),
                std::ptr::null_mut()
            ));
            assert_eq!(on_init_data(0, std::ptr::null_mut(), 0, std::ptr::null_mut()), 0);
        }
    }

    #[tokio::test]
    async fn test_callbacks_reach_listener() {
        let context = Box::new(CallbackContext::default());
        let (sender, mut rx) = EngineEventSender::channel();
        *lock(&context.events) = Some(sender);
        let data = &*context as *const CallbackContext as *mut c_void;

        // SAFETY: `data` points at a live context.
        unsafe {
            on_buffering(30, data);
            on_interrupted(2, data);
        }
        assert_eq!(rx.recv().await, Some(EngineEvent::Buffering { percent: 30 }));
        assert_eq!(rx.recv().await, Some(EngineEvent::Interrupted { code: 2 }));
    }

    struct PanickingHooks;

    impl DrmHooks for PanickingHooks {
        fn init_data(&self, _data: &[u8]) -> i32 {
            panic!("pssh handler failed")
        }

        fn complete_security_init(&self, _drm_handle: i32, _init_data: &[u8], _context: PipelineContext) -> bool {
            panic!("security init handler failed")
        }
    }

    #[test]
    fn test_panicking_drm_hooks_are_contained() {
        let context = Box::new(CallbackContext::default());
        *lock(&context.drm) = Some(Arc::new(PanickingHooks));
        let data = &*context as *const CallbackContext as *mut c_void;
        let mut handle: c_int = 4;
        let mut pssh = [0u8; 4];

        // SAFETY: `data` points at a live context; buffers outlive the calls.
        unsafe {
            assert!(!on_security_init_complete(&mut handle, 4, pssh.as_mut_ptr(), data));
            assert_eq!(
                on_init_data(0, pssh.as_mut_ptr() as *mut c_void, 4, data),
                status::INTERNAL_ERROR
            );
        }
    }
}
