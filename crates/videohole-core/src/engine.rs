//! Playback engine contract
//!
//! The platform playback engine is an opaque capability. Both backends
//! implement [`PlaybackEngine`]; the gate and the orchestrator only talk to
//! this trait. Engines report failures as [`NativeError`] and the caller
//! attaches the action name.

use crate::error::{Error, Result};
use crate::events::EngineEventSender;
use crate::types::{BackendKind, DisplayRotation, DrmVariant, EngineState, Geometry, VideoSize, WindowHandle};
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by a native call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code:#x})")]
pub struct NativeError {
    pub code: i32,
    pub message: String,
}

impl NativeError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Error for entry points a backend does not provide
    pub fn unsupported(operation: &str) -> Self {
        Self::new(-1, format!("{operation} is not available"))
    }
}

pub type NativeResult<T> = std::result::Result<T, NativeError>;

impl From<NativeError> for Error {
    fn from(e: NativeError) -> Self {
        Error::EngineError {
            code: e.code,
            message: e.message,
        }
    }
}

/// Opaque value the decryption pipeline hands back with key requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineContext(pub usize);

/// Synchronous DRM entry points the pipeline calls on its own threads
pub trait DrmHooks: Send + Sync {
    /// Out-of-band init data (pssh) found in the stream. Returns an engine
    /// status code, `0` meaning accepted.
    fn init_data(&self, data: &[u8]) -> i32;

    /// The pipeline asks for key material for `drm_handle`. Must answer
    /// without blocking.
    fn complete_security_init(&self, drm_handle: i32, init_data: &[u8], context: PipelineContext) -> bool;
}

/// DRM session handed to an engine
#[derive(Clone)]
pub struct DrmBinding {
    pub variant: DrmVariant,
    /// Handle resolved from the DRM session
    pub handle: i32,
    pub hooks: Arc<dyn DrmHooks>,
}

impl std::fmt::Debug for DrmBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrmBinding")
            .field("variant", &self.variant)
            .field("handle", &self.handle)
            .finish()
    }
}

/// How the video is placed inside the display surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    LetterBox,
    FullScreen,
    /// Destination region of interest set through `set_display_roi`
    DstRoi,
}

/// Narrow operation set of a playback engine
pub trait PlaybackEngine: Send {
    fn kind(&self) -> BackendKind;

    fn create(&mut self) -> NativeResult<()>;
    fn destroy(&mut self) -> NativeResult<()>;

    /// Install callbacks. Every callback is delivered through `events`.
    fn register_listener(&mut self, events: EngineEventSender) -> NativeResult<()>;
    fn unregister_listener(&mut self) {}

    fn set_app_id(&mut self, _app_id: &str) -> NativeResult<()> {
        Ok(())
    }

    /// Bind a DRM handle and the pipeline-facing hooks
    fn set_drm(&mut self, binding: DrmBinding) -> NativeResult<()>;

    /// Attach an overlay surface covering `geometry` of `window`
    fn set_display(&mut self, window: WindowHandle, geometry: Geometry) -> NativeResult<()>;
    fn set_display_mode(&mut self, mode: DisplayMode) -> NativeResult<()>;
    fn set_display_roi(&mut self, roi: Geometry) -> NativeResult<()>;
    fn set_display_visible(&mut self, _visible: bool) -> NativeResult<()> {
        Ok(())
    }

    fn open(&mut self, uri: &str) -> NativeResult<()>;
    fn prepare_async(&mut self) -> NativeResult<()>;
    fn unprepare(&mut self) -> NativeResult<()> {
        Ok(())
    }

    fn start(&mut self) -> NativeResult<()>;
    fn resume(&mut self) -> NativeResult<()> {
        self.start()
    }
    fn pause(&mut self) -> NativeResult<()>;
    fn set_playback_rate(&mut self, rate: f64) -> NativeResult<()>;
    fn set_looping(&mut self, _looping: bool) -> NativeResult<()> {
        Err(NativeError::unsupported("set_looping"))
    }
    fn set_volume(&mut self, _volume: f64) -> NativeResult<()> {
        Err(NativeError::unsupported("set_volume"))
    }
    /// Seek; completion arrives as `EngineEvent::SeekCompleted`
    fn seek(&mut self, position_ms: i64) -> NativeResult<()>;

    fn state(&self) -> NativeResult<EngineState>;
    fn duration(&self) -> NativeResult<i64>;
    fn position(&self) -> NativeResult<i64>;
    fn video_size(&self) -> NativeResult<VideoSize>;
    fn display_rotation(&self) -> NativeResult<DisplayRotation> {
        Ok(DisplayRotation::None)
    }
}

/// Windowing collaborator that sizes the video surface
pub trait DisplayProvider: Send {
    fn window(&self) -> WindowHandle;
    fn geometry(&self) -> Result<Geometry>;
}

/// Display with a fixed window and geometry
#[derive(Debug, Clone, Copy)]
pub struct FixedDisplay {
    pub window: WindowHandle,
    pub geometry: Geometry,
}

impl FixedDisplay {
    pub fn new(window: WindowHandle, geometry: Geometry) -> Self {
        Self { window, geometry }
    }
}

impl DisplayProvider for FixedDisplay {
    fn window(&self) -> WindowHandle {
        self.window
    }

    fn geometry(&self) -> Result<Geometry> {
        Ok(self.geometry)
    }
}
