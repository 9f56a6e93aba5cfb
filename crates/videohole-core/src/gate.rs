//! Player State Gate
//!
//! Wraps a [`PlaybackEngine`] and checks every mutating operation against the
//! engine's normalized lifecycle state:
//!
//! | Operation            | Required state              | Otherwise          |
//! |----------------------|-----------------------------|--------------------|
//! | play                 | ready or paused             | no-op              |
//! | pause                | playing                     | no-op              |
//! | set_playback_speed   | past idle                   | invalid state      |
//! | seek                 | ready or above              | invalid state      |
//! | position             | playing or paused           | invalid state      |
//! | duration, video_size | source ready or above       | invalid state      |
//! | set_display_roi      | engine exists               | invalid state      |
//!
//! Looping and volume additionally depend on the backend offering them.

use crate::engine::{DisplayMode, DrmBinding, NativeError, NativeResult, PlaybackEngine};
use crate::error::{Error, Result};
use crate::events::EngineEventSender;
use crate::types::{BackendKind, DisplayRotation, EngineState, Geometry, VideoSize, WindowHandle};
use tracing::{debug, error, info, instrument, warn};

/// Map a failed setup call to an initialization failure
fn setup<T>(action: &str, result: NativeResult<T>) -> Result<T> {
    result.map_err(|e| {
        error!(action, error = %e, "Engine setup call failed");
        Error::init(action, e.to_string())
    })
}

/// Map a failed runtime call to an operation failure
fn call<T>(action: &str, result: NativeResult<T>) -> Result<T> {
    result.map_err(|e: NativeError| {
        error!(action, error = %e, "Engine call failed");
        Error::operation(action, e.to_string())
    })
}

/// State-checked access to one playback engine
pub struct PlayerGate {
    kind: BackendKind,
    engine: Box<dyn PlaybackEngine>,
    alive: bool,
    prepared: bool,
}

impl PlayerGate {
    pub fn new(engine: Box<dyn PlaybackEngine>) -> Self {
        Self {
            kind: engine.kind(),
            engine,
            alive: false,
            prepared: false,
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Whether the native engine exists (created and not yet destroyed)
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    fn engine(&self) -> Result<&(dyn PlaybackEngine + 'static)> {
        if self.alive {
            Ok(&*self.engine)
        } else {
            Err(Error::state(format!("{} engine is not created", self.kind)))
        }
    }

    fn engine_mut(&mut self) -> Result<&mut (dyn PlaybackEngine + 'static)> {
        if self.alive {
            Ok(&mut *self.engine)
        } else {
            Err(Error::state(format!("{} engine is not created", self.kind)))
        }
    }

    // ---------------------------------------------------------------------
    // Creation
    // ---------------------------------------------------------------------

    pub fn create(&mut self) -> Result<()> {
        if self.alive {
            return Err(Error::state("engine has already been created"));
        }
        setup("create", self.engine.create())?;
        self.alive = true;
        info!(backend = %self.kind, "Engine created");
        Ok(())
    }

    pub fn register_listener(&mut self, events: EngineEventSender) -> Result<()> {
        setup("register_listener", self.engine_mut()?.register_listener(events))
    }

    pub fn set_app_id(&mut self, app_id: &str) -> Result<()> {
        setup("set_app_id", self.engine_mut()?.set_app_id(app_id))
    }

    pub fn bind_drm(&mut self, binding: DrmBinding) -> Result<()> {
        debug!(binding = ?binding, "Binding drm handle");
        setup("set_drm", self.engine_mut()?.set_drm(binding))
    }

    /// Attach the overlay surface, switch to destination-ROI mode and apply
    /// the initial region
    pub fn bind_display(&mut self, window: WindowHandle, geometry: Geometry, roi: Geometry) -> Result<()> {
        let engine = self.engine_mut()?;
        setup("set_display", engine.set_display(window, geometry))?;
        setup("set_display_mode", engine.set_display_mode(DisplayMode::DstRoi))?;
        setup("set_display_roi", engine.set_display_roi(roi))
    }

    /// Bind the media URI and make the display visible
    pub fn bind_uri(&mut self, uri: &str) -> Result<()> {
        let engine = self.engine_mut()?;
        setup("open", engine.open(uri))?;
        setup("set_display_visible", engine.set_display_visible(true))
    }

    pub fn prepare_async(&mut self) -> Result<()> {
        setup("prepare_async", self.engine_mut()?.prepare_async())?;
        self.prepared = true;
        Ok(())
    }

    /// Tear the engine down. Returns false if there was nothing to destroy.
    #[instrument(skip(self), fields(backend = %self.kind))]
    pub fn teardown(&mut self) -> bool {
        if !self.alive {
            return false;
        }
        self.engine.unregister_listener();
        if self.prepared {
            if let Err(e) = self.engine.unprepare() {
                warn!(error = %e, "Failed to unprepare engine");
            }
            self.prepared = false;
        }
        if let Err(e) = self.engine.destroy() {
            error!(error = %e, "Failed to destroy engine");
        }
        self.alive = false;
        info!("Engine destroyed");
        true
    }

    // ---------------------------------------------------------------------
    // Gated operations
    // ---------------------------------------------------------------------

    /// Normalized engine state; `None` when no engine exists
    pub fn state(&self) -> Result<EngineState> {
        if !self.alive {
            return Ok(EngineState::None);
        }
        call("get_state", self.engine.state())
    }

    #[instrument(skip(self))]
    pub fn play(&mut self) -> Result<()> {
        let state = self.state()?;
        match state {
            EngineState::Ready => call("start", self.engine_mut()?.start()),
            EngineState::Paused => call("resume", self.engine_mut()?.resume()),
            _ => {
                debug!(state = %state, "Play ignored");
                Ok(())
            }
        }
    }

    #[instrument(skip(self))]
    pub fn pause(&mut self) -> Result<()> {
        let state = self.state()?;
        if state == EngineState::Playing {
            call("pause", self.engine_mut()?.pause())
        } else {
            debug!(state = %state, "Pause ignored");
            Ok(())
        }
    }

    #[instrument(skip(self))]
    pub fn set_playback_speed(&mut self, rate: f64) -> Result<()> {
        let state = self.state()?;
        if state <= EngineState::Idle {
            return Err(Error::state(format!("cannot set playback speed while {state}")));
        }
        call("set_playback_rate", self.engine_mut()?.set_playback_rate(rate))
    }

    /// Start a seek. The caller tracks the completion.
    #[instrument(skip(self))]
    pub fn seek(&mut self, position_ms: i64) -> Result<()> {
        let state = self.state()?;
        if state < EngineState::Ready {
            return Err(Error::state(format!("cannot seek while {state}")));
        }
        call("seek", self.engine_mut()?.seek(position_ms))
    }

    pub fn position(&self) -> Result<i64> {
        let state = self.state()?;
        if !matches!(state, EngineState::Playing | EngineState::Paused) {
            return Err(Error::state(format!("no playback position while {state}")));
        }
        call("get_position", self.engine()?.position())
    }

    pub fn duration(&self) -> Result<i64> {
        self.require_source_ready("duration")?;
        call("get_duration", self.engine()?.duration())
    }

    /// Native video size, before rotation
    pub fn video_size(&self) -> Result<VideoSize> {
        self.require_source_ready("video size")?;
        call("get_video_size", self.engine()?.video_size())
    }

    pub fn display_rotation(&self) -> Result<DisplayRotation> {
        call("get_display_rotation", self.engine()?.display_rotation())
    }

    pub fn set_display_roi(&mut self, roi: Geometry) -> Result<()> {
        debug!(roi = %roi, "Setting display roi");
        call("set_display_roi", self.engine_mut()?.set_display_roi(roi))
    }

    pub fn set_looping(&mut self, looping: bool) -> Result<()> {
        if !self.kind.supports_looping() {
            return Err(Error::UnsupportedOperation {
                operation: "set_looping",
                backend: self.kind.name(),
            });
        }
        call("set_looping", self.engine_mut()?.set_looping(looping))
    }

    pub fn set_volume(&mut self, volume: f64) -> Result<()> {
        if !self.kind.supports_volume() {
            return Err(Error::UnsupportedOperation {
                operation: "set_volume",
                backend: self.kind.name(),
            });
        }
        let clamped = volume.clamp(0.0, 1.0);
        if clamped != volume {
            warn!(volume, clamped, "Volume out of range");
        }
        call("set_volume", self.engine_mut()?.set_volume(clamped))
    }

    pub fn is_ready(&self) -> Result<bool> {
        Ok(self.state()? == EngineState::Ready)
    }

    fn require_source_ready(&self, what: &str) -> Result<()> {
        let state = self.state()?;
        if state < EngineState::SourceReady {
            return Err(Error::state(format!("{what} unavailable while {state}")));
        }
        Ok(())
    }
}

impl std::fmt::Debug for PlayerGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerGate")
            .field("kind", &self.kind)
            .field("alive", &self.alive)
            .field("prepared", &self.prepared)
            .finish()
    }
}
