//! Video Player - session orchestrator
//!
//! Coordinates:
//! - Engine creation and the optional DRM handshake setup
//! - Display binding and async preparation
//! - Engine callbacks, applied one at a time on the control thread
//! - Deferred key installation
//! - Outbound notifications

use crate::{
    config::PlayerConfig,
    drm::{
        DrmEngine, DrmSession, HttpLicenseTransport, IdleQueue, IdleScheduler, KeyInstallMode, LicenseDelegate,
        LicenseTransport, SessionOptions,
    },
    engine::{DisplayProvider, NativeError, PlaybackEngine},
    events::{EngineEvent, EngineEventSender, EventSink, PlayerEvent},
    gate::PlayerGate,
    types::*,
    Error, Result,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

const INTERRUPTED_CODE: &str = "Interrupted error";
const INTERRUPTED_MESSAGE: &str = "Video player has been interrupted.";

/// Continuation run once the outstanding seek completes
pub type SeekCallback = Box<dyn FnOnce() + Send>;

/// Lifecycle of one playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uncreated,
    Creating,
    DrmSetup,
    DisplayBound,
    UriBound,
    Preparing,
    Ready,
    Disposed,
}

impl SessionPhase {
    /// Check if transition to target phase is valid
    pub fn can_transition_to(&self, target: SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (self, target),
            (_, Disposed)
                | (Uncreated, Creating)
                | (Creating, DrmSetup)
                | (Creating, DisplayBound)
                | (DrmSetup, DisplayBound)
                | (DisplayBound, UriBound)
                | (UriBound, Preparing)
                | (Preparing, Ready)
        )
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionPhase::Uncreated => "uncreated",
            SessionPhase::Creating => "creating",
            SessionPhase::DrmSetup => "drm_setup",
            SessionPhase::DisplayBound => "display_bound",
            SessionPhase::UriBound => "uri_bound",
            SessionPhase::Preparing => "preparing",
            SessionPhase::Ready => "ready",
            SessionPhase::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// One user-visible playback instance
pub struct VideoPlayer {
    /// Sequential player id
    id: PlayerId,
    /// Player configuration
    config: PlayerConfig,
    /// Current phase
    phase: SessionPhase,
    /// Phase change broadcaster
    phase_tx: watch::Sender<SessionPhase>,
    /// State-gated engine
    gate: PlayerGate,
    /// DRM session, present once DRM setup started
    drm: Option<Arc<DrmSession>>,
    /// DRM engine used for protected content
    drm_engine: Option<Arc<dyn DrmEngine>>,
    /// Challenge delegate used when no license server URL is given
    delegate: Option<Arc<dyn LicenseDelegate>>,
    /// License server transport
    transport: Arc<dyn LicenseTransport>,
    /// Window collaborator
    display: Box<dyn DisplayProvider>,
    /// Engine callback channel
    engine_tx: EngineEventSender,
    engine_rx: mpsc::UnboundedReceiver<EngineEvent>,
    /// Deferred key installs
    idle_scheduler: IdleScheduler,
    idle: IdleQueue,
    /// Outbound notifications
    sink: EventSink,
    events: Option<mpsc::UnboundedReceiver<PlayerEvent>>,
    is_initialized: bool,
    is_buffering: bool,
    is_interrupted: bool,
    /// At most one outstanding seek
    pending_seek: Option<SeekCallback>,
}

impl VideoPlayer {
    /// Create a player around `engine`. Nothing native is created yet.
    pub fn new(engine: Box<dyn PlaybackEngine>, display: Box<dyn DisplayProvider>, config: PlayerConfig) -> Result<Self> {
        config.validate()?;
        if engine.kind() != config.backend {
            return Err(Error::InvalidConfig(format!(
                "configured backend {} does not match engine {}",
                config.backend,
                engine.kind()
            )));
        }

        let (phase_tx, _) = watch::channel(SessionPhase::Uncreated);
        let (engine_tx, engine_rx) = EngineEventSender::channel();
        let (idle_scheduler, idle) = IdleQueue::new();
        let (sink, events) = EventSink::channel();

        Ok(Self {
            id: PlayerId::next(),
            transport: Arc::new(HttpLicenseTransport::new(&config)),
            config,
            phase: SessionPhase::Uncreated,
            phase_tx,
            gate: PlayerGate::new(engine),
            drm: None,
            drm_engine: None,
            delegate: None,
            display,
            engine_tx,
            engine_rx,
            idle_scheduler,
            idle,
            sink,
            events: Some(events),
            is_initialized: false,
            is_buffering: false,
            is_interrupted: false,
            pending_seek: None,
        })
    }

    /// DRM engine for protected content
    pub fn with_drm_engine(mut self, engine: Arc<dyn DrmEngine>) -> Self {
        self.drm_engine = Some(engine);
        self
    }

    /// Delegate answering challenges when no license server URL is given
    pub fn with_license_delegate(mut self, delegate: Arc<dyn LicenseDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Replace the HTTP license transport
    pub fn with_license_transport(mut self, transport: Arc<dyn LicenseTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn event_channel_name(&self) -> String {
        self.id.event_channel_name()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Subscribe to phase changes
    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase_tx.subscribe()
    }

    /// Take the notification stream. Only the first call returns it.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<PlayerEvent>> {
        self.events.take()
    }

    pub fn backend(&self) -> BackendKind {
        self.gate.kind()
    }

    fn set_phase(&mut self, target: SessionPhase) -> Result<()> {
        if !self.phase.can_transition_to(target) {
            return Err(Error::state(format!("cannot go from {} to {}", self.phase, target)));
        }
        debug!(from = %self.phase, to = %target, "Phase transition");
        self.phase = target;
        self.phase_tx.send_replace(target);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Creation
    // ---------------------------------------------------------------------

    /// Create the engine and start preparing `uri`.
    ///
    /// One-shot: a second call fails. On failure the session stays at the
    /// failed phase and must be disposed.
    #[instrument(skip(self, license_url), fields(player = %self.id))]
    pub fn create(&mut self, uri: &str, variant: DrmVariant, license_url: Option<&str>) -> Result<PlayerId> {
        if self.phase != SessionPhase::Uncreated {
            return Err(Error::state(format!("player already created ({})", self.phase)));
        }
        self.set_phase(SessionPhase::Creating)?;
        self.gate.create()?;
        if let Some(app_id) = self.config.app_id.clone() {
            self.gate.set_app_id(&app_id)?;
        }

        if variant.is_protected() {
            self.set_phase(SessionPhase::DrmSetup)?;
            self.setup_drm(uri, variant, license_url)?;
        }

        self.set_phase(SessionPhase::DisplayBound)?;
        let geometry = self.display.geometry()?;
        self.gate
            .bind_display(self.display.window(), geometry, self.config.initial_roi)?;

        self.set_phase(SessionPhase::UriBound)?;
        self.gate.bind_uri(uri)?;
        self.gate.register_listener(self.engine_tx.clone())?;

        self.set_phase(SessionPhase::Preparing)?;
        self.gate.prepare_async()?;

        info!(backend = %self.gate.kind(), %variant, "Player created");
        Ok(self.id)
    }

    fn setup_drm(&mut self, uri: &str, variant: DrmVariant, license_url: Option<&str>) -> Result<()> {
        let engine = self
            .drm_engine
            .clone()
            .ok_or_else(|| Error::init("create_session", "no drm engine available"))?;
        let install_mode = if self.config.defers_key_install() {
            KeyInstallMode::Deferred(self.idle_scheduler.clone())
        } else {
            KeyInstallMode::Immediate
        };
        let session = DrmSession::create(
            engine,
            variant,
            SessionOptions {
                local_mode: self.config.backend.drm_local_mode(),
                install_mode,
                transport: self.transport.clone(),
            },
        )?;
        self.drm = Some(session.clone());

        self.gate.bind_drm(session.binding()?)?;

        match license_url.filter(|url| !url.is_empty()) {
            Some(url) => {
                let url = Url::parse(url).map_err(|e| Error::InvalidConfig(format!("license server url: {e}")))?;
                session.set_license_server(uri, url)
            }
            None => {
                let delegate = self
                    .delegate
                    .clone()
                    .ok_or_else(|| Error::init("set_challenge", "no license server url or delegate"))?;
                session.set_delegate(uri, delegate)
            }
        }
    }

    // ---------------------------------------------------------------------
    // Callback dispatch
    // ---------------------------------------------------------------------

    /// Apply every queued engine callback, then run due idle tasks.
    /// Returns how many items were handled.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.engine_rx.try_recv() {
            self.handle_engine_event(event);
            handled += 1;
        }
        handled + self.idle.drain()
    }

    /// Wait for the next engine callback or idle task and apply it.
    /// Returns false once the player is disposed.
    pub async fn dispatch(&mut self) -> bool {
        if self.phase == SessionPhase::Disposed {
            return false;
        }
        tokio::select! {
            biased;
            Some(event) = self.engine_rx.recv() => self.handle_engine_event(event),
            Some(task) = self.idle.next() => task.run(),
            else => return false,
        }
        true
    }

    fn handle_engine_event(&mut self, event: EngineEvent) {
        if self.phase == SessionPhase::Disposed {
            debug!(event = ?event, "Dropping callback for disposed player");
            return;
        }
        match event {
            EngineEvent::Prepared { success: true } => {
                info!(player = %self.id, "Player prepared");
                if self.phase == SessionPhase::Preparing {
                    if let Err(e) = self.set_phase(SessionPhase::Ready) {
                        warn!(error = %e, "Unexpected prepare callback");
                    }
                }
                self.send_initialized();
            }
            EngineEvent::Prepared { success: false } => {
                self.emit_error(self.gate.kind().error_code(), "Failed to prepare player");
            }
            EngineEvent::Buffering { percent } => self.on_buffering(percent),
            EngineEvent::SeekCompleted => match self.pending_seek.take() {
                Some(callback) => callback(),
                None => debug!("Seek completed without a pending callback"),
            },
            EngineEvent::Completed => {
                info!(player = %self.id, "Playback completed");
                self.sink.emit(PlayerEvent::Completed);
                if self.gate.kind().pauses_on_completion() {
                    if let Err(e) = self.gate.pause() {
                        warn!(error = %e, "Failed to pause after completion");
                    }
                }
            }
            EngineEvent::Interrupted { code } => {
                error!(code, "Player interrupted");
                self.is_interrupted = true;
                self.emit_error(INTERRUPTED_CODE, INTERRUPTED_MESSAGE);
            }
            EngineEvent::Error { code, message } => {
                let err = Error::from(NativeError::new(code, message));
                error!(error = %err, "Engine error");
                self.report_error(&err);
            }
            EngineEvent::SubtitleUpdated { duration, text } => {
                self.sink.emit(PlayerEvent::SubtitleUpdate { duration, text });
            }
        }
    }

    fn on_buffering(&mut self, percent: i32) {
        let thresholds = self.config.buffering;
        if percent >= thresholds.complete {
            self.sink.emit(PlayerEvent::BufferingEnd);
            self.is_buffering = false;
        } else if !self.is_buffering && percent <= thresholds.low_watermark {
            self.sink.emit(PlayerEvent::BufferingStart);
            self.is_buffering = true;
        } else {
            self.sink.emit(PlayerEvent::BufferingUpdate { value: percent });
        }
    }

    fn send_initialized(&mut self) {
        if self.is_initialized || self.is_interrupted {
            return;
        }
        let initialized = self.gate.duration().and_then(|duration| {
            let size = self.video_size()?;
            Ok((duration, size))
        });
        match initialized {
            Ok((duration, size)) => {
                info!(duration, width = size.width, height = size.height, "Player initialized");
                self.is_initialized = true;
                self.sink.emit(PlayerEvent::Initialized {
                    duration,
                    width: size.width,
                    height: size.height,
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to query media info");
                self.report_error(&e);
            }
        }
    }

    /// Engine errors keep the backend's code and bare message; everything
    /// else is reported under its own code.
    fn report_error(&self, err: &Error) {
        match err {
            Error::EngineError { message, .. } => self.emit_error(self.gate.kind().error_code(), message),
            other => self.emit_error(other.error_code(), &other.to_string()),
        }
    }

    fn emit_error(&self, code: &str, message: &str) {
        self.sink.emit(PlayerEvent::Error {
            code: code.to_string(),
            message: message.to_string(),
        });
    }

    /// Host attached its listener; report readiness it may have missed
    pub fn mark_listening(&mut self) {
        match self.gate.is_ready() {
            Ok(true) => self.send_initialized(),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Could not query player state"),
        }
    }

    // ---------------------------------------------------------------------
    // Controls
    // ---------------------------------------------------------------------

    pub fn play(&mut self) -> Result<()> {
        self.gate.play()
    }

    pub fn pause(&mut self) -> Result<()> {
        self.gate.pause()
    }

    pub fn set_looping(&mut self, looping: bool) -> Result<()> {
        self.gate.set_looping(looping)
    }

    pub fn set_volume(&mut self, volume: f64) -> Result<()> {
        self.gate.set_volume(volume)
    }

    pub fn set_playback_speed(&mut self, speed: f64) -> Result<()> {
        self.gate.set_playback_speed(speed)
    }

    /// Seek; `on_complete` runs once the engine reports completion
    #[instrument(skip(self, on_complete), fields(player = %self.id))]
    pub fn seek_to<F>(&mut self, position_ms: i64, on_complete: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.pending_seek.is_some() {
            return Err(Error::state("a seek is already in flight"));
        }
        self.gate.seek(position_ms)?;
        self.pending_seek = Some(Box::new(on_complete));
        Ok(())
    }

    pub fn has_pending_seek(&self) -> bool {
        self.pending_seek.is_some()
    }

    pub fn position(&self) -> Result<i64> {
        self.gate.position()
    }

    pub fn duration(&self) -> Result<i64> {
        self.gate.duration()
    }

    /// Video size as displayed, axes swapped for 90° and 270° rotation
    pub fn video_size(&self) -> Result<VideoSize> {
        let size = self.gate.video_size()?;
        let rotation = self.gate.display_rotation()?;
        Ok(size.rotated(rotation))
    }

    pub fn set_display_roi(&mut self, x: i32, y: i32, width: i32, height: i32) -> Result<()> {
        self.gate.set_display_roi(Geometry::new(x, y, width, height))
    }

    pub fn is_ready(&self) -> Result<bool> {
        self.gate.is_ready()
    }

    /// Whether a DRM session is currently held
    pub fn has_drm_session(&self) -> bool {
        self.drm.as_ref().is_some_and(|session| session.is_active())
    }

    // ---------------------------------------------------------------------
    // Disposal
    // ---------------------------------------------------------------------

    /// Release the DRM session on the owning thread, keeping it when the
    /// engine refuses.
    fn release_drm(&mut self) {
        let Some(session) = self.drm.take() else {
            return;
        };
        if !session.release() {
            warn!(player = %self.id, "DRM session release failed, keeping it for retry");
            self.drm = Some(session);
        }
    }

    /// Tear down the engine, then release the DRM session. Idempotent.
    ///
    /// A DRM session the engine refused to release is kept, and every later
    /// call retries the release.
    #[instrument(skip(self), fields(player = %self.id))]
    pub fn dispose(&mut self) {
        if self.phase == SessionPhase::Disposed {
            self.release_drm();
            return;
        }
        let phase = self.phase;

        if self.gate.teardown() {
            debug!("Engine torn down");
        }
        self.release_drm();
        let dropped = self.idle.close();
        if dropped > 0 {
            debug!(dropped, "Dropped pending idle tasks");
        }
        self.pending_seek = None;

        if let Err(e) = self.set_phase(SessionPhase::Disposed) {
            warn!(error = %e, "Dispose transition rejected");
        }
        info!(from = %phase, "Player disposed");
    }
}

impl Drop for VideoPlayer {
    fn drop(&mut self) {
        self.dispose();
        if self.drm.is_some() {
            error!(player = %self.id, "Dropping player with an unreleased DRM session");
        }
    }
}

impl std::fmt::Debug for VideoPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoPlayer")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("gate", &self.gate)
            .field("drm", &self.drm)
            .field("is_initialized", &self.is_initialized)
            .field("is_buffering", &self.is_buffering)
            .field("is_interrupted", &self.is_interrupted)
            .field("pending_seek", &self.pending_seek.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_transitions() {
        use SessionPhase::*;
        assert!(Uncreated.can_transition_to(Creating));
        assert!(Creating.can_transition_to(DisplayBound));
        assert!(Creating.can_transition_to(DrmSetup));
        assert!(DrmSetup.can_transition_to(DisplayBound));
        assert!(Preparing.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Disposed));
        assert!(Uncreated.can_transition_to(Disposed));

        assert!(!Ready.can_transition_to(Creating));
        assert!(!Uncreated.can_transition_to(Ready));
        assert!(!Disposed.can_transition_to(Creating));
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(SessionPhase::DrmSetup.to_string(), "drm_setup");
        assert_eq!(SessionPhase::Disposed.to_string(), "disposed");
    }
}
