//! Scriptable engines shared by the integration tests

#![allow(dead_code)]

use bytes::Bytes;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, Once};
use videohole_core::{
    drm::{status, ChallengeCallback, ErrorSink},
    BackendKind, ChallengeMessage, DisplayMode, DisplayRotation, DrmBinding, DrmEngine, DrmHooks, EngineEvent,
    EngineEventSender, EngineSession, EngineState, FixedDisplay, Geometry, KeySessionId, LicenseTransport,
    NativeError, NativeResult, PipelineContext, PlaybackEngine, PlayerConfig, VideoPlayer, VideoSize, WindowHandle,
};

/// Ordered record of native calls across both engines
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn log(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn contains(&self, prefix: &str) -> bool {
        self.count(prefix) > 0
    }

    /// Index of the first entry starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.starts_with(prefix))
    }
}

// =============================================================================
// Playback engine
// =============================================================================

#[derive(Default)]
struct EngineScript {
    state: Option<EngineState>,
    duration: i64,
    size: VideoSize,
    rotation: Option<DisplayRotation>,
    events: Option<EngineEventSender>,
    hooks: Option<Arc<dyn DrmHooks>>,
    failing: HashSet<&'static str>,
}

/// Test-side handle on a [`FakeEngine`]
#[derive(Clone)]
pub struct EngineControl {
    script: Arc<Mutex<EngineScript>>,
    journal: Journal,
}

impl EngineControl {
    pub fn set_state(&self, state: EngineState) {
        self.script.lock().unwrap().state = Some(state);
    }

    pub fn state(&self) -> EngineState {
        self.script.lock().unwrap().state.unwrap_or(EngineState::None)
    }

    pub fn set_media(&self, duration: i64, size: VideoSize, rotation: DisplayRotation) {
        let mut script = self.script.lock().unwrap();
        script.duration = duration;
        script.size = size;
        script.rotation = Some(rotation);
    }

    pub fn fail_on(&self, operation: &'static str) {
        self.script.lock().unwrap().failing.insert(operation);
    }

    /// Deliver a callback from a worker thread, as the engine would
    pub fn emit(&self, event: EngineEvent) {
        let sender = self
            .script
            .lock()
            .unwrap()
            .events
            .clone()
            .expect("listener registered");
        std::thread::spawn(move || sender.send(event)).join().unwrap();
    }

    /// DRM hooks the player bound to the engine
    pub fn hooks(&self) -> Option<Arc<dyn DrmHooks>> {
        self.script.lock().unwrap().hooks.clone()
    }

    pub fn has_listener(&self) -> bool {
        self.script.lock().unwrap().events.is_some()
    }
}

/// Playback engine driven by an [`EngineControl`]
pub struct FakeEngine {
    kind: BackendKind,
    control: EngineControl,
}

impl FakeEngine {
    pub fn new(kind: BackendKind, journal: Journal) -> (Self, EngineControl) {
        let control = EngineControl {
            script: Arc::new(Mutex::new(EngineScript::default())),
            journal,
        };
        (
            Self {
                kind,
                control: control.clone(),
            },
            control,
        )
    }

    fn record(&self, entry: String, operation: &'static str) -> NativeResult<()> {
        self.control.journal.log(format!("engine.{entry}"));
        if self.control.script.lock().unwrap().failing.contains(operation) {
            return Err(NativeError::new(-2, format!("{operation} failed")));
        }
        Ok(())
    }

    fn call(&self, operation: &'static str) -> NativeResult<()> {
        self.record(operation.to_string(), operation)
    }

    fn script(&self) -> std::sync::MutexGuard<'_, EngineScript> {
        self.control.script.lock().unwrap()
    }
}

impl PlaybackEngine for FakeEngine {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn create(&mut self) -> NativeResult<()> {
        self.call("create")?;
        self.script().state = Some(EngineState::Idle);
        Ok(())
    }

    fn destroy(&mut self) -> NativeResult<()> {
        self.call("destroy")?;
        self.script().state = None;
        Ok(())
    }

    fn register_listener(&mut self, events: EngineEventSender) -> NativeResult<()> {
        self.call("register_listener")?;
        self.script().events = Some(events);
        Ok(())
    }

    fn unregister_listener(&mut self) {
        self.control.journal.log("engine.unregister_listener");
        self.script().events = None;
    }

    fn set_app_id(&mut self, app_id: &str) -> NativeResult<()> {
        self.record(format!("set_app_id:{app_id}"), "set_app_id")
    }

    fn set_drm(&mut self, binding: DrmBinding) -> NativeResult<()> {
        self.record(format!("set_drm:{}", binding.handle), "set_drm")?;
        self.script().hooks = Some(binding.hooks);
        Ok(())
    }

    fn set_display(&mut self, window: WindowHandle, geometry: Geometry) -> NativeResult<()> {
        self.record(format!("set_display:{}:{geometry}", window.0), "set_display")
    }

    fn set_display_mode(&mut self, mode: DisplayMode) -> NativeResult<()> {
        self.record(format!("set_display_mode:{mode:?}"), "set_display_mode")
    }

    fn set_display_roi(&mut self, roi: Geometry) -> NativeResult<()> {
        self.record(format!("set_display_roi:{roi}"), "set_display_roi")
    }

    fn set_display_visible(&mut self, visible: bool) -> NativeResult<()> {
        self.record(format!("set_display_visible:{visible}"), "set_display_visible")
    }

    fn open(&mut self, uri: &str) -> NativeResult<()> {
        self.record(format!("open:{uri}"), "open")
    }

    fn prepare_async(&mut self) -> NativeResult<()> {
        self.call("prepare_async")
    }

    fn unprepare(&mut self) -> NativeResult<()> {
        self.call("unprepare")
    }

    fn start(&mut self) -> NativeResult<()> {
        self.call("start")?;
        self.script().state = Some(EngineState::Playing);
        Ok(())
    }

    fn resume(&mut self) -> NativeResult<()> {
        self.call("resume")?;
        self.script().state = Some(EngineState::Playing);
        Ok(())
    }

    fn pause(&mut self) -> NativeResult<()> {
        self.call("pause")?;
        self.script().state = Some(EngineState::Paused);
        Ok(())
    }

    fn set_playback_rate(&mut self, rate: f64) -> NativeResult<()> {
        self.record(format!("set_playback_rate:{rate}"), "set_playback_rate")
    }

    fn set_looping(&mut self, looping: bool) -> NativeResult<()> {
        self.record(format!("set_looping:{looping}"), "set_looping")
    }

    fn set_volume(&mut self, volume: f64) -> NativeResult<()> {
        self.record(format!("set_volume:{volume}"), "set_volume")
    }

    fn seek(&mut self, position_ms: i64) -> NativeResult<()> {
        self.record(format!("seek:{position_ms}"), "seek")
    }

    fn state(&self) -> NativeResult<EngineState> {
        Ok(self.script().state.unwrap_or(EngineState::None))
    }

    fn duration(&self) -> NativeResult<i64> {
        Ok(self.script().duration)
    }

    fn position(&self) -> NativeResult<i64> {
        Ok(1234)
    }

    fn video_size(&self) -> NativeResult<VideoSize> {
        Ok(self.script().size)
    }

    fn display_rotation(&self) -> NativeResult<DisplayRotation> {
        Ok(self.script().rotation.unwrap_or_default())
    }
}

// =============================================================================
// DRM engine
// =============================================================================

pub const DRM_HANDLE: i32 = 42;

/// DRM engine recording every call and letting tests raise challenges
pub struct FakeDrmEngine {
    journal: Journal,
    callback: Mutex<Option<ChallengeCallback>>,
    sink: Mutex<Option<ErrorSink>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl FakeDrmEngine {
    pub fn new(journal: Journal) -> Arc<Self> {
        Arc::new(Self {
            journal,
            callback: Mutex::new(None),
            sink: Mutex::new(None),
            failing: Mutex::new(HashSet::new()),
        })
    }

    pub fn fail_on(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    pub fn recover(&self, operation: &'static str) {
        self.failing.lock().unwrap().remove(operation);
    }

    fn record(&self, entry: String, operation: &'static str) -> NativeResult<()> {
        self.journal.log(format!("drm.{entry}"));
        if self.failing.lock().unwrap().contains(operation) {
            return Err(NativeError::new(status::INTERNAL_ERROR, format!("{operation} failed")));
        }
        Ok(())
    }

    /// Raise a key request on an engine thread and wait for the callback
    pub fn raise_challenge(&self, key_session: usize, payload: &'static [u8]) -> NativeResult<()> {
        let callback = self
            .callback
            .lock()
            .unwrap()
            .clone()
            .expect("challenge callback registered");
        let message = ChallengeMessage {
            key_session: KeySessionId(key_session),
            message_type: 0,
            payload: Bytes::from_static(payload),
        };
        std::thread::spawn(move || callback(message)).join().unwrap()
    }

    /// Report an engine-internal error from a worker thread
    pub fn raise_error(&self, code: i64, message: &'static str) {
        let sink = self.sink.lock().unwrap().clone().expect("no error sink registered");
        std::thread::spawn(move || sink(code, message)).join().unwrap()
    }
}

impl DrmEngine for FakeDrmEngine {
    fn set_local_mode(&self) -> NativeResult<()> {
        self.record("set_local_mode".into(), "set_local_mode")
    }

    fn create_session(&self, key_system: &str) -> NativeResult<EngineSession> {
        self.record(format!("create_session:{key_system}"), "create_session")?;
        Ok(EngineSession(7))
    }

    fn release_session(&self, _session: EngineSession) -> NativeResult<()> {
        self.record("release_session".into(), "release_session")
    }

    fn set_error_sink(&self, _session: EngineSession, sink: ErrorSink) -> NativeResult<()> {
        self.record("set_error_sink".into(), "set_error_sink")?;
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn set_challenge_callback(&self, _session: EngineSession, callback: ChallengeCallback) -> NativeResult<()> {
        self.record("set_challenge_callback".into(), "set_challenge_callback")?;
        *self.callback.lock().unwrap() = Some(callback);
        Ok(())
    }

    fn set_manifest(&self, _session: EngineSession, manifest_url: &str) -> NativeResult<()> {
        self.record(format!("set_manifest:{manifest_url}"), "set_manifest")
    }

    fn initialize(&self, _session: EngineSession) -> NativeResult<()> {
        self.record("initialize".into(), "initialize")
    }

    fn finalize(&self, _session: EngineSession) -> NativeResult<()> {
        self.record("finalize".into(), "finalize")
    }

    fn drm_handle(&self, _session: EngineSession) -> NativeResult<i32> {
        self.record("drm_handle".into(), "drm_handle")?;
        Ok(DRM_HANDLE)
    }

    fn update_pssh(&self, _session: EngineSession, data: &[u8]) -> i32 {
        self.journal.log(format!("drm.update_pssh:{}", data.len()));
        status::NONE
    }

    fn install_key(&self, _session: EngineSession, key_session: KeySessionId, response: Bytes) -> NativeResult<()> {
        self.record(
            format!("install_key:{}:{}", key_session.0, String::from_utf8_lossy(&response)),
            "install_key",
        )
    }

    fn complete_security_init(
        &self,
        _session: EngineSession,
        drm_handle: i32,
        _init_data: &[u8],
        _context: PipelineContext,
    ) -> bool {
        self.journal.log(format!("drm.complete_security_init:{drm_handle}"));
        true
    }
}

// =============================================================================
// License transport
// =============================================================================

/// Transport answering every challenge with a fixed body
pub struct CannedTransport {
    pub response: Bytes,
    pub journal: Journal,
}

impl LicenseTransport for CannedTransport {
    fn transact(
        &self,
        url: &url::Url,
        variant: videohole_core::DrmVariant,
        challenge: &[u8],
    ) -> videohole_core::Result<Bytes> {
        self.journal.log(format!(
            "http.{variant}:{url}:{}",
            String::from_utf8_lossy(challenge)
        ));
        if self.response.is_empty() {
            return Err(videohole_core::Error::challenge("empty license response"));
        }
        Ok(self.response.clone())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

static TRACING: Once = Once::new();

/// Route library logs through the test writer; filter with `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub const MEDIA_URI: &str = "https://media.example.com/stream.mpd";

pub struct Fixture {
    pub player: VideoPlayer,
    pub engine: EngineControl,
    pub drm: Arc<FakeDrmEngine>,
    pub journal: Journal,
}

/// Player over fake engines with a 1920x1080 window
pub fn fixture(config: PlayerConfig) -> Fixture {
    build(config, None)
}

/// Fixture with the license transport replaced by a canned response
pub fn fixture_with_license(config: PlayerConfig, response: &'static [u8]) -> Fixture {
    build(config, Some(Bytes::from_static(response)))
}

fn build(config: PlayerConfig, license: Option<Bytes>) -> Fixture {
    init_tracing();
    let journal = Journal::default();
    let (engine, control) = FakeEngine::new(config.backend, journal.clone());
    let drm = FakeDrmEngine::new(journal.clone());
    let display = FixedDisplay::new(WindowHandle(0x10), Geometry::new(0, 0, 1920, 1080));
    let mut player = VideoPlayer::new(Box::new(engine), Box::new(display), config)
        .expect("valid config")
        .with_drm_engine(drm.clone());
    if let Some(response) = license {
        player = player.with_license_transport(Arc::new(CannedTransport {
            response,
            journal: journal.clone(),
        }));
    }
    Fixture {
        player,
        engine: control,
        drm,
        journal,
    }
}
