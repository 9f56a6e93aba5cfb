//! DRM session
//!
//! Owns one engine session for one playback attempt. The session is shared
//! through an `Arc`; engine callbacks and pipeline hooks hold only `Weak`
//! references, so anything arriving after the owner let go is dropped with a
//! log line instead of touching a released handle.

use super::challenge::{ChallengeSource, ChallengeTransaction, KeyInstallMode, LicenseDelegate, LicenseTransport};
use super::idle::InstallKeyTask;
use super::{status, ChallengeCallback, ChallengeMessage, DrmEngine, EngineSession, ErrorSink, KeySessionId};
use crate::engine::{DrmBinding, DrmHooks, NativeError, NativeResult, PipelineContext};
use crate::error::{Error, Result};
use crate::types::DrmVariant;
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// Options fixed at session creation
#[derive(Clone)]
pub struct SessionOptions {
    /// Request in-process key handling before the session is created
    pub local_mode: bool,
    pub install_mode: KeyInstallMode,
    pub transport: Arc<dyn LicenseTransport>,
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("local_mode", &self.local_mode)
            .field("install_mode", &self.install_mode)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct SessionState {
    handle: Option<EngineSession>,
    source: Option<ChallengeSource>,
    initialized: bool,
}

/// One DRM engine session
pub struct DrmSession {
    variant: DrmVariant,
    engine: Arc<dyn DrmEngine>,
    transport: Arc<dyn LicenseTransport>,
    install_mode: KeyInstallMode,
    state: Mutex<SessionState>,
}

impl DrmSession {
    /// Create an engine session for `variant` and install the error sink
    #[instrument(skip(engine, options), fields(local_mode = options.local_mode))]
    pub fn create(engine: Arc<dyn DrmEngine>, variant: DrmVariant, options: SessionOptions) -> Result<Arc<Self>> {
        let key_system = variant
            .key_system()
            .ok_or_else(|| Error::init("create_session", "no drm variant requested"))?;

        if options.local_mode {
            engine
                .set_local_mode()
                .map_err(|e| native_init("set_local_mode", e))?;
        }

        let handle = engine
            .create_session(key_system)
            .map_err(|e| native_init("create_session", e))?;
        info!(key_system, session = ?handle, "DRM session created");

        let sink: ErrorSink = Arc::new(|code: i64, message: &str| {
            error!(code, reason = message, "DRM engine error");
        });
        if let Err(e) = engine.set_error_sink(handle, sink) {
            let err = native_init("set_error_sink", e);
            if let Err(e) = engine.release_session(handle) {
                warn!(error = %e, "Failed to release DRM session after setup failure");
            }
            return Err(err);
        }

        Ok(Arc::new(Self {
            variant,
            engine,
            transport: options.transport,
            install_mode: options.install_mode,
            state: Mutex::new(SessionState {
                handle: Some(handle),
                ..Default::default()
            }),
        }))
    }

    pub fn variant(&self) -> DrmVariant {
        self.variant
    }

    /// Whether the engine session is still held
    pub fn is_active(&self) -> bool {
        self.state().handle.is_some()
    }

    pub fn is_initialized(&self) -> bool {
        self.state().initialized
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handle(&self) -> Result<EngineSession> {
        self.state()
            .handle
            .ok_or_else(|| Error::state("DRM session is not active"))
    }

    // ---------------------------------------------------------------------
    // Challenge source
    // ---------------------------------------------------------------------

    /// Answer challenges through a license server, then initialize
    pub fn set_license_server(self: &Arc<Self>, manifest_url: &str, license_url: Url) -> Result<()> {
        self.configure(manifest_url, ChallengeSource::LicenseServer(license_url))
    }

    /// Answer challenges through `delegate`, then initialize
    pub fn set_delegate(self: &Arc<Self>, manifest_url: &str, delegate: Arc<dyn LicenseDelegate>) -> Result<()> {
        self.configure(manifest_url, ChallengeSource::Delegate(delegate))
    }

    #[instrument(skip(self), fields(variant = %self.variant))]
    fn configure(self: &Arc<Self>, manifest_url: &str, source: ChallengeSource) -> Result<()> {
        let handle = {
            let mut state = self.state();
            let handle = state
                .handle
                .ok_or_else(|| Error::state("DRM session is not active"))?;
            if let Some(existing) = &state.source {
                return Err(Error::state(format!("challenge source already set to {existing:?}")));
            }
            state.source = Some(source);
            handle
        };

        // The engine may raise the first challenge synchronously, so no lock
        // is held across these calls.
        let weak = Arc::downgrade(self);
        let callback: ChallengeCallback = Arc::new(move |message: ChallengeMessage| on_challenge(&weak, message));
        let setup = self
            .engine
            .set_challenge_callback(handle, callback)
            .map_err(|e| native_init("set_challenge_callback", e))
            .and_then(|()| {
                self.engine
                    .set_manifest(handle, manifest_url)
                    .map_err(|e| native_init("set_manifest", e))
            })
            .and_then(|()| self.engine.initialize(handle).map_err(|e| native_init("initialize", e)));
        if let Err(e) = setup {
            self.state().source = None;
            return Err(e);
        }

        self.state().initialized = true;
        info!("DRM session initialized");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Pipeline surface
    // ---------------------------------------------------------------------

    pub fn resolve_handle(&self) -> Result<i32> {
        let handle = self.handle()?;
        let drm_handle = self
            .engine
            .drm_handle(handle)
            .map_err(|e| native_init("get_drm_handle", e))?;
        debug!(drm_handle, "Resolved DRM handle");
        Ok(drm_handle)
    }

    /// Forward init data; returns the engine status code
    pub fn ingest_init_data(&self, data: &[u8]) -> i32 {
        let handle = match self.handle() {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "Cannot forward init data");
                return status::INVALID_SESSION;
            }
        };
        let code = self.engine.update_pssh(handle, data);
        if code != status::NONE {
            error!(code, len = data.len(), "Engine rejected init data");
        }
        code
    }

    /// Synchronous key-material callback of the decryption pipeline
    pub fn provide_key_material(&self, drm_handle: i32, init_data: &[u8], context: PipelineContext) -> bool {
        match self.handle() {
            Ok(handle) => self
                .engine
                .complete_security_init(handle, drm_handle, init_data, context),
            Err(e) => {
                warn!(error = %e, "Key material requested without session");
                false
            }
        }
    }

    /// Hooks handed to the playback engine
    pub fn hooks(self: &Arc<Self>) -> Arc<dyn DrmHooks> {
        Arc::new(SessionHooks {
            session: Arc::downgrade(self),
        })
    }

    /// Resolve the handle and bundle it with the hooks
    pub fn binding(self: &Arc<Self>) -> Result<DrmBinding> {
        Ok(DrmBinding {
            variant: self.variant,
            handle: self.resolve_handle()?,
            hooks: self.hooks(),
        })
    }

    // ---------------------------------------------------------------------
    // Key installation
    // ---------------------------------------------------------------------

    fn handle_challenge(self: &Arc<Self>, message: ChallengeMessage) -> Result<()> {
        let source = {
            let state = self.state();
            if state.handle.is_none() {
                return Err(Error::state("challenge for a released DRM session"));
            }
            state.source.clone()
        };

        let mut transaction = ChallengeTransaction::new(message);
        transaction.resolve(source.as_ref(), self.variant, self.transport.as_ref())?;

        match &self.install_mode {
            KeyInstallMode::Immediate => {
                let key_session = transaction.key_session();
                self.install_key(key_session, transaction.into_response()?)
            }
            KeyInstallMode::Deferred(scheduler) => {
                let task = InstallKeyTask::from_transaction(Arc::downgrade(self), transaction)?;
                scheduler.schedule(Box::new(task))
            }
        }
    }

    /// Install a license response. The buffer is consumed whatever the outcome.
    #[instrument(skip(self, response), fields(len = response.len()))]
    pub fn install_key(&self, key_session: KeySessionId, response: Bytes) -> Result<()> {
        let handle = self.handle()?;
        self.engine
            .install_key(handle, key_session, response)
            .map_err(|e| {
                error!(error = %e, "Failed to install license");
                Error::InstallFailure(e.to_string())
            })?;
        info!("License installed");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Release
    // ---------------------------------------------------------------------

    /// Finalize (best effort) and release the engine session. The handle is
    /// kept if the release call fails so a later call can retry.
    ///
    /// Returns `true` once no engine session is held.
    #[instrument(skip(self), fields(variant = %self.variant))]
    pub fn release(&self) -> bool {
        let (handle, initialized) = {
            let mut state = self.state();
            match state.handle.take() {
                Some(handle) => (handle, state.initialized),
                None => return true,
            }
        };

        let mut still_initialized = initialized;
        if initialized {
            match self.engine.finalize(handle) {
                Ok(()) => still_initialized = false,
                Err(e) => error!(error = %e, "Failed to finalize DRM session"),
            }
        }

        let released = self.engine.release_session(handle);
        let mut state = self.state();
        state.initialized = still_initialized;
        match released {
            Ok(()) => {
                state.source = None;
                info!("DRM session released");
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to release DRM session");
                state.handle = Some(handle);
                false
            }
        }
    }
}

impl Drop for DrmSession {
    fn drop(&mut self) {
        if !self.release() {
            error!(variant = %self.variant, "Leaking DRM engine session after failed release");
        }
    }
}

impl std::fmt::Debug for DrmSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("DrmSession")
            .field("variant", &self.variant)
            .field("handle", &state.handle)
            .field("source", &state.source)
            .field("initialized", &state.initialized)
            .finish()
    }
}

fn native_init(action: &str, e: NativeError) -> Error {
    error!(action, error = %e, "DRM engine call failed");
    Error::init(action, e.to_string())
}

fn on_challenge(session: &Weak<DrmSession>, message: ChallengeMessage) -> NativeResult<()> {
    let Some(session) = session.upgrade() else {
        warn!(key_session = ?message.key_session, "Challenge for disposed DRM session");
        return Err(NativeError::new(status::INVALID_SESSION, "drm session released"));
    };
    session.handle_challenge(message).map_err(|e| {
        error!(error = %e, "License challenge failed");
        NativeError::new(status::INTERNAL_ERROR, e.to_string())
    })
}

/// Pipeline hooks holding a weak session reference
struct SessionHooks {
    session: Weak<DrmSession>,
}

impl DrmHooks for SessionHooks {
    fn init_data(&self, data: &[u8]) -> i32 {
        if data.is_empty() {
            debug!("Ignoring empty init data");
            return status::NONE;
        }
        match self.session.upgrade() {
            Some(session) => session.ingest_init_data(data),
            None => {
                debug!("Init data for disposed DRM session");
                status::INVALID_SESSION
            }
        }
    }

    fn complete_security_init(&self, drm_handle: i32, init_data: &[u8], context: PipelineContext) -> bool {
        match self.session.upgrade() {
            Some(session) => session.provide_key_material(drm_handle, init_data, context),
            None => {
                debug!("Key material requested for disposed DRM session");
                false
            }
        }
    }
}
