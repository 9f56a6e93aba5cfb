//! DRM session, license handshake and key installation
//!
//! ```text
//!   engine thread                      control thread
//!   ─────────────                      ──────────────
//!   challenge ──► DrmSession ──► ChallengeTransaction
//!                                   │ license server (HTTP) or delegate
//!                                   ▼
//!                     install now ◄─┴─► IdleScheduler ──► IdleQueue::drain
//!                         │                                   │
//!                         └──────► DrmEngine::install_key ◄───┘
//! ```
//!
//! The DRM engine is reached through [`DrmEngine`]. A native implementation
//! backed by the platform DRM manager lives in `crate::native`.

pub mod challenge;
pub mod delegate;
pub mod idle;
pub mod session;

pub use challenge::{
    ChallengeSource, ChallengeTransaction, HttpLicenseTransport, KeyInstallMode, LicenseDelegate,
    LicenseTransport,
};
pub use delegate::{LicenseIssuer, LicenseRendezvous, LicenseRequest, LicenseRequests, RendezvousDelegate};
pub use idle::{IdleQueue, IdleScheduler, IdleTask, InstallKeyTask};
pub use session::{DrmSession, SessionOptions};

use crate::engine::{NativeResult, PipelineContext};
use bytes::Bytes;
use std::sync::Arc;

/// Status codes returned by DRM engine entry points
pub mod status {
    pub const NONE: i32 = 0;
    pub const INVALID_PARAM: i32 = 1;
    pub const INVALID_SESSION: i32 = 2;
    pub const INTERNAL_ERROR: i32 = 3;
}

/// Opaque session handle owned by a DRM engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineSession(pub usize);

/// Engine-side identifier of the key session a challenge belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeySessionId(pub usize);

/// Key request produced by the DRM engine
#[derive(Debug, Clone)]
pub struct ChallengeMessage {
    pub key_session: KeySessionId,
    pub message_type: i32,
    pub payload: Bytes,
}

/// Challenge handler registered with the engine, called on engine threads
pub type ChallengeCallback = Arc<dyn Fn(ChallengeMessage) -> NativeResult<()> + Send + Sync>;

/// Receives engine-internal errors (code, message)
pub type ErrorSink = Arc<dyn Fn(i64, &str) + Send + Sync>;

/// Operation set of a DRM engine.
///
/// Calls may arrive from the control thread and from engine callback
/// threads at the same time.
pub trait DrmEngine: Send + Sync {
    /// Request in-process key handling. Must precede session creation.
    fn set_local_mode(&self) -> NativeResult<()>;

    fn create_session(&self, key_system: &str) -> NativeResult<EngineSession>;
    fn release_session(&self, session: EngineSession) -> NativeResult<()>;

    fn set_error_sink(&self, session: EngineSession, sink: ErrorSink) -> NativeResult<()>;
    fn set_challenge_callback(&self, session: EngineSession, callback: ChallengeCallback) -> NativeResult<()>;

    /// Initial handshake message (the media manifest URL)
    fn set_manifest(&self, session: EngineSession, manifest_url: &str) -> NativeResult<()>;
    fn initialize(&self, session: EngineSession) -> NativeResult<()>;
    fn finalize(&self, session: EngineSession) -> NativeResult<()>;

    fn drm_handle(&self, session: EngineSession) -> NativeResult<i32>;

    /// Forward init data; returns an engine status code
    fn update_pssh(&self, session: EngineSession, data: &[u8]) -> i32;

    /// Install a license response. The engine takes the buffer.
    fn install_key(&self, session: EngineSession, key_session: KeySessionId, response: Bytes) -> NativeResult<()>;

    /// Answer the pipeline's key-material request with the current key context
    fn complete_security_init(
        &self,
        session: EngineSession,
        drm_handle: i32,
        init_data: &[u8],
        context: PipelineContext,
    ) -> bool;
}
