//! Videohole Core - DRM-gated playback sessions
//!
//! This crate drives one overlay video player per session:
//! - DRM session lifecycle and the license challenge handshake
//! - State-gated access to the playback engine
//! - Session orchestration from creation to disposal
//! - Engine callbacks turned into host notifications
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Videohole Core                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │                    ┌──────────────┐                             │
//! │                    │ VideoPlayer  │──────► PlayerEvent stream   │
//! │                    └──────┬───────┘                             │
//! │                           │                                     │
//! │         ┌─────────────────┼─────────────────┐                   │
//! │         │                 │                 │                   │
//! │  ┌──────┴───────┐  ┌──────┴───────┐  ┌──────┴───────┐           │
//! │  │  PlayerGate  │  │  DrmSession  │  │  IdleQueue   │           │
//! │  └──────┬───────┘  └──────┬───────┘  └──────────────┘           │
//! │         │                 │                                     │
//! │  ┌──────┴───────┐  ┌──────┴───────┐  ┌──────────────┐           │
//! │  │   Playback   │  │  DrmEngine   │  │   License    │           │
//! │  │    Engine    │  │              │  │  Transport   │           │
//! │  └──────────────┘  └──────────────┘  └──────────────┘           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Platform adapters for the C media player and the DRM manager live in
//! [`native`] behind the `native` feature.

pub mod error;
pub mod types;
pub mod config;
pub mod events;
pub mod engine;
pub mod gate;
pub mod drm;
pub mod player;
#[cfg(feature = "native")]
pub mod native;

pub use error::{Error, Result};
pub use types::*;
pub use config::{BufferingThresholds, PlayerConfig};
pub use events::{EngineEvent, EngineEventSender, EventSink, PlayerEvent};
pub use engine::{
    DisplayMode, DisplayProvider, DrmBinding, DrmHooks, FixedDisplay, NativeError, NativeResult, PipelineContext,
    PlaybackEngine,
};
pub use gate::PlayerGate;
pub use drm::{
    ChallengeMessage, DrmEngine, DrmSession, EngineSession, HttpLicenseTransport, KeyInstallMode, KeySessionId,
    LicenseDelegate, LicenseIssuer, LicenseRendezvous, LicenseTransport, SessionOptions,
};
pub use player::{SessionPhase, VideoPlayer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the player library with default configuration
pub fn init() {
    tracing::info!(version = VERSION, "Videohole Core initialized");
}
