//! Core types for Videohole

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

static NEXT_PLAYER_ID: AtomicI64 = AtomicI64::new(1);

/// Sequential identifier of a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub i64);

impl PlayerId {
    /// Allocate the next process-wide player id (starts at 1)
    pub fn next() -> Self {
        Self(NEXT_PLAYER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Name of the event channel hosts bind this player's notifications to
    pub fn event_channel_name(&self) -> String {
        format!("tizen/video_player/video_events_{}", self.0)
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// DRM variants a playback session can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrmVariant {
    #[default]
    None,
    PlayReady,
    Widevine,
}

impl DrmVariant {
    /// Parse the numeric variant code hosts send (0 none, 1 playready, 2 widevine)
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(DrmVariant::None),
            1 => Ok(DrmVariant::PlayReady),
            2 => Ok(DrmVariant::Widevine),
            other => Err(Error::InvalidConfig(format!("unknown drm type {other}"))),
        }
    }

    /// Numeric code of this variant
    pub fn code(&self) -> i32 {
        match self {
            DrmVariant::None => 0,
            DrmVariant::PlayReady => 1,
            DrmVariant::Widevine => 2,
        }
    }

    /// EME key system name passed to the DRM engine
    pub fn key_system(&self) -> Option<&'static str> {
        match self {
            DrmVariant::None => None,
            DrmVariant::PlayReady => Some("com.microsoft.playready"),
            DrmVariant::Widevine => Some("com.widevine.alpha"),
        }
    }

    /// Returns the system ID (UUID) found in PSSH boxes for this variant
    pub fn system_id(&self) -> Option<&'static str> {
        match self {
            DrmVariant::None => None,
            DrmVariant::PlayReady => Some("9a04f079-9840-4286-ab92-e65be0885f95"),
            DrmVariant::Widevine => Some("edef8ba9-79d6-4ace-a3c8-27dcd51d21ed"),
        }
    }

    pub fn is_protected(&self) -> bool {
        *self != DrmVariant::None
    }
}

impl std::fmt::Display for DrmVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DrmVariant::None => write!(f, "none"),
            DrmVariant::PlayReady => write!(f, "playready"),
            DrmVariant::Widevine => write!(f, "widevine"),
        }
    }
}

/// Playback backends a session can be built on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Platform C media player
    #[default]
    MediaPlayer,
    /// Plus player (adaptive streaming engine)
    PlusPlayer,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::MediaPlayer => "media_player",
            BackendKind::PlusPlayer => "plus_player",
        }
    }

    /// Error code attached to asynchronous engine errors
    pub fn error_code(&self) -> &'static str {
        match self {
            BackendKind::MediaPlayer => "Media Player error",
            BackendKind::PlusPlayer => "PlusPlayer error",
        }
    }

    /// Whether the backend offers looping control
    pub fn supports_looping(&self) -> bool {
        matches!(self, BackendKind::MediaPlayer)
    }

    /// Whether the backend offers volume control
    pub fn supports_volume(&self) -> bool {
        matches!(self, BackendKind::MediaPlayer)
    }

    /// Whether playback is paused after a completion callback
    pub fn pauses_on_completion(&self) -> bool {
        matches!(self, BackendKind::MediaPlayer)
    }

    /// Whether the DRM session must be created in local (in-process) mode
    pub fn drm_local_mode(&self) -> bool {
        matches!(self, BackendKind::PlusPlayer)
    }

    /// Whether key installation has to run on the idle queue
    pub fn defers_key_install(&self) -> bool {
        matches!(self, BackendKind::PlusPlayer)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Engine lifecycle normalized to a total order.
///
/// Backends report their own labels; see [`MediaPlayerState`] and
/// [`PlusPlayerState`] for the mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EngineState {
    /// No engine or engine not created
    None,
    /// Created, nothing prepared
    Idle,
    /// Container probed, tracks not yet known
    Probed,
    /// Tracks known: duration and video size are available
    SourceReady,
    /// Prepared and ready to start
    Ready,
    /// Paused
    Paused,
    /// Playing
    Playing,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::None => write!(f, "none"),
            EngineState::Idle => write!(f, "idle"),
            EngineState::Probed => write!(f, "probed"),
            EngineState::SourceReady => write!(f, "source_ready"),
            EngineState::Ready => write!(f, "ready"),
            EngineState::Paused => write!(f, "paused"),
            EngineState::Playing => write!(f, "playing"),
        }
    }
}

/// States reported by the C media player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaPlayerState {
    None,
    Idle,
    Ready,
    Playing,
    Paused,
}

impl MediaPlayerState {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => MediaPlayerState::Idle,
            2 => MediaPlayerState::Ready,
            3 => MediaPlayerState::Playing,
            4 => MediaPlayerState::Paused,
            _ => MediaPlayerState::None,
        }
    }
}

impl From<MediaPlayerState> for EngineState {
    fn from(state: MediaPlayerState) -> Self {
        match state {
            MediaPlayerState::None => EngineState::None,
            MediaPlayerState::Idle => EngineState::Idle,
            MediaPlayerState::Ready => EngineState::Ready,
            MediaPlayerState::Playing => EngineState::Playing,
            MediaPlayerState::Paused => EngineState::Paused,
        }
    }
}

/// States reported by the plus player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlusPlayerState {
    None,
    Idle,
    TypeFinderReady,
    TrackSourceReady,
    Ready,
    Playing,
    Paused,
}

impl From<PlusPlayerState> for EngineState {
    fn from(state: PlusPlayerState) -> Self {
        match state {
            PlusPlayerState::None => EngineState::None,
            PlusPlayerState::Idle => EngineState::Idle,
            PlusPlayerState::TypeFinderReady => EngineState::Probed,
            PlusPlayerState::TrackSourceReady => EngineState::SourceReady,
            PlusPlayerState::Ready => EngineState::Ready,
            PlusPlayerState::Playing => EngineState::Playing,
            PlusPlayerState::Paused => EngineState::Paused,
        }
    }
}

/// Display rotation applied by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DisplayRotation {
    #[default]
    None,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl DisplayRotation {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => DisplayRotation::Rotate90,
            2 => DisplayRotation::Rotate180,
            3 => DisplayRotation::Rotate270,
            _ => DisplayRotation::None,
        }
    }

    /// 90° and 270° rotations exchange width and height
    pub fn swaps_axes(&self) -> bool {
        matches!(self, DisplayRotation::Rotate90 | DisplayRotation::Rotate270)
    }
}

/// Rectangle in window coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Geometry {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

impl std::fmt::Display for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Decoded video dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VideoSize {
    pub width: i32,
    pub height: i32,
}

impl VideoSize {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Size as seen on screen after `rotation`
    pub fn rotated(self, rotation: DisplayRotation) -> Self {
        if rotation.swaps_axes() {
            Self { width: self.height, height: self.width }
        } else {
            self
        }
    }
}

/// Opaque native window the video surface is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub usize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_ids_are_sequential() {
        let a = PlayerId::next();
        let b = PlayerId::next();
        assert!(b.0 > a.0);
        assert!(a.0 >= 1);
    }

    #[test]
    fn test_event_channel_name() {
        assert_eq!(PlayerId(7).event_channel_name(), "tizen/video_player/video_events_7");
    }

    #[test]
    fn test_drm_variant_codes() {
        assert_eq!(DrmVariant::from_code(0).unwrap(), DrmVariant::None);
        assert_eq!(DrmVariant::from_code(1).unwrap(), DrmVariant::PlayReady);
        assert_eq!(DrmVariant::from_code(2).unwrap(), DrmVariant::Widevine);
        assert!(DrmVariant::from_code(9).is_err());
        assert_eq!(DrmVariant::Widevine.key_system(), Some("com.widevine.alpha"));
        assert_eq!(DrmVariant::None.key_system(), None);
    }

    #[test]
    fn test_engine_state_order() {
        assert!(EngineState::None < EngineState::Idle);
        assert!(EngineState::Idle < EngineState::Probed);
        assert!(EngineState::SourceReady < EngineState::Ready);
        assert!(EngineState::Ready < EngineState::Paused);
        assert!(EngineState::Paused <= EngineState::Playing);
    }

    #[test]
    fn test_backend_state_mapping() {
        assert_eq!(EngineState::from(MediaPlayerState::from_raw(2)), EngineState::Ready);
        assert_eq!(EngineState::from(MediaPlayerState::from_raw(42)), EngineState::None);
        assert_eq!(
            EngineState::from(PlusPlayerState::TrackSourceReady),
            EngineState::SourceReady
        );
    }

    #[test]
    fn test_rotation_swaps_size() {
        let size = VideoSize::new(1920, 1080);
        assert_eq!(size.rotated(DisplayRotation::Rotate90), VideoSize::new(1080, 1920));
        assert_eq!(size.rotated(DisplayRotation::Rotate270), VideoSize::new(1080, 1920));
        assert_eq!(size.rotated(DisplayRotation::Rotate180), size);
    }

    #[test]
    fn test_backend_policies() {
        assert!(BackendKind::MediaPlayer.supports_volume());
        assert!(!BackendKind::PlusPlayer.supports_looping());
        assert!(BackendKind::PlusPlayer.defers_key_install());
        assert!(BackendKind::MediaPlayer.pauses_on_completion());
    }
}
