//! Parsed source manifest
//!
//! The typed view the translator consumes. This is the *processed* form:
//! profile segment lists are expanded against the current wall clock on
//! every request, so only the raw parsed document is ever cached.

use serde::{Deserialize, Serialize};

/// A media segment within a profile
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaSegment {
    /// Absolute media URL
    pub media: String,

    /// Segment duration in seconds
    pub extinf: f64,

    /// Segment number within the representation timeline
    pub number: u64,

    /// Playlist media-sequence number, when distinct from `number`
    pub media_sequence: Option<u64>,

    /// Wall-clock presentation time, RFC 3339 (live streams)
    pub program_date_time: Option<String>,
}

/// One renderable representation of the content
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub mime_type: String,
    pub bandwidth: u64,
    pub width: u32,
    pub height: u32,
    pub codecs: String,
    pub frame_rate: Option<String>,
    pub lang: Option<String>,

    /// Absolute initialization segment URL
    pub init_url: String,

    /// Expanded segment list. Empty unless this profile was selected for
    /// expansion, or for live streams whose window is not yet populated.
    pub segments: Vec<MediaSegment>,
}

impl Profile {
    pub fn is_video(&self) -> bool {
        self.mime_type.contains("video")
    }

    pub fn is_audio(&self) -> bool {
        self.mime_type.contains("audio")
    }
}

/// Fully processed source manifest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceManifest {
    pub is_live: bool,

    /// Declared refresh bound in seconds; `None` for VOD
    pub minimum_update_period: Option<f64>,

    /// DRM default key id advertised by the source, when parsed
    pub default_kid: Option<String>,

    pub profiles: Vec<Profile>,
}

impl SourceManifest {
    /// Profiles whose id matches, preserving declaration order.
    pub fn matching_profiles(&self, profile_id: &str) -> Vec<&Profile> {
        self.profiles
            .iter()
            .filter(|p| p.id == profile_id)
            .collect()
    }
}
