//! # Playback Types
//!
//! Value objects for remote playback state, plus the Spotify Web API payloads
//! they are decoded from.

use serde::{Deserialize, Serialize};

/// A playable item as shown on the display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRef {
    pub id: String,
    pub title: String,
    /// In credit order.
    pub artist_names: Vec<String>,
    pub album_name: String,
    pub album_art_url: Option<String>,
    pub duration_ms: u64,
}

impl TrackRef {
    /// Artists joined for display, e.g. `"Daft Punk, Pharrell Williams"`.
    pub fn artists_display(&self) -> String {
        self.artist_names.join(", ")
    }
}

/// One point-in-time read of the remote player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    /// `None` for ads, unavailable items or an empty queue.
    pub item: Option<TrackRef>,
    pub is_playing: bool,
    pub progress_ms: u64,
    /// Unix epoch milliseconds.
    pub fetched_at: i64,
}

impl PlaybackSnapshot {
    pub fn track_id(&self) -> Option<&str> {
        self.item.as_ref().map(|track| track.id.as_str())
    }
}

/// A Spotify Connect device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type", default)]
    pub device_type: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub volume_percent: Option<u32>,
}

// ============================================================================
// Web API payloads
// ============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct CurrentlyPlayingResponse {
    #[serde(default)]
    pub item: Option<TrackObject>,
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub progress_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TrackObject {
    /// Null for local files.
    pub id: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<ArtistObject>,
    /// Absent for podcast episodes.
    #[serde(default)]
    pub album: Option<AlbumObject>,
    #[serde(default)]
    pub duration_ms: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ArtistObject {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AlbumObject {
    pub name: String,
    #[serde(default)]
    pub images: Vec<ImageObject>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ImageObject {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DevicesResponse {
    #[serde(default)]
    pub devices: Vec<Device>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorDetail {
    #[serde(default)]
    pub message: String,
}

impl TrackObject {
    pub(crate) fn into_track_ref(self) -> TrackRef {
        let (album_name, album_art_url) = match self.album {
            Some(album) => {
                // Spotify lists images widest first
                let art = album.images.into_iter().next().map(|image| image.url);
                (album.name, art)
            }
            None => (String::new(), None),
        };

        TrackRef {
            id: self.id.or(self.uri).unwrap_or_default(),
            title: self.name,
            artist_names: self.artists.into_iter().map(|a| a.name).collect(),
            album_name,
            album_art_url,
            duration_ms: self.duration_ms,
        }
    }
}

impl CurrentlyPlayingResponse {
    pub(crate) fn into_snapshot(self, fetched_at: i64) -> PlaybackSnapshot {
        PlaybackSnapshot {
            item: self.item.map(TrackObject::into_track_ref),
            is_playing: self.is_playing,
            progress_ms: self.progress_ms.unwrap_or(0),
            fetched_at,
        }
    }
}
