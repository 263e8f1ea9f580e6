use serde::{Deserialize, Serialize};
use std::path::Path;

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

/// One indexed audio file. The id is the absolute path of the file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongRecord {
    pub id: String,
    pub path: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_seconds: f64,
    pub lyrics: Option<String>,
    pub has_cover: bool,
}

impl SongRecord {
    /// Record used when the tag reader fails for a file.
    pub fn degraded(path: &Path) -> Self {
        let path_str = path_to_string(path);
        Self {
            id: path_str.clone(),
            path: path_str,
            title: base_name(path),
            artist: UNKNOWN_ARTIST.to_string(),
            album: UNKNOWN_ALBUM.to_string(),
            duration_seconds: 0.0,
            lyrics: None,
            has_cover: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanChunk {
    pub songs: Vec<SongRecord>,
    pub is_complete: bool,
    pub progress_percent: u8,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LyricLine {
    pub time: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
}

impl LyricLine {
    pub fn new(time: f64, text: impl Into<String>) -> Self {
        Self {
            time,
            text: text.into(),
            translation: None,
        }
    }

    pub fn with_translation(
        time: f64,
        text: impl Into<String>,
        translation: impl Into<String>,
    ) -> Self {
        Self {
            time,
            text: text.into(),
            translation: Some(translation.into()),
        }
    }
}

pub fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Final path component including its extension.
pub fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path_to_string(path))
}

pub fn extension_lower(path: &Path) -> Option<String> {
    Some(path.extension()?.to_string_lossy().to_ascii_lowercase())
}
