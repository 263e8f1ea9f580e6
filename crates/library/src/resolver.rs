use std::fs;
use std::path::{Path, PathBuf};

use common::{base_name, path_to_string, SongRecord, UNKNOWN_ALBUM, UNKNOWN_ARTIST};
use metadata::{LyricFrameKind, TagInfo, TagReader};
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::scanner::Candidate;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    Cached,
    Extracted,
    Degraded,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Resolved {
    pub record: SongRecord,
    pub resolution: Resolution,
}

impl Resolved {
    pub fn degraded(path: &Path) -> Self {
        Self {
            record: SongRecord::degraded(path),
            resolution: Resolution::Degraded,
        }
    }
}

/// Produces the record for one file. Cache hits never touch the file;
/// successful reads are written back to `cache`; failures degrade locally.
pub fn resolve(reader: &dyn TagReader, cache: &CacheStore, candidate: &Candidate) -> Resolved {
    let key = path_to_string(&candidate.path);
    if let Some(record) = cache.lookup(&key, candidate.mod_time) {
        return Resolved {
            record,
            resolution: Resolution::Cached,
        };
    }

    match reader.read_tags(&candidate.path) {
        Ok(tags) => {
            let record = build_record(&candidate.path, tags);
            cache.insert(key, candidate.mod_time, record.clone());
            Resolved {
                record,
                resolution: Resolution::Extracted,
            }
        }
        Err(err) => {
            warn!("Failed to read tags for {:?}: {}", candidate.path, err);
            Resolved::degraded(&candidate.path)
        }
    }
}

fn build_record(path: &Path, tags: TagInfo) -> SongRecord {
    let lyrics = resolve_lyrics(path, &tags);
    let path_str = path_to_string(path);
    SongRecord {
        id: path_str.clone(),
        path: path_str,
        title: tags.title.unwrap_or_else(|| base_name(path)),
        artist: tags.artist.unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
        album: tags.album.unwrap_or_else(|| UNKNOWN_ALBUM.to_string()),
        duration_seconds: tags
            .duration_ms
            .map(|ms| f64::from(ms) / 1000.0)
            .unwrap_or(0.0),
        lyrics,
        has_cover: tags.picture_count > 0,
    }
}

/// Common lyrics field, then native USLT, then native SYLT, then the
/// `.lrc` sidecar.
pub fn resolve_lyrics(path: &Path, tags: &TagInfo) -> Option<String> {
    common_lyrics(tags)
        .or_else(|| native_lyrics(tags, LyricFrameKind::Unsynchronized))
        .or_else(|| native_lyrics(tags, LyricFrameKind::Synchronized))
        .or_else(|| read_sidecar(path))
}

fn common_lyrics(tags: &TagInfo) -> Option<String> {
    tags.lyrics
        .first()
        .filter(|text| !text.trim().is_empty())
        .cloned()
}

fn native_lyrics(tags: &TagInfo, kind: LyricFrameKind) -> Option<String> {
    tags.native_frames
        .iter()
        .find(|frame| frame.kind == kind && !frame.text.trim().is_empty())
        .map(|frame| frame.text.clone())
}

pub fn sidecar_path(path: &Path) -> PathBuf {
    path.with_extension("lrc")
}

pub fn read_sidecar(path: &Path) -> Option<String> {
    let sidecar = sidecar_path(path);
    let text = read_lyric_file(&sidecar)?;
    debug!("Using sidecar lyrics {:?}", sidecar);
    Some(text)
}

/// Reads a lyric file as text, dropping a UTF-8 BOM and replacing invalid
/// sequences.
pub fn read_lyric_file(path: &Path) -> Option<String> {
    let bytes = fs::read(path).ok()?;
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes.as_slice());
    Some(String::from_utf8_lossy(bytes).into_owned())
}
