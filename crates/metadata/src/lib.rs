use std::fs::File;
use std::path::Path;

use lofty::config::ParseOptions;
use lofty::error::LoftyError;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::id3::v2::{Frame, Id3v2Tag, SynchronizedTextFrame, TimestampFormat};
use lofty::iff::wav::WavFile;
use lofty::mpeg::MpegFile;
use lofty::picture::{Picture, PictureType};
use lofty::tag::ItemKey;

/// Narrow view of a file's tags. Everything the tag library knows beyond
/// these fields is dropped at this boundary.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TagInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_ms: Option<u32>,
    pub picture_count: usize,
    pub lyrics: Vec<String>,
    pub native_frames: Vec<NativeLyricFrame>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LyricFrameKind {
    Unsynchronized,
    Synchronized,
}

/// A lyric frame pulled straight from an ID3v2 tag (`USLT` or `SYLT`).
/// Synchronized frames carry LRC text when their timestamps are milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeLyricFrame {
    pub kind: LyricFrameKind,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct CoverArt {
    pub data: Vec<u8>,
    pub mime: Option<String>,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

/// The external tag reader seen by the indexing pipeline.
pub trait TagReader: Send + Sync {
    fn read_tags(&self, path: &Path) -> Result<TagInfo, MetadataError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyTagReader;

impl TagReader for LoftyTagReader {
    fn read_tags(&self, path: &Path) -> Result<TagInfo, MetadataError> {
        read_tags(path)
    }
}

pub fn read_tags(path: &Path) -> Result<TagInfo, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    let properties = tagged_file.properties();

    let mut info = TagInfo::default();

    let duration_ms = properties.duration().as_millis();
    if duration_ms > 0 {
        let clamped = duration_ms.min(u128::from(u32::MAX)) as u32;
        info.duration_ms = Some(clamped);
    }

    info.picture_count = tagged_file
        .tags()
        .iter()
        .map(|tag| tag.pictures().len())
        .sum();

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        info.title = non_empty(tag.get_string(&ItemKey::TrackTitle));
        info.album = non_empty(tag.get_string(&ItemKey::AlbumTitle));
        let album_artist = non_empty(tag.get_string(&ItemKey::AlbumArtist));
        let track_artist = non_empty(tag.get_string(&ItemKey::TrackArtist));
        info.artist = track_artist.or(album_artist);
        info.lyrics = tag
            .get_strings(&ItemKey::Lyrics)
            .map(|value| value.to_string())
            .collect();
    }

    // A failed native read only narrows the lyric fallback chain.
    info.native_frames = read_native_frames(path).unwrap_or_default();

    Ok(info)
}

pub fn read_cover(path: &Path) -> Result<Option<CoverArt>, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    let tag = match tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        Some(tag) => tag,
        None => return Ok(None),
    };

    let picture = match pick_picture(tag.pictures()) {
        Some(picture) => picture,
        None => return Ok(None),
    };

    let data = picture.data().to_vec();
    let mime = guess_mime(&data);
    Ok(Some(CoverArt { data, mime }))
}

fn read_native_frames(path: &Path) -> Result<Vec<NativeLyricFrame>, MetadataError> {
    let ext = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
    let options = ParseOptions::new().read_properties(false);
    match ext.as_deref() {
        Some("mp3") => {
            let mut file = File::open(path)?;
            let mpeg = MpegFile::read_from(&mut file, options)?;
            Ok(mpeg.id3v2().map(lyric_frames).unwrap_or_default())
        }
        Some("wav") => {
            let mut file = File::open(path)?;
            let wav = WavFile::read_from(&mut file, options)?;
            Ok(wav.id3v2().map(lyric_frames).unwrap_or_default())
        }
        _ => Ok(Vec::new()),
    }
}

fn lyric_frames(tag: &Id3v2Tag) -> Vec<NativeLyricFrame> {
    let mut out = Vec::new();
    for frame in tag {
        match frame {
            Frame::UnsynchronizedText(uslt) => {
                if !uslt.content.trim().is_empty() {
                    out.push(NativeLyricFrame {
                        kind: LyricFrameKind::Unsynchronized,
                        text: uslt.content.clone(),
                    });
                }
            }
            Frame::Binary(binary) if frame.id_str() == "SYLT" => {
                let sylt = match SynchronizedTextFrame::parse(&binary.data, frame.flags()) {
                    Ok(sylt) => sylt,
                    Err(_) => continue,
                };
                let millis = sylt.timestamp_format == TimestampFormat::MS;
                let text = format_synced_text(&sylt.content, millis);
                if !text.trim().is_empty() {
                    out.push(NativeLyricFrame {
                        kind: LyricFrameKind::Synchronized,
                        text,
                    });
                }
            }
            _ => {}
        }
    }
    out
}

/// Renders synchronized text as LRC lines. Without millisecond timestamps
/// the text is joined line by line.
pub fn format_synced_text(content: &[(u32, String)], millis: bool) -> String {
    let mut lines = Vec::with_capacity(content.len());
    for (timestamp, text) in content {
        let text = text.trim_matches(|c: char| c == '\n' || c == '\r');
        if millis {
            lines.push(format!("{}{}", lrc_timestamp(*timestamp), text));
        } else {
            lines.push(text.to_string());
        }
    }
    lines.join("\n")
}

fn lrc_timestamp(ms: u32) -> String {
    let minutes = ms / 60_000;
    let seconds = (ms % 60_000) / 1000;
    let hundredths = (ms % 1000) / 10;
    format!("[{:02}:{:02}.{:02}]", minutes, seconds, hundredths)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

fn pick_picture(pictures: &[Picture]) -> Option<&Picture> {
    for picture in pictures {
        if picture.pic_type() == PictureType::CoverFront {
            return Some(picture);
        }
    }
    pictures.first()
}

fn guess_mime(bytes: &[u8]) -> Option<String> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg".to_string())
    } else if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        Some("image/png".to_string())
    } else if bytes.starts_with(b"GIF8") {
        Some("image/gif".to_string())
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp".to_string())
    } else {
        None
    }
}
