use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use common::extension_lower;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use walkdir::WalkDir;

pub const SCAN_EXTENSIONS: &[&str] = &["mp3", "m4a", "flac", "wav"];
pub const PLAYBACK_EXTENSIONS: &[&str] = &["mp3", "m4a", "flac", "wav", "ogg"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    /// Milliseconds since the Unix epoch; 0 when the platform gives none.
    pub mod_time: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedEntry {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct Discovery {
    pub candidates: Vec<Candidate>,
    pub skipped: Vec<SkippedEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Discovered {
    File(Candidate),
    Skipped(SkippedEntry),
    Complete { total: usize },
}

enum Walked {
    File(Candidate),
    Skipped(SkippedEntry),
}

pub fn is_scannable(path: &Path) -> bool {
    has_extension(path, SCAN_EXTENSIONS)
}

pub fn is_playable(path: &Path) -> bool {
    has_extension(path, PLAYBACK_EXTENSIONS)
}

/// Song ids and cache keys are absolute, so a relative root is resolved
/// against the working directory before walking.
pub fn absolute_root(root: &Path) -> PathBuf {
    match std::path::absolute(root) {
        Ok(path) => path,
        Err(err) => {
            warn!("Cannot resolve {:?} to an absolute path: {}", root, err);
            root.to_path_buf()
        }
    }
}

/// Walks `root` to completion and returns every audio file sorted by path.
pub fn discover(root: &Path) -> Discovery {
    let mut discovery = Discovery::default();
    walk(root, |walked| {
        match walked {
            Walked::File(candidate) => discovery.candidates.push(candidate),
            Walked::Skipped(skipped) => discovery.skipped.push(skipped),
        }
        true
    });
    discovery.candidates.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(
        "Discovered {} audio files under {:?} ({} skipped)",
        discovery.candidates.len(),
        root,
        discovery.skipped.len()
    );
    discovery
}

/// Blocking walk that forwards discoveries as they happen and finishes with
/// `Discovered::Complete`. Stops early once the receiver is gone. Returns
/// the number of files sent.
pub fn discover_streaming(root: &Path, tx: &mpsc::Sender<Discovered>) -> usize {
    let mut total = 0usize;
    let finished = walk(root, |walked| {
        let event = match walked {
            Walked::File(candidate) => {
                total += 1;
                Discovered::File(candidate)
            }
            Walked::Skipped(skipped) => Discovered::Skipped(skipped),
        };
        tx.blocking_send(event).is_ok()
    });
    if finished {
        let _ = tx.blocking_send(Discovered::Complete { total });
    } else {
        debug!("Discovery under {:?} stopped early after {} files", root, total);
    }
    total
}

/// Returns false when `visit` asked to stop.
fn walk<F>(root: &Path, mut visit: F) -> bool
where
    F: FnMut(Walked) -> bool,
{
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.to_path_buf());
                warn!("Skipping {:?}: {}", path, err);
                let skipped = SkippedEntry {
                    path,
                    error: err.to_string(),
                };
                if !visit(Walked::Skipped(skipped)) {
                    return false;
                }
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_scannable(entry.path()) {
            continue;
        }
        let mod_time = entry
            .metadata()
            .ok()
            .and_then(|metadata| mod_time_ms(&metadata))
            .unwrap_or(0);
        let candidate = Candidate {
            path: entry.into_path(),
            mod_time,
        };
        if !visit(Walked::File(candidate)) {
            return false;
        }
    }
    true
}

pub(crate) fn mod_time_ms(metadata: &Metadata) -> Option<u64> {
    let modified = metadata.modified().ok()?;
    let millis = modified.duration_since(UNIX_EPOCH).ok()?.as_millis();
    Some(millis.min(u128::from(u64::MAX)) as u64)
}

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    match extension_lower(path) {
        Some(ext) => allowed.contains(&ext.as_str()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"audio").unwrap();
    }

    #[test]
    fn extension_sets() {
        assert!(is_scannable(Path::new("a.MP3")));
        assert!(is_scannable(Path::new("a.m4a")));
        assert!(is_scannable(Path::new("a.flac")));
        assert!(is_scannable(Path::new("a.wav")));
        assert!(!is_scannable(Path::new("a.ogg")));
        assert!(is_playable(Path::new("a.ogg")));
        assert!(!is_playable(Path::new("a.lrc")));
        assert!(!is_scannable(Path::new("noext")));
    }

    #[test]
    fn relative_roots_become_absolute() {
        let root = absolute_root(Path::new("music/albums"));
        assert!(root.is_absolute());
        assert!(root.ends_with("music/albums"));
        assert_eq!(absolute_root(Path::new("/srv/music")), PathBuf::from("/srv/music"));
    }

    #[test]
    fn discover_recurses_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("a.mp3"));
        touch(&root.join("Artist/Album/01.flac"));
        touch(&root.join("Artist/Album/01.lrc"));
        touch(&root.join("Artist/Album/cover.jpg"));
        touch(&root.join("deep/er/still/x.wav"));
        touch(&root.join("deep/skip.ogg"));
        touch(&root.join("m/y.M4A"));

        let discovery = discover(root);
        let names: Vec<String> = discovery
            .candidates
            .iter()
            .map(|c| c.path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(
            names,
            vec!["Artist/Album/01.flac", "a.mp3", "deep/er/still/x.wav", "m/y.M4A"]
        );
        assert!(discovery.candidates.iter().all(|c| c.mod_time > 0));
        assert!(discovery.skipped.is_empty());
    }

    #[test]
    fn missing_root_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let discovery = discover(&dir.path().join("nope"));
        assert!(discovery.candidates.is_empty());
        assert_eq!(discovery.skipped.len(), 1);
    }

    #[test]
    fn streaming_discovery_ends_with_total() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.mp3"));
        touch(&dir.path().join("sub/b.flac"));

        let (tx, mut rx) = mpsc::channel(16);
        let sent = discover_streaming(dir.path(), &tx);
        drop(tx);
        assert_eq!(sent, 2);

        let mut events = Vec::new();
        while let Some(event) = rx.blocking_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 3);
        assert_eq!(events.last(), Some(&Discovered::Complete { total: 2 }));
    }

    #[test]
    fn streaming_discovery_stops_when_receiver_drops() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            touch(&dir.path().join(format!("{}.mp3", i)));
        }
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert_eq!(discover_streaming(dir.path(), &tx), 1);
    }
}
