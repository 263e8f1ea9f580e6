use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use common::{ScanChunk, SongRecord};
use futures_util::stream::{self, Stream, StreamExt};
use metadata::TagReader;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::resolver::{resolve, Resolution, Resolved};
use crate::scanner::{Candidate, Discovered};

pub const DEFAULT_CONCURRENCY: usize = 15;
pub const DEFAULT_CHUNK_SIZE: usize = 50;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// Walk the whole tree first so progress is exact from the first chunk.
    #[default]
    Upfront,
    /// Start extracting while the walk is still running.
    Streaming,
}

#[derive(Clone, Debug)]
pub struct ScanOptions {
    pub concurrency: usize,
    pub chunk_size: usize,
    pub discovery: DiscoveryMode,
    pub stop_superseded: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            discovery: DiscoveryMode::Upfront,
            stop_superseded: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub total: usize,
    pub extracted: usize,
    pub cached: usize,
    pub degraded: usize,
    pub pruned: usize,
    pub skipped_dirs: usize,
}

#[derive(Debug, Default)]
pub struct Extraction {
    pub summary: ScanSummary,
    pub seen: HashSet<String>,
}

/// Accumulates records into fixed-size chunks and tracks progress.
#[derive(Debug)]
pub struct ChunkBatcher {
    chunk_size: usize,
    buffer: Vec<SongRecord>,
    processed: usize,
    total: Option<usize>,
}

impl ChunkBatcher {
    pub fn new(chunk_size: usize, total: Option<usize>) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            buffer: Vec::with_capacity(chunk_size),
            processed: 0,
            total,
        }
    }

    pub fn set_total(&mut self, total: usize) {
        self.total = Some(total);
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    /// 0 until a total is known; floor of processed/total otherwise.
    pub fn progress(&self) -> u8 {
        match self.total {
            Some(total) if total > 0 => ((self.processed * 100 / total).min(100)) as u8,
            _ => 0,
        }
    }

    pub fn push(&mut self, record: SongRecord) -> Option<ScanChunk> {
        self.processed += 1;
        self.buffer.push(record);
        if self.buffer.len() < self.chunk_size {
            return None;
        }
        Some(ScanChunk {
            songs: std::mem::replace(&mut self.buffer, Vec::with_capacity(self.chunk_size)),
            is_complete: false,
            progress_percent: self.progress(),
        })
    }

    pub fn finish(self) -> ScanChunk {
        ScanChunk {
            songs: self.buffer,
            is_complete: true,
            progress_percent: 100,
        }
    }
}

enum Outcome {
    Song(Resolved),
    Skipped,
    Total(usize),
}

/// Discovery stream for a list that is already known in full.
pub fn listed(candidates: Vec<Candidate>) -> impl Stream<Item = Discovered> {
    let total = candidates.len();
    stream::once(async move { Discovered::Complete { total } })
        .chain(stream::iter(candidates.into_iter().map(Discovered::File)))
}

/// Resolves every discovered file with at most `options.concurrency`
/// resolutions in flight and hands chunks to `emit` as they fill. The last
/// chunk is always complete at 100%, even when empty.
pub async fn run_extraction<S, F>(
    discovered: S,
    cache: Arc<CacheStore>,
    reader: Arc<dyn TagReader>,
    options: &ScanOptions,
    mut emit: F,
) -> Extraction
where
    S: Stream<Item = Discovered>,
    F: FnMut(ScanChunk),
{
    let width = options.concurrency.max(1);
    let outcomes = discovered
        .map(move |event| {
            let cache = Arc::clone(&cache);
            let reader = Arc::clone(&reader);
            async move {
                match event {
                    Discovered::File(candidate) => {
                        Outcome::Song(resolve_blocking(reader, cache, candidate).await)
                    }
                    Discovered::Skipped(_) => Outcome::Skipped,
                    Discovered::Complete { total } => Outcome::Total(total),
                }
            }
        })
        .buffer_unordered(width);
    let mut outcomes = std::pin::pin!(outcomes);

    let mut batcher = ChunkBatcher::new(options.chunk_size, None);
    let mut extraction = Extraction::default();

    while let Some(outcome) = outcomes.next().await {
        let resolved = match outcome {
            Outcome::Song(resolved) => resolved,
            Outcome::Skipped => {
                extraction.summary.skipped_dirs += 1;
                continue;
            }
            Outcome::Total(total) => {
                debug!("Discovery complete: {} files", total);
                batcher.set_total(total);
                continue;
            }
        };
        match resolved.resolution {
            Resolution::Cached => extraction.summary.cached += 1,
            Resolution::Extracted => extraction.summary.extracted += 1,
            Resolution::Degraded => extraction.summary.degraded += 1,
        }
        extraction.seen.insert(resolved.record.id.clone());
        if let Some(chunk) = batcher.push(resolved.record) {
            emit(chunk);
        }
    }

    extraction.summary.total = batcher.processed();
    emit(batcher.finish());
    extraction
}

async fn resolve_blocking(
    reader: Arc<dyn TagReader>,
    cache: Arc<CacheStore>,
    candidate: Candidate,
) -> Resolved {
    let path: PathBuf = candidate.path.clone();
    let task = tokio::task::spawn_blocking(move || resolve(reader.as_ref(), &cache, &candidate));
    match task.await {
        Ok(resolved) => resolved,
        Err(err) => {
            warn!("Metadata task for {:?} failed: {}", path, err);
            Resolved::degraded(&path)
        }
    }
}
