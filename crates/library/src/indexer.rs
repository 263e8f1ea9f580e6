use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::ScanChunk;
use futures_util::stream::{self, BoxStream, StreamExt};
use metadata::TagReader;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::scanner::{absolute_root, discover, discover_streaming, Discovered, Discovery};
use crate::scheduler::{listed, run_extraction, DiscoveryMode, ScanOptions, ScanSummary};

const DISCOVERY_BUFFER: usize = 256;

struct ScanTicket {
    generation: u64,
    token: CancellationToken,
}

/// Runs library scans and forwards their chunks to a single listener.
/// Starting a scan supersedes the previous one: from that point on the older
/// scan delivers nothing.
#[derive(Clone)]
pub struct Indexer {
    cache_path: Option<PathBuf>,
    options: ScanOptions,
    reader: Arc<dyn TagReader>,
    listener: mpsc::UnboundedSender<ScanChunk>,
    current: Arc<Mutex<ScanTicket>>,
    cache_io: Arc<Mutex<()>>,
}

impl Indexer {
    pub fn new(
        cache_path: Option<PathBuf>,
        options: ScanOptions,
        reader: Arc<dyn TagReader>,
        listener: mpsc::UnboundedSender<ScanChunk>,
    ) -> Self {
        Self {
            cache_path,
            options,
            reader,
            listener,
            current: Arc::new(Mutex::new(ScanTicket {
                generation: 0,
                token: CancellationToken::new(),
            })),
            cache_io: Arc::new(Mutex::new(())),
        }
    }

    pub fn generation(&self) -> u64 {
        self.current.lock().generation
    }

    pub async fn scan(&self, root: PathBuf) -> ScanSummary {
        let root = absolute_root(&root);
        let (generation, token) = self.begin_scan();
        info!("Scan {} started for {:?}", generation, root);

        let cache = self.load_cache().await;
        let discovered = self.discovery(&root, &token);

        let listener = self.listener.clone();
        let current = Arc::clone(&self.current);
        let emit = move |chunk: ScanChunk| {
            let ticket = current.lock();
            if ticket.generation != generation {
                debug!(
                    "Dropping chunk of {} songs from superseded scan {}",
                    chunk.songs.len(),
                    generation
                );
                return;
            }
            if listener.send(chunk).is_err() {
                debug!("Scan listener closed");
            }
        };

        let extraction = run_extraction(
            discovered.stream,
            Arc::clone(&cache),
            Arc::clone(&self.reader),
            &self.options,
            emit,
        )
        .await;
        if let Some(walker) = discovered.walker {
            if let Err(err) = walker.await {
                warn!("Discovery task for {:?} failed: {}", root, err);
            }
        }

        let mut summary = extraction.summary;
        summary.pruned = self
            .finish_cache(cache, root.clone(), extraction.seen)
            .await;
        info!(
            "Scan {} of {:?} finished: {} songs ({} extracted, {} cached, {} degraded, {} pruned)",
            generation,
            root,
            summary.total,
            summary.extracted,
            summary.cached,
            summary.degraded,
            summary.pruned
        );
        summary
    }

    fn begin_scan(&self) -> (u64, CancellationToken) {
        let mut ticket = self.current.lock();
        ticket.token.cancel();
        ticket.generation += 1;
        ticket.token = CancellationToken::new();
        (ticket.generation, ticket.token.clone())
    }

    async fn load_cache(&self) -> Arc<CacheStore> {
        let path = match &self.cache_path {
            Some(path) => path.clone(),
            None => return Arc::new(CacheStore::in_memory()),
        };
        let cache_io = Arc::clone(&self.cache_io);
        let fallback = path.clone();
        let loaded = tokio::task::spawn_blocking(move || {
            let _io = cache_io.lock();
            CacheStore::load(&path)
        })
        .await;
        match loaded {
            Ok(cache) => Arc::new(cache),
            Err(err) => {
                warn!("Cache load task failed: {}", err);
                Arc::new(CacheStore::empty(fallback))
            }
        }
    }

    fn discovery(&self, root: &Path, token: &CancellationToken) -> DiscoveryStream {
        let root = root.to_path_buf();
        let (stream, walker): (BoxStream<'static, Discovered>, _) = match self.options.discovery {
            DiscoveryMode::Upfront => {
                let walk = async move {
                    let result = tokio::task::spawn_blocking({
                        let root = root.clone();
                        move || discover(&root)
                    })
                    .await;
                    let discovery = match result {
                        Ok(discovery) => discovery,
                        Err(err) => {
                            warn!("Discovery task for {:?} failed: {}", root, err);
                            Discovery::default()
                        }
                    };
                    let skipped = discovery.skipped.into_iter().map(Discovered::Skipped);
                    stream::iter(skipped).chain(listed(discovery.candidates))
                };
                (stream::once(walk).flatten().boxed(), None)
            }
            DiscoveryMode::Streaming => {
                let (tx, rx) = mpsc::channel(DISCOVERY_BUFFER);
                let walker = tokio::task::spawn_blocking(move || {
                    discover_streaming(&root, &tx);
                });
                (ReceiverStream::new(rx).boxed(), Some(walker))
            }
        };

        let stream = if self.options.stop_superseded {
            stream.take_until(token.clone().cancelled_owned()).boxed()
        } else {
            stream
        };
        DiscoveryStream { stream, walker }
    }

    async fn finish_cache(
        &self,
        cache: Arc<CacheStore>,
        root: PathBuf,
        seen: std::collections::HashSet<String>,
    ) -> usize {
        let cache_io = Arc::clone(&self.cache_io);
        let finished = tokio::task::spawn_blocking(move || {
            let _io = cache_io.lock();
            let pruned = cache.prune_missing(&root, &seen);
            match cache.persist() {
                Ok(written) => {
                    if written > 0 {
                        debug!("Persisted {} cache changes to {:?}", written, cache.path());
                    }
                }
                Err(err) => warn!("Failed to persist song cache: {}", err),
            }
            pruned
        })
        .await;
        match finished {
            Ok(pruned) => pruned,
            Err(err) => {
                warn!("Cache persist task failed: {}", err);
                0
            }
        }
    }
}

struct DiscoveryStream {
    stream: BoxStream<'static, Discovered>,
    walker: Option<tokio::task::JoinHandle<()>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use metadata::{MetadataError, TagInfo};
    use std::fs;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Blocks on files named `slow*` until the gate opens.
    struct GatedReader {
        gate: AtomicBool,
        entered: AtomicUsize,
        calls: AtomicUsize,
    }

    impl GatedReader {
        fn new() -> Self {
            Self {
                gate: AtomicBool::new(false),
                entered: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl TagReader for GatedReader {
        fn read_tags(&self, path: &Path) -> Result<TagInfo, MetadataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            if name.starts_with("slow") {
                self.entered.fetch_add(1, Ordering::SeqCst);
                while !self.gate.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(2));
                }
            }
            Ok(TagInfo {
                title: Some(name),
                ..TagInfo::default()
            })
        }
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"audio").unwrap();
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ScanChunk>) -> Vec<ScanChunk> {
        let mut chunks = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            chunks.push(chunk);
        }
        chunks
    }

    async fn wait_for(counter: &AtomicUsize, at_least: usize) {
        while counter.load(Ordering::SeqCst) < at_least {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn scan_delivers_chunks_and_persists_cache() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("music");
        for i in 0..5 {
            touch(&root.join(format!("album/{}.mp3", i)));
        }
        let cache_path = dir.path().join("cache.redb");
        let reader = Arc::new(GatedReader::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let options = ScanOptions {
            chunk_size: 2,
            ..ScanOptions::default()
        };
        let indexer = Indexer::new(Some(cache_path.clone()), options, reader.clone(), tx);

        let summary = indexer.scan(root.clone()).await;
        assert_eq!(summary.total, 5);
        assert_eq!(summary.extracted, 5);
        let chunks = drain(&mut rx);
        assert_eq!(chunks.len(), 3);
        assert!(chunks[2].is_complete);
        assert_eq!(CacheStore::load(&cache_path).len(), 5);

        let summary = indexer.scan(root).await;
        assert_eq!(summary.cached, 5);
        assert_eq!(reader.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn rescan_prunes_deleted_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("music");
        touch(&root.join("keep.flac"));
        touch(&root.join("gone.flac"));
        let cache_path = dir.path().join("cache.redb");
        let (tx, _rx) = mpsc::unbounded_channel();
        let indexer = Indexer::new(
            Some(cache_path.clone()),
            ScanOptions::default(),
            Arc::new(GatedReader::new()),
            tx,
        );

        indexer.scan(root.clone()).await;
        fs::remove_file(root.join("gone.flac")).unwrap();
        let summary = indexer.scan(root).await;
        assert_eq!(summary.total, 1);
        assert_eq!(summary.pruned, 1);
        assert_eq!(CacheStore::load(&cache_path).len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn superseded_scan_delivers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let old_root = dir.path().join("old");
        let new_root = dir.path().join("new");
        for i in 0..3 {
            touch(&old_root.join(format!("slow{}.mp3", i)));
        }
        touch(&new_root.join("a.mp3"));
        touch(&new_root.join("b.mp3"));
        let cache_path = dir.path().join("cache.redb");
        let reader = Arc::new(GatedReader::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let indexer = Indexer::new(
            Some(cache_path.clone()),
            ScanOptions::default(),
            reader.clone(),
            tx,
        );

        let old_scan = tokio::spawn({
            let indexer = indexer.clone();
            async move { indexer.scan(old_root).await }
        });
        wait_for(&reader.entered, 1).await;

        let new_summary = indexer.scan(new_root).await;
        assert_eq!(new_summary.total, 2);
        reader.gate.store(true, Ordering::SeqCst);
        let old_summary = old_scan.await.unwrap();
        assert_eq!(old_summary.total, 3);
        assert_eq!(indexer.generation(), 2);

        let chunks = drain(&mut rx);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_complete);
        let mut titles: Vec<String> = chunks[0].songs.iter().map(|s| s.title.clone()).collect();
        titles.sort();
        assert_eq!(titles, vec!["a.mp3", "b.mp3"]);

        // Both scans keep their cache work.
        assert_eq!(CacheStore::load(&cache_path).len(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stop_superseded_halts_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let old_root = dir.path().join("old");
        let new_root = dir.path().join("new");
        for i in 0..6 {
            touch(&old_root.join(format!("slow{}.mp3", i)));
        }
        touch(&new_root.join("a.mp3"));
        let reader = Arc::new(GatedReader::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let options = ScanOptions {
            concurrency: 1,
            stop_superseded: true,
            ..ScanOptions::default()
        };
        let indexer = Indexer::new(None, options, reader.clone(), tx);

        let old_scan = tokio::spawn({
            let indexer = indexer.clone();
            async move { indexer.scan(old_root).await }
        });
        wait_for(&reader.entered, 1).await;
        indexer.scan(new_root).await;
        reader.gate.store(true, Ordering::SeqCst);

        let old_summary = old_scan.await.unwrap();
        assert!(old_summary.total < 6);
        let chunks = drain(&mut rx);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].songs.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn streaming_discovery_scans_everything() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..7 {
            touch(&dir.path().join(format!("d{}/t.m4a", i)));
        }
        let (tx, mut rx) = mpsc::unbounded_channel();
        let options = ScanOptions {
            chunk_size: 3,
            discovery: DiscoveryMode::Streaming,
            ..ScanOptions::default()
        };
        let indexer = Indexer::new(None, options, Arc::new(GatedReader::new()), tx);

        let summary = indexer.scan(dir.path().to_path_buf()).await;
        assert_eq!(summary.total, 7);
        let chunks = drain(&mut rx);
        let count: usize = chunks.iter().map(|c| c.songs.len()).sum();
        assert_eq!(count, 7);
        let last = chunks.last().unwrap();
        assert!(last.is_complete);
        assert_eq!(last.progress_percent, 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn relative_root_yields_absolute_ids() {
        let music = tempfile::tempdir_in(".").unwrap();
        let relative = PathBuf::from(music.path().file_name().unwrap());
        touch(&relative.join("a.mp3"));
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("cache.redb");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let indexer = Indexer::new(
            Some(cache_path.clone()),
            ScanOptions::default(),
            Arc::new(GatedReader::new()),
            tx,
        );

        let summary = indexer.scan(relative.clone()).await;
        assert_eq!(summary.total, 1);
        let chunks = drain(&mut rx);
        let song = &chunks[0].songs[0];
        let expected = std::path::absolute(relative.join("a.mp3")).unwrap();
        assert!(Path::new(&song.id).is_absolute());
        assert_eq!(PathBuf::from(&song.id), expected);
        assert_eq!(song.path, song.id);
        assert!(CacheStore::load(&cache_path).get(&song.id).is_some());

        // The same folder named absolutely hits the entries cached above.
        let absolute = std::env::current_dir().unwrap().join(&relative);
        let summary = indexer.scan(absolute).await;
        assert_eq!(summary.cached, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unwritable_cache_still_completes_scan() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("music");
        touch(&root.join("a.mp3"));
        touch(&root.join("b.mp3"));
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let indexer = Indexer::new(
            Some(blocker.join("cache.redb")),
            ScanOptions::default(),
            Arc::new(GatedReader::new()),
            tx,
        );

        let summary = indexer.scan(root).await;
        assert_eq!(summary.total, 2);
        assert_eq!(summary.extracted, 2);
        let chunks = drain(&mut rx);
        let last = chunks.last().unwrap();
        assert!(last.is_complete);
        assert_eq!(last.progress_percent, 100);
        let count: usize = chunks.iter().map(|c| c.songs.len()).sum();
        assert_eq!(count, 2);
        assert!(fs::metadata(&blocker).unwrap().is_file());
    }

    #[tokio::test]
    async fn missing_root_completes_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let indexer = Indexer::new(
            None,
            ScanOptions::default(),
            Arc::new(GatedReader::new()),
            tx,
        );
        let summary = indexer.scan(dir.path().join("absent")).await;
        assert_eq!(summary.total, 0);
        assert_eq!(summary.skipped_dirs, 1);
        let chunks = drain(&mut rx);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_complete);
        assert!(chunks[0].songs.is_empty());
    }
}
