mod cache;
mod indexer;
mod resolver;
mod scanner;
mod scheduler;

use redb::{CommitError, DatabaseError, StorageError, TableError, TransactionError};

pub use cache::{CacheEntry, CacheStore};
pub use indexer::Indexer;
pub use resolver::{
    read_lyric_file, read_sidecar, resolve, resolve_lyrics, sidecar_path, Resolution, Resolved,
};
pub use scanner::{
    absolute_root, discover, discover_streaming, is_playable, is_scannable, Candidate, Discovered,
    Discovery, SkippedEntry, PLAYBACK_EXTENSIONS, SCAN_EXTENSIONS,
};
pub use scheduler::{
    listed, run_extraction, ChunkBatcher, DiscoveryMode, Extraction, ScanOptions, ScanSummary,
    DEFAULT_CHUNK_SIZE, DEFAULT_CONCURRENCY,
};

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
    VersionMismatch(u32),
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Redb(err) => write!(f, "db error: {}", err),
            LibraryError::Bincode(err) => write!(f, "bincode error: {}", err),
            LibraryError::VersionMismatch(version) => {
                write!(f, "cache version mismatch: {}", version)
            }
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<redb::Error> for LibraryError {
    fn from(err: redb::Error) -> Self {
        LibraryError::Redb(err)
    }
}

impl From<DatabaseError> for LibraryError {
    fn from(err: DatabaseError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TableError> for LibraryError {
    fn from(err: TableError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TransactionError> for LibraryError {
    fn from(err: TransactionError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<StorageError> for LibraryError {
    fn from(err: StorageError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<CommitError> for LibraryError {
    fn from(err: CommitError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for LibraryError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        LibraryError::Bincode(err)
    }
}
