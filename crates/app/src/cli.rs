use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "cadenza")]
#[command(about = "Index a local music folder and read synchronized lyrics")]
pub struct Cli {
    /// Config file path. Defaults to $CADENZA_CONFIG, then config.yaml next to the binary.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Index a music folder and list the songs found.
    Scan {
        /// Folder to scan. Falls back to `music_root` from the config.
        root: Option<PathBuf>,

        /// Print songs as JSON instead of one line per song.
        #[arg(long)]
        json: bool,

        /// Neither read nor write the song cache.
        #[arg(long)]
        no_cache: bool,

        /// Concurrent tag reads.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Songs per progress chunk.
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Start reading tags while the folder walk is still running.
        #[arg(long)]
        streaming: bool,
    },

    /// Print the lyric timeline of an .lrc file or of an audio file.
    Lyrics {
        file: PathBuf,

        /// Print lines as JSON.
        #[arg(long)]
        json: bool,

        /// Mark the line active at this playback position (seconds).
        #[arg(long)]
        at: Option<f64>,
    },

    /// Write the embedded cover image of an audio file to disk.
    Cover {
        file: PathBuf,

        /// Output file. Defaults to the audio path with an image extension.
        output: Option<PathBuf>,
    },
}
