mod cli;
mod config;

use std::collections::HashSet;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Command};
use common::{LyricLine, SongRecord};
use config::{
    config_path_from_env, load_or_create_config, resolve_music_root, resolve_path,
};
use library::{DiscoveryMode, Indexer};
use metadata::LoftyTagReader;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(config_path_from_env);
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        debug!("Loaded config from {:?}", config_path);
    }

    match cli.command {
        Command::Scan {
            root,
            json,
            no_cache,
            concurrency,
            chunk_size,
            streaming,
        } => {
            let root = match root.or_else(|| resolve_music_root(&config_path, &config.music_root)) {
                Some(root) => root,
                None => return Err("no folder given and music_root is not configured".into()),
            };
            let mut options = config.scan_options();
            if let Some(concurrency) = concurrency {
                options.concurrency = concurrency.max(1);
            }
            if let Some(chunk_size) = chunk_size {
                options.chunk_size = chunk_size.max(1);
            }
            if streaming {
                options.discovery = DiscoveryMode::Streaming;
            }
            let cache_path = (!no_cache).then(|| resolve_path(&config_path, &config.cache_path));

            let (tx, rx) = mpsc::unbounded_channel();
            let collector = tokio::spawn(collect_songs(rx));
            let indexer = Indexer::new(cache_path, options, Arc::new(LoftyTagReader), tx);
            let summary = indexer.scan(root).await;
            drop(indexer);
            let songs = collector.await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&songs)?);
            } else {
                for song in &songs {
                    println!("{}", song_line(song));
                }
            }
            info!(
                "{} songs: {} read, {} from cache, {} unreadable",
                summary.total, summary.extracted, summary.cached, summary.degraded
            );
            if summary.skipped_dirs > 0 {
                warn!("{} folders could not be read", summary.skipped_dirs);
            }
        }
        Command::Lyrics { file, json, at } => {
            let raw = load_lyric_text(&file)?;
            let lines = lyrics::parse_with(&raw, &config.lyrics);
            if lines.is_empty() {
                warn!("No synchronized lyrics in {:?}", file);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&lines)?);
            } else {
                let active = at.and_then(|position| lyrics::active_line(&lines, position));
                for (index, line) in lines.iter().enumerate() {
                    print!("{}", lyric_block(line, Some(index) == active));
                }
            }
        }
        Command::Cover { file, output } => {
            write_cover(&file, output)?;
        }
    }

    Ok(())
}

/// Accumulates chunks for one scan, deduplicating by id.
async fn collect_songs(mut rx: mpsc::UnboundedReceiver<common::ScanChunk>) -> Vec<SongRecord> {
    let mut songs = Vec::new();
    let mut ids = HashSet::new();
    while let Some(chunk) = rx.recv().await {
        debug!(
            "Received {} songs ({}%)",
            chunk.songs.len(),
            chunk.progress_percent
        );
        for song in chunk.songs {
            if ids.insert(song.id.clone()) {
                songs.push(song);
            }
        }
        if chunk.is_complete {
            break;
        }
    }
    songs.sort_by(|a, b| a.path.cmp(&b.path));
    songs
}

fn load_lyric_text(file: &Path) -> Result<String, Box<dyn Error>> {
    if library::is_scannable(file) {
        let tags = metadata::read_tags(file)?;
        return library::resolve_lyrics(file, &tags)
            .ok_or_else(|| format!("no lyrics found for {:?}", file).into());
    }
    library::read_lyric_file(file).ok_or_else(|| format!("cannot read {:?}", file).into())
}

fn write_cover(file: &Path, output: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let cover = metadata::read_cover(file)?
        .ok_or_else(|| format!("no embedded cover in {:?}", file))?;
    let mime = cover.mime.as_deref().unwrap_or("application/octet-stream");
    let output = match output {
        Some(output) => {
            if let Some(guessed) = mime_guess::from_path(&output).first() {
                if guessed.essence_str() != mime {
                    warn!("Cover is {} but {:?} suggests {}", mime, output, guessed);
                }
            }
            output
        }
        None => file.with_extension(image_extension(mime)),
    };
    fs::write(&output, &cover.data)?;
    info!("Wrote {} byte cover ({}) to {:?}", cover.data.len(), mime, output);
    Ok(())
}

fn image_extension(mime: &str) -> &'static str {
    const PREFERRED: &[&str] = &["jpg", "png", "gif", "webp"];
    let known = mime_guess::get_mime_extensions_str(mime).unwrap_or(&[]);
    PREFERRED
        .iter()
        .copied()
        .find(|ext| known.contains(ext))
        .or_else(|| known.first().copied())
        .unwrap_or("bin")
}

fn song_line(song: &SongRecord) -> String {
    let mut line = format!(
        "{} - {} ({}) {}",
        song.artist,
        song.title,
        song.album,
        format_duration(song.duration_seconds)
    );
    if song.lyrics.is_some() {
        line.push_str(" [lyrics]");
    }
    if song.has_cover {
        line.push_str(" [cover]");
    }
    line
}

fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

fn format_timestamp(seconds: f64) -> String {
    let millis = (seconds.max(0.0) * 1000.0).round() as u64;
    format!(
        "{:02}:{:02}.{:02}",
        millis / 60_000,
        millis / 1000 % 60,
        millis % 1000 / 10
    )
}

fn lyric_block(line: &LyricLine, active: bool) -> String {
    let marker = if active { '>' } else { ' ' };
    let mut block = format!("{} [{}] {}\n", marker, format_timestamp(line.time), line.text);
    if let Some(translation) = &line.translation {
        block.push_str(&format!("{:13}{}\n", "", translation));
    }
    block
}
