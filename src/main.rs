//! cardscan - command line front end
//!
//! `hash` prints perceptual hashes, `scan` recognizes the cards in one image
//! and `serve` runs a streaming session over JSON lines on stdin/stdout.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cardscan::capture::Frame;
use cardscan::config::{self, AppConfig};
use cardscan::dataset::{DatasetLoader, DatasetManager, DatasetSource};
use cardscan::error::ErrorInfo;
use cardscan::matching::Matcher;
use cardscan::phash::phash;
use cardscan::pipeline::FramePipeline;
use cardscan::session::{FrameRequest, SessionEvent, SessionHandle};
use cardscan::vision::{extract_quadrilaterals, rectify};

/// cardscan - recognize trading cards by perceptual hash
#[derive(Parser, Debug)]
#[command(name = "cardscan")]
#[command(about = "Recognize trading cards in images and video frames")]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the perceptual hash of an image
    Hash {
        image: PathBuf,

        /// Side of the hashed DCT block
        #[arg(long)]
        hash_size: Option<u32>,

        /// Hash every detected card instead of the whole image
        #[arg(long)]
        detect: bool,
    },
    /// Recognize the cards in an image
    Scan {
        image: PathBuf,

        /// Dataset path or URL
        #[arg(short, long)]
        dataset: Option<String>,

        /// Maximum Hamming distance for a match
        #[arg(short, long)]
        threshold: Option<u32>,
    },
    /// Stream frames as JSON lines from stdin, write events to stdout
    Serve {
        /// Dataset path or URL
        #[arg(short, long)]
        dataset: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine readable
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Hash {
            image,
            hash_size,
            detect,
        } => {
            if let Some(size) = hash_size {
                config.hashing.hash_size = size;
            }
            config.validate()?;
            run_hash(&config, &image, detect)
        }
        Command::Scan {
            image,
            dataset,
            threshold,
        } => {
            if let Some(threshold) = threshold {
                config.matching.threshold = threshold;
            }
            config.validate()?;
            run_scan(&config, &image, dataset)
        }
        Command::Serve { dataset } => {
            config.validate()?;
            run_serve(&config, dataset)
        }
    }
}

fn open_frame(path: &Path) -> Result<Frame> {
    let image = image::open(path).with_context(|| format!("Failed to open image {:?}", path))?;
    Ok(Frame::from_image(&image))
}

/// Dataset from the command line, falling back to the config file
fn resolve_dataset(config: &AppConfig, dataset: Option<String>) -> Result<(DatasetManager, DatasetSource)> {
    let source = match dataset {
        Some(text) => text.parse::<DatasetSource>()?,
        None => config
            .dataset
            .source()
            .context("No dataset configured: pass --dataset or set [dataset] source")?,
    };
    let manager = DatasetManager::new(&config.dataset)?;
    Ok((manager, source))
}

fn run_hash(config: &AppConfig, path: &Path, detect: bool) -> Result<()> {
    let frame = open_frame(path)?;
    let image = frame.to_rgb_image()?;

    if !detect {
        println!("{}", phash(&image, &config.hashing)?);
        return Ok(());
    }

    let quads = extract_quadrilaterals(&frame, &config.detection)?;
    info!("Detected {} candidate regions", quads.len());

    for quad in quads {
        let hash = match rectify(&image, &quad, &config.rectify).and_then(|card| phash(&card, &config.hashing)) {
            Ok(hash) => hash,
            Err(e) => {
                warn!("Skipping region: {}", e);
                continue;
            }
        };
        let line = serde_json::json!({ "coords": quad, "phash": hash.to_hex() });
        println!("{}", line);
    }
    Ok(())
}

fn run_scan(config: &AppConfig, path: &Path, dataset: Option<String>) -> Result<()> {
    let (manager, source) = resolve_dataset(config, dataset)?;
    let table = manager.load_table(&source, config.hashing.bit_len())?;
    info!("Loaded {} reference hashes from {}", table.len(), source);

    let matcher = Arc::new(Matcher::new(Arc::new(table), &config.matching));
    let pipeline = FramePipeline::new(config.pipeline_config(), matcher)?;

    let frame = open_frame(path)?;
    let results = pipeline.process_frame(&frame)?;

    for result in &results {
        info!(
            "{} ({}) distance {} similarity {:.3}",
            result.card.name,
            result.card.set,
            result.distance,
            result.similarity()
        );
    }
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

fn run_serve(config: &AppConfig, dataset: Option<String>) -> Result<()> {
    let (manager, source) = resolve_dataset(config, dataset)?;
    let session = SessionHandle::spawn(config, Box::new(DatasetLoader::new(manager, source)));

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match session.recv() {
        Some(event @ SessionEvent::Loaded) => emit(&mut out, &event)?,
        Some(event) => {
            emit(&mut out, &event)?;
            anyhow::bail!("Session failed to start");
        }
        None => anyhow::bail!("Session worker exited before loading"),
    }

    for line in std::io::stdin().lock().lines() {
        let line = line.context("Failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }

        let frame = match serde_json::from_str::<FrameRequest>(&line)
            .map_err(|e| cardscan::ScanError::FrameProcessing(format!("invalid request: {}", e)))
            .and_then(|request| request.image_data.into_frame())
        {
            Ok(frame) => frame,
            Err(e) => {
                emit(&mut out, &SessionEvent::Error(ErrorInfo::from(&e)))?;
                continue;
            }
        };

        if let Err(e) = session.submit(frame) {
            let info = ErrorInfo {
                kind: "session".to_string(),
                message: e.to_string(),
            };
            emit(&mut out, &SessionEvent::Error(info))?;
            continue;
        }

        match session.recv() {
            Some(event) => emit(&mut out, &event)?,
            None => anyhow::bail!("Session worker exited unexpectedly"),
        }
    }

    let stats = session.stats();
    info!(
        "Processed {} frames ({} failed), average latency {:?} ms",
        stats.frames_processed,
        stats.frames_failed,
        stats.average_latency_ms()
    );
    session.shutdown();
    Ok(())
}

fn emit(out: &mut impl Write, event: &SessionEvent) -> Result<()> {
    serde_json::to_writer(&mut *out, event)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}
