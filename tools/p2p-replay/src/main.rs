//! P2P Replay - push a recorded H.264 stream through a bridge session
//!
//! Splits an Annex-B capture into NAL units, feeds them to a loopback
//! engine as if they came off the network, and writes whatever the
//! receiver got to an output file. Prints the session counters as JSON.
//!
//! # Usage
//!
//! ```bash
//! # Replay and dump the delivered stream
//! p2p-replay capture.h264 --output live.h264
//!
//! # Also keep the first delivered unit, pace at 30 units/s
//! p2p-replay capture.h264 --output live.h264 --first-frame first_frame.h264 --rate 30
//!
//! # Exercise texture routing
//! p2p-replay capture.h264 --texture 7
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use p2pbridge_core::nal::AnnexBUnits;
use p2pbridge_core::{
    BridgeConfig, CallbackReceiver, CounterSnapshot, DeliveryError, DeliveryMode,
    InProcessRuntime, LoopbackEngine, SessionController, SessionState, TextureHandle,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Replay an Annex-B H.264 capture through a loopback bridge session
#[derive(Parser, Debug)]
#[command(name = "p2p-replay")]
#[command(author, version)]
struct Args {
    /// Annex-B H.264 input file
    input: PathBuf,

    /// Write every delivered unit here
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write the first delivered unit here
    #[arg(long)]
    first_frame: Option<PathBuf>,

    /// Bridge configuration (.yaml, .json or .toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Deliver in texture mode with this handle
    #[arg(long)]
    texture: Option<i64>,

    /// Units per second; unpaced when omitted
    #[arg(long)]
    rate: Option<u32>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Where delivered units end up
struct Sink {
    output: Option<BufWriter<File>>,
    first_frame: Option<File>,
}

impl Sink {
    fn create(output: Option<&Path>, first_frame: Option<&Path>) -> Result<Self> {
        let output = output
            .map(|path| {
                File::create(path)
                    .map(BufWriter::new)
                    .with_context(|| format!("Failed to create {}", path.display()))
            })
            .transpose()?;
        let first_frame = first_frame
            .map(|path| {
                File::create(path).with_context(|| format!("Failed to create {}", path.display()))
            })
            .transpose()?;
        Ok(Self {
            output,
            first_frame,
        })
    }

    fn write(&mut self, unit: &[u8]) -> std::io::Result<()> {
        if let Some(file) = self.first_frame.as_mut() {
            file.write_all(unit)?;
            file.flush()?;
            self.first_frame = None;
        }
        if let Some(output) = self.output.as_mut() {
            output.write_all(unit)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> std::io::Result<()> {
        match self.output.as_mut() {
            Some(output) => output.flush(),
            None => Ok(()),
        }
    }
}

struct ReplayOptions<'a> {
    input: &'a Path,
    output: Option<&'a Path>,
    first_frame: Option<&'a Path>,
    texture: Option<TextureHandle>,
    rate: Option<u32>,
    config: BridgeConfig,
}

/// When unit number `units` is due, counted from the start of the replay
fn due_at(interval: Duration, units: u64) -> Duration {
    let nanos = interval.as_nanos().saturating_mul(u128::from(units));
    let secs = u64::try_from(nanos / 1_000_000_000).unwrap_or(u64::MAX);
    Duration::new(secs, (nanos % 1_000_000_000) as u32)
}

fn replay(options: ReplayOptions<'_>) -> Result<CounterSnapshot> {
    let data = std::fs::read(options.input)
        .with_context(|| format!("Failed to read {}", options.input.display()))?;
    let sink = Arc::new(Mutex::new(Sink::create(options.output, options.first_frame)?));

    let engine = Arc::new(LoopbackEngine::new());
    let session = SessionController::new(
        engine.clone(),
        Arc::new(InProcessRuntime::new()),
        options.config,
    )
    .context("Invalid bridge configuration")?;

    let (raw, texture) = (sink.clone(), sink.clone());
    let receiver = CallbackReceiver::builder("p2p-replay")
        .on_video_frame(move |unit| {
            raw.lock()
                .write(&unit)
                .map_err(|e| DeliveryError::new(e.to_string()))
        })
        .on_texture_frame(move |_, unit, _| {
            texture
                .lock()
                .write(&unit)
                .map_err(|e| DeliveryError::new(e.to_string()))
        })
        .on_error(|message| {
            tracing::warn!(%message, "bridge reported error");
            Ok(())
        })
        .on_message(|_, _| Ok(()))
        .build();
    session.bind(&receiver)?;

    if let Some(handle) = options.texture {
        session.set_mode(DeliveryMode::Texture);
        session.set_texture(handle);
    }

    session.start()?;
    let interval = options.rate.map(|rate| Duration::from_secs_f64(1.0 / rate.max(1) as f64));
    let started = Instant::now();
    let mut units = 0u64;
    for unit in AnnexBUnits::new(&data) {
        engine.push_frame(unit);
        units += 1;
        if let Some(interval) = interval {
            let due = due_at(interval, units);
            if let Some(wait) = due.checked_sub(started.elapsed()) {
                std::thread::sleep(wait);
            }
        }
    }
    tracing::info!(units, elapsed_ms = started.elapsed().as_millis() as u64, "input replayed");

    session.stop()?;
    let deadline = Instant::now() + session.config().stop_timeout();
    while session.state() == SessionState::Stopping && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    let stats = session.stats();
    session.dispose();

    sink.lock().finish().context("Failed to flush output")?;
    Ok(stats)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    let config = match &args.config {
        Some(path) => BridgeConfig::from_path(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => BridgeConfig::default(),
    };

    let stats = replay(ReplayOptions {
        input: &args.input,
        output: args.output.as_deref(),
        first_frame: args.first_frame.as_deref(),
        texture: args.texture.map(TextureHandle),
        rate: args.rate,
        config,
    })?;

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &[u8] = &[
        0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1f, // SPS
        0, 0, 0, 1, 0x68, 0xce, 0x3c, 0x80, // PPS
        0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00, // IDR
        0, 0, 0, 1, 0x41, 0x9a, 0x02, // P
    ];

    fn options<'a>(input: &'a Path, output: &'a Path, first: &'a Path) -> ReplayOptions<'a> {
        ReplayOptions {
            input,
            output: Some(output),
            first_frame: Some(first),
            texture: None,
            rate: None,
            config: BridgeConfig::default(),
        }
    }

    #[test]
    fn test_replay_reproduces_stream() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("capture.h264");
        let output = dir.path().join("live.h264");
        let first = dir.path().join("first_frame.h264");
        std::fs::write(&input, STREAM).unwrap();

        let stats = replay(options(&input, &output, &first)).unwrap();

        assert_eq!(stats.frames_delivered, 4);
        assert_eq!(stats.errors, 0);
        assert_eq!(std::fs::read(&output).unwrap(), STREAM);
        assert_eq!(std::fs::read(&first).unwrap(), &STREAM[..8]);
    }

    #[test]
    fn test_texture_replay_without_handle_drops_everything() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("capture.h264");
        let output = dir.path().join("live.h264");
        let first = dir.path().join("first_frame.h264");
        std::fs::write(&input, STREAM).unwrap();

        let mut opts = options(&input, &output, &first);
        opts.texture = Some(TextureHandle::UNSET);
        let stats = replay(opts).unwrap();

        assert_eq!(stats.frames_delivered, 0);
        assert_eq!(stats.frames_dropped, 4);
        assert!(std::fs::read(&output).unwrap().is_empty());
    }

    #[test]
    fn test_pacing_deadline_for_long_captures() {
        let interval = Duration::from_millis(33);
        assert_eq!(due_at(interval, 3), Duration::from_millis(99));
        // Past u32::MAX units
        assert_eq!(due_at(interval, 5_000_000_000), Duration::from_secs(165_000_000));
    }

    #[test]
    fn test_missing_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.h264");
        let err = replay(options(&missing, &dir.path().join("o"), &dir.path().join("f")))
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
