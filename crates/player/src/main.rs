//! Headless player: arrange audio files on a timeline and play them through
//! the default output device.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use seq_core::{CpalBackend, Session, SessionConfig, SessionError, format_time};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "seq")]
#[command(about = "Play audio files arranged on a shared timeline", long_about = None)]
struct Cli {
    /// Audio files, one track each
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Start position of each file in seconds, in the order given
    #[arg(short, long = "at", value_delimiter = ',')]
    positions: Vec<f64>,

    /// Beats per minute, used to snap positions
    #[arg(short, long)]
    bpm: Option<f64>,

    /// Stop at the end instead of looping
    #[arg(long)]
    no_loop: bool,

    /// Snap start positions to the beat grid
    #[arg(long)]
    snap: bool,

    /// Stop after this many seconds
    #[arg(short, long)]
    seconds: Option<f64>,

    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SessionConfig::from_path(path)?,
        None => SessionConfig::load(),
    };
    if let Some(bpm) = cli.bpm {
        config.bpm = bpm;
    }
    if cli.no_loop {
        config.loop_enabled = false;
    }

    let backend = CpalBackend::open().context("failed to open audio output")?;
    let mut session = Session::new(backend, &config);

    for (i, path) in cli.files.iter().enumerate() {
        let id = session.add_track();
        // a file that fails to decode still gets its (empty) track
        if let Err(err) = session.load_file(id, path) {
            warn!(path = %path.display(), "{err}");
            continue;
        }

        let position = cli.positions.get(i).copied().unwrap_or(0.0);
        let position = if cli.snap {
            session.time().snap(position)
        } else {
            position
        };
        session.set_position(id, position)?;
    }

    for track in session.tracks() {
        match track.end() {
            Some(end) => info!(
                "{} [{:?}] {} - {}",
                track.name,
                track.color,
                format_time(track.position()),
                format_time(end)
            ),
            None => info!("{} [{:?}] empty", track.name, track.color),
        }
    }

    if !session.can_play() {
        anyhow::bail!("nothing to play");
    }

    match session.play() {
        Ok(()) => {}
        Err(SessionError::NeedsUserGesture(err)) => {
            warn!(%err, "retrying device resume");
            session.resume_device()?;
        }
        Err(err) => return Err(err.into()),
    }
    info!(
        bpm = session.bpm(),
        loop_end = %format_time(session.loop_end()),
        looping = session.loop_enabled(),
        "playing"
    );

    let interval = Duration::from_millis(config.tick_interval_ms.max(1));
    let started = Instant::now();
    let mut last_second = None;
    while session.is_playing() {
        let cursor = session.tick();

        let second = cursor as u64;
        if last_second != Some(second) {
            last_second = Some(second);
            let levels: Vec<String> = session
                .tracks()
                .iter()
                .map(|t| format!("{:.2}", session.level(t.id())))
                .collect();
            info!("{} levels [{}]", format_time(cursor), levels.join(" "));
        }

        if cli
            .seconds
            .is_some_and(|limit| started.elapsed().as_secs_f64() >= limit)
        {
            session.stop();
            break;
        }
        thread::sleep(interval);
    }

    info!("done");
    Ok(())
}
