use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use crossbeam_channel::Receiver;
use trackline_core::{
    AppConfig, CaptureDevice, Error, EventFilter, FileCapture, PlaybackEngine, Player,
    SimulatedEngine, TraceFilter, TrackEvent,
};
use tracing_subscriber::EnvFilter;

fn main() -> trackline_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Play {
            url,
            duration_ms,
            seek,
            pause_ms,
        } => run_play(&config, url, duration_ms, seek, pause_ms),
        Commands::Record { output, seconds } => run_record(&config, &output, seconds),
        Commands::Check { names } => {
            run_check(&names);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> trackline_core::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(path),
        None => Ok(AppConfig::default()),
    }
}

fn spawn_player(config: &AppConfig, duration_ms: u64) -> trackline_core::Result<Player> {
    let recorders = || -> trackline_core::Result<Box<dyn CaptureDevice>> {
        Ok(Box::new(FileCapture::new()))
    };
    Player::spawn(
        config,
        move || Box::new(SimulatedEngine::new(duration_ms)) as Box<dyn PlaybackEngine>,
        Box::new(recorders),
    )
}

fn run_play(
    config: &AppConfig,
    url: String,
    duration_ms: u64,
    seek: Option<i32>,
    pause_ms: Option<u64>,
) -> trackline_core::Result<()> {
    tracing::info!(%url, duration_ms, "starting playback");

    let player = spawn_player(config, duration_ms)?;
    player.attach(Box::new(TraceFilter::new()))?;
    let (events, rx) = EventFilter::new();
    player.attach(Box::new(events))?;

    player.start(url)?;
    let mut seek = seek;
    let mut pause = pause_ms.map(Duration::from_millis);

    loop {
        match next_event(&rx)? {
            TrackEvent::Progress { .. } => {
                if let Some(percent) = seek.take() {
                    player.seek(percent)?;
                }
                if let Some(hold) = pause.take() {
                    player.pause()?;
                    thread::sleep(hold);
                    player.unpause()?;
                }
            }
            TrackEvent::Closed { stopped, error, .. } => {
                let fault = player.snapshot()?.fault;
                player.shutdown()?;
                if error {
                    return Err(fault.map_or_else(
                        || Error::msg("playback ended with an engine error"),
                        Error::EngineFault,
                    ));
                }
                tracing::info!(stopped, "playback finished");
                return Ok(());
            }
            TrackEvent::Opened { .. } => {}
        }
    }
}

fn next_event(rx: &Receiver<TrackEvent>) -> trackline_core::Result<TrackEvent> {
    rx.recv().map_err(|_| Error::Disconnected)
}

fn run_record(config: &AppConfig, output: &Path, seconds: u64) -> trackline_core::Result<()> {
    tracing::info!(output = %output.display(), seconds, "recording");

    let player = spawn_player(config, 0)?;
    let session = player.record(output)?;
    let started = Instant::now();
    thread::sleep(Duration::from_secs(seconds));
    player.record_stop()?;
    player.shutdown()?;

    tracing::info!(
        name = %session.name,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "recording saved"
    );
    Ok(())
}

fn run_check(names: &[String]) {
    for name in names {
        let verdict = if trackline_core::is_supported(name) {
            "supported"
        } else {
            "unsupported"
        };
        println!("{verdict}\t{name}");
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Single-track playback and recording orchestrator", long_about = None)]
struct Cli {
    /// Optional JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a source through the simulated engine until it ends.
    Play {
        /// Local path or http(s) URL of the source.
        url: String,
        /// Duration reported by the simulated engine.
        #[arg(long, default_value_t = 5_000)]
        duration_ms: u64,
        /// Seek to this percentage once playback has started.
        #[arg(long, allow_negative_numbers = true)]
        seek: Option<i32>,
        /// Pause for this many milliseconds once playback has started.
        #[arg(long)]
        pause_ms: Option<u64>,
    },
    /// Record the microphone into a file.
    Record {
        /// Output file for the recording.
        output: PathBuf,
        /// How long to record.
        #[arg(short, long, default_value_t = 3)]
        seconds: u64,
    },
    /// Report whether each name is a playable source.
    Check {
        #[arg(required = true)]
        names: Vec<String>,
    },
}
