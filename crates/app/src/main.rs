use std::{path::PathBuf, time::Duration};

use candlewish_core::{AppConfig, BreathListener, MelodySequencer, MemorySink, PlaybackClock, Show};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

mod device;
mod simulate;
mod terminal;

use device::{MicrophoneSource, SpeakerSink};
use terminal::TerminalRenderer;

fn main() -> candlewish_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Live => run_live(&config),
        Commands::Simulate { quiet_frames } => run_simulate(&config, quiet_frames),
        Commands::Score => print_score(&config),
    }
}

fn load_config(path: Option<&PathBuf>) -> candlewish_core::Result<AppConfig> {
    match path {
        Some(path) => {
            tracing::info!(?path, "loading configuration");
            AppConfig::from_path(path)
        }
        None => Ok(AppConfig::live_defaults()),
    }
}

fn run_live(config: &AppConfig) -> candlewish_core::Result<()> {
    tracing::info!(
        threshold = config.detector.threshold_rms,
        slides = config.presentation.slide_count,
        "starting live mode"
    );

    let mut show = Show::new(config, SpeakerSink::new(), TerminalRenderer::new())?;
    let (listener, events) = BreathListener::spawn(
        MicrophoneSource::new(config.detector.frame_size),
        config.detector,
        Duration::from_millis(config.audio.frame_timeout_ms),
    )?;

    show.run(&events, &PlaybackClock::start())?;
    listener.join()
}

fn run_simulate(config: &AppConfig, quiet_frames: usize) -> candlewish_core::Result<()> {
    tracing::info!(quiet_frames, "running simulation");
    let transcript = simulate::run(config, quiet_frames)?;
    println!("{}", serde_json::to_string_pretty(&transcript)?);
    Ok(())
}

fn print_score(config: &AppConfig) -> candlewish_core::Result<()> {
    let sequencer = MelodySequencer::new(config.sequencer.clone(), MemorySink::default());
    let notes: Vec<_> = config
        .sequencer
        .score
        .notes()
        .iter()
        .enumerate()
        .map(|(index, note)| {
            json!({
                "index": index,
                "pitch_hz": note.pitch_hz,
                "beats": note.beats,
                "duration_sec": sequencer.note_duration_sec(note),
            })
        })
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "bpm": config.sequencer.bpm, "notes": notes }))?
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Blow out the candle to start the birthday show", long_about = None)]
struct Cli {
    /// JSON configuration file; built-in defaults are used when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Listen on the default microphone and play the show live.
    Live,
    /// Run the show on a virtual clock with a synthetic breath and print a
    /// JSON transcript.
    Simulate {
        /// Near-silent frames to feed before the breath starts.
        #[arg(long, default_value_t = 20)]
        quiet_frames: usize,
    },
    /// Print the melody with each note's computed duration.
    Score,
}
