use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use beacon_live::config::config_file_path;
use beacon_live::voice::{
    AudioInput, MicrophoneCapture, PLAYBACK_SAMPLE_RATE, SpeakerOutput, frames_to_duration,
};
use beacon_live::{
    AudioFrame, AudioPlaybackScheduler, Error, LiveConfig, LiveSession, SessionListener,
    TranscriptEvent,
};

/// Beacon Live - hands-free voice conversations with a live AI endpoint
#[derive(Parser)]
#[command(name = "beacon-live", version, about)]
struct Cli {
    /// Model to converse with
    #[arg(short, long, env = "BEACON_LIVE_MODEL")]
    model: Option<String>,

    /// Prebuilt voice for assistant speech
    #[arg(long, env = "BEACON_LIVE_VOICE")]
    voice: Option<String>,

    /// System instruction sent with the session setup
    #[arg(short, long, env = "BEACON_LIVE_INSTRUCTION")]
    instruction: Option<String>,

    /// Name shown on the assistant's transcribed speech
    #[arg(long, env = "BEACON_LIVE_ASSISTANT_NAME")]
    assistant_name: Option<String>,

    /// Print transcript events as JSON lines
    #[arg(long)]
    json: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output through the playback scheduler
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,beacon_live=info",
        1 => "info,beacon_live=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
        };
    }

    let mut config = LiveConfig::load()?;
    if let Some(model) = cli.model {
        config.model = model;
    }
    if let Some(voice) = cli.voice {
        config.voice = voice;
    }
    if let Some(instruction) = cli.instruction {
        config.system_instruction = instruction;
    }
    if let Some(name) = cli.assistant_name {
        config.assistant_name = name;
    }
    config.validate()?;
    tracing::debug!(?config, "loaded configuration");

    if config.api_key.is_none() {
        let path = config_file_path().map_or_else(
            || "the config file".to_string(),
            |p| p.display().to_string(),
        );
        anyhow::bail!("no API key: set GEMINI_API_KEY or api_keys.gemini in {path}");
    }

    let assistant_name = config.assistant_name.clone();
    let session = LiveSession::from_config(config)?;
    let (failures, mut failed) = mpsc::channel(1);

    session
        .connect(CliListener {
            json: cli.json,
            assistant_name,
            failures,
        })
        .await?;

    println!("Connected. Speak now; press Ctrl+C to hang up.\n");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("hanging up");
        }
        Some(message) = failed.recv() => {
            session.disconnect();
            anyhow::bail!("session ended: {message}");
        }
    }

    session.disconnect();
    println!("\nDisconnected.");
    Ok(())
}

/// Prints transcripts to stdout and reports failures to the main task
struct CliListener {
    json: bool,
    assistant_name: String,
    failures: mpsc::Sender<String>,
}

impl SessionListener for CliListener {
    fn on_transcript(&mut self, event: TranscriptEvent) {
        if self.json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "failed to serialize transcript"),
            }
        } else {
            println!("{}", event.line(&self.assistant_name));
        }
    }

    fn on_error(&mut self, error: &Error) {
        let _ = self.failures.try_send(error.to_string());
    }
}

/// Test microphone input, one meter line per captured block
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = tokio::task::spawn_blocking(MicrophoneCapture::open).await??;
    let (blocks_tx, mut blocks) = mpsc::channel(8);
    capture.attach(beacon_live::voice::DEFAULT_BLOCK_SIZE, blocks_tx)?;

    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("---");

    let started = tokio::time::Instant::now();
    let deadline = started + Duration::from_secs(duration);
    let mut count = 0_u64;

    while let Ok(Some(block)) = tokio::time::timeout_at(deadline, blocks.recv()).await {
        count += 1;
        let energy = calculate_rms(block.samples());
        let peak = block.samples().iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:5.2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            started.elapsed().as_secs_f32(),
            energy,
            peak,
            meter
        );
    }

    capture.release()?;

    println!("\n---");
    println!("Captured {count} blocks.");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave split into streamed-size chunks
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear an unbroken 440Hz tone for 2 seconds\n");

    let speaker = tokio::task::spawn_blocking(SpeakerOutput::open).await??;
    let mut scheduler = AudioPlaybackScheduler::new(Box::new(speaker));

    let frequency = 440.0_f32;
    let num_samples = PLAYBACK_SAMPLE_RATE as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    // 100ms chunks, the size live endpoints typically stream
    let chunk_len = PLAYBACK_SAMPLE_RATE as usize / 10;
    for chunk in samples.chunks(chunk_len) {
        scheduler.schedule(AudioFrame::new(chunk.to_vec(), PLAYBACK_SAMPLE_RATE))?;
    }

    println!(
        "Scheduled {} chunks ({:?}) at {} Hz...",
        scheduler.active_len(),
        frames_to_duration(num_samples as u64, PLAYBACK_SAMPLE_RATE),
        PLAYBACK_SAMPLE_RATE
    );

    if let Some(end) = scheduler.next_start() {
        let remaining = end.saturating_sub(scheduler.current_time());
        tokio::time::sleep(remaining + Duration::from_millis(200)).await;
    }
    scheduler.close()?;

    println!("\n---");
    println!("If you heard the tone without clicks, playback scheduling works!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}
