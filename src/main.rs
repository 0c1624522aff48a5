use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sentinel_gateway::capture::{AudioPump, NullFrameSource};
use sentinel_gateway::channel::{PerceptionChannel, ToolAck};
use sentinel_gateway::db::{self, ViolationRepo};
use sentinel_gateway::media::{self, MediaChunk, MediaKind, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use sentinel_gateway::notify::EmailNotifier;
use sentinel_gateway::playback::CpalSink;
use sentinel_gateway::upload::CloudinaryUploader;
use sentinel_gateway::{Config, SessionController, SessionState};

/// Sentinel - live traffic violation monitoring gateway
#[derive(Parser)]
#[command(name = "sentinel", version, about)]
struct Cli {
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
        /// Write the recording to this WAV file
        #[arg(short, long, default_value = "mic-test.wav")]
        output: String,
    },
    /// Test speaker output
    TestSpeaker,
    /// List recorded violations
    Records {
        /// Only show records for this plate
        #[arg(short, long)]
        plate: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,sentinel_gateway=info",
        1 => "info,sentinel_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration, output } => test_mic(duration, &output).await,
            Command::TestSpeaker => test_speaker().await,
            Command::Records { plate } => cmd_records(plate.as_deref()),
        };
    }

    let config = Config::load();
    tracing::info!(model = %config.model, "starting sentinel gateway");

    std::fs::create_dir_all(&config.data_dir)?;
    let pool = db::init(config.data_dir.join("violations.db"))?;
    let store = ViolationRepo::new(pool, config.dedup_window);

    let sink = Arc::new(CpalSink::new()?);
    let uploader = Arc::new(CloudinaryUploader::new(config.upload.clone()));
    let notifier = Arc::new(EmailNotifier::new(config.notify.clone()));

    // No camera backend is wired in yet; the channel still carries audio
    // and the registry, fines, and store paths are fully live.
    let mut session = SessionController::new(
        config,
        Arc::new(NullFrameSource),
        sink,
        store,
        uploader,
        notifier,
    );

    session.connect().await?;

    let mut current = session.ui().watch_current();
    let printer = tokio::spawn(async move {
        while current.changed().await.is_ok() {
            if let Some(record) = current.borrow_and_update().clone() {
                println!(
                    "VIOLATION  {}  {}  Rs.{}  [{}]",
                    record.plate,
                    record.crime_types.join(", "),
                    record.total_fine,
                    record.owner_name.as_deref().unwrap_or("owner unknown"),
                );
            }
        }
    });

    tracing::info!("sentinel gateway ready, press Ctrl-C to stop");

    // Run until interrupted, the remote hangs up, or the session fails.
    // A failure still needs disconnect() here: the event loop cannot
    // release the microphone itself.
    let mut state = session.watch_state();
    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break Ok(());
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                match *state.borrow_and_update() {
                    SessionState::Error => {
                        let message = session
                            .error_message()
                            .unwrap_or_else(|| "unknown failure".to_string());
                        break Err(anyhow::anyhow!("session failed: {message}"));
                    }
                    SessionState::Disconnected => {
                        tracing::info!("remote closed the session");
                        break Ok(());
                    }
                    SessionState::Connecting | SessionState::Connected => {}
                }
            }
        }
    };

    session.disconnect().await;
    printer.abort();

    result
}

/// Accumulates outbound audio chunks instead of sending them anywhere
#[derive(Default)]
struct MicRecorder {
    pcm: Mutex<Vec<u8>>,
}

#[async_trait::async_trait]
impl PerceptionChannel for MicRecorder {
    async fn send_media(&self, chunk: MediaChunk) -> sentinel_gateway::Result<()> {
        if chunk.kind == MediaKind::Audio {
            self.pcm.lock().unwrap().extend_from_slice(&chunk.payload);
        }
        Ok(())
    }

    async fn send_ack(&self, _ack: ToolAck) -> sentinel_gateway::Result<()> {
        Ok(())
    }

    async fn close(&self) -> sentinel_gateway::Result<()> {
        Ok(())
    }
}

/// Record the microphone for a few seconds and write a WAV file
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64, output: &str) -> anyhow::Result<()> {
    println!("Recording microphone for {duration} seconds at {INPUT_SAMPLE_RATE} Hz...");
    println!("Speak into your microphone!\n");

    let recorder = Arc::new(MicRecorder::default());
    let cancel = tokio_util::sync::CancellationToken::new();

    let mut pump = AudioPump::new()?;
    pump.start(recorder.clone(), cancel.clone())?;

    tokio::time::sleep(Duration::from_secs(duration)).await;

    cancel.cancel();
    pump.stop();
    // Let the forwarding task drain
    tokio::time::sleep(Duration::from_millis(100)).await;

    let pcm = recorder.pcm.lock().unwrap().clone();
    let samples = media::decode_pcm(&pcm);

    let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
    println!("Captured {} samples, peak level {peak:.4}", samples.len());
    if peak < 0.001 {
        println!("Peak is near zero; check your microphone and input levels");
    }

    let wav = media::samples_to_wav(&samples, INPUT_SAMPLE_RATE)?;
    std::fs::write(output, wav)?;
    println!("Wrote {output}");

    Ok(())
}

/// Play a short tone through the output device
async fn test_speaker() -> anyhow::Result<()> {
    use sentinel_gateway::playback::AudioSink;

    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sink = CpalSink::new()?;

    let frequency = 440.0_f32;
    let num_samples = (OUTPUT_SAMPLE_RATE * 2) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / OUTPUT_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    sink.play(samples).await?;

    println!("If you heard the tone, your speakers are working");
    Ok(())
}

/// Print stored violation records
fn cmd_records(plate: Option<&str>) -> anyhow::Result<()> {
    let config = Config::load();
    let pool = db::init(config.data_dir.join("violations.db"))?;
    let repo = ViolationRepo::new(pool, config.dedup_window);

    let records = repo.list_all()?;
    let records: Vec<_> = match plate {
        Some(p) => records.into_iter().filter(|r| r.plate == p).collect(),
        None => records,
    };

    if records.is_empty() {
        println!("No violations recorded.");
        return Ok(());
    }

    for r in &records {
        println!(
            "{}  {}  {}  Rs.{}  {}",
            r.occurred_at.format("%Y-%m-%d %H:%M:%S"),
            r.plate,
            r.crime_types.join(","),
            r.total_fine,
            r.owner_name.as_deref().unwrap_or("-"),
        );
    }
    println!("\n{} record(s)", records.len());

    Ok(())
}
