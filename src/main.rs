use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cadence_voice::voice::capture::CaptureSession;
use cadence_voice::voice::playback::{PlaybackOutcome, PlaybackSession};
use cadence_voice::voice::synth::HttpSynthesizer;
use cadence_voice::{Config, ConversationMode, Daemon};

/// Cadence - real-time voice conversation controller for AI assistants
#[derive(Parser)]
#[command(name = "cadence", version, about)]
struct Cli {
    /// Port for the status/control API
    #[arg(long, env = "CADENCE_API_PORT")]
    port: Option<u16>,

    /// Enter hands-free autonomous mode immediately
    #[arg(long, env = "CADENCE_AUTONOMOUS")]
    autonomous: bool,

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
    /// Test speaker output
    TestSpeaker,
    /// Test speech synthesis output
    TestSynth {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the speech synthesis pipeline.")]
        text: String,
    },
    /// Interactive first-run setup
    Setup,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,cadence_voice=info",
        1 => "info,cadence_voice=debug",
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
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestSynth { text } => test_synth(&text).await,
            Command::Setup => cadence_voice::setup::run_setup(),
        };
    }

    let mut config = Config::load();
    if let Some(port) = cli.port {
        config.api_port = port;
    }

    tracing::info!(
        port = config.api_port,
        autonomous = cli.autonomous,
        "starting cadence voice controller"
    );

    let mut daemon = Daemon::new(config);
    if cli.autonomous {
        daemon = daemon.with_autostart(ConversationMode::Autonomous);
    }

    daemon.run().await?;
    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = CaptureSession::acquire()?;
    let mut chunks = capture.start()?;

    let sample_rate = capture.sample_rate();
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration);
    let mut total_bytes = 0usize;

    loop {
        let chunk = tokio::select! {
            chunk = chunks.recv() => chunk,
            () = tokio::time::sleep_until(deadline) => break,
        };

        let Some(chunk) = chunk else { break };
        total_bytes += chunk.len();

        let energy = chunk_rms(&chunk);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("RMS: {energy:.4} | [{meter}]");
    }

    capture.release();

    println!("\n---");
    println!("Captured {total_bytes} bytes of encoded audio.");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// RMS energy of a linear16 chunk
#[allow(clippy::cast_precision_loss)]
fn chunk_rms(chunk: &[u8]) -> f32 {
    if chunk.len() < 2 {
        return 0.0;
    }

    let mut sum_squares = 0.0f32;
    let mut count = 0usize;
    for pair in chunk.chunks_exact(2) {
        let sample = f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0;
        sum_squares += sample * sample;
        count += 1;
    }
    (sum_squares / count as f32).sqrt()
}

/// Test speaker output with a sine wave rendered as a WAV payload
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = 24000u32;
    let frequency = 440.0f32;
    let duration_secs = 2.0f32;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let num_samples = (sample_rate as f32 * duration_secs) as usize;

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for i in 0..num_samples {
            #[allow(clippy::cast_precision_loss)]
            let t = i as f32 / sample_rate as f32;
            let sample = (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3;
            #[allow(clippy::cast_possible_truncation)]
            writer.write_sample((sample * 32767.0) as i16)?;
        }
        writer.finalize()?;
    }
    let wav = cursor.into_inner();

    println!("Playing {num_samples} samples at {sample_rate} Hz...");
    play_bytes(wav).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Test speech synthesis end to end
async fn test_synth(text: &str) -> anyhow::Result<()> {
    println!("Testing synthesis with text: \"{text}\"\n");

    let config = Config::load();
    let synthesizer = std::sync::Arc::new(HttpSynthesizer::new(
        config.synthesis.url.clone(),
        config.synthesis.api_key.clone(),
        config.synthesis.voice.clone(),
    ));

    println!("Synthesizing and playing...");
    let mut playback = PlaybackSession::new(synthesizer);
    let (done_tx, mut done_rx) = tokio::sync::mpsc::channel(1);
    playback.speak(text, done_tx);

    match done_rx.recv().await {
        Some(PlaybackOutcome::Finished) => {
            println!("\n---");
            println!("If you heard the speech, synthesis is working!");
        }
        _ => anyhow::bail!("synthesis or playback failed - check the endpoint and your speakers"),
    }

    Ok(())
}

/// Play a raw audio payload through the playback session
async fn play_bytes(audio: Vec<u8>) -> anyhow::Result<()> {
    use async_trait::async_trait;
    use cadence_voice::voice::synth::Synthesizer;

    // A canned synthesizer that returns the prepared payload
    struct Canned(std::sync::Mutex<Option<Vec<u8>>>);

    #[async_trait]
    impl Synthesizer for Canned {
        async fn synthesize(&self, _text: &str) -> cadence_voice::Result<Vec<u8>> {
            self.0
                .lock()
                .map_err(|_| cadence_voice::Error::Synthesis("payload taken".to_string()))?
                .take()
                .ok_or_else(|| cadence_voice::Error::Synthesis("payload taken".to_string()))
        }
    }

    let mut playback = PlaybackSession::new(std::sync::Arc::new(Canned(std::sync::Mutex::new(
        Some(audio),
    ))));
    let (done_tx, mut done_rx) = tokio::sync::mpsc::channel(1);
    playback.speak("", done_tx);

    match done_rx.recv().await {
        Some(PlaybackOutcome::Finished) => Ok(()),
        _ => anyhow::bail!("playback failed"),
    }
}
