use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

use parley::voice::{AudioPlayback, CaptureController, CaptureState, Speaker, TextToSpeech};
use parley::{Config, GatewayClient, HistoryStore, TerminalTranscript, TurnOrchestrator};

/// Parley - voice conversation client and gateway
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the transcription & response gateway
    Serve {
        /// Port to listen on (overrides config)
        #[arg(long, env = "PARLEY_PORT")]
        port: Option<u16>,
    },
    /// Interactive voice conversation against a running gateway
    Talk,
    /// Speak a line of text (synthesis check)
    Say {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Clear the persisted conversation history
    Reset,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,parley=info",
        1 => "info,parley=debug",
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

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load();

    match cli.command {
        Command::Serve { port } => serve(config, port).await,
        Command::Talk => talk(config).await,
        Command::Say { text } => say(&config, &text).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::Reset => reset(&config),
    }
}

/// Run the gateway until interrupted
async fn serve(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    let port = port.unwrap_or(config.server.port);
    let state = Arc::new(parley::api::ApiState::from_config(&config)?);

    parley::api::ApiServer::new(state, port).run().await?;
    Ok(())
}

/// Interactive conversation loop
///
/// Enter toggles recording; `reset` clears the conversation; `quit`
/// exits. Playback runs in the background so a new recording can start
/// while the assistant is still speaking.
async fn talk(config: Config) -> anyhow::Result<()> {
    let api_key = config.require_openai_key()?.to_string();

    let store = HistoryStore::new(&config.client.history_path);
    let mut orchestrator = TurnOrchestrator::new(store, TerminalTranscript);
    orchestrator.load_history()?;

    let gateway = GatewayClient::new(&config.client.gateway_url);
    let mut controller = CaptureController::new();

    let tts = TextToSpeech::new(
        api_key,
        config.voice.tts_model.clone(),
        config.voice.tts_voice.clone(),
        config.voice.tts_speed,
    )?;
    let speaker = Arc::new(Speaker::new(tts, AudioPlayback::new()?));

    println!("Press Enter to record, Enter again to stop. `reset` clears, `quit` exits.");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "quit" | "exit" => break,
            "reset" => {
                speaker.cancel();
                orchestrator.reset_conversation()?;
            }
            _ => match controller.state() {
                CaptureState::Idle | CaptureState::Processing => {
                    controller.finish();
                    if let Err(e) = controller.start_capture() {
                        println!("Microphone unavailable: {e}");
                        continue;
                    }
                    println!("Recording... press Enter to stop.");
                }
                CaptureState::Recording => {
                    let clip = controller.stop_capture()?;
                    println!("Processing...");

                    match orchestrator.run_turn(&gateway, &clip).await {
                        Ok(Some(reply)) => {
                            let speaker = Arc::clone(&speaker);
                            tokio::spawn(async move {
                                if let Err(e) = speaker.speak(&reply).await {
                                    tracing::error!(error = %e, "playback failed");
                                }
                            });
                        }
                        Ok(None) => {
                            tracing::debug!("turn result discarded");
                        }
                        Err(e) => {
                            println!("Error: {e}. Press Enter to try again.");
                        }
                    }
                    controller.finish();
                    println!("Ready.");
                }
            },
        }
    }

    Ok(())
}

/// Synthesize and play one line of text
async fn say(config: &Config, text: &str) -> anyhow::Result<()> {
    let api_key = config.require_openai_key()?.to_string();

    let tts = TextToSpeech::new(
        api_key,
        config.voice.tts_model.clone(),
        config.voice.tts_voice.clone(),
        config.voice.tts_speed,
    )?;
    let speaker = Arc::new(Speaker::new(tts, AudioPlayback::new()?));

    println!("Speaking: \"{text}\"");
    speaker.speak(text).await?;
    Ok(())
}

/// Show a microphone level meter for a few seconds
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds. Speak now!");

    let mut controller = CaptureController::new();
    controller.start_capture()?;

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = controller.peek_buffer();
        let rms = root_mean_square(&samples);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (rms * 100.0).min(50.0) as usize;
        println!("[{:2}s] RMS: {rms:.4} | {}", i + 1, "#".repeat(meter_len));
    }

    let clip = controller.stop_capture()?;
    controller.finish();
    println!("Captured {} bytes of WAV audio.", clip.bytes.len());
    println!("If the meter never moved, check your input device.");

    Ok(())
}

/// Clear the persisted conversation history
fn reset(config: &Config) -> anyhow::Result<()> {
    let store = HistoryStore::new(&config.client.history_path);
    store.clear()?;
    println!(
        "Cleared conversation history at {}",
        config.client.history_path.display()
    );
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn root_mean_square(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
