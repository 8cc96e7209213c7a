use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use murmur::audio::{AudioSource, BufferSource, MicrophonePermission, StaticPermission};
use murmur::integration::{AppConfig, ListenOutcome, Orchestrator, OrchestratorBuilder};
use murmur::speech::RecognitionStrategy;
use murmur::state::{ConversationEvent, SharedConversationState};
use murmur::MurmurError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Talk to a chat-completion service with your voice
#[derive(Parser, Debug)]
#[command(name = "murmur", version, about)]
struct Args {
    /// Config file (defaults to <config dir>/murmur/config.toml)
    #[arg(short, long, env = "MURMUR_CONFIG")]
    config: Option<PathBuf>,

    /// Recognition strategy, overriding the config file
    #[arg(long, value_enum)]
    strategy: Option<RecognitionStrategy>,

    /// Replay a WAV file instead of using the microphone
    #[arg(long, conflicts_with = "text_only")]
    input_wav: Option<PathBuf>,

    /// Never open the microphone; typed lines are sent as messages
    #[arg(long)]
    text_only: bool,

    /// Do not speak replies
    #[arg(long)]
    mute: bool,
}

const HELP: &str = "Enter: start/stop listening | /clear | /history | /quit | anything else is sent as text";

fn audio_input(args: &Args) -> Result<(Arc<dyn AudioSource>, Arc<dyn MicrophonePermission>)> {
    if let Some(path) = &args.input_wav {
        let source = BufferSource::from_wav(path)
            .with_context(|| format!("Failed to load {}", path.display()))?
            .with_realtime(true);
        info!("Replaying {} ({:?})", path.display(), source.duration());
        return Ok((Arc::new(source), Arc::new(StaticPermission::granted())));
    }

    if args.text_only {
        return Ok((
            Arc::new(BufferSource::new(Vec::new(), 16000)),
            Arc::new(StaticPermission::denied()),
        ));
    }

    microphone()
}

#[cfg(feature = "audio-io")]
fn microphone() -> Result<(Arc<dyn AudioSource>, Arc<dyn MicrophonePermission>)> {
    Ok((
        Arc::new(murmur::audio::CpalSource),
        Arc::new(murmur::audio::DevicePermission),
    ))
}

#[cfg(not(feature = "audio-io"))]
fn microphone() -> Result<(Arc<dyn AudioSource>, Arc<dyn MicrophonePermission>)> {
    anyhow::bail!("Built without audio-io; use --input-wav or --text-only")
}

fn print_failure(err: &MurmurError) {
    let marker = if err.is_best_effort() { '~' } else { '!' };
    println!("{} {}", marker, err.user_message());
}

/// Print events until the orchestrator is disposed.
///
/// The queue is lossy, so the disposed flag is checked too.
fn print_events(events: Receiver<ConversationEvent>, state: SharedConversationState) {
    loop {
        let event = match events.recv_timeout(Duration::from_millis(200)) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) if state.is_disposed() => break,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        match event {
            ConversationEvent::StateChanged(session) => println!("[{}]", session),
            ConversationEvent::MessageAppended(message) => {
                let who = if message.is_user { "you" } else { "assistant" };
                println!("{}> {}", who, message.text);
            }
            ConversationEvent::HistoryCleared => println!("(history cleared)"),
            ConversationEvent::Error(err) | ConversationEvent::BestEffortFailure(err) => {
                print_failure(&err)
            }
            ConversationEvent::Disposed => break,
        }
    }
}

async fn run(orchestrator: &Orchestrator) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => match orchestrator.toggle_listening().await {
                Ok(ListenOutcome::Ignored) => println!("(busy, try again when idle)"),
                Ok(_) => {}
                // Already reported through the event stream
                Err(_) => {}
            },
            "/quit" | "/exit" => break,
            "/clear" => orchestrator.clear_history().await?,
            "/history" => {
                for message in orchestrator.history() {
                    let who = if message.is_user { "you" } else { "assistant" };
                    println!(
                        "{} {}> {}",
                        message.timestamp.format("%H:%M:%S"),
                        who,
                        message.text
                    );
                }
            }
            "/help" => println!("{}", HELP),
            text => {
                if !orchestrator.submit_text(text).await? {
                    println!("(busy, try again when idle)");
                }
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so the conversation on stdout stays readable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(strategy) = args.strategy {
        config.recognition.strategy = strategy;
    }
    if args.mute {
        config.synthesis.enabled = false;
    }

    info!(
        "Starting murmur ({} recognition, model {})",
        config.recognition.strategy, config.completion.model
    );

    let (source, permission) = audio_input(&args)?;
    let orchestrator = OrchestratorBuilder::from_config(&config, source, permission)?
        .build()
        .await?;

    let printer = std::thread::spawn({
        let events = orchestrator.events();
        let state = orchestrator.shared_state();
        move || print_events(events, state)
    });

    println!("{}", HELP);
    let result = run(&orchestrator).await;

    orchestrator.dispose().await;
    let _ = printer.join();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_printer_exits_when_disposed_event_is_lost() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let state = SharedConversationState::new();
        let printer = std::thread::spawn({
            let state = state.clone();
            move || print_events(rx, state)
        });

        tx.send(ConversationEvent::HistoryCleared).unwrap();
        state.write().disposed = true;

        let started = Instant::now();
        while !printer.is_finished() {
            assert!(started.elapsed() < Duration::from_secs(5), "printer still running");
            std::thread::sleep(Duration::from_millis(20));
        }
        printer.join().unwrap();
        // The sender is still alive, so only the disposed flag ended the loop
        drop(tx);
    }
}
