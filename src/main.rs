use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

use voice_coach::db::{self, SessionStore, SqliteStore};
use voice_coach::gateway::{ModelGateway, OpenRouterBackend};
use voice_coach::session::{SessionDeps, SessionHandle, SessionView};
use voice_coach::voice::{
    AudioSink, DiscardSink, ForwardHandle, ForwardedSource, MicrophoneSource, RecognitionSource,
    SpeakerSink, SpeechSynthesizer, SpeechToText, TextToSpeech,
};
use voice_coach::{Catalog, Config, Role};

/// Coach - voice-driven AI coaching sessions
#[derive(Parser)]
#[command(name = "coach", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Do not synthesize or play speech
    #[arg(long, env = "COACH_NO_AUDIO", global = true)]
    no_audio: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List coaches and coaching modes
    Personas,
    /// Create a coaching room
    New {
        /// What to practise
        #[arg(short, long)]
        topic: String,
        /// Coaching mode (e.g. "Question Bank")
        #[arg(short, long)]
        mode: String,
        /// Coach persona (e.g. "Lucy")
        #[arg(short, long)]
        persona: String,
    },
    /// List rooms, most recent first
    Rooms,
    /// Print a room's transcript
    Show {
        /// Room ID
        room: String,
    },
    /// Talk to the coach through the microphone
    Talk {
        /// Room ID
        room: String,
        /// Mark the room completed on exit
        #[arg(long)]
        end: bool,
    },
    /// Type to the coach; each line is a final transcript fragment
    Chat {
        /// Room ID
        room: String,
        /// Mark the room completed on exit
        #[arg(long)]
        end: bool,
    },
    /// Speak a line in a persona's voice
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the coach's voice.")]
        text: String,
        /// Persona whose voice to use
        #[arg(short, long, default_value = "Rohan")]
        persona: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn,voice_coach=info",
        1 => "info,voice_coach=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Command::Personas => {
            list_personas();
            Ok(())
        }
        Command::New {
            topic,
            mode,
            persona,
        } => new_room(&config, &topic, &mode, &persona).await,
        Command::Rooms => list_rooms(&config).await,
        Command::Show { room } => show_room(&config, &room).await,
        Command::Talk { room, end } => {
            let stt = SpeechToText::from_config(&config.voice, &config.api_keys)?;
            let source = MicrophoneSource::new(Arc::new(stt));
            let handle = start_session(&config, cli.no_audio, &room, Box::new(source)).await?;
            println!("Listening. Press Ctrl-C to stop.\n");

            tokio::signal::ctrl_c().await?;
            finish(&handle, end).await
        }
        Command::Chat { room, end } => {
            let (source, forward) = ForwardedSource::new();
            let handle = start_session(&config, cli.no_audio, &room, Box::new(source)).await?;
            println!("Type to the coach. Empty line or Ctrl-D to stop.\n");

            tokio::select! {
                result = read_lines(&forward) => result?,
                _ = tokio::signal::ctrl_c() => {}
            }
            finish(&handle, end).await
        }
        Command::TestTts { text, persona } => test_tts(&config, cli.no_audio, &text, &persona).await,
    }
}

fn list_personas() {
    let catalog = Catalog::builtin();

    println!("Coaches:");
    for persona in catalog.personas() {
        println!("  {:<8} {}", persona.name, persona.bio);
    }

    println!("\nModes:");
    for mode in catalog.modes() {
        println!("  {}", mode.name);
    }
}

fn open_store(config: &Config) -> anyhow::Result<SqliteStore> {
    let pool = db::init(config.database_path())
        .with_context(|| format!("opening {}", config.database_path().display()))?;
    Ok(SqliteStore::new(pool))
}

async fn new_room(config: &Config, topic: &str, mode: &str, persona: &str) -> anyhow::Result<()> {
    let catalog = Catalog::builtin();
    let mode = &catalog.mode(mode)?.name;
    let persona = &catalog.persona(persona)?.name;

    let room = open_store(config)?.create(topic, mode, persona).await?;
    println!("{}", room.id);
    Ok(())
}

async fn list_rooms(config: &Config) -> anyhow::Result<()> {
    let rooms = open_store(config)?.list().await?;
    if rooms.is_empty() {
        println!("No rooms yet. Create one with `coach new`.");
        return Ok(());
    }

    for room in rooms {
        let status = if room.completed { "done" } else { "open" };
        println!(
            "{}  {:<4}  {}  {} / {} / {}",
            room.id,
            status,
            room.updated_at.format("%Y-%m-%d %H:%M"),
            room.topic,
            room.mode,
            room.persona
        );
    }
    Ok(())
}

async fn show_room(config: &Config, room_id: &str) -> anyhow::Result<()> {
    let room = open_store(config)?.get(room_id).await?;

    println!("{} ({}), coached by {}", room.topic, room.mode, room.persona);
    if room.completed {
        println!("Completed");
    }
    println!("---");

    for turn in &room.conversation {
        let speaker = match turn.role {
            Role::User => "You",
            Role::Assistant => room.persona.as_str(),
            Role::System => "*",
        };
        println!("{speaker}: {}", turn.content);
    }
    Ok(())
}

/// Synthesizer used with `--no-audio`
struct NoSpeech;

#[async_trait]
impl SpeechSynthesizer for NoSpeech {
    async fn synthesize(&self, _text: &str, _voice_id: &str) -> voice_coach::Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

fn build_deps(config: &Config, no_audio: bool) -> anyhow::Result<SessionDeps> {
    let store = Arc::new(open_store(config)?);
    let catalog = Arc::new(Catalog::builtin());

    let backend = OpenRouterBackend::from_config(&config.llm, &config.api_keys)?;
    let gateway = ModelGateway::new(
        Arc::new(backend),
        &config.llm,
        config.pipeline.max_history_turns,
        Arc::clone(&catalog),
    );

    let (synthesizer, sink): (Arc<dyn SpeechSynthesizer>, Arc<dyn AudioSink>) = if no_audio {
        (Arc::new(NoSpeech), Arc::new(DiscardSink))
    } else {
        (
            Arc::new(TextToSpeech::from_config(&config.voice, &config.api_keys)?),
            Arc::new(SpeakerSink),
        )
    };

    Ok(SessionDeps {
        store,
        gateway: Arc::new(gateway),
        synthesizer,
        sink,
        catalog,
        pipeline: config.pipeline.clone(),
    })
}

async fn start_session(
    config: &Config,
    no_audio: bool,
    room_id: &str,
    source: Box<dyn RecognitionSource>,
) -> anyhow::Result<SessionHandle> {
    let deps = build_deps(config, no_audio)?;
    let handle = SessionHandle::spawn(deps, room_id, source).await?;

    let view = handle.view();
    println!("{} ({}), coached by {}\n", view.topic, view.mode, view.persona);
    tokio::spawn(print_transcript(handle.subscribe()));

    handle.connect().await.map_err(|e| anyhow::anyhow!(e.user_message()))?;
    Ok(handle)
}

async fn read_lines(forward: &ForwardHandle) -> anyhow::Result<()> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if !forward.final_text(&format!(" {line}")) {
            println!("(not listening)");
        }
    }
    Ok(())
}

async fn finish(handle: &SessionHandle, end: bool) -> anyhow::Result<()> {
    if end {
        handle.end_session().await?;
        println!("\nSession completed.");
    } else {
        handle.disconnect().await?;
    }
    handle.shutdown().await?;
    Ok(())
}

/// Print settled turns, state changes and banners as the session evolves
async fn print_transcript(mut rx: tokio::sync::watch::Receiver<SessionView>) {
    let mut printed = 0;
    let mut last_state = None;
    let mut last_notice = None;
    let mut last_error = None;

    loop {
        {
            let view = rx.borrow_and_update();

            for turn in view.conversation.iter().skip(printed) {
                if turn.pending {
                    break;
                }
                let speaker = match turn.role {
                    Role::User => "You",
                    Role::Assistant => view.persona.as_str(),
                    Role::System => "*",
                };
                println!("{speaker}: {}", turn.content);
                printed += 1;
            }

            if last_state != Some(view.state) {
                tracing::info!(state = %view.state, "session state");
                last_state = Some(view.state);
            }
            if view.notice != last_notice {
                if let Some(notice) = &view.notice {
                    println!("[!] {notice}");
                }
                last_notice.clone_from(&view.notice);
            }
            if view.last_error != last_error {
                if let Some(error) = &view.last_error {
                    println!("[error] {error}");
                }
                last_error.clone_from(&view.last_error);
            }
        }

        if rx.changed().await.is_err() {
            break;
        }
    }
}

async fn test_tts(config: &Config, no_audio: bool, text: &str, persona: &str) -> anyhow::Result<()> {
    let catalog = Catalog::builtin();
    let persona = catalog.persona(persona)?;
    let voice_id = persona
        .voice_id
        .as_deref()
        .with_context(|| format!("{} has no voice", persona.name))?;

    println!("Synthesizing as {}: \"{text}\"", persona.name);
    let tts = TextToSpeech::from_config(&config.voice, &config.api_keys)?;
    let audio = tts.synthesize(text, voice_id).await?;
    println!("Got {} bytes of audio", audio.len());

    if no_audio {
        return Ok(());
    }

    println!("Playing...");
    SpeakerSink.play(audio).await?;
    println!("If you heard the speech, TTS is working!");
    Ok(())
}
