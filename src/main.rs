//! Application entry point: console driver for the tap-to-talk core.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Create the [`tokio`] runtime (multi-thread, 2 workers) that runs the
//!    service calls and the playback worker.
//! 4. Build the audio arbiter, recorder, service clients and playback engine.
//! 5. Spawn a stdin reader thread (`tap`, `say <text>`, `quit`).
//! 6. Run the cooperative tick loop on the main thread at 20 Hz.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tap_talk::{
    app::{RuntimeParts, TalkRuntime},
    audio::{AudioArbiter, CaptureDevice, Recorder},
    config::{AppConfig, TtsConfig},
    llm::ApiGenerator,
    speech::Priority,
    stt::ApiTranscriber,
    tts::{ApiSynthesizer, AudioSink, SpeechEngine, SynthEngine},
};

const TICK: Duration = Duration::from_millis(50);

enum Command {
    Tap,
    Say(String),
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    match line.split_once(' ') {
        Some(("say", text)) => Some(Command::Say(text.trim().to_string())),
        _ => match line {
            "tap" | "" => Some(Command::Tap),
            "quit" | "exit" => Some(Command::Quit),
            _ => None,
        },
    }
}

fn spawn_stdin_reader(tx: mpsc::Sender<Command>) -> Result<()> {
    std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.read_line(&mut line) {
                    Ok(0) | Err(_) => {
                        let _ = tx.send(Command::Quit);
                        return;
                    }
                    Ok(_) => match parse_command(&line) {
                        Some(cmd) => {
                            if tx.send(cmd).is_err() {
                                return;
                            }
                        }
                        None => eprintln!("commands: tap | say <text> | quit"),
                    },
                }
            }
        })
        .context("failed to spawn stdin thread")?;
    Ok(())
}

fn build_capture(config: &AppConfig, arbiter: &AudioArbiter) -> Box<dyn CaptureDevice> {
    #[cfg(feature = "device")]
    let source = tap_talk::audio::MicSource::new(config.audio.sample_rate);
    #[cfg(not(feature = "device"))]
    let source = tap_talk::audio::NullSource;

    Box::new(Recorder::new(
        arbiter.clone(),
        source,
        config.audio.sample_rate,
        config.audio.max_record_secs,
        config.audio.bus_timeout(),
    ))
}

fn build_sink(tts: &TtsConfig) -> Arc<dyn AudioSink> {
    #[cfg(feature = "device")]
    let sink = tap_talk::tts::SpeakerSink::new(tts.pcm_sample_rate);
    #[cfg(not(feature = "device"))]
    let sink = tap_talk::tts::SimulatedSink::new(tts.playback_bytes_per_sec);
    Arc::new(sink)
}

fn main() -> Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("tap-talk starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    // 3. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    // 4. Components
    let arbiter = AudioArbiter::new();
    let engine: Option<Box<dyn SpeechEngine>> = if config.tts.enabled {
        Some(Box::new(SynthEngine::new(
            rt.handle().clone(),
            Arc::new(ApiSynthesizer::from_config(&config.tts)),
            build_sink(&config.tts),
            arbiter.clone(),
            config.audio.bus_timeout(),
            Duration::from_millis(config.tts.fetch_timeout_ms),
        )))
    } else {
        None
    };

    let mut app = TalkRuntime::build(
        &config,
        RuntimeParts {
            capture: build_capture(&config, &arbiter),
            transcriber: Arc::new(ApiTranscriber::from_config(&config.stt)),
            generator: Arc::new(ApiGenerator::from_config(
                &config.llm,
                config.talk.max_answer_bytes,
            )),
            engine,
            arbiter,
            handle: rt.handle().clone(),
        },
    );

    // 5. Console input
    let (tx, rx) = mpsc::channel();
    spawn_stdin_reader(tx)?;
    println!("commands: tap | say <text> | quit");

    // 6. Tick loop
    let mut last_overlay = app.overlay();
    loop {
        let now = Instant::now();
        while let Ok(cmd) = rx.try_recv() {
            match cmd {
                Command::Tap => {
                    app.on_tap(now);
                }
                Command::Say(text) => {
                    if !app.say(&text, Priority::Normal) {
                        println!("(nothing to say with)");
                    }
                }
                Command::Quit => {
                    log::info!("tap-talk shutting down");
                    return Ok(());
                }
            }
        }

        app.tick(now);

        if let Some(caption) = app.consume_bubble_update() {
            if !caption.is_empty() {
                println!("> {caption}");
            }
        }
        let overlay = app.overlay();
        if overlay != last_overlay {
            if overlay.active {
                println!("[{}] {} {}", overlay.hint, overlay.line1, overlay.line2);
            }
            last_overlay = overlay;
        }

        std::thread::sleep(TICK);
    }
}
