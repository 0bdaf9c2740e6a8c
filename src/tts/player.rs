//! `SynthEngine`: the production [`SpeechEngine`].
//!
//! ```text
//! speak_async ──▶ Fetching (BackgroundSlot on tokio) ──▶ Playing (blocking worker)
//!                                                          │ acquire(Playback)
//!                                                          │ Started ─┐
//!                                                          │ sink.play│ events (mpsc)
//!                                                          │ release  │
//!                                                          └ Done ────┘──▶ poll()
//! ```
//!
//! Every accepted request ends in exactly one [`SpeechDone`], including
//! canceled ones. A session reset is the only exception: it bumps the
//! session number and every event from the old session is dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::audio::{AudioArbiter, Role};
use crate::slot::{BackgroundSlot, SlotPoll};
use crate::tts::engine::{SpeechDone, SpeechEngine, TtsError};
use crate::tts::sink::AudioSink;
use crate::tts::synth::Synthesizer;

enum PlayerEvent {
    Started {
        session: u32,
        id: u32,
    },
    Done {
        session: u32,
        id: u32,
        result: Result<(), TtsError>,
    },
}

enum JobStage {
    Fetching(BackgroundSlot<Result<Vec<u8>, TtsError>>),
    Playing,
}

struct Job {
    id: u32,
    cancel: Arc<AtomicBool>,
    stage: JobStage,
}

fn reason_code(result: &Result<(), TtsError>) -> &'static str {
    match result {
        Ok(()) => "ok",
        Err(TtsError::ConfigMissing(_)) => "config",
        Err(TtsError::Timeout) => "timeout",
        Err(TtsError::Request(_)) => "net",
        Err(TtsError::Status(_)) => "http",
        Err(TtsError::BusBusy) => "bus_busy",
        Err(TtsError::Canceled) => "canceled",
        Err(TtsError::Device(_)) => "device",
    }
}

pub struct SynthEngine {
    handle: Handle,
    synthesizer: Arc<dyn Synthesizer>,
    sink: Arc<dyn AudioSink>,
    arbiter: AudioArbiter,
    bus_timeout: Duration,
    fetch_timeout: Duration,
    events_tx: mpsc::Sender<PlayerEvent>,
    events_rx: mpsc::Receiver<PlayerEvent>,
    session: u32,
    job: Option<Job>,
    started: VecDeque<u32>,
    done: VecDeque<SpeechDone>,
}

impl SynthEngine {
    pub fn new(
        handle: Handle,
        synthesizer: Arc<dyn Synthesizer>,
        sink: Arc<dyn AudioSink>,
        arbiter: AudioArbiter,
        bus_timeout: Duration,
        fetch_timeout: Duration,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            handle,
            synthesizer,
            sink,
            arbiter,
            bus_timeout,
            fetch_timeout,
            events_tx,
            events_rx,
            session: 0,
            job: None,
            started: VecDeque::new(),
            done: VecDeque::new(),
        }
    }

    fn finish(&mut self, id: u32, result: Result<(), TtsError>) {
        let reason = reason_code(&result);
        if let Err(e) = &result {
            log::info!("tts: done id={id} ok=0 reason={reason} ({e})");
        } else {
            log::debug!("tts: done id={id} ok=1");
        }
        self.done.push_back(SpeechDone {
            request_id: id,
            ok: result.is_ok(),
            reason: reason.to_string(),
        });
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                PlayerEvent::Started { session, id } if session == self.session => {
                    self.started.push_back(id);
                }
                PlayerEvent::Done {
                    session,
                    id,
                    result,
                } if session == self.session => {
                    if self.job.as_ref().is_some_and(|j| j.id == id) {
                        self.job = None;
                    }
                    self.finish(id, result);
                }
                _ => log::debug!("tts: dropped event from an old session"),
            }
        }
    }

    fn start_playback(&self, id: u32, audio: Vec<u8>, cancel: Arc<AtomicBool>) {
        let tx = self.events_tx.clone();
        let arbiter = self.arbiter.clone();
        let sink = Arc::clone(&self.sink);
        let bus_timeout = self.bus_timeout;
        let session = self.session;

        self.handle.spawn_blocking(move || {
            let result = play_on_bus(&arbiter, sink.as_ref(), &audio, &cancel, bus_timeout, || {
                let _ = tx.send(PlayerEvent::Started { session, id });
            });
            let _ = tx.send(PlayerEvent::Done {
                session,
                id,
                result,
            });
        });
    }
}

/// Hold the bus as Playback for the duration of one utterance.
fn play_on_bus(
    arbiter: &AudioArbiter,
    sink: &dyn AudioSink,
    audio: &[u8],
    cancel: &AtomicBool,
    bus_timeout: Duration,
    on_started: impl FnOnce(),
) -> Result<(), TtsError> {
    if cancel.load(Ordering::SeqCst) {
        return Err(TtsError::Canceled);
    }
    let Some(guard) = arbiter.acquire(Role::Playback, "tts.play", bus_timeout) else {
        return Err(TtsError::BusBusy);
    };
    on_started();
    let result = sink.play(audio, cancel);
    guard.release("tts.play");
    result
}

impl SpeechEngine for SynthEngine {
    fn speak_async(&mut self, text: &str, request_id: u32) -> bool {
        if self.job.is_some() {
            log::debug!("tts: refuse id={request_id}, busy");
            return false;
        }
        if text.trim().is_empty() {
            return false;
        }

        let synthesizer = Arc::clone(&self.synthesizer);
        let text = text.to_string();
        let timeout = self.fetch_timeout;
        let slot = BackgroundSlot::spawn(&self.handle, request_id, async move {
            synthesizer.synthesize(&text, timeout).await
        });

        self.job = Some(Job {
            id: request_id,
            cancel: Arc::new(AtomicBool::new(false)),
            stage: JobStage::Fetching(slot),
        });
        log::debug!("tts: accepted id={request_id}");
        true
    }

    fn poll(&mut self) {
        self.drain_events();

        let Some(mut job) = self.job.take() else {
            return;
        };
        let JobStage::Fetching(slot) = &mut job.stage else {
            self.job = Some(job);
            return;
        };
        match slot.try_take() {
            SlotPoll::Pending => self.job = Some(job),
            SlotPoll::Ready(Ok(audio)) => {
                self.start_playback(job.id, audio, Arc::clone(&job.cancel));
                job.stage = JobStage::Playing;
                self.job = Some(job);
            }
            SlotPoll::Ready(Err(e)) => self.finish(job.id, Err(e)),
            SlotPoll::Lost => self.finish(job.id, Err(TtsError::Request("fetch worker lost".into()))),
        }
    }

    fn cancel(&mut self, request_id: u32, reason: &str) {
        let Some(job) = self.job.as_ref() else {
            return;
        };
        if job.id != request_id {
            log::debug!("tts: cancel id={request_id} ignored, current={}", job.id);
            return;
        }
        log::info!("tts: cancel id={request_id} reason={reason}");
        job.cancel.store(true, Ordering::SeqCst);
        if matches!(job.stage, JobStage::Fetching(_)) {
            // Dropping the slot aborts the fetch.
            self.job = None;
            self.finish(request_id, Err(TtsError::Canceled));
        }
        // A playing job reports Canceled from its worker.
    }

    fn consume_done(&mut self) -> Option<SpeechDone> {
        self.done.pop_front()
    }

    fn take_playback_started(&mut self) -> Option<u32> {
        self.started.pop_front()
    }

    fn is_busy(&self) -> bool {
        self.job.is_some()
    }

    fn request_session_reset(&mut self) {
        if let Some(job) = self.job.take() {
            job.cancel.store(true, Ordering::SeqCst);
        }
        self.session = self.session.wrapping_add(1);
        self.started.clear();
        self.done.clear();
        self.synthesizer.reset();
        log::warn!("tts: session reset session={}", self.session);
    }
}
