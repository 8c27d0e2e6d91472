//! Solo transcription endpoint: `GET /ws/audio?lang=&target_lang=&tts=`.
//!
//! One browser streams WebM/Opus; the server answers with partial and final
//! transcripts (plus translation when a target language is set) and archives
//! the session audio at close. Synthesized speech, when requested, is
//! accumulated and written to one WAV per session rather than streamed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::task::AbortHandle;
use tracing::{info, warn};

use duolog_pipeline::engines::is_supported_language;
use duolog_pipeline::{wav, SessionEvent, SessionPipeline};

use crate::state::AppState;
use crate::ws::dispatch::{
    spawn_solo_job, JobKind, JobSlot, SoloSession, TtsCollector,
};
use crate::ws::messages::ServerMessage;
use crate::ws::{send_json, WsSender};

#[derive(Debug, Deserialize)]
pub struct SoloParams {
    pub lang: Option<String>,
    pub target_lang: Option<String>,
    #[serde(default)]
    pub tts: Option<bool>,
}

/// Keeps only the language codes the relay speaks; anything else falls back
/// to auto-detect (for `lang`) or disables translation (for `target_lang`).
fn wire_language(code: Option<String>) -> Option<String> {
    code.filter(|c| is_supported_language(c))
}

pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<SoloParams>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params))
}

async fn handle_socket(socket: WebSocket, state: AppState, params: SoloParams) {
    let language_hint = wire_language(params.lang);
    let target_language = wire_language(params.target_lang);
    let tts_enabled = params.tts.unwrap_or(false);

    let session_id = chrono::Local::now()
        .format("%Y%m%d_%H%M%S_%6f")
        .to_string();

    let (sink, mut receiver) = socket.split();
    let sender: WsSender = Arc::new(tokio::sync::Mutex::new(sink));
    let socket_open = Arc::new(AtomicBool::new(true));

    let vad = match (state.vad_factory)() {
        Ok(v) => v,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "VAD unavailable");
            send_json(
                &sender,
                &socket_open,
                &ServerMessage::Error {
                    message: "speech detection unavailable".to_string(),
                },
            )
            .await;
            return;
        }
    };

    let audio = &state.settings.audio;
    let mut pipeline = SessionPipeline::new(
        session_id.clone(),
        vad,
        state.settings.vad.threshold,
        audio.sample_rate,
        audio.chunk_size,
        audio.silence_threshold_ms,
    );
    let min_partial_samples = (audio.sample_rate as f64 * audio.min_partial_secs) as usize;

    let tts_sink = (tts_enabled && target_language.is_some())
        .then(|| Arc::new(Mutex::new(TtsCollector::new())));

    let session = SoloSession {
        engines: state.engines.clone(),
        session_id: session_id.clone(),
        language_hint: language_hint.clone(),
        target_language: target_language.clone(),
        sender: sender.clone(),
        socket_open: socket_open.clone(),
        utterance_id: Arc::new(AtomicU64::new(0)),
        tts_sink: tts_sink.clone(),
    };

    let mut partial_slot = JobSlot::new();
    let mut final_jobs: Vec<AbortHandle> = Vec::new();

    info!(
        session_id = %session_id,
        language = language_hint.as_deref().unwrap_or("auto"),
        target = target_language.as_deref().unwrap_or("none"),
        tts = tts_enabled,
        "solo session connected"
    );

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Binary(data) => {
                let events = pipeline.process_chunk(&data);
                for event in events {
                    match event {
                        SessionEvent::SpeechStart => {
                            info!(session_id = %session_id, "speech started");
                            session.utterance_id.fetch_add(1, Ordering::Relaxed);
                            partial_slot.cancel();
                        }
                        SessionEvent::SpeechEnd { pcm, duration_secs } => {
                            partial_slot.cancel();
                            if pcm.is_empty() {
                                continue;
                            }
                            let utterance_id = session.utterance_id.load(Ordering::Relaxed);
                            if let Some(handle) = spawn_solo_job(
                                session.clone(),
                                JobKind::Final,
                                utterance_id,
                                pcm,
                                Some(duration_secs),
                                None,
                            ) {
                                final_jobs.push(handle);
                            }
                        }
                    }
                }

                if pipeline.is_speaking()
                    && pipeline.utterance_samples() >= min_partial_samples
                    && partial_slot.is_idle()
                {
                    let utterance_id = session.utterance_id.load(Ordering::Relaxed);
                    spawn_solo_job(
                        session.clone(),
                        JobKind::Partial,
                        utterance_id,
                        pipeline.utterance_snapshot(),
                        None,
                        Some(&mut partial_slot),
                    );
                }
            }
            Message::Close(_) => break,
            // Solo mode has no control frames
            _ => {}
        }
    }

    info!(session_id = %session_id, "solo session disconnected");
    socket_open.store(false, Ordering::Relaxed);
    partial_slot.cancel();
    for handle in final_jobs {
        handle.abort();
    }

    if pipeline.has_audio() {
        match pipeline.save_recording(&state.recordings_dir) {
            Ok(Some(path)) => info!(session_id = %session_id, path = %path.display(), "recording saved"),
            Ok(None) => {}
            Err(e) => warn!(session_id = %session_id, error = %e, "failed to save recording"),
        }
    }

    if let (Some(sink), Some(target)) = (tts_sink, target_language) {
        let collector = sink.lock();
        if let Some(rate) = collector.sample_rate {
            if !collector.samples.is_empty() {
                let path = state
                    .tts_dir()
                    .join(format!("{}_{}.wav", session_id, target));
                match wav::write_mono_i16(&path, &collector.samples, rate) {
                    Ok(()) => info!(session_id = %session_id, path = %path.display(), "TTS audio saved"),
                    Err(e) => warn!(session_id = %session_id, error = %e, "failed to save TTS audio"),
                }
            }
        }
    }
}
