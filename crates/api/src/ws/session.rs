//! Conversation endpoint: `GET /ws/session`.
//!
//! Create: `?name=<str>&my_lang=<x>&partner_lang=<y>` — opens a room and
//! takes role `a`. Join: `?room_id=<code>&name=<str>` — takes role `b`.
//! Each connection runs its own audio pipeline; the room's turn controller
//! gates whose utterances reach the dispatcher.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use duolog_pipeline::engines::is_supported_language;
use duolog_pipeline::{SessionEvent, SessionPipeline};

use crate::room::{Participant, Room, RoomError};
use crate::state::AppState;
use crate::ws::dispatch::{spawn_room_job, JobKind, JobSlot};
use crate::ws::messages::{ClientMessage, ServerMessage};
use crate::ws::{send_json, WsSender};

#[derive(Debug, Deserialize)]
pub struct ConversationParams {
    pub room_id: Option<String>,
    pub name: Option<String>,
    pub my_lang: Option<String>,
    pub partner_lang: Option<String>,
}

/// Invalid codes coerce to the defaults instead of failing the join.
fn coerce_language(code: Option<String>, default: &str) -> String {
    code.filter(|c| is_supported_language(c))
        .unwrap_or_else(|| default.to_string())
}

pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<ConversationParams>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params))
}

/// Sends an `error` frame and closes the socket server-side. Used for
/// admission failures before the participant exists.
async fn reject(sender: &WsSender, message: &str) {
    let frame = ServerMessage::Error {
        message: message.to_string(),
    };
    let mut guard = sender.lock().await;
    if let Ok(text) = serde_json::to_string(&frame) {
        let _ = guard.send(Message::Text(text.into())).await;
    }
    let _ = guard.send(Message::Close(None)).await;
}

async fn handle_socket(socket: WebSocket, state: AppState, params: ConversationParams) {
    let name = params
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "guest".to_string());
    let session_id = chrono::Local::now()
        .format("%Y%m%d_%H%M%S_%6f")
        .to_string();

    let (sink, mut receiver) = socket.split();
    let sender: WsSender = Arc::new(tokio::sync::Mutex::new(sink));

    // Admission: join an existing room or create a fresh one.
    let (room, participant) = if let Some(code) = &params.room_id {
        let room = match state.rooms.get(code) {
            Ok(room) => room,
            Err(RoomError::NotFound) => {
                info!(room_id = %code, "join rejected: room not found");
                reject(&sender, "room not found").await;
                return;
            }
            Err(e) => {
                reject(&sender, &e.to_string()).await;
                return;
            }
        };
        let participant =
            match room.admit(name.clone(), session_id.clone(), sender.clone()) {
                Ok(p) => p,
                Err(e) => {
                    info!(room_id = %code, error = %e, "join rejected");
                    reject(&sender, &e.to_string()).await;
                    return;
                }
            };

        let partner = room.partner_of(participant.role);
        send_json(
            &sender,
            &participant.socket_open,
            &ServerMessage::RoomJoined {
                room_id: room.code.clone(),
                user_name: participant.name.clone(),
                language: participant.language.clone(),
                partner_name: partner.as_ref().map(|p| p.name.clone()),
                partner_language: partner.as_ref().map(|p| p.language.clone()),
            },
        )
        .await;

        if let Some(partner) = partner {
            send_json(
                &partner.sender,
                &partner.socket_open,
                &ServerMessage::PartnerJoined {
                    name: participant.name.clone(),
                    language: participant.language.clone(),
                },
            )
            .await;
        }

        (room, participant)
    } else {
        let my_lang = coerce_language(params.my_lang, "en");
        let partner_lang = coerce_language(params.partner_lang, "es");
        let room = state.rooms.create(my_lang, partner_lang);
        let participant = match room.admit(name.clone(), session_id.clone(), sender.clone()) {
            Ok(p) => p,
            Err(e) => {
                reject(&sender, &e.to_string()).await;
                return;
            }
        };

        send_json(
            &sender,
            &participant.socket_open,
            &ServerMessage::RoomCreated {
                room_id: room.code.clone(),
                user_name: participant.name.clone(),
                language: room.lang_a.clone(),
                partner_language: room.lang_b.clone(),
            },
        )
        .await;

        (room, participant)
    };

    let role = participant.role;
    info!(
        room_id = %room.code,
        role = role.as_str(),
        name = %participant.name,
        language = %participant.language,
        "participant connected"
    );

    let vad = match (state.vad_factory)() {
        Ok(v) => v,
        Err(e) => {
            warn!(room_id = %room.code, error = %e, "VAD unavailable");
            reject(&sender, "speech detection unavailable").await;
            let partner = room.partner_of(role);
            state.rooms.leave(&room, role);
            if let Some(partner) = partner {
                send_json(
                    &partner.sender,
                    &partner.socket_open,
                    &ServerMessage::PartnerLeft {
                        name: participant.name.clone(),
                    },
                )
                .await;
            }
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

    let mut partial_slot = JobSlot::new();
    let mut final_jobs: Vec<AbortHandle> = Vec::new();

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Binary(data) => {
                let events = pipeline.process_chunk(&data);
                for event in events {
                    handle_session_event(
                        &state,
                        &room,
                        &participant,
                        event,
                        &mut partial_slot,
                        &mut final_jobs,
                    );
                }

                let holds_floor = room.turn.lock().holds_floor(role);
                if holds_floor
                    && pipeline.is_speaking()
                    && pipeline.utterance_samples() >= min_partial_samples
                    && partial_slot.is_idle()
                {
                    let utterance_id = participant.utterance_id.load(Ordering::Relaxed);
                    spawn_room_job(
                        state.engines.clone(),
                        room.clone(),
                        participant.clone(),
                        JobKind::Partial,
                        utterance_id,
                        pipeline.utterance_snapshot(),
                        None,
                        Some(&mut partial_slot),
                    );
                }
            }
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Interrupt) => {
                    info!(room_id = %room.code, role = role.as_str(), "barge-in");
                    room.turn.lock().on_interrupt(role);
                    participant.tts_cancelled.store(true, Ordering::Relaxed);
                }
                Err(e) => debug!(room_id = %room.code, error = %e, "unparseable control frame"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    info!(room_id = %room.code, role = role.as_str(), "participant disconnected");
    participant.socket_open.store(false, Ordering::Relaxed);
    partial_slot.cancel();
    for handle in final_jobs {
        handle.abort();
    }

    if pipeline.has_audio() {
        match pipeline.save_recording(&state.recordings_dir) {
            Ok(Some(path)) => debug!(room_id = %room.code, path = %path.display(), "recording saved"),
            Ok(None) => {}
            Err(e) => warn!(room_id = %room.code, error = %e, "failed to save recording"),
        }
    }

    let partner = room.partner_of(role);
    state.rooms.leave(&room, role);
    if let Some(partner) = partner {
        send_json(
            &partner.sender,
            &partner.socket_open,
            &ServerMessage::PartnerLeft {
                name: participant.name.clone(),
            },
        )
        .await;
    }
}

/// Applies the turn-controller gate to one utterance event and dispatches
/// the jobs it allows.
fn handle_session_event(
    state: &AppState,
    room: &Arc<Room>,
    participant: &Arc<Participant>,
    event: SessionEvent,
    partial_slot: &mut JobSlot,
    final_jobs: &mut Vec<AbortHandle>,
) {
    let role = participant.role;
    match event {
        SessionEvent::SpeechStart => {
            let granted = room.turn.lock().try_speech_start(role);
            if !granted {
                debug!(
                    room_id = %room.code,
                    role = role.as_str(),
                    "speech_start dropped (locked or floor busy)"
                );
                return;
            }
            // A fresh granted turn supersedes any barge-in suppression.
            participant.tts_cancelled.store(false, Ordering::Relaxed);
            participant.utterance_id.fetch_add(1, Ordering::Relaxed);
            partial_slot.cancel();
            debug!(room_id = %room.code, role = role.as_str(), "floor granted");
        }
        SessionEvent::SpeechEnd { pcm, duration_secs } => {
            let accepted = room.turn.lock().on_speech_end(role);
            if !accepted {
                debug!(
                    room_id = %room.code,
                    role = role.as_str(),
                    "speech_end dropped (stale speaker)"
                );
                return;
            }
            partial_slot.cancel();
            // The barge-in suppression has done its job once the barged-in
            // utterance completes; replies to it should be heard.
            participant.tts_cancelled.store(false, Ordering::Relaxed);
            if pcm.is_empty() {
                return;
            }
            let utterance_id = participant.utterance_id.load(Ordering::Relaxed);
            if let Some(handle) = spawn_room_job(
                state.engines.clone(),
                room.clone(),
                participant.clone(),
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
