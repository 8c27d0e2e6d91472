//! Per-utterance inference jobs: ASR → MT → TTS with cancellation.
//!
//! Each utterance event spawns one job. Jobs never run on the receive loop;
//! the loop keeps draining audio while inference is in flight. Partials are
//! additionally guarded by the session's utterance id so a result that
//! outlives its utterance is discarded instead of delivered.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use duolog_pipeline::engines::{AsrEngine, AsrRequest, MtEngine, TtsEngine};
use duolog_pipeline::wav;

use crate::room::{Participant, Room};
use crate::ws::messages::{ServerMessage, TranscriptBody};
use crate::ws::{send_binary, send_json, WsSender};

/// Shared inference handles. Absent engines degrade the pipeline stage they
/// power instead of failing the session: no MT means untranslated
/// transcripts, no TTS means silent partners.
#[derive(Clone)]
pub struct Engines {
    pub asr: Option<Arc<dyn AsrEngine>>,
    pub mt: Option<Arc<dyn MtEngine>>,
    pub tts: Option<Arc<dyn TtsEngine>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Partial,
    Final,
}

/// Tracks the session's single in-flight partial job.
///
/// The flag travels into the job and is cleared on completion by a drop
/// guard, so an aborted job releases the slot too.
pub struct JobSlot {
    inflight: Arc<AtomicBool>,
    handle: Option<AbortHandle>,
}

impl JobSlot {
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        !self.inflight.load(Ordering::Relaxed)
    }

    /// Aborts the outstanding job, if any.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.inflight.store(false, Ordering::Relaxed);
    }

    fn arm(&mut self) -> InflightGuard {
        self.inflight.store(true, Ordering::Relaxed);
        InflightGuard(self.inflight.clone())
    }

    fn track(&mut self, handle: AbortHandle) {
        self.handle = Some(handle);
    }
}

impl Default for JobSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the in-flight flag when the job future completes or is aborted.
struct InflightGuard(Arc<AtomicBool>);

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// The detected language, the hint, or `"unknown"` — in that order.
///
/// `"unknown"` is the wire value that downstream stages treat as
/// "do not translate".
pub(crate) fn resolve_source_language(detected: Option<&str>, hint: Option<&str>) -> String {
    detected
        .filter(|l| !l.is_empty())
        .or(hint)
        .unwrap_or("unknown")
        .to_string()
}

pub(crate) fn should_translate(source: &str, target: &str) -> bool {
    source != target && source != "unknown"
}

// ─── Solo mode ───────────────────────────────────────────────────────────

/// Synthesized speech accumulated over a solo session, flushed to one WAV at
/// close.
pub struct TtsCollector {
    pub samples: Vec<i16>,
    pub sample_rate: Option<u32>,
}

impl TtsCollector {
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
            sample_rate: None,
        }
    }
}

impl Default for TtsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Context shared by every job of one solo session.
#[derive(Clone)]
pub struct SoloSession {
    pub engines: Engines,
    pub session_id: String,
    pub language_hint: Option<String>,
    pub target_language: Option<String>,
    pub sender: WsSender,
    pub socket_open: Arc<AtomicBool>,
    pub utterance_id: Arc<AtomicU64>,
    /// Present when the client asked for TTS (`tts=true`).
    pub tts_sink: Option<Arc<Mutex<TtsCollector>>>,
}

/// Spawns an ASR(+MT+TTS) job for a solo utterance. For partials the job is
/// registered in `slot`; finals run unslotted and may overlap.
pub fn spawn_solo_job(
    session: SoloSession,
    kind: JobKind,
    utterance_id: u64,
    pcm: Vec<f32>,
    duration: Option<f64>,
    slot: Option<&mut JobSlot>,
) -> Option<AbortHandle> {
    session.engines.asr.as_ref()?;

    match slot {
        Some(s) => {
            let guard = s.arm();
            let handle = tokio::spawn(async move {
                let _guard = guard;
                run_solo_job(session, kind, utterance_id, pcm, duration).await;
            })
            .abort_handle();
            s.track(handle.clone());
            Some(handle)
        }
        None => Some(
            tokio::spawn(async move {
                run_solo_job(session, kind, utterance_id, pcm, duration).await;
            })
            .abort_handle(),
        ),
    }
}

async fn run_solo_job(
    session: SoloSession,
    kind: JobKind,
    utterance_id: u64,
    pcm: Vec<f32>,
    duration: Option<f64>,
) {
    let Some(asr) = session.engines.asr.clone() else {
        return;
    };

    let result = match asr
        .transcribe(AsrRequest {
            pcm_16k_mono: pcm,
            language_hint: session.language_hint.clone(),
        })
        .await
    {
        Ok(r) => r,
        Err(e) => {
            warn!(session_id = %session.session_id, error = %e, "ASR failed; job dropped");
            return;
        }
    };

    if result.text.is_empty() {
        return;
    }
    if kind == JobKind::Partial && session.utterance_id.load(Ordering::Relaxed) != utterance_id {
        debug!(session_id = %session.session_id, utterance_id, "stale partial discarded");
        return;
    }

    let source = resolve_source_language(
        result.language.as_deref(),
        session.language_hint.as_deref(),
    );

    let mut body = TranscriptBody {
        session_id: Some(session.session_id.clone()),
        speaker: None,
        speaker_name: None,
        text: result.text.clone(),
        language: source.clone(),
        duration,
        translation: None,
        target_language: None,
        has_tts: None,
    };

    if let (Some(target), Some(mt)) = (&session.target_language, &session.engines.mt) {
        if should_translate(&source, target) {
            match mt.translate(&result.text, &source, target).await {
                Ok(translated) if !translated.is_empty() => {
                    body.translation = Some(translated);
                    body.target_language = Some(target.clone());
                }
                Ok(_) => {}
                Err(e) => warn!(session_id = %session.session_id, error = %e, "MT failed"),
            }
        }
    }

    if kind == JobKind::Final {
        if let (Some(sink), Some(tts), Some(translated), Some(target)) = (
            &session.tts_sink,
            &session.engines.tts,
            &body.translation,
            &body.target_language,
        ) {
            match tts.synthesize(translated, target).await {
                Ok(bytes) if !bytes.is_empty() => match wav::wav_pcm_mono_i16(&bytes) {
                    Ok((pcm, rate)) => {
                        let mut collector = sink.lock();
                        collector.sample_rate.get_or_insert(rate);
                        collector.samples.extend_from_slice(&pcm);
                        body.has_tts = Some(true);
                    }
                    Err(e) => warn!(session_id = %session.session_id, error = %e, "bad TTS WAV"),
                },
                Ok(_) => {}
                Err(e) => warn!(session_id = %session.session_id, error = %e, "TTS failed"),
            }
        }
        info!(
            session_id = %session.session_id,
            language = %source,
            duration = ?duration,
            translated = body.translation.is_some(),
            "transcript: {:?}", body.text
        );
    }

    let message = match kind {
        JobKind::Final => ServerMessage::Transcript(body),
        JobKind::Partial => ServerMessage::TranscriptPartial(body),
    };
    send_json(&session.sender, &session.socket_open, &message).await;
}

// ─── Conversation mode ───────────────────────────────────────────────────

/// Spawns an ASR→MT→TTS job for a room utterance originating from
/// `origin`. Partial jobs register in `slot`.
pub fn spawn_room_job(
    engines: Engines,
    room: Arc<Room>,
    origin: Arc<Participant>,
    kind: JobKind,
    utterance_id: u64,
    pcm: Vec<f32>,
    duration: Option<f64>,
    slot: Option<&mut JobSlot>,
) -> Option<AbortHandle> {
    engines.asr.as_ref()?;

    match slot {
        Some(s) => {
            let guard = s.arm();
            let handle = tokio::spawn(async move {
                let _guard = guard;
                run_room_job(engines, room, origin, kind, utterance_id, pcm, duration).await;
            })
            .abort_handle();
            s.track(handle.clone());
            Some(handle)
        }
        None => Some(
            tokio::spawn(async move {
                run_room_job(engines, room, origin, kind, utterance_id, pcm, duration).await;
            })
            .abort_handle(),
        ),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_room_job(
    engines: Engines,
    room: Arc<Room>,
    origin: Arc<Participant>,
    kind: JobKind,
    utterance_id: u64,
    pcm: Vec<f32>,
    duration: Option<f64>,
) {
    let Some(asr) = engines.asr.clone() else {
        return;
    };

    let result = match asr
        .transcribe(AsrRequest {
            pcm_16k_mono: pcm,
            language_hint: Some(origin.language.clone()),
        })
        .await
    {
        Ok(r) => r,
        Err(e) => {
            warn!(
                room_id = %room.code,
                role = origin.role.as_str(),
                error = %e,
                "ASR failed; job dropped"
            );
            return;
        }
    };

    if result.text.is_empty() {
        return;
    }
    if kind == JobKind::Partial && origin.utterance_id.load(Ordering::Relaxed) != utterance_id {
        debug!(
            room_id = %room.code,
            role = origin.role.as_str(),
            utterance_id,
            "stale partial discarded"
        );
        return;
    }

    let source = resolve_source_language(result.language.as_deref(), Some(&origin.language));

    let mut self_body = TranscriptBody {
        session_id: None,
        speaker: Some("self"),
        speaker_name: None,
        text: result.text.clone(),
        language: source.clone(),
        duration,
        translation: None,
        target_language: None,
        has_tts: None,
    };

    let partner = room
        .partner_of(origin.role)
        .filter(|p| p.socket_open.load(Ordering::Relaxed));

    let mut partner_body = None;
    let mut tts_wav: Option<Vec<u8>> = None;

    if let Some(partner) = &partner {
        let target = partner.language.clone();
        let mut body = TranscriptBody {
            session_id: None,
            speaker: Some("partner"),
            speaker_name: Some(origin.name.clone()),
            text: result.text.clone(),
            language: source.clone(),
            duration,
            translation: None,
            target_language: None,
            has_tts: None,
        };

        if should_translate(&source, &target) {
            if let Some(mt) = &engines.mt {
                match mt.translate(&result.text, &source, &target).await {
                    Ok(translated) if !translated.is_empty() => {
                        self_body.translation = Some(translated.clone());
                        self_body.target_language = Some(target.clone());
                        body.translation = Some(translated);
                        body.target_language = Some(target.clone());
                    }
                    Ok(_) => {}
                    Err(e) => warn!(room_id = %room.code, error = %e, "MT failed"),
                }
            }
        }
        // Matching languages relay the source text untranslated.

        if kind == JobKind::Final
            && body.translation.is_some()
            && !partner.tts_cancelled.load(Ordering::Relaxed)
        {
            if let (Some(tts), Some(translated)) = (&engines.tts, &body.translation) {
                match tts.synthesize(translated, &target).await {
                    Ok(bytes) if !bytes.is_empty() => {
                        body.has_tts = Some(true);
                        tts_wav = Some(bytes);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(room_id = %room.code, error = %e, "TTS failed"),
                }
            }
        }

        partner_body = Some(body);
    }

    if kind == JobKind::Final {
        info!(
            room_id = %room.code,
            role = origin.role.as_str(),
            language = %source,
            duration = ?duration,
            translated = self_body.translation.is_some(),
            "transcript: {:?}", self_body.text
        );
    }

    let wrap = |body: TranscriptBody| match kind {
        JobKind::Final => ServerMessage::Transcript(body),
        JobKind::Partial => ServerMessage::TranscriptPartial(body),
    };

    send_json(&origin.sender, &origin.socket_open, &wrap(self_body)).await;

    let (Some(partner), Some(mut body)) = (partner, partner_body) else {
        return;
    };

    // The partner may have barged in while we were synthesizing.
    if tts_wav.is_some() && partner.tts_cancelled.load(Ordering::Relaxed) {
        debug!(room_id = %room.code, "TTS cancelled mid-flight; dropping audio");
        tts_wav = None;
        body.has_tts = None;
    }

    send_json(&partner.sender, &partner.socket_open, &wrap(body)).await;

    let Some(wav_bytes) = tts_wav else {
        return;
    };

    let duration_ms = match wav::wav_duration_ms(&wav_bytes) {
        Ok(ms) => ms,
        Err(e) => {
            warn!(room_id = %room.code, error = %e, "unreadable TTS WAV header");
            0
        }
    };

    send_binary(&partner.sender, &partner.socket_open, wav_bytes).await;

    // Mute the partner while their speaker plays our TTS, so the playback
    // doesn't come back through their mic as speech.
    let locked_ms = room.turn.lock().lock_user(partner.role, duration_ms);
    if let Some(total_ms) = locked_ms {
        send_json(
            &partner.sender,
            &partner.socket_open,
            &ServerMessage::MicLocked {
                duration_ms: total_ms,
                reason: "tts_echo",
            },
        )
        .await;
        debug!(
            room_id = %room.code,
            role = partner.role.as_str(),
            duration_ms = total_ms,
            "echo lockout applied"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_language_prefers_detection_over_hint() {
        assert_eq!(resolve_source_language(Some("es"), Some("en")), "es");
        assert_eq!(resolve_source_language(None, Some("en")), "en");
        assert_eq!(resolve_source_language(Some(""), Some("pt")), "pt");
        assert_eq!(resolve_source_language(None, None), "unknown");
    }

    #[test]
    fn translation_skips_same_and_unknown() {
        assert!(should_translate("en", "es"));
        assert!(!should_translate("es", "es"));
        assert!(!should_translate("unknown", "es"));
    }

    #[tokio::test]
    async fn job_slot_tracks_and_cancels() {
        let mut slot = JobSlot::new();
        assert!(slot.is_idle());

        let guard = slot.arm();
        assert!(!slot.is_idle());

        let handle = tokio::spawn(async move {
            let _guard = guard;
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        })
        .abort_handle();
        slot.track(handle);

        slot.cancel();
        // Give the runtime a beat to run the abort and drop the guard
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(slot.is_idle());
    }

    #[tokio::test]
    async fn job_slot_clears_on_natural_completion() {
        let mut slot = JobSlot::new();
        let guard = slot.arm();
        let handle = tokio::spawn(async move {
            let _guard = guard;
        });
        handle.await.unwrap();
        assert!(slot.is_idle());
    }
}
