//! End-to-end utterance flow through the session pipeline with a scripted
//! VAD, exercising the same sequence a WebSocket handler drives: window
//! accumulation, boundary events, and partial-transcript eligibility.

use std::collections::VecDeque;

use duolog_pipeline::{SessionEvent, SessionPipeline, VadModel};

const CHUNK: usize = 512;
const SAMPLE_RATE: u32 = 16_000;
/// One second of utterance audio before a partial may fire.
const MIN_PARTIAL_SAMPLES: usize = SAMPLE_RATE as usize;

struct ScriptedVad {
    probs: VecDeque<f32>,
}

impl VadModel for ScriptedVad {
    fn reset(&mut self) {}

    fn process_window(&mut self, _window: &[f32], _sample_rate: u32) -> anyhow::Result<f32> {
        Ok(self.probs.pop_front().unwrap_or(0.0))
    }
}

fn pipeline_with_script(probs: Vec<f32>) -> SessionPipeline {
    SessionPipeline::new(
        "itest".to_string(),
        Box::new(ScriptedVad {
            probs: probs.into(),
        }),
        0.5,
        SAMPLE_RATE,
        CHUNK,
        500,
    )
}

fn speech(n: usize) -> Vec<f32> {
    vec![0.9; n]
}

fn silence(n: usize) -> Vec<f32> {
    vec![0.1; n]
}

#[test]
fn long_utterance_becomes_partial_eligible_then_seals() {
    // 40 speech windows (~1.28s) then enough silence to seal
    let mut script = speech(40);
    script.extend(silence(16));
    let mut pipeline = pipeline_with_script(script);

    let mut partial_eligible_at = None;
    let mut sealed = None;

    // Feed one window of PCM at a time, as the receive loop would after
    // each decoded chunk.
    for i in 0..56 {
        let events = pipeline.process_pcm(&vec![0.0f32; CHUNK]);
        for event in events {
            if let SessionEvent::SpeechEnd { pcm, duration_secs } = event {
                sealed = Some((pcm.len(), duration_secs));
            }
        }
        if partial_eligible_at.is_none()
            && pipeline.is_speaking()
            && pipeline.utterance_samples() >= MIN_PARTIAL_SAMPLES
        {
            partial_eligible_at = Some(i);
        }
    }

    // 1s of audio = 32 windows (31 full windows is 15872 samples, just shy)
    assert_eq!(partial_eligible_at, Some(31));

    let (pcm_len, duration) = sealed.expect("utterance should have sealed");
    assert_eq!(pcm_len, (40 + 15) * CHUNK);
    // 40 windows * 512 / 16000 = 1.28s
    assert_eq!(duration, 1.28);
}

#[test]
fn partial_snapshot_is_stable_while_stream_continues() {
    let mut pipeline = pipeline_with_script(speech(40));
    pipeline.process_pcm(&vec![0.0f32; 35 * CHUNK]);
    assert!(pipeline.is_speaking());

    let snapshot = pipeline.utterance_snapshot();
    assert_eq!(snapshot.len(), 35 * CHUNK);

    pipeline.process_pcm(&vec![0.0f32; 5 * CHUNK]);
    assert_eq!(snapshot.len(), 35 * CHUNK);
    assert_eq!(pipeline.utterance_samples(), 40 * CHUNK);
}

#[test]
fn short_blip_never_reaches_partial_eligibility() {
    // 4 speech windows is ~0.13s of audio
    let mut script = speech(4);
    script.extend(silence(30));
    let mut pipeline = pipeline_with_script(script);

    let mut was_eligible = false;
    for _ in 0..34 {
        pipeline.process_pcm(&vec![0.0f32; CHUNK]);
        if pipeline.is_speaking() && pipeline.utterance_samples() >= MIN_PARTIAL_SAMPLES {
            was_eligible = true;
        }
    }
    assert!(!was_eligible);
}

#[test]
fn event_ids_strictly_alternate_across_a_session() {
    let mut script = Vec::new();
    for _ in 0..3 {
        script.extend(speech(20));
        script.extend(silence(20));
    }
    let mut pipeline = pipeline_with_script(script);

    let events = pipeline.process_pcm(&vec![0.0f32; 120 * CHUNK]);
    let kinds: Vec<bool> = events
        .iter()
        .map(|e| matches!(e, SessionEvent::SpeechStart))
        .collect();
    assert_eq!(kinds, vec![true, false, true, false, true, false]);
}
