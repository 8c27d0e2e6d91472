use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::decode::StreamDecoder;
use crate::segment::{SegmentDetector, SegmentEvent};
use crate::vad::VadModel;
use crate::{wav, SOURCE_SAMPLE_RATE};

/// Utterance boundary events surfaced to the connection handler.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    SpeechStart,
    SpeechEnd {
        /// The complete utterance, 16kHz mono f32.
        pcm: Vec<f32>,
        duration_secs: f64,
    },
}

/// Per-connection audio pipeline: raw chunk log → decode → windowed VAD →
/// segment detection → utterance accumulation.
///
/// Owned by exactly one WebSocket handler; nothing here is shared across
/// tasks. Inference on the produced utterances happens elsewhere so chunk
/// processing stays cheap enough to run inline on the receive loop.
pub struct SessionPipeline {
    session_id: String,
    /// Raw WebM bytes as received, archived as a WAV at close.
    raw_webm: Vec<u8>,
    decoder: StreamDecoder,
    vad: Box<dyn VadModel>,
    vad_threshold: f32,
    detector: SegmentDetector,
    sample_rate: u32,
    chunk_size: usize,
    /// Decoded PCM awaiting a full VAD window.
    pcm_buffer: Vec<f32>,
    /// PCM of the utterance currently in progress.
    utterance: Vec<f32>,
}

impl SessionPipeline {
    pub fn new(
        session_id: String,
        mut vad: Box<dyn VadModel>,
        vad_threshold: f32,
        sample_rate: u32,
        chunk_size: usize,
        silence_threshold_ms: u32,
    ) -> Self {
        vad.reset();
        Self {
            session_id,
            raw_webm: Vec::new(),
            decoder: StreamDecoder::new(),
            vad,
            vad_threshold,
            detector: SegmentDetector::new(silence_threshold_ms, sample_rate, chunk_size),
            sample_rate,
            chunk_size,
            pcm_buffer: Vec::new(),
            utterance: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Ingests one WebM fragment from the socket and returns any utterance
    /// boundary events it produced.
    pub fn process_chunk(&mut self, data: &[u8]) -> Vec<SessionEvent> {
        self.raw_webm.extend_from_slice(data);
        let pcm = self.decoder.push(data);
        self.process_pcm(&pcm)
    }

    /// Runs decoded PCM through the VAD windows and the segment detector.
    ///
    /// While the detector reports speech, windows accumulate into the
    /// current-utterance buffer; `speech_start` resets the buffer to the
    /// window that triggered it, `speech_end` seals the buffer into the
    /// emitted event.
    pub fn process_pcm(&mut self, pcm: &[f32]) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if !pcm.is_empty() {
            self.pcm_buffer.extend_from_slice(pcm);
        }

        while self.pcm_buffer.len() >= self.chunk_size {
            let window: Vec<f32> = self.pcm_buffer.drain(..self.chunk_size).collect();

            let prob = match self.vad.process_window(&window, self.sample_rate) {
                Ok(p) => p,
                Err(e) => {
                    warn!(session_id = %self.session_id, error = %e, "VAD inference failed");
                    0.0
                }
            };
            let is_speech = prob >= self.vad_threshold;

            let event = self.detector.update(is_speech);

            if self.detector.is_speaking() {
                self.utterance.extend_from_slice(&window);
            }

            match event {
                Some(SegmentEvent::SpeechStart) => {
                    self.utterance.clear();
                    self.utterance.extend_from_slice(&window);
                    events.push(SessionEvent::SpeechStart);
                }
                Some(SegmentEvent::SpeechEnd { duration_secs }) => {
                    let pcm = std::mem::take(&mut self.utterance);
                    events.push(SessionEvent::SpeechEnd { pcm, duration_secs });
                }
                None => {}
            }
        }

        events
    }

    pub fn is_speaking(&self) -> bool {
        self.detector.is_speaking()
    }

    /// Samples accumulated for the utterance in progress.
    pub fn utterance_samples(&self) -> usize {
        self.utterance.len()
    }

    /// Copy of the in-progress utterance, for partial transcription.
    pub fn utterance_snapshot(&self) -> Vec<f32> {
        self.utterance.clone()
    }

    pub fn has_audio(&self) -> bool {
        !self.raw_webm.is_empty()
    }

    /// Decodes the full raw stream and writes `<session_id>.wav` (16-bit
    /// PCM, 48kHz mono) under `dir`.
    ///
    /// When the stream never became decodable, the raw bytes are kept as
    /// `<session_id>.webm` for debugging and `None` is returned.
    pub fn save_recording(&self, dir: &Path) -> anyhow::Result<Option<PathBuf>> {
        if self.raw_webm.is_empty() {
            return Ok(None);
        }

        match self.decoder.decoded_48k() {
            Ok(pcm) if !pcm.is_empty() => {
                let path = dir.join(format!("{}.wav", self.session_id));
                wav::write_mono_16bit(&path, &pcm, SOURCE_SAMPLE_RATE)?;
                debug!(session_id = %self.session_id, samples = pcm.len(), "recording saved");
                Ok(Some(path))
            }
            Ok(_) | Err(_) => {
                let debug_path = dir.join(format!("{}.webm", self.session_id));
                std::fs::write(&debug_path, &self.raw_webm)?;
                warn!(
                    session_id = %self.session_id,
                    path = %debug_path.display(),
                    "stream never decoded; kept raw webm"
                );
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vad::VadModel;
    use std::collections::VecDeque;

    /// VAD that replays a scripted probability per window.
    struct ScriptedVad {
        probs: VecDeque<f32>,
    }

    impl ScriptedVad {
        fn new(probs: &[f32]) -> Box<Self> {
            Box::new(Self {
                probs: probs.iter().copied().collect(),
            })
        }
    }

    impl VadModel for ScriptedVad {
        fn reset(&mut self) {}

        fn process_window(&mut self, _window: &[f32], _sample_rate: u32) -> anyhow::Result<f32> {
            Ok(self.probs.pop_front().unwrap_or(0.0))
        }
    }

    const CHUNK: usize = 512;

    fn pipeline(probs: &[f32]) -> SessionPipeline {
        SessionPipeline::new(
            "test".to_string(),
            ScriptedVad::new(probs),
            0.5,
            16_000,
            CHUNK,
            500,
        )
    }

    fn windows(n: usize) -> Vec<f32> {
        vec![0.0; n * CHUNK]
    }

    fn script(speech: usize, silence: usize) -> Vec<f32> {
        let mut probs = vec![0.9; speech];
        probs.extend(vec![0.1; silence]);
        probs
    }

    #[test]
    fn utterance_flows_start_to_end() {
        let mut p = pipeline(&script(10, 16));
        let events = p.process_pcm(&windows(26));

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], SessionEvent::SpeechStart));
        match &events[1] {
            SessionEvent::SpeechEnd { pcm, duration_secs } => {
                // 10 speech windows + 15 trailing silent windows (the 16th
                // flips the detector before accumulation)
                assert_eq!(pcm.len(), 25 * CHUNK);
                assert_eq!(*duration_secs, 0.32);
            }
            other => panic!("expected SpeechEnd, got {other:?}"),
        }
        assert!(!p.is_speaking());
        assert_eq!(p.utterance_samples(), 0);
    }

    #[test]
    fn sub_window_pcm_is_buffered_until_complete() {
        let mut p = pipeline(&script(2, 0));
        assert!(p.process_pcm(&vec![0.0; CHUNK / 2]).is_empty());
        assert!(!p.is_speaking());
        let events = p.process_pcm(&vec![0.0; CHUNK / 2]);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SessionEvent::SpeechStart));
        assert!(p.is_speaking());
    }

    #[test]
    fn utterance_buffer_resets_on_new_speech_start() {
        // Two utterances separated by silence
        let mut probs = script(4, 16);
        probs.extend(script(6, 16));
        let mut p = pipeline(&probs);
        let events = p.process_pcm(&windows(42));

        let ends: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::SpeechEnd { pcm, .. } => Some(pcm.len()),
                _ => None,
            })
            .collect();
        assert_eq!(ends, vec![(4 + 15) * CHUNK, (6 + 15) * CHUNK]);
    }

    #[test]
    fn snapshot_grows_while_speaking() {
        let mut p = pipeline(&script(8, 0));
        p.process_pcm(&windows(8));
        assert!(p.is_speaking());
        assert_eq!(p.utterance_samples(), 8 * CHUNK);
        assert_eq!(p.utterance_snapshot().len(), 8 * CHUNK);
        // Snapshot is a copy; the live buffer is untouched
        assert_eq!(p.utterance_samples(), 8 * CHUNK);
    }

    #[test]
    fn vad_error_counts_as_non_speech() {
        struct FailingVad;
        impl VadModel for FailingVad {
            fn reset(&mut self) {}
            fn process_window(&mut self, _: &[f32], _: u32) -> anyhow::Result<f32> {
                anyhow::bail!("model exploded")
            }
        }
        let mut p = SessionPipeline::new(
            "test".to_string(),
            Box::new(FailingVad),
            0.5,
            16_000,
            CHUNK,
            500,
        );
        assert!(p.process_pcm(&windows(4)).is_empty());
        assert!(!p.is_speaking());
    }

    #[test]
    fn empty_session_saves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(&[]);
        assert!(p.save_recording(dir.path()).unwrap().is_none());
    }

    #[test]
    fn undecodable_session_keeps_raw_webm() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = pipeline(&[]);
        p.process_chunk(b"garbage that is not webm");
        assert!(p.save_recording(dir.path()).unwrap().is_none());
        assert!(dir.path().join("test.webm").exists());
    }
}
