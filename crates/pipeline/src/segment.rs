/// Boundary events produced by the [`SegmentDetector`].
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentEvent {
    /// Transition from silence to speech.
    SpeechStart,
    /// Transition from speech to silence, after the silence threshold.
    SpeechEnd {
        /// Length of the speech span in seconds, rounded to two decimals.
        duration_secs: f64,
    },
}

/// Turns per-window VAD decisions into utterance boundaries.
///
/// An utterance ends only after `silence_threshold_ms` of consecutive
/// non-speech windows, so natural word gaps don't split it.
pub struct SegmentDetector {
    chunk_size: usize,
    sample_rate: u32,
    silence_chunks_threshold: u32,

    is_speaking: bool,
    silent_chunks: u32,
    /// Value of `total_speech_chunks` when the current utterance started.
    speech_start_chunk: u64,
    total_speech_chunks: u64,
}

impl SegmentDetector {
    pub fn new(silence_threshold_ms: u32, sample_rate: u32, chunk_size: usize) -> Self {
        let chunk_duration_ms = chunk_size as f64 / sample_rate as f64 * 1000.0;
        let silence_chunks_threshold =
            (silence_threshold_ms as f64 / chunk_duration_ms).ceil() as u32;
        Self {
            chunk_size,
            sample_rate,
            silence_chunks_threshold,
            is_speaking: false,
            silent_chunks: 0,
            speech_start_chunk: 0,
            total_speech_chunks: 0,
        }
    }

    /// Feeds one VAD decision and returns the boundary event it triggers,
    /// if any.
    pub fn update(&mut self, is_speech: bool) -> Option<SegmentEvent> {
        if is_speech {
            self.silent_chunks = 0;

            let event = if !self.is_speaking {
                self.is_speaking = true;
                self.speech_start_chunk = self.total_speech_chunks;
                Some(SegmentEvent::SpeechStart)
            } else {
                None
            };
            self.total_speech_chunks += 1;
            return event;
        }

        if self.is_speaking {
            self.silent_chunks += 1;
            if self.silent_chunks >= self.silence_chunks_threshold {
                let chunks = self.total_speech_chunks - self.speech_start_chunk;
                let duration =
                    chunks as f64 * self.chunk_size as f64 / self.sample_rate as f64;
                self.is_speaking = false;
                self.silent_chunks = 0;
                return Some(SegmentEvent::SpeechEnd {
                    duration_secs: (duration * 100.0).round() / 100.0,
                });
            }
        }
        None
    }

    pub fn is_speaking(&self) -> bool {
        self.is_speaking
    }

    pub fn silence_chunks_threshold(&self) -> u32 {
        self.silence_chunks_threshold
    }

    /// Restores the initial state for a new audio stream.
    pub fn reset(&mut self) {
        self.is_speaking = false;
        self.silent_chunks = 0;
        self.speech_start_chunk = 0;
        self.total_speech_chunks = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> SegmentDetector {
        // 512 samples @ 16kHz = 32ms windows; 500ms silence = 16 windows
        SegmentDetector::new(500, 16_000, 512)
    }

    fn run(det: &mut SegmentDetector, decisions: &[bool]) -> Vec<SegmentEvent> {
        decisions.iter().filter_map(|&d| det.update(d)).collect()
    }

    #[test]
    fn threshold_rounds_up_to_whole_windows() {
        assert_eq!(detector().silence_chunks_threshold(), 16);
        // Exactly one window worth of silence
        assert_eq!(SegmentDetector::new(32, 16_000, 512).silence_chunks_threshold(), 1);
    }

    #[test]
    fn silence_only_emits_nothing() {
        let mut det = detector();
        assert!(run(&mut det, &[false; 64]).is_empty());
        assert!(!det.is_speaking());
    }

    #[test]
    fn speech_then_silence_emits_start_then_end() {
        let mut det = detector();
        let mut trace = vec![true; 10];
        trace.extend(vec![false; 16]);
        let events = run(&mut det, &trace);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], SegmentEvent::SpeechStart);
        // 10 speech windows * 512 / 16000 = 0.32s
        assert_eq!(events[1], SegmentEvent::SpeechEnd { duration_secs: 0.32 });
        assert!(!det.is_speaking());
    }

    #[test]
    fn short_gap_does_not_split_the_utterance() {
        let mut det = detector();
        let mut trace = vec![true; 5];
        trace.extend(vec![false; 15]); // one under threshold
        trace.extend(vec![true; 5]);
        trace.extend(vec![false; 16]);
        let events = run(&mut det, &trace);
        assert_eq!(
            events.iter().filter(|e| matches!(e, SegmentEvent::SpeechStart)).count(),
            1
        );
        assert_eq!(events.len(), 2);
        // Only speech windows count toward duration: 10 * 32ms
        assert_eq!(events[1], SegmentEvent::SpeechEnd { duration_secs: 0.32 });
    }

    #[test]
    fn events_alternate_start_end_over_many_utterances() {
        let mut det = detector();
        let mut trace = Vec::new();
        for _ in 0..4 {
            trace.extend(vec![true; 8]);
            trace.extend(vec![false; 20]);
        }
        let events = run(&mut det, &trace);
        assert_eq!(events.len(), 8);
        for (i, event) in events.iter().enumerate() {
            if i % 2 == 0 {
                assert_eq!(*event, SegmentEvent::SpeechStart);
            } else {
                assert!(matches!(event, SegmentEvent::SpeechEnd { .. }));
            }
        }
    }

    #[test]
    fn duration_uses_only_the_current_utterance() {
        let mut det = detector();
        // First utterance: 8 windows
        let mut trace = vec![true; 8];
        trace.extend(vec![false; 16]);
        // Second utterance: 20 windows
        trace.extend(vec![true; 20]);
        trace.extend(vec![false; 16]);
        let events = run(&mut det, &trace);
        assert_eq!(
            events[3],
            SegmentEvent::SpeechEnd { duration_secs: (20.0 * 512.0 / 16_000.0 * 100.0f64).round() / 100.0 }
        );
    }

    #[test]
    fn reset_clears_mid_utterance_state() {
        let mut det = detector();
        run(&mut det, &[true; 4]);
        assert!(det.is_speaking());
        det.reset();
        assert!(!det.is_speaking());
        let events = run(&mut det, &[true]);
        assert_eq!(events, vec![SegmentEvent::SpeechStart]);
    }
}
