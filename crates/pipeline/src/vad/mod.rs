#[cfg(feature = "vad")]
pub mod silero;

#[cfg(feature = "vad")]
pub use silero::SileroVad;

use std::sync::Arc;

/// A voice-activity model scoring fixed-size PCM windows.
///
/// Implementations hold per-stream state (Silero carries a recurrent hidden
/// state), so each connection gets its own instance and `reset` is called
/// when a stream begins.
pub trait VadModel: Send {
    /// Clears internal state for a new audio stream.
    fn reset(&mut self);

    /// Scores one window of 16kHz mono f32 PCM, returning the raw speech
    /// probability in [0, 1]. The speech/non-speech threshold is applied by
    /// the caller.
    fn process_window(&mut self, window: &[f32], sample_rate: u32) -> anyhow::Result<f32>;
}

/// Constructs a fresh [`VadModel`] per connection.
pub type VadFactory = Arc<dyn Fn() -> anyhow::Result<Box<dyn VadModel>> + Send + Sync>;
