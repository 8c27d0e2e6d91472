pub mod remote;

#[cfg(feature = "local-whisper")]
pub mod whisper;

pub use remote::{HttpAsrEngine, HttpMtEngine, HttpTtsEngine};

#[cfg(feature = "local-whisper")]
pub use whisper::LocalWhisperEngine;

use async_trait::async_trait;

/// Language codes the relay understands on the wire.
pub const SUPPORTED_LANGUAGES: [&str; 3] = ["en", "es", "pt"];

pub fn is_supported_language(code: &str) -> bool {
    SUPPORTED_LANGUAGES.contains(&code)
}

/// Request to transcribe one utterance.
pub struct AsrRequest {
    /// PCM audio at 16kHz mono, f32 normalized [-1.0, 1.0].
    pub pcm_16k_mono: Vec<f32>,
    /// Optional language hint (ISO 639-1). None = auto-detect.
    pub language_hint: Option<String>,
}

/// Result of an ASR transcription.
#[derive(Debug, Clone)]
pub struct AsrResult {
    /// Empty text means "nothing heard".
    pub text: String,
    /// Language the model detected or was forced to. None when detection
    /// failed.
    pub language: Option<String>,
}

/// Speech recognition seam. Implementations are shared read-only across
/// sessions; CPU-bound work runs on the blocking thread pool internally.
#[async_trait]
pub trait AsrEngine: Send + Sync + 'static {
    async fn transcribe(&self, request: AsrRequest) -> anyhow::Result<AsrResult>;

    /// Human-readable backend name for logs.
    fn name(&self) -> &str;
}

/// Machine translation seam.
///
/// Implementations return the input unchanged when `source == target` or the
/// pair is unsupported.
#[async_trait]
pub trait MtEngine: Send + Sync + 'static {
    async fn translate(&self, text: &str, source: &str, target: &str) -> anyhow::Result<String>;

    fn name(&self) -> &str;
}

/// Speech synthesis seam.
///
/// Returns a complete WAV blob; empty bytes signal an unsupported language.
#[async_trait]
pub trait TtsEngine: Send + Sync + 'static {
    async fn synthesize(&self, text: &str, language: &str) -> anyhow::Result<Vec<u8>>;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_language_codes() {
        assert!(is_supported_language("en"));
        assert!(is_supported_language("es"));
        assert!(is_supported_language("pt"));
        assert!(!is_supported_language("de"));
        assert!(!is_supported_language(""));
        assert!(!is_supported_language("EN"));
    }
}
