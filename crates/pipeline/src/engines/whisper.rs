use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::{AsrEngine, AsrRequest, AsrResult};

/// In-process ASR via whisper.cpp.
///
/// The context is loaded once and shared; each transcription creates its own
/// state on the blocking thread pool so the async runtime never stalls on
/// inference.
pub struct LocalWhisperEngine {
    ctx: Arc<WhisperContext>,
}

impl LocalWhisperEngine {
    /// Loads a GGML Whisper model (e.g. `ggml-small.bin`) from disk.
    pub fn new(model_path: &str) -> anyhow::Result<Self> {
        info!(model_path, "loading Whisper model");
        let ctx = WhisperContext::new_with_params(model_path, WhisperContextParameters::default())
            .map_err(|e| anyhow::anyhow!("failed to load Whisper model '{model_path}': {e}"))?;
        info!("Whisper model loaded");
        Ok(Self { ctx: Arc::new(ctx) })
    }
}

#[async_trait]
impl AsrEngine for LocalWhisperEngine {
    async fn transcribe(&self, request: AsrRequest) -> anyhow::Result<AsrResult> {
        if request.pcm_16k_mono.is_empty() {
            return Ok(AsrResult {
                text: String::new(),
                language: request.language_hint,
            });
        }

        let ctx = Arc::clone(&self.ctx);
        let audio = request.pcm_16k_mono;
        let hint = request.language_hint;

        let result = tokio::task::spawn_blocking(move || -> anyhow::Result<AsrResult> {
            let mut state = ctx
                .create_state()
                .map_err(|e| anyhow::anyhow!("failed to create Whisper state: {e}"))?;

            let mut params = FullParams::new(SamplingStrategy::BeamSearch {
                beam_size: 3,
                patience: 1.0,
            });

            match hint.as_deref() {
                Some(lang) => params.set_language(Some(lang)),
                None => params.set_detect_language(true),
            }
            params.set_translate(false);
            params.set_print_progress(false);
            params.set_print_special(false);
            params.set_print_realtime(false);
            params.set_print_timestamps(false);
            params.set_suppress_blank(true);

            state
                .full(params, &audio)
                .map_err(|e| anyhow::anyhow!("Whisper transcription failed: {e}"))?;

            let mut text = String::new();
            for i in 0..state.full_n_segments() {
                if let Some(segment) = state.get_segment(i)
                    && let Ok(seg_text) = segment.to_str()
                {
                    text.push_str(seg_text);
                }
            }
            let text = text.trim().to_string();

            let language = whisper_rs::get_lang_str(state.full_lang_id_from_state())
                .map(|s| s.to_string())
                .or(hint);

            debug!(text_len = text.len(), ?language, "Whisper transcription complete");
            Ok(AsrResult { text, language })
        })
        .await
        .map_err(|e| anyhow::anyhow!("Whisper task join error: {e}"))??;

        Ok(result)
    }

    fn name(&self) -> &str {
        "local_whisper"
    }
}
