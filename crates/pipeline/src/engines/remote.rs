//! JSON-over-HTTP clients for sidecar inference servers.
//!
//! The relay's default deployment keeps the heavyweight models (Whisper,
//! NLLB, Piper) in separate processes reached over localhost HTTP. Each
//! client speaks a small JSON protocol; audio travels as base64 f32-LE.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{is_supported_language, AsrEngine, AsrRequest, AsrResult, MtEngine, TtsEngine};

#[derive(Serialize)]
struct TranscribeBody {
    audio_b64: String,
    sample_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<String>,
}

#[derive(Deserialize)]
struct TranscribeResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
}

/// ASR over a sidecar speech-recognition server.
pub struct HttpAsrEngine {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAsrEngine {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl AsrEngine for HttpAsrEngine {
    async fn transcribe(&self, request: AsrRequest) -> anyhow::Result<AsrResult> {
        let mut bytes = Vec::with_capacity(request.pcm_16k_mono.len() * 4);
        for sample in &request.pcm_16k_mono {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }

        let body = TranscribeBody {
            audio_b64: BASE64.encode(&bytes),
            sample_rate: crate::PIPELINE_SAMPLE_RATE,
            language: request.language_hint,
        };

        let response: TranscribeResponse = self
            .client
            .post(format!("{}/transcribe", self.endpoint))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(AsrResult {
            text: response.text.trim().to_string(),
            language: response.language.filter(|l| !l.is_empty()),
        })
    }

    fn name(&self) -> &str {
        "remote_asr"
    }
}

#[derive(Serialize)]
struct TranslateBody<'a> {
    text: &'a str,
    source: &'a str,
    target: &'a str,
}

#[derive(Deserialize)]
struct TranslateResponse {
    text: String,
}

/// MT over a sidecar translation server.
pub struct HttpMtEngine {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpMtEngine {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl MtEngine for HttpMtEngine {
    async fn translate(&self, text: &str, source: &str, target: &str) -> anyhow::Result<String> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }
        if source == target {
            return Ok(text.to_string());
        }
        if !is_supported_language(source) || !is_supported_language(target) {
            warn!(source, target, "unsupported language pair, passing text through");
            return Ok(text.to_string());
        }

        let response: TranslateResponse = self
            .client
            .post(format!("{}/translate", self.endpoint))
            .json(&TranslateBody { text, source, target })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response.text.trim().to_string())
    }

    fn name(&self) -> &str {
        "remote_mt"
    }
}

#[derive(Serialize)]
struct SynthesizeBody<'a> {
    text: &'a str,
    language: &'a str,
}

/// TTS over a sidecar synthesis server. The response body is a complete WAV.
pub struct HttpTtsEngine {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTtsEngine {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl TtsEngine for HttpTtsEngine {
    async fn synthesize(&self, text: &str, language: &str) -> anyhow::Result<Vec<u8>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        if !is_supported_language(language) {
            warn!(language, "no voice for language");
            return Ok(Vec::new());
        }

        let bytes = self
            .client
            .post(format!("{}/synthesize", self.endpoint))
            .json(&SynthesizeBody { text, language })
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        Ok(bytes.to_vec())
    }

    fn name(&self) -> &str {
        "remote_tts"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mt_short_circuits_same_language() {
        let mt = HttpMtEngine::new("http://127.0.0.1:1");
        let out = mt.translate("hola", "es", "es").await.unwrap();
        assert_eq!(out, "hola");
    }

    #[tokio::test]
    async fn mt_passes_through_unsupported_pair() {
        let mt = HttpMtEngine::new("http://127.0.0.1:1");
        let out = mt.translate("bonjour", "fr", "en").await.unwrap();
        assert_eq!(out, "bonjour");
    }

    #[tokio::test]
    async fn mt_empty_text_is_empty() {
        let mt = HttpMtEngine::new("http://127.0.0.1:1");
        assert_eq!(mt.translate("  ", "en", "es").await.unwrap(), "");
    }

    #[tokio::test]
    async fn tts_unsupported_language_is_empty_bytes() {
        let tts = HttpTtsEngine::new("http://127.0.0.1:1");
        assert!(tts.synthesize("hello", "de").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tts_empty_text_is_empty_bytes() {
        let tts = HttpTtsEngine::new("http://127.0.0.1:1");
        assert!(tts.synthesize("", "en").await.unwrap().is_empty());
    }
}
