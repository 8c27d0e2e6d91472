use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Top-level application settings.
///
/// Loaded from `config/default.toml`, then `config/local.toml`, then
/// environment variables with the `DUOLOG` prefix and `__` separator
/// (e.g. `DUOLOG_SERVER__PORT=9000`). Every field has a default so the
/// server starts with no config files present.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub audio: AudioSettings,
    pub vad: VadSettings,
    pub turn: TurnSettings,
    pub asr: AsrSettings,
    pub mt: MtSettings,
    pub tts: TtsSettings,
    /// Directory where per-session recordings are written.
    pub recordings_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Pipeline sample rate after decode (Hz).
    pub sample_rate: u32,
    /// Samples per VAD window (512 @ 16kHz = ~32ms).
    pub chunk_size: usize,
    /// Trailing silence that seals an utterance.
    pub silence_threshold_ms: u32,
    /// Minimum accumulated utterance audio before a partial transcript job
    /// may be submitted (seconds).
    pub min_partial_secs: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VadSettings {
    /// Path to the Silero VAD ONNX model file.
    pub model_path: String,
    /// Speech probability threshold (0.0-1.0).
    pub threshold: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TurnSettings {
    /// Extra silence added on top of TTS duration when echo-locking a mic.
    pub lockout_buffer_ms: u64,
    /// Post-utterance floor retention for the room creator.
    pub grace_a_ms: u64,
    /// Post-utterance floor retention for the room joiner.
    pub grace_b_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AsrSettings {
    /// "remote" (HTTP sidecar) or "local_whisper" (requires the
    /// `local-whisper` feature of duolog-pipeline).
    pub backend: String,
    /// Remote ASR sidecar base URL.
    pub endpoint: String,
    /// GGML model path for the local_whisper backend.
    pub whisper_model_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MtSettings {
    /// Remote MT sidecar base URL.
    pub endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtsSettings {
    /// Remote TTS sidecar base URL.
    pub endpoint: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            audio: AudioSettings::default(),
            vad: VadSettings::default(),
            turn: TurnSettings::default(),
            asr: AsrSettings::default(),
            mt: MtSettings::default(),
            tts: TtsSettings::default(),
            recordings_dir: "recordings".to_string(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            chunk_size: 512,
            silence_threshold_ms: 500,
            min_partial_secs: 1.0,
        }
    }
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            model_path: "models/silero_vad.onnx".to_string(),
            threshold: 0.5,
        }
    }
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            lockout_buffer_ms: 200,
            grace_a_ms: 2000,
            grace_b_ms: 1000,
        }
    }
}

impl Default for AsrSettings {
    fn default() -> Self {
        Self {
            backend: "remote".to_string(),
            endpoint: "http://127.0.0.1:9001".to_string(),
            whisper_model_path: None,
        }
    }
}

impl Default for MtSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9002".to_string(),
        }
    }
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9003".to_string(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("DUOLOG").separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pipeline_constants() {
        let s = Settings::default();
        assert_eq!(s.audio.sample_rate, 16_000);
        assert_eq!(s.audio.chunk_size, 512);
        assert_eq!(s.audio.silence_threshold_ms, 500);
        assert_eq!(s.turn.grace_a_ms, 2000);
        assert_eq!(s.turn.grace_b_ms, 1000);
        assert_eq!(s.turn.lockout_buffer_ms, 200);
    }

    #[test]
    fn load_without_files_uses_defaults() {
        let s = Settings::load().expect("settings should load from defaults");
        assert_eq!(s.server.port, 8000);
        assert_eq!(s.vad.threshold, 0.5);
    }
}
