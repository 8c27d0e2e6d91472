use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use duolog_api::room::RoomRegistry;
use duolog_api::state::AppState;
use duolog_api::ws::dispatch::Engines;
use duolog_config::Settings;
use duolog_pipeline::engines::{HttpAsrEngine, HttpMtEngine, HttpTtsEngine};
use duolog_pipeline::vad::SileroVad;
use duolog_pipeline::{AsrEngine, VadFactory, VadModel};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Arc::new(
        Settings::load().map_err(|e| anyhow::anyhow!("failed to load settings: {e}"))?,
    );

    let recordings_dir = std::path::PathBuf::from(&settings.recordings_dir);
    std::fs::create_dir_all(&recordings_dir)?;
    std::fs::create_dir_all(recordings_dir.join("tts"))?;

    let engines = build_engines(&settings);
    let rooms = Arc::new(RoomRegistry::new(settings.turn.clone()));
    let vad_factory = build_vad_factory(&settings);

    // Fail fast when the VAD model is missing rather than on first connect.
    match vad_factory() {
        Ok(_) => info!(model = %settings.vad.model_path, "VAD model ready"),
        Err(e) => warn!(
            model = %settings.vad.model_path,
            error = %e,
            "VAD model not loadable; sessions will be rejected until it is"
        ),
    }

    let state = AppState {
        settings: settings.clone(),
        engines,
        rooms,
        vad_factory,
        recordings_dir,
    };

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "duolog relay listening");

    axum::serve(listener, duolog_api::build_router(state)).await?;
    Ok(())
}

fn build_engines(settings: &Settings) -> Engines {
    let asr: Option<Arc<dyn AsrEngine>> = match settings.asr.backend.as_str() {
        "local_whisper" => build_local_whisper(settings),
        "remote" => {
            info!(endpoint = %settings.asr.endpoint, "using remote ASR");
            Some(Arc::new(HttpAsrEngine::new(settings.asr.endpoint.clone())))
        }
        other => {
            warn!(backend = other, "unknown ASR backend; transcription disabled");
            None
        }
    };

    Engines {
        asr,
        mt: Some(Arc::new(HttpMtEngine::new(settings.mt.endpoint.clone()))),
        tts: Some(Arc::new(HttpTtsEngine::new(settings.tts.endpoint.clone()))),
    }
}

#[cfg(feature = "local-whisper")]
fn build_local_whisper(settings: &Settings) -> Option<Arc<dyn AsrEngine>> {
    use duolog_pipeline::engines::LocalWhisperEngine;

    let path = match &settings.asr.whisper_model_path {
        Some(p) => p.clone(),
        None => {
            warn!("local_whisper backend needs asr.whisper_model_path; transcription disabled");
            return None;
        }
    };
    match LocalWhisperEngine::new(&path) {
        Ok(engine) => Some(Arc::new(engine)),
        Err(e) => {
            warn!(error = %e, "failed to load Whisper; transcription disabled");
            None
        }
    }
}

#[cfg(not(feature = "local-whisper"))]
fn build_local_whisper(_settings: &Settings) -> Option<Arc<dyn AsrEngine>> {
    warn!("built without the local-whisper feature; transcription disabled");
    None
}

fn build_vad_factory(settings: &Settings) -> VadFactory {
    let model_path = settings.vad.model_path.clone();
    Arc::new(move || -> anyhow::Result<Box<dyn VadModel>> {
        Ok(Box::new(SileroVad::new(&model_path)?))
    })
}
