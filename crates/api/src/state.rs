use std::path::PathBuf;
use std::sync::Arc;

use duolog_config::Settings;
use duolog_pipeline::VadFactory;

use crate::room::RoomRegistry;
use crate::ws::dispatch::Engines;

/// Shared server state. Everything here is constructed once at startup and
/// shared read-only; per-connection state lives in the handlers.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub engines: Engines,
    pub rooms: Arc<RoomRegistry>,
    pub vad_factory: VadFactory,
    pub recordings_dir: PathBuf,
}

impl AppState {
    /// Directory for the per-session synthesized-speech aggregates.
    pub fn tts_dir(&self) -> PathBuf {
        self.recordings_dir.join("tts")
    }
}
