use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "duolog speech-translation relay",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Diagnostic snapshot of live rooms: languages, occupants, and the turn
/// controller state.
pub async fn list_rooms(State(state): State<AppState>) -> Json<Value> {
    let rooms: Vec<Value> = state
        .rooms
        .snapshot()
        .iter()
        .map(|room| {
            let participants: Vec<Value> = room
                .participants_snapshot()
                .iter()
                .map(|p| {
                    json!({
                        "role": p.role,
                        "name": p.name,
                        "language": p.language,
                    })
                })
                .collect();
            json!({
                "room_id": room.code,
                "language_a": room.lang_a,
                "language_b": room.lang_b,
                "participants": participants,
                "turn": room.turn.lock().status(),
            })
        })
        .collect();

    Json(json!({ "rooms": rooms }))
}

/// Lists saved session recordings, newest first.
pub async fn list_recordings(
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    if !state.recordings_dir.is_dir() {
        return Err(ApiError::NotFound("recordings directory".to_string()));
    }

    let mut files: Vec<(String, u64)> = Vec::new();
    for entry in std::fs::read_dir(&state.recordings_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".wav") {
            continue;
        }
        let size = entry.metadata()?.len();
        files.push((name, size));
    }
    files.sort_by(|a, b| b.0.cmp(&a.0));

    let recordings: Vec<Value> = files
        .into_iter()
        .map(|(name, size)| json!({ "name": name, "size": size }))
        .collect();

    Ok(Json(json!({ "recordings": recordings })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use duolog_config::Settings;
    use duolog_pipeline::VadModel;

    use crate::room::RoomRegistry;
    use crate::ws::dispatch::Engines;

    fn test_state(dir: &std::path::Path) -> AppState {
        let settings = Arc::new(Settings::default());
        AppState {
            settings: settings.clone(),
            engines: Engines {
                asr: None,
                mt: None,
                tts: None,
            },
            rooms: Arc::new(RoomRegistry::new(settings.turn.clone())),
            vad_factory: Arc::new(|| -> anyhow::Result<Box<dyn VadModel>> {
                anyhow::bail!("no VAD in tests")
            }),
            recordings_dir: dir.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let body = health().await.0;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn rooms_snapshot_includes_turn_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        state.rooms.create("en".into(), "pt".into());

        let body = list_rooms(State(state)).await.0;
        let rooms = body["rooms"].as_array().unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0]["language_a"], "en");
        assert_eq!(rooms[0]["language_b"], "pt");
        assert_eq!(rooms[0]["turn"]["state"], "idle");
        assert!(rooms[0]["participants"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn recordings_list_newest_first_wav_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("20260101_000000_000001.wav"), b"a").unwrap();
        std::fs::write(dir.path().join("20260301_000000_000001.wav"), b"bb").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let state = test_state(dir.path());
        let body = list_recordings(State(state)).await.unwrap().0;
        let recordings = body["recordings"].as_array().unwrap();
        assert_eq!(recordings.len(), 2);
        assert_eq!(recordings[0]["name"], "20260301_000000_000001.wav");
        assert_eq!(recordings[1]["name"], "20260101_000000_000001.wav");
        assert_eq!(recordings[1]["size"], 1);
    }
}
