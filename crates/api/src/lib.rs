pub mod error;
pub mod room;
pub mod routes;
pub mod state;
pub mod ws;

use axum::{routing::get, Router};
use state::AppState;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(routes::health))
        .route("/rooms", get(routes::list_rooms))
        .route("/recordings", get(routes::list_recordings))
        .route("/ws/audio", get(ws::audio::ws_upgrade))
        .route("/ws/session", get(ws::session::ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
