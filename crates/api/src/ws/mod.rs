pub mod audio;
pub mod dispatch;
pub mod messages;
pub mod session;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use messages::ServerMessage;

/// Write half of a WebSocket, shared between the receive loop and the
/// dispatch jobs that answer on it.
pub type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Sends a JSON text frame, suppressing the send when the socket already
/// failed and flipping `open` off on a new failure.
///
/// A closed browser tab is detected here, not by the receive loop: the next
/// send errors and everything after it goes quiet.
pub async fn send_json(sender: &WsSender, open: &AtomicBool, message: &ServerMessage) {
    if !open.load(Ordering::Relaxed) {
        return;
    }
    let text = match serde_json::to_string(message) {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "failed to serialize server message");
            return;
        }
    };
    let mut guard = sender.lock().await;
    if let Err(e) = guard.send(Message::Text(text.into())).await {
        debug!(error = %e, "WS send failed; marking socket closed");
        open.store(false, Ordering::Relaxed);
    }
}

/// Sends a binary frame with the same closed-socket suppression as
/// [`send_json`].
pub async fn send_binary(sender: &WsSender, open: &AtomicBool, bytes: Vec<u8>) {
    if !open.load(Ordering::Relaxed) {
        return;
    }
    let mut guard = sender.lock().await;
    if let Err(e) = guard.send(Message::Binary(bytes.into())).await {
        debug!(error = %e, "WS binary send failed; marking socket closed");
        open.store(false, Ordering::Relaxed);
    }
}
