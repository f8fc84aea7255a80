//! Update-log websocket. Tails the self-update log file and pushes
//! appended text to the client until it disconnects.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::IntoResponse,
};
use axum_extra::extract::cookie::CookieJar;
use futures_util::stream::StreamExt;
use tokio::time::{Duration, interval};
use tracing::{debug, info};

use crate::update;
use crate::web::{AppError, AppState, middleware::auth};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub async fn update_log_ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    auth::authorize(&app_state.db, &app_state.config.jwt_secret, &headers, &jar).await?;
    Ok(ws.on_upgrade(move |socket| handle_log_socket(socket, app_state)))
}

async fn handle_log_socket(mut socket: WebSocket, app_state: Arc<AppState>) {
    let log_path = app_state.config.update_log_path();
    let mut offset = 0u64;
    let mut ticker = interval(POLL_INTERVAL);
    info!(log = %log_path.display(), "Update-log tail started.");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let (text, next_offset) = match update::read_log_from(&log_path, offset).await {
                    Ok(read) => read,
                    Err(e) => {
                        debug!(error = %e, "Log read failed; stopping tail.");
                        break;
                    }
                };
                offset = next_offset;
                if !text.is_empty()
                    && socket.send(Message::Text(Utf8Bytes::from(text))).await.is_err()
                {
                    break;
                }
            }
            msg = socket.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(p))) => {
                        if socket.send(Message::Pong(p)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
    info!("Update-log tail finished.");
}
