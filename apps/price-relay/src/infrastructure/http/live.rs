//! Live WebSocket streaming.
//!
//! The client opens `/ws`, sends one text frame naming the pair (and
//! optionally a timeframe), then receives one JSON message per tick until it
//! disconnects. A bad opening frame gets a text error and a close frame; no
//! upstream connection is opened for it.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade, close_code};
use axum::response::Response;

use super::AppState;
use super::error::ApiError;
use crate::application::services::{LiveAggregator, StreamRequest, ValidationError};
use crate::infrastructure::metrics;

/// How long a client may wait before sending its opening frame.
const OPENING_FRAME_TIMEOUT: Duration = Duration::from_secs(30);

pub(super) async fn ws_handler(
    State(state): State<Arc<AppState>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| serve_client(socket, state))
}

async fn serve_client(mut socket: WebSocket, state: Arc<AppState>) {
    let Some(text) = read_opening_frame(&mut socket).await else {
        tracing::debug!("live client left before sending a request");
        return;
    };

    let request = match StreamRequest::parse(&text, state.supervisor.registry()) {
        Ok(request) => request,
        Err(e) => return reject(socket, e).await,
    };

    let mut feed = match state.supervisor.open_live_stream(&request.instrument) {
        Ok(feed) => feed,
        Err(e) => return reject(socket, e).await,
    };

    tracing::info!(
        instrument = %request.instrument,
        timeframe = %request.timeframe,
        mode = %feed.mode(),
        "live client streaming"
    );

    let mut aggregator = LiveAggregator::new(&request);
    loop {
        tokio::select! {
            () = state.cancel.cancelled() => {
                let _ = socket.send(close(close_code::AWAY, "shutting down")).await;
                break;
            }
            tick = feed.next() => {
                let Some(tick) = tick else {
                    let _ = socket.send(close(close_code::ERROR, "feed ended")).await;
                    break;
                };
                let message = aggregator.on_tick(&tick);
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode live message");
                        continue;
                    }
                };
                if socket.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                None | Some(Ok(Message::Close(_)) | Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::info!(instrument = %request.instrument, "live client disconnected");
}

async fn read_opening_frame(socket: &mut WebSocket) -> Option<String> {
    let read = async {
        while let Some(Ok(message)) = socket.recv().await {
            match message {
                Message::Text(text) => return Some(text.as_str().to_owned()),
                Message::Binary(bytes) => return Some(String::from_utf8_lossy(&bytes).into_owned()),
                Message::Close(_) => return None,
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
        None
    };
    tokio::time::timeout(OPENING_FRAME_TIMEOUT, read)
        .await
        .ok()
        .flatten()
}

async fn reject(mut socket: WebSocket, err: ValidationError) {
    let err = ApiError::from(err);
    tracing::debug!(reason = err.reason(), error = %err, "live request rejected");
    metrics::record_request_rejected("ws", err.reason());

    let _ = socket.send(Message::Text(format!("error: {err}").into())).await;
    let _ = socket.send(close(close_code::POLICY, "invalid request")).await;
}

fn close(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason),
    }))
}
