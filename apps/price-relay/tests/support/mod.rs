//! Scripted upstream price streamer for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::{SinkExt, StreamExt};
use prost::Message as _;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use price_relay::infrastructure::upstream::PricingData;

/// Encode a frame the way the upstream feed does.
pub fn frame(symbol: &str, price: f32, time_ms: i64) -> String {
    let data = PricingData {
        id: symbol.to_string(),
        price,
        time: time_ms,
        ..Default::default()
    };
    STANDARD.encode(data.encode_to_vec())
}

/// What the fake upstream does with one accepted connection.
pub enum Session {
    /// Send frames, then drop the socket without a close handshake.
    DropAfter(Vec<String>),
    /// Send frames, then keep the socket open until the client leaves.
    HoldAfter(Vec<String>),
    /// Send the frame at the interval until the client leaves.
    Repeat(String, Duration),
}

/// Local WebSocket server playing one [`Session`] per accepted connection.
pub struct FakeUpstream {
    /// `ws://` URL to point connectors at.
    pub url: String,
    /// Subscribe messages received, in order.
    pub subscriptions: mpsc::UnboundedReceiver<String>,
    accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl FakeUpstream {
    /// Start serving `sessions` in order. Connections beyond the script are
    /// accepted and counted but never answered.
    pub async fn start(sessions: Vec<Session>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/", listener.local_addr().unwrap());
        let (subs_tx, subscriptions) = mpsc::unbounded_channel();
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&accepted);
        let task = tokio::spawn(async move {
            let mut sessions = sessions.into_iter();
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let Some(session) = sessions.next() else {
                    continue;
                };
                tokio::spawn(play(stream, session, subs_tx.clone()));
            }
        });

        Self {
            url,
            subscriptions,
            accepted,
            task,
        }
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

async fn play(stream: TcpStream, session: Session, subs_tx: mpsc::UnboundedSender<String>) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };

    while let Some(Ok(message)) = ws.next().await {
        if let Message::Text(text) = message {
            let _ = subs_tx.send(text.as_str().to_owned());
            break;
        }
    }

    match session {
        Session::DropAfter(frames) => {
            for frame in frames {
                let _ = ws.send(Message::Text(frame.into())).await;
            }
        }
        Session::HoldAfter(frames) => {
            for frame in frames {
                let _ = ws.send(Message::Text(frame.into())).await;
            }
            while let Some(Ok(message)) = ws.next().await {
                if message.is_close() {
                    break;
                }
            }
        }
        Session::Repeat(frame, every) => {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    incoming = ws.next() => match incoming {
                        Some(Ok(message)) if !message.is_close() => {}
                        _ => break,
                    },
                    _ = interval.tick() => {
                        if ws.send(Message::Text(frame.clone().into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}

impl Drop for FakeUpstream {
    fn drop(&mut self) {
        self.task.abort();
    }
}
