//! Fan-out Channel
//!
//! Bounded queue from one connector's read loop to one consumer. A full queue
//! blocks the producer rather than dropping ticks, so a slow consumer stalls
//! the read loop. Every time the producer finds the queue full it counts a
//! stall before waiting.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::domain::market::Tick;
use crate::infrastructure::metrics;

/// Queue size used when none is configured.
pub const DEFAULT_CAPACITY: usize = 10;

/// The consumer went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("fan-out consumer dropped")]
pub struct FanoutClosed;

/// Create a bounded fan-out channel. A capacity of zero is raised to one.
#[must_use]
pub fn channel(capacity: usize) -> (FanoutSender, FanoutReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sender = FanoutSender {
        tx,
        stalls: Arc::new(AtomicU64::new(0)),
    };
    (sender, FanoutReceiver { rx })
}

/// Producer half.
#[derive(Debug, Clone)]
pub struct FanoutSender {
    tx: mpsc::Sender<Tick>,
    stalls: Arc<AtomicU64>,
}

impl FanoutSender {
    /// Deliver a tick, waiting for room if the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`FanoutClosed`] if the receiver was dropped.
    pub async fn send(&self, tick: Tick) -> Result<(), FanoutClosed> {
        match self.tx.try_send(tick) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(tick)) => {
                self.stalls.fetch_add(1, Ordering::Relaxed);
                metrics::record_fanout_stall();
                tracing::debug!(capacity = self.tx.max_capacity(), "fan-out queue full, waiting");
                self.tx.send(tick).await.map_err(|_| FanoutClosed)
            }
            Err(TrySendError::Closed(_)) => Err(FanoutClosed),
        }
    }

    /// Resolves once the receiver is dropped.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    /// Whether the receiver is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Times the producer found the queue full.
    #[must_use]
    pub fn stalls(&self) -> u64 {
        self.stalls.load(Ordering::Relaxed)
    }
}

/// Consumer half. Also a [`Stream`] of ticks.
#[derive(Debug)]
pub struct FanoutReceiver {
    rx: mpsc::Receiver<Tick>,
}

impl FanoutReceiver {
    /// Next tick, or `None` once the producer is gone and the queue drained.
    pub async fn recv(&mut self) -> Option<Tick> {
        self.rx.recv().await
    }

    /// Ticks currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Stream for FanoutReceiver {
    type Item = Tick;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
