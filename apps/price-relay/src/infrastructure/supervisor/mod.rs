//! Supervisor
//!
//! Owns connector lifecycles:
//!
//! - **Monitoring path**: one long-lived connector per registered instrument
//!   plus a store-writer task appending its ticks into the [`TickStore`].
//! - **Live path**: every live client gets a [`LiveFeed`]. In
//!   [`StreamingMode::Dedicated`] that feed owns a fresh connector scoped to
//!   the client; in [`StreamingMode::Pooled`] it is a receiver on the
//!   [`TickHub`] fed by the monitoring connector.
//!
//! ```text
//!                       ┌─► writer ─► TickStore
//! upstream ─► monitor ──┤
//!                       └─► TickHub ─► pooled clients
//!
//! upstream ─► dedicated connector ─► one live client
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::services::ValidationError;
use crate::domain::instrument::{InstrumentCode, InstrumentRegistry, UpstreamSymbol};
use crate::domain::market::Tick;
use crate::domain::store::TickStore;
use crate::infrastructure::broadcast::{DEFAULT_POOL_CAPACITY, HubStats, SharedTickHub, TickHub};
use crate::infrastructure::fanout::{self, DEFAULT_CAPACITY, FanoutReceiver};
use crate::infrastructure::metrics::{self, ConnectorRole};
use crate::infrastructure::upstream::{
    ConnectionState, ConnectorConfig, ConnectorError, ConnectorStats, UpstreamConnector,
};

// =============================================================================
// Configuration
// =============================================================================

/// How live clients are fed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingMode {
    /// Each client gets its own upstream connection.
    #[default]
    Dedicated,
    /// Clients share the monitoring connection through the tick hub.
    Pooled,
}

impl StreamingMode {
    /// Configuration name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dedicated => "dedicated",
            Self::Pooled => "pooled",
        }
    }
}

impl fmt::Display for StreamingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dedicated" => Ok(Self::Dedicated),
            "pooled" => Ok(Self::Pooled),
            other => Err(format!("unknown streaming mode: {other}")),
        }
    }
}

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Template for every connector; the role is set per path.
    pub connector: ConnectorConfig,
    /// Fan-out queue size per connector.
    pub fanout_capacity: usize,
    /// Live client feeding strategy.
    pub mode: StreamingMode,
    /// Tick hub capacity per instrument (pooled mode).
    pub pool_capacity: usize,
    /// Instruments to monitor; `None` monitors the whole registry.
    pub monitored: Option<Vec<InstrumentCode>>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            connector: ConnectorConfig::default(),
            fanout_capacity: DEFAULT_CAPACITY,
            mode: StreamingMode::default(),
            pool_capacity: DEFAULT_POOL_CAPACITY,
            monitored: None,
        }
    }
}

// =============================================================================
// Status
// =============================================================================

/// Health view of one monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorStatus {
    /// Instrument being monitored.
    pub instrument: InstrumentCode,
    /// Upstream symbol subscribed to.
    pub symbol: UpstreamSymbol,
    /// Connector state.
    pub state: ConnectionState,
    /// Connector counters.
    pub stats: ConnectorStats,
    /// Ticks retained in the store.
    pub retained_ticks: usize,
}

struct Monitor {
    symbol: UpstreamSymbol,
    connector: Arc<UpstreamConnector>,
    reader: JoinHandle<Result<(), ConnectorError>>,
    writer: JoinHandle<()>,
}

// =============================================================================
// Supervisor
// =============================================================================

/// Starts, tracks and stops upstream connectors.
pub struct Supervisor {
    registry: Arc<InstrumentRegistry>,
    store: Arc<TickStore>,
    config: SupervisorConfig,
    hub: SharedTickHub,
    monitors: Mutex<BTreeMap<InstrumentCode, Monitor>>,
    live_clients: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("instruments", &self.registry.len())
            .field("mode", &self.config.mode)
            .field("monitors", &self.monitors.lock().len())
            .field("live_clients", &self.live_clients.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Create a supervisor. Cancelling `cancel` stops every connector it owns.
    #[must_use]
    pub fn new(
        registry: Arc<InstrumentRegistry>,
        store: Arc<TickStore>,
        config: SupervisorConfig,
        cancel: CancellationToken,
    ) -> Self {
        let hub = Arc::new(TickHub::new(
            registry
                .iter()
                .map(|(code, _)| code.clone())
                .filter(|code| is_monitored(&config, code)),
            config.pool_capacity,
        ));
        Self {
            registry,
            store,
            config,
            hub,
            monitors: Mutex::new(BTreeMap::new()),
            live_clients: Arc::new(AtomicUsize::new(0)),
            cancel,
        }
    }

    /// Instrument registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<InstrumentRegistry> {
        &self.registry
    }

    /// Tick store fed by the monitors.
    #[must_use]
    pub fn store(&self) -> &Arc<TickStore> {
        &self.store
    }

    /// Live client feeding strategy.
    #[must_use]
    pub const fn mode(&self) -> StreamingMode {
        self.config.mode
    }

    /// Whether `instrument` is in the monitored set.
    #[must_use]
    pub fn monitors_instrument(&self, instrument: &InstrumentCode) -> bool {
        self.registry.contains(instrument) && is_monitored(&self.config, instrument)
    }

    /// Start a monitor for every instrument in the monitored set that is not
    /// already running.
    ///
    /// Returns the number of monitors started.
    pub fn start_monitoring(&self) -> usize {
        let mut monitors = self.monitors.lock();
        let mut started = 0;

        for (code, symbol) in self.registry.iter() {
            if !is_monitored(&self.config, code)
                || monitors.contains_key(code)
                || self.cancel.is_cancelled()
            {
                continue;
            }
            monitors.insert(code.clone(), self.spawn_monitor(code, symbol));
            started += 1;
        }

        tracing::info!(
            started,
            total = monitors.len(),
            mode = %self.config.mode,
            "monitoring started"
        );
        started
    }

    fn spawn_monitor(&self, code: &InstrumentCode, symbol: &UpstreamSymbol) -> Monitor {
        let config = self.config.connector.clone().with_role(ConnectorRole::Monitor);
        let connector = Arc::new(UpstreamConnector::new(config, self.cancel.child_token()));
        connector.subscribe([symbol.clone()]);

        let (sink, ticks) = fanout::channel(self.config.fanout_capacity);
        let reader = connector.spawn(sink);
        let writer = tokio::spawn(write_ticks(
            code.clone(),
            ticks,
            Arc::clone(&self.store),
            (self.config.mode == StreamingMode::Pooled).then(|| Arc::clone(&self.hub)),
        ));

        tracing::debug!(
            instrument = %code,
            symbol = %symbol,
            connector_id = %connector.id(),
            "monitor spawned"
        );

        Monitor {
            symbol: symbol.clone(),
            connector,
            reader,
            writer,
        }
    }

    /// Open a live tick feed for one client.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownInstrument`] if the instrument is not
    /// registered, and [`ValidationError::NotMonitored`] in pooled mode when no
    /// monitor feeds it. No upstream connection is attempted in either case.
    pub fn open_live_stream(&self, instrument: &InstrumentCode) -> Result<LiveFeed, ValidationError> {
        let symbol = self
            .registry
            .resolve(instrument)
            .ok_or_else(|| ValidationError::UnknownInstrument(instrument.to_string()))?;

        let source = match self.config.mode {
            StreamingMode::Dedicated => {
                let config = self.config.connector.clone().with_role(ConnectorRole::Live);
                let connector = Arc::new(UpstreamConnector::new(config, self.cancel.child_token()));
                connector.subscribe([symbol.clone()]);
                let ticks = connector.stream(self.config.fanout_capacity);
                tracing::debug!(
                    instrument = %instrument,
                    connector_id = %connector.id(),
                    "dedicated live stream opened"
                );
                FeedSource::Dedicated { connector, ticks }
            }
            StreamingMode::Pooled => {
                let ticks = self
                    .hub
                    .subscribe(instrument)
                    .ok_or_else(|| ValidationError::NotMonitored(instrument.to_string()))?;
                tracing::debug!(instrument = %instrument, "pooled live stream opened");
                FeedSource::Pooled { ticks }
            }
        };

        self.live_clients.fetch_add(1, Ordering::Relaxed);
        metrics::adjust_live_clients(1.0);

        Ok(LiveFeed {
            instrument: instrument.clone(),
            source,
            live_clients: Arc::clone(&self.live_clients),
        })
    }

    /// State of every monitor, in instrument order.
    #[must_use]
    pub fn monitor_states(&self) -> Vec<MonitorStatus> {
        self.monitors
            .lock()
            .iter()
            .map(|(code, monitor)| MonitorStatus {
                instrument: code.clone(),
                symbol: monitor.symbol.clone(),
                state: monitor.connector.state(),
                stats: monitor.connector.stats(),
                retained_ticks: self.store.len(code),
            })
            .collect()
    }

    /// Whether at least one monitor is streaming.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.monitors
            .lock()
            .values()
            .any(|m| m.connector.state() == ConnectionState::Streaming)
    }

    /// Connected live clients.
    #[must_use]
    pub fn live_clients(&self) -> usize {
        self.live_clients.load(Ordering::Relaxed)
    }

    /// Tick hub receiver counts.
    #[must_use]
    pub fn hub_stats(&self) -> HubStats {
        self.hub.stats()
    }

    /// Stop every connector and wait for the monitor tasks to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let monitors = std::mem::take(&mut *self.monitors.lock());
        tracing::info!(monitors = monitors.len(), "supervisor shutting down");

        for (code, monitor) in monitors {
            monitor.connector.close();
            if let Ok(Err(e)) = monitor.reader.await {
                tracing::debug!(instrument = %code, error = %e, "monitor ended with error");
            }
            let _ = monitor.writer.await;
        }
    }
}

fn is_monitored(config: &SupervisorConfig, code: &InstrumentCode) -> bool {
    config
        .monitored
        .as_ref()
        .is_none_or(|codes| codes.contains(code))
}

async fn write_ticks(
    code: InstrumentCode,
    mut ticks: FanoutReceiver,
    store: Arc<TickStore>,
    hub: Option<SharedTickHub>,
) {
    while let Some(tick) = ticks.recv().await {
        let age = (Utc::now() - tick.timestamp()).to_std().unwrap_or_default();
        match &hub {
            Some(hub) => {
                store.append(&code, tick.clone());
                hub.publish(&code, tick);
            }
            None => store.append(&code, tick),
        }
        metrics::record_tick_stored(age);
    }
    tracing::debug!(instrument = %code, "store writer finished");
}

// =============================================================================
// Live Feed
// =============================================================================

enum FeedSource {
    Dedicated {
        connector: Arc<UpstreamConnector>,
        ticks: FanoutReceiver,
    },
    Pooled {
        ticks: broadcast::Receiver<Tick>,
    },
}

/// Tick feed for one live client.
///
/// Dropping the feed closes its dedicated connector, or releases its hub
/// subscription in pooled mode.
pub struct LiveFeed {
    instrument: InstrumentCode,
    source: FeedSource,
    live_clients: Arc<AtomicUsize>,
}

impl fmt::Debug for LiveFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveFeed")
            .field("instrument", &self.instrument)
            .field("mode", &self.mode())
            .finish_non_exhaustive()
    }
}

impl LiveFeed {
    /// Instrument this feed carries.
    #[must_use]
    pub const fn instrument(&self) -> &InstrumentCode {
        &self.instrument
    }

    /// How this feed is sourced.
    #[must_use]
    pub const fn mode(&self) -> StreamingMode {
        match self.source {
            FeedSource::Dedicated { .. } => StreamingMode::Dedicated,
            FeedSource::Pooled { .. } => StreamingMode::Pooled,
        }
    }

    /// State of the dedicated connector, if any.
    #[must_use]
    pub fn connector_state(&self) -> Option<ConnectionState> {
        match &self.source {
            FeedSource::Dedicated { connector, .. } => Some(connector.state()),
            FeedSource::Pooled { .. } => None,
        }
    }

    /// Next tick, or `None` once the feed has ended.
    ///
    /// A pooled receiver that fell behind skips the ticks it missed.
    pub async fn next(&mut self) -> Option<Tick> {
        match &mut self.source {
            FeedSource::Dedicated { ticks, .. } => ticks.recv().await,
            FeedSource::Pooled { ticks } => loop {
                match ticks.recv().await {
                    Ok(tick) => return Some(tick),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            instrument = %self.instrument,
                            skipped,
                            "live client lagging, ticks skipped"
                        );
                    }
                    Err(RecvError::Closed) => return None,
                }
            },
        }
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        if let FeedSource::Dedicated { connector, .. } = &self.source {
            connector.close();
        }
        self.live_clients.fetch_sub(1, Ordering::Relaxed);
        metrics::adjust_live_clients(-1.0);
        tracing::debug!(instrument = %self.instrument, "live stream closed");
    }
}
