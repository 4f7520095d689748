//! Simulated feed.
//!
//! Random-walk market data for running the service without a broker
//! connection. Every subscription gets its own generator task that writes
//! into the same in-memory handles a real client would update, and stops
//! when the subscription is cancelled or the session disconnects.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::memory::{QuoteCell, TickList};
use crate::application::ports::{
    ConnectionParams, DepthBook, DepthFeed, FeedConnector, FeedError, FeedHandle, FeedSession,
    HistoricalRequest, QuoteSource, RawBar, RawLevel, RawQuote, RawTick, TickSource,
};
use crate::domain::instrument::{Contract, ContractSpec};
use crate::domain::streaming::TickKind;

const TICK_SIZE: f64 = 0.01;

/// Generator settings.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// How often quotes move.
    pub quote_interval: Duration,
    /// How often ticks are appended.
    pub tick_interval: Duration,
    /// How often a ladder is pushed.
    pub depth_interval: Duration,
    /// Whether smart depth is offered.
    pub smart_depth: bool,
    /// RNG seed; random when unset.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            quote_interval: Duration::from_millis(250),
            tick_interval: Duration::from_millis(200),
            depth_interval: Duration::from_millis(500),
            smart_depth: false,
            seed: None,
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    connected: bool,
    next_handle: u64,
    next_instrument: u64,
    generators: HashMap<FeedHandle, CancellationToken>,
}

/// Random-walk feed: connector and session in one.
#[derive(Debug, Clone, Default)]
pub struct SimulatedFeed {
    config: SimulationConfig,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedFeed {
    /// Create a simulated feed.
    #[must_use]
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            state: Arc::default(),
        }
    }

    fn rng(&self, handle: FeedHandle) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ handle.0),
            None => StdRng::from_os_rng(),
        }
    }

    fn open(&self) -> Result<(FeedHandle, CancellationToken), FeedError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(FeedError::Disconnected);
        }
        state.next_handle += 1;
        let handle = FeedHandle(state.next_handle);
        let token = CancellationToken::new();
        state.generators.insert(handle, token.clone());
        Ok((handle, token))
    }
}

/// Deterministic starting price per symbol.
fn base_price(symbol: &str) -> f64 {
    let seed: u32 = symbol.bytes().map(u32::from).sum();
    50.0 + f64::from(seed % 400)
}

fn round_to_tick(price: f64) -> f64 {
    (price / TICK_SIZE).round() * TICK_SIZE
}

fn walk(rng: &mut StdRng, mid: f64) -> f64 {
    let step = rng.random_range(-5_i32..=5);
    round_to_tick(f64::from(step).mul_add(TICK_SIZE, mid).max(TICK_SIZE))
}

#[async_trait]
impl FeedConnector for SimulatedFeed {
    async fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn FeedSession>, FeedError> {
        self.state.lock().connected = true;
        info!(endpoint = %params, "Simulated feed connected, endpoint is not dialed");
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl FeedSession for SimulatedFeed {
    async fn define_contract(&self, spec: &ContractSpec) -> Result<Contract, FeedError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(FeedError::Disconnected);
        }
        state.next_instrument += 1;
        Ok(Contract {
            spec: spec.clone(),
            instrument_id: 100_000 + state.next_instrument,
        })
    }

    async fn request_market_data(
        &self,
        contract: &Contract,
    ) -> Result<Arc<dyn QuoteSource>, FeedError> {
        let (handle, token) = self.open()?;
        let cell = QuoteCell::new(handle);
        let writer = cell.clone();
        let mut rng = self.rng(handle);
        let interval = self.config.quote_interval;
        let mut mid = base_price(contract.symbol());
        let mut volume = 0.0;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                // Leave some samples unchanged so consumers see repeats.
                if rng.random_bool(0.3) {
                    continue;
                }
                mid = walk(&mut rng, mid);
                volume += f64::from(rng.random_range(1..=50_u32)) * 100.0;
                writer.set(RawQuote {
                    bid: round_to_tick(mid - TICK_SIZE),
                    ask: round_to_tick(mid + TICK_SIZE),
                    last: mid,
                    volume,
                    time: Some(Utc::now()),
                });
            }
        });

        Ok(Arc::new(cell))
    }

    async fn request_tick_by_tick(
        &self,
        contract: &Contract,
        kind: TickKind,
    ) -> Result<Arc<dyn TickSource>, FeedError> {
        let (handle, token) = self.open()?;
        let list = TickList::new(handle);
        let writer = list.clone();
        let mut rng = self.rng(handle);
        let interval = self.config.tick_interval;
        let mut price = base_price(contract.symbol());

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let count = rng.random_range(0_u32..=3);
                for _ in 0..count {
                    price = walk(&mut rng, price);
                    let size = match kind {
                        TickKind::Midpoint => f64::NAN,
                        _ => f64::from(rng.random_range(1..=10_u32)) * 100.0,
                    };
                    writer.push(RawTick::new(Some(Utc::now()), price, size));
                }
            }
        });

        Ok(Arc::new(list))
    }

    async fn request_market_depth(
        &self,
        contract: &Contract,
        rows: usize,
        smart: bool,
    ) -> Result<DepthFeed, FeedError> {
        if smart && !self.config.smart_depth {
            return Err(FeedError::CapabilityUnavailable {
                capability: "smart_depth",
                symbol: contract.symbol().to_string(),
                reason: "simulated feed has no smart depth".to_string(),
            });
        }
        let (handle, token) = self.open()?;
        let (tx, rx) = mpsc::channel(16);
        let mut rng = self.rng(handle);
        let interval = self.config.depth_interval;
        let mut mid = base_price(contract.symbol());

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                mid = walk(&mut rng, mid);
                let occupied = rng.random_range(1..=rows.max(1));
                let mut ladder = |direction: f64| -> Vec<RawLevel> {
                    (1..=occupied)
                        .map(|i| {
                            #[allow(clippy::cast_precision_loss)]
                            let offset = i as f64 * TICK_SIZE;
                            let size = f64::from(rng.random_range(1..=20_u32)) * 100.0;
                            RawLevel::new(round_to_tick(direction.mul_add(offset, mid)), size)
                        })
                        .collect()
                };
                let book = DepthBook {
                    bids: ladder(-1.0),
                    asks: ladder(1.0),
                };
                if tx.send(book).await.is_err() {
                    break;
                }
            }
        });

        Ok(DepthFeed {
            handle,
            updates: rx,
        })
    }

    async fn cancel(&self, handle: FeedHandle) -> Result<(), FeedError> {
        let token = self
            .state
            .lock()
            .generators
            .remove(&handle)
            .ok_or(FeedError::UnknownHandle(handle))?;
        token.cancel();
        debug!(%handle, "Simulated subscription cancelled");
        Ok(())
    }

    async fn request_historical_bars(
        &self,
        contract: &Contract,
        request: &HistoricalRequest,
    ) -> Result<Vec<RawBar>, FeedError> {
        if !self.state.lock().connected {
            return Err(FeedError::Disconnected);
        }
        let mut rng = self.rng(FeedHandle(contract.instrument_id));
        let mut close = base_price(contract.symbol());
        let start = Utc::now() - TimeDelta::minutes(60);

        let bars = (0..60)
            .map(|minute| {
                let open = close;
                close = walk(&mut rng, open);
                let high = open.max(close) + TICK_SIZE * f64::from(rng.random_range(0..=3_u32));
                let low = open.min(close) - TICK_SIZE * f64::from(rng.random_range(0..=3_u32));
                RawBar {
                    date: start + TimeDelta::minutes(minute),
                    open,
                    high: round_to_tick(high),
                    low: round_to_tick(low),
                    close,
                    volume: f64::from(rng.random_range(10..=500_u32)) * 100.0,
                    bar_count: Some(i64::from(rng.random_range(5..=200_u32))),
                    average: Some(round_to_tick(f64::midpoint(open, close))),
                }
            })
            .collect();

        debug!(
            symbol = %contract.symbol(),
            duration = %request.duration,
            bar_size = %request.bar_size,
            "Simulated historical bars generated"
        );
        Ok(bars)
    }

    async fn request_fundamentals(
        &self,
        contract: &Contract,
        report_kind: &str,
    ) -> Result<String, FeedError> {
        if !self.state.lock().connected {
            return Err(FeedError::Disconnected);
        }
        Ok(format!(
            "<{report_kind} symbol=\"{}\" exchange=\"{}\" generated=\"{}\"/>",
            contract.symbol(),
            contract.spec.exchange,
            Utc::now().to_rfc3339()
        ))
    }

    async fn disconnect(&self) {
        let mut state = self.state.lock();
        state.connected = false;
        for (_, token) in state.generators.drain() {
            token.cancel();
        }
        info!("Simulated feed disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::instrument::{DEFAULT_CURRENCY, DEFAULT_EXCHANGE};

    fn seeded() -> SimulatedFeed {
        SimulatedFeed::new(SimulationConfig {
            quote_interval: Duration::from_millis(10),
            tick_interval: Duration::from_millis(10),
            depth_interval: Duration::from_millis(10),
            smart_depth: false,
            seed: Some(7),
        })
    }

    async fn contract(feed: &SimulatedFeed, symbol: &str) -> Contract {
        feed.connect(&ConnectionParams::default()).await.unwrap();
        feed.define_contract(&ContractSpec::stock(symbol, DEFAULT_EXCHANGE, DEFAULT_CURRENCY))
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_accumulate_until_cancelled() {
        let feed = seeded();
        let contract = contract(&feed, "AAPL").await;
        let ticks = feed
            .request_tick_by_tick(&contract, TickKind::Last)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(505)).await;
        feed.cancel(ticks.handle()).await.unwrap();
        let len = ticks.read_from(0).len;
        assert!(len > 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ticks.read_from(0).len, len);
    }

    #[tokio::test(start_paused = true)]
    async fn depth_ladders_are_bounded_by_rows() {
        let feed = seeded();
        let contract = contract(&feed, "MSFT").await;
        let mut depth = feed.request_market_depth(&contract, 3, false).await.unwrap();

        let book = depth.updates.recv().await.unwrap();
        assert!((1..=3).contains(&book.bids.len()));
        assert_eq!(book.bids.len(), book.asks.len());
        assert!(book.bids[0].price < book.asks[0].price);
    }

    #[tokio::test]
    async fn smart_depth_is_unavailable_by_default() {
        let feed = seeded();
        let contract = contract(&feed, "MSFT").await;
        let err = feed.request_market_depth(&contract, 10, true).await.unwrap_err();
        assert!(matches!(err, FeedError::CapabilityUnavailable { .. }));
    }

    #[tokio::test]
    async fn historical_bars_respect_invariants() {
        let feed = seeded();
        let contract = contract(&feed, "AAPL").await;
        let bars = feed
            .request_historical_bars(&contract, &HistoricalRequest::default())
            .await
            .unwrap();

        assert_eq!(bars.len(), 60);
        assert!(bars.iter().all(|b| b.high >= b.low && b.volume >= 0.0));
        assert!(bars.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[tokio::test]
    async fn disconnect_stops_generators_and_requests() {
        let feed = seeded();
        let contract = contract(&feed, "AAPL").await;
        let quotes = feed.request_market_data(&contract).await.unwrap();

        feed.disconnect().await;

        assert_eq!(
            feed.cancel(quotes.handle()).await,
            Err(FeedError::UnknownHandle(quotes.handle()))
        );
        assert!(feed.request_market_data(&contract).await.is_err());
    }
}
