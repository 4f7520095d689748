//! Mock feed for testing.
//!
//! A deterministic, manually driven feed: tests set quotes, append ticks
//! and push ladders, inject failures, and inspect the log of every call the
//! orchestrator made.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::memory::{QuoteCell, TickList};
use crate::application::ports::{
    ConnectionParams, DepthBook, DepthFeed, FeedConnector, FeedError, FeedHandle, FeedSession,
    HistoricalRequest, QuoteSource, RawBar, TickSource,
};
use crate::domain::instrument::{Contract, ContractSpec, Symbol};
use crate::domain::streaming::TickKind;

const DEPTH_CHANNEL_CAPACITY: usize = 64;

/// One call received by the mock feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCall {
    /// `connect`.
    Connect,
    /// `define_contract`.
    DefineContract(Symbol),
    /// `request_market_data`.
    MarketData(Symbol, FeedHandle),
    /// `request_tick_by_tick`.
    TickByTick(Symbol, TickKind, FeedHandle),
    /// `request_market_depth`.
    MarketDepth {
        /// Contract symbol.
        symbol: Symbol,
        /// Rows requested.
        rows: usize,
        /// Smart depth requested.
        smart: bool,
    },
    /// `cancel`.
    Cancel(FeedHandle),
    /// `request_historical_bars`.
    Historical(Symbol, HistoricalRequest),
    /// `request_fundamentals`.
    Fundamentals(Symbol, String),
    /// `disconnect`.
    Disconnect,
}

#[derive(Debug, Default)]
struct MockState {
    next_handle: u64,
    next_instrument: u64,
    calls: Vec<FeedCall>,
    connected: bool,
    connect_failures: u32,
    connect_delay: Option<Duration>,
    rejected_contracts: HashSet<Symbol>,
    smart_depth_unsupported: HashSet<Symbol>,
    failing_cancels: HashSet<Symbol>,
    quotes: HashMap<Symbol, QuoteCell>,
    ticks: HashMap<(Symbol, TickKind), TickList>,
    depth: HashMap<Symbol, (FeedHandle, mpsc::Sender<DepthBook>)>,
    open: HashMap<FeedHandle, Symbol>,
    open_at_disconnect: Option<usize>,
    history: HashMap<Symbol, Vec<RawBar>>,
    fundamentals: HashMap<(Symbol, String), String>,
}

impl MockState {
    fn allocate_handle(&mut self, symbol: &str) -> FeedHandle {
        self.next_handle += 1;
        let handle = FeedHandle(self.next_handle);
        self.open.insert(handle, symbol.to_string());
        handle
    }

    fn ensure_connected(&self) -> Result<(), FeedError> {
        if self.connected {
            Ok(())
        } else {
            Err(FeedError::Disconnected)
        }
    }
}

/// Mock feed: connector and session in one.
///
/// Clones share state, so a test keeps one clone to drive the feed while
/// the orchestrator owns another.
#[derive(Debug, Clone, Default)]
pub struct MockFeed {
    state: Arc<Mutex<MockState>>,
}

impl MockFeed {
    /// Create a new mock feed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Failure injection
    // -------------------------------------------------------------------------

    /// Make the next `count` connection attempts fail.
    pub fn fail_connects(&self, count: u32) {
        self.state.lock().connect_failures = count;
    }

    /// Delay every connection attempt.
    pub fn delay_connect(&self, delay: Duration) {
        self.state.lock().connect_delay = Some(delay);
    }

    /// Reject contract definition for a symbol.
    pub fn reject_contract(&self, symbol: &str) {
        self.state.lock().rejected_contracts.insert(symbol.to_string());
    }

    /// Report smart depth as unavailable for a symbol.
    pub fn without_smart_depth(&self, symbol: &str) {
        self.state
            .lock()
            .smart_depth_unsupported
            .insert(symbol.to_string());
    }

    /// Make cancellation of every subscription of a symbol fail.
    pub fn fail_cancels_for(&self, symbol: &str) {
        self.state.lock().failing_cancels.insert(symbol.to_string());
    }

    // -------------------------------------------------------------------------
    // Data
    // -------------------------------------------------------------------------

    /// Quote state of a symbol, created on first use.
    #[must_use]
    pub fn quote(&self, symbol: &str) -> QuoteCell {
        let mut state = self.state.lock();
        if let Some(cell) = state.quotes.get(symbol) {
            return cell.clone();
        }
        let cell = QuoteCell::new(FeedHandle(0));
        state.quotes.insert(symbol.to_string(), cell.clone());
        cell
    }

    /// Tick list of a symbol and kind, created on first use.
    #[must_use]
    pub fn ticks(&self, symbol: &str, kind: TickKind) -> TickList {
        self.state
            .lock()
            .ticks
            .entry((symbol.to_string(), kind))
            .or_insert_with(|| TickList::new(FeedHandle(0)))
            .clone()
    }

    /// Push a full ladder to the depth subscription of a symbol.
    ///
    /// Returns `false` when no depth subscription is open for it.
    pub async fn push_depth(&self, symbol: &str, book: DepthBook) -> bool {
        let sender = self.state.lock().depth.get(symbol).map(|(_, tx)| tx.clone());
        match sender {
            Some(tx) => tx.send(book).await.is_ok(),
            None => false,
        }
    }

    /// Bars returned by historical requests for a symbol.
    pub fn set_history(&self, symbol: &str, bars: Vec<RawBar>) {
        self.state.lock().history.insert(symbol.to_string(), bars);
    }

    /// Payload returned by fundamentals requests.
    pub fn set_fundamentals(&self, symbol: &str, report_kind: &str, payload: &str) {
        self.state.lock().fundamentals.insert(
            (symbol.to_string(), report_kind.to_string()),
            payload.to_string(),
        );
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// Every call received so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<FeedCall> {
        self.state.lock().calls.clone()
    }

    /// Feed subscriptions currently open.
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.state.lock().open.len()
    }

    /// Open subscriptions at the moment `disconnect` was called.
    #[must_use]
    pub fn open_handles_at_disconnect(&self) -> Option<usize> {
        self.state.lock().open_at_disconnect
    }

    /// Whether a session is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }
}

#[async_trait]
impl FeedConnector for MockFeed {
    async fn connect(&self, _params: &ConnectionParams) -> Result<Arc<dyn FeedSession>, FeedError> {
        let delay = {
            let mut state = self.state.lock();
            state.calls.push(FeedCall::Connect);
            state.connect_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(FeedError::ConnectionFailed("connection refused".to_string()));
        }
        state.connected = true;
        state.open_at_disconnect = None;
        drop(state);
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl FeedSession for MockFeed {
    async fn define_contract(&self, spec: &ContractSpec) -> Result<Contract, FeedError> {
        let mut state = self.state.lock();
        state.calls.push(FeedCall::DefineContract(spec.symbol.clone()));
        state.ensure_connected()?;
        if state.rejected_contracts.contains(&spec.symbol) {
            return Err(FeedError::RequestFailed(format!(
                "no security definition for {}",
                spec.symbol
            )));
        }
        state.next_instrument += 1;
        Ok(Contract {
            spec: spec.clone(),
            instrument_id: state.next_instrument,
        })
    }

    async fn request_market_data(
        &self,
        contract: &Contract,
    ) -> Result<Arc<dyn QuoteSource>, FeedError> {
        let cell = self.quote(contract.symbol());
        let mut state = self.state.lock();
        state.ensure_connected()?;
        let handle = state.allocate_handle(contract.symbol());
        state
            .calls
            .push(FeedCall::MarketData(contract.symbol().to_string(), handle));
        Ok(Arc::new(cell.rebind(handle)))
    }

    async fn request_tick_by_tick(
        &self,
        contract: &Contract,
        kind: TickKind,
    ) -> Result<Arc<dyn TickSource>, FeedError> {
        let list = self.ticks(contract.symbol(), kind);
        let mut state = self.state.lock();
        state.ensure_connected()?;
        let handle = state.allocate_handle(contract.symbol());
        state.calls.push(FeedCall::TickByTick(
            contract.symbol().to_string(),
            kind,
            handle,
        ));
        Ok(Arc::new(list.rebind(handle)))
    }

    async fn request_market_depth(
        &self,
        contract: &Contract,
        rows: usize,
        smart: bool,
    ) -> Result<DepthFeed, FeedError> {
        let mut state = self.state.lock();
        let symbol = contract.symbol().to_string();
        state.calls.push(FeedCall::MarketDepth {
            symbol: symbol.clone(),
            rows,
            smart,
        });
        state.ensure_connected()?;
        if smart && state.smart_depth_unsupported.contains(&symbol) {
            return Err(FeedError::CapabilityUnavailable {
                capability: "smart_depth",
                symbol,
                reason: "smart depth not offered for this contract".to_string(),
            });
        }
        let handle = state.allocate_handle(&symbol);
        let (tx, rx) = mpsc::channel(DEPTH_CHANNEL_CAPACITY);
        state.depth.insert(symbol, (handle, tx));
        Ok(DepthFeed {
            handle,
            updates: rx,
        })
    }

    async fn cancel(&self, handle: FeedHandle) -> Result<(), FeedError> {
        let mut state = self.state.lock();
        state.calls.push(FeedCall::Cancel(handle));
        let symbol = state
            .open
            .remove(&handle)
            .ok_or(FeedError::UnknownHandle(handle))?;
        if state.depth.get(&symbol).is_some_and(|(h, _)| *h == handle) {
            state.depth.remove(&symbol);
        }
        if state.failing_cancels.contains(&symbol) {
            return Err(FeedError::RequestFailed(format!(
                "cancel rejected for {symbol}"
            )));
        }
        Ok(())
    }

    async fn request_historical_bars(
        &self,
        contract: &Contract,
        request: &HistoricalRequest,
    ) -> Result<Vec<RawBar>, FeedError> {
        let mut state = self.state.lock();
        state.calls.push(FeedCall::Historical(
            contract.symbol().to_string(),
            request.clone(),
        ));
        state.ensure_connected()?;
        Ok(state
            .history
            .get(contract.symbol())
            .cloned()
            .unwrap_or_default())
    }

    async fn request_fundamentals(
        &self,
        contract: &Contract,
        report_kind: &str,
    ) -> Result<String, FeedError> {
        let mut state = self.state.lock();
        state.calls.push(FeedCall::Fundamentals(
            contract.symbol().to_string(),
            report_kind.to_string(),
        ));
        state.ensure_connected()?;
        state
            .fundamentals
            .get(&(contract.symbol().to_string(), report_kind.to_string()))
            .cloned()
            .ok_or_else(|| {
                FeedError::RequestFailed(format!(
                    "no {report_kind} report for {}",
                    contract.symbol()
                ))
            })
    }

    async fn disconnect(&self) {
        let mut state = self.state.lock();
        state.calls.push(FeedCall::Disconnect);
        state.open_at_disconnect = Some(state.open.len());
        state.connected = false;
        state.depth.clear();
    }
}
