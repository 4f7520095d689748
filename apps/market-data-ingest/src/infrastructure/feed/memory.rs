//! In-memory stream handles.
//!
//! [`QuoteCell`] and [`TickList`] hold the state a broker client would
//! update from its socket. The mock and simulated feeds write into them;
//! monitors read them through the [`QuoteSource`] and [`TickSource`]
//! ports.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::application::ports::{
    FeedError, FeedHandle, QuoteSource, RawQuote, RawTick, TickSource, TickWindow,
};

// =============================================================================
// Quote Cell
// =============================================================================

#[derive(Debug)]
struct QuoteState {
    quote: RawQuote,
    pending_failures: u32,
    disconnected: bool,
}

/// Current top-of-book state of one symbol.
///
/// Clones share state. [`QuoteCell::rebind`] shares state under another
/// feed handle.
#[derive(Debug, Clone)]
pub struct QuoteCell {
    handle: FeedHandle,
    state: Arc<Mutex<QuoteState>>,
}

impl QuoteCell {
    /// Create a cell with every field unknown.
    #[must_use]
    pub fn new(handle: FeedHandle) -> Self {
        Self {
            handle,
            state: Arc::new(Mutex::new(QuoteState {
                quote: RawQuote::unknown(),
                pending_failures: 0,
                disconnected: false,
            })),
        }
    }

    /// Same state, different handle.
    #[must_use]
    pub fn rebind(&self, handle: FeedHandle) -> Self {
        Self {
            handle,
            state: Arc::clone(&self.state),
        }
    }

    /// Replace the current quote.
    pub fn set(&self, quote: RawQuote) {
        self.state.lock().quote = quote;
    }

    /// Modify the current quote in place.
    pub fn update(&self, f: impl FnOnce(&mut RawQuote)) {
        f(&mut self.state.lock().quote);
    }

    /// Current quote.
    #[must_use]
    pub fn current(&self) -> RawQuote {
        self.state.lock().quote
    }

    /// Make the next `count` reads fail with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.state.lock().pending_failures = count;
    }

    /// Make every further read report a lost session.
    pub fn disconnect(&self) {
        self.state.lock().disconnected = true;
    }
}

impl QuoteSource for QuoteCell {
    fn handle(&self) -> FeedHandle {
        self.handle
    }

    fn read(&self) -> Result<RawQuote, FeedError> {
        let mut state = self.state.lock();
        if state.disconnected {
            return Err(FeedError::Disconnected);
        }
        if state.pending_failures > 0 {
            state.pending_failures -= 1;
            return Err(FeedError::TransientRead("quote fields unavailable".to_string()));
        }
        Ok(state.quote)
    }
}

// =============================================================================
// Tick List
// =============================================================================

/// Append-only tick list of one symbol and tick kind.
#[derive(Debug, Clone)]
pub struct TickList {
    handle: FeedHandle,
    ticks: Arc<Mutex<Vec<RawTick>>>,
}

impl TickList {
    /// Create an empty list.
    #[must_use]
    pub fn new(handle: FeedHandle) -> Self {
        Self {
            handle,
            ticks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Same list, different handle.
    #[must_use]
    pub fn rebind(&self, handle: FeedHandle) -> Self {
        Self {
            handle,
            ticks: Arc::clone(&self.ticks),
        }
    }

    /// Append one tick.
    pub fn push(&self, tick: RawTick) {
        self.ticks.lock().push(tick);
    }

    /// Append ticks in order.
    pub fn extend(&self, ticks: impl IntoIterator<Item = RawTick>) {
        self.ticks.lock().extend(ticks);
    }

    /// Replace the whole list, as a feed does when it resets a stream.
    pub fn replace(&self, ticks: Vec<RawTick>) {
        *self.ticks.lock() = ticks;
    }

    /// Current length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ticks.lock().len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TickSource for TickList {
    fn handle(&self) -> FeedHandle {
        self.handle
    }

    fn read_from(&self, from: usize) -> TickWindow {
        let ticks = self.ticks.lock();
        TickWindow {
            len: ticks.len(),
            ticks: ticks.get(from..).map(<[RawTick]>::to_vec).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_cell_failures_are_consumed() {
        let cell = QuoteCell::new(FeedHandle(1));
        cell.fail_next(2);
        assert!(matches!(cell.read(), Err(FeedError::TransientRead(_))));
        assert!(matches!(cell.read(), Err(FeedError::TransientRead(_))));
        assert!(cell.read().is_ok());
    }

    #[test]
    fn rebound_cell_shares_state() {
        let cell = QuoteCell::new(FeedHandle(1));
        let other = cell.rebind(FeedHandle(2));
        cell.update(|q| q.bid = 5.0);
        assert!((other.read().unwrap().bid - 5.0).abs() < f64::EPSILON);
        assert_eq!(other.handle(), FeedHandle(2));
    }

    #[test]
    fn tick_window_past_the_end_is_empty() {
        let list = TickList::new(FeedHandle(1));
        list.extend([RawTick::new(None, 1.0, 1.0), RawTick::new(None, 2.0, 1.0)]);

        let window = list.read_from(1);
        assert_eq!(window.len, 2);
        assert_eq!(window.ticks.len(), 1);

        let beyond = list.read_from(5);
        assert_eq!(beyond.len, 2);
        assert!(beyond.ticks.is_empty());
    }
}
