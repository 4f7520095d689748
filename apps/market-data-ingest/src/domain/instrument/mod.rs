//! Instruments and Contracts
//!
//! A contract maps a symbol to a tradable instrument on the upstream feed.
//! Contracts are registered once per symbol before any subscription.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::streaming::EventError;

/// A symbol string (stock ticker).
pub type Symbol = String;

/// Maximum accepted symbol length.
pub const MAX_SYMBOL_LEN: usize = 20;

/// Default routing exchange.
pub const DEFAULT_EXCHANGE: &str = "SMART";

/// Default contract currency.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Normalize a user-supplied symbol: trimmed and upper-cased.
///
/// # Errors
///
/// Returns [`EventError::EmptySymbol`] or [`EventError::SymbolTooLong`].
pub fn normalize_symbol(raw: &str) -> Result<Symbol, EventError> {
    let symbol = raw.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(EventError::EmptySymbol);
    }
    if symbol.chars().count() > MAX_SYMBOL_LEN {
        return Err(EventError::SymbolTooLong(symbol));
    }
    Ok(symbol)
}

/// What the caller asks the feed to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractSpec {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Routing exchange.
    pub exchange: String,
    /// Trading currency.
    pub currency: String,
}

impl ContractSpec {
    /// Create a stock contract spec.
    #[must_use]
    pub fn stock(
        symbol: impl Into<Symbol>,
        exchange: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
            currency: currency.into(),
        }
    }
}

/// A contract resolved by the feed into a tradable instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contract {
    /// The spec the contract was defined from.
    pub spec: ContractSpec,
    /// Feed-assigned instrument identifier.
    pub instrument_id: u64,
}

impl Contract {
    /// Instrument symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.spec.symbol
    }
}

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} ({}) #{}",
            self.spec.symbol, self.spec.exchange, self.spec.currency, self.instrument_id
        )
    }
}
