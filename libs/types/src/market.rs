//! Market instruments, quotes and live tick messages
//!
//! - [`Symbol`]: normalised ticker symbol (`AAPL`, `EUR.USD`)
//! - [`ContractSpec`]: upstream contract description derived from a symbol
//! - [`MarketQuote`]: a persisted quote row, keyed by `(symbol, timestamp)`
//! - [`UpstreamTick`] / [`TickMessage`]: the ephemeral broadcast path

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::FeedError;
use crate::ids::TickerId;

/// Maximum accepted symbol length, including the `.` of currency pairs.
pub const MAX_SYMBOL_LEN: usize = 10;

/// Normalised instrument symbol.
///
/// Always upper-case, 1..=10 characters from `A-Z` and `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Trim, upper-case and validate a raw symbol.
    pub fn parse(raw: &str) -> Result<Self, FeedError> {
        let normalised = raw.trim().to_ascii_uppercase();
        let valid_chars = normalised.chars().all(|c| c.is_ascii_uppercase() || c == '.');
        if normalised.is_empty() || normalised.len() > MAX_SYMBOL_LEN || !valid_chars {
            return Err(FeedError::InvalidInput(format!("invalid symbol: {raw:?}")));
        }
        if normalised.starts_with('.') || normalised.ends_with('.') {
            return Err(FeedError::InvalidInput(format!("invalid symbol: {raw:?}")));
        }
        Ok(Self(normalised))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split a currency pair (`EUR.USD`) into base and quote.
    pub fn currency_pair(&self) -> Option<(&str, &str)> {
        self.0.split_once('.')
    }
}

impl FromStr for Symbol {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = FeedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Upstream security type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SecurityType {
    /// Equity routed through the smart router.
    Stk,
    /// Spot currency pair.
    Cash,
}

/// Contract description sent with every upstream subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractSpec {
    pub symbol: String,
    pub sec_type: SecurityType,
    pub exchange: String,
    pub currency: String,
}

impl ContractSpec {
    /// Derive the contract for a symbol.
    ///
    /// `EUR.USD` becomes a `CASH` contract on `IDEALPRO` quoted in `USD`;
    /// everything else is a `STK` on `SMART` in `USD`.
    pub fn for_symbol(symbol: &Symbol) -> Self {
        match symbol.currency_pair() {
            Some((base, quote)) => Self {
                symbol: base.to_string(),
                sec_type: SecurityType::Cash,
                exchange: "IDEALPRO".to_string(),
                currency: quote.to_string(),
            },
            None => Self {
                symbol: symbol.as_str().to_string(),
                sec_type: SecurityType::Stk,
                exchange: "SMART".to_string(),
                currency: "USD".to_string(),
            },
        }
    }
}

/// One quote row as stored and served by the query path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketQuote {
    pub symbol: Symbol,
    pub price: Decimal,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub previous_close: Option<Decimal>,
    pub change: Option<Decimal>,
    pub change_percent: Option<Decimal>,
    pub volume: Option<u64>,
    pub timestamp: DateTime<Utc>,
    /// Provider that produced the row.
    pub source: String,
    /// Set only by the deterministic fallback generator.
    pub is_mock_data: bool,
}

impl MarketQuote {
    /// Upsert key: one row per symbol and timestamp.
    pub fn key(&self) -> (Symbol, DateTime<Utc>) {
        (self.symbol.clone(), self.timestamp)
    }
}

/// Payload of one upstream tick event.
#[derive(Debug, Clone, PartialEq)]
pub enum TickValue {
    Price(Decimal),
    Size(Decimal),
    Text(String),
}

/// Raw tick as emitted by the upstream gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamTick {
    pub ticker_id: TickerId,
    /// Upstream tick-type code (bid, ask, last, ...).
    pub field: u32,
    pub value: TickValue,
}

/// Message broadcast to downstream subscribers. Never persisted.
///
/// Serialized as `{"t": "tickPrice", "tickerId": 1001, ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TickMessage {
    TickPrice {
        ticker_id: TickerId,
        symbol: Option<Symbol>,
        field: u32,
        #[serde(with = "rust_decimal::serde::float")]
        price: Decimal,
        ts: i64,
    },
    TickSize {
        ticker_id: TickerId,
        symbol: Option<Symbol>,
        field: u32,
        #[serde(with = "rust_decimal::serde::float")]
        size: Decimal,
        ts: i64,
    },
    TickString {
        ticker_id: TickerId,
        symbol: Option<Symbol>,
        field: u32,
        value: String,
        ts: i64,
    },
    Heartbeat {
        ts: i64,
    },
}

impl TickMessage {
    /// Build the broadcast message for an upstream tick.
    pub fn from_upstream(tick: UpstreamTick, symbol: Option<Symbol>, ts: i64) -> Self {
        let UpstreamTick { ticker_id, field, value } = tick;
        match value {
            TickValue::Price(price) => Self::TickPrice { ticker_id, symbol, field, price, ts },
            TickValue::Size(size) => Self::TickSize { ticker_id, symbol, field, size, ts },
            TickValue::Text(value) => Self::TickString { ticker_id, symbol, field, value, ts },
        }
    }

    pub fn heartbeat(ts: i64) -> Self {
        Self::Heartbeat { ts }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Heartbeat { .. })
    }
}
