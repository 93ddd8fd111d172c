// =============================================================================
// Unified types shared by the session layer and the futures client
// =============================================================================
//
// Exchange responses are mapped to explicit structs per call. Fields the
// unified shape has no slot for are kept in `info`, the raw exchange payload,
// so nothing the exchange returned is lost.
// =============================================================================

use std::collections::HashMap;
use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------
// Enums
// -----------------------------------------------------------------------------

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            other => bail!("unknown order side '{other}'"),
        }
    }
}

/// Execution style of an order. Trigger orders are a market or limit order
/// with a trigger price attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Limit => "limit",
        }
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state as reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Closed,
    Canceled,
    Unknown,
}

impl Default for OrderStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
            Self::Canceled => write!(f, "canceled"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Side of an open position (Bitget `holdSide`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PositionSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "long" => Ok(Self::Long),
            "short" => Ok(Self::Short),
            other => bail!("unknown position side '{other}'"),
        }
    }
}

/// Margin allocation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginMode {
    Isolated,
    Cross,
}

impl MarginMode {
    /// Value Bitget expects in `marginMode` request fields.
    pub fn wire_value(&self) -> &'static str {
        match self {
            Self::Isolated => "isolated",
            Self::Cross => "crossed",
        }
    }
}

impl Default for MarginMode {
    fn default() -> Self {
        Self::Cross
    }
}

impl std::fmt::Display for MarginMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Isolated => write!(f, "isolated"),
            Self::Cross => write!(f, "cross"),
        }
    }
}

impl FromStr for MarginMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "isolated" | "fixed" => Ok(Self::Isolated),
            "cross" | "crossed" => Ok(Self::Cross),
            other => bail!("unknown margin mode '{other}'"),
        }
    }
}

/// Whether requests go to real funds or Bitget's paper-trading environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Live,
    Demo,
}

impl Default for Environment {
    fn default() -> Self {
        Self::Live
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Demo => write!(f, "Demo"),
        }
    }
}

// -----------------------------------------------------------------------------
// Market metadata
// -----------------------------------------------------------------------------

/// Contract metadata loaded once at client construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    /// Unified symbol, e.g. `BTC/USDT:USDT`.
    pub symbol: String,
    /// Exchange-native id, e.g. `BTCUSDT`.
    pub id: String,
    pub base: String,
    pub quote: String,
    pub settle: String,
    /// Lot step: amounts are truncated to a multiple of this.
    pub amount_step: Decimal,
    /// Tick size: prices are rounded to a multiple of this.
    pub price_step: Decimal,
    /// Smallest order size accepted.
    pub min_amount: Decimal,
    /// Smallest order value in quote currency, when the exchange states one.
    pub min_notional: Option<Decimal>,
    pub min_leverage: Option<u32>,
    pub max_leverage: Option<u32>,
    pub active: bool,
}

// -----------------------------------------------------------------------------
// Market data
// -----------------------------------------------------------------------------

/// 24h ticker snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub last: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub base_volume: Option<f64>,
    pub quote_volume: Option<f64>,
    pub mark_price: Option<f64>,
    pub index_price: Option<f64>,
    pub funding_rate: Option<f64>,
    pub info: serde_json::Value,
}

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

// -----------------------------------------------------------------------------
// Account
// -----------------------------------------------------------------------------

/// Balance of a single margin coin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoinBalance {
    pub free: f64,
    pub used: f64,
    pub total: f64,
    pub unrealized_pnl: f64,
}

/// Futures account balance, keyed by margin coin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Balance {
    pub coins: HashMap<String, CoinBalance>,
    pub info: serde_json::Value,
}

impl Balance {
    pub fn coin(&self, coin: &str) -> Option<&CoinBalance> {
        self.coins.get(coin)
    }
}

// -----------------------------------------------------------------------------
// Orders & positions
// -----------------------------------------------------------------------------

/// An order as known to the exchange. Acknowledgements (placement,
/// cancellation) only fill the identifying fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: Option<OrderSide>,
    pub order_type: Option<OrderType>,
    pub status: OrderStatus,
    pub amount: Option<f64>,
    pub filled: Option<f64>,
    pub price: Option<f64>,
    pub average: Option<f64>,
    pub trigger_price: Option<f64>,
    pub reduce_only: Option<bool>,
    pub timestamp: Option<DateTime<Utc>>,
    pub info: serde_json::Value,
}

/// Open exposure on one side of a contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Option<PositionSide>,
    /// Size in contracts. `None` when the exchange omitted it.
    pub contracts: Option<f64>,
    pub entry_price: Option<f64>,
    pub mark_price: Option<f64>,
    pub unrealized_pnl: Option<f64>,
    pub leverage: Option<f64>,
    pub margin_mode: Option<MarginMode>,
    pub liquidation_price: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub info: serde_json::Value,
}

impl Position {
    /// True when the position holds a strictly positive number of contracts.
    pub fn is_open(&self) -> bool {
        self.contracts.map_or(false, |c| c > 0.0)
    }
}

/// One order that failed to close during a flash close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseFailure {
    pub order_id: Option<String>,
    pub error_code: Option<String>,
    pub error_msg: Option<String>,
}

/// Outcome of a flash close: the market orders that were sent, and any that
/// the exchange refused.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClosePositionResult {
    pub closed: Vec<Order>,
    pub failed: Vec<CloseFailure>,
}
