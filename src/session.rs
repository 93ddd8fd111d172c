// =============================================================================
// Exchange session — the request/response contract the futures client drives
// =============================================================================
//
// `BitgetSession` is the production implementation. The client only ever
// talks to this trait, so its parameter shaping can be exercised against a
// recording session in tests.
// =============================================================================

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::ohlcv::Timeframe;
use crate::types::{
    Balance, ClosePositionResult, MarginMode, Market, Order, OrderSide, OrderType, Position,
    PositionSide, Ticker,
};

/// Product family and margin coin attached to futures requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductParams {
    /// Bitget `productType`, e.g. `USDT-FUTURES`.
    pub product_type: String,
    /// Bitget `marginCoin`, e.g. `USDT`.
    pub margin_coin: String,
}

impl Default for ProductParams {
    fn default() -> Self {
        Self {
            product_type: "USDT-FUTURES".to_string(),
            margin_coin: "USDT".to_string(),
        }
    }
}

/// A fully formatted order ready for submission.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Amount already truncated to the market's lot step.
    pub amount: String,
    /// Limit price already rounded to the market's tick size.
    pub price: Option<String>,
    /// Present for trigger (plan) orders.
    pub trigger_price: Option<String>,
    pub reduce_only: bool,
    pub margin_mode: MarginMode,
    pub product: ProductParams,
}

impl OrderRequest {
    pub fn is_trigger(&self) -> bool {
        self.trigger_price.is_some()
    }
}

/// Leverage change for one symbol, optionally scoped to one side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeverageRequest {
    pub symbol: String,
    pub leverage: u32,
    /// Required when the symbol trades in isolated margin.
    pub hold_side: Option<PositionSide>,
    pub product: ProductParams,
}

/// Page request for historical candles, bounds in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OhlcvRequest {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start_ms: i64,
    pub end_ms: i64,
    pub limit: u32,
    pub product: ProductParams,
}

/// Authenticated access to one futures venue.
///
/// Symbols passed in are unified symbols as returned by [`load_markets`];
/// implementations translate them to exchange ids. `trigger` selects the
/// conditional (plan) order book instead of the regular one.
///
/// [`load_markets`]: ExchangeSession::load_markets
#[async_trait]
pub trait ExchangeSession: Send + Sync {
    /// Fetch and cache contract metadata, keyed by unified symbol.
    async fn load_markets(&self, product: &ProductParams) -> Result<HashMap<String, Market>>;

    async fn fetch_ticker(&self, symbol: &str, product: &ProductParams) -> Result<Ticker>;

    /// `extra` query parameters are appended after the product type.
    async fn fetch_balance(
        &self,
        extra: &[(&str, &str)],
        product: &ProductParams,
    ) -> Result<Balance>;

    async fn fetch_order(&self, id: &str, symbol: &str, product: &ProductParams) -> Result<Order>;

    async fn fetch_open_orders(
        &self,
        symbol: &str,
        trigger: bool,
        product: &ProductParams,
    ) -> Result<Vec<Order>>;

    async fn fetch_closed_orders(
        &self,
        symbol: &str,
        trigger: bool,
        product: &ProductParams,
    ) -> Result<Vec<Order>>;

    async fn cancel_order(
        &self,
        id: &str,
        symbol: &str,
        trigger: bool,
        product: &ProductParams,
    ) -> Result<Order>;

    /// Positions for the given symbols, including empty ones if the venue
    /// reports them.
    async fn fetch_positions(
        &self,
        symbols: &[&str],
        product: &ProductParams,
    ) -> Result<Vec<Position>>;

    /// Market-close the position on `side`, or both sides when `None`.
    async fn close_position(
        &self,
        symbol: &str,
        side: Option<PositionSide>,
        product: &ProductParams,
    ) -> Result<ClosePositionResult>;

    async fn set_margin_mode(
        &self,
        mode: MarginMode,
        symbol: &str,
        product: &ProductParams,
    ) -> Result<()>;

    async fn set_leverage(&self, request: &LeverageRequest) -> Result<()>;

    /// One page of candles as `[open_time_ms, open, high, low, close, volume]`.
    async fn fetch_ohlcv(&self, request: &OhlcvRequest) -> Result<Vec<[f64; 6]>>;

    async fn create_order(&self, request: &OrderRequest) -> Result<Order>;
}
