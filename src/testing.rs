// =============================================================================
// Recording session used by the futures client tests
// =============================================================================

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::error::ExchangeError;
use crate::session::{ExchangeSession, LeverageRequest, OhlcvRequest, OrderRequest, ProductParams};
use crate::types::{
    Balance, ClosePositionResult, MarginMode, Market, Order, OrderStatus, Position, PositionSide,
    Ticker,
};

/// One call observed by the mock, in the order it arrived.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    LoadMarkets,
    FetchTicker { symbol: String },
    FetchBalance { params: Vec<(String, String)> },
    FetchOrder { id: String, symbol: String },
    FetchOpenOrders { trigger: bool },
    FetchClosedOrders { trigger: bool },
    CancelOrder { id: String, trigger: bool },
    FetchPositions {
        symbols: Vec<String>,
        product_type: String,
        margin_coin: String,
    },
    ClosePosition {
        symbol: String,
        side: Option<PositionSide>,
    },
    SetMarginMode {
        symbol: String,
        mode: MarginMode,
        product_type: String,
    },
    SetLeverage,
    FetchOhlcv,
    CreateOrder,
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    leverage: Vec<LeverageRequest>,
    orders: Vec<OrderRequest>,
    ohlcv: Vec<OhlcvRequest>,
    positions: Vec<Position>,
    fail_markets: bool,
    fail_orders: bool,
}

/// In-memory `ExchangeSession` that records every request.
#[derive(Default)]
pub struct MockSession {
    state: Mutex<State>,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn btc_market() -> Market {
        Market {
            symbol: "BTC/USDT:USDT".into(),
            id: "BTCUSDT".into(),
            base: "BTC".into(),
            quote: "USDT".into(),
            settle: "USDT".into(),
            amount_step: Decimal::new(1, 4),
            price_step: Decimal::new(1, 1),
            min_amount: Decimal::new(1, 4),
            min_notional: Some(Decimal::new(5, 0)),
            min_leverage: Some(1),
            max_leverage: Some(125),
            active: true,
        }
    }

    pub fn position(symbol: &str, contracts: Option<f64>) -> Position {
        Position {
            symbol: symbol.to_string(),
            side: Some(PositionSide::Long),
            contracts,
            entry_price: Some(60_000.0),
            mark_price: Some(61_000.0),
            unrealized_pnl: None,
            leverage: Some(5.0),
            margin_mode: Some(MarginMode::Isolated),
            liquidation_price: None,
            timestamp: None,
            info: serde_json::Value::Null,
        }
    }

    pub fn fail_markets(&self) {
        self.state.lock().fail_markets = true;
    }

    pub fn fail_orders(&self) {
        self.state.lock().fail_orders = true;
    }

    pub fn set_positions(&self, positions: Vec<Position>) {
        self.state.lock().positions = positions;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn leverage_calls(&self) -> Vec<LeverageRequest> {
        self.state.lock().leverage.clone()
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.state.lock().orders.clone()
    }

    pub fn ohlcv_requests(&self) -> Vec<OhlcvRequest> {
        self.state.lock().ohlcv.clone()
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }

    fn ack(symbol: &str, id: &str, status: OrderStatus) -> Order {
        Order {
            id: id.to_string(),
            symbol: symbol.to_string(),
            status,
            ..Order::default()
        }
    }
}

#[async_trait]
impl ExchangeSession for MockSession {
    async fn load_markets(&self, _product: &ProductParams) -> Result<HashMap<String, Market>> {
        self.record(Call::LoadMarkets);
        if self.state.lock().fail_markets {
            return Err(ExchangeError::Http {
                status: 503,
                body: "maintenance".into(),
            }
            .into());
        }
        let market = Self::btc_market();
        Ok(HashMap::from([(market.symbol.clone(), market)]))
    }

    async fn fetch_ticker(&self, symbol: &str, _product: &ProductParams) -> Result<Ticker> {
        self.record(Call::FetchTicker {
            symbol: symbol.to_string(),
        });
        Ok(Ticker {
            symbol: symbol.to_string(),
            timestamp: None,
            last: Some(61_000.0),
            bid: None,
            ask: None,
            high: None,
            low: None,
            base_volume: None,
            quote_volume: None,
            mark_price: None,
            index_price: None,
            funding_rate: None,
            info: serde_json::Value::Null,
        })
    }

    async fn fetch_balance(
        &self,
        extra: &[(&str, &str)],
        _product: &ProductParams,
    ) -> Result<Balance> {
        self.record(Call::FetchBalance {
            params: extra
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
        Ok(Balance::default())
    }

    async fn fetch_order(&self, id: &str, symbol: &str, _product: &ProductParams) -> Result<Order> {
        self.record(Call::FetchOrder {
            id: id.to_string(),
            symbol: symbol.to_string(),
        });
        Ok(Self::ack(symbol, id, OrderStatus::Open))
    }

    async fn fetch_open_orders(
        &self,
        _symbol: &str,
        trigger: bool,
        _product: &ProductParams,
    ) -> Result<Vec<Order>> {
        self.record(Call::FetchOpenOrders { trigger });
        Ok(Vec::new())
    }

    async fn fetch_closed_orders(
        &self,
        _symbol: &str,
        trigger: bool,
        _product: &ProductParams,
    ) -> Result<Vec<Order>> {
        self.record(Call::FetchClosedOrders { trigger });
        Ok(Vec::new())
    }

    async fn cancel_order(
        &self,
        id: &str,
        symbol: &str,
        trigger: bool,
        _product: &ProductParams,
    ) -> Result<Order> {
        self.record(Call::CancelOrder {
            id: id.to_string(),
            trigger,
        });
        Ok(Self::ack(symbol, id, OrderStatus::Canceled))
    }

    async fn fetch_positions(
        &self,
        symbols: &[&str],
        product: &ProductParams,
    ) -> Result<Vec<Position>> {
        self.record(Call::FetchPositions {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            product_type: product.product_type.clone(),
            margin_coin: product.margin_coin.clone(),
        });
        Ok(self.state.lock().positions.clone())
    }

    async fn close_position(
        &self,
        symbol: &str,
        side: Option<PositionSide>,
        _product: &ProductParams,
    ) -> Result<ClosePositionResult> {
        self.record(Call::ClosePosition {
            symbol: symbol.to_string(),
            side,
        });
        Ok(ClosePositionResult::default())
    }

    async fn set_margin_mode(
        &self,
        mode: MarginMode,
        symbol: &str,
        product: &ProductParams,
    ) -> Result<()> {
        self.record(Call::SetMarginMode {
            symbol: symbol.to_string(),
            mode,
            product_type: product.product_type.clone(),
        });
        Ok(())
    }

    async fn set_leverage(&self, request: &LeverageRequest) -> Result<()> {
        self.record(Call::SetLeverage);
        self.state.lock().leverage.push(request.clone());
        Ok(())
    }

    /// Answers every page with the aligned bars inside the window, newest
    /// first, capped at the page limit.
    async fn fetch_ohlcv(&self, request: &OhlcvRequest) -> Result<Vec<[f64; 6]>> {
        self.record(Call::FetchOhlcv);
        self.state.lock().ohlcv.push(request.clone());

        let tf = request.timeframe.millis();
        let first = (request.start_ms + tf - 1) / tf * tf;
        let mut rows: Vec<[f64; 6]> = (0..)
            .map(|i| first + i * tf)
            .take_while(|ts| *ts <= request.end_ms)
            .take(request.limit as usize)
            .map(|ts| [ts as f64, 1.0, 2.0, 0.5, 1.5, 10.0])
            .collect();
        rows.reverse();
        Ok(rows)
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<Order> {
        self.record(Call::CreateOrder);
        let mut state = self.state.lock();
        state.orders.push(request.clone());
        if state.fail_orders {
            return Err(ExchangeError::Api {
                code: "40762".into(),
                msg: "The order amount exceeds the balance".into(),
            }
            .into());
        }
        let id = state.orders.len().to_string();
        Ok(Order {
            id,
            symbol: request.symbol.clone(),
            side: Some(request.side),
            order_type: Some(request.order_type),
            status: OrderStatus::Open,
            amount: request.amount.parse().ok(),
            price: request.price.as_deref().and_then(|p| p.parse().ok()),
            trigger_price: request.trigger_price.as_deref().and_then(|p| p.parse().ok()),
            reduce_only: Some(request.reduce_only),
            ..Order::default()
        })
    }
}
