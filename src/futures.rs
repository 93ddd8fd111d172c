// =============================================================================
// BitgetFutures — convenience client for USDT-margined perpetual futures
// =============================================================================
//
// A thin layer over an `ExchangeSession`: every method forwards to the session
// after attaching the product type / margin coin, formatting amounts and
// prices to the market's precision, or (for candles) paging through history.
//
// Error policy:
//   - reads and regular order mutations propagate the session's error
//   - trigger order placement logs the failure and returns `None`
// =============================================================================

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use tracing::{debug, error, info, instrument};

use crate::bitget::BitgetSession;
use crate::config::ClientConfig;
use crate::error::ExchangeError;
use crate::ohlcv::{self, Timeframe, PAGE_LIMIT};
use crate::precision;
use crate::session::{ExchangeSession, LeverageRequest, OhlcvRequest, OrderRequest, ProductParams};
use crate::types::{
    Balance, Candle, ClosePositionResult, MarginMode, Market, Order, OrderSide, OrderType,
    Position, PositionSide, Ticker,
};

/// Futures client bound to one session and one product type.
pub struct BitgetFutures<S = BitgetSession> {
    session: S,
    product: ProductParams,
    default_margin_mode: MarginMode,
    markets: HashMap<String, Market>,
}

impl BitgetFutures<BitgetSession> {
    /// Build a Bitget session from `config` and load its markets.
    pub async fn new(config: ClientConfig) -> Result<Self> {
        let session = BitgetSession::new(&config)?;
        let mut client = Self::with_session(session, config.product()).await?;
        client.default_margin_mode = config.default_margin_mode;
        Ok(client)
    }
}

impl<S: ExchangeSession> BitgetFutures<S> {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Wrap an existing session. Fails if market metadata cannot be loaded.
    pub async fn with_session(session: S, product: ProductParams) -> Result<Self> {
        let markets = session
            .load_markets(&product)
            .await
            .context("failed to load market metadata")?;

        info!(
            product_type = %product.product_type,
            margin_coin = %product.margin_coin,
            markets = markets.len(),
            "futures client ready"
        );

        Ok(Self {
            session,
            product,
            default_margin_mode: MarginMode::default(),
            markets,
        })
    }

    /// Margin mode stated on new orders.
    pub fn with_default_margin_mode(mut self, mode: MarginMode) -> Self {
        self.default_margin_mode = mode;
        self
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn product(&self) -> &ProductParams {
        &self.product
    }

    // -------------------------------------------------------------------------
    // Market metadata
    // -------------------------------------------------------------------------

    pub fn markets(&self) -> &HashMap<String, Market> {
        &self.markets
    }

    /// Cached market for a unified symbol or exchange id.
    pub fn market(&self, symbol: &str) -> Result<&Market> {
        self.markets
            .get(symbol)
            .or_else(|| self.markets.values().find(|m| m.id == symbol))
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()).into())
    }

    pub fn fetch_min_amount_tradable(&self, symbol: &str) -> Result<f64> {
        let market = self.market(symbol)?;
        market
            .min_amount
            .to_f64()
            .with_context(|| format!("min amount of {symbol} is not representable as f64"))
    }

    pub fn amount_to_precision(&self, symbol: &str, amount: f64) -> Result<String> {
        let market = self.market(symbol)?;
        precision::amount_to_precision(market, precision::decimal_from_f64(amount)?)
    }

    pub fn price_to_precision(&self, symbol: &str, price: f64) -> Result<String> {
        let market = self.market(symbol)?;
        precision::price_to_precision(market, precision::decimal_from_f64(price)?)
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        self.session.fetch_ticker(symbol, &self.product).await
    }

    pub async fn fetch_balance(&self) -> Result<Balance> {
        self.fetch_balance_with(&[]).await
    }

    /// Balance query with extra exchange parameters forwarded verbatim.
    pub async fn fetch_balance_with(&self, params: &[(&str, &str)]) -> Result<Balance> {
        self.session.fetch_balance(params, &self.product).await
    }

    pub async fn fetch_order(&self, id: &str, symbol: &str) -> Result<Order> {
        self.session.fetch_order(id, symbol, &self.product).await
    }

    pub async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<Order>> {
        self.session
            .fetch_open_orders(symbol, false, &self.product)
            .await
    }

    pub async fn fetch_open_trigger_orders(&self, symbol: &str) -> Result<Vec<Order>> {
        self.session
            .fetch_open_orders(symbol, true, &self.product)
            .await
    }

    pub async fn fetch_closed_trigger_orders(&self, symbol: &str) -> Result<Vec<Order>> {
        self.session
            .fetch_closed_orders(symbol, true, &self.product)
            .await
    }

    /// Positions on `symbol` holding a strictly positive number of contracts.
    pub async fn fetch_open_positions(&self, symbol: &str) -> Result<Vec<Position>> {
        let positions = self
            .session
            .fetch_positions(&[symbol], &self.product)
            .await?;
        Ok(positions.into_iter().filter(Position::is_open).collect())
    }

    // -------------------------------------------------------------------------
    // Cancellation & position management
    // -------------------------------------------------------------------------

    pub async fn cancel_order(&self, id: &str, symbol: &str) -> Result<Order> {
        self.session
            .cancel_order(id, symbol, false, &self.product)
            .await
    }

    pub async fn cancel_trigger_order(&self, id: &str, symbol: &str) -> Result<Order> {
        self.session
            .cancel_order(id, symbol, true, &self.product)
            .await
    }

    /// Market-close `side` of the position, or both sides when `None`.
    pub async fn flash_close_position(
        &self,
        symbol: &str,
        side: Option<PositionSide>,
    ) -> Result<ClosePositionResult> {
        self.session
            .close_position(symbol, side, &self.product)
            .await
    }

    pub async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> Result<()> {
        self.session
            .set_margin_mode(mode, symbol, &self.product)
            .await
    }

    /// Isolated margin keeps a leverage per side, so both sides are set; cross
    /// margin takes a single call.
    #[instrument(skip(self))]
    pub async fn set_leverage(&self, symbol: &str, mode: MarginMode, leverage: u32) -> Result<()> {
        let request = |hold_side| LeverageRequest {
            symbol: symbol.to_string(),
            leverage,
            hold_side,
            product: self.product.clone(),
        };

        match mode {
            MarginMode::Isolated => {
                for side in [PositionSide::Long, PositionSide::Short] {
                    self.session.set_leverage(&request(Some(side))).await?;
                }
            }
            MarginMode::Cross => {
                self.session.set_leverage(&request(None)).await?;
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Historical candles
    // -------------------------------------------------------------------------

    /// The last `limit` bars of `timeframe`, oldest first.
    ///
    /// `timeframe` must be one of `1m 5m 15m 30m 1h 2h 4h 1d`; anything else
    /// fails before a request is sent.
    pub async fn fetch_recent_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        let timeframe: Timeframe = timeframe.parse()?;
        self.fetch_ohlcv_until(symbol, timeframe, limit, Utc::now().timestamp_millis())
            .await
    }

    /// Backfill the `limit` bars ending at `end_ms`, one page at a time.
    #[instrument(skip(self))]
    pub async fn fetch_ohlcv_until(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
        end_ms: i64,
    ) -> Result<Vec<Candle>> {
        let windows = ohlcv::plan_windows(timeframe, limit, end_ms);
        debug!(pages = windows.len(), "fetching candle history");

        let mut rows = Vec::new();
        for window in windows {
            let page = self
                .session
                .fetch_ohlcv(&OhlcvRequest {
                    symbol: symbol.to_string(),
                    timeframe,
                    start_ms: window.start_ms,
                    end_ms: window.end_ms,
                    limit: PAGE_LIMIT,
                    product: self.product.clone(),
                })
                .await?;
            rows.extend(page);
        }

        Ok(ohlcv::assemble(rows))
    }

    // -------------------------------------------------------------------------
    // Order placement
    // -------------------------------------------------------------------------

    pub async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: f64,
        reduce: bool,
    ) -> Result<Order> {
        let request =
            self.order_request(symbol, side, OrderType::Market, amount, None, None, reduce)?;
        self.session.create_order(&request).await
    }

    pub async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: f64,
        price: f64,
        reduce: bool,
    ) -> Result<Order> {
        let request =
            self.order_request(symbol, side, OrderType::Limit, amount, Some(price), None, reduce)?;
        self.session.create_order(&request).await
    }

    /// Market order fired once `trigger_price` trades. Returns `None` if the
    /// order could not be formatted or was rejected; the cause is logged.
    pub async fn place_trigger_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: f64,
        trigger_price: f64,
        reduce: bool,
    ) -> Option<Order> {
        let placed: Result<Order> = async {
            let request = self.order_request(
                symbol,
                side,
                OrderType::Market,
                amount,
                None,
                Some(trigger_price),
                reduce,
            )?;
            self.session.create_order(&request).await
        }
        .await;

        match placed {
            Ok(order) => Some(order),
            Err(e) => {
                error!(
                    symbol,
                    %side,
                    amount,
                    trigger_price,
                    error = %format!("{e:#}"),
                    "trigger market order not placed"
                );
                None
            }
        }
    }

    /// Limit order at `price` placed once `trigger_price` trades. Returns
    /// `None` if the order could not be formatted or was rejected; the cause
    /// is logged.
    pub async fn place_trigger_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: f64,
        trigger_price: f64,
        price: f64,
        reduce: bool,
    ) -> Option<Order> {
        let placed: Result<Order> = async {
            let request = self.order_request(
                symbol,
                side,
                OrderType::Limit,
                amount,
                Some(price),
                Some(trigger_price),
                reduce,
            )?;
            self.session.create_order(&request).await
        }
        .await;

        match placed {
            Ok(order) => Some(order),
            Err(e) => {
                error!(
                    symbol,
                    %side,
                    amount,
                    trigger_price,
                    price,
                    error = %format!("{e:#}"),
                    "trigger limit order not placed"
                );
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn order_request(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        amount: f64,
        price: Option<f64>,
        trigger_price: Option<f64>,
        reduce_only: bool,
    ) -> Result<OrderRequest> {
        let amount = self.amount_to_precision(symbol, amount)?;
        let trigger_price = trigger_price
            .map(|p| self.price_to_precision(symbol, p))
            .transpose()?;
        let price = price
            .map(|p| self.price_to_precision(symbol, p))
            .transpose()?;

        Ok(OrderRequest {
            symbol: symbol.to_string(),
            side,
            order_type,
            amount,
            price,
            trigger_price,
            reduce_only,
            margin_mode: self.default_margin_mode,
            product: self.product.clone(),
        })
    }
}

impl<S> std::fmt::Debug for BitgetFutures<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitgetFutures")
            .field("product", &self.product)
            .field("default_margin_mode", &self.default_margin_mode)
            .field("markets", &self.markets.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, MockSession};
    use crate::types::OrderStatus;

    const BTC: &str = "BTC/USDT:USDT";
    const NOW: i64 = 1_700_000_000_000;

    async fn client() -> BitgetFutures<MockSession> {
        BitgetFutures::with_session(MockSession::new(), ProductParams::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn construction_fails_when_markets_do_not_load() {
        let session = MockSession::new();
        session.fail_markets();
        let err = BitgetFutures::with_session(session, ProductParams::default())
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("failed to load market metadata"));
    }

    #[tokio::test]
    async fn min_amount_comes_from_cached_metadata() {
        let c = client().await;
        assert_eq!(c.fetch_min_amount_tradable(BTC).unwrap(), 0.0001);
        assert_eq!(c.fetch_min_amount_tradable("BTCUSDT").unwrap(), 0.0001);
        let err = c.fetch_min_amount_tradable("NOPE/USDT:USDT").unwrap_err();
        assert!(matches!(
            ExchangeError::find(&err),
            Some(ExchangeError::UnknownSymbol(_))
        ));
        // Nothing beyond the initial market load reached the session.
        assert_eq!(c.session().calls(), vec![Call::LoadMarkets]);
    }

    #[tokio::test]
    async fn open_positions_drop_empty_and_missing_sizes() {
        let c = client().await;
        c.session().set_positions(vec![
            MockSession::position(BTC, Some(0.5)),
            MockSession::position(BTC, Some(0.0)),
            MockSession::position(BTC, None),
            MockSession::position(BTC, Some(0.001)),
        ]);

        let open = c.fetch_open_positions(BTC).await.unwrap();
        assert_eq!(open.len(), 2);
        assert!(open.iter().all(|p| p.contracts.unwrap() > 0.0));

        assert_eq!(
            c.session().calls().last(),
            Some(&Call::FetchPositions {
                symbols: vec![BTC.to_string()],
                product_type: "USDT-FUTURES".into(),
                margin_coin: "USDT".into(),
            })
        );
    }

    #[tokio::test]
    async fn isolated_leverage_is_set_per_side() {
        let c = client().await;
        c.set_leverage(BTC, MarginMode::Isolated, 5).await.unwrap();

        let calls = c.session().leverage_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].hold_side, Some(PositionSide::Long));
        assert_eq!(calls[1].hold_side, Some(PositionSide::Short));
        assert!(calls.iter().all(|r| r.leverage == 5));
    }

    #[tokio::test]
    async fn cross_leverage_is_a_single_call() {
        let c = client().await;
        c.set_leverage(BTC, MarginMode::Cross, 3).await.unwrap();

        let calls = c.session().leverage_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].hold_side, None);
        assert_eq!(calls[0].product, ProductParams::default());
    }

    #[tokio::test]
    async fn margin_mode_carries_product_params() {
        let c = client().await;
        c.set_margin_mode(BTC, MarginMode::Isolated).await.unwrap();
        assert_eq!(
            c.session().calls().last(),
            Some(&Call::SetMarginMode {
                symbol: BTC.into(),
                mode: MarginMode::Isolated,
                product_type: "USDT-FUTURES".into(),
            })
        );
    }

    #[tokio::test]
    async fn market_order_is_formatted_before_submission() {
        let c = client().await;
        let order = c
            .place_market_order(BTC, OrderSide::Buy, 0.123456, false)
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Open);

        let sent = c.session().orders();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].amount, "0.1234");
        assert_eq!(sent[0].order_type, OrderType::Market);
        assert_eq!(sent[0].price, None);
        assert!(!sent[0].is_trigger());
    }

    #[tokio::test]
    async fn limit_order_rounds_price_and_keeps_reduce_flag() {
        let c = client().await.with_default_margin_mode(MarginMode::Isolated);
        c.place_limit_order(BTC, OrderSide::Sell, 1.0, 64250.26, true)
            .await
            .unwrap();

        let sent = &c.session().orders()[0];
        assert_eq!(sent.price.as_deref(), Some("64250.3"));
        assert_eq!(sent.amount, "1");
        assert!(sent.reduce_only);
        assert_eq!(sent.margin_mode, MarginMode::Isolated);
    }

    #[tokio::test]
    async fn market_order_failure_propagates() {
        let c = client().await;
        c.session().fail_orders();
        let err = c
            .place_market_order(BTC, OrderSide::Buy, 0.01, false)
            .await
            .unwrap_err();
        assert!(matches!(
            ExchangeError::find(&err),
            Some(ExchangeError::Api { .. })
        ));
    }

    #[tokio::test]
    async fn trigger_market_order_failure_is_swallowed() {
        let c = client().await;
        c.session().fail_orders();
        let placed = c
            .place_trigger_market_order(BTC, OrderSide::Sell, 0.01, 60000.0, true)
            .await;
        assert!(placed.is_none());
        // The submission was attempted.
        assert_eq!(c.session().orders().len(), 1);
    }

    #[tokio::test]
    async fn trigger_order_shaping_failure_is_swallowed() {
        let c = client().await;
        // Below one lot: rejected during formatting, never submitted.
        let placed = c
            .place_trigger_limit_order(BTC, OrderSide::Buy, 0.00001, 60000.0, 59990.0, false)
            .await;
        assert!(placed.is_none());
        assert!(c.session().orders().is_empty());

        let placed = c
            .place_trigger_market_order("NOPE/USDT:USDT", OrderSide::Buy, 1.0, 1.0, false)
            .await;
        assert!(placed.is_none());
    }

    #[tokio::test]
    async fn trigger_limit_order_sends_both_prices() {
        let c = client().await;
        let placed = c
            .place_trigger_limit_order(BTC, OrderSide::Buy, 0.05, 60000.04, 59990.15, false)
            .await
            .unwrap();
        assert_eq!(placed.trigger_price, Some(60000.0));

        let sent = &c.session().orders()[0];
        assert_eq!(sent.trigger_price.as_deref(), Some("60000"));
        assert_eq!(sent.price.as_deref(), Some("59990.2"));
        assert_eq!(sent.order_type, OrderType::Limit);
    }

    #[tokio::test]
    async fn trigger_queries_set_the_trigger_flag() {
        let c = client().await;
        c.fetch_open_orders(BTC).await.unwrap();
        c.fetch_open_trigger_orders(BTC).await.unwrap();
        c.fetch_closed_trigger_orders(BTC).await.unwrap();
        c.cancel_order("1", BTC).await.unwrap();
        c.cancel_trigger_order("2", BTC).await.unwrap();

        let calls = c.session().calls();
        assert_eq!(
            &calls[1..],
            &[
                Call::FetchOpenOrders { trigger: false },
                Call::FetchOpenOrders { trigger: true },
                Call::FetchClosedOrders { trigger: true },
                Call::CancelOrder { id: "1".into(), trigger: false },
                Call::CancelOrder { id: "2".into(), trigger: true },
            ]
        );
    }

    #[tokio::test]
    async fn oversized_amounts_fail_without_panicking() {
        let c = client().await;

        let err = c.amount_to_precision(BTC, 1e25).unwrap_err();
        assert!(matches!(
            ExchangeError::find(&err),
            Some(ExchangeError::InvalidOrder(_))
        ));

        let placed = c
            .place_trigger_market_order(BTC, OrderSide::Buy, 1e25, 60000.0, false)
            .await;
        assert!(placed.is_none());
        let placed = c
            .place_trigger_limit_order(BTC, OrderSide::Buy, 1e25, 60000.0, 59990.0, false)
            .await;
        assert!(placed.is_none());
        assert!(c.session().orders().is_empty());
    }

    #[tokio::test]
    async fn reads_forward_symbol_and_id() {
        let c = client().await;

        let ticker = c.fetch_ticker(BTC).await.unwrap();
        assert_eq!(ticker.symbol, BTC);
        let order = c.fetch_order("42", BTC).await.unwrap();
        assert_eq!(order.id, "42");

        assert_eq!(
            &c.session().calls()[1..],
            &[
                Call::FetchTicker { symbol: BTC.into() },
                Call::FetchOrder {
                    id: "42".into(),
                    symbol: BTC.into(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn balance_forwards_extra_params() {
        let c = client().await;
        c.fetch_balance().await.unwrap();
        c.fetch_balance_with(&[("marginCoin", "USDT")]).await.unwrap();

        assert_eq!(
            &c.session().calls()[1..],
            &[
                Call::FetchBalance { params: vec![] },
                Call::FetchBalance {
                    params: vec![("marginCoin".into(), "USDT".into())],
                },
            ]
        );
    }

    #[tokio::test]
    async fn flash_close_forwards_the_side() {
        let c = client().await;
        c.flash_close_position(BTC, Some(PositionSide::Short))
            .await
            .unwrap();
        c.flash_close_position(BTC, None).await.unwrap();

        assert_eq!(
            &c.session().calls()[1..],
            &[
                Call::ClosePosition {
                    symbol: BTC.into(),
                    side: Some(PositionSide::Short),
                },
                Call::ClosePosition {
                    symbol: BTC.into(),
                    side: None,
                },
            ]
        );
    }

    #[tokio::test]
    async fn short_history_is_one_page() {
        let c = client().await;
        c.fetch_ohlcv_until(BTC, Timeframe::H1, 3, NOW).await.unwrap();

        let pages = c.session().ohlcv_requests();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].start_ms, NOW - 3 * 3_600_000);
        assert_eq!(pages[0].end_ms, NOW);
        assert_eq!(pages[0].limit, 200);
    }

    #[tokio::test]
    async fn long_history_pages_and_sorts() {
        let c = client().await;
        let candles = c
            .fetch_ohlcv_until(BTC, Timeframe::M1, 500, NOW)
            .await
            .unwrap();

        let pages = c.session().ohlcv_requests();
        assert_eq!(pages.len(), 3);
        let step = 200 * 60_000 + 1;
        assert_eq!(pages[1].start_ms, pages[0].start_ms + step);
        assert_eq!(pages[2].start_ms, pages[1].start_ms + step);

        // The mock answers pages newest-first; the result is ascending.
        assert!(!candles.is_empty());
        assert!(candles.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn zero_limit_sends_nothing() {
        let c = client().await;
        let candles = c.fetch_ohlcv_until(BTC, Timeframe::M5, 0, NOW).await.unwrap();
        assert!(candles.is_empty());
        assert!(c.session().ohlcv_requests().is_empty());
    }

    #[tokio::test]
    async fn unknown_timeframe_fails_before_network() {
        let c = client().await;
        let err = c.fetch_recent_ohlcv(BTC, "3m", 10).await.unwrap_err();
        assert_eq!(
            ExchangeError::find(&err),
            Some(&ExchangeError::UnsupportedTimeframe("3m".into()))
        );
        assert!(c.session().ohlcv_requests().is_empty());
    }

    #[tokio::test]
    async fn precision_helpers_use_market_rules() {
        let c = client().await;
        assert_eq!(c.amount_to_precision(BTC, 0.123456).unwrap(), "0.1234");
        assert_eq!(c.price_to_precision(BTC, 64250.04).unwrap(), "64250");
        let once = c.price_to_precision(BTC, 64250.16).unwrap();
        let twice = c.price_to_precision(BTC, once.parse().unwrap()).unwrap();
        assert_eq!(once, twice);
    }
}
