// =============================================================================
// Bitget REST Session — HMAC-SHA256 signed v2 mix (futures) requests
// =============================================================================
//
// Private requests carry ACCESS-KEY / ACCESS-SIGN / ACCESS-TIMESTAMP /
// ACCESS-PASSPHRASE headers where
//
//   ACCESS-SIGN = base64(HMAC-SHA256(secret, timestamp + METHOD + path?query + body))
//
// Paper trading is the same API with a `paptrading: 1` header on every
// request; nothing else differs between environments.
//
// SECURITY: the secret and passphrase are never logged or serialized.
// =============================================================================

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Url};
use serde_json::json;
use sha2::Sha256;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::models::{self, Envelope, SUCCESS_CODE};
use super::rate_limit::{PacerSnapshot, RequestPacer};
use crate::config::{ClientConfig, Credentials};
use crate::error::ExchangeError;
use crate::session::{ExchangeSession, LeverageRequest, OhlcvRequest, OrderRequest, ProductParams};
use crate::types::{
    Balance, ClosePositionResult, Environment, MarginMode, Market, Order, OrderType, Position,
    PositionSide, Ticker,
};

type HmacSha256 = Hmac<Sha256>;

/// Plan type used for plain trigger orders.
const NORMAL_PLAN: &str = "normal_plan";

/// Price source that fires trigger orders.
const TRIGGER_TYPE: &str = "fill_price";

/// Produce the base64 HMAC-SHA256 signature of `prehash`.
pub fn sign(secret: &str, prehash: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .context("HMAC key rejected")?;
    mac.update(prehash.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Headers sent with every request for the given environment.
pub fn base_headers(environment: Environment) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert("locale", HeaderValue::from_static("en-US"));
    if environment == Environment::Demo {
        headers.insert("paptrading", HeaderValue::from_static("1"));
    }
    headers
}

/// Form-encoded query string; this exact text is both sent and signed.
fn query_string(params: &[(&str, String)]) -> Result<String> {
    let url = Url::parse_with_params(
        "http://localhost/",
        params.iter().map(|(k, v)| (*k, v.as_str())),
    )
    .context("failed to encode query parameters")?;
    Ok(url.query().unwrap_or_default().to_string())
}

/// Body of a flash close. Without a side both sides are closed, so
/// `holdSide` is omitted.
pub fn close_positions_body(
    market_id: &str,
    side: Option<PositionSide>,
    product: &ProductParams,
) -> serde_json::Value {
    let mut body = json!({
        "symbol": market_id,
        "productType": product.product_type,
    });
    if let Some(side) = side {
        body["holdSide"] = json!(side.as_str());
    }
    body
}

/// Signed REST session against Bitget's v2 futures API.
pub struct BitgetSession {
    credentials: Option<Credentials>,
    base_url: String,
    environment: Environment,
    client: reqwest::Client,
    pacer: RequestPacer,
    /// Unified symbol → market, filled by `load_markets`.
    markets: RwLock<HashMap<String, Market>>,
}

impl BitgetSession {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .default_headers(base_headers(config.environment))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        let credentials = config.credentials();
        info!(
            base_url = %config.base_url,
            environment = %config.environment,
            authenticated = credentials.is_some(),
            "BitgetSession initialised"
        );

        Ok(Self {
            credentials,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            environment: config.environment,
            client,
            pacer: RequestPacer::new(Duration::from_millis(config.min_request_interval_ms)),
            markets: RwLock::new(HashMap::new()),
        })
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn pacer_snapshot(&self) -> PacerSnapshot {
        self.pacer.snapshot()
    }

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------

    /// Send one request and unwrap the `{code, msg, data}` envelope.
    async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<serde_json::Value>,
        signed: bool,
    ) -> Result<serde_json::Value> {
        let (builder, request_path) = self.prepare(&method, path, params, body, signed).await?;
        debug!(%method, path = %request_path, "sending request");

        let resp = builder
            .send()
            .await
            .with_context(|| format!("{method} {path} request failed"))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .with_context(|| format!("failed to read {path} response body"))?;

        let envelope: Envelope = match serde_json::from_str(&text) {
            Ok(env) => env,
            Err(e) if status.is_success() => {
                return Err(e).with_context(|| format!("failed to parse {path} response: {text}"));
            }
            Err(_) => {
                return Err(ExchangeError::Http {
                    status: status.as_u16(),
                    body: text,
                }
                .into());
            }
        };

        if envelope.code != SUCCESS_CODE {
            warn!(path, code = %envelope.code, msg = %envelope.msg, "bitget rejected request");
            return Err(ExchangeError::Api {
                code: envelope.code,
                msg: envelope.msg,
            }
            .into());
        }

        Ok(envelope.data)
    }

    /// Take a pacer slot, then build and sign the request. Returns the
    /// builder and the `path?query` that was signed.
    async fn prepare(
        &self,
        method: &Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<serde_json::Value>,
        signed: bool,
    ) -> Result<(RequestBuilder, String)> {
        let credentials = match (signed, &self.credentials) {
            (false, _) => None,
            (true, Some(creds)) => Some(creds),
            (true, None) => {
                return Err(ExchangeError::MissingCredentials(path.to_string()).into());
            }
        };

        let qs = query_string(params)?;
        let request_path = if qs.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{qs}")
        };
        let body = body.map(|b| b.to_string()).unwrap_or_default();

        // The timestamp must be taken after the pacer wait.
        self.pacer.acquire().await;

        let mut builder = self
            .client
            .request(method.clone(), format!("{}{}", self.base_url, request_path));

        if let Some(creds) = credentials {
            let timestamp = Utc::now().timestamp_millis().to_string();
            let prehash = format!("{timestamp}{}{request_path}{body}", method.as_str());
            let signature = sign(&creds.secret, &prehash)?;
            builder = builder
                .header("ACCESS-KEY", &creds.api_key)
                .header("ACCESS-SIGN", signature)
                .header("ACCESS-TIMESTAMP", timestamp)
                .header("ACCESS-PASSPHRASE", &creds.passphrase);
        }
        if !body.is_empty() {
            builder = builder.body(body);
        }

        Ok((builder, request_path))
    }

    async fn public_get(&self, path: &str, params: &[(&str, String)]) -> Result<serde_json::Value> {
        self.request(Method::GET, path, params, None, false).await
    }

    async fn private_get(&self, path: &str, params: &[(&str, String)]) -> Result<serde_json::Value> {
        self.request(Method::GET, path, params, None, true).await
    }

    async fn private_post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        self.request(Method::POST, path, &[], Some(body), true).await
    }

    // -------------------------------------------------------------------------
    // Symbol resolution
    // -------------------------------------------------------------------------

    /// Exchange id for a unified symbol (or an id passed through as-is).
    fn market_id(&self, symbol: &str) -> Result<String> {
        let markets = self.markets.read();
        if let Some(m) = markets.get(symbol) {
            return Ok(m.id.clone());
        }
        markets
            .values()
            .find(|m| m.id == symbol)
            .map(|m| m.id.clone())
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()).into())
    }

    /// Unified symbol for an exchange id.
    fn unified_symbol(&self, id: &str) -> Option<String> {
        self.markets
            .read()
            .values()
            .find(|m| m.id == id)
            .map(|m| m.symbol.clone())
    }
}

#[async_trait]
impl ExchangeSession for BitgetSession {
    // -------------------------------------------------------------------------
    // Public market data
    // -------------------------------------------------------------------------

    /// GET /api/v2/mix/market/contracts (public).
    #[instrument(skip(self), name = "bitget::load_markets")]
    async fn load_markets(&self, product: &ProductParams) -> Result<HashMap<String, Market>> {
        let data = self
            .public_get(
                "/api/v2/mix/market/contracts",
                &[("productType", product.product_type.clone())],
            )
            .await?;
        let markets = models::parse_markets(data)?;

        debug!(count = markets.len(), "markets loaded");
        *self.markets.write() = markets.clone();
        Ok(markets)
    }

    /// GET /api/v2/mix/market/ticker (public).
    #[instrument(skip(self, product), name = "bitget::fetch_ticker")]
    async fn fetch_ticker(&self, symbol: &str, product: &ProductParams) -> Result<Ticker> {
        let id = self.market_id(symbol)?;
        let data = self
            .public_get(
                "/api/v2/mix/market/ticker",
                &[("symbol", id), ("productType", product.product_type.clone())],
            )
            .await?;
        models::parse_ticker(symbol, data)
    }

    /// GET /api/v2/mix/market/history-candles (public).
    #[instrument(skip(self), name = "bitget::fetch_ohlcv")]
    async fn fetch_ohlcv(&self, request: &OhlcvRequest) -> Result<Vec<[f64; 6]>> {
        let id = self.market_id(&request.symbol)?;
        let data = self
            .public_get(
                "/api/v2/mix/market/history-candles",
                &[
                    ("symbol", id),
                    ("productType", request.product.product_type.clone()),
                    ("granularity", request.timeframe.granularity().to_string()),
                    ("startTime", request.start_ms.to_string()),
                    ("endTime", request.end_ms.to_string()),
                    ("limit", request.limit.to_string()),
                ],
            )
            .await?;
        let rows = models::parse_candles(data)?;
        debug!(count = rows.len(), "candles fetched");
        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Account
    // -------------------------------------------------------------------------

    /// GET /api/v2/mix/account/accounts (signed).
    #[instrument(skip(self), name = "bitget::fetch_balance")]
    async fn fetch_balance(
        &self,
        extra: &[(&str, &str)],
        product: &ProductParams,
    ) -> Result<Balance> {
        let mut params = vec![("productType", product.product_type.clone())];
        params.extend(extra.iter().map(|(k, v)| (*k, v.to_string())));
        let data = self
            .private_get("/api/v2/mix/account/accounts", &params)
            .await?;
        models::parse_balance(data)
    }

    /// POST /api/v2/mix/account/set-margin-mode (signed).
    #[instrument(skip(self, product), name = "bitget::set_margin_mode")]
    async fn set_margin_mode(
        &self,
        mode: MarginMode,
        symbol: &str,
        product: &ProductParams,
    ) -> Result<()> {
        let id = self.market_id(symbol)?;
        self.private_post(
            "/api/v2/mix/account/set-margin-mode",
            json!({
                "symbol": id,
                "productType": product.product_type,
                "marginCoin": product.margin_coin,
                "marginMode": mode.wire_value(),
            }),
        )
        .await?;
        debug!(symbol, %mode, "margin mode set");
        Ok(())
    }

    /// POST /api/v2/mix/account/set-leverage (signed).
    #[instrument(skip(self), name = "bitget::set_leverage")]
    async fn set_leverage(&self, request: &LeverageRequest) -> Result<()> {
        let id = self.market_id(&request.symbol)?;
        let mut body = json!({
            "symbol": id,
            "productType": request.product.product_type,
            "marginCoin": request.product.margin_coin,
            "leverage": request.leverage.to_string(),
        });
        if let Some(side) = request.hold_side {
            body["holdSide"] = json!(side.as_str());
        }
        self.private_post("/api/v2/mix/account/set-leverage", body)
            .await?;
        debug!(symbol = %request.symbol, leverage = request.leverage, "leverage set");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Positions
    // -------------------------------------------------------------------------

    /// GET /api/v2/mix/position/all-position (signed), filtered to `symbols`.
    #[instrument(skip(self), name = "bitget::fetch_positions")]
    async fn fetch_positions(
        &self,
        symbols: &[&str],
        product: &ProductParams,
    ) -> Result<Vec<Position>> {
        let data = self
            .private_get(
                "/api/v2/mix/position/all-position",
                &[
                    ("productType", product.product_type.clone()),
                    ("marginCoin", product.margin_coin.clone()),
                ],
            )
            .await?;
        let positions = models::parse_positions(data, |id| self.unified_symbol(id))?;

        let wanted: Vec<String> = symbols
            .iter()
            .map(|s| self.unified_symbol(s).unwrap_or_else(|| s.to_string()))
            .collect();
        Ok(positions
            .into_iter()
            .filter(|p| wanted.is_empty() || wanted.contains(&p.symbol))
            .collect())
    }

    /// POST /api/v2/mix/order/close-positions (signed).
    #[instrument(skip(self, product), name = "bitget::close_position")]
    async fn close_position(
        &self,
        symbol: &str,
        side: Option<PositionSide>,
        product: &ProductParams,
    ) -> Result<ClosePositionResult> {
        let id = self.market_id(symbol)?;
        let body = close_positions_body(&id, side, product);
        let data = self
            .private_post("/api/v2/mix/order/close-positions", body)
            .await?;
        let result = models::parse_close_result(symbol, data)?;
        if !result.failed.is_empty() {
            warn!(symbol, failures = result.failed.len(), "flash close partially failed");
        }
        Ok(result)
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// POST /api/v2/mix/order/place-order, or place-plan-order when the
    /// request carries a trigger price (signed).
    #[instrument(skip(self), name = "bitget::create_order")]
    async fn create_order(&self, request: &OrderRequest) -> Result<Order> {
        let id = self.market_id(&request.symbol)?;
        let mut body = json!({
            "symbol": id,
            "productType": request.product.product_type,
            "marginMode": request.margin_mode.wire_value(),
            "marginCoin": request.product.margin_coin,
            "size": request.amount,
            "side": request.side.as_str(),
            "orderType": request.order_type.as_str(),
            "reduceOnly": if request.reduce_only { "YES" } else { "NO" },
            "clientOid": Uuid::new_v4().to_string(),
        });
        if let Some(price) = &request.price {
            body["price"] = json!(price);
        }
        if request.order_type == OrderType::Limit && !request.is_trigger() {
            body["force"] = json!("gtc");
        }

        let path = match &request.trigger_price {
            Some(trigger) => {
                body["planType"] = json!(NORMAL_PLAN);
                body["triggerPrice"] = json!(trigger);
                body["triggerType"] = json!(TRIGGER_TYPE);
                "/api/v2/mix/order/place-plan-order"
            }
            None => "/api/v2/mix/order/place-order",
        };

        debug!(
            symbol = %request.symbol,
            side = %request.side,
            order_type = %request.order_type,
            amount = %request.amount,
            trigger = request.is_trigger(),
            "placing order"
        );
        let data = self.private_post(path, body).await?;
        let order = models::order_ack(&request.symbol, data, request)?;
        debug!(order_id = %order.id, "order placed");
        Ok(order)
    }

    /// POST /api/v2/mix/order/cancel-order or cancel-plan-order (signed).
    #[instrument(skip(self, product), name = "bitget::cancel_order")]
    async fn cancel_order(
        &self,
        id: &str,
        symbol: &str,
        trigger: bool,
        product: &ProductParams,
    ) -> Result<Order> {
        let market_id = self.market_id(symbol)?;
        let (path, body) = if trigger {
            (
                "/api/v2/mix/order/cancel-plan-order",
                json!({
                    "symbol": market_id,
                    "productType": product.product_type,
                    "marginCoin": product.margin_coin,
                    "orderIdList": [{ "orderId": id }],
                }),
            )
        } else {
            (
                "/api/v2/mix/order/cancel-order",
                json!({
                    "symbol": market_id,
                    "productType": product.product_type,
                    "marginCoin": product.margin_coin,
                    "orderId": id,
                }),
            )
        };
        let data = self.private_post(path, body).await?;
        debug!(symbol, order_id = id, "order cancelled");
        models::cancel_ack(symbol, id, data)
    }

    /// GET /api/v2/mix/order/detail (signed).
    #[instrument(skip(self, product), name = "bitget::fetch_order")]
    async fn fetch_order(&self, id: &str, symbol: &str, product: &ProductParams) -> Result<Order> {
        let market_id = self.market_id(symbol)?;
        let data = self
            .private_get(
                "/api/v2/mix/order/detail",
                &[
                    ("symbol", market_id),
                    ("productType", product.product_type.clone()),
                    ("orderId", id.to_string()),
                ],
            )
            .await?;
        models::parse_order(symbol, data)
    }

    /// GET /api/v2/mix/order/orders-pending or orders-plan-pending (signed).
    #[instrument(skip(self, product), name = "bitget::fetch_open_orders")]
    async fn fetch_open_orders(
        &self,
        symbol: &str,
        trigger: bool,
        product: &ProductParams,
    ) -> Result<Vec<Order>> {
        let market_id = self.market_id(symbol)?;
        let mut params = vec![
            ("symbol", market_id),
            ("productType", product.product_type.clone()),
        ];
        let path = if trigger {
            params.push(("planType", NORMAL_PLAN.to_string()));
            "/api/v2/mix/order/orders-plan-pending"
        } else {
            "/api/v2/mix/order/orders-pending"
        };
        let data = self.private_get(path, &params).await?;
        let orders = models::parse_order_list(symbol, data)?;
        debug!(count = orders.len(), "open orders retrieved");
        Ok(orders)
    }

    /// GET /api/v2/mix/order/orders-history or orders-plan-history (signed).
    #[instrument(skip(self, product), name = "bitget::fetch_closed_orders")]
    async fn fetch_closed_orders(
        &self,
        symbol: &str,
        trigger: bool,
        product: &ProductParams,
    ) -> Result<Vec<Order>> {
        let market_id = self.market_id(symbol)?;
        let mut params = vec![
            ("symbol", market_id),
            ("productType", product.product_type.clone()),
        ];
        let path = if trigger {
            params.push(("planType", NORMAL_PLAN.to_string()));
            "/api/v2/mix/order/orders-plan-history"
        } else {
            "/api/v2/mix/order/orders-history"
        };
        let data = self.private_get(path, &params).await?;
        let orders = models::parse_order_list(symbol, data)?;
        debug!(count = orders.len(), "closed orders retrieved");
        Ok(orders)
    }
}

impl std::fmt::Debug for BitgetSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitgetSession")
            .field("credentials", &self.credentials)
            .field("base_url", &self.base_url)
            .field("environment", &self.environment)
            .field("markets", &self.markets.read().len())
            .finish()
    }
}
