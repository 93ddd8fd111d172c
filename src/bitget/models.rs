// =============================================================================
// Bitget v2 wire models and their mapping onto the unified types
// =============================================================================
//
// Bitget encodes every number as a string and uses empty strings for "not
// applicable", so DTO fields are `Option<String>` and are parsed at mapping
// time. The raw JSON object is kept alongside as `info`.
// =============================================================================

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;

use crate::session::OrderRequest;
use crate::types::{
    Balance, CloseFailure, ClosePositionResult, CoinBalance, MarginMode, Market, Order,
    OrderStatus, OrderType, Position, PositionSide, Ticker,
};

// -----------------------------------------------------------------------------
// Envelope
// -----------------------------------------------------------------------------

/// Success code of the `{code, msg, requestTime, data}` envelope.
pub const SUCCESS_CODE: &str = "00000";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub request_time: Option<i64>,
    #[serde(default)]
    pub data: serde_json::Value,
}

// -----------------------------------------------------------------------------
// Field helpers
// -----------------------------------------------------------------------------

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn num(s: &Option<String>) -> Option<f64> {
    non_empty(s).and_then(|v| v.parse().ok())
}

fn dec(s: &Option<String>) -> Option<Decimal> {
    non_empty(s).and_then(|v| v.parse().ok())
}

fn time_ms(s: &Option<String>) -> Option<DateTime<Utc>> {
    non_empty(s)
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}

fn yes_no(s: &Option<String>) -> Option<bool> {
    match non_empty(s)?.to_ascii_lowercase().as_str() {
        "yes" | "true" => Some(true),
        "no" | "false" => Some(false),
        _ => None,
    }
}

/// Deserialize `value` into `T`, keeping `value` itself for `info`.
fn parse_with_info<T: for<'de> Deserialize<'de>>(
    value: serde_json::Value,
    what: &str,
) -> Result<(T, serde_json::Value)> {
    let dto = serde_json::from_value(value.clone())
        .with_context(|| format!("failed to parse {what}: {value}"))?;
    Ok((dto, value))
}

// -----------------------------------------------------------------------------
// Contracts
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContractDto {
    symbol: String,
    base_coin: String,
    quote_coin: String,
    #[serde(default)]
    support_margin_coins: Vec<String>,
    #[serde(default)]
    price_place: Option<String>,
    #[serde(default)]
    price_end_step: Option<String>,
    #[serde(default)]
    volume_place: Option<String>,
    #[serde(default)]
    size_multiplier: Option<String>,
    #[serde(default)]
    min_trade_num: Option<String>,
    #[serde(default, rename = "minTradeUSDT")]
    min_trade_usdt: Option<String>,
    #[serde(default)]
    min_lever: Option<String>,
    #[serde(default)]
    max_lever: Option<String>,
    #[serde(default)]
    symbol_status: Option<String>,
}

/// `10^-places`, e.g. 2 → 0.01. `None` past `Decimal`'s 28-digit scale.
fn step_from_places(places: u32) -> Option<Decimal> {
    Decimal::try_new(1, places).ok()
}

/// Parse the contracts list into markets keyed by unified symbol.
pub fn parse_markets(data: serde_json::Value) -> Result<HashMap<String, Market>> {
    let rows: Vec<ContractDto> =
        serde_json::from_value(data).context("contracts response is not a list of contracts")?;

    let mut markets = HashMap::with_capacity(rows.len());
    for row in rows {
        match contract_to_market(&row) {
            Some(market) => {
                markets.insert(market.symbol.clone(), market);
            }
            None => warn!(symbol = %row.symbol, "skipping contract with malformed precision fields"),
        }
    }
    Ok(markets)
}

fn contract_to_market(row: &ContractDto) -> Option<Market> {
    let price_place: u32 = non_empty(&row.price_place)?.parse().ok()?;
    let price_end_step = dec(&row.price_end_step).unwrap_or(Decimal::ONE);
    let price_step = price_end_step.checked_mul(step_from_places(price_place)?)?;

    let amount_step = match dec(&row.size_multiplier) {
        Some(m) if m > Decimal::ZERO => m,
        _ => step_from_places(non_empty(&row.volume_place)?.parse().ok()?)?,
    };

    let settle = row
        .support_margin_coins
        .first()
        .cloned()
        .unwrap_or_else(|| row.quote_coin.clone());

    Some(Market {
        symbol: format!("{}/{}:{}", row.base_coin, row.quote_coin, settle),
        id: row.symbol.clone(),
        base: row.base_coin.clone(),
        quote: row.quote_coin.clone(),
        settle,
        amount_step,
        price_step,
        min_amount: dec(&row.min_trade_num).unwrap_or(amount_step),
        min_notional: dec(&row.min_trade_usdt),
        min_leverage: non_empty(&row.min_lever).and_then(|v| v.parse().ok()),
        max_leverage: non_empty(&row.max_lever).and_then(|v| v.parse().ok()),
        active: non_empty(&row.symbol_status).map_or(true, |s| s == "normal"),
    })
}

// -----------------------------------------------------------------------------
// Ticker
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerDto {
    #[serde(default)]
    last_pr: Option<String>,
    #[serde(default)]
    bid_pr: Option<String>,
    #[serde(default)]
    ask_pr: Option<String>,
    #[serde(default)]
    high24h: Option<String>,
    #[serde(default)]
    low24h: Option<String>,
    #[serde(default)]
    base_volume: Option<String>,
    #[serde(default)]
    quote_volume: Option<String>,
    #[serde(default)]
    mark_price: Option<String>,
    #[serde(default)]
    index_price: Option<String>,
    #[serde(default)]
    funding_rate: Option<String>,
    #[serde(default)]
    ts: Option<String>,
}

/// The ticker endpoint answers with a one-element list.
pub fn parse_ticker(symbol: &str, data: serde_json::Value) -> Result<Ticker> {
    let value = match data {
        serde_json::Value::Array(mut rows) if !rows.is_empty() => rows.swap_remove(0),
        serde_json::Value::Object(_) => data,
        other => anyhow::bail!("empty ticker response for {symbol}: {other}"),
    };
    let (dto, info): (TickerDto, _) = parse_with_info(value, "ticker")?;

    Ok(Ticker {
        symbol: symbol.to_string(),
        timestamp: time_ms(&dto.ts),
        last: num(&dto.last_pr),
        bid: num(&dto.bid_pr),
        ask: num(&dto.ask_pr),
        high: num(&dto.high24h),
        low: num(&dto.low24h),
        base_volume: num(&dto.base_volume),
        quote_volume: num(&dto.quote_volume),
        mark_price: num(&dto.mark_price),
        index_price: num(&dto.index_price),
        funding_rate: num(&dto.funding_rate),
        info,
    })
}

// -----------------------------------------------------------------------------
// Candles
// -----------------------------------------------------------------------------

/// Rows are `[ts, open, high, low, close, baseVolume, quoteVolume]`, all
/// strings. Malformed rows are skipped.
pub fn parse_candles(data: serde_json::Value) -> Result<Vec<[f64; 6]>> {
    let rows = data.as_array().context("candles response is not an array")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let fields = match row.as_array() {
            Some(f) if f.len() >= 6 => f,
            _ => {
                warn!(%row, "skipping malformed candle row");
                continue;
            }
        };
        let mut parsed = [0.0_f64; 6];
        let mut ok = true;
        for (slot, field) in parsed.iter_mut().zip(fields.iter()) {
            match json_f64(field) {
                Some(v) => *slot = v,
                None => {
                    ok = false;
                    break;
                }
            }
        }
        if ok {
            out.push(parsed);
        } else {
            warn!(%row, "skipping candle row with non-numeric field");
        }
    }
    Ok(out)
}

fn json_f64(val: &serde_json::Value) -> Option<f64> {
    match val {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

// -----------------------------------------------------------------------------
// Balance
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountDto {
    margin_coin: String,
    #[serde(default)]
    available: Option<String>,
    #[serde(default)]
    account_equity: Option<String>,
    #[serde(default, rename = "unrealizedPL")]
    unrealized_pl: Option<String>,
}

pub fn parse_balance(data: serde_json::Value) -> Result<Balance> {
    let rows: Vec<AccountDto> =
        serde_json::from_value(data.clone()).context("accounts response is not a list")?;

    let coins = rows
        .into_iter()
        .map(|row| {
            let free = num(&row.available).unwrap_or(0.0);
            let total = num(&row.account_equity).unwrap_or(free);
            let balance = CoinBalance {
                free,
                used: (total - free).max(0.0),
                total,
                unrealized_pnl: num(&row.unrealized_pl).unwrap_or(0.0),
            };
            (row.margin_coin, balance)
        })
        .collect();

    Ok(Balance { coins, info: data })
}

// -----------------------------------------------------------------------------
// Orders
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderDto {
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    client_oid: Option<String>,
    #[serde(default)]
    side: Option<String>,
    #[serde(default)]
    order_type: Option<String>,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    base_volume: Option<String>,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    price_avg: Option<String>,
    #[serde(default)]
    trigger_price: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    plan_status: Option<String>,
    #[serde(default)]
    reduce_only: Option<String>,
    #[serde(default)]
    c_time: Option<String>,
}

fn order_status(raw: Option<&str>) -> OrderStatus {
    match raw {
        Some("live" | "new" | "init" | "not_trigger" | "partially_filled" | "partial_fill") => {
            OrderStatus::Open
        }
        Some("filled" | "full_fill" | "executed" | "triggered") => OrderStatus::Closed,
        Some("canceled" | "cancelled" | "fail_trigger") => OrderStatus::Canceled,
        _ => OrderStatus::Unknown,
    }
}

/// Map one order object. `symbol` is the unified symbol of the request.
pub fn parse_order(symbol: &str, value: serde_json::Value) -> Result<Order> {
    let (dto, info): (OrderDto, _) = parse_with_info(value, "order")?;

    let status = order_status(non_empty(&dto.plan_status).or(non_empty(&dto.state)));
    Ok(Order {
        id: dto.order_id.clone().unwrap_or_default(),
        client_order_id: non_empty(&dto.client_oid).map(str::to_string),
        symbol: symbol.to_string(),
        side: non_empty(&dto.side).and_then(|s| s.parse().ok()),
        order_type: match non_empty(&dto.order_type) {
            Some("market") => Some(OrderType::Market),
            Some("limit") => Some(OrderType::Limit),
            _ => None,
        },
        status,
        amount: num(&dto.size),
        filled: num(&dto.base_volume),
        price: num(&dto.price).filter(|p| *p > 0.0),
        average: num(&dto.price_avg).filter(|p| *p > 0.0),
        trigger_price: num(&dto.trigger_price),
        reduce_only: yes_no(&dto.reduce_only),
        timestamp: time_ms(&dto.c_time),
        info,
    })
}

/// List endpoints wrap their rows as `{ entrustedList: [...], endId }`; the
/// list is `null` when there are no orders.
pub fn parse_order_list(symbol: &str, data: serde_json::Value) -> Result<Vec<Order>> {
    let rows = match data {
        serde_json::Value::Array(rows) => rows,
        serde_json::Value::Object(mut obj) => match obj.remove("entrustedList") {
            Some(serde_json::Value::Array(rows)) => rows,
            _ => Vec::new(),
        },
        serde_json::Value::Null => Vec::new(),
        other => anyhow::bail!("unexpected order list shape: {other}"),
    };
    rows.into_iter().map(|row| parse_order(symbol, row)).collect()
}

/// Acknowledgement of a placement: only ids come back, the rest is filled in
/// from what was sent.
pub fn order_ack(symbol: &str, data: serde_json::Value, request: &OrderRequest) -> Result<Order> {
    let id = data
        .get("orderId")
        .and_then(|v| v.as_str())
        .context("order acknowledgement missing orderId")?
        .to_string();
    let client_order_id = data
        .get("clientOid")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    Ok(Order {
        id,
        client_order_id,
        symbol: symbol.to_string(),
        side: Some(request.side),
        order_type: Some(request.order_type),
        status: OrderStatus::Open,
        amount: request.amount.parse().ok(),
        filled: None,
        price: request.price.as_deref().and_then(|p| p.parse().ok()),
        average: None,
        trigger_price: request.trigger_price.as_deref().and_then(|p| p.parse().ok()),
        reduce_only: Some(request.reduce_only),
        timestamp: None,
        info: data,
    })
}

/// Regular cancels echo `{orderId, clientOid}`; plan cancels answer with
/// success and failure lists.
pub fn cancel_ack(symbol: &str, id: &str, data: serde_json::Value) -> Result<Order> {
    if let Some(failures) = data.get("failureList").and_then(|v| v.as_array()) {
        if let Some(failure) = failures.first() {
            let msg = failure
                .get("errorMsg")
                .and_then(|v| v.as_str())
                .unwrap_or("cancel rejected");
            anyhow::bail!("cancel of order {id} on {symbol} failed: {msg}");
        }
    }

    let entry = data
        .get("successList")
        .and_then(|v| v.as_array())
        .and_then(|list| list.first())
        .unwrap_or(&data);

    Ok(Order {
        id: entry
            .get("orderId")
            .and_then(|v| v.as_str())
            .unwrap_or(id)
            .to_string(),
        client_order_id: entry
            .get("clientOid")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        symbol: symbol.to_string(),
        status: OrderStatus::Canceled,
        info: data,
        ..Order::default()
    })
}

// -----------------------------------------------------------------------------
// Positions
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionDto {
    symbol: String,
    #[serde(default)]
    hold_side: Option<String>,
    #[serde(default)]
    total: Option<String>,
    #[serde(default)]
    open_price_avg: Option<String>,
    #[serde(default)]
    mark_price: Option<String>,
    #[serde(default, rename = "unrealizedPL")]
    unrealized_pl: Option<String>,
    #[serde(default)]
    leverage: Option<String>,
    #[serde(default)]
    margin_mode: Option<String>,
    #[serde(default)]
    liquidation_price: Option<String>,
    #[serde(default)]
    u_time: Option<String>,
}

/// Map the all-position list. `resolve` turns an exchange id into a unified
/// symbol; rows it cannot resolve keep the exchange id.
pub fn parse_positions(
    data: serde_json::Value,
    resolve: impl Fn(&str) -> Option<String>,
) -> Result<Vec<Position>> {
    let rows = match data {
        serde_json::Value::Array(rows) => rows,
        serde_json::Value::Null => Vec::new(),
        other => anyhow::bail!("positions response is not a list: {other}"),
    };

    rows.into_iter()
        .map(|row| {
            let (dto, info): (PositionDto, _) = parse_with_info(row, "position")?;
            Ok(Position {
                symbol: resolve(&dto.symbol).unwrap_or_else(|| dto.symbol.clone()),
                side: non_empty(&dto.hold_side).and_then(|s| s.parse::<PositionSide>().ok()),
                contracts: num(&dto.total),
                entry_price: num(&dto.open_price_avg),
                mark_price: num(&dto.mark_price),
                unrealized_pnl: num(&dto.unrealized_pl),
                leverage: num(&dto.leverage),
                margin_mode: non_empty(&dto.margin_mode).and_then(|s| s.parse::<MarginMode>().ok()),
                liquidation_price: num(&dto.liquidation_price).filter(|p| *p > 0.0),
                timestamp: time_ms(&dto.u_time),
                info,
            })
        })
        .collect()
}

pub fn parse_close_result(symbol: &str, data: serde_json::Value) -> Result<ClosePositionResult> {
    let list = |key: &str| -> Vec<serde_json::Value> {
        data.get(key)
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
    };
    let text = |v: &serde_json::Value, key: &str| -> Option<String> {
        v.get(key).and_then(|x| x.as_str()).map(str::to_string)
    };

    let closed = list("successList")
        .into_iter()
        .map(|entry| Order {
            id: text(&entry, "orderId").unwrap_or_default(),
            client_order_id: text(&entry, "clientOid"),
            symbol: symbol.to_string(),
            order_type: Some(OrderType::Market),
            status: OrderStatus::Open,
            info: entry,
            ..Order::default()
        })
        .collect();

    let failed = list("failureList")
        .iter()
        .map(|entry| CloseFailure {
            order_id: text(entry, "orderId"),
            error_code: text(entry, "errorCode"),
            error_msg: text(entry, "errorMsg"),
        })
        .collect();

    Ok(ClosePositionResult { closed, failed })
}
