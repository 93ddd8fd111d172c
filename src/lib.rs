// =============================================================================
// bitget-futures — Bitget USDT-M perpetual futures client
// =============================================================================
//
// `BitgetFutures` is the entry point. It wraps an `ExchangeSession` (the signed
// REST session in `bitget`, or any other implementation) and adds market
// precision handling, candle backfill and the trigger order error policy.
// =============================================================================

pub mod bitget;
pub mod config;
pub mod error;
pub mod futures;
pub mod ohlcv;
pub mod precision;
pub mod session;
pub mod types;

#[cfg(test)]
mod testing;

pub use bitget::BitgetSession;
pub use config::ClientConfig;
pub use error::ExchangeError;
pub use futures::BitgetFutures;
pub use ohlcv::Timeframe;
pub use session::{ExchangeSession, ProductParams};
