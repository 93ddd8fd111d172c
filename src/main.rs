// =============================================================================
// bitget-futures — operator CLI
// =============================================================================
//
// Credentials come from `BITGET_*` environment variables (a `.env` file is
// honoured) or from a JSON config passed with `--config`. Every command prints
// its result as JSON on stdout; logs go to stderr.
// =============================================================================

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bitget_futures::types::{Environment, MarginMode, PositionSide};
use bitget_futures::{BitgetFutures, ClientConfig, Timeframe};

#[derive(Parser)]
#[command(name = "bitget-futures")]
#[command(about = "Bitget USDT-M perpetual futures client")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// JSON client config; environment variables are used when absent
    #[arg(short, long, env = "BITGET_CONFIG")]
    config: Option<PathBuf>,

    /// Route requests to the paper trading environment
    #[arg(long)]
    demo: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Latest ticker for a symbol
    Ticker {
        /// Unified symbol (e.g. "BTC/USDT:USDT") or exchange id ("BTCUSDT")
        symbol: String,
    },

    /// Cached market metadata
    Markets {
        /// Only show markets whose symbol contains this text
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Futures account balance
    Balance,

    /// Open positions on a symbol
    Positions { symbol: String },

    /// Open orders on a symbol
    Orders {
        symbol: String,

        /// Query trigger (plan) orders instead of regular orders
        #[arg(long)]
        trigger: bool,

        /// Closed trigger orders (implies --trigger)
        #[arg(long)]
        closed: bool,
    },

    /// Recent candles, oldest first
    Ohlcv {
        symbol: String,

        /// 1m, 5m, 15m, 30m, 1h, 2h, 4h or 1d
        #[arg(short, long, default_value = "1h")]
        timeframe: Timeframe,

        #[arg(short = 'n', long, default_value = "100")]
        limit: u32,
    },

    /// Set leverage (both sides under isolated margin)
    Leverage {
        symbol: String,

        #[arg(short, long)]
        leverage: u32,

        /// isolated or cross
        #[arg(short, long, default_value = "cross")]
        mode: MarginMode,
    },

    /// Switch the margin mode of a symbol
    MarginMode {
        symbol: String,

        /// isolated or cross
        mode: MarginMode,
    },

    /// Market-close a position
    Close {
        symbol: String,

        /// long or short; both sides when omitted
        #[arg(short, long)]
        side: Option<PositionSide>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::from_env()?,
    };
    if cli.demo {
        config.environment = Environment::Demo;
    }
    if config.credentials().is_none() {
        warn!("no API credentials configured; only public commands will succeed");
    }

    info!(environment = %config.environment, "connecting to Bitget");
    let client = BitgetFutures::new(config).await?;

    match cli.command {
        Commands::Ticker { symbol } => print_json(&client.fetch_ticker(&symbol).await?),
        Commands::Markets { filter } => {
            let mut markets: Vec<_> = client
                .markets()
                .values()
                .filter(|m| filter.as_deref().map_or(true, |f| m.symbol.contains(f)))
                .collect();
            markets.sort_by(|a, b| a.symbol.cmp(&b.symbol));
            print_json(&markets)
        }
        Commands::Balance => print_json(&client.fetch_balance().await?),
        Commands::Positions { symbol } => print_json(&client.fetch_open_positions(&symbol).await?),
        Commands::Orders {
            symbol,
            trigger,
            closed,
        } => {
            let orders = if closed {
                client.fetch_closed_trigger_orders(&symbol).await?
            } else if trigger {
                client.fetch_open_trigger_orders(&symbol).await?
            } else {
                client.fetch_open_orders(&symbol).await?
            };
            print_json(&orders)
        }
        Commands::Ohlcv {
            symbol,
            timeframe,
            limit,
        } => print_json(&client.fetch_recent_ohlcv(&symbol, timeframe.as_str(), limit).await?),
        Commands::Leverage {
            symbol,
            leverage,
            mode,
        } => {
            client.set_leverage(&symbol, mode, leverage).await?;
            info!(%symbol, leverage, margin_mode = %mode, "leverage updated");
            Ok(())
        }
        Commands::MarginMode { symbol, mode } => {
            client.set_margin_mode(&symbol, mode).await?;
            info!(%symbol, margin_mode = %mode, "margin mode updated");
            Ok(())
        }
        Commands::Close { symbol, side } => {
            print_json(&client.flash_close_position(&symbol, side).await?)
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
