use super::{Ticker, Timeframe};
use crate::{Kline, MalformedTrade, TickerInfo, Trade, resilience::RetryPolicy};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use std::str::FromStr;

pub mod binance;
pub mod synthetic;

/// Buffered transport events before the producer awaits the consumer.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

#[derive(thiserror::Error, Debug)]
pub enum AdapterError {
    #[error("{0}")]
    FetchError(#[from] reqwest::Error),
    #[error("Parsing: {0}")]
    ParseError(String),
    #[error("Stream: {0}")]
    WebsocketError(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl AdapterError {
    pub fn to_user_message(&self) -> &'static str {
        match self {
            AdapterError::InvalidRequest(err) => {
                log::error!("Adapter invalid request: {err}");
                "Invalid request made to the exchange. Check logs for details."
            }
            AdapterError::FetchError(err) => {
                log::error!("Adapter fetch error: {err}");
                "Network error while contacting the exchange."
            }
            AdapterError::ParseError(err) => {
                log::error!("Adapter parse error: {err}");
                "Unexpected response from the exchange. Check logs for details."
            }
            AdapterError::WebsocketError(err) => {
                log::error!("Adapter websocket error: {err}");
                "Realtime connection error. Trying to reconnect..."
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum MarketKind {
    Spot,
    LinearPerps,
}

impl std::fmt::Display for MarketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                MarketKind::Spot => "Spot",
                MarketKind::LinearPerps => "Linear",
            }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Exchange {
    BinanceLinear,
    BinanceSpot,
    /// Locally generated trades and klines, used when no venue is reachable.
    Synthetic,
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Exchange::BinanceLinear => "Binance Linear",
                Exchange::BinanceSpot => "Binance Spot",
                Exchange::Synthetic => "Synthetic",
            }
        )
    }
}

impl FromStr for Exchange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Binance Linear" => Ok(Exchange::BinanceLinear),
            "Binance Spot" => Ok(Exchange::BinanceSpot),
            "Synthetic" => Ok(Exchange::Synthetic),
            _ => Err(format!("Invalid exchange: {}", s)),
        }
    }
}

impl Exchange {
    pub const ALL: [Exchange; 3] = [
        Exchange::BinanceLinear,
        Exchange::BinanceSpot,
        Exchange::Synthetic,
    ];

    pub fn market_type(&self) -> MarketKind {
        match self {
            Exchange::BinanceLinear => MarketKind::LinearPerps,
            Exchange::BinanceSpot | Exchange::Synthetic => MarketKind::Spot,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, Exchange::Synthetic)
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    Connected(Exchange),
    Disconnected(Exchange, String),
    TradesReceived(Exchange, Box<[Trade]>),
    /// A trade payload that parsed as JSON but failed validation
    Malformed(Exchange, MalformedTrade),
}

/// Most recent `limit` closed-or-forming klines, oldest first.
pub async fn fetch_klines(
    ticker_info: TickerInfo,
    timeframe: Timeframe,
    limit: usize,
) -> Result<Vec<Kline>, AdapterError> {
    if limit == 0 {
        return Ok(vec![]);
    }

    match ticker_info.ticker.exchange {
        Exchange::BinanceLinear | Exchange::BinanceSpot => {
            binance::fetch_klines(ticker_info, timeframe, limit).await
        }
        Exchange::Synthetic => Ok(synthetic::klines(
            ticker_info,
            timeframe,
            limit,
            synthetic::now_ms(),
        )),
    }
}

/// Spawns the trade stream task and hands back its event receiver.
///
/// The task reconnects according to `policy` until `cancel` fires or the
/// receiver is dropped.
pub fn connect_trade_stream(
    ticker_info: TickerInfo,
    policy: RetryPolicy,
    cancel: CancellationToken,
) -> mpsc::Receiver<Event> {
    let (output, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    match ticker_info.ticker.exchange {
        Exchange::BinanceLinear | Exchange::BinanceSpot => {
            tokio::spawn(binance::run_trade_stream(ticker_info, policy, cancel, output));
        }
        Exchange::Synthetic => {
            tokio::spawn(synthetic::run_trade_stream(ticker_info, cancel, output));
        }
    }

    rx
}

/// Same ticker on the synthetic venue, keeping its tick precision.
pub fn synthetic_counterpart(ticker_info: TickerInfo) -> Result<TickerInfo, AdapterError> {
    let ticker = Ticker::new(ticker_info.ticker.as_str(), Exchange::Synthetic)?;
    Ok(TickerInfo {
        ticker,
        min_ticksize: ticker_info.min_ticksize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_names_round_trip_through_display() {
        for exchange in Exchange::ALL {
            assert_eq!(exchange.to_string().parse::<Exchange>(), Ok(exchange));
        }
        assert!("Kraken".parse::<Exchange>().is_err());
    }

    #[test]
    fn synthetic_counterpart_keeps_symbol() {
        let ticker = Ticker::new("BTCUSDT", Exchange::BinanceLinear).unwrap();
        let info = TickerInfo::new(ticker, 0.1);
        let fallback = synthetic_counterpart(info).unwrap();

        assert_eq!(fallback.ticker.as_str(), "BTCUSDT");
        assert!(fallback.exchange().is_synthetic());
        assert_eq!(fallback.min_ticksize, info.min_ticksize);
    }
}
