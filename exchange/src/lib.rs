pub mod adapter;
pub mod connect;
pub mod health;
pub mod resilience;
pub mod unit;

pub use adapter::{AdapterError, Event, Exchange, MarketKind};
pub use unit::price::{Price, PriceStep};
pub use unit::qty::Qty;
use unit::{MinTicksize, UnitParseError};

use serde::{Deserialize, Deserializer, Serialize};

use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, PartialOrd, Ord)]
pub enum Timeframe {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H12,
    D1,
}

impl Timeframe {
    pub const KLINE: [Timeframe; 10] = [
        Timeframe::M1,
        Timeframe::M3,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H2,
        Timeframe::H4,
        Timeframe::H12,
        Timeframe::D1,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn to_minutes(self) -> u16 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M3 => 3,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H2 => 120,
            Timeframe::H4 => 240,
            Timeframe::H12 => 720,
            Timeframe::D1 => 1440,
        }
    }

    pub fn to_milliseconds(self) -> u64 {
        u64::from(self.to_minutes()) * 60_000
    }

    /// Start of the bucket containing `time` (epoch ms)
    pub fn bucket_start(self, time: u64) -> u64 {
        let interval = self.to_milliseconds();
        (time / interval) * interval
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Timeframe> for u64 {
    fn from(timeframe: Timeframe) -> u64 {
        timeframe.to_milliseconds()
    }
}

impl TryFrom<u64> for Timeframe {
    type Error = InvalidTimeframe;

    fn try_from(ms: u64) -> Result<Self, Self::Error> {
        Timeframe::KLINE
            .into_iter()
            .find(|tf| tf.to_milliseconds() == ms)
            .ok_or(InvalidTimeframe(ms))
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::KLINE
            .into_iter()
            .find(|tf| tf.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown timeframe {s:?}"))
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("no timeframe lasts {0} ms")]
pub struct InvalidTimeframe(pub u64);

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticker {
    bytes: [u8; Ticker::MAX_LEN],
    pub exchange: Exchange,
}

impl Ticker {
    const MAX_LEN: usize = 28;

    pub fn new(symbol: &str, exchange: Exchange) -> Result<Self, AdapterError> {
        if symbol.is_empty() || symbol.len() > Self::MAX_LEN {
            return Err(AdapterError::InvalidRequest(format!(
                "Ticker length out of range: {symbol:?}"
            )));
        }
        if !is_symbol_supported(symbol, exchange, true) {
            return Err(AdapterError::InvalidRequest(format!(
                "Unsupported ticker: {symbol:?}"
            )));
        }

        let mut bytes = [0u8; Self::MAX_LEN];
        bytes[..symbol.len()].copy_from_slice(symbol.as_bytes());

        Ok(Ticker { bytes, exchange })
    }

    pub fn as_str(&self) -> &str {
        let end = self
            .bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(Self::MAX_LEN);
        // constructor only admits ASCII
        std::str::from_utf8(&self.bytes[..end]).unwrap_or_default()
    }

    pub fn market_type(&self) -> MarketKind {
        self.exchange.market_type()
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ticker({}:{})", self.exchange, self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickerInfo {
    pub ticker: Ticker,
    pub min_ticksize: MinTicksize,
}

impl TickerInfo {
    pub fn new(ticker: Ticker, min_ticksize: f32) -> Self {
        Self {
            ticker,
            min_ticksize: MinTicksize::from(min_ticksize),
        }
    }

    pub fn market_type(&self) -> MarketKind {
        self.ticker.market_type()
    }

    pub fn exchange(&self) -> Exchange {
        self.ticker.exchange
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn is_sell(self) -> bool {
        matches!(self, TradeSide::Sell)
    }
}

impl FromStr for TradeSide {
    type Err = MalformedTrade;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" | "b" | "bid" => Ok(TradeSide::Buy),
            "sell" | "s" | "ask" => Ok(TradeSide::Sell),
            other => Err(MalformedTrade::Side(other.to_string())),
        }
    }
}

/// An executed trade. `side` is the aggressor: buys lift the ask and land in bid volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trade {
    pub time: u64,
    pub price: Price,
    pub qty: Qty,
    pub side: TradeSide,
}

impl Trade {
    pub fn is_sell(&self) -> bool {
        self.side.is_sell()
    }
}

/// Trade as it arrives on the wire, before any field is trusted.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTrade {
    pub time: u64,
    pub price: String,
    pub qty: String,
    pub side: String,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedTrade {
    #[error("bad price: {0}")]
    Price(UnitParseError),
    #[error("bad quantity: {0}")]
    Qty(UnitParseError),
    #[error("unknown side: {0:?}")]
    Side(String),
    #[error("non-positive {field}: {value}")]
    NonPositive { field: &'static str, value: String },
}

impl TryFrom<RawTrade> for Trade {
    type Error = MalformedTrade;

    fn try_from(raw: RawTrade) -> Result<Self, Self::Error> {
        let price: Price = raw.price.parse().map_err(MalformedTrade::Price)?;
        let qty: Qty = raw.qty.parse().map_err(MalformedTrade::Qty)?;
        let side: TradeSide = raw.side.parse()?;

        if !price.is_positive() {
            return Err(MalformedTrade::NonPositive {
                field: "price",
                value: raw.price,
            });
        }
        if !qty.is_positive() {
            return Err(MalformedTrade::NonPositive {
                field: "qty",
                value: raw.qty,
            });
        }

        Ok(Trade {
            time: raw.time,
            price,
            qty,
            side,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kline {
    pub time: u64,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Volume,
}

impl Kline {
    pub fn new(
        time: u64,
        (open, high, low, close): (Price, Price, Price, Price),
        volume: Volume,
        min_ticksize: MinTicksize,
    ) -> Self {
        Self {
            time,
            open: open.round_to_min_tick(min_ticksize),
            high: high.round_to_min_tick(min_ticksize),
            low: low.round_to_min_tick(min_ticksize),
            close: close.round_to_min_tick(min_ticksize),
            volume,
        }
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Volume {
    TotalOnly(Qty),
    BuySell(Qty, Qty),
}

impl Volume {
    pub fn total(&self) -> Qty {
        match self {
            Volume::TotalOnly(qty) => *qty,
            Volume::BuySell(buy, sell) => *buy + *sell,
        }
    }

    pub fn buy_sell(&self) -> Option<(Qty, Qty)> {
        match self {
            Volume::BuySell(buy, sell) => Some((*buy, *sell)),
            Volume::TotalOnly(_) => None,
        }
    }

    /// Share of taker buys in the total, when the source reports it.
    pub fn buy_ratio(&self) -> Option<f64> {
        let (buy, sell) = self.buy_sell()?;
        let total = (buy + sell).to_f64();
        (total > 0.0).then(|| buy.to_f64() / total)
    }
}

pub fn is_symbol_supported(symbol: &str, exchange: Exchange, log: bool) -> bool {
    let valid_symbol = symbol
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if valid_symbol {
        return true;
    } else if log {
        log::warn!("Unsupported ticker: '{}': {:?}", exchange, symbol);
    }
    false
}

fn de_string_to_price<'de, D>(deserializer: D) -> Result<Price, D::Error>
where
    D: Deserializer<'de>,
{
    let s: &str = Deserialize::deserialize(deserializer)?;
    s.parse::<Price>().map_err(serde::de::Error::custom)
}

fn de_string_to_qty<'de, D>(deserializer: D) -> Result<Qty, D::Error>
where
    D: Deserializer<'de>,
{
    let s: &str = Deserialize::deserialize(deserializer)?;
    s.parse::<Qty>().map_err(serde::de::Error::custom)
}
