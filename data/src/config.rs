pub mod timezone;

use crate::aggr::time::{DEFAULT_MAX_CANDLES, SeriesConfig};
use crate::{InternalError, read_from_file, write_json_to_file};
use exchange::{
    Exchange, PriceStep, Ticker, TickerInfo, Timeframe, resilience::RetryPolicy,
};
use timezone::UserTimezone;

use serde::{Deserialize, Serialize};

pub const SESSION_CONFIG_PATH: &str = "footprint-session.json";

pub const DEFAULT_IMBALANCE_RATIO: u32 = 3;

/// Everything a footprint session needs to start, persisted as JSON.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub symbol: String,
    pub exchange: Exchange,
    /// Exchange precision of the symbol, a power of ten
    pub min_ticksize: f32,
    pub timeframe: Timeframe,
    /// Footprint row step, a multiple of `min_ticksize`
    pub tick_size: PriceStep,
    pub imbalance_ratio: u32,
    pub max_candles: usize,
    pub backfill_count: usize,
    pub reconnect: RetryPolicy,
    pub left_offset_px: f32,
    pub timezone: UserTimezone,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            exchange: Exchange::BinanceLinear,
            min_ticksize: 0.1,
            timeframe: Timeframe::M15,
            tick_size: PriceStep::from_units(10 * 100_000_000),
            imbalance_ratio: DEFAULT_IMBALANCE_RATIO,
            max_candles: DEFAULT_MAX_CANDLES,
            backfill_count: DEFAULT_MAX_CANDLES,
            reconnect: RetryPolicy::default(),
            left_offset_px: 0.0,
            timezone: UserTimezone::default(),
        }
    }
}

impl SessionConfig {
    /// Loads the saved session, falling back to defaults when missing or corrupt.
    pub fn load() -> Self {
        match read_from_file::<Self>(SESSION_CONFIG_PATH) {
            Ok(config) => match config.validate() {
                Ok(()) => config,
                Err(err) => {
                    log::warn!("Invalid session config, using defaults: {err}");
                    Self::default()
                }
            },
            Err(err) => {
                log::info!("No usable session config ({err}), using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self) -> Result<(), InternalError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| InternalError::Config(e.to_string()))?;
        write_json_to_file(&json, SESSION_CONFIG_PATH)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), InternalError> {
        if self.imbalance_ratio == 0 {
            return Err(InternalError::Config(
                "imbalance_ratio must be at least 1".to_string(),
            ));
        }
        if self.max_candles == 0 {
            return Err(InternalError::Config(
                "max_candles must be at least 1".to_string(),
            ));
        }
        if self.min_ticksize.is_nan() || self.min_ticksize <= 0.0 {
            return Err(InternalError::Config(format!(
                "min_ticksize must be positive, got {}",
                self.min_ticksize
            )));
        }
        self.ticker_info().map(|_| ())
    }

    pub fn ticker_info(&self) -> Result<TickerInfo, InternalError> {
        let ticker = Ticker::new(&self.symbol, self.exchange)
            .map_err(|e| InternalError::Config(e.to_string()))?;
        Ok(TickerInfo::new(ticker, self.min_ticksize))
    }

    /// Row step, never finer than the exchange tick.
    pub fn effective_tick_size(&self) -> PriceStep {
        let min_step = PriceStep::from(exchange::unit::MinTicksize::from(self.min_ticksize));
        if self.tick_size.units < min_step.units {
            min_step
        } else {
            PriceStep::from_units(self.tick_size.units / min_step.units * min_step.units)
        }
    }

    pub fn series_config(&self) -> SeriesConfig {
        SeriesConfig::new(self.timeframe, self.effective_tick_size())
            .with_max_candles(self.max_candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"symbol":"ETHUSDT","tick_size":"0.5"}"#).unwrap();

        assert_eq!(config.symbol, "ETHUSDT");
        assert_eq!(config.tick_size, "0.5".parse().unwrap());
        assert_eq!(config.imbalance_ratio, 3);
        assert_eq!(config.max_candles, 200);
        assert_eq!(config.timeframe, Timeframe::M15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn round_trips_through_json() {
        let config = SessionConfig {
            timezone: UserTimezone::Local,
            exchange: Exchange::Synthetic,
            ..SessionConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn rejects_unusable_values() {
        let bad_symbol = SessionConfig {
            symbol: "BTC/USDT".to_string(),
            ..SessionConfig::default()
        };
        assert!(matches!(bad_symbol.validate(), Err(InternalError::Config(_))));

        let bad_ratio = SessionConfig {
            imbalance_ratio: 0,
            ..SessionConfig::default()
        };
        assert!(bad_ratio.validate().is_err());
    }

    #[test]
    fn tick_size_snaps_to_exchange_precision() {
        let config = SessionConfig {
            min_ticksize: 0.1,
            tick_size: "0.05".parse().unwrap(),
            ..SessionConfig::default()
        };
        assert_eq!(config.effective_tick_size(), "0.1".parse().unwrap());

        let config = SessionConfig {
            tick_size: "2.55".parse().unwrap(),
            ..config
        };
        assert_eq!(config.effective_tick_size(), "2.5".parse().unwrap());
        assert_eq!(config.series_config().max_candles, 200);
    }
}
