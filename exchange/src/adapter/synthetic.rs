//! Locally generated market data for when no venue is reachable.

use super::{Event, Exchange};
use crate::{
    Kline, Price, PriceStep, Qty, TickerInfo, Timeframe, Trade, TradeSide, Volume,
    resilience::sleep_or_cancel,
};

use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Floor for the walk anchor of very fine tick sizes.
const MIN_ANCHOR: Price = Price::from_units(100 * 100_000_000);
/// Anchor distance from zero in exchange ticks.
const ANCHOR_TICKS: i64 = 1_000_000;

const TRADE_INTERVAL: Duration = Duration::from_millis(250);
const MAX_TRADES_PER_BATCH: usize = 5;

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Price the generated walk is anchored to (the close of the newest kline).
///
/// Scaled from the exchange tick so footprint rows coarser than the tick still
/// see several levels per bar.
pub fn anchor_price(ticker_info: TickerInfo) -> Price {
    let tick = PriceStep::from(ticker_info.min_ticksize);
    Price::from_units(tick.units.saturating_mul(ANCHOR_TICKS)).max(MIN_ANCHOR)
}

/// `limit` klines ending with the bucket that contains `now_ms`, oldest first.
pub fn klines(ticker_info: TickerInfo, timeframe: Timeframe, limit: usize, now_ms: u64) -> Vec<Kline> {
    klines_with_rng(ticker_info, timeframe, limit, now_ms, &mut StdRng::from_entropy())
}

pub fn klines_with_rng<R: Rng>(
    ticker_info: TickerInfo,
    timeframe: Timeframe,
    limit: usize,
    now_ms: u64,
    rng: &mut R,
) -> Vec<Kline> {
    let tick = PriceStep::from(ticker_info.min_ticksize);
    let interval = timeframe.to_milliseconds();
    let newest = timeframe.bucket_start(now_ms);

    let mut close = anchor_price(ticker_info);
    let mut bars = Vec::with_capacity(limit);

    // walk backwards from the anchor so the live stream continues where history ends
    for i in 0..limit as u64 {
        let Some(time) = i
            .checked_mul(interval)
            .and_then(|offset| newest.checked_sub(offset))
        else {
            break;
        };

        let open = nudge(close, rng.gen_range(-0.004..0.004), tick);
        let body_high = open.max(close);
        let body_low = open.min(close);
        let high = nudge(body_high, rng.gen_range(0.0..0.002), tick).max(body_high);
        let low = nudge(body_low, -rng.gen_range(0.0..0.002), tick).min(body_low);

        let total = Qty::from_f64(rng.gen_range(50.0..500.0));
        let lean: f64 = if close > open {
            0.1
        } else if close < open {
            -0.1
        } else {
            0.0
        };
        let buy_ratio = (0.5 + lean + rng.gen_range(-0.05..0.05)).clamp(0.0, 1.0);
        let buy = Qty::from_units((total.units as f64 * buy_ratio).round() as i64);

        bars.push(Kline::new(
            time,
            (open, high, low, close),
            Volume::BuySell(buy, total - buy),
            ticker_info.min_ticksize,
        ));
        close = open;
    }

    bars.reverse();
    bars
}

fn nudge(price: Price, pct: f64, tick: PriceStep) -> Price {
    let moved = Price::from_f64(price.to_f64() * (1.0 + pct)).round_to_step(tick);
    moved.max(Price::from_units(tick.units))
}

/// Random-walk trade generator
pub struct SyntheticMarket<R> {
    price: Price,
    tick: PriceStep,
    rng: R,
}

impl<R: Rng> SyntheticMarket<R> {
    pub fn new(ticker_info: TickerInfo, rng: R) -> Self {
        let tick = PriceStep::from(ticker_info.min_ticksize);
        Self {
            price: anchor_price(ticker_info).round_to_step(tick),
            tick,
            rng,
        }
    }

    pub fn next_batch(&mut self, time: u64) -> Box<[Trade]> {
        let count = self.rng.gen_range(1..=MAX_TRADES_PER_BATCH);

        (0..count)
            .map(|_| {
                let steps = self.rng.gen_range(-2..=2);
                self.price = self
                    .price
                    .add_steps(steps, self.tick)
                    .max(Price::from_units(self.tick.units));

                let side = if self.rng.gen_bool(0.5) {
                    TradeSide::Buy
                } else {
                    TradeSide::Sell
                };

                Trade {
                    time,
                    price: self.price,
                    qty: Qty::from_f64(self.rng.gen_range(0.001..2.0)),
                    side,
                }
            })
            .filter(|trade| trade.qty.is_positive())
            .collect()
    }
}

pub async fn run_trade_stream(
    ticker_info: TickerInfo,
    cancel: CancellationToken,
    output: mpsc::Sender<Event>,
) {
    let exchange = Exchange::Synthetic;
    let mut market = SyntheticMarket::new(ticker_info, StdRng::from_entropy());

    log::info!("[{exchange}] generating trades for {}", ticker_info.ticker);
    if output.send(Event::Connected(exchange)).await.is_err() {
        return;
    }

    while sleep_or_cancel(TRADE_INTERVAL, &cancel).await {
        let trades = market.next_batch(now_ms());
        if output
            .send(Event::TradesReceived(exchange, trades))
            .await
            .is_err()
        {
            break;
        }
    }

    log::debug!("[{exchange}] trade stream stopped");
}
