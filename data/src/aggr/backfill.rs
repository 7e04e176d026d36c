//! Estimated footprints for historical bars that carry no trade-level detail.
//!
//! Volume is spread over the bar's range with a bell curve centred on the body and
//! split into bid/ask with a direction bias. The result is a visual approximation,
//! every candle produced here is labelled [`FootprintSource::Estimated`].
//!
//! [`FootprintSource::Estimated`]: crate::chart::FootprintSource::Estimated

use crate::chart::kline::{Candle, PriceLevel, PriceLevelTable};

use exchange::{Kline, Price, PriceStep, Qty, Timeframe};
use rand::Rng;

use std::collections::BTreeMap;

/// Upper bound on generated levels per bar; the step is widened past it.
pub const MAX_SYNTHETIC_LEVELS: usize = 100;

const WEIGHT_JITTER: std::ops::Range<f64> = 0.85..1.15;
const RATIO_JITTER: f64 = 0.05;
const DIRECTION_BIAS: f64 = 0.25;

/// Bars whose bucket ended before `now_ms`, i.e. without the still forming one.
pub fn closed_bars(bars: &[Kline], timeframe: Timeframe, now_ms: u64) -> Vec<Kline> {
    let current = timeframe.bucket_start(now_ms);
    bars.iter()
        .filter(|bar| timeframe.bucket_start(bar.time) < current)
        .copied()
        .collect()
}

/// Estimated candles for `bars`, time-ascending, cvd running from `starting_cvd`.
///
/// Open times are aligned down to the timeframe; for duplicate buckets the last bar wins.
pub fn seed<R: Rng>(
    bars: &[Kline],
    timeframe: Timeframe,
    tick_size: PriceStep,
    starting_cvd: Qty,
    rng: &mut R,
) -> Vec<Candle> {
    let aligned: BTreeMap<u64, &Kline> = bars
        .iter()
        .map(|bar| (timeframe.bucket_start(bar.time), bar))
        .collect();

    let mut cvd = starting_cvd;

    aligned
        .into_iter()
        .map(|(open_time, bar)| {
            let levels = estimate_levels(bar, tick_size, rng);
            let candle = Candle::estimated(
                open_time,
                (bar.open, bar.high, bar.low, bar.close),
                levels,
                cvd,
            );
            cvd = candle.cvd();
            candle
        })
        .collect()
}

/// Level prices for `[low, high]`, widening `step` until at most `MAX_SYNTHETIC_LEVELS` remain.
///
/// A bar narrower than one step gets a single level at the multiple nearest `mid`,
/// which lies between its quantized low and high.
fn level_prices(low: Price, high: Price, mid: Price, step: PriceStep) -> Vec<Price> {
    let first = low.ceil_to_step(step);
    let last = high.floor_to_step(step);

    let Some(count) = Price::steps_between_inclusive(first, last, step) else {
        return vec![mid.round_to_step(step)];
    };

    if count > MAX_SYNTHETIC_LEVELS {
        let factor = count.div_ceil(MAX_SYNTHETIC_LEVELS) as i64;
        return level_prices(low, high, mid, step.scaled(factor));
    }

    (0..count as i64).map(|i| first.add_steps(i, step)).collect()
}

fn estimate_levels<R: Rng>(bar: &Kline, step: PriceStep, rng: &mut R) -> PriceLevelTable {
    let total = bar.volume.total();
    if !total.is_positive() || bar.high < bar.low {
        return PriceLevelTable::new();
    }

    let mid = Price::from_units(bar.open.units.midpoint(bar.close.units));
    let prices = level_prices(bar.low, bar.high, mid, step);

    let low = bar.low.to_f64();
    let range = bar.high.to_f64() - low;
    let body_mid = (bar.open.to_f64() + bar.close.to_f64()) / 2.0;
    let sigma = (range / 4.0).max(step.to_f32_lossy() as f64).max(f64::EPSILON);

    let positions: Vec<f64> = prices
        .iter()
        .map(|p| {
            if range > 0.0 {
                ((p.to_f64() - low) / range).clamp(0.0, 1.0)
            } else {
                0.5
            }
        })
        .collect();

    let weights: Vec<f64> = prices
        .iter()
        .map(|p| {
            let z = (p.to_f64() - body_mid) / sigma;
            (-0.5 * z * z).exp() * rng.gen_range(WEIGHT_JITTER)
        })
        .collect();

    let allocations = allocate_units(total.units, &weights);
    let baseline = bar.volume.buy_ratio().unwrap_or(0.5);

    prices
        .iter()
        .zip(positions)
        .zip(allocations)
        .map(|((&price, pos), units)| {
            let ratio = bid_ratio(baseline, pos, bar.is_bullish(), bar.is_bearish())
                + rng.gen_range(-RATIO_JITTER..RATIO_JITTER);
            let ratio = ratio.clamp(0.05, 0.95);

            let bid_units = ((units as f64) * ratio).round() as i64;
            let bid_units = bid_units.clamp(0, units);

            PriceLevel {
                price,
                bid_qty: Qty::from_units(bid_units),
                ask_qty: Qty::from_units(units - bid_units),
            }
        })
        .collect()
}

/// Bid share at relative position `pos` (0 = low, 1 = high) before jitter.
///
/// Bullish bars get extra bid volume towards the low, bearish bars extra ask
/// volume towards the high.
fn bid_ratio(baseline: f64, pos: f64, bullish: bool, bearish: bool) -> f64 {
    if bullish {
        baseline + DIRECTION_BIAS * (1.0 - pos)
    } else if bearish {
        let ask = (1.0 - baseline) + DIRECTION_BIAS * pos;
        1.0 - ask
    } else {
        baseline
    }
}

/// Splits `total` units proportionally to `weights`; the remainder goes to the heaviest entry.
fn allocate_units(total: i64, weights: &[f64]) -> Vec<i64> {
    let sum: f64 = weights.iter().sum();
    if weights.is_empty() {
        return vec![];
    }

    let mut out: Vec<i64> = if sum > 0.0 {
        weights
            .iter()
            .map(|w| ((total as f64) * (w / sum)).floor() as i64)
            .collect()
    } else {
        vec![0; weights.len()]
    };

    // float rounding can overshoot by a unit or two
    let mut assigned: i64 = out.iter().sum();
    while assigned > total {
        if let Some(max) = out.iter_mut().max() {
            *max -= 1;
        }
        assigned -= 1;
    }

    let heaviest = weights
        .iter()
        .enumerate()
        .fold(0, |best, (i, w)| if *w > weights[best] { i } else { best });
    out[heaviest] += total - assigned;
    out
}
