use exchange::{
    Trade, TradeSide,
    unit::price::{Price, PriceStep},
    unit::qty::Qty,
};

use std::collections::BTreeMap;

/// Accumulated aggressor volume at one quantized price.
///
/// Buys lift the offer and are counted as bid volume, sells hit the bid and are
/// counted as ask volume. Both sides only grow for the life of the candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: Price,
    pub bid_qty: Qty,
    pub ask_qty: Qty,
}

impl PriceLevel {
    pub fn new(price: Price) -> Self {
        Self {
            price,
            bid_qty: Qty::ZERO,
            ask_qty: Qty::ZERO,
        }
    }

    pub fn add(&mut self, side: TradeSide, qty: Qty) {
        match side {
            TradeSide::Buy => self.bid_qty += qty,
            TradeSide::Sell => self.ask_qty += qty,
        }
    }

    pub fn total_qty(&self) -> Qty {
        self.bid_qty + self.ask_qty
    }

    pub fn delta_qty(&self) -> Qty {
        self.bid_qty - self.ask_qty
    }
}

/// Per-candle footprint, ordered by price with unique keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriceLevelTable {
    levels: BTreeMap<Price, PriceLevel>,
}

impl PriceLevelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the trade to the bin at the nearest step multiple (ties round up).
    pub fn add_trade(&mut self, trade: &Trade, step: PriceStep) -> Price {
        let price = trade.price.round_to_step(step);
        self.add(price, trade.side, trade.qty);
        price
    }

    /// Adds to an already quantized price key, creating the level when missing.
    pub fn add(&mut self, price: Price, side: TradeSide, qty: Qty) {
        self.levels
            .entry(price)
            .or_insert_with(|| PriceLevel::new(price))
            .add(side, qty);
    }

    pub fn get(&self, price: Price) -> Option<&PriceLevel> {
        self.levels.get(&price)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Ascending by price
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &PriceLevel> {
        self.levels.values()
    }

    /// Levels within `[low, high]`, highest price first.
    pub fn descending_within(&self, low: Price, high: Price) -> Vec<PriceLevel> {
        if low > high {
            return vec![];
        }
        self.levels.range(low..=high).rev().map(|(_, l)| *l).collect()
    }

    /// `(delta, volume)` summed over every level.
    pub fn totals(&self) -> (Qty, Qty) {
        self.levels
            .values()
            .fold((Qty::ZERO, Qty::ZERO), |(delta, volume), level| {
                (delta + level.delta_qty(), volume + level.total_qty())
            })
    }
}

impl FromIterator<PriceLevel> for PriceLevelTable {
    fn from_iter<I: IntoIterator<Item = PriceLevel>>(iter: I) -> Self {
        let mut table = PriceLevelTable::new();
        for level in iter {
            table.add(level.price, TradeSide::Buy, level.bid_qty);
            table.add(level.price, TradeSide::Sell, level.ask_qty);
        }
        table
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CandleStatus {
    #[default]
    Open,
    Closed,
}

/// Where a candle's footprint came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FootprintSource {
    /// Accumulated from executed trades
    #[default]
    Traded,
    /// Approximated from an OHLCV bar, not ground truth
    Estimated,
}

/// A timeframe bucket with its OHLC summary and footprint.
///
/// `delta`, `volume` and `cvd` are derived from the levels and never set directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candle {
    pub open_time: u64,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    levels: PriceLevelTable,
    delta: Qty,
    volume: Qty,
    /// cvd of the preceding candle
    cvd_base: Qty,
    cvd: Qty,
    status: CandleStatus,
    source: FootprintSource,
}

impl Candle {
    /// Fresh open candle seeded from a single price, with empty levels.
    pub fn open_at(open_time: u64, price: Price, cvd_base: Qty) -> Self {
        Self {
            open_time,
            open: price,
            high: price,
            low: price,
            close: price,
            levels: PriceLevelTable::new(),
            delta: Qty::ZERO,
            volume: Qty::ZERO,
            cvd_base,
            cvd: cvd_base,
            status: CandleStatus::Open,
            source: FootprintSource::Traded,
        }
    }

    /// Closed candle whose footprint was synthesized from a bar.
    pub fn estimated(
        open_time: u64,
        (open, high, low, close): (Price, Price, Price, Price),
        levels: PriceLevelTable,
        cvd_base: Qty,
    ) -> Self {
        let mut candle = Self {
            open_time,
            open,
            high,
            low,
            close,
            levels,
            delta: Qty::ZERO,
            volume: Qty::ZERO,
            cvd_base,
            cvd: cvd_base,
            status: CandleStatus::Closed,
            source: FootprintSource::Estimated,
        };
        candle.recompute();
        candle
    }

    pub fn apply_trade(&mut self, trade: &Trade, step: PriceStep) {
        self.levels.add_trade(trade, step);

        self.high = self.high.max(trade.price);
        self.low = self.low.min(trade.price);
        self.close = trade.price;

        self.recompute();
    }

    fn recompute(&mut self) {
        let (delta, volume) = self.levels.totals();
        self.delta = delta;
        self.volume = volume;
        self.cvd = self.cvd_base + delta;
    }

    pub fn close(&mut self) {
        self.status = CandleStatus::Closed;
    }

    pub(crate) fn reopen(&mut self) {
        self.status = CandleStatus::Open;
    }

    pub fn is_open(&self) -> bool {
        self.status == CandleStatus::Open
    }

    pub fn source(&self) -> FootprintSource {
        self.source
    }

    pub fn is_estimated(&self) -> bool {
        self.source == FootprintSource::Estimated
    }

    pub fn levels(&self) -> &PriceLevelTable {
        &self.levels
    }

    /// Levels between the candle's low and high once both are quantized to `step`,
    /// highest first. Edge trades round outward onto keys past the raw range.
    pub fn levels_in_range(&self, step: PriceStep) -> Vec<PriceLevel> {
        self.levels
            .descending_within(self.low.round_to_step(step), self.high.round_to_step(step))
    }

    pub fn delta(&self) -> Qty {
        self.delta
    }

    pub fn volume(&self) -> Qty {
        self.volume
    }

    pub fn cvd(&self) -> Qty {
        self.cvd
    }

    pub fn cvd_base(&self) -> Qty {
        self.cvd_base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(v: &str) -> Price {
        v.parse().unwrap()
    }

    fn q(v: &str) -> Qty {
        v.parse().unwrap()
    }

    fn trade(price: &str, qty: &str, side: TradeSide) -> Trade {
        Trade {
            time: 0,
            price: p(price),
            qty: q(qty),
            side,
        }
    }

    #[test]
    fn trades_land_on_the_nearest_step() {
        let step: PriceStep = "0.5".parse().unwrap();
        let mut table = PriceLevelTable::new();

        assert_eq!(table.add_trade(&trade("100.2", "1", TradeSide::Buy), step), p("100"));
        assert_eq!(table.add_trade(&trade("100.25", "2", TradeSide::Sell), step), p("100.5"));
        table.add_trade(&trade("99.9", "3", TradeSide::Buy), step);

        assert_eq!(table.len(), 2);
        let level = table.get(p("100")).unwrap();
        assert_eq!(level.bid_qty, q("4"));
        assert_eq!(level.ask_qty, Qty::ZERO);
        assert_eq!(table.totals(), (q("2"), q("6")));
    }

    #[test]
    fn descending_within_respects_bounds() {
        let table: PriceLevelTable = ["99", "100", "101", "102"]
            .iter()
            .map(|price| PriceLevel {
                price: p(price),
                bid_qty: q("1"),
                ask_qty: q("1"),
            })
            .collect();

        let prices: Vec<_> = table
            .descending_within(p("100"), p("101"))
            .iter()
            .map(|l| l.price)
            .collect();
        assert_eq!(prices, vec![p("101"), p("100")]);
        assert!(table.descending_within(p("101"), p("100")).is_empty());
    }

    #[test]
    fn candle_totals_track_levels() {
        let step: PriceStep = "1".parse().unwrap();
        let mut candle = Candle::open_at(0, p("100"), q("-5"));

        candle.apply_trade(&trade("100", "3", TradeSide::Buy), step);
        candle.apply_trade(&trade("102", "1", TradeSide::Sell), step);
        candle.apply_trade(&trade("99", "2", TradeSide::Sell), step);

        let (delta, volume) = candle.levels().totals();
        assert_eq!(candle.delta(), delta);
        assert_eq!(candle.volume(), volume);
        assert_eq!(candle.volume(), q("6"));
        assert_eq!(candle.delta(), Qty::ZERO);
        assert_eq!(candle.cvd(), q("-5"));

        assert_eq!((candle.high, candle.low, candle.close), (p("102"), p("99"), p("99")));
        assert_eq!(candle.open, p("100"));
        assert!(candle.is_open());
    }

    #[test]
    fn edge_levels_rounded_past_the_range_are_kept() {
        let step: PriceStep = "10".parse().unwrap();
        let mut candle = Candle::open_at(0, p("65003"), Qty::ZERO);
        for price in ["65003", "65024", "65026"] {
            candle.apply_trade(&trade(price, "5", TradeSide::Buy), step);
        }

        let levels = candle.levels_in_range(step);
        let prices: Vec<_> = levels.iter().map(|l| l.price).collect();
        assert_eq!(prices, vec![p("65030"), p("65020"), p("65000")]);

        let shown: Qty = levels.iter().map(|l| l.total_qty()).sum();
        assert_eq!(shown, candle.volume());
    }
}
