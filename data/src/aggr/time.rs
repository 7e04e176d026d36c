use crate::chart::kline::Candle;

use exchange::{Kline, PriceStep, Qty, Timeframe, Trade};
use rand::Rng;
use smallvec::SmallVec;

use std::sync::Arc;

pub const DEFAULT_MAX_CANDLES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesConfig {
    pub timeframe: Timeframe,
    pub tick_size: PriceStep,
    pub max_candles: usize,
}

impl SeriesConfig {
    pub fn new(timeframe: Timeframe, tick_size: PriceStep) -> Self {
        Self {
            timeframe,
            tick_size,
            max_candles: DEFAULT_MAX_CANDLES,
        }
    }

    pub fn with_max_candles(mut self, max_candles: usize) -> Self {
        self.max_candles = max_candles.max(1);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeriesEvent {
    CandleUpdated(Candle),
    CandleClosed(Candle),
}

impl SeriesEvent {
    pub fn candle(&self) -> &Candle {
        match self {
            SeriesEvent::CandleUpdated(candle) | SeriesEvent::CandleClosed(candle) => candle,
        }
    }
}

pub type SeriesEvents = SmallVec<[SeriesEvent; 2]>;

/// Trades the aggregator refused to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DropStats {
    /// bucket earlier than the newest candle
    pub late: u64,
    /// non-positive price or quantity
    pub malformed: u64,
}

impl DropStats {
    pub fn total(&self) -> u64 {
        self.late + self.malformed
    }
}

/// Immutable view of the candle sequence, cheap to clone and safe to hand to readers.
#[derive(Debug, Clone)]
pub struct SequenceSnapshot {
    candles: Arc<Vec<Candle>>,
    pub timeframe: Timeframe,
    pub tick_size: PriceStep,
}

impl SequenceSnapshot {
    /// Time-ascending, open times unique
    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn index_of(&self, open_time: u64) -> Option<usize> {
        self.candles
            .binary_search_by_key(&open_time, |c| c.open_time)
            .ok()
    }

    /// Whether both snapshots share the same underlying sequence.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.candles, &other.candles)
    }
}

/// Turns trades into timeframe-aligned candles with footprints and a running CVD.
///
/// Single writer: all mutation goes through `&mut self`, readers take a
/// [`SequenceSnapshot`]. The backing vector is shared with outstanding
/// snapshots and only copied when one of them is still alive.
pub struct TradeAggregator {
    config: SeriesConfig,
    candles: Arc<Vec<Candle>>,
    drops: DropStats,
}

impl TradeAggregator {
    pub fn new(config: SeriesConfig) -> Self {
        Self {
            config,
            candles: Arc::new(Vec::new()),
            drops: DropStats::default(),
        }
    }

    pub fn config(&self) -> SeriesConfig {
        self.config
    }

    pub fn drop_stats(&self) -> DropStats {
        self.drops
    }

    /// Counts a trade rejected upstream before it could be parsed.
    pub fn record_malformed(&mut self) {
        self.drops.malformed += 1;
    }

    pub fn snapshot(&self) -> SequenceSnapshot {
        SequenceSnapshot {
            candles: Arc::clone(&self.candles),
            timeframe: self.config.timeframe,
            tick_size: self.config.tick_size,
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn open_candle(&self) -> Option<&Candle> {
        self.candles.last().filter(|c| c.is_open())
    }

    fn last_cvd(&self) -> Qty {
        self.candles.last().map_or(Qty::ZERO, Candle::cvd)
    }

    pub fn on_trade(&mut self, trade: &Trade) -> SeriesEvents {
        let mut events = SeriesEvents::new();

        if !trade.price.is_positive() || !trade.qty.is_positive() {
            self.drops.malformed += 1;
            log::debug!("Dropped malformed trade: {trade:?}");
            return events;
        }

        let bucket = self.config.timeframe.bucket_start(trade.time);
        let step = self.config.tick_size;

        let newest = self.candles.last().map(|c| (c.open_time, c.is_open()));

        match newest {
            Some((open_time, is_open))
                if bucket < open_time || (bucket == open_time && !is_open) =>
            {
                self.drops.late += 1;
                log::debug!(
                    "Dropped late trade at {} (bucket {bucket}, newest {open_time})",
                    trade.time
                );
                return events;
            }
            Some((open_time, _)) if bucket == open_time => {
                let candles = Arc::make_mut(&mut self.candles);
                if let Some(open) = candles.last_mut() {
                    open.apply_trade(trade, step);
                    events.push(SeriesEvent::CandleUpdated(open.clone()));
                }
                return events;
            }
            _ => {}
        }

        let cvd_base = self.last_cvd();
        let candles = Arc::make_mut(&mut self.candles);

        if let Some(previous) = candles.last_mut().filter(|c| c.is_open()) {
            previous.close();
            events.push(SeriesEvent::CandleClosed(previous.clone()));
        }

        let mut candle = Candle::open_at(bucket, trade.price, cvd_base);
        candle.apply_trade(trade, step);
        events.push(SeriesEvent::CandleUpdated(candle.clone()));
        candles.push(candle);

        self.evict_overflow();
        events
    }

    /// Batch form of [`Self::on_trade`], yielding the same events in order.
    pub fn insert_trades(&mut self, trades: &[Trade]) -> Vec<SeriesEvent> {
        trades.iter().flat_map(|trade| self.on_trade(trade)).collect()
    }

    /// Replaces history with footprints estimated from `bars`.
    ///
    /// Every seeded candle is closed; bars not older than the newest seeded one
    /// should be left to live trades.
    pub fn on_kline_seed<R: Rng>(&mut self, bars: &[Kline], rng: &mut R) -> usize {
        let mut seeded = super::backfill::seed(
            bars,
            self.config.timeframe,
            self.config.tick_size,
            Qty::ZERO,
            rng,
        );

        if seeded.len() > self.config.max_candles {
            seeded.drain(..seeded.len() - self.config.max_candles);
        }

        let count = seeded.len();
        self.candles = Arc::new(seeded);

        log::info!(
            "Seeded {count} estimated candles ({} bars, {})",
            bars.len(),
            self.config.timeframe
        );
        self.check_integrity();
        count
    }

    /// Continues from a candle known before a disconnect.
    ///
    /// When `last`'s bucket contains `now_ms` it becomes the open candle again,
    /// otherwise it is stored closed and the next trade opens a new candle whose
    /// cvd carries on from it.
    pub fn resume(&mut self, last: Candle, now_ms: u64) -> SeriesEvents {
        let mut events = SeriesEvents::new();
        let current = self.config.timeframe.bucket_start(now_ms);

        if let Some(newest) = self.candles.last()
            && newest.open_time > last.open_time
        {
            log::warn!(
                "Ignoring resume from {}: newer candle {} already present",
                last.open_time,
                newest.open_time
            );
            return events;
        }

        let mut candle = last;
        if candle.open_time == current {
            candle.reopen();
        } else {
            candle.close();
        }

        let candles = Arc::make_mut(&mut self.candles);
        if candles
            .last()
            .is_some_and(|newest| newest.open_time == candle.open_time)
        {
            candles.pop();
        } else if let Some(previous) = candles.last_mut().filter(|c| c.is_open()) {
            previous.close();
            events.push(SeriesEvent::CandleClosed(previous.clone()));
        }

        if candle.is_open() {
            log::info!("Resumed open candle {}", candle.open_time);
            events.push(SeriesEvent::CandleUpdated(candle.clone()));
        } else {
            log::info!("Finalized stale candle {} on resume", candle.open_time);
            events.push(SeriesEvent::CandleClosed(candle.clone()));
        }
        candles.push(candle);

        self.evict_overflow();
        events
    }

    fn evict_overflow(&mut self) {
        let max = self.config.max_candles;
        if self.candles.len() > max {
            let candles = Arc::make_mut(&mut self.candles);
            let excess = candles.len() - max;
            candles.drain(..excess);
        }
    }

    /// Bucket keys missing between the first and the last candle.
    pub fn check_integrity(&self) -> Option<Vec<u64>> {
        let (first, last) = match (self.candles.first(), self.candles.last()) {
            (Some(first), Some(last)) => (first.open_time, last.open_time),
            _ => return None,
        };
        let interval = self.config.timeframe.to_milliseconds();

        let mut missing_keys = Vec::new();
        let mut present = self.candles.iter().map(|c| c.open_time).peekable();
        let mut time = first;

        while time < last {
            match present.peek() {
                Some(&t) if t == time => {
                    present.next();
                }
                Some(&t) if t < time => {
                    present.next();
                    continue;
                }
                _ => missing_keys.push(time),
            }
            time += interval;
        }

        if missing_keys.is_empty() {
            None
        } else {
            log::warn!(
                "Integrity check failed: missing {} candles",
                missing_keys.len()
            );
            Some(missing_keys)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::kline::FootprintSource;
    use exchange::{Price, TradeSide};
    use rand::{SeedableRng, rngs::StdRng};

    const M15: u64 = 15 * 60_000;
    const T0: u64 = 1_700_000_100_000 / M15 * M15;

    fn aggregator() -> TradeAggregator {
        TradeAggregator::new(SeriesConfig::new(
            Timeframe::M15,
            "0.5".parse().unwrap(),
        ))
    }

    fn trade(time: u64, price: &str, qty: &str, side: TradeSide) -> Trade {
        Trade {
            time,
            price: price.parse().unwrap(),
            qty: qty.parse().unwrap(),
            side,
        }
    }

    fn q(v: &str) -> Qty {
        v.parse().unwrap()
    }

    #[test]
    fn rollover_closes_and_freezes_the_previous_candle() {
        let mut aggr = aggregator();

        let e1 = aggr.on_trade(&trade(T0, "100", "1", TradeSide::Buy));
        let e2 = aggr.on_trade(&trade(T0 + 1, "101", "2", TradeSide::Sell));
        let e3 = aggr.on_trade(&trade(T0 + M15, "102", "3", TradeSide::Buy));

        assert_eq!(e1.len(), 1);
        assert_eq!(e2.len(), 1);
        assert_eq!(e3.len(), 2);
        assert!(matches!(e3[0], SeriesEvent::CandleClosed(_)));
        assert!(matches!(e3[1], SeriesEvent::CandleUpdated(_)));

        let snap = aggr.snapshot();
        assert_eq!(snap.len(), 2);

        let first = &snap.candles()[0];
        assert!(!first.is_open());
        assert_eq!(first.open_time, T0);
        assert_eq!(first.volume(), q("3"));
        assert_eq!(first.delta(), q("-1"));
        assert_eq!(e3[0].candle(), first);

        let second = &snap.candles()[1];
        assert!(second.is_open());
        assert_eq!(second.open_time, T0 + M15);
        let rollover: Price = "102".parse().unwrap();
        assert_eq!(
            (second.open, second.high, second.low, second.close),
            (rollover, rollover, rollover, rollover)
        );
        assert_eq!(second.source(), FootprintSource::Traded);
    }

    #[test]
    fn cvd_is_continuous_across_candles() {
        let mut aggr = aggregator();
        let sides = [TradeSide::Buy, TradeSide::Sell, TradeSide::Buy];

        for i in 0..12u64 {
            let side = sides[(i % 3) as usize];
            aggr.on_trade(&trade(T0 + i * M15 / 4, "100", &(i + 1).to_string(), side));
        }

        let snap = aggr.snapshot();
        let candles = snap.candles();
        assert_eq!(candles.len(), 3);
        assert_eq!(candles[0].cvd(), candles[0].delta());
        for pair in candles.windows(2) {
            assert_eq!(pair[1].cvd(), pair[0].cvd() + pair[1].delta());
        }
        for candle in candles {
            let (delta, volume) = candle.levels().totals();
            assert_eq!(candle.delta(), delta);
            assert_eq!(candle.volume(), volume);
        }
    }

    #[test]
    fn late_and_malformed_trades_are_counted() {
        let mut aggr = aggregator();
        aggr.on_trade(&trade(T0 + M15, "100", "1", TradeSide::Buy));

        assert!(aggr.on_trade(&trade(T0, "100", "1", TradeSide::Buy)).is_empty());
        assert!(aggr.on_trade(&trade(T0 + M15, "100", "0", TradeSide::Buy)).is_empty());
        assert!(aggr.on_trade(&trade(T0 + M15, "-1", "1", TradeSide::Sell)).is_empty());

        assert_eq!(
            aggr.drop_stats(),
            DropStats {
                late: 1,
                malformed: 2
            }
        );
        assert_eq!(aggr.snapshot().candles()[0].volume(), q("1"));

        aggr.record_malformed();
        assert_eq!(aggr.drop_stats().total(), 4);
    }

    #[test]
    fn batch_insert_matches_per_trade_events() {
        let trades = [
            trade(T0, "100", "1", TradeSide::Buy),
            trade(T0 + 5, "100.5", "1", TradeSide::Sell),
            trade(T0 + M15, "99", "2", TradeSide::Buy),
            trade(T0 + 1, "98", "2", TradeSide::Buy),
        ];

        let mut single = aggregator();
        let expected: Vec<_> = trades.iter().flat_map(|t| single.on_trade(t)).collect();

        let mut batch = aggregator();
        assert_eq!(batch.insert_trades(&trades), expected);
        assert_eq!(batch.drop_stats().late, 1);
    }

    #[test]
    fn snapshots_are_isolated_from_later_writes() {
        let mut aggr = aggregator();
        aggr.on_trade(&trade(T0, "100", "1", TradeSide::Buy));

        let before = aggr.snapshot();
        assert!(before.same_as(&aggr.snapshot()));

        aggr.on_trade(&trade(T0 + 1, "100", "4", TradeSide::Buy));
        let after = aggr.snapshot();

        assert!(!before.same_as(&after));
        assert_eq!(before.candles()[0].volume(), q("1"));
        assert_eq!(after.candles()[0].volume(), q("5"));
    }

    #[test]
    fn oldest_candles_are_evicted() {
        let mut aggr = TradeAggregator::new(
            SeriesConfig::new(Timeframe::M15, "1".parse().unwrap()).with_max_candles(3),
        );
        for i in 0..5 {
            aggr.on_trade(&trade(T0 + i * M15, "100", "1", TradeSide::Sell));
        }

        let snap = aggr.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap.candles()[0].open_time, T0 + 2 * M15);
        assert_eq!(snap.last().unwrap().cvd(), q("-5"));
        assert_eq!(snap.index_of(T0 + 3 * M15), Some(1));
        assert_eq!(snap.index_of(T0), None);
    }

    #[test]
    fn resume_reopens_a_current_candle() {
        let mut aggr = aggregator();
        aggr.on_trade(&trade(T0, "100", "2", TradeSide::Buy));
        let last = aggr.snapshot().last().cloned().unwrap();

        let mut resumed = aggregator();
        let events = resumed.resume(last, T0 + 60_000);
        assert!(matches!(events[..], [SeriesEvent::CandleUpdated(_)]));

        resumed.on_trade(&trade(T0 + 120_000, "100", "1", TradeSide::Sell));
        let snap = resumed.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.candles()[0].volume(), q("3"));
        assert_eq!(snap.candles()[0].cvd(), q("1"));
    }

    #[test]
    fn resume_finalizes_a_stale_candle_and_carries_cvd() {
        let mut aggr = aggregator();
        aggr.on_trade(&trade(T0, "100", "2", TradeSide::Buy));
        let last = aggr.snapshot().last().cloned().unwrap();

        let events = aggr.resume(last, T0 + 3 * M15);
        assert!(matches!(events[..], [SeriesEvent::CandleClosed(_)]));
        assert!(aggr.open_candle().is_none());
        assert_eq!(aggr.len(), 1);

        aggr.on_trade(&trade(T0 + 3 * M15, "101", "5", TradeSide::Sell));
        let snap = aggr.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.candles()[1].cvd(), q("-3"));
        assert_eq!(aggr.check_integrity(), Some(vec![T0 + M15, T0 + 2 * M15]));
    }

    #[test]
    fn seeded_history_is_closed_and_continued_by_live_trades() {
        let mut aggr = aggregator();
        let p = |v: &str| -> Price { v.parse().unwrap() };
        let bars: Vec<Kline> = (0..3)
            .map(|i| Kline {
                time: T0 + i * M15,
                open: p("100"),
                high: p("110"),
                low: p("90"),
                close: p("105"),
                volume: exchange::Volume::TotalOnly(q("1000")),
            })
            .collect();

        let count = aggr.on_kline_seed(&bars, &mut StdRng::seed_from_u64(11));
        assert_eq!(count, 3);
        assert!(aggr.open_candle().is_none());
        assert!(aggr.snapshot().candles().iter().all(Candle::is_estimated));

        let seeded_cvd = aggr.snapshot().last().unwrap().cvd();
        aggr.on_trade(&trade(T0 + 2 * M15 + 10, "100", "1", TradeSide::Buy));
        assert_eq!(aggr.drop_stats().late, 1);

        aggr.on_trade(&trade(T0 + 3 * M15, "100", "1", TradeSide::Buy));
        let last = aggr.snapshot().last().cloned().unwrap();
        assert!(last.is_open());
        assert_eq!(last.cvd(), seeded_cvd + q("1"));
        assert_eq!(aggr.check_integrity(), None);
    }
}
