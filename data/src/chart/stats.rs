use super::VisibleRange;
use crate::aggr::time::SequenceSnapshot;
use crate::config::timezone::UserTimezone;
use crate::util::{abbr_large_numbers, format_signed};

use exchange::Qty;

/// Per-candle order-flow summary for a statistics table.
#[derive(Debug, Clone, PartialEq)]
pub struct StatRow {
    pub open_time: u64,
    pub timestamp_label: String,
    pub volume: Qty,
    pub delta: Qty,
    /// delta as a percentage of volume, 0 for empty candles
    pub relative_strength: f32,
    pub cvd: Qty,
    pub estimated: bool,
}

impl StatRow {
    /// `(volume, delta, strength, cvd)` ready for display
    pub fn formatted(&self) -> [String; 4] {
        [
            abbr_large_numbers(self.volume.to_f32_lossy()),
            format_signed(self.delta.to_f32_lossy()),
            format!("{:+.1}%", self.relative_strength),
            format_signed(self.cvd.to_f32_lossy()),
        ]
    }
}

pub fn relative_strength(delta: Qty, volume: Qty) -> f32 {
    if volume.is_positive() {
        (delta.to_f64() / volume.to_f64() * 100.0) as f32
    } else {
        0.0
    }
}

/// Rows for the candles selected by `range`, oldest first.
pub fn project(
    snapshot: &SequenceSnapshot,
    range: &VisibleRange,
    timezone: UserTimezone,
) -> Vec<StatRow> {
    let interval = snapshot.timeframe.to_milliseconds();

    snapshot.candles()[range.clamped(snapshot.len())]
        .iter()
        .map(|candle| StatRow {
            open_time: candle.open_time,
            timestamp_label: timezone
                .format_crosshair_timestamp(candle.open_time as i64, interval)
                .unwrap_or_default(),
            volume: candle.volume(),
            delta: candle.delta(),
            relative_strength: relative_strength(candle.delta(), candle.volume()),
            cvd: candle.cvd(),
            estimated: candle.is_estimated(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggr::time::{SeriesConfig, TradeAggregator};
    use exchange::{Timeframe, Trade, TradeSide};

    const H1: u64 = 3_600_000;

    fn snapshot(n: u64) -> SequenceSnapshot {
        let mut aggr = TradeAggregator::new(SeriesConfig::new(Timeframe::H1, "1".parse().unwrap()));
        for i in 0..n {
            aggr.on_trade(&Trade {
                time: i * H1,
                price: "100".parse().unwrap(),
                qty: "4".parse().unwrap(),
                side: TradeSide::Buy,
            });
            aggr.on_trade(&Trade {
                time: i * H1 + 1,
                price: "100".parse().unwrap(),
                qty: "1".parse().unwrap(),
                side: TradeSide::Sell,
            });
        }
        aggr.snapshot()
    }

    #[test]
    fn strength_is_delta_over_volume() {
        let q = |v: &str| -> Qty { v.parse().unwrap() };
        assert_eq!(relative_strength(q("3"), q("5")), 60.0);
        assert_eq!(relative_strength(q("-5"), q("5")), -100.0);
        assert_eq!(relative_strength(Qty::ZERO, Qty::ZERO), 0.0);
    }

    #[test]
    fn projects_the_clamped_slice() {
        let snap = snapshot(5);
        let range = VisibleRange {
            start_index: 1,
            end_index_exclusive: Some(3),
            ..VisibleRange::default()
        };

        let rows = project(&snap, &range, UserTimezone::Utc);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].open_time, H1);
        assert_eq!(rows[0].timestamp_label, "Thu Jan 1 01:00");
        assert_eq!(rows[0].volume, "5".parse().unwrap());
        assert_eq!(rows[0].delta, "3".parse().unwrap());
        assert_eq!(rows[0].relative_strength, 60.0);
        assert_eq!(rows[1].cvd, "9".parse().unwrap());
        assert!(!rows[0].estimated);

        assert_eq!(
            rows[0].formatted(),
            ["5".to_string(), "+3".to_string(), "+60.0%".to_string(), "+6".to_string()]
        );
    }

    #[test]
    fn unset_or_zero_end_means_everything() {
        let snap = snapshot(4);
        let unset = VisibleRange::full();
        let zero = VisibleRange {
            end_index_exclusive: Some(0),
            ..VisibleRange::default()
        };
        let past_end = VisibleRange {
            start_index: 2,
            end_index_exclusive: Some(99),
            ..VisibleRange::default()
        };

        assert_eq!(project(&snap, &unset, UserTimezone::Utc).len(), 4);
        assert_eq!(project(&snap, &zero, UserTimezone::Utc).len(), 4);
        assert_eq!(project(&snap, &past_end, UserTimezone::Utc).len(), 2);
        assert!(project(&snapshot(0), &unset, UserTimezone::Utc).is_empty());
    }
}
