pub mod bucket;
pub mod kline;
pub mod stats;

pub use bucket::RenderBucket;
pub use kline::{Candle, CandleStatus, FootprintSource, PriceLevel, PriceLevelTable};

/// Candles currently on screen, as indices into the full sequence.
///
/// Sent to downstream consumers (e.g. a statistics table) so they stay in lock-step
/// with the chart's pixel grid.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VisibleRange {
    pub start_index: usize,
    /// `None` (or `Some(0)`) means "up to the end of the sequence"
    pub end_index_exclusive: Option<usize>,
    pub candle_width_px: f32,
    pub left_offset_px: f32,
}

impl VisibleRange {
    /// Everything, with no pixel information.
    pub fn full() -> Self {
        Self::default()
    }

    /// `start..end` clamped to `[0, len]`; an unset or zero end selects the full length.
    pub fn clamped(&self, len: usize) -> std::ops::Range<usize> {
        let end = match self.end_index_exclusive {
            Some(end) if end > 0 => end.min(len),
            _ => len,
        };
        let start = self.start_index.min(end);
        start..end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamping_rules() {
        let range = |start, end| VisibleRange {
            start_index: start,
            end_index_exclusive: end,
            ..VisibleRange::default()
        };

        assert_eq!(range(2, Some(5)).clamped(10), 2..5);
        assert_eq!(range(2, Some(50)).clamped(10), 2..10);
        assert_eq!(range(2, None).clamped(10), 2..10);
        assert_eq!(range(2, Some(0)).clamped(10), 2..10);
        assert_eq!(range(20, None).clamped(10), 10..10);
        assert_eq!(range(6, Some(4)).clamped(10), 4..4);
        assert_eq!(VisibleRange::full().clamped(3), 0..3);
    }
}
