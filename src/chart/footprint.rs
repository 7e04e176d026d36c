use super::{Bounds, HostChart};
use data::aggr::SequenceSnapshot;
use data::chart::{Candle, VisibleRange, bucket::bucket};
use data::config::DEFAULT_IMBALANCE_RATIO;
use data::util::abbr_large_numbers;
use exchange::{PriceStep, Qty};

/// Candles narrower than this show no footprint.
pub const MIN_FOOTPRINT_WIDTH: f32 = 15.0;
/// Bid and ask columns are split by a line only on candles wider than this.
pub const SEPARATOR_MIN_WIDTH: f32 = 80.0;

const Y_TOLERANCE: f32 = 5.0;
const MIN_FONT_SIZE: f32 = 7.0;
const MAX_FONT_SIZE: f32 = 14.0;
const MIN_ROW_HEIGHT: f32 = 10.0;
const ROW_PADDING: f32 = 4.0;
const CELL_WIDTH_FACTOR: f32 = 0.9;
const TEXT_PADDING: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderConfig {
    pub imbalance_ratio: u32,
    /// Alignment correction forwarded with the visible range
    pub left_offset_px: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            imbalance_ratio: DEFAULT_IMBALANCE_RATIO,
            left_offset_px: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Imbalance {
    Bid,
    Ask,
}

impl Imbalance {
    /// Side whose volume is at least `ratio` times the other's. Empty rows have none.
    pub fn classify(bid: Qty, ask: Qty, ratio: u32) -> Option<Self> {
        if bid.is_zero() && ask.is_zero() {
            None
        } else if bid.dominates(ask, ratio) {
            Some(Imbalance::Bid)
        } else if ask.dominates(bid, ratio) {
            Some(Imbalance::Ask)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Bid,
    Ask,
    Separator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawPrimitive {
    FillRect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        tone: Tone,
    },
    /// Vertically centred on `y`, anchored at `x` according to `align`
    Text {
        x: f32,
        y: f32,
        content: String,
        size: f32,
        align: Align,
    },
    Line {
        from: (f32, f32),
        to: (f32, f32),
        tone: Tone,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandleFootprint {
    pub open_time: u64,
    pub center_x: f32,
    /// Levels come from backfill estimation rather than trades
    pub estimated: bool,
    pub primitives: Vec<DrawPrimitive>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    pub candles: Vec<CandleFootprint>,
    /// `None` while the host chart is not laid out or nothing is on screen
    pub visible: Option<VisibleRange>,
}

impl Frame {
    pub fn primitive_count(&self) -> usize {
        self.candles.iter().map(|c| c.primitives.len()).sum()
    }
}

/// `(font_size, row_height)` for a candle of the given width.
pub fn row_metrics(candle_width: f32) -> (f32, f32) {
    let font_size = (candle_width * 0.15).clamp(MIN_FONT_SIZE, MAX_FONT_SIZE);
    (font_size, (font_size + ROW_PADDING).max(MIN_ROW_HEIGHT))
}

/// Turns a candle snapshot into draw primitives for the host chart.
///
/// Rendering reads nothing but its arguments, so the same snapshot, host state
/// and bounds always produce the same [`Frame`].
#[derive(Debug, Clone, Default)]
pub struct FootprintRenderer {
    config: RenderConfig,
}

impl FootprintRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    pub fn render(
        &self,
        snapshot: &SequenceSnapshot,
        chart: &impl HostChart,
        bounds: Bounds,
    ) -> Frame {
        let (Some((from, to)), Some((logical_from, logical_to))) =
            (chart.visible_time_range(), chart.visible_logical_range())
        else {
            return Frame::default();
        };

        let span = logical_to - logical_from;
        if !span.is_finite() || span <= 0.0 {
            return Frame::default();
        }
        let candle_width = chart.time_scale_width() / span;

        let visible: Vec<&Candle> = snapshot
            .candles()
            .iter()
            .filter(|c| (from..=to).contains(&c.open_time))
            .collect();

        let candles = if candle_width < MIN_FOOTPRINT_WIDTH {
            vec![]
        } else {
            visible
                .iter()
                .filter_map(|candle| {
                    self.draw_candle(candle, snapshot.tick_size, chart, bounds, candle_width)
                })
                .collect()
        };

        Frame {
            candles,
            visible: self.visible_range(snapshot, &visible, candle_width),
        }
    }

    fn visible_range(
        &self,
        snapshot: &SequenceSnapshot,
        visible: &[&Candle],
        candle_width: f32,
    ) -> Option<VisibleRange> {
        let start = snapshot.index_of(visible.first()?.open_time)?;
        let last = snapshot.index_of(visible.last()?.open_time)?;

        Some(VisibleRange {
            start_index: start,
            end_index_exclusive: Some(last + 1),
            candle_width_px: candle_width,
            left_offset_px: self.config.left_offset_px,
        })
    }

    fn draw_candle(
        &self,
        candle: &Candle,
        step: PriceStep,
        chart: &impl HostChart,
        bounds: Bounds,
        candle_width: f32,
    ) -> Option<CandleFootprint> {
        let x = chart.time_to_pixel(candle.open_time)?;
        let y_high = chart.price_to_pixel(candle.high)?;
        let y_low = chart.price_to_pixel(candle.low)?;

        let (font_size, row_height) = row_metrics(candle_width);
        let max_rows = ((y_low - y_high).abs() / row_height).floor() as usize;

        let levels = candle.levels_in_range(step);
        let rows = bucket(&levels, max_rows);

        let half_width = candle_width * CELL_WIDTH_FACTOR / 2.0;
        let mut primitives = Vec::with_capacity(rows.len() * 3 + 1);

        for row in rows {
            let Some(y) = chart.price_to_pixel(row.price) else {
                continue;
            };
            if y < -Y_TOLERANCE || y > bounds.height + Y_TOLERANCE {
                continue;
            }

            let top = y - row_height / 2.0;
            match Imbalance::classify(row.bid_qty, row.ask_qty, self.config.imbalance_ratio) {
                Some(Imbalance::Bid) => primitives.push(DrawPrimitive::FillRect {
                    x: x - half_width,
                    y: top,
                    width: half_width,
                    height: row_height,
                    tone: Tone::Bid,
                }),
                Some(Imbalance::Ask) => primitives.push(DrawPrimitive::FillRect {
                    x,
                    y: top,
                    width: half_width,
                    height: row_height,
                    tone: Tone::Ask,
                }),
                None => {}
            }

            primitives.push(DrawPrimitive::Text {
                x: x - TEXT_PADDING,
                y,
                content: abbr_large_numbers(row.bid_qty.to_f32_lossy()),
                size: font_size,
                align: Align::Right,
            });
            primitives.push(DrawPrimitive::Text {
                x: x + TEXT_PADDING,
                y,
                content: abbr_large_numbers(row.ask_qty.to_f32_lossy()),
                size: font_size,
                align: Align::Left,
            });
        }

        if candle_width > SEPARATOR_MIN_WIDTH {
            primitives.push(DrawPrimitive::Line {
                from: (x, y_high.min(y_low)),
                to: (x, y_high.max(y_low)),
                tone: Tone::Separator,
            });
        }

        Some(CandleFootprint {
            open_time: candle.open_time,
            center_x: x,
            estimated: candle.is_estimated(),
            primitives,
        })
    }
}
