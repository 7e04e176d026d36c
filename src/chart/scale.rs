use super::{Bounds, HostChart};
use data::aggr::SequenceSnapshot;
use exchange::unit::Price;

/// Headroom above and below the visible price extremes, as a share of the range.
const PRICE_PADDING: f64 = 0.05;

/// Linear time/price mapping with the latest candle pinned to the right edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    bounds: Bounds,
    cell_width: f32,
    interval: u64,
    latest_x: Option<u64>,
    highest: Price,
    lowest: Price,
}

impl Viewport {
    pub fn new(bounds: Bounds, cell_width: f32) -> Self {
        Self {
            bounds,
            cell_width: cell_width.max(1.0),
            interval: 0,
            latest_x: None,
            highest: Price::from_units(0),
            lowest: Price::from_units(0),
        }
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Whole candles that fit into the width, at least one.
    pub fn visible_bars(&self) -> u64 {
        ((self.bounds.width / self.cell_width).floor() as u64).max(1)
    }

    fn earliest_visible(&self, latest: u64) -> u64 {
        latest.saturating_sub((self.visible_bars() - 1) * self.interval)
    }

    /// Follows the newest candle and rescales the price axis to what is on screen.
    ///
    /// An empty snapshot leaves the viewport unlaid, every mapping then returns `None`.
    pub fn fit(&mut self, snapshot: &SequenceSnapshot) {
        let Some(last) = snapshot.last() else {
            self.latest_x = None;
            return;
        };

        self.interval = snapshot.timeframe.to_milliseconds();
        self.latest_x = Some(last.open_time);

        let earliest = self.earliest_visible(last.open_time);
        let (low, high) = snapshot
            .candles()
            .iter()
            .filter(|c| c.open_time >= earliest)
            .fold((last.low, last.high), |(low, high), c| {
                (low.min(c.low), high.max(c.high))
            });

        let span = (high.units - low.units) as f64;
        let padding = ((span * PRICE_PADDING) as i64).max(snapshot.tick_size.units);

        self.highest = Price::from_units(high.units + padding);
        self.lowest = Price::from_units(low.units - padding);
    }
}

impl HostChart for Viewport {
    fn time_to_pixel(&self, time: u64) -> Option<f32> {
        let latest = self.latest_x?;
        if self.interval == 0 {
            return None;
        }

        let right_center = f64::from(self.bounds.width) - f64::from(self.cell_width) / 2.0;
        let bars_back = (latest as f64 - time as f64) / self.interval as f64;
        let x = right_center - bars_back * f64::from(self.cell_width);

        x.is_finite().then_some(x as f32)
    }

    fn price_to_pixel(&self, price: Price) -> Option<f32> {
        self.latest_x?;
        let span = self.highest.units - self.lowest.units;
        if span <= 0 {
            return None;
        }

        let ratio = (self.highest.units - price.units) as f64 / span as f64;
        Some((ratio * f64::from(self.bounds.height)) as f32)
    }

    fn visible_time_range(&self) -> Option<(u64, u64)> {
        let latest = self.latest_x?;
        Some((self.earliest_visible(latest), latest))
    }

    fn visible_logical_range(&self) -> Option<(f32, f32)> {
        self.latest_x?;
        Some((0.0, self.bounds.width / self.cell_width))
    }

    fn time_scale_width(&self) -> f32 {
        self.bounds.width
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data::aggr::{SeriesConfig, TradeAggregator};
    use exchange::{Timeframe, Trade, TradeSide};

    const M1: u64 = 60_000;

    fn snapshot(prices: &[&str]) -> SequenceSnapshot {
        let mut aggr = TradeAggregator::new(SeriesConfig::new(Timeframe::M1, "1".parse().unwrap()));
        for (i, price) in prices.iter().enumerate() {
            aggr.on_trade(&Trade {
                time: i as u64 * M1,
                price: price.parse().unwrap(),
                qty: "1".parse().unwrap(),
                side: TradeSide::Buy,
            });
        }
        aggr.snapshot()
    }

    #[test]
    fn unfitted_viewport_is_not_ready() {
        let viewport = Viewport::new(Bounds { width: 400.0, height: 300.0 }, 40.0);
        assert_eq!(viewport.time_to_pixel(0), None);
        assert_eq!(viewport.price_to_pixel("1".parse().unwrap()), None);
        assert_eq!(viewport.visible_time_range(), None);
        assert_eq!(viewport.visible_logical_range(), None);
    }

    #[test]
    fn latest_candle_sits_at_the_right_edge() {
        let mut viewport = Viewport::new(Bounds { width: 400.0, height: 300.0 }, 40.0);
        viewport.fit(&snapshot(&["100", "110", "90", "105"]));

        assert_eq!(viewport.time_to_pixel(3 * M1), Some(380.0));
        assert_eq!(viewport.time_to_pixel(2 * M1), Some(340.0));
        assert_eq!(viewport.visible_time_range(), Some((0, 3 * M1)));
        assert_eq!(viewport.visible_logical_range(), Some((0.0, 10.0)));
    }

    #[test]
    fn price_axis_covers_visible_candles() {
        let mut viewport = Viewport::new(Bounds { width: 400.0, height: 300.0 }, 40.0);
        viewport.fit(&snapshot(&["100", "110", "90", "105"]));

        let top = viewport.price_to_pixel("110".parse().unwrap()).unwrap();
        let bottom = viewport.price_to_pixel("90".parse().unwrap()).unwrap();
        assert!(top > 0.0 && top < bottom && bottom < 300.0);
    }

    #[test]
    fn narrow_viewports_scroll_old_candles_out() {
        let mut viewport = Viewport::new(Bounds { width: 80.0, height: 300.0 }, 40.0);
        viewport.fit(&snapshot(&["100", "110", "90", "105"]));
        assert_eq!(viewport.visible_time_range(), Some((2 * M1, 3 * M1)));
    }
}
