pub mod footprint;
pub mod scale;

use exchange::unit::Price;

/// Pixel size of the drawable chart area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub width: f32,
    pub height: f32,
}

/// Coordinate services of the chart hosting the footprint overlay.
///
/// Every mapping may return `None` while the host has not laid out yet; callers
/// skip drawing in that case and retry on the next frame.
pub trait HostChart {
    /// X centre of the candle opening at `time`
    fn time_to_pixel(&self, time: u64) -> Option<f32>;

    fn price_to_pixel(&self, price: Price) -> Option<f32>;

    /// Inclusive open-time range of the candles on screen
    fn visible_time_range(&self) -> Option<(u64, u64)>;

    /// Visible span in bar units; its length divides the time scale width into candles
    fn visible_logical_range(&self) -> Option<(f32, f32)>;

    fn time_scale_width(&self) -> f32;
}
