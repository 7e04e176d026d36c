use crate::chart::footprint::{FootprintRenderer, Frame, RenderConfig};
use crate::chart::scale::Viewport;
use crate::chart::Bounds;

use data::aggr::backfill::closed_bars;
use data::aggr::{SequenceSnapshot, SeriesEvent, TradeAggregator};
use data::chart::Candle;
use data::chart::stats::{self, StatRow};
use data::util::{abbr_large_numbers, format_signed, format_with_commas};
use data::{InternalError, SessionConfig};
use exchange::adapter::{self, synthetic};
use exchange::health::ConnectionHealth;
use exchange::{AdapterError, Event, Kline, PriceStep, TickerInfo, Timeframe};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use std::time::Duration;

const RENDER_INTERVAL: Duration = Duration::from_secs(1);
const CHART_BOUNDS: Bounds = Bounds {
    width: 1280.0,
    height: 720.0,
};
const CELL_WIDTH: f32 = 96.0;

/// Live footprint chart for one ticker: aggregator, renderer and the stats they feed.
pub struct Session {
    config: SessionConfig,
    ticker_info: TickerInfo,
    aggregator: TradeAggregator,
    renderer: FootprintRenderer,
    viewport: Viewport,
    health: ConnectionHealth,
    last_rendered: Option<SequenceSnapshot>,
    /// rows for the candles of the last rendered frame
    stats: Vec<StatRow>,
    trades_seen: u64,
}

impl Session {
    pub fn new(config: SessionConfig) -> Result<Self, InternalError> {
        config.validate()?;

        let renderer = FootprintRenderer::new(RenderConfig {
            imbalance_ratio: config.imbalance_ratio,
            left_offset_px: config.left_offset_px,
        });

        Ok(Self {
            ticker_info: config.ticker_info()?,
            aggregator: TradeAggregator::new(config.series_config()),
            renderer,
            viewport: Viewport::new(CHART_BOUNDS, CELL_WIDTH),
            health: ConnectionHealth::default(),
            last_rendered: None,
            stats: vec![],
            trades_seen: 0,
            config,
        })
    }

    pub fn ticker_info(&self) -> TickerInfo {
        self.ticker_info
    }

    /// Seeds history from `bars`, leaving the still forming bar to live trades.
    pub fn seed(&mut self, bars: &[Kline], now_ms: u64) -> usize {
        let closed = closed_bars(bars, self.config.timeframe, now_ms);
        self.aggregator.on_kline_seed(&closed, &mut rand::thread_rng())
    }

    /// Switches to the synthetic source and restarts history from it.
    pub fn enter_fallback(&mut self, now_ms: u64) -> Result<(), InternalError> {
        let ticker_info = adapter::synthetic_counterpart(self.ticker_info)
            .map_err(|e| InternalError::Fetch(e.to_string()))?;

        log::warn!(
            "{} unavailable, falling back to synthetic data",
            self.ticker_info.ticker
        );

        self.ticker_info = ticker_info;
        self.health = ConnectionHealth::Fallback;
        self.aggregator = TradeAggregator::new(self.config.series_config());
        self.last_rendered = None;

        let bars = synthetic::klines(
            ticker_info,
            self.config.timeframe,
            self.config.backfill_count,
            now_ms,
        );
        self.seed(&bars, now_ms);
        Ok(())
    }

    pub fn connect(&self, cancel: &CancellationToken) -> mpsc::Receiver<Event> {
        adapter::connect_trade_stream(
            self.ticker_info,
            self.config.reconnect.clone(),
            cancel.child_token(),
        )
    }

    pub fn handle_event(&mut self, event: Event, now_ms: u64) {
        let previous = self.health;
        self.health = self.health.on_event(&event);

        match event {
            Event::Connected(exchange) => {
                log::info!("[{exchange}] trade stream connected ({})", self.health);

                if previous == ConnectionHealth::Reconnecting
                    && let Some(open) = self.aggregator.open_candle().cloned()
                {
                    for event in self.aggregator.resume(open, now_ms) {
                        self.log_event(&event);
                    }
                }
            }
            Event::Disconnected(exchange, reason) => {
                log::warn!("[{exchange}] trade stream disconnected: {reason}");
            }
            Event::TradesReceived(_, trades) => {
                self.trades_seen += trades.len() as u64;
                for event in self.aggregator.insert_trades(&trades) {
                    self.log_event(&event);
                }
            }
            Event::Malformed(exchange, err) => {
                self.aggregator.record_malformed();
                log::warn!("[{exchange}] dropped malformed trade: {err}");
            }
        }
    }

    /// Renders the current sequence, `None` when nothing changed since the last frame.
    pub fn render(&mut self) -> Option<Frame> {
        let snapshot = self.aggregator.snapshot();
        if self
            .last_rendered
            .as_ref()
            .is_some_and(|last| last.same_as(&snapshot))
        {
            return None;
        }

        self.viewport.fit(&snapshot);
        let frame = self
            .renderer
            .render(&snapshot, &self.viewport, self.viewport.bounds());

        if let Some(range) = frame.visible {
            self.stats = stats::project(&snapshot, &range, self.config.timezone);
        }

        log::debug!(
            "Rendered {} footprints ({} primitives), {} stat rows",
            frame.candles.len(),
            frame.primitive_count(),
            self.stats.len()
        );

        self.last_rendered = Some(snapshot);
        Some(frame)
    }

    fn log_event(&self, event: &SeriesEvent) {
        match event {
            SeriesEvent::CandleClosed(candle) => self.log_closed(candle),
            SeriesEvent::CandleUpdated(candle) => {
                log::trace!("Candle {} updated, close {}", candle.open_time, candle.close);
            }
        }
    }

    fn log_closed(&self, candle: &Candle) {
        let label = self
            .config
            .timezone
            .format_timestamp(candle.open_time as i64)
            .unwrap_or_else(|| candle.open_time.to_string());
        let decimals = PriceStep::from(self.ticker_info.min_ticksize).decimals();

        log::info!(
            "[{} {}] {label} closed at {}: vol {}, delta {}, cvd {}",
            self.ticker_info.ticker,
            self.config.timeframe,
            candle.close.to_string_with(decimals),
            abbr_large_numbers(candle.volume().to_f32_lossy()),
            format_signed(candle.delta().to_f32_lossy()),
            format_signed(candle.cvd().to_f32_lossy()),
        );
    }

    fn log_summary(&self) {
        let drops = self.aggregator.drop_stats();
        log::info!(
            "Session ended ({}): {} trades, {} dropped ({} late, {} malformed), {} candles",
            self.health,
            format_with_commas(self.trades_seen),
            format_with_commas(drops.total()),
            drops.late,
            drops.malformed,
            self.aggregator.len()
        );
    }
}

/// Recent klines for `ticker_info`.
///
/// `None` when `cancel` fires first. A result arriving after cancellation is
/// discarded the same way.
pub async fn backfill(
    ticker_info: TickerInfo,
    timeframe: Timeframe,
    limit: usize,
    cancel: &CancellationToken,
) -> Option<Result<Vec<Kline>, AdapterError>> {
    let fetched = tokio::select! {
        biased;
        () = cancel.cancelled() => return None,
        result = adapter::fetch_klines(ticker_info, timeframe, limit) => result,
    };

    if cancel.is_cancelled() {
        log::debug!("Discarding backfill for {} after cancellation", ticker_info.ticker);
        return None;
    }
    Some(fetched)
}

/// Backfills, then streams trades into the chart until `cancel` fires.
///
/// A failed backfill or a live stream that gives up reconnecting switches the
/// session to synthetic data.
pub async fn run(config: SessionConfig, cancel: CancellationToken) -> Result<(), InternalError> {
    let mut session = Session::new(config)?;
    let ticker_info = session.ticker_info();

    log::info!(
        "Starting {} {} footprint session",
        ticker_info.ticker,
        session.config.timeframe
    );

    match backfill(
        ticker_info,
        session.config.timeframe,
        session.config.backfill_count,
        &cancel,
    )
    .await
    {
        None => return Ok(()),
        Some(Ok(bars)) => {
            session.seed(&bars, synthetic::now_ms());
        }
        Some(Err(err)) => {
            log::error!("Backfill failed: {err} ({})", err.to_user_message());
            session.enter_fallback(synthetic::now_ms())?;
        }
    }

    let mut stream = session.connect(&cancel);

    let mut render_tick = tokio::time::interval(RENDER_INTERVAL);
    render_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = stream.recv() => match event {
                Some(event) => session.handle_event(event, synthetic::now_ms()),
                None if cancel.is_cancelled() => break,
                None if session.ticker_info.ticker.exchange.is_synthetic() => {
                    log::error!("Synthetic trade stream stopped");
                    break;
                }
                None => {
                    session.enter_fallback(synthetic::now_ms())?;
                    stream = session.connect(&cancel);
                }
            },
            _ = render_tick.tick() => {
                session.render();
            }
        }
    }

    session.log_summary();
    Ok(())
}
