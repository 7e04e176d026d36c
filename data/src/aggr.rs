pub mod backfill;
pub mod time;

pub use backfill::MAX_SYNTHETIC_LEVELS;
pub use time::{DropStats, SequenceSnapshot, SeriesConfig, SeriesEvent, TradeAggregator};
