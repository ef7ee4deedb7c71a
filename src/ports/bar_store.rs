//! Bar store port trait.

use crate::domain::bar::Bar;
use crate::domain::error::EngineError;
use crate::domain::resolve::DateRange;
use crate::domain::timeframe::Timeframe;
use chrono::NaiveDate;

/// Read-only access to stored bars. Implementations take `&self` so a store
/// can serve concurrent readers; the engine never writes back.
pub trait BarStore: std::fmt::Debug {
    /// Bars for a symbol over a half-open `[start, end)` date range at the
    /// requested granularity, in no guaranteed order. An empty vec means the
    /// store has nothing for the range, which the executor reports as a
    /// no-data outcome rather than an error.
    fn fetch(
        &self,
        symbol: &str,
        period: &DateRange,
        timeframe: Timeframe,
    ) -> Result<Vec<Bar>, EngineError>;

    fn symbols(&self) -> Result<Vec<String>, EngineError>;

    /// First date, last date and bar count for a symbol at a granularity,
    /// or None when the store holds nothing for it.
    fn coverage(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, EngineError>;
}
