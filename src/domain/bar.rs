//! Price bar representation.

use chrono::NaiveDateTime;

/// One OHLCV bar at a given timeframe.
///
/// `ts` is the bar's opening timestamp in exchange-local time, naive on
/// purpose: the store delivers bars already in the session clock the
/// calendar rules speak.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub symbol: String,
    pub ts: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl Bar {
    /// high - low
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// |close - open|
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    /// close > open
    pub fn is_green(&self) -> bool {
        self.close > self.open
    }

    /// close < open
    pub fn is_red(&self) -> bool {
        self.close < self.open
    }

    /// (close - open) / open * 100, or 0 for a degenerate zero open.
    pub fn change_pct(&self) -> f64 {
        if self.open == 0.0 {
            0.0
        } else {
            (self.close - self.open) / self.open * 100.0
        }
    }

    /// (high - low) / open * 100, or 0 for a degenerate zero open.
    pub fn range_pct(&self) -> f64 {
        if self.open == 0.0 {
            0.0
        } else {
            (self.high - self.low) / self.open * 100.0
        }
    }

    /// (open - prev_close) / prev_close * 100.
    pub fn gap_pct(&self, prev_close: f64) -> f64 {
        if prev_close == 0.0 {
            0.0
        } else {
            (self.open - prev_close) / prev_close * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_bar() -> Bar {
        Bar {
            symbol: "ES".into(),
            ts: NaiveDate::from_ymd_opt(2024, 3, 15)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
            open: 100.0,
            high: 110.0,
            low: 90.0,
            close: 105.0,
            volume: 50_000,
        }
    }

    #[test]
    fn range_and_body() {
        let bar = sample_bar();
        assert!((bar.range() - 20.0).abs() < f64::EPSILON);
        assert!((bar.body() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn direction_flags() {
        let bar = sample_bar();
        assert!(bar.is_green());
        assert!(!bar.is_red());
    }

    #[test]
    fn change_pct_of_sample() {
        let bar = sample_bar();
        // (105 - 100) / 100 * 100 = 5
        assert!((bar.change_pct() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn gap_up_from_prev_close() {
        let bar = sample_bar();
        // (100 - 80) / 80 * 100 = 25
        assert!((bar.gap_pct(80.0) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_open_is_not_a_division() {
        let mut bar = sample_bar();
        bar.open = 0.0;
        assert_eq!(bar.change_pct(), 0.0);
        assert_eq!(bar.range_pct(), 0.0);
    }
}
