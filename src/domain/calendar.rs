//! Trading calendar: weekends, US market holidays, trading-day arithmetic.
//!
//! Deterministic and pure. The holiday table is the observed US equity/futures
//! holiday schedule for 2023-2026; additional closures can be supplied from
//! config for instruments with extra non-trading dates.

use chrono::{Datelike, NaiveDate, Weekday};

/// US market holidays 2023-2026, observed dates.
const HOLIDAYS: &[(i32, u32, u32)] = &[
    (2023, 1, 2),   // New Year's Day (observed Mon)
    (2023, 1, 16),  // MLK Day
    (2023, 2, 20),  // Presidents' Day
    (2023, 4, 7),   // Good Friday
    (2023, 5, 29),  // Memorial Day
    (2023, 6, 19),  // Juneteenth
    (2023, 7, 4),   // Independence Day
    (2023, 9, 4),   // Labor Day
    (2023, 11, 23), // Thanksgiving
    (2023, 12, 25), // Christmas
    (2024, 1, 1),   // New Year's Day
    (2024, 1, 15),  // MLK Day
    (2024, 2, 19),  // Presidents' Day
    (2024, 3, 29),  // Good Friday
    (2024, 5, 27),  // Memorial Day
    (2024, 6, 19),  // Juneteenth
    (2024, 7, 4),   // Independence Day
    (2024, 9, 2),   // Labor Day
    (2024, 11, 28), // Thanksgiving
    (2024, 12, 25), // Christmas
    (2025, 1, 1),   // New Year's Day
    (2025, 1, 20),  // MLK Day
    (2025, 2, 17),  // Presidents' Day
    (2025, 4, 18),  // Good Friday
    (2025, 5, 26),  // Memorial Day
    (2025, 6, 19),  // Juneteenth
    (2025, 7, 4),   // Independence Day
    (2025, 9, 1),   // Labor Day
    (2025, 11, 27), // Thanksgiving
    (2025, 12, 25), // Christmas
    (2026, 1, 1),   // New Year's Day
    (2026, 1, 19),  // MLK Day
    (2026, 2, 16),  // Presidents' Day
    (2026, 4, 3),   // Good Friday
    (2026, 5, 25),  // Memorial Day
    (2026, 6, 19),  // Juneteenth
    (2026, 7, 3),   // Independence Day (observed, July 4 falls on Saturday)
    (2026, 9, 7),   // Labor Day
    (2026, 11, 26), // Thanksgiving
    (2026, 12, 25), // Christmas
];

#[derive(Debug, Clone, Default)]
pub struct TradingCalendar {
    extra_holidays: Vec<NaiveDate>,
}

impl TradingCalendar {
    pub fn new() -> Self {
        TradingCalendar {
            extra_holidays: Vec::new(),
        }
    }

    pub fn with_extra_holidays(extra: Vec<NaiveDate>) -> Self {
        TradingCalendar {
            extra_holidays: extra,
        }
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        HOLIDAYS.contains(&(date.year(), date.month(), date.day()))
            || self.extra_holidays.contains(&date)
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.is_holiday(date)
    }

    /// Closest trading day strictly before `date`.
    pub fn prev_trading_day(&self, mut date: NaiveDate) -> NaiveDate {
        loop {
            date = match date.pred_opt() {
                Some(d) => d,
                None => return date,
            };
            if self.is_trading_day(date) {
                return date;
            }
        }
    }

    /// Closest trading day strictly after `date`.
    pub fn next_trading_day(&self, mut date: NaiveDate) -> NaiveDate {
        loop {
            date = match date.succ_opt() {
                Some(d) => d,
                None => return date,
            };
            if self.is_trading_day(date) {
                return date;
            }
        }
    }

    /// `date` itself if it trades, otherwise the closest earlier trading day.
    pub fn latest_on_or_before(&self, date: NaiveDate) -> NaiveDate {
        if self.is_trading_day(date) {
            date
        } else {
            self.prev_trading_day(date)
        }
    }

    /// The `n` most recent trading days on or before `as_of`, ascending.
    pub fn last_n_trading_days(&self, as_of: NaiveDate, n: u32) -> Vec<NaiveDate> {
        let mut days = Vec::with_capacity(n as usize);
        if n == 0 {
            return days;
        }
        let mut d = self.latest_on_or_before(as_of);
        for _ in 0..n {
            days.push(d);
            d = self.prev_trading_day(d);
        }
        days.reverse();
        days
    }

    /// First trading day of `date`'s month?
    pub fn is_month_start(&self, date: NaiveDate) -> bool {
        self.is_trading_day(date) && self.prev_trading_day(date).month() != date.month()
    }

    /// Last trading day of `date`'s month?
    pub fn is_month_end(&self, date: NaiveDate) -> bool {
        self.is_trading_day(date) && self.next_trading_day(date).month() != date.month()
    }

    /// Last trading day of a calendar quarter?
    pub fn is_quarter_end(&self, date: NaiveDate) -> bool {
        matches!(date.month(), 3 | 6 | 9 | 12) && self.is_month_end(date)
    }

    /// Monthly options expiration: the third Friday, rolled back to the
    /// closest earlier trading day when that Friday is a holiday.
    pub fn is_opex(&self, date: NaiveDate) -> bool {
        let Some(first) = NaiveDate::from_ymd_opt(date.year(), date.month(), 1) else {
            return false;
        };
        // Days from the 1st to the first Friday, then two more weeks.
        let to_friday = (4 + 7 - first.weekday().num_days_from_monday()) % 7;
        let Some(third_friday) = first.checked_add_days(chrono::Days::new((to_friday + 14) as u64))
        else {
            return false;
        };
        date == self.latest_on_or_before(third_friday)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn weekends_do_not_trade() {
        let cal = TradingCalendar::new();
        assert!(!cal.is_trading_day(day(2024, 1, 6))); // Saturday
        assert!(!cal.is_trading_day(day(2024, 1, 7))); // Sunday
        assert!(cal.is_trading_day(day(2024, 1, 8))); // Monday
    }

    #[test]
    fn new_years_day_2024_is_a_holiday() {
        let cal = TradingCalendar::new();
        assert!(!cal.is_trading_day(day(2024, 1, 1)));
        assert!(cal.is_trading_day(day(2024, 1, 2)));
    }

    #[test]
    fn extra_holidays_are_honored() {
        let cal = TradingCalendar::with_extra_holidays(vec![day(2024, 1, 8)]);
        assert!(!cal.is_trading_day(day(2024, 1, 8)));
    }

    #[test]
    fn prev_trading_day_skips_weekend_and_holiday() {
        let cal = TradingCalendar::new();
        // 2024-01-02 Tue -> back over New Year's Day and the weekend
        assert_eq!(cal.prev_trading_day(day(2024, 1, 2)), day(2023, 12, 29));
    }

    #[test]
    fn last_five_trading_days_from_a_tuesday() {
        let cal = TradingCalendar::new();
        let days = cal.last_n_trading_days(day(2024, 1, 9), 5);
        assert_eq!(
            days,
            vec![
                day(2024, 1, 3),
                day(2024, 1, 4),
                day(2024, 1, 5),
                day(2024, 1, 8),
                day(2024, 1, 9),
            ]
        );
    }

    #[test]
    fn last_n_from_a_weekend_ends_on_friday() {
        let cal = TradingCalendar::new();
        let days = cal.last_n_trading_days(day(2024, 1, 7), 2);
        assert_eq!(days, vec![day(2024, 1, 4), day(2024, 1, 5)]);
    }

    #[test]
    fn month_boundaries_respect_holidays() {
        let cal = TradingCalendar::new();
        // Jan 1 2024 is a holiday, so the month starts trading on the 2nd.
        assert!(cal.is_month_start(day(2024, 1, 2)));
        assert!(!cal.is_month_start(day(2024, 1, 3)));
        // Good Friday 2024-03-29 closes the market, so Q1 ends on the 28th.
        assert!(cal.is_month_end(day(2024, 3, 28)));
        assert!(cal.is_quarter_end(day(2024, 3, 28)));
        assert!(!cal.is_quarter_end(day(2024, 2, 29)));
    }

    #[test]
    fn opex_is_the_third_friday() {
        let cal = TradingCalendar::new();
        assert!(cal.is_opex(day(2024, 3, 15)));
        assert!(!cal.is_opex(day(2024, 3, 8)));
        assert!(!cal.is_opex(day(2024, 3, 22)));
    }

    #[test]
    fn opex_rolls_back_over_good_friday() {
        let cal = TradingCalendar::new();
        // Third Friday of April 2025 is Good Friday; expiry observes Thursday.
        assert!(!cal.is_opex(day(2025, 4, 18)));
        assert!(cal.is_opex(day(2025, 4, 17)));
    }
}
