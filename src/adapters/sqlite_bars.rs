//! SQLite bar store.
//!
//! One `bars` table keyed by symbol, timeframe and opening timestamp.
//! Timestamps are stored as `%Y-%m-%d %H:%M:%S` text so lexicographic
//! order is chronological order and the half-open fetch range maps
//! straight onto `ts >= start AND ts < end`.

use crate::domain::bar::Bar;
use crate::domain::error::EngineError;
use crate::domain::resolve::DateRange;
use crate::domain::timeframe::Timeframe;
use crate::ports::bar_store::BarStore;
use crate::ports::config_port::ConfigPort;
use chrono::{NaiveDate, NaiveDateTime};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug)]
pub struct SqliteBarStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteBarStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, EngineError> {
        let db_path =
            config
                .get_string("data", "path")
                .ok_or_else(|| EngineError::ConfigMissing {
                    section: "data".into(),
                    key: "path".into(),
                })?;

        let pool_size = config.get_int("data", "pool_size", 4) as u32;

        let manager = SqliteConnectionManager::file(&db_path);
        let pool =
            Pool::builder()
                .max_size(pool_size)
                .build(manager)
                .map_err(|e: r2d2::Error| EngineError::Store {
                    reason: e.to_string(),
                })?;

        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, EngineError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e: r2d2::Error| EngineError::Store {
                reason: e.to_string(),
            })?;

        Ok(Self { pool })
    }

    pub fn initialize_schema(&self) -> Result<(), EngineError> {
        let conn = self
            .pool
            .get()
            .map_err(|e: r2d2::Error| EngineError::Store {
                reason: e.to_string(),
            })?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS bars (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                ts TEXT NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume INTEGER NOT NULL,
                PRIMARY KEY (symbol, timeframe, ts)
            );
            CREATE INDEX IF NOT EXISTS idx_bars_symbol_timeframe ON bars(symbol, timeframe);",
        )
        .map_err(|e: rusqlite::Error| EngineError::Store {
            reason: e.to_string(),
        })?;

        Ok(())
    }

    pub fn insert_bars(&self, timeframe: Timeframe, bars: &[Bar]) -> Result<(), EngineError> {
        let mut conn = self
            .pool
            .get()
            .map_err(|e: r2d2::Error| EngineError::Store {
                reason: e.to_string(),
            })?;

        let tx = conn
            .transaction()
            .map_err(|e: rusqlite::Error| EngineError::Store {
                reason: e.to_string(),
            })?;

        for bar in bars {
            tx.execute(
                "INSERT OR REPLACE INTO bars (symbol, timeframe, ts, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    bar.symbol,
                    timeframe.canonical(),
                    bar.ts.format(TS_FORMAT).to_string(),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume
                ],
            )
            .map_err(|e: rusqlite::Error| EngineError::Store {
                reason: e.to_string(),
            })?;
        }

        tx.commit().map_err(|e: rusqlite::Error| EngineError::Store {
            reason: e.to_string(),
        })?;

        Ok(())
    }
}

impl BarStore for SqliteBarStore {
    fn fetch(
        &self,
        symbol: &str,
        period: &DateRange,
        timeframe: Timeframe,
    ) -> Result<Vec<Bar>, EngineError> {
        let conn = self
            .pool
            .get()
            .map_err(|e: r2d2::Error| EngineError::Store {
                reason: e.to_string(),
            })?;

        let start_str = period
            .start
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default()
            .format(TS_FORMAT)
            .to_string();
        let end_str = period
            .end
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default()
            .format(TS_FORMAT)
            .to_string();

        let query = "SELECT symbol, ts, open, high, low, close, volume
                     FROM bars
                     WHERE symbol = ?1 AND timeframe = ?2 AND ts >= ?3 AND ts < ?4
                     ORDER BY ts ASC";

        let mut stmt = conn
            .prepare(query)
            .map_err(|e: rusqlite::Error| EngineError::Store {
                reason: e.to_string(),
            })?;

        let rows = stmt
            .query_map(
                params![symbol, timeframe.canonical(), start_str, end_str],
                |row| {
                    let ts_str: String = row.get(1)?;
                    let ts = NaiveDateTime::parse_from_str(&ts_str, TS_FORMAT).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            ts_str.len(),
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?;
                    Ok(Bar {
                        symbol: row.get(0)?,
                        ts,
                        open: row.get(2)?,
                        high: row.get(3)?,
                        low: row.get(4)?,
                        close: row.get(5)?,
                        volume: row.get(6)?,
                    })
                },
            )
            .map_err(|e: rusqlite::Error| EngineError::Store {
                reason: e.to_string(),
            })?;

        let mut bars = Vec::new();
        for row in rows {
            bars.push(row.map_err(|e: rusqlite::Error| EngineError::Store {
                reason: e.to_string(),
            })?);
        }

        Ok(bars)
    }

    fn symbols(&self) -> Result<Vec<String>, EngineError> {
        let conn = self
            .pool
            .get()
            .map_err(|e: r2d2::Error| EngineError::Store {
                reason: e.to_string(),
            })?;

        let query = "SELECT DISTINCT symbol FROM bars ORDER BY symbol";

        let mut stmt = conn
            .prepare(query)
            .map_err(|e: rusqlite::Error| EngineError::Store {
                reason: e.to_string(),
            })?;

        let rows = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e: rusqlite::Error| EngineError::Store {
                reason: e.to_string(),
            })?;

        let mut symbols = Vec::new();
        for row in rows {
            symbols.push(row.map_err(|e: rusqlite::Error| EngineError::Store {
                reason: e.to_string(),
            })?);
        }

        Ok(symbols)
    }

    fn coverage(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, EngineError> {
        let conn = self
            .pool
            .get()
            .map_err(|e: r2d2::Error| EngineError::Store {
                reason: e.to_string(),
            })?;

        let query = "SELECT MIN(ts), MAX(ts), COUNT(*)
                     FROM bars WHERE symbol = ?1 AND timeframe = ?2";

        let result: (Option<String>, Option<String>, i64) = conn
            .query_row(query, params![symbol, timeframe.canonical()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .map_err(|e: rusqlite::Error| EngineError::Store {
                reason: e.to_string(),
            })?;

        match result {
            (Some(min_str), Some(max_str), count) if count > 0 => {
                let min = NaiveDateTime::parse_from_str(&min_str, TS_FORMAT).map_err(
                    |e: chrono::ParseError| EngineError::Store {
                        reason: e.to_string(),
                    },
                )?;
                let max = NaiveDateTime::parse_from_str(&max_str, TS_FORMAT).map_err(
                    |e: chrono::ParseError| EngineError::Store {
                        reason: e.to_string(),
                    },
                )?;
                Ok(Some((min.date(), max.date(), count as usize)))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyConfig;

    impl ConfigPort for EmptyConfig {
        fn get_string(&self, _section: &str, _key: &str) -> Option<String> {
            None
        }
        fn get_int(&self, _section: &str, _key: &str, default: i64) -> i64 {
            default
        }
        fn get_double(&self, _section: &str, _key: &str, default: f64) -> f64 {
            default
        }
        fn get_bool(&self, _section: &str, _key: &str, default: bool) -> bool {
            default
        }
    }

    fn daily_bar(day: u32, close: f64) -> Bar {
        Bar {
            symbol: "ES".to_string(),
            ts: NaiveDate::from_ymd_opt(2024, 1, day)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            open: close - 1.0,
            high: close + 0.5,
            low: close - 1.5,
            close,
            volume: 1000,
        }
    }

    #[test]
    fn from_config_missing_path() {
        let config = EmptyConfig;
        let result = SqliteBarStore::from_config(&config);
        match result {
            Err(EngineError::ConfigMissing { section, key }) => {
                assert_eq!(section, "data");
                assert_eq!(key, "path");
            }
            Err(other) => panic!("expected ConfigMissing, got: {other}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }

    #[test]
    fn in_memory_initialization() {
        let store = SqliteBarStore::in_memory().unwrap();
        store.initialize_schema().unwrap();
    }

    #[test]
    fn fetch_honors_the_half_open_range() {
        let store = SqliteBarStore::in_memory().unwrap();
        store.initialize_schema().unwrap();

        let bars = vec![daily_bar(1, 100.5), daily_bar(2, 101.5), daily_bar(3, 102.0)];
        store.insert_bars(Timeframe::Day1, &bars).unwrap();

        let period = DateRange {
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
        };
        let fetched = store.fetch("ES", &period, Timeframe::Day1).unwrap();

        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].close, 100.5);
        assert_eq!(fetched[1].close, 101.5);
    }

    #[test]
    fn timeframes_are_kept_apart() {
        let store = SqliteBarStore::in_memory().unwrap();
        store.initialize_schema().unwrap();

        store.insert_bars(Timeframe::Day1, &[daily_bar(2, 101.0)]).unwrap();
        let mut intraday = daily_bar(2, 100.2);
        intraday.ts = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        store.insert_bars(Timeframe::Min5, &[intraday]).unwrap();

        let period = DateRange {
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        };
        let daily = store.fetch("ES", &period, Timeframe::Day1).unwrap();

        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].close, 101.0);
    }

    #[test]
    fn symbols_are_distinct_and_sorted() {
        let store = SqliteBarStore::in_memory().unwrap();
        store.initialize_schema().unwrap();

        let mut nq = daily_bar(1, 150.5);
        nq.symbol = "NQ".to_string();
        store
            .insert_bars(Timeframe::Day1, &[daily_bar(1, 100.5), daily_bar(2, 101.0), nq])
            .unwrap();

        assert_eq!(store.symbols().unwrap(), vec!["ES", "NQ"]);
    }

    #[test]
    fn coverage_reports_span_and_count() {
        let store = SqliteBarStore::in_memory().unwrap();
        store.initialize_schema().unwrap();

        store
            .insert_bars(Timeframe::Day1, &[daily_bar(1, 100.5), daily_bar(5, 102.5)])
            .unwrap();

        let (min, max, count) = store.coverage("ES", Timeframe::Day1).unwrap().unwrap();
        assert_eq!(min, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(max, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        assert_eq!(count, 2);
    }

    #[test]
    fn coverage_is_none_without_rows() {
        let store = SqliteBarStore::in_memory().unwrap();
        store.initialize_schema().unwrap();

        assert!(store.coverage("ES", Timeframe::Day1).unwrap().is_none());
        assert!(store.coverage("ES", Timeframe::Min5).unwrap().is_none());
    }
}
