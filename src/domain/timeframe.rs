//! Bar granularity.

use std::fmt;

/// Bar granularity, ordered finest to coarsest.
///
/// The derived `Ord` follows declaration order, so `Min5 < Day1` reads as
/// "finer than daily". Filter legality checks lean on that: a filter's
/// required timeframe is the coarsest granularity it still works at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timeframe {
    Min1,
    Min5,
    Min15,
    Min30,
    Hour1,
    Day1,
}

impl Timeframe {
    /// Bar span in minutes.
    pub fn minutes(&self) -> u32 {
        match self {
            Timeframe::Min1 => 1,
            Timeframe::Min5 => 5,
            Timeframe::Min15 => 15,
            Timeframe::Min30 => 30,
            Timeframe::Hour1 => 60,
            Timeframe::Day1 => 1440,
        }
    }

    pub fn is_intraday(&self) -> bool {
        *self != Timeframe::Day1
    }

    /// Canonical short name used on the wire and in stores.
    pub fn canonical(&self) -> &'static str {
        match self {
            Timeframe::Min1 => "1m",
            Timeframe::Min5 => "5m",
            Timeframe::Min15 => "15m",
            Timeframe::Min30 => "30m",
            Timeframe::Hour1 => "1h",
            Timeframe::Day1 => "1d",
        }
    }

    /// Parse a canonical name or a known alias, case-insensitively.
    pub fn parse(s: &str) -> Option<Timeframe> {
        match s.trim().to_lowercase().as_str() {
            "1m" | "1min" | "minute" => Some(Timeframe::Min1),
            "5m" | "5min" => Some(Timeframe::Min5),
            "15m" | "15min" => Some(Timeframe::Min15),
            "30m" | "30min" => Some(Timeframe::Min30),
            "1h" | "60m" | "hour" | "hourly" => Some(Timeframe::Hour1),
            "1d" | "d" | "day" | "daily" => Some(Timeframe::Day1),
            _ => None,
        }
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Timeframe::Day1
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical())
    }
}

impl serde::Serialize for Timeframe {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.canonical())
    }
}

impl<'de> serde::Deserialize<'de> for Timeframe {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Timeframe::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown timeframe '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_canonical_names() {
        assert_eq!(Timeframe::parse("5m"), Some(Timeframe::Min5));
        assert_eq!(Timeframe::parse("1d"), Some(Timeframe::Day1));
    }

    #[test]
    fn parse_aliases() {
        assert_eq!(Timeframe::parse("daily"), Some(Timeframe::Day1));
        assert_eq!(Timeframe::parse("HOURLY"), Some(Timeframe::Hour1));
        assert_eq!(Timeframe::parse("60m"), Some(Timeframe::Hour1));
        assert_eq!(Timeframe::parse(" 30min "), Some(Timeframe::Min30));
    }

    #[test]
    fn parse_unknown_is_none() {
        assert_eq!(Timeframe::parse("2h"), None);
        assert_eq!(Timeframe::parse(""), None);
    }

    #[test]
    fn order_runs_fine_to_coarse() {
        assert!(Timeframe::Min1 < Timeframe::Min30);
        assert!(Timeframe::Min30 < Timeframe::Day1);
        assert!(Timeframe::Hour1.is_intraday());
        assert!(!Timeframe::Day1.is_intraday());
    }

    #[test]
    fn serde_round_trips_canonical() {
        let tf: Timeframe = serde_json::from_str("\"daily\"").unwrap();
        assert_eq!(tf, Timeframe::Day1);
        assert_eq!(serde_json::to_string(&tf).unwrap(), "\"1d\"");
    }

    #[test]
    fn serde_rejects_unknown() {
        let r: Result<Timeframe, _> = serde_json::from_str("\"2h\"");
        assert!(r.is_err());
    }
}
