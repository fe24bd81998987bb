//! `YYYY-MM` billing-month key.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BillingMonth {
    year: i32,
    month: u32,
}

impl BillingMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, String> {
        if !(1..=12).contains(&month) {
            return Err(format!("month must be between 1 and 12, got {}", month));
        }
        if !(1970..=9999).contains(&year) {
            return Err(format!("year out of range: {}", year));
        }
        Ok(Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BillingMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for BillingMonth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .split_once('-')
            .ok_or_else(|| format!("billing month must look like YYYY-MM, got '{}'", s))?;
        if year.len() != 4 || month.len() != 2 {
            return Err(format!("billing month must look like YYYY-MM, got '{}'", s));
        }
        let year = year
            .parse()
            .map_err(|_| format!("invalid year in billing month '{}'", s))?;
        let month = month
            .parse()
            .map_err(|_| format!("invalid month in billing month '{}'", s))?;
        Self::new(year, month)
    }
}

impl Serialize for BillingMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BillingMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_zero_padded() {
        let month = BillingMonth::new(2026, 3).unwrap();
        assert_eq!(month.key(), "2026-03");
        assert_eq!("2026-03".parse::<BillingMonth>().unwrap(), month);
    }

    #[test]
    fn invalid_months_are_rejected() {
        assert!(BillingMonth::new(2026, 0).is_err());
        assert!(BillingMonth::new(2026, 13).is_err());
        assert!("2026-3".parse::<BillingMonth>().is_err());
        assert!("march".parse::<BillingMonth>().is_err());
    }

    #[test]
    fn month_of_date() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(BillingMonth::of(date).key(), "2026-10");
    }
}
