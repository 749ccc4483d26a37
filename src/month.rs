//! Calendar month keys used to slice the case table.

use std::fmt;
use std::str::FromStr;

use chrono::Month;
use serde::Serialize;

use crate::error::MapError;

/// A `(year, month)` pair. Orders chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    /// Returns `None` when `month` is outside 1-12.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    /// The following calendar month, or `None` past the last representable year.
    pub fn succ(self) -> Option<Self> {
        if self.month == 12 {
            Some(Self {
                year: self.year.checked_add(1)?,
                month: 1,
            })
        } else {
            Some(Self {
                year: self.year,
                month: self.month + 1,
            })
        }
    }

    /// English month name, e.g. `"August"`.
    pub fn month_name(self) -> &'static str {
        u8::try_from(self.month)
            .ok()
            .and_then(|m| Month::try_from(m).ok())
            .map_or("", |m| m.name())
    }

    /// Human label such as `"August 2024"`.
    pub fn label(self) -> String {
        format!("{} {}", self.month_name(), self.year)
    }

    /// File stem shared by every per-month artifact.
    pub fn file_stem(self) -> String {
        format!("choropleth_{}_{:02}", self.year, self.month)
    }

    /// Inclusive iterator from `self` to `end`. Empty when `end` is earlier.
    pub fn through(self, end: YearMonth) -> impl Iterator<Item = YearMonth> {
        std::iter::successors(Some(self), |ym| ym.succ()).take_while(move |ym| *ym <= end)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = MapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MapError::InvalidYearMonth(s.to_string());
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        YearMonth::new(year, month).ok_or_else(invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ym(year: i32, month: u32) -> YearMonth {
        YearMonth::new(year, month).unwrap()
    }

    #[test]
    fn test_new_rejects_out_of_range_month() {
        assert!(YearMonth::new(2024, 0).is_none());
        assert!(YearMonth::new(2024, 13).is_none());
        assert!(YearMonth::new(2024, 12).is_some());
    }

    #[test]
    fn test_parse_and_display() {
        let parsed: YearMonth = "2024-03".parse().unwrap();
        assert_eq!(parsed, ym(2024, 3));
        assert_eq!(parsed.to_string(), "2024-03");
        assert!("2024-13".parse::<YearMonth>().is_err());
        assert!("2024/03".parse::<YearMonth>().is_err());
        assert!("march".parse::<YearMonth>().is_err());
    }

    #[test]
    fn test_through_rolls_over_december() {
        let months: Vec<_> = ym(2023, 11).through(ym(2024, 2)).collect();
        assert_eq!(
            months,
            vec![ym(2023, 11), ym(2023, 12), ym(2024, 1), ym(2024, 2)]
        );
    }

    #[test]
    fn test_through_stops_at_last_year() {
        let last = ym(i32::MAX, 12);
        assert_eq!(last.succ(), None);
        let months: Vec<_> = ym(i32::MAX, 11).through(last).collect();
        assert_eq!(months, vec![ym(i32::MAX, 11), last]);
    }

    #[test]
    fn test_through_is_inclusive_and_empty_when_reversed() {
        assert_eq!(ym(2024, 5).through(ym(2024, 5)).count(), 1);
        assert_eq!(ym(2024, 5).through(ym(2024, 4)).count(), 0);
    }

    #[test]
    fn test_labels() {
        assert_eq!(ym(2024, 8).label(), "August 2024");
        assert_eq!(ym(2024, 8).file_stem(), "choropleth_2024_08");
    }
}
