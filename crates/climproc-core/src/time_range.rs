//! Year ranges used for dataset search and namelists.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ResolutionError;

/// Inclusive range of years, `start_year <= end_year` once validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_year: i32,
    pub end_year: i32,
}

impl TimeRange {
    pub fn new(start_year: i32, end_year: i32) -> Self {
        Self {
            start_year,
            end_year,
        }
    }

    pub fn validate(&self) -> Result<(), ResolutionError> {
        if self.start_year > self.end_year || self.start_date().is_none() || self.end_date().is_none() {
            return Err(ResolutionError::InvalidTimeRange {
                start_year: self.start_year,
                end_year: self.end_year,
            });
        }
        Ok(())
    }

    /// Jan 1 of the start year.
    pub fn start_date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.start_year, 1, 1)
    }

    /// Dec 31 of the end year.
    pub fn end_date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.end_year, 12, 31)
    }

    /// Day bounds as search timestamps.
    pub fn search_bounds(&self) -> Result<(String, String), ResolutionError> {
        self.validate()?;
        let invalid = || ResolutionError::InvalidTimeRange {
            start_year: self.start_year,
            end_year: self.end_year,
        };
        let start = self.start_date().ok_or_else(invalid)?;
        let end = self.end_date().ok_or_else(invalid)?;
        Ok((
            format!("{}T00:00:00Z", start.format("%Y-%m-%d")),
            format!("{}T23:59:59Z", end.format("%Y-%m-%d")),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_bounds() {
        let range = TimeRange::new(2000, 2005);
        assert_eq!(range.start_date(), NaiveDate::from_ymd_opt(2000, 1, 1));
        assert_eq!(range.end_date(), NaiveDate::from_ymd_opt(2005, 12, 31));

        let (start, end) = range.search_bounds().unwrap();
        assert_eq!(start, "2000-01-01T00:00:00Z");
        assert_eq!(end, "2005-12-31T23:59:59Z");
    }

    #[test]
    fn test_single_year_is_valid() {
        assert!(TimeRange::new(1990, 1990).validate().is_ok());
    }

    #[test]
    fn test_reversed_range_rejected() {
        for (start, end) in [(2001, 2000), (2100, 1850), (0, -1)] {
            let err = TimeRange::new(start, end).validate().unwrap_err();
            assert!(matches!(err, ResolutionError::InvalidTimeRange { .. }));
        }
    }
}
