use crate::error::{BillMonitorError, Result};
use chrono::{Datelike, NaiveDate};

/// Month names as they appear in the bill's reference-month label (e.g. "JANEIRO/2024").
pub const MONTH_NAMES: [&str; 12] = [
    "JANEIRO",
    "FEVEREIRO",
    "MARÇO",
    "ABRIL",
    "MAIO",
    "JUNHO",
    "JULHO",
    "AGOSTO",
    "SETEMBRO",
    "OUTUBRO",
    "NOVEMBRO",
    "DEZEMBRO",
];

pub const BILL_DATE_FORMAT: &str = "%d/%m/%Y";
pub const WEATHER_DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parses a date printed on a bill, in the "DD/MM/YYYY" form.
pub fn parse_bill_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), BILL_DATE_FORMAT).map_err(|_| {
        BillMonitorError::DateError(format!(
            "Invalid bill date: '{}'. Expected DD/MM/YYYY",
            raw
        ))
    })
}

pub fn parse_weather_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), WEATHER_DATE_FORMAT).map_err(|_| {
        BillMonitorError::DateError(format!(
            "Invalid weather date: '{}'. Expected YYYY-MM-DD",
            raw
        ))
    })
}

pub fn format_weather_date(date: NaiveDate) -> String {
    date.format(WEATHER_DATE_FORMAT).to_string()
}

/// Label in the bill's own style for the month containing `date`, e.g. "NOVEMBRO/2026".
pub fn month_label(date: NaiveDate) -> String {
    format!("{}/{}", MONTH_NAMES[date.month0() as usize], date.year())
}

/// Number of calendar days in `[start, end]`, zero when the range is empty.
pub fn days_inclusive(start: NaiveDate, end: NaiveDate) -> u64 {
    if end < start {
        return 0;
    }
    (end - start).num_days() as u64 + 1
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bill_date() {
        assert_eq!(
            parse_bill_date("15/02/2024").unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 15).unwrap()
        );
        assert_eq!(
            parse_bill_date(" 01/12/2023 ").unwrap(),
            NaiveDate::from_ymd_opt(2023, 12, 1).unwrap()
        );
        assert!(parse_bill_date("2024-02-15").is_err());
        assert!(parse_bill_date("31/02/2024").is_err());
    }

    #[test]
    fn test_month_label() {
        let date = NaiveDate::from_ymd_opt(2026, 11, 3).unwrap();
        assert_eq!(month_label(date), "NOVEMBRO/2026");

        let date = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        assert_eq!(month_label(date), "MARÇO/2024");
    }

    #[test]
    fn test_days_inclusive() {
        let a = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let b = NaiveDate::from_ymd_opt(2024, 1, 30).unwrap();
        assert_eq!(days_inclusive(a, b), 30);
        assert_eq!(days_inclusive(a, a), 1);
        assert_eq!(days_inclusive(b, a), 0);
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[20.0, 22.0]), Some(21.0));
    }
}
