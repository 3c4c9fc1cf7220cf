use chrono::{NaiveDate, NaiveDateTime};

use conclave_core::traits::FactProvider;

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"];

/// Default fact provider for datetime fields: restates the raw value with
/// its normalized date, weekday and time.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatetimeFacts;

impl FactProvider for DatetimeFacts {
    fn compute_fact(&self, label: &str, raw_value: &str) -> String {
        let raw = raw_value.trim();

        if let Some(dt) = DATETIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        {
            return format!(
                "{}: {}\nDate: {}, {}, hour {}",
                label,
                raw,
                dt.format("%Y-%m-%d"),
                dt.format("%A"),
                dt.format("%H:%M"),
            );
        }

        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return format!(
                "{}: {}\nDate: {}, {}",
                label,
                raw,
                date.format("%Y-%m-%d"),
                date.format("%A"),
            );
        }

        format!("{}: {}", label, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datetime_value() {
        let fact = DatetimeFacts.compute_fact("Birth time", "1990-05-17 08:30");
        assert_eq!(
            fact,
            "Birth time: 1990-05-17 08:30\nDate: 1990-05-17, Thursday, hour 08:30"
        );
    }

    #[test]
    fn test_form_input_format() {
        let fact = DatetimeFacts.compute_fact("Start", "2024-02-29T23:05");
        assert!(fact.ends_with("Date: 2024-02-29, Thursday, hour 23:05"));
    }

    #[test]
    fn test_date_only() {
        let fact = DatetimeFacts.compute_fact("Day", "2000-01-01");
        assert_eq!(fact, "Day: 2000-01-01\nDate: 2000-01-01, Saturday");
    }

    #[test]
    fn test_unparseable_passes_through() {
        assert_eq!(
            DatetimeFacts.compute_fact("When", "spring of '98"),
            "When: spring of '98"
        );
    }
}
