use chrono::{DateTime, Datelike, TimeZone};

use crate::directive::Directive;

/// Derive the next serial number for the calendar year of `now`
///
/// The sequence is the number of loaded records created in that year plus one,
/// counted in `now`'s time zone. It is only as fresh as the caller's record
/// set, so two clients creating at the same moment can hand out the same
/// serial.
///
/// # Examples
/// ```
/// use chrono::{TimeZone, Utc};
/// use ed_dash::serial::next_serial;
///
/// let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
/// assert_eq!(next_serial(&[], now), "2025-1");
/// ```
pub fn next_serial<Tz: TimeZone>(records: &[Directive], now: DateTime<Tz>) -> String {
    let zone = now.timezone();
    let year = now.year();
    let count = records
        .iter()
        .filter(|record| record.created_at.with_timezone(&zone).year() == year)
        .count();
    format!("{}-{}", year, count + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::DirectiveId;
    use chrono::{FixedOffset, Utc};

    fn created(id: &str, at: DateTime<Utc>) -> Directive {
        Directive {
            id: DirectiveId::new(id),
            serial_no: None,
            task: "task".to_string(),
            dept: "dept".to_string(),
            progress: Some(0),
            status: None,
            created_at: at,
        }
    }

    #[test]
    fn counts_only_records_from_the_current_year() {
        let records = vec![
            created("1", Utc.with_ymd_and_hms(2023, 12, 30, 10, 0, 0).unwrap()),
            created("2", Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap()),
            created("3", Utc.with_ymd_and_hms(2024, 5, 2, 10, 0, 0).unwrap()),
            created("4", Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap()),
        ];
        let now = Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap();
        assert_eq!(next_serial(&records, now), "2024-3");
    }

    #[test]
    fn year_boundary_follows_the_clock_zone() {
        // 2023-12-31 20:00 UTC is already 2024 in Seoul
        let records = vec![created(
            "1",
            Utc.with_ymd_and_hms(2023, 12, 31, 20, 0, 0).unwrap(),
        )];
        let seoul = FixedOffset::east_opt(9 * 3600).unwrap();
        let now = seoul.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap();
        assert_eq!(next_serial(&records, now), "2024-2");

        let now_utc = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        assert_eq!(next_serial(&records, now_utc), "2024-1");
    }
}
