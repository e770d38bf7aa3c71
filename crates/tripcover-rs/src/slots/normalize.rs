//! Deterministic normalization of extracted slot values.
//!
//! Dates are coerced to ISO-8601 calendar dates (day-month inputs with no
//! year resolve forward from the session clock); destinations map to the
//! insurer's canonical country names; ages are bounded integers. When a
//! traveler count contradicts the age list, the ages win and the caller
//! gets a note to relay.

use crate::insurer::countries::canonical_country;
use chrono::{Datelike, NaiveDate};

/// Parse a date string into a calendar date.
///
/// Accepts ISO-8601 plus the formats people actually type. Inputs without
/// a year resolve to the next occurrence on or after `today`.
pub fn parse_date(input: &str, today: NaiveDate) -> Option<NaiveDate> {
    let cleaned = input.trim();
    if cleaned.is_empty() {
        return None;
    }

    const WITH_YEAR: &[&str] = &[
        "%Y-%m-%d", "%d %B %Y", "%d %b %Y", "%B %d %Y", "%b %d %Y", "%B %d, %Y", "%b %d, %Y",
        "%d/%m/%Y", "%d.%m.%Y",
    ];
    for format in WITH_YEAR {
        if let Ok(date) = NaiveDate::parse_from_str(cleaned, format) {
            return Some(date);
        }
    }

    // Day-month without a year: roll forward from the session clock.
    const WITHOUT_YEAR: &[&str] = &["%d %B", "%d %b", "%B %d", "%b %d"];
    for format in WITHOUT_YEAR {
        let with_year = format!("{cleaned} {}", today.year());
        let format_with_year = format!("{format} %Y");
        if let Ok(date) = NaiveDate::parse_from_str(&with_year, &format_with_year) {
            return if date >= today {
                Some(date)
            } else {
                date.with_year(today.year() + 1)
            };
        }
    }

    None
}

/// Validate an age: integer in [0, 120).
pub fn normalize_age(age: i64) -> Option<u32> {
    if (0..120).contains(&age) {
        Some(age as u32)
    } else {
        None
    }
}

/// Canonicalize destination names, preserving order and dropping
/// duplicates. Unknown names are returned separately so the caller can ask
/// about them.
pub fn normalize_destinations(raw: &[String]) -> (Vec<String>, Vec<String>) {
    let mut canonical = Vec::new();
    let mut unknown = Vec::new();
    for name in raw {
        match canonical_country(name) {
            Some(resolved) => {
                if !canonical.iter().any(|c| c == resolved) {
                    canonical.push(resolved.to_string());
                }
            }
            None => unknown.push(name.clone()),
        }
    }
    (canonical, unknown)
}

/// Reconcile a stated traveler count with an age list. Ages win; a note is
/// produced when they contradict.
pub fn reconcile_travelers(count: Option<u32>, ages: &[u32]) -> (Option<u32>, Option<String>) {
    match count {
        Some(stated) if !ages.is_empty() && stated as usize != ages.len() => {
            let actual = ages.len();
            (
                Some(actual as u32),
                Some(format!(
                    "You mentioned {stated} travelers but gave {actual} ages — I'll go with the {actual} ages."
                )),
            )
        }
        Some(stated) => (Some(stated), None),
        None if !ages.is_empty() => (Some(ages.len() as u32), None),
        None => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()
    }

    #[test]
    fn iso_dates_parse() {
        assert_eq!(
            parse_date("2025-11-16", today()),
            NaiveDate::from_ymd_opt(2025, 11, 16)
        );
    }

    #[test]
    fn human_formats_parse() {
        let expected = NaiveDate::from_ymd_opt(2025, 11, 16);
        assert_eq!(parse_date("16 Nov 2025", today()), expected);
        assert_eq!(parse_date("16 November 2025", today()), expected);
        assert_eq!(parse_date("Nov 16, 2025", today()), expected);
        assert_eq!(parse_date("16/11/2025", today()), expected);
    }

    #[test]
    fn yearless_dates_roll_forward() {
        // November is ahead of the August session clock: same year.
        assert_eq!(
            parse_date("16 Nov", today()),
            NaiveDate::from_ymd_opt(2025, 11, 16)
        );
        // March already passed: next year.
        assert_eq!(
            parse_date("5 Mar", today()),
            NaiveDate::from_ymd_opt(2026, 3, 5)
        );
    }

    #[test]
    fn garbage_dates_are_none() {
        assert_eq!(parse_date("whenever", today()), None);
        assert_eq!(parse_date("", today()), None);
    }

    #[test]
    fn ages_are_bounded() {
        assert_eq!(normalize_age(0), Some(0));
        assert_eq!(normalize_age(119), Some(119));
        assert_eq!(normalize_age(120), None);
        assert_eq!(normalize_age(-1), None);
    }

    #[test]
    fn destinations_canonicalize_and_dedupe() {
        let (canonical, unknown) = normalize_destinations(&[
            "thailand".into(),
            "USA".into(),
            "Thailand".into(),
            "Narnia".into(),
        ]);
        assert_eq!(canonical, vec!["Thailand", "United States"]);
        assert_eq!(unknown, vec!["Narnia"]);
    }

    #[test]
    fn ages_win_over_contradicting_count() {
        let (count, note) = reconcile_travelers(Some(3), &[32, 8]);
        assert_eq!(count, Some(2));
        assert!(note.unwrap().contains("2 ages"));
    }

    #[test]
    fn count_inferred_from_ages() {
        let (count, note) = reconcile_travelers(None, &[32, 8, 41]);
        assert_eq!(count, Some(3));
        assert!(note.is_none());
    }
}
