//! Season label ordering
//!
//! Sources publish season labels in several shapes: "2023-2024", "2023-24",
//! "2023/2024" and single years like "2023" for calendar-year competitions.
//! Labels order by start year, then end year, then raw text.

use std::cmp::Ordering;

/// Sortable key for a season label
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SeasonOrder {
    start_year: i32,
    end_year: i32,
    label: String,
}

impl SeasonOrder {
    pub fn parse(label: &str) -> Self {
        let trimmed = label.trim();
        let mut years = trimmed
            .split(|c: char| !c.is_ascii_digit())
            .filter(|part| !part.is_empty());

        let start_year = years
            .next()
            .and_then(|part| part.parse::<i32>().ok())
            .unwrap_or(i32::MIN);

        let end_year = match years.next() {
            // "2023-24" -> 2024
            Some(part) if part.len() == 2 && start_year != i32::MIN => part
                .parse::<i32>()
                .ok()
                .and_then(|yy| expand_short_year(start_year, yy))
                .unwrap_or(start_year),
            Some(part) => part.parse::<i32>().unwrap_or(start_year),
            None => start_year,
        };

        Self {
            start_year,
            end_year,
            label: trimmed.to_string(),
        }
    }

    /// (start year, end year), ignoring how the label was written
    pub fn span(&self) -> (i32, i32) {
        (self.start_year, self.end_year)
    }
}

/// Expand a two-digit end year against its start year ("2099-00" -> 2100)
fn expand_short_year(start_year: i32, yy: i32) -> Option<i32> {
    let year = (start_year - start_year.rem_euclid(100)).checked_add(yy)?;
    if year < start_year {
        year.checked_add(100)
    } else {
        Some(year)
    }
}

/// Compare two season labels chronologically
pub fn compare_seasons(a: &str, b: &str) -> Ordering {
    SeasonOrder::parse(a).cmp(&SeasonOrder::parse(b))
}

/// True if both labels name the same season ("2023-24" and "2023/2024")
///
/// Labels without a year fall back to case-insensitive text equality.
pub fn same_season(a: &str, b: &str) -> bool {
    let (a, b) = (SeasonOrder::parse(a), SeasonOrder::parse(b));
    if a.start_year == i32::MIN || b.start_year == i32::MIN {
        return a.label.eq_ignore_ascii_case(&b.label);
    }
    a.start_year == b.start_year && a.end_year == b.end_year
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_ranges_order() {
        assert_eq!(compare_seasons("2023-2024", "2022-2023"), Ordering::Greater);
        assert_eq!(compare_seasons("2022", "2023"), Ordering::Less);
        assert_eq!(compare_seasons("2023-2024", "2023-2024"), Ordering::Equal);
    }

    #[test]
    fn test_short_and_long_forms_agree() {
        assert_eq!(
            SeasonOrder::parse("2023-24").end_year,
            SeasonOrder::parse("2023-2024").end_year
        );
        assert_eq!(SeasonOrder::parse("1999-00").end_year, 2000);
    }

    #[test]
    fn test_single_year_sorts_before_range_starting_same_year() {
        assert_eq!(compare_seasons("2023", "2023-2024"), Ordering::Less);
        assert_eq!(compare_seasons("2023-2024", "2024"), Ordering::Less);
    }

    #[test]
    fn test_same_season_across_forms() {
        assert!(same_season("2023-24", "2023/2024"));
        assert!(same_season("2023", " 2023 "));
        assert!(!same_season("2023", "2023-2024"));
        assert!(same_season("Unknown", "unknown"));
    }

    #[test]
    fn test_extreme_years_do_not_overflow() {
        let order = SeasonOrder::parse("2147483647-99");
        assert_eq!(order.span(), (i32::MAX, i32::MAX));
        assert_eq!(SeasonOrder::parse("2099-00").end_year, 2100);
    }

    #[test]
    fn test_unparseable_label_sorts_first() {
        assert_eq!(compare_seasons("unknown", "1990"), Ordering::Less);
    }
}
