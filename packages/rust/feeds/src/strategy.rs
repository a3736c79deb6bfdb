//! Entry filtering by fetch strategy.
//!
//! `FullArchive` keeps everything the feed exposes. `DailyUpdates` keeps only
//! entries from the previous calendar day (or, optionally, the last 24
//! hours). Undated entries are kept — better to include than to miss.

use chrono::{DateTime, Duration, Utc};

use feedharvest_shared::FetchStrategy;

use crate::parser::FeedEntry;

/// Options refining the `DailyUpdates` strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterOptions {
    /// Use a rolling 24-hour window instead of the previous calendar day.
    pub use_24h_window: bool,
}

/// Filter `entries` according to `strategy`, evaluated against `reference`
/// (normally "now"; injectable for tests).
pub fn filter_entries(
    entries: Vec<FeedEntry>,
    strategy: FetchStrategy,
    options: FilterOptions,
    reference: DateTime<Utc>,
) -> Vec<FeedEntry> {
    match strategy {
        FetchStrategy::FullArchive => entries,
        FetchStrategy::DailyUpdates => entries
            .into_iter()
            .filter(|entry| match entry.published {
                None => true,
                Some(published) => {
                    if options.use_24h_window {
                        is_within_last_24h(published, reference)
                    } else {
                        is_from_previous_day(published, reference)
                    }
                }
            })
            .collect(),
    }
}

/// Whether `published` falls on the calendar day before `reference`
/// (midnight-to-midnight, UTC).
pub fn is_from_previous_day(published: DateTime<Utc>, reference: DateTime<Utc>) -> bool {
    let today_start = reference
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is valid")
        .and_utc();
    let yesterday_start = today_start - Duration::days(1);

    published >= yesterday_start && published < today_start
}

/// Whether `published` is within 24 hours before `reference`.
pub fn is_within_last_24h(published: DateTime<Utc>, reference: DateTime<Utc>) -> bool {
    reference - published <= Duration::hours(24)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(published: Option<DateTime<Utc>>) -> FeedEntry {
        FeedEntry {
            title: Some("t".into()),
            link: Some("https://example.com/a".into()),
            summary: None,
            published,
            author: None,
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn full_archive_keeps_everything() {
        let entries = vec![entry(Some(at(2020, 1, 1, 0))), entry(None)];
        let kept = filter_entries(
            entries,
            FetchStrategy::FullArchive,
            FilterOptions::default(),
            at(2025, 8, 6, 12),
        );
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn daily_updates_keeps_previous_day_only() {
        let reference = at(2025, 8, 6, 12);
        let entries = vec![
            entry(Some(at(2025, 8, 5, 0))),  // yesterday midnight: kept
            entry(Some(at(2025, 8, 5, 23))), // yesterday evening: kept
            entry(Some(at(2025, 8, 6, 1))),  // today: dropped
            entry(Some(at(2025, 8, 4, 23))), // two days ago: dropped
            entry(None),                     // undated: kept
        ];
        let kept = filter_entries(
            entries,
            FetchStrategy::DailyUpdates,
            FilterOptions::default(),
            reference,
        );
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn daily_updates_with_24h_window() {
        let reference = at(2025, 8, 6, 12);
        let entries = vec![
            entry(Some(at(2025, 8, 6, 1))),  // 11h ago: kept
            entry(Some(at(2025, 8, 5, 13))), // 23h ago: kept
            entry(Some(at(2025, 8, 5, 11))), // 25h ago: dropped
        ];
        let kept = filter_entries(
            entries,
            FetchStrategy::DailyUpdates,
            FilterOptions {
                use_24h_window: true,
            },
            reference,
        );
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn previous_day_boundaries_are_half_open() {
        let reference = at(2025, 8, 6, 0);
        assert!(is_from_previous_day(at(2025, 8, 5, 0), reference));
        assert!(!is_from_previous_day(at(2025, 8, 6, 0), reference));
        assert!(!is_from_previous_day(at(2025, 8, 4, 23), reference));
    }
}
