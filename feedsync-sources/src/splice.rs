//! Splice loader — one feed stitched from two providers across a cutover
//! date.
//!
//! Some series change publisher mid-history: the early provider covers
//! everything strictly before the cutover, the late provider covers the
//! cutover onward. Consumers see a single continuous feed and never learn
//! there are two sources underneath.

use chrono::{Duration, NaiveDate};
use feedsync_core::{FetchError, FetchParams, FetchRange, Loader, Table};

/// Two loaders glued at a cutover date.
pub struct SpliceLoader {
    early: Box<dyn Loader>,
    late: Box<dyn Loader>,
    cutover: NaiveDate,
}

impl SpliceLoader {
    pub fn new(early: Box<dyn Loader>, late: Box<dyn Loader>, cutover: NaiveDate) -> Self {
        Self {
            early,
            late,
            cutover,
        }
    }

    pub fn cutover(&self) -> NaiveDate {
        self.cutover
    }
}

impl Loader for SpliceLoader {
    fn name(&self) -> &str {
        "splice"
    }

    fn fetch(&self, range: FetchRange, params: &FetchParams) -> Result<Table, FetchError> {
        let mut merged = Table::default();
        let mut last_error: Option<FetchError> = None;

        // Early provider: dates strictly before the cutover.
        let early_end = self.cutover - Duration::days(1);
        let early_end = match range.end {
            Some(end) => early_end.min(end),
            None => early_end,
        };
        if range.start.map_or(true, |s| s <= early_end) {
            let early_range = FetchRange {
                start: range.start,
                end: Some(early_end),
            };
            match self.early.fetch(early_range, params) {
                // Clipped so an overreaching early provider cannot shadow
                // the late one past the cutover.
                Ok(table) => merged = merged.merge(&table.between(None, Some(early_end))),
                Err(e) => last_error = Some(e),
            }
        }

        // Late provider: the cutover onward.
        if range.end.map_or(true, |e| e >= self.cutover) {
            let late_start = match range.start {
                Some(start) => start.max(self.cutover),
                None => self.cutover,
            };
            let late_range = FetchRange {
                start: Some(late_start),
                end: range.end,
            };
            match self.late.fetch(late_range, params) {
                Ok(table) => merged = merged.merge(&table.between(Some(self.cutover), None)),
                Err(e) => last_error = Some(e),
            }
        }

        // One side failing is tolerable as long as the other produced rows;
        // a feed with half its history beats no feed at all.
        match (merged.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            (_, _) => Ok(merged),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedsync_core::Row;
    use std::sync::{Arc, Mutex};

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    /// Stub that returns a fixed table clipped to the requested range and
    /// records what it was asked for.
    struct RangeStub {
        table: Table,
        seen: Arc<Mutex<Vec<FetchRange>>>,
    }

    impl RangeStub {
        fn new(table: Table) -> Self {
            Self {
                table,
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn seen_handle(&self) -> Arc<Mutex<Vec<FetchRange>>> {
            Arc::clone(&self.seen)
        }
    }

    impl Loader for RangeStub {
        fn name(&self) -> &str {
            "stub"
        }

        fn fetch(&self, range: FetchRange, _params: &FetchParams) -> Result<Table, FetchError> {
            self.seen.lock().unwrap().push(range);
            Ok(self.table.between(range.start, range.end))
        }
    }

    struct FailingStub;

    impl Loader for FailingStub {
        fn name(&self) -> &str {
            "failing"
        }

        fn fetch(&self, _range: FetchRange, _params: &FetchParams) -> Result<Table, FetchError> {
            Err(FetchError::NetworkUnreachable("down".into()))
        }
    }

    fn monthly(dates: &[&str], value: f64) -> Table {
        Table::from_rows(
            dates
                .iter()
                .map(|s| Row::new(d(s)).with("cpi", value))
                .collect(),
        )
    }

    #[test]
    fn spanning_range_uses_both_providers() {
        let early = RangeStub::new(monthly(&["2020-11-01", "2020-12-01"], 1.0));
        let late = RangeStub::new(monthly(&["2021-01-01", "2021-02-01"], 2.0));
        let splice = SpliceLoader::new(Box::new(early), Box::new(late), d("2021-01-01"));

        let table = splice
            .fetch(
                FetchRange::between(d("2020-11-01"), d("2021-02-28")),
                &FetchParams::new(),
            )
            .unwrap();

        assert_eq!(table.len(), 4);
        assert_eq!(table.row_at(d("2020-12-01")).unwrap().get("cpi"), Some(1.0));
        assert_eq!(table.row_at(d("2021-01-01")).unwrap().get("cpi"), Some(2.0));
    }

    #[test]
    fn range_before_cutover_skips_late_provider() {
        let early = RangeStub::new(monthly(&["2020-11-01"], 1.0));
        let late = RangeStub::new(monthly(&["2021-01-01"], 2.0));
        let splice = SpliceLoader::new(Box::new(early), Box::new(late), d("2021-01-01"));

        let table = splice
            .fetch(
                FetchRange::between(d("2020-01-01"), d("2020-12-31")),
                &FetchParams::new(),
            )
            .unwrap();

        assert_eq!(table.len(), 1);
        assert!(table.row_at(d("2021-01-01")).is_none());
    }

    #[test]
    fn range_after_cutover_skips_early_provider() {
        let early = RangeStub::new(monthly(&["2020-11-01"], 1.0));
        let early_seen = early.seen_handle();
        let late = RangeStub::new(monthly(&["2021-01-01", "2021-02-01"], 2.0));
        let splice = SpliceLoader::new(Box::new(early), Box::new(late), d("2021-01-01"));

        let table = splice
            .fetch(
                FetchRange::between(d("2021-01-01"), d("2021-12-31")),
                &FetchParams::new(),
            )
            .unwrap();

        assert_eq!(table.len(), 2);
        // The early provider was never consulted.
        assert!(early_seen.lock().unwrap().is_empty());
    }

    #[test]
    fn overreaching_early_provider_is_clipped_at_cutover() {
        // Early provider wrongly returns a row on the cutover date itself.
        let early = RangeStub::new(monthly(&["2020-12-01", "2021-01-01"], 1.0));
        let late = RangeStub::new(monthly(&["2021-01-01"], 2.0));
        let splice = SpliceLoader::new(Box::new(early), Box::new(late), d("2021-01-01"));

        let table = splice
            .fetch(
                FetchRange::between(d("2020-12-01"), d("2021-01-31")),
                &FetchParams::new(),
            )
            .unwrap();

        // The cutover date belongs to the late provider.
        assert_eq!(table.row_at(d("2021-01-01")).unwrap().get("cpi"), Some(2.0));
    }

    #[test]
    fn one_failing_side_still_serves_the_other() {
        let late = RangeStub::new(monthly(&["2021-01-01"], 2.0));
        let splice = SpliceLoader::new(Box::new(FailingStub), Box::new(late), d("2021-01-01"));

        let table = splice
            .fetch(
                FetchRange::between(d("2020-01-01"), d("2021-01-31")),
                &FetchParams::new(),
            )
            .unwrap();

        assert_eq!(table.len(), 1);
    }

    #[test]
    fn both_sides_failing_propagates_the_error() {
        let splice = SpliceLoader::new(
            Box::new(FailingStub),
            Box::new(FailingStub),
            d("2021-01-01"),
        );

        let result = splice.fetch(
            FetchRange::between(d("2020-01-01"), d("2021-01-31")),
            &FetchParams::new(),
        );

        assert!(result.is_err());
    }
}
