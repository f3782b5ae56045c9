//! Date-indexed numeric tables.
//!
//! A `Table` is the unit of exchange between loaders, the stores, and the
//! sync engine: rows keyed by calendar date (day precision, no timezone),
//! each carrying a sparse set of named numeric values. Construction always
//! normalizes: rows come out sorted ascending with unique dates, so merges
//! downstream compare equal dates correctly regardless of source quirks.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, BTreeSet};

/// One observation: a date plus named numeric fields.
///
/// Fields are sparse: a macro composite may have values for some countries
/// and not others on a given month.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub date: NaiveDate,
    pub values: BTreeMap<String, f64>,
}

impl Row {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            values: BTreeMap::new(),
        }
    }

    /// Builder-style field setter, used heavily by loaders and tests.
    pub fn with(mut self, column: &str, value: f64) -> Self {
        self.values.insert(column.to_string(), value);
        self
    }

    pub fn get(&self, column: &str) -> Option<f64> {
        self.values.get(column).copied()
    }
}

/// An ordered, date-unique table of rows.
///
/// Invariant: `rows` is sorted ascending by date and contains no duplicate
/// dates. Every constructor enforces this; there is no way to build a
/// malformed `Table` from outside this module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    rows: Vec<Row>,
}

impl Table {
    /// Build a table from arbitrary rows: sort ascending, dedup by date.
    ///
    /// On duplicate dates the LAST occurrence in input order wins, which is
    /// what makes `merge` last-writer-wins.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut by_date: BTreeMap<NaiveDate, Row> = BTreeMap::new();
        for row in rows {
            by_date.insert(row.date, row);
        }
        Self {
            rows: by_date.into_values().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn min_date(&self) -> Option<NaiveDate> {
        self.rows.first().map(|r| r.date)
    }

    pub fn max_date(&self) -> Option<NaiveDate> {
        self.rows.last().map(|r| r.date)
    }

    pub fn row_at(&self, date: NaiveDate) -> Option<&Row> {
        self.rows
            .binary_search_by_key(&date, |r| r.date)
            .ok()
            .map(|i| &self.rows[i])
    }

    /// Union of column names across all rows, sorted.
    pub fn columns(&self) -> Vec<String> {
        let mut cols: BTreeSet<&str> = BTreeSet::new();
        for row in &self.rows {
            for name in row.values.keys() {
                cols.insert(name);
            }
        }
        cols.into_iter().map(String::from).collect()
    }

    /// Merge `newer` into this table: on a date present in both, the row
    /// from `newer` replaces ours entirely. Result is sorted and date-unique.
    pub fn merge(&self, newer: &Table) -> Table {
        let mut combined = self.rows.clone();
        combined.extend(newer.rows.iter().cloned());
        Table::from_rows(combined)
    }

    /// Rows with `start <= date <= end` (either bound optional).
    pub fn between(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Table {
        let rows = self
            .rows
            .iter()
            .filter(|r| start.map_or(true, |s| r.date >= s) && end.map_or(true, |e| r.date <= e))
            .cloned()
            .collect();
        Table { rows }
    }
}

/// Parse a date string to day precision, stripping any time-of-day and
/// timezone component.
///
/// Sources disagree on formats: plain dates, naive datetimes, and
/// RFC 3339 timestamps with offsets all occur in the wild.
pub fn parse_day(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if let Ok(d) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.date());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    None
}
