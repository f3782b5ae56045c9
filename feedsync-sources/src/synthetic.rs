//! Deterministic synthetic series for offline use.
//!
//! Produces a random walk seeded from the series name, so the same feed
//! always gets the same data. Clearly fake: meant for demos and tests, not
//! anything downstream of real analysis.

use chrono::{Datelike, Duration, NaiveDate};
use feedsync_core::{FetchError, FetchParams, FetchRange, Loader, Row, Table};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// How far back an open-ended range reaches.
const DEFAULT_SPAN_DAYS: i64 = 365;

/// Random-walk price loader. Optional param: `series` (seed name, defaults
/// to "synthetic"). Emits columns `close`, `volume`.
pub struct SyntheticLoader;

impl SyntheticLoader {
    fn generate(series: &str, start: NaiveDate, end: NaiveDate) -> Table {
        // Deterministic seed from the series name.
        let seed: [u8; 32] = *blake3::hash(series.as_bytes()).as_bytes();
        let mut rng = StdRng::from_seed(seed);

        let mut rows = Vec::new();
        let mut price = 100.0_f64;
        let mut current = start;

        while current <= end {
            // Skip weekends (simple market-calendar heuristic).
            let weekday = current.weekday();
            if weekday == chrono::Weekday::Sat || weekday == chrono::Weekday::Sun {
                current += Duration::days(1);
                continue;
            }

            let daily_return: f64 = rng.gen_range(-0.03..0.03);
            price *= 1.0 + daily_return;
            let volume = rng.gen_range(500_000..5_000_000u64);

            rows.push(
                Row::new(current)
                    .with("close", price)
                    .with("volume", volume as f64),
            );
            current += Duration::days(1);
        }

        Table::from_rows(rows)
    }
}

impl Loader for SyntheticLoader {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch(&self, range: FetchRange, params: &FetchParams) -> Result<Table, FetchError> {
        let series = params
            .get("series")
            .map(String::as_str)
            .unwrap_or("synthetic");

        let end = range
            .end
            .unwrap_or_else(|| chrono::Local::now().date_naive());
        let start = range
            .start
            .unwrap_or_else(|| end - Duration::days(DEFAULT_SPAN_DAYS));
        if start > end {
            return Ok(Table::default());
        }

        Ok(Self::generate(series, start, end))
    }
}
