//! FRED macro series loader.
//!
//! Fetches observations from the St. Louis Fed API (JSON). One loader
//! instance serves any series; the series id comes in through params, so a
//! composite feed can reuse a single API key across its members.

use chrono::NaiveDate;
use feedsync_core::{parse_day, FetchError, FetchParams, FetchRange, Loader, Row, Table};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.stlouisfed.org/fred";

#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    observations: Vec<Observation>,
}

#[derive(Debug, Deserialize)]
struct Observation {
    date: String,
    value: String,
}

/// Macro observations loader backed by the FRED API.
///
/// Required param: `series_id`. Optional param: `column` (defaults to the
/// lowercased series id). Emits one value column.
pub struct FredLoader {
    client: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
}

impl FredLoader {
    pub fn new(api_key: impl Into<String>) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FetchError::Other(format!("build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point at a different endpoint (test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Convert the observation list into rows under `column`.
    ///
    /// FRED publishes "." for dates with no value; those and anything else
    /// non-numeric are dropped rather than failing the whole series.
    fn rows_from_observations(column: &str, observations: Vec<Observation>) -> Table {
        let mut rows = Vec::with_capacity(observations.len());
        for obs in observations {
            let Some(date) = parse_day(&obs.date) else {
                continue;
            };
            let Ok(value) = obs.value.trim().parse::<f64>() else {
                continue;
            };
            rows.push(Row::new(date).with(column, value));
        }
        Table::from_rows(rows)
    }
}

impl Loader for FredLoader {
    fn name(&self) -> &str {
        "fred"
    }

    fn fetch(&self, range: FetchRange, params: &FetchParams) -> Result<Table, FetchError> {
        let series_id = params
            .get("series_id")
            .ok_or_else(|| FetchError::InvalidRequest("missing 'series_id' param".into()))?;
        let column = params
            .get("column")
            .cloned()
            .unwrap_or_else(|| series_id.to_lowercase());

        // Open-ended macro requests reach back to 2010.
        let start = range
            .start
            .unwrap_or_else(|| NaiveDate::from_ymd_opt(2010, 1, 1).unwrap());
        let end = range
            .end
            .unwrap_or_else(|| chrono::Local::now().date_naive());
        if start > end {
            return Ok(Table::default());
        }

        let url = format!(
            "{}/series/observations?series_id={series_id}\
             &observation_start={start}&observation_end={end}\
             &api_key={}&file_type=json",
            self.base_url, self.api_key
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| FetchError::NetworkUnreachable(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::SeriesNotFound {
                series: series_id.clone(),
            });
        }
        if !resp.status().is_success() {
            return Err(FetchError::Other(format!(
                "HTTP {} for {series_id}",
                resp.status()
            )));
        }

        let parsed: ObservationsResponse = resp.json().map_err(|e| {
            FetchError::ResponseFormatChanged(format!("failed to parse response for {series_id}: {e}"))
        })?;

        Ok(Self::rows_from_observations(&column, parsed.observations))
    }
}
