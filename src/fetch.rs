//! REST API access for difference data.

use crate::config::ApiConfig;
use crate::types::Record;
use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Modified Julian Date epoch (MJD 0).
const MJD_EPOCH: (i32, u32, u32) = (1858, 11, 17);

/// Convert a calendar date to its Modified Julian Date.
pub fn mjd_from_date(date: NaiveDate) -> Result<i64> {
    let (year, month, day) = MJD_EPOCH;
    let epoch = NaiveDate::from_ymd_opt(year, month, day).context("invalid MJD epoch")?;
    Ok((date - epoch).num_days())
}

/// Parse a `YYYY-MM-DD` date into its Modified Julian Date.
pub fn parse_mjd(date: &str) -> Result<i64> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .with_context(|| format!("failed to parse date {date:?}, expected YYYY-MM-DD"))?;
    mjd_from_date(date)
}

/// Query parameters of a difference data request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub start_mjd: Option<i64>,
    pub end_mjd: Option<i64>,
    pub sources: Vec<String>,
    pub page: Option<usize>,
    pub size: Option<usize>,
}

impl Query {
    /// Build the query string pairs, skipping unset parameters.
    ///
    /// # Errors
    /// Returns an error if the MJD range is reversed.
    pub fn to_pairs(&self) -> Result<Vec<(&'static str, String)>> {
        if let (Some(start), Some(end)) = (self.start_mjd, self.end_mjd) {
            if start > end {
                bail!("start MJD {start} is after end MJD {end}");
            }
        }

        let mut pairs = Vec::new();
        if let Some(start) = self.start_mjd {
            pairs.push(("startMjd", start.to_string()));
        }
        if let Some(end) = self.end_mjd {
            pairs.push(("endMjd", end.to_string()));
        }
        for source in &self.sources {
            let source = source.trim();
            if !source.is_empty() {
                pairs.push(("source", source.to_string()));
            }
        }
        if let Some(page) = self.page {
            pairs.push(("page", page.to_string()));
        }
        if let Some(size) = self.size {
            pairs.push(("size", size.to_string()));
        }
        Ok(pairs)
    }
}

/// Decode a response or import body into records.
///
/// The body is either a bare array or a paginated wrapper holding the array
/// under `content` or `data`.
pub fn parse_records(body: &str) -> Result<Vec<Record>> {
    let payload: Value = serde_json::from_str(body).context("failed to parse JSON")?;
    let items = match payload {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("content").or_else(|| map.remove("data")) {
            Some(Value::Array(items)) => items,
            Some(_) => bail!("records field must be an array"),
            None => bail!("object has neither a content nor a data array"),
        },
        _ => bail!("expected an array of records or an object wrapping one"),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| {
            Record::deserialize(item).with_context(|| format!("invalid record {idx}"))
        })
        .collect()
}

/// Blocking client of the difference data endpoint.
pub struct Fetcher {
    client: Client,
    url: String,
    token: Option<String>,
}

impl Fetcher {
    pub fn new(cfg: &ApiConfig) -> Result<Self> {
        let base_url = cfg
            .base_url
            .as_deref()
            .context("API base URL is not configured")?;
        let url = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            cfg.endpoint.trim_start_matches('/')
        );

        let client = Client::builder()
            .user_agent(concat!("timetrace/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            url,
            token: cfg.token.clone(),
        })
    }

    pub fn fetch(&self, query: &Query) -> Result<Vec<Record>> {
        let pairs = query.to_pairs().context("invalid query")?;
        log::info!("requesting {} with {pairs:?}", self.url);

        let mut request = self.client.get(&self.url).query(&pairs);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .with_context(|| format!("failed to request {}", self.url))?;
        let status = response.status();
        if !status.is_success() {
            bail!("request to {} failed with status {status}", self.url);
        }

        let body = response.text().context("failed to read response body")?;
        let records = parse_records(&body).context("failed to decode response")?;
        log::info!("received {} records", records.len());
        Ok(records)
    }
}
