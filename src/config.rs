use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Tool configuration.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// REST API parameters.
    pub api: ApiConfig,
    /// Link stability analysis parameters.
    pub analysis: AnalysisConfig,
    /// Export parameters.
    pub export: ExportConfig,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    /// Base URL of the REST API (required for fetching).
    pub base_url: Option<String>,
    /// Path of the difference data endpoint, relative to the base URL.
    pub endpoint: String,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            endpoint: "data/difference".to_string(),
            token: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Nominal sampling interval between consecutive samples (seconds).
    pub tau0: f64,
    /// Minimum number of valid samples per series.
    pub min_samples: usize,
    /// Maximum number of samples per series (most recent ones are kept).
    pub max_points: usize,
    /// Growth factor of the averaging factor grid.
    pub step_factor: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            tau0: 960.0,
            min_samples: 10,
            max_points: 10_000,
            step_factor: 1.4,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    /// Table name used by SQL insert exports.
    pub table_name: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            table_name: "time_transfer".to_string(),
        }
    }
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be TOML-encoded. Missing sections and keys take their
    /// default values. Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        Self::from_toml(&contents)
    }

    /// Parse and validate a [`Config`] from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if let Some(base_url) = &self.api.base_url {
            check_url(base_url).context("invalid API base URL")?;
        }
        check_num(self.api.timeout_secs, 1..=600).context("invalid request timeout")?;

        let analysis = &self.analysis;
        check_num(analysis.tau0, f64::MIN_POSITIVE..1e7).context("invalid sampling interval")?;
        check_num(analysis.min_samples, 10..=1_000_000)
            .context("invalid minimum number of samples")?;
        check_num(analysis.max_points, analysis.min_samples..=1_000_000)
            .context("invalid maximum number of points")?;
        check_num(analysis.step_factor, 1.000_001..10.0).context("invalid step factor")?;

        check_ident(&self.export.table_name).context("invalid table name")?;

        Ok(())
    }
}

pub fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

fn check_url(url: &str) -> Result<()> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("URL must start with http:// or https://, but is {url:?}");
    }
    Ok(())
}

pub fn check_ident(ident: &str) -> Result<()> {
    let mut chars = ident.chars();
    let valid_first = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_first || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("identifier must match [A-Za-z_][A-Za-z0-9_]*, but is {ident:?}");
    }
    Ok(())
}
