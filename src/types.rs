//! Time-transfer data types.

use anyhow::{Context, Result};
use rmp_serde::{decode, encode};
use serde::{Deserialize, Deserializer, Serialize};
use serde_value::Value;
use std::{
    fmt,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Common-view time-transfer record of a single station at a single epoch.
///
/// Sample fields hold `None` when the source value is missing or not a finite number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Epoch label (MJD session or date-time string), kept verbatim.
    #[serde(alias = "sttime", alias = "date_time")]
    pub timestamp: String,

    /// Station or source identifier.
    #[serde(alias = "station")]
    pub source: String,

    /// Standard time difference (ns).
    #[serde(default, alias = "difference", deserialize_with = "lenient_sample")]
    pub value: Option<f64>,

    /// Weighted time difference (ns).
    #[serde(
        default,
        alias = "weighted_difference",
        deserialize_with = "lenient_sample"
    )]
    pub weighted: Option<f64>,
}

impl Record {
    /// Get the sample of the given kind, if valid.
    pub fn sample(&self, kind: ValueKind) -> Option<f64> {
        match kind {
            ValueKind::Standard => self.value,
            ValueKind::Weighted => self.weighted,
        }
    }
}

/// Load records from a MessagePack-encoded file.
pub fn read_records<P: AsRef<Path>>(file: P) -> Result<Vec<Record>> {
    let file = file.as_ref();
    let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
    let mut reader = BufReader::new(file);
    decode::from_read(&mut reader).context("failed to deserialize records")
}

/// Save records to a MessagePack-encoded file.
pub fn write_records<P: AsRef<Path>>(file: P, records: &[Record]) -> Result<()> {
    let file = file.as_ref();
    let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
    let mut writer = BufWriter::new(file);
    encode::write_named(&mut writer, records).context("failed to serialize records")?;
    writer.flush().context("failed to flush writer stream")?;
    Ok(())
}

/// Kind of difference value a series is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Standard,
    Weighted,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Standard => write!(f, "standard"),
            ValueKind::Weighted => write!(f, "weighted"),
        }
    }
}

/// Accept numbers and numeric strings as samples; anything else is absent.
fn lenient_sample<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(sample_from_value(&value))
}

fn sample_from_value(value: &Value) -> Option<f64> {
    let num = match value {
        Value::F64(v) => *v,
        Value::F32(v) => *v as f64,
        Value::I64(v) => *v as f64,
        Value::I32(v) => *v as f64,
        Value::I16(v) => *v as f64,
        Value::I8(v) => *v as f64,
        Value::U64(v) => *v as f64,
        Value::U32(v) => *v as f64,
        Value::U16(v) => *v as f64,
        Value::U8(v) => *v as f64,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Option(Some(inner)) | Value::Newtype(inner) => return sample_from_value(inner),
        _ => return None,
    };
    num.is_finite().then_some(num)
}
