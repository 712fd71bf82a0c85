//! Text export of flat records.

use crate::analysis::TdevReport;
use crate::config::check_ident;
use crate::types::{Record, ValueKind};
use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use serde_json::{Map, Number, Value};

/// Export text format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Csv,
    Json,
    Tsv,
    Sql,
}

/// Single field of a flat row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Num(f64),
    Null,
}

impl Cell {
    fn from_opt(val: Option<f64>) -> Self {
        val.map_or(Cell::Null, Cell::Num)
    }

    /// Plain text rendering; absent values are empty.
    fn plain(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::Num(v) => v.to_string(),
            Cell::Null => String::new(),
        }
    }

    fn json(&self) -> Value {
        match self {
            Cell::Text(s) => Value::String(s.clone()),
            Cell::Num(v) => Number::from_f64(*v).map_or(Value::Null, Value::Number),
            Cell::Null => Value::Null,
        }
    }

    fn sql(&self) -> String {
        match self {
            Cell::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Cell::Num(v) if v.is_finite() => v.to_string(),
            Cell::Num(_) | Cell::Null => "NULL".to_string(),
        }
    }
}

/// Row with a fixed set of named columns.
pub trait Flat {
    fn columns() -> &'static [&'static str];
    fn cells(&self) -> Vec<Cell>;
}

impl Flat for Record {
    fn columns() -> &'static [&'static str] {
        &["timestamp", "source", "value", "weighted"]
    }

    fn cells(&self) -> Vec<Cell> {
        vec![
            Cell::Text(self.timestamp.clone()),
            Cell::Text(self.source.clone()),
            Cell::from_opt(self.value),
            Cell::from_opt(self.weighted),
        ]
    }
}

/// Single point of a stability curve, flattened with its station and kind.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveRow {
    pub station: String,
    pub kind: ValueKind,
    pub tau: f64,
    pub mdev: f64,
    pub tdev: f64,
}

impl Flat for CurveRow {
    fn columns() -> &'static [&'static str] {
        &["station", "kind", "tau", "mdev", "tdev"]
    }

    fn cells(&self) -> Vec<Cell> {
        vec![
            Cell::Text(self.station.clone()),
            Cell::Text(self.kind.to_string()),
            Cell::Num(self.tau),
            Cell::Num(self.mdev),
            Cell::Num(self.tdev),
        ]
    }
}

pub fn curve_rows(report: &TdevReport) -> Vec<CurveRow> {
    report
        .curves
        .iter()
        .flat_map(|curve| {
            curve.points.iter().map(|p| CurveRow {
                station: curve.station.clone(),
                kind: curve.kind,
                tau: p.tau,
                mdev: p.mdev,
                tdev: p.tdev,
            })
        })
        .collect()
}

/// Serialize rows into the given format.
///
/// # Errors
/// Returns an error if there are no rows or the table name is not a valid identifier.
pub fn export<T: Flat>(rows: &[T], format: Format, table_name: &str) -> Result<String> {
    if rows.is_empty() {
        bail!("nothing to export");
    }
    match format {
        Format::Csv => Ok(to_csv(rows)),
        Format::Tsv => Ok(to_tsv(rows)),
        Format::Json => to_json(rows),
        Format::Sql => to_sql(rows, table_name),
    }
}

fn to_csv<T: Flat>(rows: &[T]) -> String {
    let mut out = T::columns().join(",");
    out.push('\n');
    for row in rows {
        let fields: Vec<_> = row.cells().iter().map(|c| csv_field(&c.plain())).collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn to_tsv<T: Flat>(rows: &[T]) -> String {
    let mut out = T::columns().join("\t");
    out.push('\n');
    for row in rows {
        let fields: Vec<_> = row
            .cells()
            .iter()
            .map(|c| c.plain().replace(['\t', '\n', '\r'], " "))
            .collect();
        out.push_str(&fields.join("\t"));
        out.push('\n');
    }
    out
}

fn to_json<T: Flat>(rows: &[T]) -> Result<String> {
    let objects: Vec<_> = rows
        .iter()
        .map(|row| {
            let map: Map<String, Value> = T::columns()
                .iter()
                .zip(row.cells())
                .map(|(col, cell)| (col.to_string(), cell.json()))
                .collect();
            Value::Object(map)
        })
        .collect();
    let mut out = serde_json::to_string_pretty(&objects).context("failed to serialize rows")?;
    out.push('\n');
    Ok(out)
}

fn to_sql<T: Flat>(rows: &[T], table_name: &str) -> Result<String> {
    check_ident(table_name).context("invalid table name")?;
    let columns = T::columns().join(", ");
    let mut out = String::new();
    for row in rows {
        let vals: Vec<_> = row.cells().iter().map(Cell::sql).collect();
        out.push_str(&format!(
            "INSERT INTO {table_name} ({columns}) VALUES ({});\n",
            vals.join(", ")
        ));
    }
    Ok(out)
}
