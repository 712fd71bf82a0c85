use crate::config::check_num;
use crate::types::Record;
use anyhow::{Context, Result};
use clap::ValueEnum;
use std::cmp::Ordering;

/// Sortable record column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Column {
    Timestamp,
    Source,
    Value,
    Weighted,
}

/// Table view state: search filter, sort order and page.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub search: Option<String>,
    pub sort: Option<Column>,
    pub desc: bool,
    /// Page number, starting at 1.
    pub page: usize,
    pub page_size: usize,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            search: None,
            sort: None,
            desc: false,
            page: 1,
            page_size: 20,
        }
    }
}

/// Single page of filtered and sorted records.
#[derive(Debug)]
pub struct Page<'a> {
    pub rows: Vec<&'a Record>,
    pub page: usize,
    pub n_pages: usize,
    /// Number of records matching the search filter.
    pub n_matches: usize,
}

impl ViewState {
    /// Select the rows of the current page.
    pub fn apply<'a>(&self, records: &'a [Record]) -> Result<Page<'a>> {
        check_num(self.page, 1..).context("invalid page number")?;
        check_num(self.page_size, 1..=1000).context("invalid page size")?;

        let needle = self
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);
        let mut rows: Vec<_> = records
            .iter()
            .filter(|rec| needle.as_deref().is_none_or(|n| matches(rec, n)))
            .collect();

        if let Some(col) = self.sort {
            rows.sort_by(|a, b| compare(a, b, col, self.desc));
        }

        let n_matches = rows.len();
        let n_pages = n_matches.div_ceil(self.page_size);
        let start = (self.page - 1).saturating_mul(self.page_size);
        let rows = rows.into_iter().skip(start).take(self.page_size).collect();

        let page = Page {
            rows,
            page: self.page,
            n_pages,
            n_matches,
        };
        if page.is_past_end() {
            log::warn!("page {} is past the last page {n_pages}", self.page);
        }
        Ok(page)
    }
}

fn matches(rec: &Record, needle: &str) -> bool {
    rec.timestamp.to_lowercase().contains(needle) || rec.source.to_lowercase().contains(needle)
}

fn compare(a: &Record, b: &Record, col: Column, desc: bool) -> Ordering {
    let ord = match col {
        Column::Timestamp => a.timestamp.cmp(&b.timestamp),
        Column::Source => a.source.cmp(&b.source),
        Column::Value => return compare_samples(a.value, b.value, desc),
        Column::Weighted => return compare_samples(a.weighted, b.weighted, desc),
    };
    if desc { ord.reverse() } else { ord }
}

/// Absent samples sort last in either direction.
fn compare_samples(a: Option<f64>, b: Option<f64>, desc: bool) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => {
            let ord = a.total_cmp(&b);
            if desc { ord.reverse() } else { ord }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl Page<'_> {
    /// Whether the requested page lies after the last one (always true without matches).
    pub fn is_past_end(&self) -> bool {
        self.page > self.n_pages
    }

    /// Render the page as a fixed-width text table.
    pub fn render(&self) -> String {
        let header = ["timestamp", "source", "value", "weighted"];
        let cells: Vec<[String; 4]> = self
            .rows
            .iter()
            .map(|rec| {
                [
                    rec.timestamp.clone(),
                    rec.source.clone(),
                    fmt_sample(rec.value),
                    fmt_sample(rec.weighted),
                ]
            })
            .collect();

        let mut widths = header.map(str::len);
        for row in &cells {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let mut lines = vec![fmt_row(&header, &widths)];
        lines.extend(cells.iter().map(|row| fmt_row(row, &widths)));
        lines.push(format!(
            "page {} of {} ({} records)",
            self.page, self.n_pages, self.n_matches
        ));

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

fn fmt_row<S: AsRef<str>>(row: &[S; 4], widths: &[usize; 4]) -> String {
    format!(
        "{:<w0$}  {:<w1$}  {:>w2$}  {:>w3$}",
        row[0].as_ref(),
        row[1].as_ref(),
        row[2].as_ref(),
        row[3].as_ref(),
        w0 = widths[0],
        w1 = widths[1],
        w2 = widths[2],
        w3 = widths[3]
    )
}

fn fmt_sample(val: Option<f64>) -> String {
    val.map_or_else(|| "-".to_string(), |v| format!("{v:.3}"))
}
