use crate::analysis::{Analyzer, Outcome, TdevReport};
use crate::config::Config;
use crate::export::{Format, curve_rows, export};
use crate::fetch::{Fetcher, Query, parse_records};
use crate::types::{Record, ValueKind, read_records, write_records};
use crate::view::ViewState;
use anyhow::{Context, Result, bail};
use glob::glob;
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

/// What an export writes out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportSource {
    Records,
    Tdev,
}

pub struct Manager {
    data_dir: PathBuf,
    cfg: Config,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();

        let cfg =
            Config::from_file(data_dir.join("config.toml")).context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        Ok(Self { data_dir, cfg })
    }

    pub fn import_records<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let body = fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        let records = parse_records(&body).context("failed to parse records")?;
        self.store_records(&records)
    }

    pub fn fetch_records(&self, query: &Query) -> Result<()> {
        let fetcher = Fetcher::new(&self.cfg.api).context("failed to construct fetcher")?;
        let records = fetcher.fetch(query).context("failed to fetch records")?;
        self.store_records(&records)
    }

    fn store_records(&self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            log::warn!("no records to store");
            return Ok(());
        }
        let file_idx = self
            .next_records_idx()
            .context("failed to number records file")?;
        let file = self.records_file(file_idx);
        write_records(&file, records).with_context(|| format!("failed to write {file:?}"))?;
        log::info!("stored {} records in {file:?}", records.len());
        Ok(())
    }

    /// Compute the stability curves and save them to the results file.
    ///
    /// Any previous results file is removed first, so a failed or
    /// insufficient computation never leaves stale curves behind.
    pub fn compute_tdev(
        &self,
        kinds: &[ValueKind],
        sources: &[String],
        tau0: Option<f64>,
        latest: bool,
    ) -> Result<()> {
        self.remove_results().context("failed to remove previous results")?;

        let mut analyzer =
            Analyzer::new(self.cfg.analysis.clone(), kinds).with_sources(sources.iter().cloned());
        if let Some(tau0) = tau0 {
            analyzer = analyzer.with_tau0(tau0)?;
        }

        for file in self.selected_files(latest)? {
            analyzer
                .add_file(&file)
                .with_context(|| format!("failed to add {file:?}"))?;
        }

        match analyzer.compute().context("calculation failed")? {
            Outcome::InsufficientData => {
                log::warn!("insufficient data, no curves computed");
            }
            Outcome::Report(report) => {
                let file = self.results_file();
                report
                    .save(&file)
                    .with_context(|| format!("failed to save {file:?}"))?;
                log::info!("saved {} curves to {file:?}", report.curves.len());
            }
        }

        Ok(())
    }

    pub fn export(
        &self,
        what: ExportSource,
        format: Format,
        output: Option<&Path>,
        latest: bool,
    ) -> Result<()> {
        let table_name = &self.cfg.export.table_name;
        let text = match what {
            ExportSource::Records => {
                let records = self.load_records(latest)?;
                export(&records, format, table_name)
            }
            ExportSource::Tdev => {
                let file = self.results_file();
                if !file.exists() {
                    bail!("no results to export, run the tdev command first");
                }
                let report = TdevReport::load(&file)
                    .with_context(|| format!("failed to load {file:?}"))?;
                export(&curve_rows(&report), format, table_name)
            }
        }
        .context("failed to export")?;

        match output {
            Some(file) => {
                fs::write(file, text).with_context(|| format!("failed to write {file:?}"))?;
                log::info!("exported to {file:?}");
            }
            None => {
                io::stdout()
                    .write_all(text.as_bytes())
                    .context("failed to write to stdout")?;
            }
        }
        Ok(())
    }

    pub fn view(&self, state: &ViewState, latest: bool) -> Result<()> {
        let records = self.load_records(latest)?;
        let page = state.apply(&records).context("failed to apply view")?;
        io::stdout()
            .write_all(page.render().as_bytes())
            .context("failed to write to stdout")?;
        Ok(())
    }

    pub fn clean(&self) -> Result<()> {
        for file in self.records_files()? {
            fs::remove_file(&file).with_context(|| format!("failed to remove {file:?}"))?;
            log::info!("removed {file:?}");
        }
        self.remove_results()
    }

    fn load_records(&self, latest: bool) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for file in self.selected_files(latest)? {
            let mut file_records =
                read_records(&file).with_context(|| format!("failed to read {file:?}"))?;
            records.append(&mut file_records);
        }
        Ok(records)
    }

    fn selected_files(&self, latest: bool) -> Result<Vec<PathBuf>> {
        let mut files = self.records_files()?;
        if files.is_empty() {
            bail!("no records files in {:?}, import or fetch first", self.data_dir);
        }
        if latest {
            files = files.pop().into_iter().collect();
        }
        Ok(files)
    }

    fn remove_results(&self) -> Result<()> {
        let file = self.results_file();
        if file.exists() {
            fs::remove_file(&file).with_context(|| format!("failed to remove {file:?}"))?;
            log::info!("removed {file:?}");
        }
        Ok(())
    }

    /// Numbered records files, in increasing index order.
    fn indexed_records_files(&self) -> Result<Vec<(usize, PathBuf)>> {
        let pattern = self.data_dir.join("records-*.msgpack");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let mut files: Vec<_> = glob(pattern)
            .context("failed to glob records files")?
            .filter_map(Result::ok)
            .filter(|p| p.is_file())
            .filter_map(|p| records_file_idx(&p).map(|idx| (idx, p)))
            .collect();
        files.sort_by_key(|(idx, _)| *idx);
        Ok(files)
    }

    fn records_files(&self) -> Result<Vec<PathBuf>> {
        let files = self.indexed_records_files()?;
        Ok(files.into_iter().map(|(_, p)| p).collect())
    }

    /// Index following the highest existing one, so earlier files are never reused.
    fn next_records_idx(&self) -> Result<usize> {
        let last = self.indexed_records_files()?.last().map(|(idx, _)| *idx);
        match last {
            None => Ok(0),
            Some(idx) => idx.checked_add(1).context("records file index overflow"),
        }
    }

    fn records_file(&self, file_idx: usize) -> PathBuf {
        self.data_dir.join(format!("records-{file_idx:04}.msgpack"))
    }

    fn results_file(&self) -> PathBuf {
        self.data_dir.join("results.json")
    }
}

/// Parse the index of a `records-NNNN.msgpack` file name.
fn records_file_idx(file: &Path) -> Option<usize> {
    let stem = file.file_stem()?.to_str()?;
    let digits = stem.strip_prefix("records-")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
