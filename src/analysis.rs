use crate::config::{AnalysisConfig, check_num};
use crate::stats::{DevPoint, NoiseType, compute_curve, compute_log_slope, identify_noise_type};
use crate::types::{Record, ValueKind, read_records};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Difference series key: one curve is computed per station and value kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SeriesKey {
    station: String,
    kind: ValueKind,
}

/// Stability curve of a single station and value kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    pub station: String,
    pub kind: ValueKind,
    /// Number of samples the curve was computed from.
    pub n_samples: usize,
    /// Log-log slope of the modified deviation curve.
    pub slope: Option<f64>,
    pub noise_type: NoiseType,
    pub points: Vec<DevPoint>,
}

/// Stability curves of all stations with enough data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TdevReport {
    /// Sampling interval the curves were computed with (seconds).
    pub tau0: f64,
    pub curves: Vec<Curve>,
}

impl TdevReport {
    pub fn save<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).context("failed to serialize report")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).context("failed to deserialize report")
    }
}

/// Result of a stability analysis.
#[derive(Debug)]
pub enum Outcome {
    Report(TdevReport),
    /// Not a single series had enough valid samples.
    InsufficientData,
}

/// Link stability analyzer.
///
/// Groups record samples into one series per station and value kind,
/// then computes a MDEV/TDEV curve for every series with enough samples.
pub struct Analyzer {
    cfg: AnalysisConfig,
    kinds: Vec<ValueKind>,
    sources: BTreeSet<String>,
    series: BTreeMap<SeriesKey, Vec<f64>>,
}

impl Analyzer {
    pub fn new(cfg: AnalysisConfig, kinds: &[ValueKind]) -> Self {
        let mut kinds = kinds.to_vec();
        kinds.sort();
        kinds.dedup();
        Self {
            cfg,
            kinds,
            sources: BTreeSet::new(),
            series: BTreeMap::new(),
        }
    }

    /// Override the configured sampling interval.
    pub fn with_tau0(mut self, tau0: f64) -> Result<Self> {
        check_num(tau0, f64::MIN_POSITIVE..1e7).context("invalid sampling interval")?;
        self.cfg.tau0 = tau0;
        Ok(self)
    }

    /// Restrict the analysis to the given stations (all stations when empty).
    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let records = read_records(file).context("failed to read records")?;
        self.add_records(&records);
        Ok(())
    }

    pub fn add_records(&mut self, records: &[Record]) {
        for rec in records {
            if !self.sources.is_empty() && !self.sources.contains(&rec.source) {
                continue;
            }
            for &kind in &self.kinds {
                // Absent samples are dropped, never zero-filled.
                let Some(val) = rec.sample(kind) else {
                    continue;
                };
                self.series
                    .entry(SeriesKey {
                        station: rec.source.clone(),
                        kind,
                    })
                    .or_default()
                    .push(val);
            }
        }
    }

    /// Total number of valid samples collected so far.
    pub fn n_samples(&self) -> usize {
        self.series.values().map(Vec::len).sum()
    }

    pub fn compute(&self) -> Result<Outcome> {
        let min_samples = self.cfg.min_samples;
        let n_samples = self.n_samples();
        if n_samples < min_samples {
            log::warn!("insufficient data: {n_samples} valid samples, at least {min_samples} required");
            return Ok(Outcome::InsufficientData);
        }

        let mut curves = Vec::new();
        for (key, vals) in &self.series {
            if vals.len() < min_samples {
                log::warn!(
                    "skipped {} ({}): {} valid samples, at least {min_samples} required",
                    key.station,
                    key.kind,
                    vals.len()
                );
                continue;
            }

            let vals = if vals.len() > self.cfg.max_points {
                log::warn!(
                    "capped {} ({}) to the last {} of {} samples",
                    key.station,
                    key.kind,
                    self.cfg.max_points,
                    vals.len()
                );
                &vals[vals.len() - self.cfg.max_points..]
            } else {
                &vals[..]
            };

            let points = compute_curve(vals, self.cfg.tau0, self.cfg.step_factor).with_context(
                || format!("failed to compute curve of {} ({})", key.station, key.kind),
            )?;
            let slope = compute_log_slope(&points);
            let noise_type = identify_noise_type(slope);
            log::debug!(
                "computed {} ({}): {} points, slope {slope:?}, {noise_type:?}",
                key.station,
                key.kind,
                points.len()
            );

            curves.push(Curve {
                station: key.station.clone(),
                kind: key.kind,
                n_samples: vals.len(),
                slope,
                noise_type,
                points,
            });
        }

        if curves.is_empty() {
            log::warn!("insufficient data: no station has {min_samples} valid samples");
            return Ok(Outcome::InsufficientData);
        }

        Ok(Outcome::Report(TdevReport {
            tau0: self.cfg.tau0,
            curves,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source: &str, value: Option<f64>, weighted: Option<f64>) -> Record {
        Record {
            timestamp: String::new(),
            source: source.to_string(),
            value,
            weighted,
        }
    }

    fn series(source: &str, vals: &[f64]) -> Vec<Record> {
        vals.iter()
            .map(|&val| record(source, Some(val), None))
            .collect()
    }

    fn report(outcome: Outcome) -> TdevReport {
        match outcome {
            Outcome::Report(report) => report,
            Outcome::InsufficientData => panic!("unexpected insufficient data"),
        }
    }

    fn ramp(n_vals: usize) -> Vec<f64> {
        (0..n_vals).map(|i| ((i * 7) % 5) as f64 + 0.5 * i as f64).collect()
    }

    #[test]
    fn nine_samples_are_insufficient() {
        let mut analyzer = Analyzer::new(AnalysisConfig::default(), &[ValueKind::Standard]);
        analyzer.add_records(&series("S1", &ramp(9)));
        assert!(matches!(
            analyzer.compute().unwrap(),
            Outcome::InsufficientData
        ));
    }

    #[test]
    fn ten_samples_are_sufficient() {
        let mut analyzer = Analyzer::new(AnalysisConfig::default(), &[ValueKind::Standard]);
        analyzer.add_records(&series("S1", &ramp(10)));
        let report = report(analyzer.compute().unwrap());
        assert_eq!(report.curves.len(), 1);
        assert!(!report.curves[0].points.is_empty());
        assert_eq!(report.curves[0].points[0].tau, 960.0);
    }

    #[test]
    fn short_stations_are_skipped() {
        let mut analyzer = Analyzer::new(AnalysisConfig::default(), &[ValueKind::Standard]);
        analyzer.add_records(&series("LONG", &ramp(40)));
        analyzer.add_records(&series("SHORT", &ramp(5)));
        let report = report(analyzer.compute().unwrap());
        let stations: Vec<_> = report.curves.iter().map(|c| c.station.as_str()).collect();
        assert_eq!(stations, vec!["LONG"]);
    }

    #[test]
    fn split_short_stations_are_insufficient() {
        let mut analyzer = Analyzer::new(AnalysisConfig::default(), &[ValueKind::Standard]);
        analyzer.add_records(&series("A", &ramp(6)));
        analyzer.add_records(&series("B", &ramp(6)));
        assert_eq!(analyzer.n_samples(), 12);
        assert!(matches!(
            analyzer.compute().unwrap(),
            Outcome::InsufficientData
        ));
    }

    #[test]
    fn identical_stations_give_identical_curves() {
        let vals = ramp(50);
        let mut analyzer = Analyzer::new(AnalysisConfig::default(), &[ValueKind::Standard]);
        // Interleave the stations to check grouping does not depend on order.
        for (a, b) in series("B", &vals).into_iter().zip(series("A", &vals)) {
            analyzer.add_records(&[a, b]);
        }
        let report = report(analyzer.compute().unwrap());
        assert_eq!(report.curves.len(), 2);
        assert_eq!(report.curves[0].station, "A");
        assert_eq!(report.curves[1].station, "B");
        assert_eq!(report.curves[0].points, report.curves[1].points);
    }

    #[test]
    fn absent_samples_are_excluded() {
        let vals = ramp(30);
        let mut clean = Analyzer::new(AnalysisConfig::default(), &[ValueKind::Standard]);
        clean.add_records(&series("S", &vals));

        let mut gappy = Analyzer::new(AnalysisConfig::default(), &[ValueKind::Standard]);
        let mut records = Vec::new();
        for (i, rec) in series("S", &vals).into_iter().enumerate() {
            records.push(rec);
            if i % 4 == 0 {
                records.push(record("S", None, Some(1.0)));
            }
        }
        gappy.add_records(&records);

        let clean = report(clean.compute().unwrap());
        let gappy = report(gappy.compute().unwrap());
        assert_eq!(clean.curves[0].n_samples, 30);
        assert_eq!(clean.curves, gappy.curves);
    }

    #[test]
    fn one_curve_per_kind() {
        let mut analyzer = Analyzer::new(
            AnalysisConfig::default(),
            &[ValueKind::Weighted, ValueKind::Standard, ValueKind::Weighted],
        );
        let records: Vec<_> = ramp(20)
            .into_iter()
            .map(|val| record("S", Some(val), Some(2.0 * val)))
            .collect();
        analyzer.add_records(&records);
        let report = report(analyzer.compute().unwrap());
        let kinds: Vec<_> = report.curves.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![ValueKind::Standard, ValueKind::Weighted]);
        for (std_p, wgt_p) in report.curves[0].points.iter().zip(&report.curves[1].points) {
            assert!((wgt_p.mdev - 2.0 * std_p.mdev).abs() < 1e-9);
        }
    }

    #[test]
    fn source_filter_and_tau0_override() {
        let mut analyzer = Analyzer::new(AnalysisConfig::default(), &[ValueKind::Standard])
            .with_sources(["B"])
            .with_tau0(30.0)
            .unwrap();
        analyzer.add_records(&series("A", &ramp(20)));
        analyzer.add_records(&series("B", &ramp(20)));
        let report = report(analyzer.compute().unwrap());
        assert_eq!(report.tau0, 30.0);
        assert_eq!(report.curves.len(), 1);
        assert_eq!(report.curves[0].station, "B");
        assert_eq!(report.curves[0].points[0].tau, 30.0);

        assert!(Analyzer::new(AnalysisConfig::default(), &[]).with_tau0(-1.0).is_err());
    }

    #[test]
    fn long_series_are_capped() {
        let cfg = AnalysisConfig {
            max_points: 12,
            ..AnalysisConfig::default()
        };
        let vals = ramp(40);
        let mut capped = Analyzer::new(cfg, &[ValueKind::Standard]);
        capped.add_records(&series("S", &vals));
        let mut tail = Analyzer::new(AnalysisConfig::default(), &[ValueKind::Standard]);
        tail.add_records(&series("S", &vals[28..]));

        let capped = report(capped.compute().unwrap());
        let tail = report(tail.compute().unwrap());
        assert_eq!(capped.curves[0].n_samples, 12);
        assert_eq!(capped.curves, tail.curves);
    }
}
