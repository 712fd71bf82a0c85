mod analysis;
mod config;
mod export;
mod fetch;
mod manager;
mod stats;
mod types;
mod view;

use crate::export::Format;
use crate::fetch::{Query, parse_mjd};
use crate::manager::{ExportSource, Manager};
use crate::types::ValueKind;
use crate::view::{Column, ViewState};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about)]
struct CLI {
    #[arg(long)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Standard,
    Weighted,
    Both,
}

impl KindArg {
    fn kinds(self) -> Vec<ValueKind> {
        match self {
            KindArg::Standard => vec![ValueKind::Standard],
            KindArg::Weighted => vec![ValueKind::Weighted],
            KindArg::Both => vec![ValueKind::Standard, ValueKind::Weighted],
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    Import {
        #[arg(long)]
        file: PathBuf,
    },

    Fetch {
        /// First day (YYYY-MM-DD).
        #[arg(long, conflicts_with = "start_mjd")]
        from: Option<String>,
        /// Last day (YYYY-MM-DD).
        #[arg(long, conflicts_with = "end_mjd")]
        to: Option<String>,
        #[arg(long)]
        start_mjd: Option<i64>,
        #[arg(long)]
        end_mjd: Option<i64>,
        #[arg(long)]
        source: Vec<String>,
        #[arg(long)]
        page: Option<usize>,
        #[arg(long)]
        size: Option<usize>,
    },

    Tdev {
        #[arg(long, value_enum, default_value = "standard")]
        kind: KindArg,
        #[arg(long)]
        source: Vec<String>,
        #[arg(long)]
        tau0: Option<f64>,
        #[arg(long)]
        latest: bool,
    },

    Export {
        #[arg(long, value_enum)]
        format: Format,
        #[arg(long, value_enum, default_value = "records")]
        what: ExportSource,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        latest: bool,
    },

    View {
        #[arg(long)]
        search: Option<String>,
        #[arg(long, value_enum)]
        sort: Option<Column>,
        #[arg(long)]
        desc: bool,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 20)]
        page_size: usize,
        #[arg(long)]
        latest: bool,
    },

    Clean,
}

fn main() {
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(error) = run_cli() {
        log::error!("{error:#?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = CLI::parse();
    log::info!("{args:#?}");

    let mgr = Manager::new(args.data_dir).context("failed to construct mgr")?;

    match args.command {
        Command::Import { file } => mgr.import_records(file)?,
        Command::Fetch {
            from,
            to,
            start_mjd,
            end_mjd,
            source,
            page,
            size,
        } => {
            let start_mjd = match from {
                Some(date) => Some(parse_mjd(&date)?),
                None => start_mjd,
            };
            let end_mjd = match to {
                Some(date) => Some(parse_mjd(&date)?),
                None => end_mjd,
            };
            let query = Query {
                start_mjd,
                end_mjd,
                sources: source,
                page,
                size,
            };
            mgr.fetch_records(&query)?
        }
        Command::Tdev {
            kind,
            source,
            tau0,
            latest,
        } => mgr.compute_tdev(&kind.kinds(), &source, tau0, latest)?,
        Command::Export {
            format,
            what,
            output,
            latest,
        } => mgr.export(what, format, output.as_deref(), latest)?,
        Command::View {
            search,
            sort,
            desc,
            page,
            page_size,
            latest,
        } => {
            let state = ViewState {
                search,
                sort,
                desc,
                page,
                page_size,
            };
            mgr.view(&state, latest)?
        }
        Command::Clean => mgr.clean()?,
    }

    Ok(())
}
