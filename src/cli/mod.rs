//! Command-line interface
//!
//! `run` executes (or resumes) a study from a JSON configuration and a CSV
//! file; `evaluate` scores a persisted `model.p` on held-out data.

use clap::{Parser, Subcommand};
use colored::*;
use polars::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::data::Dataset;
use crate::evaluation::evaluate_model;
use crate::metrics::{Metric, MetricSummary};
use crate::plugins::PluginRegistry;
use crate::study::{Study, StudyConfig};

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString {
    s.truecolor(100, 100, 100)
}
fn accent(s: &str) -> ColoredString {
    s.truecolor(120, 170, 255)
}
fn muted(s: &str) -> ColoredString {
    s.truecolor(140, 140, 140)
}
fn ok(s: &str) -> ColoredString {
    s.truecolor(100, 210, 120)
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

fn print_summary(summary: &MetricSummary) {
    for (name, stats) in summary {
        println!(
            "  {:<16} {} {}",
            muted(name),
            format!("{:.4}", stats.mean).white().bold(),
            dim(&format!("± {:.4}", stats.std))
        );
    }
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "prognos")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Pipeline search and ensembling for tabular prediction")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run or resume a study
    Run {
        /// Study configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Training data (CSV with header)
        #[arg(short, long)]
        data: PathBuf,
    },

    /// Score a study's persisted ensemble on held-out data
    Evaluate {
        /// Study configuration (JSON) the model was built with
        #[arg(short, long)]
        config: PathBuf,

        /// Held-out data (CSV with header)
        #[arg(short, long)]
        data: PathBuf,
    },
}

// ─── Data loading ──────────────────────────────────────────────────────────────

pub fn load_data(path: &Path) -> anyhow::Result<DataFrame> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let df = match ext {
        "csv" => CsvReadOptions::default()
            .with_infer_schema_length(Some(1000))
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?,
        _ => anyhow::bail!("Unsupported file format: {}", ext),
    };
    Ok(df)
}

fn load_dataset(path: &Path, config: &StudyConfig) -> anyhow::Result<Dataset> {
    step_run("Loading data");
    let start = Instant::now();
    let df = load_data(path)?;
    let dataset = Dataset::from_dataframe(&df, &config.target, config.time_column.as_deref())?;
    step_done(&format!(
        "{} rows × {} features in {:?}",
        dataset.n_samples(),
        dataset.n_features(),
        start.elapsed()
    ));
    Ok(dataset)
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_run(config_path: &Path, data_path: &Path) -> anyhow::Result<()> {
    section("Study");
    let config = StudyConfig::from_json_file(config_path)?;
    let dataset = load_dataset(data_path, &config)?;

    let registry = PluginRegistry::with_builtin_plugins()?;
    let mut study = Study::new(config, dataset, registry)?;
    println!(
        "  {} {} templates, workspace {}",
        accent("›"),
        study.templates().len(),
        study.workspace().root().display()
    );

    let start = Instant::now();
    let result = study.run();

    section("Leaderboard");
    for entry in study.leaderboard() {
        let score = entry
            .best
            .as_ref()
            .map(|t| format!("{:.4} ± {:.4}", t.value, t.std))
            .unwrap_or_else(|| "failed".to_string());
        let marker = if entry.qualified { ok("✓") } else { dim("·") };
        println!(
            "  {} {:<48} {} {}",
            marker,
            entry.template.id(),
            score.white(),
            dim(&format!("({} trials)", entry.n_trials))
        );
    }

    let model = result?;
    section("Ensemble");
    for member in model.members() {
        println!(
            "  {:<48} {}",
            member.pipeline.template().id(),
            format!("{:.3}", member.weight).white().bold()
        );
    }
    println!();
    println!(
        "  {} model written to {} in {:.1}s",
        ok("✓"),
        study.workspace().model_path().display(),
        start.elapsed().as_secs_f64()
    );
    println!();
    Ok(())
}

pub fn cmd_evaluate(config_path: &Path, data_path: &Path) -> anyhow::Result<()> {
    section("Evaluate");
    let config = StudyConfig::from_json_file(config_path)?;
    let dataset = load_dataset(data_path, &config)?;
    dataset.validate(config.task)?;

    let registry = PluginRegistry::with_builtin_plugins()?;
    let model = crate::study::Workspace::new(&config.workspace, &config.study_name).load_model(&registry)?;
    let summary = evaluate_model(&model, &dataset, &Metric::suite(config.task), None)?;

    println!();
    print_summary(&summary);
    println!();
    Ok(())
}
