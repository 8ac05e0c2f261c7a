use table_merge::dag::{DagMode, MergeDag, TableMeta};
use table_merge::frame::{load_relation, write_csv};
use table_merge::{ExecutorConfig, MergeExecutor, MergePlan, StepStat, TableSet};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "table-merge")]
#[command(about = "Run chained table merge plans over CSV and Parquet files")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(ClapArgs)]
struct Inputs {
    /// Merge plan JSON document
    #[arg(short, long)]
    plan: PathBuf,

    /// Input table as ID=PATH (.csv or .parquet); repeat for each table
    #[arg(short, long = "table", value_parser = parse_table_arg, required = true)]
    tables: Vec<(String, PathBuf)>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Chain,
    Pairwise,
}

impl From<Mode> for DagMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Chain => DagMode::Chain,
            Mode::Pairwise => DagMode::Pairwise,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a merge plan and write the results
    Run {
        #[command(flatten)]
        inputs: Inputs,

        /// Only compute row counts, keep no intermediate relations
        #[arg(long)]
        preview: bool,

        /// Directory for result CSVs and report.json
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Abort when a step produces more rows than this
        #[arg(long)]
        max_rows: Option<usize>,

        /// Missing key values never match (default: they match each other)
        #[arg(long)]
        strict_null_keys: bool,
    },
    /// Check a merge plan against the tables without joining
    Validate {
        #[command(flatten)]
        inputs: Inputs,
    },
    /// Print the merge DAG as JSON
    Dag {
        #[command(flatten)]
        inputs: Inputs,

        #[arg(long, value_enum, default_value = "chain")]
        mode: Mode,
    },
}

fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Run {
            inputs,
            preview,
            output_dir,
            max_rows,
            strict_null_keys,
        } => {
            let mut config = ExecutorConfig::from_env();
            if max_rows.is_some() {
                config.max_result_rows = max_rows;
            }
            if strict_null_keys {
                config.null_keys_match = false;
            }
            run_plan(inputs, config, preview, output_dir)
        }
        Commands::Validate { inputs } => validate_plan(inputs),
        Commands::Dag { inputs, mode } => print_dag(inputs, mode),
    }
}

fn parse_table_arg(raw: &str) -> std::result::Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((id, path)) if !id.trim().is_empty() && !path.trim().is_empty() => {
            Ok((id.trim().to_string(), PathBuf::from(path.trim())))
        }
        _ => Err(format!("expected ID=PATH, got '{}'", raw)),
    }
}

fn load_inputs(inputs: &Inputs) -> Result<(TableSet, MergePlan)> {
    let plan_text = fs::read_to_string(&inputs.plan)
        .with_context(|| format!("Failed to read plan {}", inputs.plan.display()))?;
    let plan = MergePlan::from_json(&plan_text)?;

    let mut tables = TableSet::new();
    for (id, path) in &inputs.tables {
        info!("Loading table {} from {:?}", id, path);
        let relation = load_relation(path).with_context(|| format!("Failed to load table {}", id))?;
        if tables.insert(id.clone(), relation).is_some() {
            anyhow::bail!("Table id {} given more than once", id);
        }
    }

    Ok((tables, plan))
}

#[derive(Serialize)]
struct RunReport<'a> {
    generated_at: DateTime<Utc>,
    save_mode: String,
    preview: bool,
    final_rows: usize,
    final_columns: Vec<String>,
    elapsed_ms: u64,
    stats: &'a [StepStat],
    retained: Vec<String>,
}

fn run_plan(inputs: Inputs, config: ExecutorConfig, preview: bool, output_dir: Option<PathBuf>) -> Result<()> {
    let (tables, plan) = load_inputs(&inputs)?;
    let executor = MergeExecutor::new(config);
    let result = executor.execute(&tables, &plan, preview)?;

    println!("\n{}", "=".repeat(60));
    println!(" MERGE COMPLETE ({} steps, {} ms)", result.stats.len(), result.elapsed_ms);
    println!("{}", "=".repeat(60));
    for stat in &result.stats {
        println!(
            "  Step {}: {} -> {} : {} rows",
            stat.step_index, stat.left_table_id, stat.right_table_id, stat.row_count
        );
    }
    println!(
        "\n  Final: {} rows x {} columns",
        result.total_rows(),
        result.final_relation.column_count()
    );

    let Some(dir) = output_dir else {
        return Ok(());
    };

    fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    write_csv(&result.final_relation, &dir.join("final.csv"))?;
    for step in &result.step_relations {
        write_csv(&step.relation, &dir.join(format!("{}.csv", step.label)))?;
    }

    let report = RunReport {
        generated_at: Utc::now(),
        save_mode: plan.save_mode.to_string(),
        preview,
        final_rows: result.total_rows(),
        final_columns: result.final_relation.columns().to_vec(),
        elapsed_ms: result.elapsed_ms,
        stats: &result.stats,
        retained: result.step_relations.iter().map(|s| s.label.clone()).collect(),
    };
    write_report(&report, &dir.join("report.json"))?;

    println!("  Results written to {}", dir.display());
    Ok(())
}

fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn validate_plan(inputs: Inputs) -> Result<()> {
    let (tables, plan) = load_inputs(&inputs)?;
    let layouts = MergeExecutor::new(ExecutorConfig::from_env()).validate(&tables, &plan)?;

    println!("Plan is valid ({} steps)", layouts.len());
    for (step, layout) in plan.steps.iter().zip(&layouts) {
        println!(
            "  Step {} [{}] {} -> columns: {}",
            layout.step(),
            step.join_type,
            step.describe_keys(),
            layout.columns().join(", ")
        );
    }
    Ok(())
}

fn print_dag(inputs: Inputs, mode: Mode) -> Result<()> {
    let (tables, plan) = load_inputs(&inputs)?;
    let dag = MergeDag::build(&TableMeta::from_table_set(&tables), &plan, mode.into());
    println!("{}", dag.to_json()?);
    Ok(())
}
