//! reelflow CLI
//!
//! Offline tooling over the reelflow core:
//!
//! - `plan`: dependency order and parallel groups for a pipeline set
//! - `validate`: integrity check (and optional repair) of a record batch
//! - `reconcile`: resolve conflicts between incoming and existing records

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, Level};

use reelflow_core::conflict::{
    BatchResolutionOptions, BatchResolutionSummary, ConflictResolver, ConflictType,
    ResolutionStrategy,
};
use reelflow_core::integrity::{
    BatchIntegrityResult, BatchValidationOptions, IntegrityValidator, RecordSchema,
    ValidationContext,
};
use reelflow_core::record::read_records;
use reelflow_engine::{load_pipeline_set, ExecutionPlan, PipelineOrchestrator};

#[derive(Parser)]
#[command(name = "reelflow")]
#[command(author = "Reelflow Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Pipeline planning, record validation and import reconciliation", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the execution order and parallel groups of a pipeline set
    Plan {
        /// Pipeline set file (.json or .toml)
        pipelines: PathBuf,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Validate a batch of records
    Validate {
        /// JSON file holding an array of records or `{"records": [...]}`
        records: PathBuf,

        /// Repair auto-repairable violations
        #[arg(long)]
        auto_repair: bool,

        /// Existing records; enables reference checks
        #[arg(long)]
        existing: Option<PathBuf>,

        /// Schema file; defaults to the prompt-template schema
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Validate each chunk concurrently
        #[arg(long)]
        parallel: bool,

        #[arg(long, default_value = "50")]
        batch_size: usize,

        /// Stop at the first invalid record
        #[arg(long)]
        stop_on_first_error: bool,

        /// Fail unless every record is valid
        #[arg(long)]
        strict: bool,

        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,
    },

    /// Resolve conflicts between incoming and existing records
    Reconcile {
        #[arg(long)]
        incoming: PathBuf,

        #[arg(long)]
        existing: PathBuf,

        /// Default strategy
        #[arg(short, long, default_value = "skip")]
        strategy: String,

        /// Per-type strategies, e.g. `version=use_latest_version`
        #[arg(long = "by-type", value_delimiter = ',')]
        by_type: Vec<String>,

        /// Resolve each chunk concurrently
        #[arg(long)]
        parallel: bool,

        #[arg(long, default_value = "50")]
        batch_size: usize,

        /// Write the resolved records here
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    reelflow_core::telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Plan { pipelines, format } => cmd_plan(&pipelines, format),
        Commands::Validate {
            records,
            auto_repair,
            existing,
            schema,
            parallel,
            batch_size,
            stop_on_first_error,
            strict,
            format,
        } => {
            let options = ValidateArgs {
                auto_repair,
                existing,
                schema,
                parallel,
                batch_size,
                stop_on_first_error,
                strict,
            };
            let result = cmd_validate(&records, &options).await?;
            print_output(&result, format, render_validation_text)?;
            if !result.success {
                bail!(
                    "validation failed: {} of {} records invalid",
                    result.invalid_items,
                    result.total_items
                );
            }
            Ok(())
        }
        Commands::Reconcile {
            incoming,
            existing,
            strategy,
            by_type,
            parallel,
            batch_size,
            output,
            format,
        } => {
            let options = resolution_options(&strategy, &by_type, parallel, batch_size)?;
            let summary = cmd_reconcile(&incoming, &existing, &options).await?;
            if let Some(path) = output {
                write_json_file(&path, &summary.resolved_records)?;
                info!(path = %path.display(), records = summary.resolved_records.len(), "wrote resolved records");
            }
            print_output(&summary, format, render_reconcile_text)
        }
    }
}

/// Plan a pipeline set without running it.
fn cmd_plan(path: &Path, format: OutputFormat) -> Result<()> {
    let set = load_pipeline_set(path)
        .with_context(|| format!("Failed to load pipeline set: {:?}", path))?;
    let plan = PipelineOrchestrator::default()
        .create_execution_plan(&set.declarations())
        .context("Failed to plan pipelines")?;
    print_output(&plan, format, render_plan_text)
}

struct ValidateArgs {
    auto_repair: bool,
    existing: Option<PathBuf>,
    schema: Option<PathBuf>,
    parallel: bool,
    batch_size: usize,
    stop_on_first_error: bool,
    strict: bool,
}

async fn cmd_validate(path: &Path, args: &ValidateArgs) -> Result<BatchIntegrityResult> {
    let records = read_records_file(path)?;

    let validator = match &args.schema {
        Some(schema_path) => {
            let raw = std::fs::read_to_string(schema_path)
                .with_context(|| format!("Failed to read schema file: {:?}", schema_path))?;
            let schema = RecordSchema::from_json(&raw)
                .with_context(|| format!("Invalid schema in {:?}", schema_path))?;
            IntegrityValidator::with_schema(schema)
        }
        None => IntegrityValidator::new(),
    };

    let mut context = ValidationContext::default();
    if args.auto_repair {
        context = context.with_auto_repair();
    }
    if let Some(existing_path) = &args.existing {
        context = context.with_existing(&read_records_file(existing_path)?);
    }

    let options = BatchValidationOptions {
        parallel_processing: args.parallel,
        batch_size: args.batch_size,
        allow_partial_success: !args.strict,
        stop_on_first_error: args.stop_on_first_error,
        context,
    };
    Ok(validator.validate_batch(records, &options).await)
}

fn resolution_options(
    strategy: &str,
    by_type: &[String],
    parallel: bool,
    batch_size: usize,
) -> Result<BatchResolutionOptions> {
    let mut strategy_by_type = HashMap::new();
    for pair in by_type {
        let (kind, name) = pair
            .split_once('=')
            .with_context(|| format!("Expected TYPE=STRATEGY, got `{pair}`"))?;
        let kind: ConflictType = kind.trim().parse().map_err(anyhow::Error::msg)?;
        strategy_by_type.insert(kind, ResolutionStrategy::from(name.trim()));
    }
    Ok(BatchResolutionOptions {
        default_strategy: ResolutionStrategy::from(strategy),
        strategy_by_type,
        priority_rules: Vec::new(),
        parallel_processing: parallel,
        batch_size,
    })
}

async fn cmd_reconcile(
    incoming: &Path,
    existing: &Path,
    options: &BatchResolutionOptions,
) -> Result<BatchResolutionSummary> {
    let incoming = read_records_file(incoming)?;
    let existing = read_records_file(existing)?;
    let resolver = ConflictResolver::new();
    Ok(resolver
        .resolve_batch_conflicts(&incoming, &existing, options)
        .await)
}

fn read_records_file(path: &Path) -> Result<Vec<Value>> {
    read_records(path).with_context(|| format!("Failed to read records from {:?}", path))
}

fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_string_pretty(value)?;
    std::fs::write(path, body).with_context(|| format!("Failed to write {:?}", path))
}

fn print_output<T: Serialize>(value: &T, format: OutputFormat, text: fn(&T) -> String) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => println!("{}", text(value)),
    }
    Ok(())
}

fn render_plan_text(plan: &ExecutionPlan) -> String {
    let mut out = format!("Execution order: {}\n", plan.execution_order.join(" -> "));
    for (i, group) in plan.parallel_groups.iter().enumerate() {
        out.push_str(&format!("  group {}: {}\n", i + 1, group.join(", ")));
    }
    out.trim_end().to_string()
}

fn render_validation_text(result: &BatchIntegrityResult) -> String {
    let mut out = format!(
        "{} records: {} valid, {} invalid, {} repaired (avg quality {:.2})",
        result.total_items,
        result.valid_items,
        result.invalid_items,
        result.repaired_items,
        result.average_quality_score
    );
    for v in &result.global_violations {
        out.push_str(&format!("\n  [{}] {}", v.rule_id, v.message));
    }
    for item in result.results.iter().filter(|r| !r.result.is_valid) {
        let id = item.id.as_deref().unwrap_or("<no id>");
        for v in &item.result.violations {
            out.push_str(&format!("\n  #{} {}: [{}] {}", item.index, id, v.rule_id, v.message));
        }
    }
    if result.stopped_early {
        out.push_str("\n  stopped at first invalid record");
    }
    out
}

fn render_reconcile_text(summary: &BatchResolutionSummary) -> String {
    let mut out = format!(
        "{} incoming, {} conflicts, {} resolved, {} failed, {} skipped",
        summary.total_processed,
        summary.conflicts_detected,
        summary.resolutions_applied,
        summary.failed_resolutions,
        summary.skipped_conflicts
    );
    for entry in &summary.log {
        out.push_str(&format!(
            "\n  {} [{} {}] {} -> {}",
            entry.incoming_id, entry.conflict_type, entry.field, entry.strategy, entry.action
        ));
        if let Some(error) = &entry.error {
            out.push_str(&format!(" ({error})"));
        }
    }
    out
}
