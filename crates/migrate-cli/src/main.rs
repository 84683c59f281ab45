use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use migrate_core::config::MigrationConfig;
use migrate_core::orchestrator::{ApplySink, Orchestrator};
use migrate_core::row_mapper::{ColumnHint, FieldDescriptor, FieldKind};
use migrate_core::row_validator::RowValidator;
use migrate_core::staging::{InMemoryStagingStore, StagedRow};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    name = "migrate",
    version,
    about = "Bulk spreadsheet-to-database migration CLI",
    long_about = "Runs a spreadsheet through the ingest/validate/apply/reconcile pipeline, demonstrating the migration-core library end to end."
)]
struct Cli {
    /// Path to a TOML config file layered under env vars (MIGRATE_*).
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline (ingest, validate, apply, reconcile) against a file.
    Run {
        /// Path to the .xlsx file to migrate.
        file: PathBuf,
        /// Who initiated the job, recorded on the job record.
        #[arg(long, default_value = "cli")]
        created_by: String,
    },
    /// Ingest only, leaving the job in INGEST_COMPLETED.
    Ingest {
        file: PathBuf,
        #[arg(long, default_value = "cli")]
        created_by: String,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<MigrationConfig> {
    let mut figment = Figment::new().merge(figment::providers::Serialized::defaults(MigrationConfig::default()));
    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }
    figment = figment.merge(Env::prefixed("MIGRATE_"));
    Ok(figment.extract()?)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        tracing::error!(%err, "migration failed");
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

/// The demo schema: a minimal employee-record shape exercising the
/// identifier heuristic (`employee_code`) and a required text field.
fn demo_descriptors() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::new("full_name", ColumnHint::Name("Full Name".to_string()), FieldKind::Text).required(),
        FieldDescriptor::new("employee_code", ColumnHint::Name("Employee Code".to_string()), FieldKind::Identifier),
        FieldDescriptor::new("start_date", ColumnHint::Name("Start Date".to_string()), FieldKind::Date),
        FieldDescriptor::new("end_date", ColumnHint::Name("End Date".to_string()), FieldKind::Date),
        FieldDescriptor::new("status", ColumnHint::Name("Status".to_string()), FieldKind::Text),
    ]
}

/// The demo row-validation rule set, paired with `demo_descriptors`.
fn demo_validator() -> RowValidator {
    RowValidator::new()
        .require("full_name")
        .length_between("employee_code", 1, 20)
        .date_order("start_date", "end_date")
        .one_of("status", &["ACTIVE", "INACTIVE", "ON_LEAVE"])
}

struct StdoutApplySink;

#[async_trait::async_trait]
impl ApplySink for StdoutApplySink {
    async fn apply_batch(&self, rows: &[StagedRow]) -> migrate_core::Result<u64> {
        for row in rows {
            tracing::debug!(row_number = row.row_number, "applying row");
        }
        Ok(rows.len() as u64)
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_ref())?;
    let staging = InMemoryStagingStore::new();
    let orchestrator = Orchestrator::new(staging.clone(), config);

    match cli.command {
        Commands::Ingest { file, created_by } => {
            let job_id = job_id_for(&file);
            let (job, _) = orchestrator.start_or_resume(&job_id, file.to_string_lossy().as_ref(), &created_by).await?;
            let bytes = std::fs::read(&file)?;
            let job = orchestrator.ingest(job, bytes, &demo_descriptors(), demo_validator(), CancellationToken::new()).await?;
            println!("ingested: total={} valid={} errors={}", job.total_rows, job.valid_rows, job.error_rows);
        }
        Commands::Run { file, created_by } => {
            let job_id = job_id_for(&file);
            let (job, outcome) = orchestrator.start_or_resume(&job_id, file.to_string_lossy().as_ref(), &created_by).await?;
            println!("start outcome: {outcome:?}");

            let bytes = std::fs::read(&file)?;
            let job = orchestrator.ingest(job, bytes, &demo_descriptors(), demo_validator(), CancellationToken::new()).await?;
            let job = orchestrator.validate(job, &demo_descriptors()).await?;
            let job = orchestrator.apply(job, Arc::new(StdoutApplySink), CancellationToken::new()).await?;
            let inserted = job.valid_rows;
            let job = orchestrator.reconcile(job, inserted).await?;

            if job.error_rows > 0 {
                let error_path = file.with_extension("errors.xlsx");
                let source_columns: Vec<String> = demo_descriptors().iter().map(|d| d.field_name.clone()).collect();
                let out = std::fs::File::create(&error_path)?;
                orchestrator.write_error_file(&job.job_id, &source_columns, out).await?;
                println!("error file written to {}", error_path.display());
            }

            println!(
                "job {} completed: total={} valid={} errors={}",
                job.job_id, job.total_rows, job.valid_rows, job.error_rows
            );
        }
    }

    Ok(())
}

fn job_id_for(file: &PathBuf) -> String {
    let stamp = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("job")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>();
    format!("JOB-{stamp}")
}
