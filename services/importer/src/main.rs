//! Importer CLI - loads one clinic POS export batch into the store
//!
//! Responsibilities:
//! - Take the six export file paths from the command line
//! - Run the full clean/resolve/upsert pipeline
//! - Print a per-entity summary and the rejection breakdown
//! - Optionally write the rejection ledger to CSV for manual review
//!
//! CRITICAL: This pipeline must be IDEMPOTENT
//! Re-running the same files against the same store changes nothing.

use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use importer::models::UpsertOutcome;
use importer::store::{ImportStore, MemoryStore, PgStore};
use importer::{run_import, ImportFiles, ImportProgress, ReasonCode};

#[derive(Parser, Debug)]
#[command(name = "importer", about = "Imports clinic POS exports into the store")]
struct Args {
    /// Customer info export (CSV or Excel)
    #[arg(long)]
    customers: PathBuf,

    /// Visit frequency export
    #[arg(long)]
    visit_frequency: PathBuf,

    /// Detailed sales export
    #[arg(long)]
    sales: PathBuf,

    /// Payments export
    #[arg(long)]
    payments: PathBuf,

    /// Item sales export
    #[arg(long)]
    item_sales: PathBuf,

    /// Service sales export
    #[arg(long)]
    service_sales: PathBuf,

    /// Dry run - clean and validate in memory, don't touch the database
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Write the rejection ledger to this CSV file
    #[arg(long)]
    rejections_out: Option<PathBuf>,
}

fn print_outcome(label: &str, outcome: &UpsertOutcome) {
    println!(
        "  {:<16} {:>6} inserted, {:>6} updated",
        label, outcome.inserted, outcome.updated
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    println!("=== Clinic POS Importer ===");
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });

    let store: Box<dyn ImportStore> = if args.dry_run {
        Box::new(MemoryStore::new())
    } else {
        let db_url = std::env::var("DB_URL").context("DB_URL env var missing")?;
        Box::new(
            PgStore::connect(&db_url)
                .await
                .context("Failed to connect to database")?,
        )
    };

    let files = ImportFiles {
        customers: args.customers,
        visit_frequency: args.visit_frequency,
        sales: args.sales,
        payments: args.payments,
        item_sales: args.item_sales,
        service_sales: args.service_sales,
    };

    let mut last_line = String::new();
    let mut sink = |p: &ImportProgress| {
        let line = format!("[{:>3}%] {}", p.percentage, p.message);
        if line != last_line {
            println!("{}", line);
            last_line = line;
        }
    };
    let result = run_import(store.as_ref(), &files, &mut sink).await;

    println!("\n=== Summary ===");
    print_outcome("customers", &result.stats.customers);
    print_outcome("visit summaries", &result.stats.visit_summaries);
    print_outcome("transactions", &result.stats.transactions);
    print_outcome("payments", &result.stats.payments);
    print_outcome("item sales", &result.stats.item_sales);
    print_outcome("service sales", &result.stats.service_sales);
    println!("  total written: {}", result.stats.total_written());

    if !result.rejections.is_empty() {
        println!("\nRejections ({}):", result.rejections.len());
        for reason in [
            ReasonCode::MalformedRow,
            ReasonCode::MissingRequiredField,
            ReasonCode::DuplicateKey,
            ReasonCode::UnknownCustomerReference,
            ReasonCode::StoreWriteFailure,
        ] {
            let count = result.rejections.count_by(reason);
            if count > 0 {
                println!("  {:<28} {}", reason.as_str(), count);
            }
        }
    }

    if let Some(path) = &args.rejections_out {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        result.rejections.write_csv(file)?;
        println!("Rejection ledger written to {}", path.display());
    }

    if !result.success {
        anyhow::bail!("Import failed: {}", result.message);
    }
    println!("\n{}", result.message);
    Ok(())
}
