use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pgdfdb::{Db, Options};

/// Bulk import tool for pgdfdb
#[derive(Parser)]
#[command(name = "pgdf-import")]
#[command(about = "Bulk imports a .pgdf file into a pgdfdb database", long_about = None)]
struct Cli {
    /// Path to the database directory (created if absent)
    #[arg(long, short)]
    output: PathBuf,

    /// `.pgdf` file to import
    #[arg(long, short)]
    input: PathBuf,

    /// Number of records grouped into each write transaction
    #[arg(long, default_value_t = 1)]
    batch_size: usize,

    /// Abort on the first malformed or duplicate record instead of
    /// skipping it and continuing
    #[arg(long)]
    strict: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let options = Options::new()
        .batch_size(cli.batch_size)
        .strict_ingestion(cli.strict);
    let db = Db::open(&cli.output, options)
        .with_context(|| format!("failed to open database at {:?}", cli.output))?;

    println!("Importing {:?} into {:?}", cli.input, cli.output);
    let report = db
        .ingest_file(&cli.input)
        .with_context(|| format!("failed to import {:?}", cli.input))?;
    println!(
        "done: {} nodes, {} edges, {} records skipped",
        report.nodes_ingested, report.edges_ingested, report.records_skipped
    );

    db.close().context("failed to close database")?;
    Ok(())
}
