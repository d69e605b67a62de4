//! Schema Catalog CLI
//!
//! Loads schema documents the way the envelope codecs do and prints what the
//! catalog resolved.

use std::path::PathBuf;

use anyhow::{Context, Result};
use avro_envelope::{AvroEnvelopeConfig, SchemaCatalog};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "avro-catalog")]
#[command(about = "Inspect the Avro schema catalog")]
struct Cli {
    /// Configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Schema directory, replaces the configured ones (repeatable)
    #[arg(short = 'd', long = "schema-dir")]
    schema_dirs: Vec<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List subjects with their full names and references
    Subjects,

    /// Print the order schema documents are parsed in
    Order,

    /// Print the canonical form of a subject's schema
    Show {
        /// Subject to show
        subject: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = AvroEnvelopeConfig::load_from(cli.config.as_deref())
        .context("failed to load configuration")?;
    if !cli.schema_dirs.is_empty() {
        config.schema_dirs = cli.schema_dirs;
    }
    config.schema_dirs = config.resolved_schema_dirs();

    let catalog = SchemaCatalog::from_config(&config);
    let set = catalog
        .load()
        .with_context(|| format!("failed to load schemas from {:?}", catalog.directories()))?;

    match cli.command {
        Commands::Subjects => {
            if set.is_empty() {
                println!("No schemas found");
                return Ok(());
            }
            for subject in set.subjects() {
                let full_name = set.full_name(subject).unwrap_or("-");
                println!("{}  ({})", subject, full_name);
                for reference in set.references(subject) {
                    println!("    └─ {}", reference);
                }
            }
            println!();
            println!("{} subjects, {} named types", set.len(), set.named().len());
        }

        Commands::Order => {
            for (position, document) in set.load_order().iter().enumerate() {
                println!("{:>3}. {}", position + 1, document);
            }
        }

        Commands::Show { subject } => {
            let schema = set
                .get(&subject)
                .with_context(|| format!("subject \"{}\" not found", subject))?;
            println!("{}", schema.canonical_form());
        }
    }

    Ok(())
}
