use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use cdm_migrate::config::Config;
use cdm_migrate::database::{Database, redact_url};
use cdm_migrate::errors::{AppError, SourceError, TargetError};
use cdm_migrate::mapping::MappingSpec;
use cdm_migrate::pipeline::Loader;
use cdm_migrate::schema::{extract_schema_markdown, introspect_catalog};
use cdm_migrate::sources::{SourceInput, create_row_source};

#[derive(Parser)]
#[command(name = "cdm-migrate")]
#[command(about = "Mapping-driven ETL into an OMOP-style clinical data model")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a migration described by a mapping document
    Migrate {
        /// Mapping document (JSON)
        #[arg(short, long)]
        mapping: PathBuf,

        /// Load from a flat CSV export instead of the source database
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Source database URL (overrides config and environment)
        #[arg(long)]
        source_url: Option<String>,

        /// Target database URL (overrides config and environment)
        #[arg(long)]
        target_url: Option<String>,

        /// Rows per insert chunk (overrides config)
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Introspect a database and write its schema as a markdown document
    ExtractSchema {
        /// Database URL (overrides config and environment)
        #[arg(long)]
        source_url: Option<String>,

        /// Output file
        #[arg(short, long, default_value = "schema.md")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "cdm_migrate={},sea_orm=warn,sqlx=warn",
            cli.log_level
        ))
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load_from_file(&cli.config)?;

    match cli.command {
        Commands::Migrate {
            mapping,
            csv,
            source_url,
            target_url,
            batch_size,
        } => {
            run_migrate(&config, mapping, csv, source_url, target_url, batch_size).await?;
        }
        Commands::ExtractSchema { source_url, output } => {
            run_extract_schema(&config, source_url, output).await?;
        }
    }

    Ok(())
}

async fn run_migrate(
    config: &Config,
    mapping: PathBuf,
    csv: Option<PathBuf>,
    source_url: Option<String>,
    target_url: Option<String>,
    batch_size: Option<usize>,
) -> Result<()> {
    let batch_size = batch_size.unwrap_or(config.load.batch_size);
    let max_connections = config.load.max_connections;

    let target_url = match target_url {
        Some(url) => url,
        None => config.target_url()?,
    };
    let target = Database::connect(&target_url, max_connections)
        .await
        .map_err(|e| {
            AppError::from(TargetError::Connectivity {
                url: redact_url(&target_url),
                message: e.to_string(),
            })
        })?;

    let catalog = introspect_catalog(&target).await?;
    if catalog.is_empty() {
        return Err(AppError::configuration(
            "target schema is empty; create the data model tables first",
        )
        .into());
    }
    info!("Target ready with {} table(s)", catalog.len());

    let spec = MappingSpec::load(&mapping, &catalog).map_err(AppError::from)?;

    let input = match csv {
        Some(path) => SourceInput::CsvFile(path),
        None => SourceInput::Database {
            url: match source_url {
                Some(url) => url,
                None => config.source_url()?,
            },
            max_connections,
        },
    };
    let source = create_row_source(input).await?;

    let loader = Loader::new(source, target, catalog, batch_size);
    let report = loader.run(&spec).await?;
    print!("{}", report.summary());
    Ok(())
}

async fn run_extract_schema(
    config: &Config,
    source_url: Option<String>,
    output: PathBuf,
) -> Result<()> {
    let url = match source_url {
        Some(url) => url,
        None => config.source_url()?,
    };
    let db = Database::connect(&url, config.load.max_connections)
        .await
        .map_err(|e| {
            AppError::from(SourceError::Connectivity {
                url: redact_url(&url),
                message: e.to_string(),
            })
        })?;

    let document = extract_schema_markdown(&db).await?;
    std::fs::write(&output, document)?;
    info!("Wrote schema document to {}", output.display());
    Ok(())
}
