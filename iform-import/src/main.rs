//! iform-import - chunked warehouse import from the command line
//!
//! Uploads a CSV/XLS/zip file to an Indicia warehouse and drives it through
//! mapping, lookup matching, preprocessing, precheck and import. Pauses the
//! command-line presets cannot answer are prompted for on stdin.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use iform_common::config::{
    load_default_toml_config, load_toml_config, user_config_path, write_toml_config, TomlConfig,
};
use iform_common::events::EventBus;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use iform_import::config::{resolve_warehouse_config, CliOverrides, WarehouseConfig};
use iform_import::console::{parse_key_value, render_event, ConsoleHost, Presets};
use iform_import::models::{AvailableField, ImportSummary};
use iform_import::services::{ImportOptions, ImportOrchestrator, Outcome, WarehouseClient};

/// Command-line arguments for iform-import
#[derive(Parser, Debug)]
#[command(name = "iform-import")]
#[command(about = "Import a data file into an Indicia warehouse")]
#[command(version)]
struct Args {
    /// CSV, XLS(X) or zip file to import
    file: PathBuf,

    /// Warehouse services root URL
    #[arg(long)]
    warehouse_url: Option<String>,

    /// Write auth token
    #[arg(long)]
    auth_token: Option<String>,

    /// Nonce paired with the auth token
    #[arg(long)]
    nonce: Option<String>,

    /// TOML config file (default: ~/.config/iform/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Save the resolved connection settings to the user config file
    #[arg(long)]
    save_config: bool,

    /// Saved import template to start from
    #[arg(long)]
    template_id: Option<u32>,

    /// Description stored with the import
    #[arg(long)]
    description: Option<String>,

    /// Save the import settings as a template with this title
    #[arg(long)]
    template_title: Option<String>,

    /// Column titles, for files whose header row cannot be read locally
    #[arg(long, value_delimiter = ',')]
    columns: Option<Vec<String>>,

    /// Map a column: COLUMN=table:field[:subtype]
    #[arg(long = "mapping", value_name = "COLUMN=FIELD")]
    mappings: Vec<String>,

    /// Offer a destination field for auto-mapping: FIELD[=CAPTION]
    #[arg(long = "field", value_name = "FIELD[=CAPTION]")]
    fields: Vec<String>,

    /// Global value for every row: FIELD=VALUE
    #[arg(long = "global", value_name = "FIELD=VALUE")]
    globals: Vec<String>,

    /// Destination field that must be provided
    #[arg(long = "required", value_name = "FIELD")]
    required: Vec<String>,

    /// Save the row error file here when there are errors
    #[arg(long)]
    error_file: Option<PathBuf>,

    /// Stop at the first question instead of prompting
    #[arg(long)]
    non_interactive: bool,
}

fn available_fields(specs: &[String]) -> Result<Vec<AvailableField>> {
    specs
        .iter()
        .map(|spec| {
            let (token, caption) = match spec.split_once('=') {
                Some((token, caption)) => (token.trim(), caption.trim().to_string()),
                None => (spec.trim(), spec.trim().to_string()),
            };
            Ok(AvailableField {
                token: token.parse()?,
                caption,
            })
        })
        .collect()
}

fn build_options(args: &Args) -> Result<(ImportOptions, Presets)> {
    let mut presets = Presets::default();
    for pair in &args.mappings {
        presets.mappings.push(parse_key_value(pair)?);
    }
    for pair in &args.globals {
        let (field, value) = parse_key_value(pair)?;
        presets.global_values.insert(field, value);
    }

    let options = ImportOptions {
        required_fields: args.required.clone(),
        global_value_fields: presets.global_values.keys().cloned().collect(),
        available_fields: available_fields(&args.fields)?,
        columns: args.columns.clone(),
        description: args.description.clone(),
        template_title: args.template_title.clone(),
        import_template_id: args.template_id,
    };
    Ok((options, presets))
}

fn save_config(config: &WarehouseConfig, toml_config: &TomlConfig) -> Result<()> {
    let path = user_config_path().context("Could not determine config directory")?;
    let updated = TomlConfig {
        warehouse_url: Some(config.base_url.clone()),
        auth_token: Some(config.auth_token.clone()),
        nonce: Some(config.nonce.clone()),
        logging: toml_config.logging.clone(),
    };
    write_toml_config(&updated, &path)?;
    info!("Connection settings saved to {}", path.display());
    Ok(())
}

async fn save_error_file(client: &WarehouseClient, data_file: &str, dest: &Path) {
    match client.download_error_file(data_file, dest).await {
        Ok(bytes) => eprintln!("Error file saved to {} ({} bytes)", dest.display(), bytes),
        Err(e) => warn!("Could not download error file: {}", e),
    }
}

fn print_summary(summary: &ImportSummary) {
    let verb = if summary.precheck_only { "checked" } else { "imported" };
    println!(
        "{} of {} row(s) {}, {} with errors",
        summary.rows_processed, summary.total_rows, verb, summary.errors_count
    );
    if let Some(url) = &summary.error_file_url {
        println!("Error file: {}", url);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = match &args.config {
        Some(path) => load_toml_config(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => load_default_toml_config(),
    };

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| toml_config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(
        "Starting iform-import v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let cli = CliOverrides {
        warehouse_url: args.warehouse_url.clone(),
        auth_token: args.auth_token.clone(),
        nonce: args.nonce.clone(),
    };
    let warehouse_config = resolve_warehouse_config(&cli, &toml_config)?;
    info!("Warehouse: {}", warehouse_config.base_url);

    if args.save_config {
        save_config(&warehouse_config, &toml_config)?;
    }

    let (options, presets) = build_options(&args)?;
    let client = WarehouseClient::new(warehouse_config)?;

    let event_bus = EventBus::new(100);
    let mut events = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(line) = render_event(&event) {
                        eprintln!("{}", line);
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} progress events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut orchestrator = ImportOrchestrator::new(client, event_bus, options);
    let mut host = ConsoleHost::new(tokio::io::stdin(), presets, !args.non_interactive);
    let outcome = host.run(&mut orchestrator, &args.file).await?;

    let data_file = orchestrator.session().data_file.clone();
    match outcome {
        Outcome::Completed(summary) => {
            print_summary(&summary);
            if let (true, Some(dest), Some(data_file)) =
                (summary.has_errors(), &args.error_file, &data_file)
            {
                save_error_file(orchestrator.api(), data_file, dest).await;
            }
            Ok(())
        }
        Outcome::Halted(failure) => {
            if let (true, Some(dest), Some(data_file)) =
                (failure.offers_error_file(), &args.error_file, &data_file)
            {
                save_error_file(orchestrator.api(), data_file, dest).await;
            }
            bail!("{} failed: {}", failure.stage, failure.message)
        }
        Outcome::AwaitingInput(pause) => {
            bail!("Stopped waiting for input: {:?}", pause)
        }
    }
}
