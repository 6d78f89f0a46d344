//! Blobflow CLI - move rows between local files and blob storage

mod config;

use std::fs::File;
use std::future::Future;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use blobflow_connectors::{get_blob, AccountCatalog, BlobStorage, BlobWriter};
use blobflow_core::{build_decoder, decode_all, rows_to_record_batch, ByteSource, Interrupt, ReaderSource, TupleDescriptor};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::CliConfig;

#[derive(Parser)]
#[command(name = "blobflow")]
#[command(about = "Stream rows between local files and blob storage")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Storage account catalog (overrides BLOBFLOW_ACCOUNTS_FILE)
    #[arg(long, global = true)]
    accounts_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a blob and print its rows
    Get {
        /// Account name or connection string
        account: String,
        container: String,
        path: String,

        /// Column list, e.g. "id:int8,name:text"
        #[arg(short, long)]
        columns: String,

        /// csv, tsv, text, binary, json, xml or auto
        #[arg(short, long)]
        format: Option<String>,

        /// gzip, none or auto
        #[arg(long)]
        compression: Option<String>,
    },

    /// Read rows from a local file (or stdin) and upload them to a blob
    Put {
        account: String,
        container: String,
        path: String,

        #[arg(short, long)]
        columns: String,

        #[arg(short, long)]
        format: Option<String>,

        #[arg(long)]
        compression: Option<String>,

        /// Local input file; stdin when omitted
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Format of the local input
        #[arg(long, default_value = "auto")]
        input_format: String,

        /// Compression of the local input
        #[arg(long, default_value = "auto")]
        input_compression: String,
    },

    /// List blobs as JSON lines
    List {
        account: String,
        container: String,

        /// Only blobs whose name starts with this string
        #[arg(short, long, default_value = "")]
        prefix: String,
    },

    /// Manage named storage accounts
    Account {
        #[command(subcommand)]
        command: AccountCommands,
    },
}

#[derive(Subcommand)]
enum AccountCommands {
    /// Add or replace an account
    Add { name: String, connection_string: String },
    /// Remove an account
    Remove { name: String },
    /// Print account names
    List,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = CliConfig::from_env()?;
    if let Some(path) = cli.accounts_file {
        config.accounts_file = path;
    }

    let interrupt = Interrupt::new();
    cancel_on_ctrl_c(interrupt.clone())?;

    match cli.command {
        Commands::Get {
            account,
            container,
            path,
            columns,
            format,
            compression,
        } => {
            let storage = connect(&config, &account, &container)?;
            let format = format.unwrap_or_else(|| config.default_format.clone());
            let compression = compression.unwrap_or_else(|| config.default_compression.clone());
            get_rows(&storage, &path, &format, &compression, &columns, &interrupt)?;
        }
        Commands::Put {
            account,
            container,
            path,
            columns,
            format,
            compression,
            input,
            input_format,
            input_compression,
        } => {
            let storage = connect(&config, &account, &container)?;
            let format = format.unwrap_or_else(|| config.default_format.clone());
            let compression = compression.unwrap_or_else(|| config.default_compression.clone());
            put_rows(
                &storage,
                &path,
                &format,
                &compression,
                &columns,
                input.as_ref(),
                &input_format,
                &input_compression,
                &interrupt,
            )?;
        }
        Commands::List {
            account,
            container,
            prefix,
        } => {
            let storage = connect(&config, &account, &container)?;
            list_blobs(&storage, &prefix, &interrupt)?;
        }
        Commands::Account { command } => manage_accounts(&config, command)?,
    }

    Ok(())
}

/// The first Ctrl-C cancels `interrupt` so running pipelines stop at their
/// next checkpoint. A second one exits immediately.
fn cancel_on_ctrl_c(interrupt: Interrupt) -> Result<()> {
    spawn_canceller(interrupt, tokio::signal::ctrl_c)
}

fn spawn_canceller<F, Fut>(interrupt: Interrupt, signal: F) -> Result<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = io::Result<()>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start signal handler runtime")?;

    std::thread::Builder::new()
        .name("blobflow-ctrl-c".to_string())
        .spawn(move || {
            runtime.block_on(async {
                if signal().await.is_err() {
                    return;
                }
                warn!("Interrupted, cancelling");
                interrupt.cancel();

                if signal().await.is_ok() {
                    std::process::exit(130);
                }
            })
        })
        .context("Failed to spawn signal handler thread")?;
    Ok(())
}

fn connect(config: &CliConfig, account: &str, container: &str) -> Result<BlobStorage> {
    let catalog = AccountCatalog::load(&config.accounts_file)?;
    let connection_string = catalog.resolve(account)?;
    let storage = BlobStorage::connect(&connection_string, container)
        .with_context(|| format!("Failed to open container '{}'", container))?;
    Ok(storage)
}

fn get_rows(
    storage: &BlobStorage,
    path: &str,
    format: &str,
    compression: &str,
    columns: &str,
    interrupt: &Interrupt,
) -> Result<()> {
    let descriptor = TupleDescriptor::parse(columns)?;

    let mut rows = Vec::new();
    get_blob(storage, path, format, compression, descriptor.clone(), interrupt, |row| {
        rows.push(row);
        Ok(())
    })
    .with_context(|| format!("Failed to read '{}'", path))?;

    let batch = rows_to_record_batch(&descriptor, &rows)?;
    let table = arrow::util::pretty::pretty_format_batches(&[batch])?;
    writeln!(io::stdout(), "{}", table)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn put_rows(
    storage: &BlobStorage,
    path: &str,
    format: &str,
    compression: &str,
    columns: &str,
    input: Option<&PathBuf>,
    input_format: &str,
    input_compression: &str,
    interrupt: &Interrupt,
) -> Result<()> {
    let descriptor = TupleDescriptor::parse(columns)?;

    let (source, input_name): (Box<dyn ByteSource>, String) = match input {
        Some(file) => {
            let handle = File::open(file).with_context(|| format!("Failed to open {:?}", file))?;
            info!("Reading rows from {:?}", file);
            (
                Box::new(ReaderSource::new(handle, interrupt.clone())),
                file.to_string_lossy().into_owned(),
            )
        }
        None => (
            Box::new(ReaderSource::new(io::stdin().lock(), interrupt.clone())),
            "-".to_string(),
        ),
    };

    let decoder = build_decoder(
        input_format,
        input_compression,
        &input_name,
        source,
        descriptor.clone(),
        interrupt,
    )?;
    let mut writer = BlobWriter::open(storage, path, format, compression, descriptor, interrupt)?;
    decode_all(decoder, interrupt, |row| writer.push(&row))?;
    let count = writer
        .finish()
        .with_context(|| format!("Failed to upload '{}'", path))?;

    writeln!(io::stdout(), "{} rows written to {}", count, path)?;
    Ok(())
}

fn list_blobs(storage: &BlobStorage, prefix: &str, interrupt: &Interrupt) -> Result<()> {
    let mut stdout = io::stdout().lock();
    storage.list_blobs(prefix, interrupt, |meta| {
        let line = serde_json::to_string(&meta).map_err(|e| blobflow_core::PipelineError::Data(e.to_string()))?;
        writeln!(stdout, "{}", line)?;
        Ok(())
    })?;
    Ok(())
}

fn manage_accounts(config: &CliConfig, command: AccountCommands) -> Result<()> {
    let mut catalog = AccountCatalog::load(&config.accounts_file)?;
    match command {
        AccountCommands::Add {
            name,
            connection_string,
        } => {
            catalog.add(&name, &connection_string)?;
            catalog.save(&config.accounts_file)?;
            info!("Added account '{}'", name);
        }
        AccountCommands::Remove { name } => {
            catalog.remove(&name)?;
            catalog.save(&config.accounts_file)?;
            info!("Removed account '{}'", name);
        }
        AccountCommands::List => {
            let mut stdout = io::stdout().lock();
            for name in catalog.names() {
                writeln!(stdout, "{}", name)?;
            }
        }
    }
    Ok(())
}
