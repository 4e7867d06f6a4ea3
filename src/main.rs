use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use sandbox_store::prelude::*;

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect a sandbox overlay store")]
struct Args {
    /// Connection descriptor, e.g. `data source=sandbox.db;read only=true`.
    #[arg(long, env = "SANDBOX_STORE_CONNECTION")]
    connection: String,
    /// JSON file with database options; defaults apply when omitted.
    #[arg(long)]
    options: Option<PathBuf>,
    #[arg(long)]
    file_table: Option<String>,
    #[arg(long)]
    registry_table: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dump the file table.
    Files,
    /// List guest paths of observed executables.
    Executables,
    /// Dump the registry table, or the values of one key.
    Registry {
        #[arg(long)]
        key: Option<String>,
    },
    /// Create both tables if missing.
    Init {
        /// Empty tables that already exist.
        #[arg(long)]
        clear: bool,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "command failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn load_options(path: Option<&PathBuf>) -> Result<DatabaseOptions, StoreError> {
    let Some(path) = path else {
        return Ok(DatabaseOptions::default());
    };
    let json = std::fs::read_to_string(path).map_err(|e| {
        StoreError::ConfigError(format!("cannot read options file {}: {e}", path.display()))
    })?;
    DatabaseOptions::from_json(&json)
}

fn open_files(args: &Args, options: &DatabaseOptions) -> Result<FileSystemDatabase, StoreError> {
    match &args.file_table {
        Some(table) => FileSystemDatabase::open_with_table(&args.connection, table, options),
        None => FileSystemDatabase::open(&args.connection, options),
    }
}

fn open_registry(args: &Args, options: &DatabaseOptions) -> Result<RegistryDatabase, StoreError> {
    match &args.registry_table {
        Some(table) => RegistryDatabase::open_with_table(&args.connection, table, options),
        None => RegistryDatabase::open(&args.connection, options),
    }
}

fn run(args: &Args) -> Result<(), StoreError> {
    let options = load_options(args.options.as_ref())?;
    debug!(?options, command = ?args.command, "running");

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    match &args.command {
        Command::Files => {
            let files = open_files(args, &options)?;
            write_lines(&mut out, &files.read_all()?)?;
            files.close()?;
        }
        Command::Executables => {
            let files = open_files(args, &options)?;
            write_lines(&mut out, &files.executable_paths()?)?;
            files.close()?;
        }
        Command::Registry { key } => {
            let registry = open_registry(args, &options)?;
            let entries = match key {
                Some(key) => registry.values_under(key)?,
                None => registry.read_all()?,
            };
            write_lines(&mut out, &entries)?;
            registry.close()?;
        }
        Command::Init { clear } => {
            let files = open_files(args, &options)?;
            files.initialize(*clear)?;
            files.close()?;
            let registry = open_registry(args, &options)?;
            registry.initialize(*clear)?;
            registry.close()?;
        }
    }

    out.flush().map_err(output_error)
}

fn write_lines<W: Write, T: Serialize>(out: &mut W, items: &[T]) -> Result<(), StoreError> {
    for item in items {
        serde_json::to_writer(&mut *out, item)
            .map_err(|e| StoreError::ExecutionError(format!("cannot serialize row: {e}")))?;
        out.write_all(b"\n").map_err(output_error)?;
    }
    Ok(())
}

fn output_error(err: io::Error) -> StoreError {
    StoreError::ExecutionError(format!("cannot write output: {err}"))
}
