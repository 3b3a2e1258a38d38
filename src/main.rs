//! StrataDB command line
//!
//! Opens a data root and runs one maintenance command against it. Opening a
//! database always runs crash recovery first.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::info;
use stratadb::{EngineConfig, EngineResult, StorageEngine};

#[derive(Parser, Debug)]
#[command(name = "stratadb")]
#[command(version, about = "Page-based storage engine with WAL recovery", long_about = None)]
struct Args {
    /// Data root holding one directory per database
    #[arg(short, long, default_value = "data")]
    root: PathBuf,

    /// JSON engine config; missing fields keep their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List databases under the root
    Databases,
    /// Create an empty database
    CreateDatabase { name: String },
    /// Open a database, run recovery and print what it did
    Recover { database: String },
    /// Open a database and write a fresh checkpoint
    Checkpoint { database: String },
    /// List the tables of a database with their schemas
    Tables { database: String },
    /// Print every live row of a table
    Scan { database: String, table: String },
    /// Print the header and slot directory of one heap page
    DumpPage {
        database: String,
        table: String,
        page: u32,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error ({}): {}", e.kind(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> EngineResult<()> {
    let config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    let engine = StorageEngine::with_config(&args.root, config)?;
    info!("data root {}", engine.root().display());

    match args.command {
        Command::Databases => {
            for name in engine.show_databases()? {
                println!("{}", name);
            }
        }
        Command::CreateDatabase { name } => {
            engine.create_database(&name)?;
            println!("created database '{}'", name);
        }
        Command::Recover { database } => {
            let stats = engine.use_database(&database)?;
            println!("start LSN:        {}", stats.start_lsn);
            println!("records replayed: {}", stats.records);
            println!("redone:           {}", stats.redone);
            println!("undone:           {}", stats.undone);
            println!("losers:           {:?}", stats.losers);
            println!("rebuilt indexes:  {:?}", stats.rebuilt_indexes);
        }
        Command::Checkpoint { database } => {
            engine.use_database(&database)?;
            let checkpoint = engine.save_checkpoint()?;
            println!("checkpoint at LSN {}", checkpoint.lsn);
        }
        Command::Tables { database } => {
            engine.use_database(&database)?;
            for table in engine.table_names()? {
                let schema = engine.table_schema(&table)?;
                let columns: Vec<String> = schema
                    .columns()
                    .iter()
                    .map(|c| {
                        let mut col = format!("{} {}", c.name, c.data_type);
                        if c.primary_key {
                            col.push_str(" PRIMARY KEY");
                        } else if !c.nullable {
                            col.push_str(" NOT NULL");
                        }
                        col
                    })
                    .collect();
                println!("{} ({})", table, columns.join(", "));
            }
        }
        Command::Scan { database, table } => {
            engine.use_database(&database)?;
            let rows = engine.scan(&table)?;
            for (rp, row) in &rows {
                let values: Vec<String> = row.values().iter().map(|v| v.to_string()).collect();
                println!(
                    "({}, {}) | {}",
                    rp.page_number,
                    rp.slot_index,
                    values.join(" | ")
                );
            }
            println!("{} rows", rows.len());
        }
        Command::DumpPage {
            database,
            table,
            page,
        } => {
            engine.use_database(&database)?;
            let summary = engine.heap_page_summary(&table, page)?;
            println!("page:              {}", summary.page_number);
            println!("lsn:               {}", summary.lsn);
            println!("record end:        {}", summary.record_end);
            println!("slot region start: {}", summary.slot_region_start);
            println!("rows:              {}", summary.num_rows);
            println!("free slots:        {}", summary.num_rows_free);
            println!("free space:        {}", summary.free_space);
            for (slot, (offset, len)) in summary.slots.iter().enumerate() {
                let state = if *len == 0 { "free" } else { "live" };
                println!("  slot {:>4}: offset {:>4} len {:>4} {}", slot, offset, len, state);
            }
        }
    }
    Ok(())
}
