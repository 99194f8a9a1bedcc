//! oxide-sync CLI
//!
//! Compares a database with a JSON declaration file and prints or applies
//! the statements that bring it in line.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use oxide_sync::ledger::{MigrationHistory, DEFAULT_MIGRATIONS_TABLE};
use oxide_sync::prelude::*;
use oxide_sync_core::dialect::DialectKind;
use oxide_sync_core::ledger::DEFAULT_LEDGER_TABLE;

/// Keep a database schema in sync with declared entities.
#[derive(Parser)]
#[command(name = "oxide-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL.
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:db.sqlite3")]
    database: String,

    /// JSON file with the entity and view declarations.
    #[arg(short, long, env = "OXIDE_SYNC_SCHEMA")]
    schema: PathBuf,

    /// Ledger table name.
    #[arg(long, env = "OXIDE_SYNC_LEDGER_TABLE", default_value = DEFAULT_LEDGER_TABLE)]
    ledger_table: String,

    /// Applied-migrations table name.
    #[arg(long, default_value = DEFAULT_MIGRATIONS_TABLE)]
    migrations_table: String,

    /// Schema to read (repeatable). Defaults to the current schema.
    #[arg(long = "schema-filter")]
    schema_filter: Vec<String>,

    /// Column rename as `table.from=to` (repeatable).
    #[arg(long = "rename", value_parser = parse_rename)]
    renames: Vec<(String, String, String)>,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the pending up and down statements without executing them.
    Log {
        /// Print the change set as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Execute the pending statements.
    Build {
        /// Record the run under this name in the migrations table.
        #[arg(long)]
        record: Option<String>,
    },

    /// Show pending changes and recorded runs.
    Status,
}

/// Parses `table.from=to`; the table may be schema qualified.
fn parse_rename(text: &str) -> std::result::Result<(String, String, String), String> {
    let (source, to) = text
        .split_once('=')
        .ok_or_else(|| format!("expected table.from=to, got '{text}'"))?;
    let (table, from) = source
        .rsplit_once('.')
        .ok_or_else(|| format!("expected table.from=to, got '{text}'"))?;
    if table.is_empty() || from.is_empty() || to.is_empty() {
        return Err(format!("expected table.from=to, got '{text}'"));
    }
    Ok((table.to_string(), from.to_string(), to.to_string()))
}

fn print_queue<'a>(title: &str, queries: impl Iterator<Item = &'a SqlQuery>) {
    println!("-- {title}");
    for query in queries {
        println!("{query}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match DialectKind::from_url(&cli.database) {
        Some(DialectKind::Sqlite) => {}
        Some(other) => bail!(
            "{other:?} connections are not built into the CLI; use the library with a custom Connection"
        ),
        None => bail!("Unrecognized database URL: {}", cli.database),
    }

    let json = std::fs::read_to_string(&cli.schema)
        .with_context(|| format!("Failed to read {}", cli.schema.display()))?;
    let declarations = SchemaDeclaration::from_json(&json)?;

    let mut options = SyncOptions::new()
        .ledger_table(&cli.ledger_table)
        .migrations_table(&cli.migrations_table);
    for schema in &cli.schema_filter {
        options = options.schema(schema);
    }
    for (table, from, to) in &cli.renames {
        options = options.rename(table, from, to);
    }

    let conn = SqliteConnection::connect(&cli.database).await?;
    let sync = SchemaSync::new(&conn, &declarations).with_options(options);
    let history = MigrationHistory::new(conn.pool().clone(), &cli.migrations_table);

    match cli.command {
        Commands::Log { json } => {
            let sql = sync.log().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sql)?);
            } else if sql.is_empty() {
                info!("No changes detected.");
            } else {
                print_queue("up", sql.up_queries.iter());
                println!();
                print_queue("down", sql.down_in_execution_order());
            }
        }

        Commands::Build { record } => {
            let sql = sync.build().await?;
            if let Some(name) = record {
                history.ensure_table().await?;
                history.record_applied(&name).await?;
                info!(name = %name, statements = sql.up_queries.len(), "Recorded run");
            }
        }

        Commands::Status => {
            let changes = sync.diff().await?;
            if changes.is_empty() {
                println!("Schema is up to date.");
            } else {
                println!("\nPending changes:");
                println!("{:-<60}", "");
                for change in &changes {
                    println!(" [ ] {change}");
                }
            }

            history.ensure_table().await?;
            let applied = history.get_applied().await?;
            if !applied.is_empty() {
                println!("\nRecorded runs:");
                println!("{:-<60}", "");
                for migration in &applied {
                    println!(
                        " [X] {} ({})",
                        migration.name,
                        migration.applied_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
            println!();
        }
    }

    Ok(())
}
