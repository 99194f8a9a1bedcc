//! Schema synchronization runner.
//!
//! [`SchemaSync`] ties the pipeline together: it projects the declarations,
//! reads the live catalog, diffs the two and renders the change set. `log`
//! stops there; `build` also executes the up-queue and `revert` executes a
//! previously returned down-queue.

use oxide_sync_core::declaration::SchemaDeclaration;
use oxide_sync_core::differ::{ColumnRename, Differ};
use oxide_sync_core::ledger::DEFAULT_LEDGER_TABLE;
use oxide_sync_core::projector::project;
use oxide_sync_core::sql::{SqlInMemory, SqlQuery};
use oxide_sync_core::synth::{synthesize, SynthesisOptions};
use oxide_sync_core::SchemaChange;
use tracing::{debug, info, warn};

use crate::catalog::{self, CatalogFilter};
use crate::connection::Connection;
use crate::error::{Result, SyncError};
use crate::ledger::DEFAULT_MIGRATIONS_TABLE;

/// Configuration for a synchronization run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Ledger table name.
    pub ledger_table: String,
    /// Applied-migrations table name.
    pub migrations_table: String,
    /// Schemas to read. Empty means the connection's current schema.
    pub schemas: Vec<String>,
    /// Explicit column renames.
    pub renames: Vec<ColumnRename>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            migrations_table: DEFAULT_MIGRATIONS_TABLE.to_string(),
            schemas: Vec::new(),
            renames: Vec::new(),
        }
    }
}

impl SyncOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the ledger table name.
    #[must_use]
    pub fn ledger_table(mut self, name: impl Into<String>) -> Self {
        self.ledger_table = name.into();
        self
    }

    /// Sets the applied-migrations table name.
    #[must_use]
    pub fn migrations_table(mut self, name: impl Into<String>) -> Self {
        self.migrations_table = name.into();
        self
    }

    /// Adds a schema to read.
    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schemas.push(schema.into());
        self
    }

    /// Declares that column `from` of `table` is now called `to`.
    #[must_use]
    pub fn rename(
        mut self,
        table: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.renames.push(ColumnRename::new(table, from, to));
        self
    }

    /// The catalog filter these options imply.
    #[must_use]
    pub fn catalog_filter(&self) -> CatalogFilter {
        CatalogFilter {
            schemas: self.schemas.clone(),
            ledger_table: self.ledger_table.clone(),
            migrations_table: self.migrations_table.clone(),
        }
    }
}

/// Synchronizes a database with declared entities.
pub struct SchemaSync<'a, C: Connection> {
    connection: &'a C,
    declarations: &'a SchemaDeclaration,
    options: SyncOptions,
}

impl<'a, C: Connection> SchemaSync<'a, C> {
    /// Creates a runner with default options.
    pub fn new(connection: &'a C, declarations: &'a SchemaDeclaration) -> Self {
        Self {
            connection,
            declarations,
            options: SyncOptions::default(),
        }
    }

    /// Replaces the options.
    #[must_use]
    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the options.
    #[must_use]
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Computes the changes without rendering them.
    pub async fn diff(&self) -> Result<Vec<SchemaChange>> {
        Ok(self.snapshot_diff().await?.0)
    }

    /// Computes the change set without executing it.
    pub async fn log(&self) -> Result<SqlInMemory> {
        let (changes, ledger_present) = self.snapshot_diff().await?;
        let options = SynthesisOptions::new()
            .ledger_table(self.options.ledger_table.clone())
            .ledger_present(ledger_present);
        let sql = synthesize(&changes, self.connection.dialect(), &options)?;
        info!(
            changes = changes.len(),
            up = sql.up_queries.len(),
            down = sql.down_queries.len(),
            "Computed change set"
        );
        Ok(sql)
    }

    /// Computes the change set and executes its up-queue.
    ///
    /// Returns the executed queues; the down-queue reverts them.
    pub async fn build(&self) -> Result<SqlInMemory> {
        let sql = self.log().await?;
        if sql.up_queries.is_empty() {
            info!("Schema is up to date");
            return Ok(sql);
        }
        run_queue(self.connection, sql.up_queries.iter()).await?;
        info!(statements = sql.up_queries.len(), "Schema synchronized");
        Ok(sql)
    }

    /// Executes the down-queue of `sql`.
    pub async fn revert(&self, sql: &SqlInMemory) -> Result<()> {
        if sql.down_queries.is_empty() {
            return Ok(());
        }
        run_queue(self.connection, sql.down_in_execution_order()).await?;
        info!(statements = sql.down_queries.len(), "Change set reverted");
        Ok(())
    }

    async fn snapshot_diff(&self) -> Result<(Vec<SchemaChange>, bool)> {
        let dialect = self.connection.dialect();
        let declared = project(self.declarations, dialect)?;
        let actual = catalog::read(self.connection, &self.options.catalog_filter()).await?;
        let changes = Differ::new(dialect)
            .with_renames(self.options.renames.clone())
            .diff(&declared, &actual)?;
        for change in &changes {
            debug!(change = %change, "Pending change");
        }
        Ok((changes, actual.ledger_present))
    }
}

/// Executes `queries` in order, inside a transaction when the dialect
/// supports transactional DDL.
async fn run_queue<'q, C, I>(connection: &C, queries: I) -> Result<()>
where
    C: Connection,
    I: IntoIterator<Item = &'q SqlQuery>,
{
    let dialect = connection.dialect();
    let transactional = dialect.capabilities().transactional_ddl;

    if transactional {
        execute(connection, &SqlQuery::new(dialect.begin_transaction())).await?;
    }
    for query in queries {
        if let Err(err) = execute(connection, query).await {
            if transactional {
                let rollback = dialect.rollback_transaction();
                if let Err(rollback_err) = connection.execute(rollback, &[]).await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
            }
            return Err(err);
        }
    }
    if transactional {
        execute(connection, &SqlQuery::new(dialect.commit_transaction())).await?;
    }
    Ok(())
}

async fn execute<C: Connection>(connection: &C, query: &SqlQuery) -> Result<u64> {
    debug!(sql = %query.query, "Executing");
    connection
        .execute(&query.query, &query.parameters)
        .await
        .map_err(|source| SyncError::Execution {
            query: query.query.clone(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_builder() {
        let options = SyncOptions::new()
            .ledger_table("meta")
            .schema("app")
            .rename("users", "name", "full_name");

        assert_eq!(options.ledger_table, "meta");
        assert_eq!(options.migrations_table, DEFAULT_MIGRATIONS_TABLE);
        assert_eq!(options.renames, vec![ColumnRename::new("users", "name", "full_name")]);

        let filter = options.catalog_filter();
        assert_eq!(filter.schemas, vec!["app".to_string()]);
        assert!(filter.is_excluded("meta"));
        assert!(filter.is_excluded(DEFAULT_MIGRATIONS_TABLE));
    }

    #[test]
    fn test_default_options() {
        let options = SyncOptions::default();
        assert_eq!(options.ledger_table, DEFAULT_LEDGER_TABLE);
        assert!(options.schemas.is_empty());
        assert!(options.renames.is_empty());
    }
}
