//! Schema differ.
//!
//! Compares a declared [`SchemaModel`] against the introspected one and
//! produces the ordered list of [`SchemaChange`]s that turns the latter
//! into the former. Column renames are never guessed; they are applied only
//! from explicit [`ColumnRename`] requests.
//!
//! Changes are emitted in a fixed phase order so that every statement finds
//! the objects it depends on:
//!
//! 1. drop views (dependents first)
//! 2. drop foreign keys
//! 3. drop indices, unique, check and primary key constraints
//! 4. drop tables (referencing tables first)
//! 5. drop columns
//! 6. rename columns
//! 7. create or rename enum types
//! 8. alter enum label sets
//! 9. change columns and recreate tables
//! 10. create tables (referenced tables first)
//! 11. add columns
//! 12. create indices, unique, check and primary key constraints
//! 13. add foreign keys
//! 14. drop enum types
//! 15. create views (dependencies first)

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dialect::MigrationDialect;
use crate::error::{Result, SchemaError};
use crate::normalize::{
    canonical_expression, column_changes, inherit_collation, mentions_column, same_check, same_foreign_key,
    same_index, same_unique,
};
use crate::operations::{EnumColumn, PrimaryKey, SchemaChange, TableName};
use crate::schema::{NamedEnumType, SchemaModel, Table, View};

/// An explicit column rename request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRename {
    /// Table key (`schema.name` or `name`).
    pub table: String,
    /// Current column name.
    pub from: String,
    /// Declared column name.
    pub to: String,
}

impl ColumnRename {
    /// Creates a rename request.
    #[must_use]
    pub fn new(table: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            from: from.into(),
            to: to.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    DropViews,
    DropForeignKeys,
    DropConstraints,
    DropTables,
    DropColumns,
    RenameColumns,
    CreateEnums,
    AlterEnums,
    ChangeColumns,
    CreateTables,
    AddColumns,
    CreateConstraints,
    AddForeignKeys,
    DropEnums,
    CreateViews,
}

type Planned = Vec<(Phase, SchemaChange)>;

/// `(table key, column)` pairs whose dependent constraints must be dropped
/// and recreated around a change.
type Touched = BTreeSet<(String, String)>;

/// Computes schema changes for one dialect.
pub struct Differ<'a> {
    dialect: &'a dyn MigrationDialect,
    renames: Vec<ColumnRename>,
}

impl<'a> Differ<'a> {
    /// Creates a differ for `dialect`.
    #[must_use]
    pub fn new(dialect: &'a dyn MigrationDialect) -> Self {
        Self {
            dialect,
            renames: Vec::new(),
        }
    }

    /// Sets the explicit column renames to apply.
    #[must_use]
    pub fn with_renames(mut self, renames: Vec<ColumnRename>) -> Self {
        self.renames = renames;
        self
    }

    /// Returns the changes that transform `actual` into `declared`.
    ///
    /// An empty result means the database is in sync.
    pub fn diff(&self, declared: &SchemaModel, actual: &SchemaModel) -> Result<Vec<SchemaChange>> {
        declared.validate(true)?;
        actual.validate(false)?;

        let mut planned: Planned = Vec::new();
        let declared_tables: BTreeMap<String, &Table> =
            declared.tables.iter().map(|t| (t.key(), t)).collect();
        let mut actual_tables: BTreeMap<String, Table> = actual
            .tables
            .iter()
            .map(|t| (t.key(), t.clone()))
            .collect();

        let applied = self.apply_renames(&declared_tables, &mut actual_tables, &mut planned)?;
        self.diff_enum_types(declared, actual, &declared_tables, &mut actual_tables, &mut planned);

        let created: BTreeSet<String> = declared_tables
            .keys()
            .filter(|k| !actual_tables.contains_key(*k))
            .cloned()
            .collect();
        let dropped: BTreeSet<String> = actual_tables
            .keys()
            .filter(|k| !declared_tables.contains_key(*k))
            .cloned()
            .collect();
        self.create_tables(&created, &declared_tables, &mut planned);
        self.drop_tables(&dropped, &actual_tables, &mut planned);

        let common: Vec<(&Table, &Table)> = declared_tables
            .iter()
            .filter_map(|(key, declared)| actual_tables.get(key).map(|actual| (*declared, actual)))
            .collect();

        let default_collations = &actual.default_collations;
        let mut touched = Touched::new();
        let mut per_table: Vec<Planned> = common
            .iter()
            .map(|(declared, actual)| {
                let mut list = Planned::new();
                self.diff_columns(declared, actual, default_collations, &mut list, &mut touched);
                self.diff_primary_key(declared, actual, &applied, &mut list, &mut touched);
                list
            })
            .collect();
        for ((declared, actual), list) in common.iter().zip(per_table.iter_mut()) {
            self.diff_constraints(declared, actual, &touched, list);
        }

        let mut changed_relations = dropped;
        for ((declared, actual), list) in common.into_iter().zip(per_table) {
            if list.is_empty() {
                continue;
            }
            if list
                .iter()
                .all(|(_, change)| self.dialect.alters_in_place(change, actual))
            {
                if list.iter().any(|(_, change)| alters_columns(change)) {
                    changed_relations.insert(actual.key());
                }
                planned.extend(list);
                continue;
            }

            debug!(table = %actual.key(), "Table will be recreated");
            changed_relations.insert(actual.key());
            planned.extend(
                list.into_iter()
                    .filter(|(_, change)| matches!(change, SchemaChange::RenameColumn { .. })),
            );
            planned.push((
                Phase::ChangeColumns,
                SchemaChange::RecreateTable {
                    from: actual.clone(),
                    to: declared.clone(),
                },
            ));
        }

        self.diff_views(declared, actual, &changed_relations, &mut planned);

        planned.sort_by_key(|(phase, _)| *phase);
        let changes: Vec<SchemaChange> = planned.into_iter().map(|(_, change)| change).collect();
        debug!(dialect = self.dialect.name(), changes = changes.len(), "Schema diff computed");
        Ok(changes)
    }

    // ========================================================================
    // Renames
    // ========================================================================

    /// Applies the renames to `actual_tables` and returns the ones that
    /// still had to be made.
    fn apply_renames(
        &self,
        declared_tables: &BTreeMap<String, &Table>,
        actual_tables: &mut BTreeMap<String, Table>,
        planned: &mut Planned,
    ) -> Result<Vec<ColumnRename>> {
        let mut applied = Vec::new();
        for rename in &self.renames {
            let Some(table) = actual_tables.get_mut(&rename.table) else {
                return Err(SchemaError::MalformedSchema(format!(
                    "rename targets unknown table '{}'",
                    rename.table
                )));
            };
            let has_from = table.get_column(&rename.from).is_some();
            let has_to = table.get_column(&rename.to).is_some();
            match (has_from, has_to) {
                // Already applied by an earlier run.
                (false, true) => continue,
                (false, false) => {
                    return Err(SchemaError::MalformedSchema(format!(
                        "rename of unknown column '{}.{}'",
                        rename.table, rename.from
                    )))
                }
                (true, true) => {
                    return Err(SchemaError::MalformedSchema(format!(
                        "cannot rename '{}.{}': column '{}' already exists",
                        rename.table, rename.from, rename.to
                    )))
                }
                (true, false) => {}
            }
            let declared_target = declared_tables
                .get(&rename.table)
                .is_some_and(|t| t.get_column(&rename.to).is_some());
            if !declared_target {
                return Err(SchemaError::MalformedSchema(format!(
                    "rename target '{}.{}' is not declared",
                    rename.table, rename.to
                )));
            }

            rename_in_table(table, &rename.from, &rename.to);
            planned.push((
                Phase::RenameColumns,
                SchemaChange::RenameColumn {
                    table: TableName::from(&*table),
                    from: rename.from.clone(),
                    to: rename.to.clone(),
                },
            ));

            for other in actual_tables.values_mut() {
                for fk in &mut other.foreign_keys {
                    if fk.referenced_key() == rename.table {
                        replace_name(&mut fk.referenced_columns, &rename.from, &rename.to);
                    }
                }
            }
            applied.push(rename.clone());
        }
        Ok(applied)
    }

    // ========================================================================
    // Enum types
    // ========================================================================

    fn diff_enum_types(
        &self,
        declared: &SchemaModel,
        actual: &SchemaModel,
        declared_tables: &BTreeMap<String, &Table>,
        actual_tables: &mut BTreeMap<String, Table>,
        planned: &mut Planned,
    ) {
        let declared_enums: BTreeMap<String, &NamedEnumType> =
            declared.enum_types.iter().map(|e| (e.key(), e)).collect();
        let actual_enums: BTreeMap<String, &NamedEnumType> =
            actual.enum_types.iter().map(|e| (e.key(), e)).collect();
        let mut unmatched: BTreeSet<String> = actual_enums
            .keys()
            .filter(|k| !declared_enums.contains_key(*k))
            .cloned()
            .collect();

        for (key, enum_type) in &declared_enums {
            if let Some(existing) = actual_enums.get(key) {
                if existing.labels != enum_type.labels {
                    planned.push((
                        Phase::AlterEnums,
                        SchemaChange::AlterEnumType {
                            enum_type: (*enum_type).clone(),
                            from_labels: existing.labels.clone(),
                            columns: enum_columns(enum_type, declared_tables, actual_tables),
                        },
                    ));
                }
                continue;
            }

            let renamed = unmatched
                .iter()
                .find(|old| {
                    actual_enums.get(*old).is_some_and(|old| {
                        old.labels == enum_type.labels
                            && old.schema == enum_type.schema
                            && shares_column(enum_type, old, declared_tables, actual_tables)
                    })
                })
                .cloned();

            match renamed.and_then(|old| unmatched.take(&old)).and_then(|old| actual_enums.get(&old)) {
                Some(old) => {
                    for table in actual_tables.values_mut() {
                        if table.schema != old.schema {
                            continue;
                        }
                        for column in &mut table.columns {
                            if column.enum_name.as_deref() == Some(old.name.as_str()) {
                                column.enum_name = Some(enum_type.name.clone());
                            }
                        }
                    }
                    planned.push((
                        Phase::CreateEnums,
                        SchemaChange::RenameEnumType {
                            schema: enum_type.schema.clone(),
                            from: old.name.clone(),
                            to: enum_type.name.clone(),
                            labels: enum_type.labels.clone(),
                        },
                    ));
                }
                None => planned.push((
                    Phase::CreateEnums,
                    SchemaChange::CreateEnumType {
                        enum_type: (*enum_type).clone(),
                    },
                )),
            }
        }

        for key in unmatched {
            if let Some(enum_type) = actual_enums.get(&key) {
                planned.push((
                    Phase::DropEnums,
                    SchemaChange::DropEnumType {
                        enum_type: (*enum_type).clone(),
                    },
                ));
            }
        }
    }

    // ========================================================================
    // Tables
    // ========================================================================

    fn create_tables(
        &self,
        created: &BTreeSet<String>,
        declared_tables: &BTreeMap<String, &Table>,
        planned: &mut Planned,
    ) {
        let defer = self.dialect.capabilities().alter_constraints;
        let order = order_by_dependencies(created, |key| {
            referenced_tables(declared_tables.get(key).copied(), key, created)
        });
        for (key, pending) in order {
            let Some(table) = declared_tables.get(&key) else {
                continue;
            };
            let mut table = (*table).clone();
            if defer && !pending.is_empty() {
                let (deferred, kept) = std::mem::take(&mut table.foreign_keys)
                    .into_iter()
                    .partition(|fk| pending.contains(&fk.referenced_key()));
                table.foreign_keys = kept;
                for foreign_key in deferred {
                    planned.push((
                        Phase::AddForeignKeys,
                        SchemaChange::AddForeignKey {
                            table: TableName::from(&table),
                            foreign_key,
                        },
                    ));
                }
            }
            planned.push((Phase::CreateTables, SchemaChange::CreateTable { table }));
        }
    }

    fn drop_tables(
        &self,
        dropped: &BTreeSet<String>,
        actual_tables: &BTreeMap<String, Table>,
        planned: &mut Planned,
    ) {
        let defer = self.dialect.capabilities().alter_constraints;
        let order = order_by_dependencies(dropped, |key| {
            referenced_tables(actual_tables.get(key), key, dropped)
        });
        for (key, pending) in order.into_iter().rev() {
            let Some(table) = actual_tables.get(&key) else {
                continue;
            };
            let mut table = table.clone();
            if defer && !pending.is_empty() {
                let (deferred, kept) = std::mem::take(&mut table.foreign_keys)
                    .into_iter()
                    .partition(|fk| pending.contains(&fk.referenced_key()));
                table.foreign_keys = kept;
                for foreign_key in deferred {
                    planned.push((
                        Phase::DropForeignKeys,
                        SchemaChange::DropForeignKey {
                            table: TableName::from(&table),
                            foreign_key,
                        },
                    ));
                }
            }
            planned.push((Phase::DropTables, SchemaChange::DropTable { table }));
        }
    }

    fn diff_columns(
        &self,
        declared: &Table,
        actual: &Table,
        default_collations: &BTreeMap<String, String>,
        list: &mut Planned,
        touched: &mut Touched,
    ) {
        let name = TableName::from(declared);
        let recreate_in_place = self.dialect.capabilities().alter_column;

        for column in &actual.columns {
            if declared.get_column(&column.name).is_none() {
                list.push((
                    Phase::DropColumns,
                    SchemaChange::DropColumn {
                        table: name.clone(),
                        column: column.clone(),
                    },
                ));
            }
        }

        for column in &declared.columns {
            let Some(existing) = actual.get_column(&column.name) else {
                list.push((
                    Phase::AddColumns,
                    SchemaChange::AddColumn {
                        table: name.clone(),
                        column: column.clone(),
                    },
                ));
                continue;
            };
            let expected =
                inherit_collation(column, existing, actual.collation.as_deref(), default_collations);
            let changes = column_changes(self.dialect, &expected, existing);
            if changes.is_empty() {
                continue;
            }
            debug!(table = %name, column = %column.name, ?changes, "Column changed");
            if recreate_in_place && self.dialect.requires_column_recreate(&changes) {
                touched.insert((declared.key(), column.name.clone()));
            }
            list.push((
                Phase::ChangeColumns,
                SchemaChange::ChangeColumn {
                    table: name.clone(),
                    from: existing.clone(),
                    to: column.clone(),
                    changes,
                },
            ));
        }
    }

    fn diff_primary_key(
        &self,
        declared: &Table,
        actual: &Table,
        renames: &[ColumnRename],
        list: &mut Planned,
        touched: &mut Touched,
    ) {
        let key = declared.key();
        let from = actual.primary_key();
        let to = declared.primary_key();
        let recreated = to.iter().any(|c| touched.contains(&(key.clone(), c.clone())));
        if sorted(&from) == sorted(&to) && !recreated {
            return;
        }

        let name = TableName::from(declared);
        if let Some(mut current) = PrimaryKey::of(actual) {
            // Dropped before the renames run, so it still names the old columns.
            for rename in renames.iter().rev().filter(|r| r.table == key) {
                replace_name(&mut current.columns, &rename.to, &rename.from);
            }
            list.push((
                Phase::DropConstraints,
                SchemaChange::ChangePrimaryKey {
                    table: name.clone(),
                    from: Some(current),
                    to: None,
                },
            ));
        }
        if let Some(target) = PrimaryKey::of(declared) {
            list.push((
                Phase::CreateConstraints,
                SchemaChange::ChangePrimaryKey {
                    table: name,
                    from: None,
                    to: Some(target),
                },
            ));
        }
        if self.dialect.capabilities().alter_constraints {
            touched.extend(from.into_iter().map(|c| (key.clone(), c)));
        }
    }

    fn diff_constraints(&self, declared: &Table, actual: &Table, touched: &Touched, list: &mut Planned) {
        let key = declared.key();
        let name = TableName::from(declared);
        let touches = |columns: &[String]| {
            columns
                .iter()
                .any(|c| touched.contains(&(key.clone(), c.clone())))
        };

        // Indices
        let current: BTreeMap<&str, _> = actual.indices.iter().map(|i| (i.name.as_str(), i)).collect();
        let target: BTreeMap<&str, _> = declared.indices.iter().map(|i| (i.name.as_str(), i)).collect();
        for (index_name, index) in &current {
            let keep = target
                .get(index_name)
                .is_some_and(|d| same_index(d, index) && !touches(&d.columns));
            if !keep {
                list.push((
                    Phase::DropConstraints,
                    SchemaChange::DropIndex {
                        table: name.clone(),
                        index: (*index).clone(),
                    },
                ));
            }
        }
        for (index_name, index) in &target {
            let keep = current
                .get(index_name)
                .is_some_and(|a| same_index(index, a) && !touches(&index.columns));
            if !keep {
                list.push((
                    Phase::CreateConstraints,
                    SchemaChange::CreateIndex {
                        table: name.clone(),
                        index: (*index).clone(),
                    },
                ));
            }
        }

        // Unique constraints
        let current: BTreeMap<&str, _> = actual.uniques.iter().map(|u| (u.name.as_str(), u)).collect();
        let target: BTreeMap<&str, _> = declared.uniques.iter().map(|u| (u.name.as_str(), u)).collect();
        for (unique_name, unique) in &current {
            let keep = target
                .get(unique_name)
                .is_some_and(|d| same_unique(d, unique) && !touches(&d.columns));
            if !keep {
                list.push((
                    Phase::DropConstraints,
                    SchemaChange::DropUniqueConstraint {
                        table: name.clone(),
                        constraint: (*unique).clone(),
                    },
                ));
            }
        }
        for (unique_name, unique) in &target {
            let keep = current
                .get(unique_name)
                .is_some_and(|a| same_unique(unique, a) && !touches(&unique.columns));
            if !keep {
                list.push((
                    Phase::CreateConstraints,
                    SchemaChange::AddUniqueConstraint {
                        table: name.clone(),
                        constraint: (*unique).clone(),
                    },
                ));
            }
        }

        // Check constraints
        let check_touched = |expression: &str| {
            touched
                .iter()
                .any(|(table, column)| *table == key && mentions_column(expression, column))
        };
        let current: BTreeMap<&str, _> = actual.checks.iter().map(|c| (c.name.as_str(), c)).collect();
        let target: BTreeMap<&str, _> = declared.checks.iter().map(|c| (c.name.as_str(), c)).collect();
        for (check_name, check) in &current {
            let keep = target
                .get(check_name)
                .is_some_and(|d| same_check(d, check) && !check_touched(&d.expression));
            if !keep {
                list.push((
                    Phase::DropConstraints,
                    SchemaChange::DropCheckConstraint {
                        table: name.clone(),
                        constraint: (*check).clone(),
                    },
                ));
            }
        }
        for (check_name, check) in &target {
            let keep = current
                .get(check_name)
                .is_some_and(|a| same_check(check, a) && !check_touched(&check.expression));
            if !keep {
                list.push((
                    Phase::CreateConstraints,
                    SchemaChange::AddCheckConstraint {
                        table: name.clone(),
                        constraint: (*check).clone(),
                    },
                ));
            }
        }

        // Foreign keys
        let fk_touched = |fk: &crate::schema::ForeignKey| {
            touches(&fk.columns)
                || fk
                    .referenced_columns
                    .iter()
                    .any(|c| touched.contains(&(fk.referenced_key(), c.clone())))
        };
        let current: BTreeMap<&str, _> = actual
            .foreign_keys
            .iter()
            .map(|f| (f.name.as_str(), f))
            .collect();
        let target: BTreeMap<&str, _> = declared
            .foreign_keys
            .iter()
            .map(|f| (f.name.as_str(), f))
            .collect();
        for (fk_name, fk) in &current {
            let keep = target
                .get(fk_name)
                .is_some_and(|d| same_foreign_key(self.dialect, d, fk) && !fk_touched(d));
            if !keep {
                list.push((
                    Phase::DropForeignKeys,
                    SchemaChange::DropForeignKey {
                        table: name.clone(),
                        foreign_key: (*fk).clone(),
                    },
                ));
            }
        }
        for (fk_name, fk) in &target {
            let keep = current
                .get(fk_name)
                .is_some_and(|a| same_foreign_key(self.dialect, fk, a) && !fk_touched(fk));
            if !keep {
                list.push((
                    Phase::AddForeignKeys,
                    SchemaChange::AddForeignKey {
                        table: name.clone(),
                        foreign_key: (*fk).clone(),
                    },
                ));
            }
        }
    }

    // ========================================================================
    // Views
    // ========================================================================

    fn diff_views(
        &self,
        declared: &SchemaModel,
        actual: &SchemaModel,
        changed_relations: &BTreeSet<String>,
        planned: &mut Planned,
    ) {
        let declared_views: BTreeMap<String, &View> =
            declared.views.iter().map(|v| (v.key(), v)).collect();
        let actual_views: BTreeMap<String, &View> =
            actual.views.iter().map(|v| (v.key(), v)).collect();

        let mut drop = BTreeSet::new();
        let mut create = BTreeSet::new();
        for (key, view) in &actual_views {
            match declared_views.get(key) {
                None => {
                    drop.insert(key.clone());
                }
                Some(target) if !same_view(target, view) => {
                    drop.insert(key.clone());
                    create.insert(key.clone());
                }
                Some(_) => {}
            }
        }
        create.extend(
            declared_views
                .keys()
                .filter(|k| !actual_views.contains_key(*k))
                .cloned(),
        );

        // Views built on changed relations are rebuilt with them.
        loop {
            let cascade: Vec<String> = actual_views
                .iter()
                .filter(|(key, view)| {
                    !drop.contains(*key)
                        && view
                            .dependencies
                            .iter()
                            .any(|d| changed_relations.contains(d) || drop.contains(d))
                })
                .map(|(key, _)| key.clone())
                .collect();
            if cascade.is_empty() {
                break;
            }
            for key in cascade {
                if declared_views.contains_key(&key) {
                    create.insert(key.clone());
                }
                drop.insert(key);
            }
        }

        let drop_order = order_by_dependencies(&drop, |key| {
            actual_views
                .get(key)
                .map(|v| v.dependencies.clone())
                .unwrap_or_default()
        });
        for (key, _) in drop_order.into_iter().rev() {
            if let Some(view) = actual_views.get(&key) {
                planned.push((
                    Phase::DropViews,
                    SchemaChange::DropView {
                        view: (*view).clone(),
                    },
                ));
            }
        }

        let create_order = order_by_dependencies(&create, |key| {
            declared_views
                .get(key)
                .map(|v| v.dependencies.clone())
                .unwrap_or_default()
        });
        for (key, _) in create_order {
            if let Some(view) = declared_views.get(&key) {
                planned.push((
                    Phase::CreateViews,
                    SchemaChange::CreateView {
                        view: (*view).clone(),
                    },
                ));
            }
        }
    }
}

/// Computes the changes that transform `actual` into `declared`.
pub fn diff(
    declared: &SchemaModel,
    actual: &SchemaModel,
    dialect: &dyn MigrationDialect,
) -> Result<Vec<SchemaChange>> {
    Differ::new(dialect).diff(declared, actual)
}

// ============================================================================
// Helpers
// ============================================================================

/// Orders `nodes` so that every node follows its dependencies.
///
/// Ties are broken by name. When only cycles remain, the smallest node is
/// emitted anyway together with the dependencies it is still waiting on.
fn order_by_dependencies<F>(nodes: &BTreeSet<String>, dependencies: F) -> Vec<(String, BTreeSet<String>)>
where
    F: Fn(&str) -> BTreeSet<String>,
{
    let edges: BTreeMap<&str, BTreeSet<String>> = nodes
        .iter()
        .map(|node| {
            let mut deps = dependencies(node);
            deps.retain(|d| d != node && nodes.contains(d));
            (node.as_str(), deps)
        })
        .collect();

    let mut remaining: BTreeSet<&str> = nodes.iter().map(String::as_str).collect();
    let mut order = Vec::with_capacity(nodes.len());
    while !remaining.is_empty() {
        let waiting_on = |node: &str| -> BTreeSet<String> {
            edges
                .get(node)
                .map(|deps| {
                    deps.iter()
                        .filter(|d| remaining.contains(d.as_str()))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };
        let ready = remaining.iter().find(|node| waiting_on(node).is_empty());
        let Some(next) = ready.or_else(|| remaining.iter().next()).copied() else {
            break;
        };
        let pending = waiting_on(next);
        remaining.remove(next);
        order.push((next.to_string(), pending));
    }
    order
}

fn referenced_tables(table: Option<&Table>, key: &str, within: &BTreeSet<String>) -> BTreeSet<String> {
    table
        .map(|t| {
            t.foreign_keys
                .iter()
                .map(|fk| fk.referenced_key())
                .filter(|k| k != key && within.contains(k))
                .collect()
        })
        .unwrap_or_default()
}

fn alters_columns(change: &SchemaChange) -> bool {
    matches!(
        change,
        SchemaChange::DropColumn { .. }
            | SchemaChange::ChangeColumn { .. }
            | SchemaChange::RenameColumn { .. }
    )
}

fn same_view(a: &View, b: &View) -> bool {
    a.materialized == b.materialized
        && canonical_expression(&a.expression) == canonical_expression(&b.expression)
}

fn sorted(columns: &[String]) -> Vec<&str> {
    let mut sorted: Vec<&str> = columns.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted
}

fn replace_name(names: &mut [String], from: &str, to: &str) {
    for name in names.iter_mut().filter(|n| *n == from) {
        *name = to.to_string();
    }
}

fn rename_in_table(table: &mut Table, from: &str, to: &str) {
    // The constraint keeps the name it was created under.
    if table.primary_key_name.is_none() && table.get_column(from).is_some_and(|c| c.primary) {
        table.primary_key_name = Some(table.primary_key_constraint());
    }
    for column in table.columns.iter_mut().filter(|c| c.name == from) {
        column.name = to.to_string();
    }
    for index in &mut table.indices {
        replace_name(&mut index.columns, from, to);
    }
    for unique in &mut table.uniques {
        replace_name(&mut unique.columns, from, to);
    }
    for fk in &mut table.foreign_keys {
        replace_name(&mut fk.columns, from, to);
    }
}

/// Columns that use `enum_type` in the database and survive the drop
/// phases. Every one of them must leave the old type before it is dropped,
/// including columns that move to another type later in the run.
fn enum_columns(
    enum_type: &NamedEnumType,
    declared_tables: &BTreeMap<String, &Table>,
    actual_tables: &BTreeMap<String, Table>,
) -> Vec<EnumColumn> {
    let mut columns = Vec::new();
    for (key, existing) in actual_tables {
        if existing.schema != enum_type.schema {
            continue;
        }
        let Some(table) = declared_tables.get(key) else {
            continue;
        };
        for column in &existing.columns {
            if column.enum_name.as_deref() != Some(enum_type.name.as_str()) {
                continue;
            }
            let Some(target) = table.get_column(&column.name) else {
                continue;
            };
            let default = if target.enum_name == column.enum_name {
                target.default.clone()
            } else {
                column.default.clone()
            };
            columns.push(EnumColumn {
                table: TableName::from(*table),
                column: column.name.clone(),
                default,
                is_array: column.is_array,
            });
        }
    }
    columns
}

/// Whether some declared column of `declared` is stored as `actual` today.
fn shares_column(
    declared: &NamedEnumType,
    actual: &NamedEnumType,
    declared_tables: &BTreeMap<String, &Table>,
    actual_tables: &BTreeMap<String, Table>,
) -> bool {
    declared_tables.iter().any(|(key, table)| {
        table.columns.iter().any(|column| {
            column.enum_name.as_deref() == Some(declared.name.as_str())
                && actual_tables
                    .get(key)
                    .and_then(|t| t.get_column(&column.name))
                    .is_some_and(|c| c.enum_name.as_deref() == Some(actual.name.as_str()))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{MysqlDialect, PostgresDialect, SqliteDialect};
    use crate::schema::{Column, ForeignKey, Generation, Index};

    fn users() -> Table {
        Table::new("users")
            .column(Column::new("id", "integer").primary().generated(Generation::Increment))
            .column(Column::new("name", "character varying").length(100).not_null())
    }

    fn posts() -> Table {
        Table::new("posts")
            .column(Column::new("id", "integer").primary().generated(Generation::Increment))
            .column(Column::new("author_id", "integer"))
            .foreign_key(ForeignKey::new(
                "FK_posts_author",
                vec!["author_id".into()],
                "users",
                vec!["id".into()],
            ))
    }

    fn kinds(changes: &[SchemaChange]) -> Vec<String> {
        changes
            .iter()
            .map(|c| {
                let text = format!("{c:?}");
                text.split([' ', '{']).next().unwrap_or_default().to_string()
            })
            .collect()
    }

    #[test]
    fn test_no_changes() {
        let dialect = PostgresDialect::new();
        let model = SchemaModel::new().table(users()).table(posts());
        let changes = diff(&model, &model, &dialect).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_created_tables_follow_references() {
        let dialect = PostgresDialect::new();
        let declared = SchemaModel::new().table(posts()).table(users());
        let changes = diff(&declared, &SchemaModel::new(), &dialect).unwrap();
        match (&changes[0], &changes[1]) {
            (SchemaChange::CreateTable { table: a }, SchemaChange::CreateTable { table: b }) => {
                assert_eq!(a.name, "users");
                assert_eq!(b.name, "posts");
            }
            _ => panic!("Expected two CreateTable changes"),
        }
    }

    #[test]
    fn test_dropped_tables_reverse_references() {
        let dialect = PostgresDialect::new();
        let actual = SchemaModel::new().table(users()).table(posts());
        let changes = diff(&SchemaModel::new(), &actual, &dialect).unwrap();
        let names: Vec<&str> = changes
            .iter()
            .map(|c| match c {
                SchemaChange::DropTable { table } => table.name.as_str(),
                _ => panic!("Expected DropTable"),
            })
            .collect();
        assert_eq!(names, vec!["posts", "users"]);
    }

    #[test]
    fn test_reference_cycle_defers_foreign_key() {
        let dialect = PostgresDialect::new();
        let a = Table::new("a")
            .column(Column::new("id", "integer").primary())
            .column(Column::new("b_id", "integer"))
            .foreign_key(ForeignKey::new("FK_a_b", vec!["b_id".into()], "b", vec!["id".into()]));
        let b = Table::new("b")
            .column(Column::new("id", "integer").primary())
            .column(Column::new("a_id", "integer"))
            .foreign_key(ForeignKey::new("FK_b_a", vec!["a_id".into()], "a", vec!["id".into()]));
        let declared = SchemaModel::new().table(a).table(b);
        let changes = diff(&declared, &SchemaModel::new(), &dialect).unwrap();
        assert_eq!(kinds(&changes), vec!["CreateTable", "CreateTable", "AddForeignKey"]);
        match &changes[0] {
            SchemaChange::CreateTable { table } => {
                assert_eq!(table.name, "a");
                assert!(table.foreign_keys.is_empty());
            }
            _ => panic!("Expected CreateTable"),
        }
    }

    #[test]
    fn test_column_add_drop_change() {
        let dialect = PostgresDialect::new();
        let actual = SchemaModel::new().table(
            users()
                .column(Column::new("legacy", "text"))
                .column(Column::new("age", "integer")),
        );
        let declared = SchemaModel::new().table(
            users()
                .column(Column::new("age", "bigint"))
                .column(Column::new("bio", "text")),
        );
        let changes = diff(&declared, &actual, &dialect).unwrap();
        assert_eq!(kinds(&changes), vec!["DropColumn", "ChangeColumn", "AddColumn"]);
    }

    #[test]
    fn test_explicit_rename() {
        let dialect = PostgresDialect::new();
        let actual = SchemaModel::new().table(users().column(Column::new("bio", "text")));
        let declared = SchemaModel::new().table(users().column(Column::new("about", "text")));

        let guessed = diff(&declared, &actual, &dialect).unwrap();
        assert_eq!(kinds(&guessed), vec!["DropColumn", "AddColumn"]);

        let renamed = Differ::new(&dialect)
            .with_renames(vec![ColumnRename::new("users", "bio", "about")])
            .diff(&declared, &actual)
            .unwrap();
        match renamed.as_slice() {
            [SchemaChange::RenameColumn { from, to, .. }] => {
                assert_eq!(from, "bio");
                assert_eq!(to, "about");
            }
            _ => panic!("Expected a single RenameColumn"),
        }
    }

    #[test]
    fn test_primary_key_drop_uses_catalog_name() {
        let dialect = PostgresDialect::new();
        let actual = SchemaModel::new().table(users().primary_key_named("users_pkey"));
        let declared = SchemaModel::new().table(
            Table::new("users")
                .column(Column::new("uid", "integer").primary().generated(Generation::Increment))
                .column(Column::new("name", "character varying").length(100).not_null().primary()),
        );
        let changes = Differ::new(&dialect)
            .with_renames(vec![ColumnRename::new("users", "id", "uid")])
            .diff(&declared, &actual)
            .unwrap();
        assert_eq!(kinds(&changes), vec!["ChangePrimaryKey", "RenameColumn", "ChangePrimaryKey"]);
        match (&changes[0], &changes[2]) {
            (
                SchemaChange::ChangePrimaryKey { from: Some(from), to: None, .. },
                SchemaChange::ChangePrimaryKey { from: None, to: Some(to), .. },
            ) => {
                assert_eq!(from.name, "users_pkey");
                assert_eq!(from.columns, vec!["id".to_string()]);
                assert_eq!(to.columns, vec!["uid".to_string(), "name".to_string()]);
            }
            _ => panic!("Expected drop then add of the primary key, got {changes:?}"),
        }
    }

    #[test]
    fn test_renamed_primary_key_column_keeps_generated_name() {
        let dialect = PostgresDialect::new();
        let actual = SchemaModel::new().table(users());
        let declared = SchemaModel::new().table(
            Table::new("users")
                .column(Column::new("uid", "integer").primary().generated(Generation::Increment))
                .column(Column::new("name", "character varying").length(100).not_null().primary()),
        );
        let changes = Differ::new(&dialect)
            .with_renames(vec![ColumnRename::new("users", "id", "uid")])
            .diff(&declared, &actual)
            .unwrap();
        let Some(SchemaChange::ChangePrimaryKey { from: Some(from), .. }) = changes.first() else {
            panic!("Expected the primary key drop first, got {changes:?}");
        };
        assert_eq!(from.name, crate::naming::primary_key_name("users", &["id".to_string()]));
    }

    #[test]
    fn test_mysql_inherited_collation_is_not_drift() {
        let dialect = MysqlDialect::new();
        let reported = |collation: &str| {
            let mut column = Column::new("name", "varchar").not_null();
            column.length = Some(255);
            column.charset = Some("utf8mb4".into());
            column.collation = Some(collation.into());
            column
        };
        let mut table = Table::new("users")
            .column(Column::new("id", "int").primary())
            .column(reported("utf8mb4_general_ci"));
        table.collation = Some("utf8mb4_general_ci".into());
        let actual = SchemaModel::new().table(table.clone());
        let declared = SchemaModel::new().table(
            Table::new("users")
                .column(Column::new("id", "int").primary())
                .column(Column::new("name", "varchar").not_null()),
        );
        assert!(diff(&declared, &actual, &dialect).unwrap().is_empty());

        table.columns[1] = reported("utf8mb4_bin");
        let actual = SchemaModel::new().table(table);
        let changes = diff(&declared, &actual, &dialect).unwrap();
        assert_eq!(kinds(&changes), vec!["ChangeColumn"]);
    }

    #[test]
    fn test_rename_of_missing_column_fails() {
        let dialect = PostgresDialect::new();
        let model = SchemaModel::new().table(users());
        let result = Differ::new(&dialect)
            .with_renames(vec![ColumnRename::new("users", "nope", "name")])
            .diff(&model, &model);
        // "name" exists and "nope" does not: treated as already applied.
        assert!(result.unwrap().is_empty());

        let result = Differ::new(&dialect)
            .with_renames(vec![ColumnRename::new("users", "nope", "other")])
            .diff(&model, &model);
        assert!(matches!(result, Err(SchemaError::MalformedSchema(_))));
    }

    #[test]
    fn test_index_change_drops_then_creates() {
        let dialect = PostgresDialect::new();
        let actual =
            SchemaModel::new().table(users().index(Index::new("IDX_name", vec!["name".into()])));
        let declared = SchemaModel::new()
            .table(users().index(Index::new("IDX_name", vec!["name".into()]).unique()));
        let changes = diff(&declared, &actual, &dialect).unwrap();
        assert_eq!(kinds(&changes), vec!["DropIndex", "CreateIndex"]);
    }

    #[test]
    fn test_enum_label_change_alters_type() {
        let dialect = PostgresDialect::new();
        let column = |labels: &[&str]| {
            Column::new("status", "enum")
                .not_null()
                .enumeration(Some("users_status_enum"), labels.iter().copied())
                .default("'A'")
        };
        let enum_type = |labels: &[&str]| NamedEnumType {
            name: "users_status_enum".into(),
            schema: None,
            labels: labels.iter().map(|l| (*l).to_string()).collect(),
        };
        let actual = SchemaModel::new()
            .table(users().column(column(&["A", "B"])))
            .enum_type(enum_type(&["A", "B"]));
        let declared = SchemaModel::new()
            .table(users().column(column(&["A", "B", "C"])))
            .enum_type(enum_type(&["A", "B", "C"]));

        let changes = diff(&declared, &actual, &dialect).unwrap();
        match changes.as_slice() {
            [SchemaChange::AlterEnumType {
                from_labels,
                columns,
                ..
            }] => {
                assert_eq!(from_labels, &vec!["A".to_string(), "B".to_string()]);
                assert_eq!(columns.len(), 1);
                assert_eq!(columns[0].default.as_deref(), Some("'A'"));
            }
            _ => panic!("Expected a single AlterEnumType, got {changes:?}"),
        }
    }

    #[test]
    fn test_enum_alter_repoints_column_moving_away() {
        let dialect = PostgresDialect::new();
        let enum_type = |name: &str, labels: &[&str]| NamedEnumType {
            name: name.into(),
            schema: None,
            labels: labels.iter().map(|l| (*l).to_string()).collect(),
        };
        let column = |name: &str, enum_name: &str, labels: &[&str]| {
            Column::new(name, "enum").enumeration(Some(enum_name), labels.iter().copied())
        };
        let actual = SchemaModel::new()
            .table(
                Table::new("t")
                    .column(Column::new("id", "integer").primary())
                    .column(column("a", "x", &["A", "B"]))
                    .column(column("b", "x", &["A", "B"]).default("'B'")),
            )
            .enum_type(enum_type("x", &["A", "B"]));
        let declared = SchemaModel::new()
            .table(
                Table::new("t")
                    .column(Column::new("id", "integer").primary())
                    .column(column("a", "x", &["A", "B", "C"]))
                    .column(column("b", "y", &["B", "D"])),
            )
            .enum_type(enum_type("x", &["A", "B", "C"]))
            .enum_type(enum_type("y", &["B", "D"]));

        let changes = diff(&declared, &actual, &dialect).unwrap();
        assert_eq!(kinds(&changes), vec!["CreateEnumType", "AlterEnumType", "ChangeColumn"]);
        let SchemaChange::AlterEnumType { columns, .. } = &changes[1] else {
            panic!("Expected AlterEnumType, got {changes:?}");
        };
        let names: Vec<&str> = columns.iter().map(|c| c.column.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(columns[1].default.as_deref(), Some("'B'"));
    }

    #[test]
    fn test_enum_rename_detected_by_usage() {
        let dialect = PostgresDialect::new();
        let column = |name: &str| Column::new("status", "enum").enumeration(Some(name), ["A", "B"]);
        let enum_type = |name: &str| NamedEnumType {
            name: name.into(),
            schema: None,
            labels: vec!["A".into(), "B".into()],
        };
        let actual = SchemaModel::new()
            .table(users().column(column("old_enum")))
            .enum_type(enum_type("old_enum"));
        let declared = SchemaModel::new()
            .table(users().column(column("new_enum")))
            .enum_type(enum_type("new_enum"));
        let changes = diff(&declared, &actual, &dialect).unwrap();
        assert_eq!(kinds(&changes), vec!["RenameEnumType"]);
    }

    #[test]
    fn test_sqlite_collapses_into_recreate() {
        let dialect = SqliteDialect::new();
        let actual = SchemaModel::new().table(users().index(Index::new("IDX_n", vec!["name".into()])));
        let declared = SchemaModel::new().table(
            users()
                .index(Index::new("IDX_n", vec!["name".into()]))
                .index(Index::new("IDX_age", vec!["age".into()]))
                .column(Column::new("age", "integer").not_null()),
        );
        let changes = diff(&declared, &actual, &dialect).unwrap();
        assert_eq!(kinds(&changes), vec!["RecreateTable"]);
    }

    #[test]
    fn test_sqlite_nullable_column_added_in_place() {
        let dialect = SqliteDialect::new();
        let actual = SchemaModel::new().table(users());
        let declared = SchemaModel::new().table(users().column(Column::new("bio", "text")));
        let changes = diff(&declared, &actual, &dialect).unwrap();
        assert_eq!(kinds(&changes), vec!["AddColumn"]);
    }

    #[test]
    fn test_views_follow_dependencies() {
        let dialect = PostgresDialect::new();
        let base = SchemaModel::new().table(users());
        let declared = base
            .clone()
            .view(View::new("b", "SELECT * FROM a").depends_on("a"))
            .view(View::new("a", "SELECT * FROM users").depends_on("users"));
        let created = diff(&declared, &base, &dialect).unwrap();
        let names: Vec<&str> = created
            .iter()
            .map(|c| match c {
                SchemaChange::CreateView { view } => view.name.as_str(),
                _ => panic!("Expected CreateView"),
            })
            .collect();
        assert_eq!(names, vec!["a", "b"]);

        let dropped = diff(&base, &declared, &dialect).unwrap();
        let names: Vec<&str> = dropped
            .iter()
            .map(|c| match c {
                SchemaChange::DropView { view } => view.name.as_str(),
                _ => panic!("Expected DropView"),
            })
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_view_rebuilt_when_base_column_changes() {
        let dialect = PostgresDialect::new();
        let view = View::new("names", "SELECT name FROM users").depends_on("users");
        let actual = SchemaModel::new().table(users()).view(view.clone());
        let widened = Table::new("users")
            .column(Column::new("id", "integer").primary().generated(Generation::Increment))
            .column(Column::new("name", "character varying").length(200).not_null());
        let declared = SchemaModel::new().table(widened).view(view);
        let changes = diff(&declared, &actual, &dialect).unwrap();
        assert_eq!(kinds(&changes), vec!["DropView", "ChangeColumn", "CreateView"]);
    }

    #[test]
    fn test_mysql_recreates_computed_column_constraints() {
        let dialect = MysqlDialect::new();
        let table = |expression: &str| {
            Table::new("t")
                .column(Column::new("id", "int").primary())
                .column(Column::new("a", "int"))
                .column(
                    Column::new("b", "int")
                        .generated_as(expression, crate::schema::GeneratedKind::Stored),
                )
                .index(Index::new("IDX_b", vec!["b".into()]))
        };
        let actual = SchemaModel::new().table(table("a + 1"));
        let declared = SchemaModel::new().table(table("a + 2"));
        let changes = diff(&declared, &actual, &dialect).unwrap();
        assert_eq!(kinds(&changes), vec!["DropIndex", "ChangeColumn", "CreateIndex"]);
    }
}
