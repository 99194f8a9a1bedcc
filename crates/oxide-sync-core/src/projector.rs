//! Metadata projector: builds the declared [`SchemaModel`] from entity and
//! view declarations.
//!
//! Projection is pure. Every reference between declarations is resolved
//! here; anything that cannot be resolved fails with
//! [`SchemaError::MetadataResolution`] before the differ ever runs.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::declaration::{
    ColumnDeclaration, EntityDeclaration, GenerationStrategy, SchemaDeclaration, ViewDeclaration,
};
use crate::dialect::MigrationDialect;
use crate::error::{Result, SchemaError};
use crate::naming;
use crate::schema::{
    qualify, CheckConstraint, Column, ForeignKey, Generation, IdentityPolicy, Index,
    NamedEnumType, SchemaModel, Table, UniqueConstraint, View,
};

/// Projects declarations into a schema model for one dialect.
pub struct Projector<'a> {
    dialect: &'a dyn MigrationDialect,
}

impl<'a> Projector<'a> {
    /// Creates a projector for `dialect`.
    #[must_use]
    pub fn new(dialect: &'a dyn MigrationDialect) -> Self {
        Self { dialect }
    }

    fn fit(&self, name: &str) -> String {
        naming::fit_identifier(name, self.dialect.capabilities().max_identifier_length)
    }

    fn schema_of(&self, schema: Option<&String>) -> Option<String> {
        if self.dialect.capabilities().schemas {
            schema.cloned()
        } else {
            None
        }
    }

    /// Projects every synchronized entity and every view.
    pub fn project(&self, declarations: &SchemaDeclaration) -> Result<SchemaModel> {
        let mut model = SchemaModel::new();
        let mut enum_types: BTreeMap<String, NamedEnumType> = BTreeMap::new();

        for entity in &declarations.entities {
            if !entity.synchronize {
                debug!(entity = %entity.name, "Skipping unsynchronized entity");
                continue;
            }
            let table = self.table(entity, declarations, &mut enum_types)?;
            model.tables.push(table);
        }

        for view in &declarations.views {
            let projected = self.view(view, declarations)?;
            model.views.push(projected);
        }

        model.enum_types = enum_types.into_values().collect();
        model.validate(true)?;
        Ok(model)
    }

    fn table(
        &self,
        entity: &EntityDeclaration,
        declarations: &SchemaDeclaration,
        enum_types: &mut BTreeMap<String, NamedEnumType>,
    ) -> Result<Table> {
        let caps = self.dialect.capabilities();
        let name = self.fit(entity.table_name());
        let mut table = Table::new(name.clone());
        table.schema = self.schema_of(entity.schema.as_ref());

        for declared in &entity.columns {
            let column = self.column(entity, &table, declared, enum_types)?;
            if column.unique && !column.primary {
                let columns = vec![column.name.clone()];
                table.uniques.push(UniqueConstraint {
                    name: self.fit(&naming::unique_name(&name, &columns)),
                    columns,
                });
            }
            table.columns.push(column);
        }

        let require_columns = |columns: &[String], what: &str| -> Result<()> {
            match columns.iter().find(|c| !entity.columns.iter().any(|d| &d.name == *c)) {
                Some(missing) => Err(SchemaError::resolution(
                    &entity.name,
                    format!("{what} references unknown column '{missing}'"),
                )),
                None => Ok(()),
            }
        };

        for unique in &entity.uniques {
            require_columns(&unique.columns, "unique constraint")?;
            let constraint_name = unique
                .name
                .clone()
                .unwrap_or_else(|| naming::unique_name(&name, &unique.columns));
            table.uniques.push(UniqueConstraint {
                name: self.fit(&constraint_name),
                columns: unique.columns.clone(),
            });
        }

        for index in &entity.indices {
            if index.expression.is_none() {
                if index.columns.is_empty() {
                    return Err(SchemaError::resolution(&entity.name, "index without columns"));
                }
                require_columns(&index.columns, "index")?;
            }
            let index_name = index.name.clone().unwrap_or_else(|| {
                let key = index.expression.as_ref().map_or_else(
                    || index.columns.clone(),
                    |expression| vec![expression.clone()],
                );
                naming::index_name(&name, &key, index.where_clause.as_deref())
            });
            table.indices.push(Index {
                name: self.fit(&index_name),
                columns: index.columns.clone(),
                unique: index.unique,
                spatial: index.spatial,
                fulltext: index.fulltext,
                where_clause: index.where_clause.clone(),
                expression: index.expression.clone(),
            });
        }

        for check in &entity.checks {
            let check_name = check
                .name
                .clone()
                .unwrap_or_else(|| naming::check_name(&name, &check.expression));
            table.checks.push(CheckConstraint {
                name: self.fit(&check_name),
                expression: check.expression.clone(),
            });
        }

        for relation in &entity.relations {
            require_columns(&relation.columns, "relation")?;
            let target = find_entity(declarations, &relation.target).ok_or_else(|| {
                SchemaError::resolution(
                    &entity.name,
                    format!("relation target '{}' is not declared", relation.target),
                )
            })?;
            if !target.synchronize {
                return Err(SchemaError::resolution(
                    &entity.name,
                    format!(
                        "relation target '{}' is excluded from synchronization",
                        relation.target
                    ),
                ));
            }

            let referenced_columns = if relation.referenced_columns.is_empty() {
                target
                    .columns
                    .iter()
                    .filter(|c| c.primary)
                    .map(|c| c.name.clone())
                    .collect()
            } else {
                relation.referenced_columns.clone()
            };
            if referenced_columns.is_empty() {
                return Err(SchemaError::resolution(
                    &entity.name,
                    format!("relation target '{}' has no primary key", target.name),
                ));
            }
            if let Some(missing) = referenced_columns
                .iter()
                .find(|c| !target.columns.iter().any(|d| &d.name == *c))
            {
                return Err(SchemaError::resolution(
                    &entity.name,
                    format!("relation references unknown column '{}.{missing}'", target.name),
                ));
            }
            if referenced_columns.len() != relation.columns.len() {
                return Err(SchemaError::resolution(
                    &entity.name,
                    format!(
                        "relation to '{}' maps {} columns onto {}",
                        target.name,
                        relation.columns.len(),
                        referenced_columns.len()
                    ),
                ));
            }

            let target_table = self.fit(target.table_name());
            let fk_name = relation.name.clone().unwrap_or_else(|| {
                naming::foreign_key_name(&name, &relation.columns, &target_table, &referenced_columns)
            });
            table.foreign_keys.push(ForeignKey {
                name: self.fit(&fk_name),
                columns: relation.columns.clone(),
                referenced_schema: self.schema_of(target.schema.as_ref()),
                referenced_table: target_table,
                referenced_columns,
                on_delete: relation.on_delete,
                on_update: relation.on_update,
                deferrable: relation.deferrable.filter(|_| caps.deferrable_constraints),
            });
        }

        if !caps.unique_constraints {
            let uniques = std::mem::take(&mut table.uniques);
            table.indices.extend(
                uniques
                    .into_iter()
                    .map(|u| Index::new(u.name, u.columns).unique()),
            );
        }

        Ok(table)
    }

    fn column(
        &self,
        entity: &EntityDeclaration,
        table: &Table,
        declared: &ColumnDeclaration,
        enum_types: &mut BTreeMap<String, NamedEnumType>,
    ) -> Result<Column> {
        let caps = self.dialect.capabilities();
        let raw_type = declared.data_type.trim().to_lowercase();
        let is_enum =
            raw_type == "enum" || raw_type == "simple-enum" || !declared.enum_values.is_empty();

        let mut column = Column::new(
            declared.name.clone(),
            if is_enum {
                "enum".to_string()
            } else {
                self.dialect.normalize_type(&raw_type)
            },
        );
        column.nullable = declared.nullable && !declared.primary;
        column.primary = declared.primary;
        column.unique = declared.unique;
        column.length = declared.length.or_else(|| self.dialect.implied_length(&raw_type));
        column.precision = declared.precision;
        column.scale = declared.scale;
        column.default = declared
            .default
            .as_ref()
            .and_then(|value| self.dialect.render_default(value));
        column.generated_as = declared.generated_as.clone();
        column.comment = declared.comment.clone();
        column.charset = declared.charset.clone();
        column.collation = declared.collation.clone();
        column.is_array = declared.array;
        column.spatial_type = declared.spatial_type.clone();
        column.srid = declared.srid;
        column.on_update = declared.on_update.clone();
        column.generation = match declared.generated {
            Some(GenerationStrategy::Increment) => Some(Generation::Increment),
            Some(GenerationStrategy::Uuid) => Some(Generation::Uuid),
            Some(GenerationStrategy::Identity) if caps.identity_columns => Some(
                Generation::Identity(declared.identity.unwrap_or(IdentityPolicy::ByDefault)),
            ),
            Some(GenerationStrategy::Identity) => Some(Generation::Increment),
            None => None,
        };

        if is_enum {
            if declared.enum_values.is_empty() {
                return Err(SchemaError::resolution(
                    &entity.name,
                    format!("enum column '{}' has no labels", declared.name),
                ));
            }
            column.enum_values = declared.enum_values.clone();
            if caps.named_enum_types {
                let enum_name = self.fit(
                    &declared
                        .enum_name
                        .clone()
                        .unwrap_or_else(|| naming::enum_type_name(&table.name, &declared.name)),
                );
                let enum_type = NamedEnumType {
                    name: enum_name.clone(),
                    schema: table.schema.clone(),
                    labels: declared.enum_values.clone(),
                };
                match enum_types.get(&enum_type.key()) {
                    Some(existing) if existing.labels != enum_type.labels => {
                        return Err(SchemaError::resolution(
                            &entity.name,
                            format!(
                                "enum type '{}' is declared with different labels",
                                enum_type.name
                            ),
                        ));
                    }
                    Some(_) => {}
                    None => {
                        enum_types.insert(enum_type.key(), enum_type);
                    }
                }
                column.enum_name = Some(enum_name);
            }
        }
        Ok(column)
    }

    fn view(&self, view: &ViewDeclaration, declarations: &SchemaDeclaration) -> Result<View> {
        let mut projected = View::new(self.fit(&view.name), view.expression.clone());
        projected.schema = self.schema_of(view.schema.as_ref());
        projected.materialized = view.materialized;

        for dependency in &view.dependencies {
            let key = self.relation_key(declarations, dependency).ok_or_else(|| {
                SchemaError::resolution(
                    &view.name,
                    format!("view dependency '{dependency}' is not declared"),
                )
            })?;
            projected.dependencies.insert(key);
        }
        for referenced in referenced_relations(&view.expression) {
            if let Some(key) = self.relation_key(declarations, &referenced) {
                projected.dependencies.insert(key);
            }
        }
        projected.dependencies.remove(&projected.key());
        Ok(projected)
    }

    /// Resolves an entity, table or view name to a model key.
    fn relation_key(&self, declarations: &SchemaDeclaration, name: &str) -> Option<String> {
        if let Some(entity) = find_entity(declarations, name) {
            return Some(qualify(
                self.schema_of(entity.schema.as_ref()).as_deref(),
                &self.fit(entity.table_name()),
            ));
        }
        declarations
            .views
            .iter()
            .find(|v| {
                v.name.eq_ignore_ascii_case(name)
                    || qualify(v.schema.as_deref(), &v.name).eq_ignore_ascii_case(name)
            })
            .map(|v| qualify(self.schema_of(v.schema.as_ref()).as_deref(), &self.fit(&v.name)))
    }
}

/// Projects declarations for `dialect`.
pub fn project(
    declarations: &SchemaDeclaration,
    dialect: &dyn MigrationDialect,
) -> Result<SchemaModel> {
    Projector::new(dialect).project(declarations)
}

fn find_entity<'d>(declarations: &'d SchemaDeclaration, name: &str) -> Option<&'d EntityDeclaration> {
    declarations.entities.iter().find(|e| {
        e.name == name
            || e.table_name().eq_ignore_ascii_case(name)
            || qualify(e.schema.as_deref(), e.table_name()).eq_ignore_ascii_case(name)
    })
}

/// Names following `FROM` or `JOIN` in a SELECT statement.
///
/// Quotes are stripped and case is kept; callers match the result against
/// known relation keys.
#[must_use]
pub fn referenced_relations(expression: &str) -> BTreeSet<String> {
    let cleaned: String = expression
        .chars()
        .filter(|c| !matches!(c, '"' | '`' | '[' | ']'))
        .map(|c| match c {
            '(' | ')' | ',' | ';' => ' ',
            other => other,
        })
        .collect();
    let tokens: Vec<&str> = cleaned.split_whitespace().collect();
    tokens
        .windows(2)
        .filter(|pair| {
            pair[0].eq_ignore_ascii_case("from") || pair[0].eq_ignore_ascii_case("join")
        })
        .map(|pair| pair[1].to_string())
        .filter(|name| !name.eq_ignore_ascii_case("select") && !name.eq_ignore_ascii_case("lateral"))
        .collect()
}
