//! Behavioral properties of projection, diffing and synthesis.
//!
//! The "actual" side of each test is the projection of an earlier version
//! of the declarations, standing in for a database built from them.

use oxide_sync_core::prelude::*;

fn dialects() -> Vec<Box<dyn MigrationDialect>> {
    vec![
        Box::new(PostgresDialect::new()),
        Box::new(MysqlDialect::new()),
        Box::new(SqliteDialect::new()),
    ]
}

fn user(extra: Vec<ColumnDeclaration>) -> EntityDeclaration {
    let mut entity = EntityDeclaration::new("User")
        .table("users")
        .column(
            ColumnDeclaration::new("id", "integer")
                .primary()
                .generated(GenerationStrategy::Increment),
        )
        .column(ColumnDeclaration::new("name", "varchar").length(100))
        .column(
            ColumnDeclaration::new("created_at", "timestamp")
                .default(DefaultValue::expression("CURRENT_TIMESTAMP")),
        );
    for column in extra {
        entity = entity.column(column);
    }
    entity
}

fn status(labels: &[&str]) -> ColumnDeclaration {
    ColumnDeclaration::new("status", "enum")
        .enumeration(labels.iter().copied())
        .default(DefaultValue::String("A".into()))
}

fn post() -> EntityDeclaration {
    EntityDeclaration::new("Post")
        .table("posts")
        .column(
            ColumnDeclaration::new("id", "integer")
                .primary()
                .generated(GenerationStrategy::Increment),
        )
        .column(ColumnDeclaration::new("title", "varchar").length(200))
        .column(ColumnDeclaration::new("author_id", "integer").nullable())
        .relation(RelationDeclaration::to("User", ["author_id"]).on_delete(ForeignKeyAction::Cascade))
        .index(IndexDeclaration::on(["title"]))
}

fn kinds(changes: &[SchemaChange]) -> Vec<String> {
    changes
        .iter()
        .map(|c| {
            format!("{c:?}")
                .split([' ', '{'])
                .next()
                .unwrap_or_default()
                .to_string()
        })
        .collect()
}

#[test]
fn test_projection_is_stable_against_itself() {
    let declarations = SchemaDeclaration::new()
        .entity(user(vec![status(&["A", "B"])]))
        .entity(post())
        .view(ViewDeclaration::new("recent_posts", "SELECT * FROM posts WHERE id > 10"));

    for dialect in dialects() {
        let model = project(&declarations, dialect.as_ref()).unwrap();
        let changes = diff(&model, &model, dialect.as_ref()).unwrap();
        assert!(changes.is_empty(), "{}: {changes:?}", dialect.name());
    }
}

#[test]
fn test_empty_database_creates_everything_in_order() {
    let declarations = SchemaDeclaration::new().entity(post()).entity(user(vec![]));
    for dialect in dialects() {
        let model = project(&declarations, dialect.as_ref()).unwrap();
        let changes = diff(&model, &SchemaModel::new(), dialect.as_ref()).unwrap();
        let tables: Vec<&str> = changes
            .iter()
            .filter_map(|c| match c {
                SchemaChange::CreateTable { table } => Some(table.name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(tables, vec!["users", "posts"], "{}", dialect.name());
    }
}

#[test]
fn test_drop_and_add_are_never_merged_into_a_rename() {
    let before = SchemaDeclaration::new()
        .entity(user(vec![ColumnDeclaration::new("bio", "text").nullable()]));
    let after = SchemaDeclaration::new()
        .entity(user(vec![ColumnDeclaration::new("about", "text").nullable()]));

    for dialect in dialects() {
        let actual = project(&before, dialect.as_ref()).unwrap();
        let declared = project(&after, dialect.as_ref()).unwrap();

        let changes = diff(&declared, &actual, dialect.as_ref()).unwrap();
        assert!(
            !changes
                .iter()
                .any(|c| matches!(c, SchemaChange::RenameColumn { .. })),
            "{}",
            dialect.name()
        );

        let renamed = Differ::new(dialect.as_ref())
            .with_renames(vec![ColumnRename::new("users", "bio", "about")])
            .diff(&declared, &actual)
            .unwrap();
        assert_eq!(kinds(&renamed), vec!["RenameColumn"], "{}", dialect.name());
    }
}

#[test]
fn test_enum_label_change_is_one_alter_on_postgres() {
    let dialect = PostgresDialect::new();
    let before = SchemaDeclaration::new().entity(user(vec![status(&["A", "B"])]));
    let after = SchemaDeclaration::new().entity(user(vec![status(&["A", "B", "C"])]));
    let actual = project(&before, &dialect).unwrap();
    let declared = project(&after, &dialect).unwrap();

    let changes = diff(&declared, &actual, &dialect).unwrap();
    assert_eq!(kinds(&changes), vec!["AlterEnumType"]);
    match &changes[0] {
        SchemaChange::AlterEnumType {
            enum_type,
            from_labels,
            columns,
        } => {
            assert_eq!(enum_type.name, "users_status_enum");
            assert_eq!(enum_type.labels, vec!["A", "B", "C"]);
            assert_eq!(from_labels, &vec!["A".to_string(), "B".to_string()]);
            assert_eq!(columns.len(), 1);
            assert_eq!(columns[0].default.as_deref(), Some("'A'"));
        }
        _ => panic!("Expected AlterEnumType"),
    }

    let sql = synthesize(&changes, &dialect, &SynthesisOptions::new().ledger_present(true)).unwrap();
    let enum_statements = sql
        .up_queries
        .iter()
        .filter(|q| q.query.contains("users_status_enum"))
        .count();
    assert!(enum_statements >= 4);
    assert!(!sql.up_queries.iter().any(|q| q.query.contains("DROP COLUMN")));
}

#[test]
fn test_enum_label_change_has_no_default_churn_elsewhere() {
    let before = SchemaDeclaration::new().entity(user(vec![status(&["A", "B"])]));
    let after = SchemaDeclaration::new().entity(user(vec![status(&["A", "B", "C"])]));

    let dialect = MysqlDialect::new();
    let changes = diff(
        &project(&after, &dialect).unwrap(),
        &project(&before, &dialect).unwrap(),
        &dialect,
    )
    .unwrap();
    match changes.as_slice() {
        [SchemaChange::ChangeColumn { changes, .. }] => {
            assert!(changes.data_type);
            assert!(!changes.default);
        }
        _ => panic!("Expected a single ChangeColumn, got {changes:?}"),
    }

    let dialect = SqliteDialect::new();
    let changes = diff(
        &project(&after, &dialect).unwrap(),
        &project(&before, &dialect).unwrap(),
        &dialect,
    )
    .unwrap();
    assert_eq!(kinds(&changes), vec!["RecreateTable"]);
}

#[test]
fn test_view_chain_ordering() {
    let base = SchemaDeclaration::new().entity(
        EntityDeclaration::new("T")
            .table("t")
            .column(ColumnDeclaration::new("id", "integer").primary()),
    );
    let with_views = base
        .clone()
        .view(ViewDeclaration::new("b", "SELECT * FROM a").depends_on("a"))
        .view(ViewDeclaration::new("a", "SELECT * FROM t").depends_on("T"));

    let dialect = PostgresDialect::new();
    let declared = project(&with_views, &dialect).unwrap();
    let changes = diff(&declared, &SchemaModel::new(), &dialect).unwrap();
    let up: Vec<String> = changes.iter().map(SchemaChange::description).collect();
    assert_eq!(up, vec!["Create table t", "Create view a", "Create view b"]);

    let sql = synthesize(&changes, &dialect, &SynthesisOptions::new()).unwrap();
    let drops: Vec<&str> = sql
        .down_in_execution_order()
        .map(|q| q.query.as_str())
        .filter(|q| q.starts_with("DROP"))
        .collect();
    assert_eq!(drops, vec!["DROP VIEW \"b\"", "DROP VIEW \"a\"", "DROP TABLE \"t\""]);
}

#[test]
fn test_adding_bio_is_one_add_column() {
    let before = SchemaDeclaration::new().entity(user(vec![]));
    let after = SchemaDeclaration::new()
        .entity(user(vec![ColumnDeclaration::new("bio", "text").nullable()]));

    for dialect in dialects() {
        let actual = project(&before, dialect.as_ref()).unwrap();
        let declared = project(&after, dialect.as_ref()).unwrap();
        let changes = diff(&declared, &actual, dialect.as_ref()).unwrap();
        assert_eq!(kinds(&changes), vec!["AddColumn"], "{}", dialect.name());

        let sql = synthesize(&changes, dialect.as_ref(), &SynthesisOptions::new()).unwrap();
        assert_eq!(sql.up_queries.len(), 1);
        assert_eq!(sql.down_queries.len(), 1);
        assert!(sql.up_queries[0].query.contains("ADD COLUMN"));
        assert!(sql.down_queries[0].query.contains("DROP COLUMN"));
    }
}
