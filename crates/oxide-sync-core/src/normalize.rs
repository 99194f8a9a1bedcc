//! Canonical forms for comparing declared and introspected schema values.
//!
//! Catalogs report types, defaults and expressions in their own spelling
//! (`int4`, `('abc'::character varying)`, `now()`, `((age > 18))`). The
//! differ compares the canonical forms produced here, never the raw text,
//! so equivalent spellings do not register as drift. Canonical strings are
//! only ever compared, never rendered into SQL.

use std::collections::BTreeMap;

use crate::dialect::MigrationDialect;
use crate::operations::ColumnChanges;
use crate::schema::{CheckConstraint, Column, ForeignKey, Generation, Index, UniqueConstraint};

const fn is_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$'
}

/// Lowercases code outside string literals, removes comments and
/// identifier quotes, and keeps whitespace only between two word
/// characters.
fn canonical_code(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let mut out = String::with_capacity(input.len());
    let mut pending_space = false;
    let mut i = 0;

    while i < len {
        let c = chars[i];
        match c {
            '\'' => {
                pending_space = false;
                out.push('\'');
                i += 1;
                while i < len {
                    let ch = chars[i];
                    out.push(ch);
                    i += 1;
                    if ch == '\'' {
                        if i < len && chars[i] == '\'' {
                            out.push('\'');
                            i += 1;
                        } else {
                            break;
                        }
                    }
                }
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < len && chars[i] != '\n' {
                    i += 1;
                }
                pending_space = true;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i + 1 < len && !(chars[i] == '*' && chars[i + 1] == '/') {
                    i += 1;
                }
                i = (i + 2).min(len);
                pending_space = true;
            }
            '"' | '`' => i += 1,
            c if c.is_whitespace() => {
                pending_space = true;
                i += 1;
            }
            c => {
                if pending_space && out.chars().last().is_some_and(is_word) && is_word(c) {
                    out.push(' ');
                }
                pending_space = false;
                out.push(c.to_ascii_lowercase());
                i += 1;
            }
        }
    }
    out
}

/// Skips a type name following `::` and returns the index after it.
fn skip_type_name(chars: &[char], mut i: usize) -> usize {
    const CONTINUATIONS: [&str; 6] = ["varying", "precision", "without", "with", "time", "zone"];

    loop {
        let start = i;
        while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
        {
            i += 1;
        }
        if i == start || chars.get(i) != Some(&' ') {
            break;
        }
        let next: String = chars[i + 1..]
            .iter()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect();
        if CONTINUATIONS.contains(&next.as_str()) {
            i += 1;
        } else {
            break;
        }
    }
    if chars.get(i) == Some(&'(') {
        let mut j = i + 1;
        while j < chars.len() && (chars[j].is_ascii_digit() || chars[j] == ',') {
            j += 1;
        }
        if chars.get(j) == Some(&')') {
            i = j + 1;
        }
    }
    while chars.get(i) == Some(&'[') && chars.get(i + 1) == Some(&']') {
        i += 2;
    }
    i
}

/// Removes Postgres `::type` casts outside string literals.
fn strip_casts(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    let mut out = String::with_capacity(code.len());
    let mut in_literal = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            in_literal = !in_literal;
        } else if !in_literal && c == ':' && chars.get(i + 1) == Some(&':') {
            i = skip_type_name(&chars, i + 2);
            continue;
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Drops parentheses around a bare number that is not a call argument,
/// as Postgres writes `(0)::numeric` for a declared `0`.
fn unwrap_numbers(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    let mut out = String::with_capacity(code.len());
    let mut in_literal = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            in_literal = !in_literal;
        } else if !in_literal && c == '(' && !out.chars().last().is_some_and(is_word) {
            let start = i + 1 + usize::from(chars.get(i + 1) == Some(&'-'));
            let mut end = start;
            while end < chars.len() && (chars[end].is_ascii_digit() || chars[end] == '.') {
                end += 1;
            }
            if end > start && chars.get(end) == Some(&')') {
                out.extend(&chars[i + 1..end]);
                i = end + 1;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Strips parentheses that wrap the whole expression, repeatedly.
#[must_use]
pub fn strip_outer_parens(expression: &str) -> &str {
    let mut current = expression.trim();
    loop {
        if !(current.starts_with('(') && current.ends_with(')')) {
            return current;
        }
        let mut depth = 0usize;
        let mut in_literal = false;
        let mut closes_at_end = false;
        for (idx, c) in current.char_indices() {
            match c {
                '\'' => in_literal = !in_literal,
                '(' if !in_literal => depth += 1,
                ')' if !in_literal => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        closes_at_end = idx == current.len() - 1;
                        break;
                    }
                }
                _ => {}
            }
        }
        if !closes_at_end {
            return current;
        }
        current = current[1..current.len() - 1].trim();
    }
}

/// Canonical form of a SQL expression (checks, views, partial index
/// conditions, computed columns).
#[must_use]
pub fn canonical_expression(expression: &str) -> String {
    let code = unwrap_numbers(&strip_casts(&canonical_code(expression)));
    let trimmed = code.trim().trim_end_matches(';').trim();
    strip_outer_parens(trimmed).to_string()
}

/// Returns true for numeric type names.
#[must_use]
pub fn is_numeric_type(data_type: &str) -> bool {
    matches!(
        data_type,
        "integer"
            | "int"
            | "int2"
            | "int4"
            | "int8"
            | "smallint"
            | "bigint"
            | "tinyint"
            | "mediumint"
            | "decimal"
            | "numeric"
            | "real"
            | "float"
            | "double"
            | "double precision"
    )
}

/// Returns true for character type names that carry a length.
#[must_use]
pub fn is_character_type(data_type: &str) -> bool {
    matches!(
        data_type,
        "varchar"
            | "character varying"
            | "char"
            | "character"
            | "nchar"
            | "nvarchar"
            | "varbinary"
            | "binary"
            | "bit"
    )
}

fn is_boolean_type(data_type: &str) -> bool {
    matches!(data_type, "boolean" | "bool" | "tinyint" | "bit")
}

fn canonical_number(text: &str) -> Option<String> {
    let inner = text
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(text);
    if let Ok(int) = inner.parse::<i64>() {
        return Some(int.to_string());
    }
    inner.parse::<f64>().ok().map(|f| f.to_string())
}

fn canonical_timestamp(text: &str) -> Option<String> {
    match text {
        "now()" | "current_timestamp()" | "transaction_timestamp()" => {
            Some("current_timestamp".to_string())
        }
        _ => text
            .strip_prefix("now(")
            .map(|rest| format!("current_timestamp({rest}")),
    }
}

/// Canonical form of a column default, or `None` when the column has no
/// effective default.
#[must_use]
pub fn canonical_default(
    dialect: &dyn MigrationDialect,
    column: &Column,
    default: Option<&str>,
) -> Option<String> {
    let raw = default?.trim();
    if raw.is_empty() {
        return None;
    }
    let text = canonical_expression(raw);
    if text == "null" {
        return None;
    }
    if let Some(timestamp) = canonical_timestamp(&text) {
        return Some(timestamp);
    }

    let data_type = dialect.normalize_type(&column.data_type);
    if is_boolean_type(&data_type) {
        match text.as_str() {
            "true" | "'t'" | "'true'" | "1" | "'1'" | "b'1'" => return Some("true".into()),
            "false" | "'f'" | "'false'" | "0" | "'0'" | "b'0'" => return Some("false".into()),
            _ => {}
        }
    }
    if is_numeric_type(&data_type) {
        if let Some(number) = canonical_number(&text) {
            return Some(number);
        }
    }
    Some(text)
}

/// Generation strategy as the dialect can actually observe it.
#[must_use]
pub fn canonical_generation(dialect: &dyn MigrationDialect, column: &Column) -> Option<Generation> {
    let caps = dialect.capabilities();
    match column.generation {
        Some(Generation::Uuid) if !caps.database_uuid => None,
        Some(Generation::Identity(_)) if !caps.identity_columns => Some(Generation::Increment),
        other => other,
    }
}

fn same_length(
    dialect: &dyn MigrationDialect,
    data_type: &str,
    declared: Option<u32>,
    actual: Option<u32>,
) -> bool {
    if !is_character_type(data_type) {
        return true;
    }
    let fallback = dialect.default_length(data_type);
    declared.or(fallback) == actual.or(fallback)
}

fn same_precision(
    dialect: &dyn MigrationDialect,
    data_type: &str,
    declared: &Column,
    actual: &Column,
) -> bool {
    if !matches!(data_type, "decimal" | "numeric") {
        return true;
    }
    let fallback = dialect.default_precision(data_type);
    let effective = |column: &Column| {
        column
            .precision
            .map(|p| (p, column.scale.unwrap_or(0)))
            .or(fallback)
    };
    effective(declared) == effective(actual)
}

fn same_optional_text(declared: Option<&str>, actual: Option<&str>) -> bool {
    match (declared, actual) {
        (None, None) => true,
        (Some(d), Some(a)) => d.eq_ignore_ascii_case(a),
        _ => false,
    }
}

fn charset_of(collation: &str) -> String {
    collation.split('_').next().unwrap_or(collation).to_string()
}

/// Fills in the charset and collation a column inherits from its table
/// when the declaration leaves them out.
///
/// Only applies where the catalog reports a collation on the column, which
/// MySQL does for every character column. A declared charset without a
/// collation takes that charset's default collation.
#[must_use]
pub fn inherit_collation(
    declared: &Column,
    actual: &Column,
    table_collation: Option<&str>,
    default_collations: &BTreeMap<String, String>,
) -> Column {
    let mut column = declared.clone();
    if actual.collation.is_none() {
        return column;
    }
    match (&declared.charset, &declared.collation) {
        (None, None) => {
            column.collation = table_collation.map(str::to_string);
            column.charset = table_collation.map(charset_of);
        }
        (Some(charset), None) => {
            column.collation = default_collations.get(charset).cloned().or_else(|| {
                table_collation
                    .filter(|t| charset_of(t).eq_ignore_ascii_case(charset))
                    .map(str::to_string)
            });
        }
        (None, Some(collation)) => column.charset = Some(charset_of(collation)),
        (Some(_), Some(_)) => {}
    }
    column
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.filter(|t| !t.is_empty())
}

/// Compares a declared column against its introspected counterpart.
///
/// Length counts for character types and precision for decimal types, the
/// modifiers that are rendered. An omitted one stands for the value the
/// dialect assumes for the type; anything else the declared side leaves out must
/// also be absent in the database. Primary key membership and column-level
/// uniqueness are compared at the table level instead.
#[must_use]
pub fn column_changes(
    dialect: &dyn MigrationDialect,
    declared: &Column,
    actual: &Column,
) -> ColumnChanges {
    let caps = dialect.capabilities();
    let declared_type = dialect.normalize_type(&declared.data_type);
    let actual_type = dialect.normalize_type(&actual.data_type);

    let enum_differs = if declared.is_enum() || actual.is_enum() {
        if caps.named_enum_types {
            declared.enum_name != actual.enum_name
        } else {
            declared.enum_values != actual.enum_values
        }
    } else {
        false
    };
    // No catalog reader reports geometry subtypes, so they count only when present.
    let spatial_differs = actual.spatial_type.is_some()
        && (!same_optional_text(declared.spatial_type.as_deref(), actual.spatial_type.as_deref())
            || declared.srid != actual.srid);
    let data_type = declared_type != actual_type
        || declared.is_array != actual.is_array
        || enum_differs
        || !same_precision(dialect, &declared_type, declared, actual)
        || !same_length(dialect, &declared_type, declared.length, actual.length)
        || !same_optional_text(declared.charset.as_deref(), actual.charset.as_deref())
        || !same_optional_text(declared.collation.as_deref(), actual.collation.as_deref())
        || spatial_differs;

    let computed = match (&declared.generated_as, &actual.generated_as) {
        (None, None) => false,
        (Some(d), Some(a)) => {
            d.kind != a.kind || canonical_expression(&d.expression) != canonical_expression(&a.expression)
        }
        _ => true,
    };

    let default = declared.generated_as.is_none()
        && canonical_default(dialect, declared, declared.default.as_deref())
            != canonical_default(dialect, actual, actual.default.as_deref());

    let on_update = declared.on_update.as_deref().map(canonical_expression)
        != actual.on_update.as_deref().map(canonical_expression);

    ColumnChanges {
        data_type,
        nullable: declared.nullable != actual.nullable,
        default,
        generation: canonical_generation(dialect, declared) != canonical_generation(dialect, actual),
        computed,
        comment: caps.comments
            && non_empty(declared.comment.as_deref()) != non_empty(actual.comment.as_deref()),
        on_update,
    }
}

/// Compares two indices with the same name.
#[must_use]
pub fn same_index(declared: &Index, actual: &Index) -> bool {
    declared.columns == actual.columns
        && declared.unique == actual.unique
        && declared.spatial == actual.spatial
        && declared.fulltext == actual.fulltext
        && declared.where_clause.as_deref().map(canonical_expression)
            == actual.where_clause.as_deref().map(canonical_expression)
        && declared.expression.as_deref().map(canonical_expression)
            == actual.expression.as_deref().map(canonical_expression)
}

/// Compares two foreign keys with the same name.
#[must_use]
pub fn same_foreign_key(
    dialect: &dyn MigrationDialect,
    declared: &ForeignKey,
    actual: &ForeignKey,
) -> bool {
    let deferrable_matches =
        !dialect.capabilities().deferrable_constraints || declared.deferrable == actual.deferrable;
    declared.columns == actual.columns
        && declared.referenced_table == actual.referenced_table
        && declared.referenced_schema == actual.referenced_schema
        && declared.referenced_columns == actual.referenced_columns
        && dialect.normalize_fk_action(declared.on_delete)
            == dialect.normalize_fk_action(actual.on_delete)
        && dialect.normalize_fk_action(declared.on_update)
            == dialect.normalize_fk_action(actual.on_update)
        && deferrable_matches
}

/// Compares two unique constraints with the same name.
#[must_use]
pub fn same_unique(declared: &UniqueConstraint, actual: &UniqueConstraint) -> bool {
    let mut a = declared.columns.clone();
    let mut b = actual.columns.clone();
    a.sort();
    b.sort();
    a == b
}

/// Compares two check constraints with the same name.
#[must_use]
pub fn same_check(declared: &CheckConstraint, actual: &CheckConstraint) -> bool {
    canonical_expression(&declared.expression) == canonical_expression(&actual.expression)
}

/// Whether `expression` refers to `column` as a bare identifier.
#[must_use]
pub fn mentions_column(expression: &str, column: &str) -> bool {
    let column = column.to_lowercase();
    canonical_expression(expression)
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .any(|token| token == column)
}

/// Splits a catalog type string such as `varchar(255)` or
/// `decimal(10, 2) unsigned` into the lowercased base name and up to two
/// numeric arguments.
#[must_use]
pub fn split_type(raw: &str) -> (String, Option<u32>, Option<u32>) {
    let raw = raw.trim().to_lowercase();
    let (Some(open), Some(close)) = (raw.find('('), raw.rfind(')')) else {
        return (raw, None, None);
    };
    if close < open {
        return (raw, None, None);
    }
    let base = format!("{} {}", raw[..open].trim(), raw[close + 1..].trim());
    let mut args = raw[open + 1..close]
        .split(',')
        .map(|arg| arg.trim().parse::<u32>().ok());
    let first = args.next().flatten();
    let second = args.next().flatten();
    (base.trim().to_string(), first, second)
}
