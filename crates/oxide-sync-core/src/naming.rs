//! Deterministic names for anonymous constraints and identifier shortening.
//!
//! Every derived name is a pure function of the table and its columns, so
//! projecting the same declarations twice always yields the same names and
//! the differ never sees churn from renamed anonymous constraints.

/// Hex digest of `input`, truncated to `len` characters.
fn digest(input: &str, len: usize) -> String {
    let hex = blake3::hash(input.as_bytes()).to_hex();
    hex.as_str()[..len.min(hex.len())].to_string()
}

fn key(table: &str, columns: &[String]) -> String {
    let mut sorted: Vec<&str> = columns.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    format!("{table}_{}", sorted.join("_"))
}

/// Name of an index without an explicit name.
#[must_use]
pub fn index_name(table: &str, columns: &[String], where_clause: Option<&str>) -> String {
    let mut input = key(table, columns);
    if let Some(condition) = where_clause {
        input.push('_');
        input.push_str(condition);
    }
    format!("IDX_{}", digest(&input, 26))
}

/// Name of a unique constraint without an explicit name.
#[must_use]
pub fn unique_name(table: &str, columns: &[String]) -> String {
    format!("UQ_{}", digest(&key(table, columns), 27))
}

/// Name of a primary key constraint.
#[must_use]
pub fn primary_key_name(table: &str, columns: &[String]) -> String {
    format!("PK_{}", digest(&key(table, columns), 27))
}

/// Name of a check constraint without an explicit name.
#[must_use]
pub fn check_name(table: &str, expression: &str) -> String {
    format!("CHK_{}", digest(&format!("{table}_{expression}"), 26))
}

/// Name of a foreign key without an explicit name.
#[must_use]
pub fn foreign_key_name(
    table: &str,
    columns: &[String],
    referenced_table: &str,
    referenced_columns: &[String],
) -> String {
    let input = format!(
        "{}_{referenced_table}_{}",
        key(table, columns),
        referenced_columns.join("_")
    );
    format!("FK_{}", digest(&input, 27))
}

/// Default name of the enum type backing `table.column`.
#[must_use]
pub fn enum_type_name(table: &str, column: &str) -> String {
    format!("{table}_{}_enum", column.to_lowercase())
}

/// Shortens `name` to at most `max_length` characters.
///
/// Names that already fit are returned unchanged; longer ones keep a prefix
/// and gain `_` plus an 8 character hash of the full name, so the result is
/// stable across runs and distinct for distinct inputs.
#[must_use]
pub fn fit_identifier(name: &str, max_length: Option<usize>) -> String {
    let Some(max) = max_length else {
        return name.to_string();
    };
    if name.chars().count() <= max {
        return name.to_string();
    }
    let suffix = digest(name, 8);
    let keep = max.saturating_sub(suffix.len() + 1);
    let prefix: String = name.chars().take(keep).collect();
    format!("{prefix}_{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_names_are_deterministic() {
        let a = index_name("users", &cols(&["email"]), None);
        let b = index_name("users", &cols(&["email"]), None);
        assert_eq!(a, b);
        assert!(a.starts_with("IDX_"));
        assert_eq!(a.len(), 30);
    }

    #[test]
    fn test_column_order_does_not_change_unique_name() {
        assert_eq!(
            unique_name("t", &cols(&["a", "b"])),
            unique_name("t", &cols(&["b", "a"]))
        );
        assert_ne!(unique_name("t", &cols(&["a"])), unique_name("u", &cols(&["a"])));
    }

    #[test]
    fn test_partial_index_name_differs() {
        assert_ne!(
            index_name("t", &cols(&["a"]), None),
            index_name("t", &cols(&["a"]), Some("a > 0"))
        );
    }

    #[test]
    fn test_fit_identifier() {
        assert_eq!(fit_identifier("short", Some(63)), "short");
        assert_eq!(fit_identifier("anything", None), "anything");

        let long = "a".repeat(80);
        let fitted = fit_identifier(&long, Some(63));
        assert_eq!(fitted.chars().count(), 63);
        assert_eq!(fitted, fit_identifier(&long, Some(63)));
        assert_ne!(fitted, fit_identifier(&"a".repeat(81), Some(63)));
        // Already shortened names are left alone.
        assert_eq!(fit_identifier(&fitted, Some(63)), fitted);
    }

    #[test]
    fn test_enum_type_name() {
        assert_eq!(enum_type_name("users", "Status"), "users_status_enum");
    }
}
