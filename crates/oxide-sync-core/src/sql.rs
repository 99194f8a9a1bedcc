//! Rendered SQL statements and the up/down queue pair.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Integer(i64),
    /// Floating point.
    Real(f64),
    /// Text.
    Text(String),
}

impl SqlValue {
    /// Returns the text content, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as an integer, parsing text when needed.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Text(s) => s.trim().parse().ok(),
            #[allow(clippy::cast_possible_truncation)]
            Self::Real(f) => Some(*f as i64),
            Self::Null => None,
        }
    }

    /// Interprets the value as a boolean (`YES`, `t`, `1`, `true`).
    #[must_use]
    pub fn as_bool(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Integer(i) => *i != 0,
            Self::Text(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "yes" | "y" | "t" | "true" | "1"
            ),
            Self::Real(f) => *f != 0.0,
            Self::Null => false,
        }
    }

    /// Returns true for SQL NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Option<&str>> for SqlValue {
    fn from(value: Option<&str>) -> Self {
        value.map_or(Self::Null, Self::from)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

/// One SQL statement with its bound parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlQuery {
    /// Statement text.
    pub query: String,
    /// Positional parameters.
    pub parameters: Vec<SqlValue>,
}

impl SqlQuery {
    /// A statement without parameters.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            parameters: Vec::new(),
        }
    }

    /// A statement with parameters.
    #[must_use]
    pub fn with_parameters(query: impl Into<String>, parameters: Vec<SqlValue>) -> Self {
        Self {
            query: query.into(),
            parameters,
        }
    }
}

impl fmt::Display for SqlQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parameters.is_empty() {
            write!(f, "{};", self.query)
        } else {
            let params = serde_json::to_string(&self.parameters).map_err(|_| fmt::Error)?;
            write!(f, "{}; -- PARAMETERS: {params}", self.query)
        }
    }
}

/// The queue pair produced by synthesis.
///
/// `down_queries` is kept in the same order as `up_queries`: the entries
/// for each operation are its inverse statements. Execute
/// [`SqlInMemory::down_in_execution_order`] to revert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlInMemory {
    /// Statements that apply the change.
    pub up_queries: Vec<SqlQuery>,
    /// Statements that revert the change.
    pub down_queries: Vec<SqlQuery>,
}

impl SqlInMemory {
    /// Returns true when there is nothing to run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.up_queries.is_empty() && self.down_queries.is_empty()
    }

    /// Down statements in the order they must run.
    pub fn down_in_execution_order(&self) -> impl Iterator<Item = &SqlQuery> {
        self.down_queries.iter().rev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_shape() {
        let sql = SqlInMemory {
            up_queries: vec![SqlQuery::with_parameters(
                "INSERT INTO t VALUES (?)",
                vec![SqlValue::from("v")],
            )],
            down_queries: vec![],
        };
        let json = serde_json::to_value(&sql).unwrap();
        assert_eq!(json["upQueries"][0]["query"], "INSERT INTO t VALUES (?)");
        assert_eq!(json["upQueries"][0]["parameters"][0], "v");
        assert!(json["downQueries"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_down_execution_order() {
        let sql = SqlInMemory {
            up_queries: vec![SqlQuery::new("A"), SqlQuery::new("B")],
            down_queries: vec![SqlQuery::new("undo A"), SqlQuery::new("undo B")],
        };
        let order: Vec<&str> = sql
            .down_in_execution_order()
            .map(|q| q.query.as_str())
            .collect();
        assert_eq!(order, vec!["undo B", "undo A"]);
    }

    #[test]
    fn test_value_coercions() {
        assert!(SqlValue::from("YES").as_bool());
        assert!(!SqlValue::Null.as_bool());
        assert_eq!(SqlValue::from("42").as_i64(), Some(42));
        assert_eq!(SqlValue::Integer(7).as_i64(), Some(7));
        assert_eq!(SqlValue::from(Some("x")), SqlValue::Text("x".into()));
        assert_eq!(SqlValue::from(None::<&str>), SqlValue::Null);
    }

    #[test]
    fn test_display() {
        assert_eq!(SqlQuery::new("DROP TABLE \"t\"").to_string(), "DROP TABLE \"t\";");
    }
}
