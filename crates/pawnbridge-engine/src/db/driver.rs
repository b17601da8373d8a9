//! Database driver abstraction

use thiserror::Error;

use super::{ColumnType, ConnectionInfo, QueryResult};

/// An error reported by the database, as code and message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code})")]
pub struct DriverError {
    /// Database error code
    pub code: i32,
    /// Database error message
    pub message: String,
}

impl DriverError {
    /// Create an error from code and message
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// A blocking database client, driven by a connection's worker thread.
pub trait Driver: Send {
    /// Open a connection
    fn connect(&mut self, info: &ConnectionInfo) -> Result<(), DriverError>;

    /// Keep the connection alive
    fn ping(&mut self) -> Result<(), DriverError>;

    /// Execute a single statement
    fn query(&mut self, query: &str) -> Result<QueryResult, DriverError>;

    /// Close the connection
    fn close(&mut self);
}

/// Column type for a declared SQL type name.
pub fn infer_column_type(declared: &str) -> ColumnType {
    let declared = declared.to_ascii_uppercase();
    if declared.contains("INT") || declared == "BOOLEAN" || declared == "BOOL" {
        ColumnType::Integer
    } else if ["REAL", "FLOA", "DOUB", "DEC", "NUMERIC"]
        .iter()
        .any(|name| declared.contains(name))
    {
        ColumnType::Float
    } else {
        ColumnType::String
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_column_type() {
        assert_eq!(infer_column_type("INTEGER"), ColumnType::Integer);
        assert_eq!(infer_column_type("bigint(20)"), ColumnType::Integer);
        assert_eq!(infer_column_type("TINYINT"), ColumnType::Integer);
        assert_eq!(infer_column_type("double"), ColumnType::Float);
        assert_eq!(infer_column_type("DECIMAL(10,2)"), ColumnType::Float);
        assert_eq!(infer_column_type("VARCHAR(24)"), ColumnType::String);
        assert_eq!(infer_column_type("TEXT"), ColumnType::String);
    }
}
