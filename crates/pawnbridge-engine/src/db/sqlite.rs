//! Bundled SQLite driver

use rusqlite::types::ValueRef;
use rusqlite::Connection;

use super::{
    infer_column_type, Column, ColumnType, ConnectionInfo, Driver, DriverError, FieldValue,
    QueryResult,
};

/// Error code used for failures that carry no SQLite code
const GENERIC_ERROR: i32 = -1;

impl From<rusqlite::Error> for DriverError {
    fn from(error: rusqlite::Error) -> Self {
        let code = match &error {
            rusqlite::Error::SqliteFailure(failure, _) => failure.extended_code,
            _ => GENERIC_ERROR,
        };
        DriverError::new(code, error.to_string())
    }
}

/// Driver for SQLite database files.
#[derive(Default)]
pub struct SqliteDriver {
    connection: Option<Connection>,
}

impl SqliteDriver {
    /// Create a disconnected driver
    pub fn new() -> Self {
        Self::default()
    }

    fn connection(&self) -> Result<&Connection, DriverError> {
        self.connection
            .as_ref()
            .ok_or_else(|| DriverError::new(GENERIC_ERROR, "Not connected"))
    }
}

impl Driver for SqliteDriver {
    fn connect(&mut self, info: &ConnectionInfo) -> Result<(), DriverError> {
        self.connection = Some(Connection::open(&info.database)?);
        Ok(())
    }

    fn ping(&mut self) -> Result<(), DriverError> {
        self.connection()?.execute_batch("SELECT 1")?;
        Ok(())
    }

    fn query(&mut self, query: &str) -> Result<QueryResult, DriverError> {
        let connection = self.connection()?;
        let mut statement = connection.prepare(query)?;

        if statement.column_count() == 0 {
            let affected_rows = statement.execute([])?;
            return Ok(QueryResult::from_statement(
                affected_rows as u64,
                connection.last_insert_rowid(),
            ));
        }

        let declared: Vec<(String, Option<ColumnType>)> = statement
            .columns()
            .iter()
            .map(|column| {
                (
                    column.name().to_string(),
                    column.decl_type().map(infer_column_type),
                )
            })
            .collect();

        let mut fields: Vec<Vec<FieldValue>> = Vec::new();
        let mut rows = statement.query([])?;
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(declared.len());
            for index in 0..declared.len() {
                values.push(field_value(row.get_ref(index)?));
            }
            fields.push(values);
        }

        // Expressions have no declared type; use the first value instead.
        let columns: Vec<Column> = declared
            .into_iter()
            .enumerate()
            .map(|(index, (name, column_type))| Column {
                name,
                column_type: column_type.unwrap_or_else(|| value_type(&fields, index)),
            })
            .collect();

        let rows = fields
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .zip(&columns)
                    .map(|(value, column)| value.coerce(column.column_type))
                    .collect()
            })
            .collect();

        Ok(QueryResult::with_rows(columns, rows))
    }

    fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err((_, error)) = connection.close() {
                tracing::warn!(%error, "Failed to close the database");
            }
        }
    }
}

fn field_value(value: ValueRef<'_>) -> FieldValue {
    match value {
        ValueRef::Null => FieldValue::Null,
        ValueRef::Integer(value) => FieldValue::Integer(value),
        ValueRef::Real(value) => FieldValue::Float(value),
        ValueRef::Text(text) | ValueRef::Blob(text) => {
            FieldValue::Text(String::from_utf8_lossy(text).into_owned())
        }
    }
}

fn value_type(rows: &[Vec<FieldValue>], index: usize) -> ColumnType {
    rows.iter()
        .filter_map(|row| row.get(index))
        .find_map(|value| match value {
            FieldValue::Null => None,
            FieldValue::Integer(_) => Some(ColumnType::Integer),
            FieldValue::Float(_) => Some(ColumnType::Float),
            FieldValue::Text(_) => Some(ColumnType::String),
        })
        .unwrap_or(ColumnType::String)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> SqliteDriver {
        let mut driver = SqliteDriver::new();
        driver.connect(&ConnectionInfo::file(":memory:")).unwrap();
        driver
    }

    #[test]
    fn test_statements_report_affected_rows() {
        let mut driver = connected();
        driver
            .query("CREATE TABLE players (id INTEGER PRIMARY KEY, name VARCHAR(24), health REAL)")
            .unwrap();

        let insert = driver
            .query("INSERT INTO players (name, health) VALUES ('Gunther', 100.0)")
            .unwrap();
        assert_eq!(insert.affected_rows(), Some(1));
        assert_eq!(insert.insert_id(), Some(1));
        assert!(insert.columns().is_empty());
    }

    #[test]
    fn test_select_infers_column_types() {
        let mut driver = connected();
        driver
            .query("CREATE TABLE players (id INTEGER PRIMARY KEY, name VARCHAR(24), health REAL)")
            .unwrap();
        driver
            .query("INSERT INTO players (name, health) VALUES ('Gunther', 75)")
            .unwrap();

        let result = driver
            .query("SELECT id, name, health, COUNT(*) AS total FROM players")
            .unwrap();

        let types: Vec<ColumnType> = result.columns().iter().map(|c| c.column_type).collect();
        assert_eq!(
            types,
            vec![
                ColumnType::Integer,
                ColumnType::String,
                ColumnType::Float,
                ColumnType::Integer
            ]
        );
        assert_eq!(result.field(0, "name"), Some(&FieldValue::Text("Gunther".into())));
        assert_eq!(result.field(0, "health"), Some(&FieldValue::Float(75.0)));
        assert_eq!(result.field(0, "total"), Some(&FieldValue::Integer(1)));
        assert_eq!(result.affected_rows(), None);
    }

    #[test]
    fn test_errors_carry_code_and_message() {
        let mut driver = connected();
        let error = driver.query("SELECT * FROM missing").unwrap_err();
        assert_ne!(error.code, 0);
        assert!(error.message.contains("missing"));

        let mut disconnected = SqliteDriver::new();
        assert_eq!(disconnected.ping().unwrap_err().code, GENERIC_ERROR);
    }
}
