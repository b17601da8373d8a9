//! MySQL driver
//!
//! Queries use the text protocol, so every field arrives as bytes and is
//! converted by the column type the server reports.

use mysql::consts::ColumnType as MysqlType;
use mysql::prelude::Queryable;
use mysql::{Conn, OptsBuilder, Value};

use super::{Column, ColumnType, ConnectionInfo, Driver, DriverError, FieldValue, QueryResult};

/// Error code used for failures that carry no server code
const GENERIC_ERROR: i32 = -1;

/// Port used when the connection info leaves it at 0
pub const DEFAULT_PORT: u16 = 3306;

impl From<mysql::Error> for DriverError {
    fn from(error: mysql::Error) -> Self {
        match error {
            mysql::Error::MySqlError(error) => DriverError::new(error.code as i32, error.message),
            error => DriverError::new(GENERIC_ERROR, error.to_string()),
        }
    }
}

/// Driver for MySQL and MariaDB servers.
#[derive(Default)]
pub struct MysqlDriver {
    connection: Option<Conn>,
}

impl MysqlDriver {
    /// Create a disconnected driver
    pub fn new() -> Self {
        Self::default()
    }

    fn connection(&mut self) -> Result<&mut Conn, DriverError> {
        self.connection
            .as_mut()
            .ok_or_else(|| DriverError::new(GENERIC_ERROR, "Not connected"))
    }
}

impl Driver for MysqlDriver {
    fn connect(&mut self, info: &ConnectionInfo) -> Result<(), DriverError> {
        self.connection = None;

        let port = if info.port == 0 { DEFAULT_PORT } else { info.port };
        let options = OptsBuilder::new()
            .ip_or_hostname(Some(info.hostname.as_str()))
            .user(Some(info.username.as_str()))
            .pass(Some(info.password.as_str()))
            .db_name(Some(info.database.as_str()).filter(|name| !name.is_empty()))
            .tcp_port(port);

        self.connection = Some(Conn::new(options)?);
        Ok(())
    }

    fn ping(&mut self) -> Result<(), DriverError> {
        self.connection()?.query_drop("SELECT 1")?;
        Ok(())
    }

    fn query(&mut self, query: &str) -> Result<QueryResult, DriverError> {
        let mut result = self.connection()?.query_iter(query)?;

        let columns: Vec<Column> = result
            .columns()
            .as_ref()
            .iter()
            .map(|column| Column {
                name: column.name_str().into_owned(),
                column_type: column_type(column.column_type()),
            })
            .collect();

        if columns.is_empty() {
            let affected_rows = result.affected_rows();
            let insert_id = result.last_insert_id().unwrap_or(0) as i64;
            return Ok(QueryResult::from_statement(affected_rows, insert_id));
        }

        let mut rows = Vec::new();
        for row in result.by_ref() {
            let row = row?;
            let values = columns
                .iter()
                .enumerate()
                .map(|(index, column)| {
                    row.as_ref(index)
                        .map_or(FieldValue::Null, field_value)
                        .coerce(column.column_type)
                })
                .collect();
            rows.push(values);
        }

        Ok(QueryResult::with_rows(columns, rows))
    }

    fn close(&mut self) {
        self.connection = None;
    }
}

/// Column type for a server-reported type.
pub fn column_type(reported: MysqlType) -> ColumnType {
    match reported {
        MysqlType::MYSQL_TYPE_TINY
        | MysqlType::MYSQL_TYPE_SHORT
        | MysqlType::MYSQL_TYPE_INT24
        | MysqlType::MYSQL_TYPE_LONG
        | MysqlType::MYSQL_TYPE_LONGLONG
        | MysqlType::MYSQL_TYPE_YEAR => ColumnType::Integer,
        MysqlType::MYSQL_TYPE_FLOAT
        | MysqlType::MYSQL_TYPE_DOUBLE
        | MysqlType::MYSQL_TYPE_DECIMAL
        | MysqlType::MYSQL_TYPE_NEWDECIMAL => ColumnType::Float,
        _ => ColumnType::String,
    }
}

fn field_value(value: &Value) -> FieldValue {
    match value {
        Value::NULL => FieldValue::Null,
        Value::Bytes(bytes) => FieldValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        Value::Int(value) => FieldValue::Integer(*value),
        Value::UInt(value) => FieldValue::Integer(*value as i64),
        Value::Float(value) => FieldValue::Float(f64::from(*value)),
        Value::Double(value) => FieldValue::Float(*value),
        other => FieldValue::Text(other.as_sql(true)),
    }
}
