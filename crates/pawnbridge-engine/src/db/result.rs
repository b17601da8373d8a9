//! Query results

use pawnbridge_sdk::ScriptValue;

/// Type of a result column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Whole numbers
    Integer,
    /// Floating point numbers
    Float,
    /// Text, and anything else
    String,
}

/// A result column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name, or its alias
    pub name: String,
    /// Type of the column's values
    pub column_type: ColumnType,
}

/// A single field of a result row
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// SQL NULL
    Null,
    /// An integer
    Integer(i64),
    /// A floating point number
    Float(f64),
    /// Text
    Text(String),
}

impl FieldValue {
    /// Convert the field to the type of its column.
    pub fn coerce(self, column_type: ColumnType) -> FieldValue {
        match (column_type, self) {
            (_, FieldValue::Null) => FieldValue::Null,
            (ColumnType::Integer, FieldValue::Float(value)) => FieldValue::Integer(value as i64),
            (ColumnType::Integer, FieldValue::Text(text)) => match text.trim().parse() {
                Ok(value) => FieldValue::Integer(value),
                Err(_) => FieldValue::Text(text),
            },
            (ColumnType::Float, FieldValue::Integer(value)) => FieldValue::Float(value as f64),
            (ColumnType::Float, FieldValue::Text(text)) => match text.trim().parse() {
                Ok(value) => FieldValue::Float(value),
                Err(_) => FieldValue::Text(text),
            },
            (ColumnType::String, FieldValue::Integer(value)) => FieldValue::Text(value.to_string()),
            (ColumnType::String, FieldValue::Float(value)) => FieldValue::Text(value.to_string()),
            (_, value) => value,
        }
    }

    /// The field as a script value
    pub fn to_script_value(&self) -> ScriptValue {
        match self {
            FieldValue::Null => ScriptValue::Null,
            FieldValue::Integer(value) => ScriptValue::Number(*value as f64),
            FieldValue::Float(value) => ScriptValue::Number(*value),
            FieldValue::Text(text) => ScriptValue::String(text.clone()),
        }
    }
}

/// Result of a successfully executed query.
///
/// Statements producing rows carry columns and rows; other statements carry
/// the number of affected rows and the last inserted id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    columns: Vec<Column>,
    rows: Vec<Vec<FieldValue>>,
    affected_rows: Option<u64>,
    insert_id: Option<i64>,
}

impl QueryResult {
    /// Result of a statement that produced rows
    pub fn with_rows(columns: Vec<Column>, rows: Vec<Vec<FieldValue>>) -> Self {
        Self {
            columns,
            rows,
            affected_rows: None,
            insert_id: None,
        }
    }

    /// Result of a statement without a result set
    pub fn from_statement(affected_rows: u64, insert_id: i64) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            affected_rows: Some(affected_rows),
            insert_id: Some(insert_id),
        }
    }

    /// Columns of the result set
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Rows of the result set
    pub fn rows(&self) -> &[Vec<FieldValue>] {
        &self.rows
    }

    /// Number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Rows changed by a statement without a result set
    pub fn affected_rows(&self) -> Option<u64> {
        self.affected_rows
    }

    /// Last inserted row id, for statements without a result set
    pub fn insert_id(&self) -> Option<i64> {
        self.insert_id
    }

    /// Index of the column called `name`
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    /// Field `name` of row `row`
    pub fn field(&self, row: usize, name: &str) -> Option<&FieldValue> {
        let column = self.column_index(name)?;
        self.rows.get(row)?.get(column)
    }

    /// Rows as arrays of script values, in column order
    pub fn to_script_value(&self) -> ScriptValue {
        ScriptValue::Array(
            self.rows
                .iter()
                .map(|row| ScriptValue::Array(row.iter().map(FieldValue::to_script_value).collect()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce() {
        assert_eq!(
            FieldValue::Text("42".into()).coerce(ColumnType::Integer),
            FieldValue::Integer(42)
        );
        assert_eq!(
            FieldValue::Integer(3).coerce(ColumnType::Float),
            FieldValue::Float(3.0)
        );
        assert_eq!(
            FieldValue::Text("abc".into()).coerce(ColumnType::Float),
            FieldValue::Text("abc".into())
        );
        assert_eq!(FieldValue::Null.coerce(ColumnType::String), FieldValue::Null);
    }

    #[test]
    fn test_field_lookup() {
        let result = QueryResult::with_rows(
            vec![
                Column {
                    name: "id".into(),
                    column_type: ColumnType::Integer,
                },
                Column {
                    name: "name".into(),
                    column_type: ColumnType::String,
                },
            ],
            vec![vec![FieldValue::Integer(1), FieldValue::Text("Russell".into())]],
        );

        assert_eq!(result.row_count(), 1);
        assert_eq!(result.field(0, "name"), Some(&FieldValue::Text("Russell".into())));
        assert_eq!(result.field(0, "missing"), None);
        assert_eq!(result.field(1, "id"), None);
        assert_eq!(result.affected_rows(), None);
        assert_eq!(
            result.to_script_value(),
            ScriptValue::Array(vec![ScriptValue::Array(vec![
                ScriptValue::Number(1.0),
                ScriptValue::String("Russell".into())
            ])])
        );
    }
}
