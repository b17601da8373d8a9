//! Values crossing the bridge
//!
//! Two value families exist. [`ArgumentValue`] is what the native runtime
//! understands: 32-bit cells, floats stored in cells, strings and arrays of
//! cells. [`ScriptValue`] is what the script engine hands us: numbers are
//! doubles, and arrays may hold anything.

use std::fmt;

/// A single cell of native runtime memory.
pub type Cell = i32;

// ============================================================================
// Float Cell Codec
// ============================================================================

/// Stores a float in a cell by reinterpreting its bits.
///
/// This is the only place where floats and cells are converted into each
/// other; everything that writes a float into native memory goes through it.
#[inline]
pub fn float_to_cell(value: f32) -> Cell {
    value.to_bits() as Cell
}

/// Reads a float that was stored in a cell by [`float_to_cell`].
#[inline]
pub fn cell_to_float(cell: Cell) -> f32 {
    f32::from_bits(cell as u32)
}

// ============================================================================
// Argument Value
// ============================================================================

/// A value as it exists on the native side of the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentValue {
    /// A plain cell
    Integer(i32),
    /// A float, stored in a cell through [`float_to_cell`]
    Float(f32),
    /// A string, converted to the server code page when written
    Text(String),
    /// A sequence of raw cells
    IntArray(Vec<u32>),
}

impl ArgumentValue {
    /// Name of the value's type, for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            ArgumentValue::Integer(_) => "integer",
            ArgumentValue::Float(_) => "float",
            ArgumentValue::Text(_) => "string",
            ArgumentValue::IntArray(_) => "array",
        }
    }

    /// Converts the value into something the script engine can consume.
    pub fn to_script_value(&self) -> ScriptValue {
        match self {
            ArgumentValue::Integer(value) => ScriptValue::Number(*value as f64),
            ArgumentValue::Float(value) => ScriptValue::Number(*value as f64),
            ArgumentValue::Text(value) => ScriptValue::String(value.clone()),
            ArgumentValue::IntArray(values) => ScriptValue::Array(
                values
                    .iter()
                    .map(|value| ScriptValue::Number(*value as i32 as f64))
                    .collect(),
            ),
        }
    }
}

impl From<i32> for ArgumentValue {
    fn from(value: i32) -> Self {
        ArgumentValue::Integer(value)
    }
}

impl From<f32> for ArgumentValue {
    fn from(value: f32) -> Self {
        ArgumentValue::Float(value)
    }
}

impl From<&str> for ArgumentValue {
    fn from(value: &str) -> Self {
        ArgumentValue::Text(value.to_string())
    }
}

impl From<String> for ArgumentValue {
    fn from(value: String) -> Self {
        ArgumentValue::Text(value)
    }
}

impl From<Vec<u32>> for ArgumentValue {
    fn from(values: Vec<u32>) -> Self {
        ArgumentValue::IntArray(values)
    }
}

// ============================================================================
// Script Value
// ============================================================================

/// A value as it exists on the script side of the bridge.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ScriptValue {
    /// No value at all
    #[default]
    Undefined,
    /// The null value
    Null,
    /// A boolean
    Bool(bool),
    /// A number; all script numbers are doubles
    Number(f64),
    /// A string
    String(String),
    /// An ordered collection
    Array(Vec<ScriptValue>),
}

impl ScriptValue {
    /// Name of the value's type, for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Undefined => "undefined",
            ScriptValue::Null => "null",
            ScriptValue::Bool(_) => "boolean",
            ScriptValue::Number(_) => "number",
            ScriptValue::String(_) => "string",
            ScriptValue::Array(_) => "array",
        }
    }

    /// Whether this is a number
    pub fn is_number(&self) -> bool {
        matches!(self, ScriptValue::Number(_))
    }

    /// Get the numeric value
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ScriptValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    /// Get the string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(value) => Some(value),
            _ => None,
        }
    }

    /// Get the array entries
    pub fn as_array(&self) -> Option<&[ScriptValue]> {
        match self {
            ScriptValue::Array(values) => Some(values),
            _ => None,
        }
    }

    /// Returns the value when it is a number that is exactly representable as
    /// an `i32`.
    pub fn as_int32(&self) -> Option<i32> {
        match self {
            ScriptValue::Number(value)
                if value.fract() == 0.0
                    && *value >= i32::MIN as f64
                    && *value <= i32::MAX as f64 =>
            {
                Some(*value as i32)
            }
            _ => None,
        }
    }

    /// Converts a number to an `i32` with modular wrap-around, the way the
    /// script engine's integer conversion does. Non-numbers yield `None`.
    pub fn to_int32(&self) -> Option<i32> {
        self.as_number().map(number_to_int32)
    }

    /// Converts the value to text the way the script engine stringifies it.
    pub fn to_text(&self) -> String {
        self.to_string()
    }
}

/// Modular conversion of a double to a 32-bit signed integer.
fn number_to_int32(value: f64) -> i32 {
    if !value.is_finite() {
        return 0;
    }

    let modulo = value.trunc().rem_euclid(4_294_967_296.0);
    modulo as u32 as i32
}

fn format_number(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    if value.is_nan() {
        write!(f, "NaN")
    } else if value.is_infinite() {
        write!(f, "{}", if value > 0.0 { "Infinity" } else { "-Infinity" })
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        write!(f, "{}", value as i64)
    } else {
        write!(f, "{}", value)
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Undefined => write!(f, "undefined"),
            ScriptValue::Null => write!(f, "null"),
            ScriptValue::Bool(value) => write!(f, "{}", value),
            ScriptValue::Number(value) => format_number(f, *value),
            ScriptValue::String(value) => write!(f, "{}", value),
            ScriptValue::Array(values) => {
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        write!(f, ",")?;
                    }
                    match value {
                        ScriptValue::Undefined | ScriptValue::Null => {}
                        value => write!(f, "{}", value)?,
                    }
                }
                Ok(())
            }
        }
    }
}

impl From<i32> for ScriptValue {
    fn from(value: i32) -> Self {
        ScriptValue::Number(value as f64)
    }
}

impl From<f64> for ScriptValue {
    fn from(value: f64) -> Self {
        ScriptValue::Number(value)
    }
}

impl From<bool> for ScriptValue {
    fn from(value: bool) -> Self {
        ScriptValue::Bool(value)
    }
}

impl From<&str> for ScriptValue {
    fn from(value: &str) -> Self {
        ScriptValue::String(value.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(value: String) -> Self {
        ScriptValue::String(value)
    }
}

impl From<Vec<ScriptValue>> for ScriptValue {
    fn from(values: Vec<ScriptValue>) -> Self {
        ScriptValue::Array(values)
    }
}
