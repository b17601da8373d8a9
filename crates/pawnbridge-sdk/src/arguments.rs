//! Named arguments of an intercepted call

use std::collections::HashMap;

use crate::value::{ArgumentValue, ScriptValue};

/// A name-keyed bag of typed values.
///
/// The interception layer fills one bag per intercepted call and hands it to
/// the delegate. Bags are reused between calls through [`ArgumentBag::clear`],
/// and copied with [`Clone`] when a delegate needs to keep the values beyond
/// the call that produced them.
///
/// Lookups never fail: a missing name or a value of another type yields the
/// type's sentinel (`-1`, `-1.0`, `""` or an empty slice).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgumentBag {
    values: HashMap<String, ArgumentValue>,
}

impl ArgumentBag {
    /// Sentinel returned for missing integers
    pub const MISSING_INTEGER: i32 = -1;
    /// Sentinel returned for missing floats
    pub const MISSING_FLOAT: f32 = -1.0;

    /// Create an empty bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an integer under `name`, replacing any previous value.
    pub fn add_integer(&mut self, name: impl Into<String>, value: i32) {
        self.values.insert(name.into(), ArgumentValue::Integer(value));
    }

    /// Store a float under `name`, replacing any previous value.
    pub fn add_float(&mut self, name: impl Into<String>, value: f32) {
        self.values.insert(name.into(), ArgumentValue::Float(value));
    }

    /// Store a string under `name`, replacing any previous value.
    pub fn add_string(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values
            .insert(name.into(), ArgumentValue::Text(value.into()));
    }

    /// Store an array of cells under `name`, replacing any previous value.
    pub fn add_array(&mut self, name: impl Into<String>, values: Vec<u32>) {
        self.values
            .insert(name.into(), ArgumentValue::IntArray(values));
    }

    /// Get the raw value stored under `name`
    pub fn get(&self, name: &str) -> Option<&ArgumentValue> {
        self.values.get(name)
    }

    /// Get the integer stored under `name`, or `-1`
    pub fn get_integer(&self, name: &str) -> i32 {
        match self.values.get(name) {
            Some(ArgumentValue::Integer(value)) => *value,
            _ => Self::MISSING_INTEGER,
        }
    }

    /// Get the float stored under `name`, or `-1.0`
    pub fn get_float(&self, name: &str) -> f32 {
        match self.values.get(name) {
            Some(ArgumentValue::Float(value)) => *value,
            _ => Self::MISSING_FLOAT,
        }
    }

    /// Get the string stored under `name`, or the empty string
    pub fn get_string(&self, name: &str) -> &str {
        match self.values.get(name) {
            Some(ArgumentValue::Text(value)) => value,
            _ => "",
        }
    }

    /// Get the array stored under `name`, or an empty slice
    pub fn get_array(&self, name: &str) -> &[u32] {
        match self.values.get(name) {
            Some(ArgumentValue::IntArray(values)) => values,
            _ => &[],
        }
    }

    /// Whether a value is stored under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Iterate over all stored values
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgumentValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no values are stored
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Remove all values, keeping the allocation
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Convert the bag into name/value pairs for the script engine.
    pub fn to_script_values(&self) -> Vec<(String, ScriptValue)> {
        self.values
            .iter()
            .map(|(name, value)| (name.clone(), value.to_script_value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_lookup() {
        let mut bag = ArgumentBag::new();
        bag.add_integer("playerid", 12);
        bag.add_float("health", 99.5);
        bag.add_string("text", "Hello");
        bag.add_array("cells", vec![1, 2, 3]);

        assert_eq!(bag.len(), 4);
        assert_eq!(bag.get_integer("playerid"), 12);
        assert_eq!(bag.get_float("health"), 99.5);
        assert_eq!(bag.get_string("text"), "Hello");
        assert_eq!(bag.get_array("cells"), &[1, 2, 3]);
    }

    #[test]
    fn test_sentinels_for_missing_and_mismatched_values() {
        let mut bag = ArgumentBag::new();
        bag.add_string("name", "Russell");

        assert_eq!(bag.get_integer("name"), -1);
        assert_eq!(bag.get_float("name"), -1.0);
        assert_eq!(bag.get_string("missing"), "");
        assert!(bag.get_array("name").is_empty());
        assert!(!bag.contains("missing"));
    }

    #[test]
    fn test_readding_overwrites() {
        let mut bag = ArgumentBag::new();
        bag.add_integer("value", 1);
        bag.add_string("value", "one");

        assert_eq!(bag.len(), 1);
        assert_eq!(bag.get_string("value"), "one");
        assert_eq!(bag.get_integer("value"), -1);
    }

    #[test]
    fn test_copy_survives_clear() {
        let mut bag = ArgumentBag::new();
        bag.add_integer("vehicleid", 400);

        let copy = bag.clone();
        bag.clear();

        assert!(bag.is_empty());
        assert_eq!(copy.get_integer("vehicleid"), 400);
    }
}
