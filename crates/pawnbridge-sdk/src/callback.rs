//! Interceptable callback descriptors

use std::fmt::Write;

use crate::arguments::ArgumentBag;
use crate::value::ArgumentValue;

/// Type of a callback argument as read from the native stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentType {
    /// A plain cell
    Integer,
    /// A float stored in a cell
    Float,
    /// The address of a string
    String,
}

/// Description of a public function whose invocations are intercepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callback {
    /// Name of the public function
    pub name: String,
    /// Argument names and types, in stack order
    pub arguments: Vec<(String, ArgumentType)>,
    /// Whether a handler may suppress the call
    pub cancelable: bool,
    /// Whether delivery to the script host is postponed to the next frame
    pub deferred: bool,
    /// Whether this call means the loaded program is going away
    pub unloads_program: bool,
    /// Value reported to the native caller when a handler suppresses the call
    pub return_value: i32,
}

impl Callback {
    /// Create a descriptor without arguments or annotations
    pub fn new(name: impl Into<String>) -> Self {
        Callback {
            name: name.into(),
            arguments: Vec::new(),
            cancelable: false,
            deferred: false,
            unloads_program: false,
            return_value: 0,
        }
    }

    /// Renders the call as `Name(argument=value, ...)` for logging.
    pub fn representation(&self, arguments: &ArgumentBag) -> String {
        let mut text = String::with_capacity(self.name.len() + 16 * self.arguments.len());
        text.push_str(&self.name);
        text.push('(');

        for (index, (name, _)) in self.arguments.iter().enumerate() {
            if index > 0 {
                text.push_str(", ");
            }

            let _ = match arguments.get(name) {
                Some(ArgumentValue::Integer(value)) => write!(text, "{}={}", name, value),
                Some(ArgumentValue::Float(value)) => write!(text, "{}={}", name, value),
                Some(ArgumentValue::Text(value)) => write!(text, "{}=\"{}\"", name, value),
                Some(ArgumentValue::IntArray(values)) => write!(text, "{}={:?}", name, values),
                None => write!(text, "{}=?", name),
            };
        }

        text.push(')');
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_representation() {
        let mut callback = Callback::new("OnPlayerText");
        callback
            .arguments
            .push(("playerid".to_string(), ArgumentType::Integer));
        callback
            .arguments
            .push(("text".to_string(), ArgumentType::String));
        callback
            .arguments
            .push(("amount".to_string(), ArgumentType::Float));

        let mut arguments = ArgumentBag::new();
        arguments.add_integer("playerid", 3);
        arguments.add_string("text", "hey");
        arguments.add_float("amount", 1.5);

        assert_eq!(
            callback.representation(&arguments),
            "OnPlayerText(playerid=3, text=\"hey\", amount=1.5)"
        );
    }

    #[test]
    fn test_representation_of_missing_argument() {
        let mut callback = Callback::new("OnPlayerSpawn");
        callback
            .arguments
            .push(("playerid".to_string(), ArgumentType::Integer));

        assert_eq!(
            callback.representation(&ArgumentBag::new()),
            "OnPlayerSpawn(playerid=?)"
        );
    }
}
