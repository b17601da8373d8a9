//! Parser for the intercepted callbacks file
//!
//! Each line declares one public function:
//!
//! ```text
//! [Cancelable, ReturnOne] forward OnPlayerText(playerid, text[]);
//! ```
//!
//! Arguments tagged `Float:` are floats, arguments followed by `[]` are
//! strings and everything else is an integer. The annotations are:
//!
//! | Annotation   | Effect                                                |
//! |--------------|-------------------------------------------------------|
//! | `Cancelable` | the script host may suppress the call                 |
//! | `ReturnOne`  | a suppressed call returns 1 instead of 0              |
//! | `Deferred`   | the script host sees the call during the next frame   |
//! | `Unload`     | the call means the loaded program goes away           |

use std::collections::HashMap;
use std::path::Path;

use pawnbridge_sdk::{ArgumentType, Callback};
use tracing::warn;

use super::{content_lines, read_file, DefinitionError};

/// The parsed callbacks, in file order, addressable by name.
#[derive(Debug, Clone, Default)]
pub struct CallbackTable {
    callbacks: Vec<Callback>,
    by_name: HashMap<String, usize>,
}

impl CallbackTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and parse a callbacks file.
    pub fn from_file(path: &Path) -> Result<Self, DefinitionError> {
        parse_callbacks(&read_file(path)?)
    }

    /// Add a callback; returns `false` when the name is already taken.
    pub fn insert(&mut self, callback: Callback) -> bool {
        if self.by_name.contains_key(&callback.name) {
            return false;
        }

        self.by_name
            .insert(callback.name.clone(), self.callbacks.len());
        self.callbacks.push(callback);
        true
    }

    /// Position of the callback called `name`
    pub fn position(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// The callback called `name`
    pub fn find(&self, name: &str) -> Option<&Callback> {
        self.position(name).map(|position| &self.callbacks[position])
    }

    /// The callback at `position`
    pub fn get(&self, position: usize) -> Option<&Callback> {
        self.callbacks.get(position)
    }

    /// Iterate over the callbacks in file order
    pub fn iter(&self) -> std::slice::Iter<'_, Callback> {
        self.callbacks.iter()
    }

    /// Number of callbacks
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Whether there are no callbacks
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl<'a> IntoIterator for &'a CallbackTable {
    type Item = &'a Callback;
    type IntoIter = std::slice::Iter<'a, Callback>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Parse the contents of a callbacks file.
pub fn parse_callbacks(content: &str) -> Result<CallbackTable, DefinitionError> {
    let mut table = CallbackTable::new();

    for (line_number, line) in content_lines(content) {
        let callback = parse_line(line).map_err(|message| DefinitionError::Syntax {
            line: line_number,
            message,
            text: line.to_string(),
        })?;

        let name = callback.name.clone();
        if !table.insert(callback) {
            return Err(DefinitionError::Duplicate {
                name,
                line: line_number,
            });
        }
    }

    Ok(table)
}

/// Parse a single declaration.
pub fn parse_line(line: &str) -> Result<Callback, &'static str> {
    let mut callback = Callback::new(String::new());
    let line = parse_annotations(line.trim(), &mut callback)?;

    let declaration = line
        .strip_prefix("forward")
        .filter(|rest| rest.starts_with(char::is_whitespace))
        .ok_or("expected keyword \"forward\"")?
        .trim_start();

    let (name, arguments) = declaration
        .split_once('(')
        .ok_or("unable to find the arguments")?;

    let name = name.trim();
    if name.is_empty() {
        return Err("missing callback name");
    }
    callback.name = name.to_string();

    let arguments = arguments.trim_end();
    let arguments = arguments.strip_suffix(';').unwrap_or(arguments).trim_end();
    let arguments = arguments
        .strip_suffix(')')
        .ok_or("unable to find the end of the arguments")?
        .trim();

    if !arguments.is_empty() {
        for argument in arguments.split(',') {
            callback.arguments.push(parse_argument(argument)?);
        }
    }

    Ok(callback)
}

fn parse_annotations<'a>(line: &'a str, callback: &mut Callback) -> Result<&'a str, &'static str> {
    let Some(rest) = line.strip_prefix('[') else {
        return Ok(line);
    };

    let (annotations, rest) = rest
        .split_once(']')
        .ok_or("unable to parse the annotations")?;

    for annotation in annotations.split(',').map(str::trim) {
        match annotation {
            "Cancelable" => callback.cancelable = true,
            "ReturnOne" => callback.return_value = 1,
            "Deferred" => callback.deferred = true,
            "Unload" => callback.unloads_program = true,
            "" => {}
            unknown => warn!(annotation = unknown, "Ignoring unknown callback annotation"),
        }
    }

    Ok(rest.trim_start())
}

fn parse_argument(argument: &str) -> Result<(String, ArgumentType), &'static str> {
    let mut argument = argument.trim();
    let mut argument_type = ArgumentType::Integer;

    if let Some((tag, name)) = argument.split_once(':') {
        if tag.trim() == "Float" {
            argument_type = ArgumentType::Float;
        }
        argument = name.trim();
    }

    if let Some((name, suffix)) = argument.split_once('[') {
        if !suffix.contains(']') {
            return Err("unterminated string argument");
        }
        if argument_type != ArgumentType::Integer {
            return Err("float arguments cannot be strings");
        }

        argument = name.trim();
        argument_type = ArgumentType::String;
    }

    if argument.is_empty() {
        return Err("missing argument name");
    }

    Ok((argument.to_string(), argument_type))
}
