//! Parser for the provided natives file
//!
//! One native name per line. Names consist of ASCII letters and underscores
//! only, each may appear once, and the table registered with programs has a
//! fixed number of slots.

use std::collections::HashSet;
use std::path::Path;

use super::{content_lines, read_file, DefinitionError};

/// Number of natives the script host can provide
pub const MAX_NATIVES: usize = 255;

fn is_valid_name(name: &str) -> bool {
    name.bytes()
        .all(|byte| byte.is_ascii_alphabetic() || byte == b'_')
}

/// Parse the contents of a natives file, returning the names in file order.
pub fn parse_natives(content: &str) -> Result<Vec<String>, DefinitionError> {
    let mut names = Vec::new();
    let mut seen = HashSet::new();

    for (line_number, line) in content_lines(content) {
        if !is_valid_name(line) {
            return Err(DefinitionError::Syntax {
                line: line_number,
                message: "native names may only contain letters and underscores",
                text: line.to_string(),
            });
        }

        if !seen.insert(line) {
            return Err(DefinitionError::Duplicate {
                name: line.to_string(),
                line: line_number,
            });
        }

        if names.len() == MAX_NATIVES {
            return Err(DefinitionError::TooMany { max: MAX_NATIVES });
        }

        names.push(line.to_string());
    }

    Ok(names)
}

/// Load and parse a natives file.
pub fn load_natives(path: &Path) -> Result<Vec<String>, DefinitionError> {
    parse_natives(&read_file(path)?)
}
