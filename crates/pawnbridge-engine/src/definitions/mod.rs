//! Definition files
//!
//! Two plain-text files describe the surface shared with the loaded program:
//!
//! - `callbacks.txt` lists the public functions to intercept, in Pawn
//!   `forward` syntax with optional annotations ([`callbacks`])
//! - `natives.txt` lists the natives the script host may provide
//!   ([`natives`])

pub mod callbacks;
pub mod natives;

use std::path::PathBuf;

use thiserror::Error;

pub use callbacks::{parse_callbacks, CallbackTable};
pub use natives::{load_natives, parse_natives, MAX_NATIVES};

/// Errors that can occur while loading a definition file
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// The file could not be read
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        /// Path of the file
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// A line does not follow the expected syntax
    #[error("Syntax error on line {line}: {message} (\"{text}\")")]
    Syntax {
        /// 1-based line number
        line: usize,
        /// What is wrong
        message: &'static str,
        /// The offending line
        text: String,
    },

    /// A name is defined more than once
    #[error("Duplicate definition of {name} on line {line}")]
    Duplicate {
        /// The repeated name
        name: String,
        /// 1-based line number of the repetition
        line: usize,
    },

    /// More entries than can be supported
    #[error("Too many definitions: at most {max} are supported")]
    TooMany {
        /// The limit
        max: usize,
    },
}

/// Reads a definition file into memory.
pub(crate) fn read_file(path: &std::path::Path) -> Result<String, DefinitionError> {
    std::fs::read_to_string(path).map_err(|source| DefinitionError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Iterates the meaningful lines of a definition file: trimmed, with blank
/// lines and `#` or `//` comments skipped. Yields 1-based line numbers.
pub(crate) fn content_lines(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#') && !line.starts_with("//"))
}
