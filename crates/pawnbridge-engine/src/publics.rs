//! Calling public functions of the loaded program

use std::collections::HashMap;
use std::ffi::CString;
use std::os::raw::c_int;

use pawnbridge_sdk::{float_to_cell, ArgumentValue, Cell};
use thiserror::Error;
use tracing::warn;

use crate::amx::strings::to_ansi;
use crate::amx::ExportTable;
use crate::program::ProgramId;

/// Errors raised when calling a public function
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublicCallError {
    /// No program is loaded
    #[error("No program is loaded")]
    NoProgram,

    /// The server's export table is not available
    #[error("The runtime export table is not available")]
    NoExports,

    /// The program has no public of that name
    #[error("The program has no public function named {name}")]
    UnknownPublic {
        /// The requested name
        name: String,
    },

    /// The runtime reported an error
    #[error("Unable to invoke {name}: runtime error {code}")]
    Runtime {
        /// Name of the public
        name: String,
        /// Runtime error code
        code: c_int,
    },
}

/// Calls public functions through the server's exported runtime functions.
#[derive(Default)]
pub struct PublicCaller {
    exports: Option<ExportTable>,
    program: Option<ProgramId>,
    indices: HashMap<String, c_int>,
}

impl PublicCaller {
    /// Create a caller without exports or program
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the given export table
    pub fn set_exports(&mut self, exports: ExportTable) {
        self.exports = Some(exports);
    }

    /// Target the given program, or none
    pub fn set_program(&mut self, program: Option<ProgramId>) {
        if self.program != program {
            self.indices.clear();
        }
        self.program = program;
    }

    /// The targeted program
    pub fn program(&self) -> Option<ProgramId> {
        self.program
    }

    /// Call the public `name` with `arguments`, returning its return value.
    pub fn call(&mut self, name: &str, arguments: &[ArgumentValue]) -> Result<Cell, PublicCallError> {
        let program = self.program.ok_or(PublicCallError::NoProgram)?;
        let exports = self.exports.ok_or(PublicCallError::NoExports)?;
        let amx = program.as_ptr();

        let index = match self.indices.get(name) {
            Some(index) => *index,
            None => {
                let unknown = || PublicCallError::UnknownPublic {
                    name: name.to_string(),
                };
                let c_name = CString::new(name).map_err(|_| unknown())?;
                let index = unsafe { exports.find_public(amx, &c_name) }.map_err(|_| unknown())?;
                self.indices.insert(name.to_string(), index);
                index
            }
        };

        let runtime = |code| PublicCallError::Runtime {
            name: name.to_string(),
            code,
        };

        // Releasing the first allocation frees everything allocated after it.
        let mut first_allocation: Option<Cell> = None;
        let mut pushed = Ok(());

        for argument in arguments.iter().rev() {
            let result = unsafe {
                match argument {
                    ArgumentValue::Integer(value) => exports.push(amx, *value).map(|_| None),
                    ArgumentValue::Float(value) => {
                        exports.push(amx, float_to_cell(*value)).map(|_| None)
                    }
                    ArgumentValue::Text(text) => {
                        let mut bytes = to_ansi(text);
                        if let Some(end) = bytes.iter().position(|byte| *byte == 0) {
                            bytes.truncate(end);
                        }
                        let text = CString::new(bytes).unwrap_or_default();
                        exports.push_string(amx, &text).map(Some)
                    }
                    ArgumentValue::IntArray(values) => {
                        let cells: Vec<Cell> = values.iter().map(|value| *value as Cell).collect();
                        exports.push_array(amx, &cells).map(Some)
                    }
                }
            };

            match result {
                Ok(Some(address)) => {
                    first_allocation.get_or_insert(address);
                }
                Ok(None) => {}
                Err(code) => {
                    pushed = Err(runtime(code));
                    break;
                }
            }
        }

        let result = pushed.and_then(|_| unsafe { exports.exec(amx, index) }.map_err(runtime));

        if let Some(address) = first_allocation {
            if let Err(code) = unsafe { exports.release(amx, address) } {
                warn!(public = name, code, "Unable to release pushed arguments");
            }
        }

        if let Err(error) = &result {
            warn!(public = name, %error, "Public function call failed");
        }
        result
    }
}
