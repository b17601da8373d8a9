//! Natives implemented by the script host
//!
//! The names listed in `natives.txt` are registered with every loaded
//! program. When the program calls one of them, [`ReverseInvoker::call`]
//! converts the native parameters to script values according to the
//! signature the script host registered, runs its handler and writes the
//! handler's reference outputs back into program memory.
//!
//! Signatures use `i f s` for values passed to the handler and `I F S` for
//! references the handler fills in, with each character describing the
//! native parameter at the same position.

use std::collections::{HashMap, HashSet};

use pawnbridge_sdk::{
    cell_to_float, float_to_cell, Cell, ScriptValue, Signature, SignatureError, SignatureType,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::amx::strings::{encode_cells, from_ansi, to_ansi};
use crate::amx::{memory, Amx};

/// Errors raised when providing a native
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvideError {
    /// The name is not in the natives file
    #[error("The native {name} is not listed in the natives file")]
    UnknownNative {
        /// The rejected name
        name: String,
    },

    /// The signature is invalid
    #[error("Invalid native signature: {0}")]
    Signature(#[from] SignatureError),

    /// Natives cannot be changed from inside a provided native
    #[error("Natives cannot be provided while a provided native is running")]
    Busy,
}

/// The script side of a provided native.
pub trait NativeHandler {
    /// Handle a call with the converted plain parameters. `None` stands for
    /// a handler that returned nothing.
    fn call(&mut self, arguments: &[ScriptValue]) -> Option<ScriptValue>;
}

impl<F> NativeHandler for F
where
    F: FnMut(&[ScriptValue]) -> Option<ScriptValue>,
{
    fn call(&mut self, arguments: &[ScriptValue]) -> Option<ScriptValue> {
        self(arguments)
    }
}

/// The parameters of a native call, as passed by the runtime.
pub struct NativeParameters {
    amx: *mut Amx,
    params: *const Cell,
}

impl NativeParameters {
    /// Wrap the arguments of a native function.
    ///
    /// # Safety
    ///
    /// `amx` and `params` must be the arguments the runtime passed to the
    /// native, used only for the duration of that call.
    pub unsafe fn new(amx: *mut Amx, params: *const Cell) -> Self {
        NativeParameters { amx, params }
    }

    /// Number of parameters
    pub fn count(&self) -> usize {
        if self.params.is_null() {
            return 0;
        }
        (unsafe { *self.params }.max(0) / 4) as usize
    }

    fn raw(&self, index: usize) -> Option<Cell> {
        (index < self.count()).then(|| unsafe { *self.params.add(index + 1) })
    }

    /// The parameter at `index` as an integer
    pub fn get_integer(&self, index: usize) -> Option<Cell> {
        self.raw(index)
    }

    /// The parameter at `index` as a float
    pub fn get_float(&self, index: usize) -> Option<f32> {
        self.raw(index).map(cell_to_float)
    }

    /// The string addressed by the parameter at `index`
    pub fn get_string(&self, index: usize) -> Option<String> {
        let address = self.raw(index)?;
        let mut bytes = Vec::new();
        unsafe { memory::read_string(self.amx, address, &mut bytes) }.then(|| from_ansi(&bytes))
    }

    /// Store `value` in the cell addressed by the parameter at `index`.
    pub fn set_integer(&mut self, index: usize, value: Cell) -> bool {
        match self.raw(index) {
            Some(address) => unsafe { memory::write_cell(self.amx, address, value) },
            None => false,
        }
    }

    /// Store `value` in the cell addressed by the parameter at `index`.
    pub fn set_float(&mut self, index: usize, value: f32) -> bool {
        self.set_integer(index, float_to_cell(value))
    }

    /// Store `text` as an unpacked string in the buffer addressed by the
    /// parameter at `index`, writing at most `capacity` cells and never
    /// past the memory region holding the buffer.
    pub fn set_string(&mut self, index: usize, text: &str, capacity: Option<usize>) -> bool {
        let Some(address) = self.raw(index) else {
            return false;
        };

        match unsafe { memory::cells_mut(self.amx, address) } {
            Some(cells) => {
                let limit = capacity.unwrap_or(cells.len()).min(cells.len());
                encode_cells(&to_ansi(text), &mut cells[..limit]);
                true
            }
            None => false,
        }
    }
}

struct ProvidedNative {
    signature: Signature,
    handler: Box<dyn NativeHandler>,
}

/// Dispatches calls of provided natives to their script handlers.
pub struct ReverseInvoker {
    known: HashSet<String>,
    natives: HashMap<String, ProvidedNative>,
}

impl ReverseInvoker {
    /// Create an invoker accepting the given native names
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ReverseInvoker {
            known: names.into_iter().map(Into::into).collect(),
            natives: HashMap::new(),
        }
    }

    /// Whether `name` may be provided
    pub fn is_known(&self, name: &str) -> bool {
        self.known.contains(name)
    }

    /// Whether a handler is registered for `name`
    pub fn is_provided(&self, name: &str) -> bool {
        self.natives.contains_key(name)
    }

    /// Register `handler` for the native `name`, replacing an earlier one.
    pub fn register(
        &mut self,
        name: &str,
        signature: &str,
        handler: impl NativeHandler + 'static,
    ) -> Result<(), ProvideError> {
        if !self.is_known(name) {
            return Err(ProvideError::UnknownNative {
                name: name.to_string(),
            });
        }

        let signature = Signature::parse_provided(signature)?;
        debug!(native = name, "Registered provided native");
        self.natives.insert(
            name.to_string(),
            ProvidedNative {
                signature,
                handler: Box::new(handler),
            },
        );
        Ok(())
    }

    /// Handle a call of the native `name` made by the runtime.
    pub fn call(&mut self, name: &str, params: &mut NativeParameters) -> Cell {
        let Some(native) = self.natives.get_mut(name) else {
            warn!(native = name, "No handler has been provided for the native");
            return 0;
        };

        let signature = &native.signature;
        if params.count() < signature.argument_count() {
            return 0;
        }

        let mut arguments = Vec::with_capacity(signature.argument_count());
        for (index, ty) in signature.types().iter().enumerate() {
            let argument = match ty {
                SignatureType::Int => params.get_integer(index).map(ScriptValue::from),
                SignatureType::Float => params
                    .get_float(index)
                    .map(|value| ScriptValue::Number(value as f64)),
                SignatureType::String => params.get_string(index).map(ScriptValue::String),
                _ => continue,
            };

            match argument {
                Some(argument) => arguments.push(argument),
                None => {
                    warn!(native = name, index, "Unable to read native parameter");
                    return 0;
                }
            }
        }

        let result = native
            .handler
            .call(&arguments)
            .unwrap_or(ScriptValue::Number(0.0));

        if signature.reference_count() == 0 {
            return result.as_int32().unwrap_or(1);
        }

        let outputs = match result.as_array() {
            Some(outputs) if outputs.len() == signature.reference_count() => outputs,
            _ => return -1,
        };

        let references = signature
            .types()
            .iter()
            .enumerate()
            .filter(|(_, ty)| ty.is_reference());

        for ((index, ty), output) in references.zip(outputs) {
            match ty {
                SignatureType::IntReference => {
                    params.set_integer(index, output.as_int32().unwrap_or(-1));
                }
                SignatureType::FloatReference => {
                    let value = output.as_number().map(|value| value as f32).unwrap_or(-1.0);
                    params.set_float(index, value);
                }
                SignatureType::StringReference => {
                    let capacity = string_capacity(params, signature, index);
                    params.set_string(index, output.as_str().unwrap_or(""), capacity);
                }
                _ => {}
            }
        }

        1
    }
}

/// Buffer size of the `S` parameter at `index`: when the native receives
/// more parameters than its signature describes and the parameter after the
/// buffer is one of them, that parameter is taken as the size.
fn string_capacity(params: &NativeParameters, signature: &Signature, index: usize) -> Option<usize> {
    let size_index = index + 1;
    if size_index < signature.len() {
        return None;
    }

    params
        .get_integer(size_index)
        .filter(|size| *size > 0)
        .map(|size| size as usize)
}
