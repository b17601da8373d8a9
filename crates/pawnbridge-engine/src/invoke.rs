//! Script-to-native calls
//!
//! [`OutboundInvoker::invoke`] receives the arguments of a script call of
//! the form `invoke(name, signature, ...values)`:
//!
//! 1. the values are checked against the signature and copied into a
//!    pre-sized buffer owned by the invoker; nothing is called when any of
//!    them does not fit
//! 2. the native is called through a [`NativeDispatcher`], with a length
//!    argument of [`MAX_STRING_LENGTH`] injected after every `S` slot
//! 3. the reference slots are read back: none yields the native's return
//!    value, one yields that value itself, several yield an array
//!
//! The buffer is reused by every call, so an invoker is not reentrant.

use pawnbridge_sdk::{
    cell_to_float, float_to_cell, Cell, ScriptValue, Signature, SignatureError, SignatureType,
    MAX_ARGUMENT_COUNT,
};
use thiserror::Error;

use crate::amx::strings::from_ansi;
use crate::registry::{CallError, NativeArgument, NativeDispatcher};

/// Capacity of a string argument or result, including the terminator
pub const MAX_STRING_LENGTH: usize = 2048;

/// Maximum number of entries in an array argument
pub const MAX_ARRAY_LENGTH: usize = 144;

/// Errors raised by [`OutboundInvoker::invoke`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    /// The first argument is not a string
    #[error("Expected the function name as argument 0")]
    MissingName,

    /// The function name is empty
    #[error("The function name must not be empty")]
    EmptyName,

    /// No native of that name is known
    #[error("Unknown native function: {name}")]
    UnknownFunction {
        /// The requested name
        name: String,
    },

    /// The second argument is not a string
    #[error("Expected a string for argument 1")]
    SignatureNotString,

    /// The signature does not parse
    #[error("Cannot parse the signature: {0}")]
    Signature(#[from] SignatureError),

    /// The call would need more physical arguments than supported
    #[error("The signature needs {count} arguments, at most {max} are supported")]
    TooManyArguments {
        /// Physical argument count
        count: usize,
        /// The limit
        max: usize,
    },

    /// Wrong number of values
    #[error("{expected} arguments required, but {provided} provided")]
    ArgumentCount {
        /// Required number of arguments, name and signature included
        expected: usize,
        /// Supplied number of arguments
        provided: usize,
    },

    /// A value does not have the type its slot requires
    #[error("Type mismatch for argument {index}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Index of the argument
        index: usize,
        /// Required type
        expected: &'static str,
        /// Supplied type
        found: &'static str,
    },

    /// A string does not fit in its buffer
    #[error("String overflow for argument {index}")]
    StringOverflow {
        /// Index of the argument
        index: usize,
    },

    /// An array has too many entries
    #[error("Too many array values for argument {index}")]
    ArrayOverflow {
        /// Index of the argument
        index: usize,
    },

    /// The native could not be called
    #[error(transparent)]
    Call(#[from] CallError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Integer,
    Float,
    IntReference,
    FloatReference,
    Text,
    Array,
    StringBuffer,
}

struct StaticBuffer {
    slots: [Slot; MAX_ARGUMENT_COUNT],
    numbers: [Cell; MAX_ARGUMENT_COUNT],
    texts: [String; MAX_ARGUMENT_COUNT],
    outputs: [[u8; MAX_STRING_LENGTH]; MAX_ARGUMENT_COUNT],
    arrays: [[Cell; MAX_ARRAY_LENGTH]; MAX_ARGUMENT_COUNT],
}

impl StaticBuffer {
    fn new() -> Box<Self> {
        Box::new(StaticBuffer {
            slots: [Slot::Integer; MAX_ARGUMENT_COUNT],
            numbers: [0; MAX_ARGUMENT_COUNT],
            texts: std::array::from_fn(|_| String::with_capacity(MAX_STRING_LENGTH)),
            outputs: [[0; MAX_STRING_LENGTH]; MAX_ARGUMENT_COUNT],
            arrays: [[0; MAX_ARRAY_LENGTH]; MAX_ARGUMENT_COUNT],
        })
    }
}

/// Calls natives on behalf of the script host.
pub struct OutboundInvoker {
    buffer: Box<StaticBuffer>,
}

impl OutboundInvoker {
    /// Create an invoker with its own buffer
    pub fn new() -> Self {
        OutboundInvoker {
            buffer: StaticBuffer::new(),
        }
    }

    /// Call the native named by `arguments[0]` with the signature in
    /// `arguments[1]` and the values that follow.
    pub fn invoke(
        &mut self,
        dispatcher: &mut dyn NativeDispatcher,
        arguments: &[ScriptValue],
    ) -> Result<ScriptValue, InvokeError> {
        let name = arguments
            .first()
            .and_then(ScriptValue::as_str)
            .ok_or(InvokeError::MissingName)?;

        if name.is_empty() {
            return Err(InvokeError::EmptyName);
        }

        if !dispatcher.function_exists(name) {
            return Err(InvokeError::UnknownFunction {
                name: name.to_string(),
            });
        }

        if arguments.len() == 1 {
            let result = dispatcher.call_function(name, &mut [])?;
            return Ok(ScriptValue::Number(result as f64));
        }

        let signature = arguments[1]
            .as_str()
            .ok_or(InvokeError::SignatureNotString)?;
        let signature = Signature::parse(signature)?;

        let physical_count = signature.physical_count();
        if physical_count > MAX_ARGUMENT_COUNT {
            return Err(InvokeError::TooManyArguments {
                count: physical_count,
                max: MAX_ARGUMENT_COUNT,
            });
        }

        let expected = signature.argument_count() + 2;
        let with_placeholders = expected + signature.reference_count();
        if arguments.len() != expected && arguments.len() != with_placeholders {
            return Err(InvokeError::ArgumentCount {
                expected,
                provided: arguments.len(),
            });
        }

        self.load(&signature, &arguments[2..expected])?;

        let result = self.call(dispatcher, name, physical_count)?;
        if signature.reference_count() == 0 {
            return Ok(ScriptValue::Number(result as f64));
        }

        let mut results = self.results(physical_count);
        if results.len() == 1 {
            Ok(results.remove(0))
        } else {
            Ok(ScriptValue::Array(results))
        }
    }

    /// Validate `values` against `signature` and copy them into the buffer.
    fn load(&mut self, signature: &Signature, values: &[ScriptValue]) -> Result<(), InvokeError> {
        let buffer = &mut *self.buffer;
        let mut values = values.iter().enumerate();
        let mut slot = 0;

        for ty in signature.types() {
            let mut next = |expected: &'static str| -> Result<(usize, &ScriptValue), InvokeError> {
                // The argument count was checked against the signature.
                values
                    .next()
                    .map(|(position, value)| (position + 2, value))
                    .ok_or(InvokeError::TypeMismatch {
                        index: 2,
                        expected,
                        found: "nothing",
                    })
            };

            match ty {
                SignatureType::Int => {
                    let (index, value) = next("number")?;
                    buffer.numbers[slot] = value.to_int32().ok_or(InvokeError::TypeMismatch {
                        index,
                        expected: "number",
                        found: value.type_name(),
                    })?;
                    buffer.slots[slot] = Slot::Integer;
                }
                SignatureType::Float => {
                    let (index, value) = next("number")?;
                    let number = value.as_number().ok_or(InvokeError::TypeMismatch {
                        index,
                        expected: "number",
                        found: value.type_name(),
                    })?;
                    buffer.numbers[slot] = float_to_cell(number as f32);
                    buffer.slots[slot] = Slot::Float;
                }
                SignatureType::String => {
                    let (index, value) = next("string")?;
                    let text = value.to_text();
                    if text.len() >= MAX_STRING_LENGTH {
                        return Err(InvokeError::StringOverflow { index });
                    }

                    buffer.texts[slot].clear();
                    buffer.texts[slot].push_str(&text);
                    buffer.slots[slot] = Slot::Text;
                }
                SignatureType::Array => {
                    let (index, value) = next("array")?;
                    let entries = value.as_array().ok_or(InvokeError::TypeMismatch {
                        index,
                        expected: "array",
                        found: value.type_name(),
                    })?;
                    if entries.len() > MAX_ARRAY_LENGTH {
                        return Err(InvokeError::ArrayOverflow { index });
                    }

                    let array = &mut buffer.arrays[slot];
                    array.fill(0);
                    for (cell, entry) in array.iter_mut().zip(entries) {
                        *cell = entry.to_int32().ok_or(InvokeError::TypeMismatch {
                            index,
                            expected: "array of numbers",
                            found: entry.type_name(),
                        })?;
                    }
                    buffer.slots[slot] = Slot::Array;
                }
                SignatureType::IntReference => {
                    buffer.numbers[slot] = 0;
                    buffer.slots[slot] = Slot::IntReference;
                }
                SignatureType::FloatReference => {
                    buffer.numbers[slot] = 0;
                    buffer.slots[slot] = Slot::FloatReference;
                }
                SignatureType::StringReference => {
                    buffer.outputs[slot][0] = 0;
                    buffer.slots[slot] = Slot::StringBuffer;

                    slot += 1;
                    buffer.numbers[slot] = MAX_STRING_LENGTH as Cell;
                    buffer.slots[slot] = Slot::Integer;
                }
            }

            slot += 1;
        }

        Ok(())
    }

    fn call(
        &mut self,
        dispatcher: &mut dyn NativeDispatcher,
        name: &str,
        count: usize,
    ) -> Result<Cell, InvokeError> {
        let StaticBuffer {
            slots,
            numbers,
            texts,
            outputs,
            arrays,
        } = &mut *self.buffer;

        let mut native_arguments = Vec::with_capacity(count);
        let buffers = numbers
            .iter_mut()
            .zip(texts.iter())
            .zip(outputs.iter_mut())
            .zip(arrays.iter_mut());

        for (slot, (((number, text), output), array)) in slots[..count].iter().zip(buffers) {
            native_arguments.push(match slot {
                Slot::Integer => NativeArgument::Integer(*number),
                Slot::Float => NativeArgument::Float(cell_to_float(*number)),
                Slot::IntReference | Slot::FloatReference => NativeArgument::Reference(number),
                Slot::Text => NativeArgument::Text(text.as_str()),
                Slot::Array => NativeArgument::Array(&mut array[..]),
                Slot::StringBuffer => NativeArgument::StringBuffer(&mut output[..]),
            });
        }

        Ok(dispatcher.call_function(name, &mut native_arguments)?)
    }

    /// The values of the reference slots, in signature order.
    fn results(&self, count: usize) -> Vec<ScriptValue> {
        let buffer = &*self.buffer;
        let mut results = Vec::new();

        for slot in 0..count {
            match buffer.slots[slot] {
                Slot::IntReference => results.push(ScriptValue::Number(buffer.numbers[slot] as f64)),
                Slot::FloatReference => results.push(ScriptValue::Number(
                    cell_to_float(buffer.numbers[slot]) as f64,
                )),
                Slot::StringBuffer => {
                    let output = &buffer.outputs[slot];
                    let length = output.iter().position(|byte| *byte == 0).unwrap_or(output.len());
                    results.push(ScriptValue::String(from_ansi(&output[..length])));
                }
                _ => {}
            }
        }

        results
    }
}

impl Default for OutboundInvoker {
    fn default() -> Self {
        Self::new()
    }
}
