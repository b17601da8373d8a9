//! Native function discovery and typed native calls
//!
//! The server registers the natives of every include (its own and those of
//! other plugins) through `amx_Register`. Hooking that function lets the
//! bridge learn their addresses, after which they can be called directly
//! against the [`SyntheticContext`], with or without a loaded program.
//!
//! The registration hook itself lives with the plugin, which must always
//! forward to the original function after [`FunctionRegistry::on_register_raw`].

use std::collections::HashMap;
use std::ffi::CStr;
use std::os::raw::c_int;

use pawnbridge_sdk::{float_to_cell, Cell};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::amx::{AmxNativeInfo, NativeFn};
use crate::hook::{Hook, HookError};
use crate::synthetic::{SyntheticContext, SyntheticError};

/// Errors raised when calling a native
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// No native of that name has been registered
    #[error("Unknown native function: {name}")]
    UnknownFunction {
        /// The requested name
        name: String,
    },

    /// The length argument of an array is missing or too large
    #[error("Argument {index}: the array length at argument {length_index} is invalid")]
    ArrayLength {
        /// Index of the array argument
        index: usize,
        /// Index where its length was expected
        length_index: usize,
    },

    /// The synthetic heap cannot hold the arguments
    #[error(transparent)]
    Memory(#[from] SyntheticError),
}

/// A physical argument of a native call.
///
/// Borrowed outputs receive what the native wrote once the call returns.
#[derive(Debug)]
pub enum NativeArgument<'a> {
    /// A plain cell (`i`)
    Integer(Cell),
    /// A float passed by value (`f`)
    Float(f32),
    /// A cell passed by reference (`r`)
    Reference(&'a mut Cell),
    /// A string passed by address (`s`)
    Text(&'a str),
    /// An array passed by address and read back (`a`); its length is given
    /// by an [`NativeArgument::Integer`] further along, see [`ArrayLengthTable`]
    Array(&'a mut [Cell]),
    /// An output string buffer of `len()` cells, read back as zero-terminated
    /// bytes in the server code page (`a`)
    StringBuffer(&'a mut [u8]),
}

impl NativeArgument<'_> {
    /// The format character describing this argument
    pub fn format(&self) -> char {
        match self {
            NativeArgument::Integer(_) => 'i',
            NativeArgument::Float(_) => 'f',
            NativeArgument::Reference(_) => 'r',
            NativeArgument::Text(_) => 's',
            NativeArgument::Array(_) | NativeArgument::StringBuffer(_) => 'a',
        }
    }
}

/// Where natives expect the length of their array arguments.
///
/// For each native, the distance from the n-th array argument to the integer
/// argument holding its length. Natives without an entry, and array
/// occurrences beyond the listed ones, use a distance of 1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ArrayLengthTable {
    offsets: HashMap<String, Vec<usize>>,
}

impl ArrayLengthTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the offsets for `name`, by array occurrence.
    pub fn insert(&mut self, name: impl Into<String>, offsets: Vec<usize>) {
        self.offsets.insert(name.into(), offsets);
    }

    /// Offset of the length of the `occurrence`-th array of `name`
    pub fn offset(&self, name: &str, occurrence: usize) -> usize {
        self.offsets
            .get(name)
            .and_then(|offsets| offsets.get(occurrence))
            .copied()
            .unwrap_or(1)
    }

    /// Number of natives with explicit offsets
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether no native has explicit offsets
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Something that can call natives by name.
pub trait NativeDispatcher {
    /// Whether a native called `name` is known
    fn function_exists(&self, name: &str) -> bool;

    /// Call the native `name` with the given physical arguments.
    fn call_function(
        &mut self,
        name: &str,
        arguments: &mut [NativeArgument<'_>],
    ) -> Result<Cell, CallError>;
}

/// Table of natives registered with the runtime.
pub struct FunctionRegistry {
    natives: HashMap<String, NativeFn>,
    context: SyntheticContext,
    array_lengths: ArrayLengthTable,
    params: Vec<Cell>,
    installed: bool,
}

impl FunctionRegistry {
    /// Create an empty registry
    pub fn new(array_lengths: ArrayLengthTable) -> Self {
        FunctionRegistry {
            natives: HashMap::new(),
            context: SyntheticContext::new(),
            array_lengths,
            params: Vec::with_capacity(32),
            installed: false,
        }
    }

    /// Install the registration hook.
    pub fn install(&mut self, hook: &mut dyn Hook) -> Result<(), HookError> {
        if !hook.is_installed() {
            hook.install()?;
        }
        self.installed = true;
        Ok(())
    }

    /// Whether the registration hook is in place
    pub fn is_installed(&self) -> bool {
        self.installed
    }

    /// Record natives; the first registration of a name wins.
    pub fn on_register<I, S>(&mut self, natives: I)
    where
        I: IntoIterator<Item = (S, NativeFn)>,
        S: Into<String>,
    {
        let before = self.natives.len();
        for (name, function) in natives {
            self.natives.entry(name.into()).or_insert(function);
        }

        if self.natives.len() != before {
            debug!(
                added = self.natives.len() - before,
                total = self.natives.len(),
                "Registered natives"
            );
        }
    }

    /// Record the natives of an `amx_Register` call. The list ends at the
    /// first empty entry, and after `number` entries when `number > 0`.
    ///
    /// # Safety
    ///
    /// `natives` must point to a list as passed to `amx_Register`.
    pub unsafe fn on_register_raw(&mut self, natives: *const AmxNativeInfo, number: c_int) {
        if natives.is_null() {
            return;
        }

        let mut entries = Vec::new();
        let mut index = 0usize;
        loop {
            if number > 0 && index >= number as usize {
                break;
            }

            let entry = *natives.add(index);
            index += 1;

            match (entry.name.is_null(), entry.func) {
                (false, Some(function)) => {
                    let name = CStr::from_ptr(entry.name).to_string_lossy().into_owned();
                    entries.push((name, function));
                }
                _ => break,
            }
        }

        self.on_register(entries);
    }

    /// The native called `name`
    pub fn get(&self, name: &str) -> Option<NativeFn> {
        self.natives.get(name).copied()
    }

    /// Number of known natives
    pub fn len(&self) -> usize {
        self.natives.len()
    }

    /// Whether no natives are known
    pub fn is_empty(&self) -> bool {
        self.natives.is_empty()
    }

    /// The context natives are called against
    pub fn context(&self) -> &SyntheticContext {
        &self.context
    }
}

impl NativeDispatcher for FunctionRegistry {
    fn function_exists(&self, name: &str) -> bool {
        self.natives.contains_key(name)
    }

    fn call_function(
        &mut self,
        name: &str,
        arguments: &mut [NativeArgument<'_>],
    ) -> Result<Cell, CallError> {
        let Some(function) = self.get(name) else {
            warn!(native = name, "Unable to call unknown native function");
            return Err(CallError::UnknownFunction {
                name: name.to_string(),
            });
        };

        let mut scope = self.context.scope();
        let mut lengths = vec![0usize; arguments.len()];

        self.params.clear();
        self.params
            .push((arguments.len() * std::mem::size_of::<Cell>()) as Cell);

        let mut occurrence = 0;
        for (index, argument) in arguments.iter().enumerate() {
            let value = match argument {
                NativeArgument::Integer(value) => *value,
                NativeArgument::Float(value) => float_to_cell(*value),
                NativeArgument::Reference(cell) => scope.push_cell(**cell)?,
                NativeArgument::Text(text) => scope.push_string(text)?,
                NativeArgument::Array(values) => {
                    let length_index = index + self.array_lengths.offset(name, occurrence);
                    occurrence += 1;

                    let length = match arguments.get(length_index) {
                        Some(NativeArgument::Integer(length))
                            if *length >= 0 && *length as usize <= values.len() =>
                        {
                            *length as usize
                        }
                        _ => return Err(CallError::ArrayLength { index, length_index }),
                    };

                    lengths[index] = length;
                    scope.push_cells(&values[..length])?
                }
                NativeArgument::StringBuffer(buffer) => scope.push_array(buffer.len())?,
            };
            self.params.push(value);
        }

        let result = unsafe { function(scope.amx(), self.params.as_ptr()) };

        for (index, argument) in arguments.iter_mut().enumerate() {
            let address = self.params[index + 1];
            match argument {
                NativeArgument::Reference(cell) => **cell = scope.read_cell(address)?,
                NativeArgument::Array(values) => {
                    scope.read_array(address, &mut values[..lengths[index]])?
                }
                NativeArgument::StringBuffer(buffer) => {
                    let capacity = buffer.len();
                    scope.read_string(address, capacity, buffer)?;
                }
                _ => {}
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amx::{memory, Amx};
    use pawnbridge_sdk::cell_to_float;
    use std::ffi::CString;

    unsafe fn parameters<'a>(params: *const Cell) -> &'a [Cell] {
        let count = (*params / 4) as usize;
        std::slice::from_raw_parts(params.add(1), count)
    }

    unsafe extern "C" fn sum(_amx: *mut Amx, params: *const Cell) -> Cell {
        parameters(params).iter().sum()
    }

    unsafe extern "C" fn zero(_amx: *mut Amx, _params: *const Cell) -> Cell {
        0
    }

    /// GetPlayerPos(playerid, &Float:x, &Float:y, &Float:z)
    unsafe extern "C" fn get_position(amx: *mut Amx, params: *const Cell) -> Cell {
        let params = parameters(params);
        for (index, value) in [1.5f32, -2.0, 3.25].iter().enumerate() {
            memory::write_cell(amx, params[index + 1], float_to_cell(*value + params[0] as f32));
        }
        1
    }

    /// strlen(const string[])
    unsafe extern "C" fn string_length(amx: *mut Amx, params: *const Cell) -> Cell {
        let mut bytes = Vec::new();
        memory::read_string(amx, parameters(params)[0], &mut bytes);
        bytes.len() as Cell
    }

    /// DoubleAll(array[], size)
    unsafe extern "C" fn double_all(amx: *mut Amx, params: *const Cell) -> Cell {
        let params = parameters(params);
        for index in 0..params[1] {
            let address = params[0] + index * 4;
            let value = memory::read_cell(amx, address).unwrap_or(0);
            memory::write_cell(amx, address, value * 2);
        }
        params[1]
    }

    /// GetName(buffer[], size)
    unsafe extern "C" fn get_name(amx: *mut Amx, params: *const Cell) -> Cell {
        let params = parameters(params);
        if let Some(cells) = memory::cells_mut(amx, params[0]) {
            crate::amx::strings::encode_cells(b"Gunther", &mut cells[..params[1] as usize]);
        }
        1
    }

    fn registry() -> FunctionRegistry {
        let mut registry = FunctionRegistry::new(ArrayLengthTable::new());
        registry.on_register([
            ("Sum", sum as NativeFn),
            ("GetPlayerPos", get_position as NativeFn),
            ("strlen", string_length as NativeFn),
            ("DoubleAll", double_all as NativeFn),
            ("GetName", get_name as NativeFn),
        ]);
        registry
    }

    #[test]
    fn test_first_registration_wins() {
        let mut registry = registry();
        registry.on_register([("Sum", zero as NativeFn), ("Zero", zero as NativeFn)]);

        assert_eq!(registry.len(), 6);
        assert_eq!(
            registry
                .call_function("Sum", &mut [NativeArgument::Integer(2), NativeArgument::Integer(3)])
                .unwrap(),
            5
        );
    }

    #[test]
    fn test_raw_registration() {
        let names = [CString::new("Sum").unwrap(), CString::new("Zero").unwrap()];
        let natives = [
            AmxNativeInfo {
                name: names[0].as_ptr(),
                func: Some(sum),
            },
            AmxNativeInfo {
                name: names[1].as_ptr(),
                func: Some(zero),
            },
            AmxNativeInfo {
                name: std::ptr::null(),
                func: None,
            },
        ];

        let mut counted = FunctionRegistry::new(ArrayLengthTable::new());
        unsafe { counted.on_register_raw(natives.as_ptr(), 1) };
        assert!(counted.function_exists("Sum"));
        assert!(!counted.function_exists("Zero"));

        let mut terminated = FunctionRegistry::new(ArrayLengthTable::new());
        unsafe { terminated.on_register_raw(natives.as_ptr(), -1) };
        assert_eq!(terminated.len(), 2);
    }

    #[test]
    fn test_raw_registration_stops_at_empty_entry() {
        let names = [CString::new("Sum").unwrap(), CString::new("Zero").unwrap()];
        let natives = [
            AmxNativeInfo {
                name: names[0].as_ptr(),
                func: Some(sum),
            },
            AmxNativeInfo {
                name: std::ptr::null(),
                func: None,
            },
            AmxNativeInfo {
                name: names[1].as_ptr(),
                func: Some(zero),
            },
        ];

        let mut registry = FunctionRegistry::new(ArrayLengthTable::new());
        unsafe { registry.on_register_raw(natives.as_ptr(), 3) };
        assert!(registry.function_exists("Sum"));
        assert!(!registry.function_exists("Zero"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_function() {
        let mut registry = registry();
        assert_eq!(
            registry.call_function("Missing", &mut []),
            Err(CallError::UnknownFunction {
                name: "Missing".to_string()
            })
        );
    }

    #[test]
    fn test_references_are_read_back() {
        let mut registry = registry();
        let (mut x, mut y, mut z) = (0, 0, 0);
        let result = registry
            .call_function(
                "GetPlayerPos",
                &mut [
                    NativeArgument::Integer(10),
                    NativeArgument::Reference(&mut x),
                    NativeArgument::Reference(&mut y),
                    NativeArgument::Reference(&mut z),
                ],
            )
            .unwrap();

        assert_eq!(result, 1);
        assert_eq!(cell_to_float(x), 11.5);
        assert_eq!(cell_to_float(y), 8.0);
        assert_eq!(cell_to_float(z), 13.25);
        assert_eq!(registry.context().heap_top(), 0);
    }

    #[test]
    fn test_strings_and_buffers() {
        let mut registry = registry();
        assert_eq!(
            registry
                .call_function("strlen", &mut [NativeArgument::Text("héllo")])
                .unwrap(),
            5
        );

        let mut buffer = [0u8; 32];
        registry
            .call_function(
                "GetName",
                &mut [
                    NativeArgument::StringBuffer(&mut buffer),
                    NativeArgument::Integer(32),
                ],
            )
            .unwrap();
        assert_eq!(&buffer[..8], b"Gunther\0");
    }

    #[test]
    fn test_arrays_use_length_offsets() {
        let mut registry = registry();
        let mut values = [1, 2, 3, 4];
        let result = registry
            .call_function(
                "DoubleAll",
                &mut [NativeArgument::Array(&mut values), NativeArgument::Integer(3)],
            )
            .unwrap();
        assert_eq!(result, 3);
        assert_eq!(values, [2, 4, 6, 4]);

        let mut values = [1, 2];
        assert_eq!(
            registry.call_function(
                "DoubleAll",
                &mut [NativeArgument::Array(&mut values), NativeArgument::Integer(3)],
            ),
            Err(CallError::ArrayLength {
                index: 0,
                length_index: 1
            })
        );
    }

    #[test]
    fn test_length_table() {
        let mut table = ArrayLengthTable::new();
        table.insert("CreateDynamicPolygonEx", vec![3, 4]);
        assert_eq!(table.offset("CreateDynamicPolygonEx", 0), 3);
        assert_eq!(table.offset("CreateDynamicPolygonEx", 1), 4);
        assert_eq!(table.offset("CreateDynamicPolygonEx", 2), 1);
        assert_eq!(table.offset("SetPlayerPos", 0), 1);
    }
}
