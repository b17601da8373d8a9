//! The server's export table
//!
//! Plugins do not link against the runtime. Instead the server hands them a
//! table of function pointers in `Load`, indexed by [`AmxExport`]. Hooks
//! patch entries of this table (or the code behind them), and the public
//! caller uses it to push arguments and execute functions.

use std::ffi::{c_void, CStr};
use std::mem::size_of;
use std::os::raw::{c_char, c_int};
use std::ptr::NonNull;

use super::{Amx, Cell, ExecFn, RegisterFn, AMX_ERR_GENERAL, AMX_ERR_NONE};

/// Index of an entry in the export table
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmxExport {
    Exec = 7,
    FindPublic = 9,
    NumPublics = 26,
    Push = 29,
    PushArray = 30,
    PushString = 31,
    Register = 33,
    Release = 34,
}

/// Number of entries the server's table is known to have
pub const EXPORT_COUNT: usize = 44;

type FindPublicFn =
    unsafe extern "C" fn(amx: *mut Amx, name: *const c_char, index: *mut c_int) -> c_int;
type PushFn = unsafe extern "C" fn(amx: *mut Amx, value: Cell) -> c_int;
type PushArrayFn = unsafe extern "C" fn(
    amx: *mut Amx,
    amx_addr: *mut Cell,
    phys_addr: *mut *mut Cell,
    array: *const Cell,
    numcells: c_int,
) -> c_int;
type PushStringFn = unsafe extern "C" fn(
    amx: *mut Amx,
    amx_addr: *mut Cell,
    phys_addr: *mut *mut Cell,
    string: *const c_char,
    pack: c_int,
    use_wchar: c_int,
) -> c_int;
type ReleaseFn = unsafe extern "C" fn(amx: *mut Amx, amx_addr: Cell) -> c_int;

/// Handle to the server's export table.
#[derive(Debug, Clone, Copy)]
pub struct ExportTable {
    table: NonNull<*mut c_void>,
}

impl ExportTable {
    /// Wrap the table received in `Load`.
    ///
    /// # Safety
    ///
    /// `table` must point to at least [`EXPORT_COUNT`] function pointers that
    /// stay valid for as long as the handle is used.
    pub unsafe fn from_raw(table: *mut c_void) -> Option<Self> {
        NonNull::new(table as *mut *mut c_void).map(|table| ExportTable { table })
    }

    /// Pointer to the table entry for `export`
    pub fn slot(&self, export: AmxExport) -> *mut *mut c_void {
        // The index is below EXPORT_COUNT by construction of AmxExport.
        unsafe { self.table.as_ptr().add(export as usize) }
    }

    /// Current address stored in the table entry for `export`
    pub fn address(&self, export: AmxExport) -> *mut c_void {
        unsafe { *self.slot(export) }
    }

    /// Reads the entry for `export` as a function pointer of type `F`.
    ///
    /// # Safety
    ///
    /// `F` must be the function pointer type matching `export`.
    unsafe fn entry<F: Copy>(&self, export: AmxExport) -> Option<F> {
        debug_assert_eq!(size_of::<F>(), size_of::<*mut c_void>());
        let address = self.address(export);
        if address.is_null() {
            None
        } else {
            Some(std::mem::transmute_copy::<*mut c_void, F>(&address))
        }
    }

    /// `amx_Exec` as currently installed in the table.
    ///
    /// # Safety
    ///
    /// The table must be valid.
    pub unsafe fn exec_fn(&self) -> Option<ExecFn> {
        self.entry(AmxExport::Exec)
    }

    /// `amx_Register` as currently installed in the table.
    ///
    /// # Safety
    ///
    /// The table must be valid.
    pub unsafe fn register_fn(&self) -> Option<RegisterFn> {
        self.entry(AmxExport::Register)
    }

    /// Looks up the index of the public function `name`.
    ///
    /// # Safety
    ///
    /// `amx` must be a program loaded by the server.
    pub unsafe fn find_public(&self, amx: *mut Amx, name: &CStr) -> Result<c_int, c_int> {
        let find = self
            .entry::<FindPublicFn>(AmxExport::FindPublic)
            .ok_or(AMX_ERR_GENERAL)?;

        let mut index: c_int = 0;
        match find(amx, name.as_ptr(), &mut index) {
            AMX_ERR_NONE => Ok(index),
            error => Err(error),
        }
    }

    /// Pushes a cell for the next execution.
    ///
    /// # Safety
    ///
    /// `amx` must be a program loaded by the server.
    pub unsafe fn push(&self, amx: *mut Amx, value: Cell) -> Result<(), c_int> {
        let push = self
            .entry::<PushFn>(AmxExport::Push)
            .ok_or(AMX_ERR_GENERAL)?;

        match push(amx, value) {
            AMX_ERR_NONE => Ok(()),
            error => Err(error),
        }
    }

    /// Copies `values` onto the program's heap and pushes their address.
    /// Returns the address, to be released after execution.
    ///
    /// # Safety
    ///
    /// `amx` must be a program loaded by the server.
    pub unsafe fn push_array(&self, amx: *mut Amx, values: &[Cell]) -> Result<Cell, c_int> {
        let push_array = self
            .entry::<PushArrayFn>(AmxExport::PushArray)
            .ok_or(AMX_ERR_GENERAL)?;

        let mut address: Cell = 0;
        let mut physical: *mut Cell = std::ptr::null_mut();
        match push_array(
            amx,
            &mut address,
            &mut physical,
            values.as_ptr(),
            values.len() as c_int,
        ) {
            AMX_ERR_NONE => Ok(address),
            error => Err(error),
        }
    }

    /// Copies `text` (in the server code page) onto the program's heap as an
    /// unpacked string and pushes its address. Returns the address, to be
    /// released after execution.
    ///
    /// # Safety
    ///
    /// `amx` must be a program loaded by the server.
    pub unsafe fn push_string(&self, amx: *mut Amx, text: &CStr) -> Result<Cell, c_int> {
        let push_string = self
            .entry::<PushStringFn>(AmxExport::PushString)
            .ok_or(AMX_ERR_GENERAL)?;

        let mut address: Cell = 0;
        let mut physical: *mut Cell = std::ptr::null_mut();
        match push_string(amx, &mut address, &mut physical, text.as_ptr(), 0, 0) {
            AMX_ERR_NONE => Ok(address),
            error => Err(error),
        }
    }

    /// Executes the function at `index`, returning its return value.
    ///
    /// # Safety
    ///
    /// `amx` must be a program loaded by the server.
    pub unsafe fn exec(&self, amx: *mut Amx, index: c_int) -> Result<Cell, c_int> {
        let exec = self.exec_fn().ok_or(AMX_ERR_GENERAL)?;

        let mut retval: Cell = 0;
        match exec(amx, &mut retval, index) {
            AMX_ERR_NONE => Ok(retval),
            error => Err(error),
        }
    }

    /// Releases heap memory allocated by a push, together with everything
    /// allocated after it.
    ///
    /// # Safety
    ///
    /// `amx` must be a program loaded by the server.
    pub unsafe fn release(&self, amx: *mut Amx, address: Cell) -> Result<(), c_int> {
        let release = self
            .entry::<ReleaseFn>(AmxExport::Release)
            .ok_or(AMX_ERR_GENERAL)?;

        match release(amx, address) {
            AMX_ERR_NONE => Ok(()),
            error => Err(error),
        }
    }
}
