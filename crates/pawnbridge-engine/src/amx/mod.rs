//! Pawn runtime ABI
//!
//! `#[repr(C)]` mirrors of the structures the SA-MP server shares with plugins,
//! together with the constants of the plugin interface. Layouts follow the
//! `amx.h` shipped with the server's plugin SDK.
//!
//! - [`memory`]: address translation, stack and string access on a raw [`Amx`]
//! - [`strings`]: server code page conversion and cell string encoding
//! - [`exports`]: the server's table of exported runtime functions

#![allow(missing_docs)]

pub mod exports;
pub mod memory;
pub mod strings;

use std::ffi::c_void;
use std::os::raw::{c_char, c_int, c_long};

pub use exports::{AmxExport, ExportTable};
pub use pawnbridge_sdk::Cell;

/// Unsigned cell
pub type Ucell = u32;

/// Signature of a native function implemented by the server or a plugin.
pub type NativeFn = unsafe extern "C" fn(amx: *mut Amx, params: *const Cell) -> Cell;

/// Signature of `amx_Exec`.
pub type ExecFn = unsafe extern "C" fn(amx: *mut Amx, retval: *mut Cell, index: c_int) -> c_int;

/// Signature of `amx_Register`.
pub type RegisterFn =
    unsafe extern "C" fn(amx: *mut Amx, natives: *const AmxNativeInfo, number: c_int) -> c_int;

/// Signature of the server's `logprintf`.
pub type LogPrintFn = unsafe extern "C" fn(format: *const c_char, ...);

// ============================================================================
// Structures
// ============================================================================

/// Number of user data slots in an [`Amx`]
pub const AMX_USERNUM: usize = 4;

/// The state of one loaded program.
#[repr(C)]
#[derive(Debug)]
pub struct Amx {
    /// Points to the program image, starting with its [`AmxHeader`]
    pub base: *mut u8,
    /// Points to the data segment, or null when it follows the code
    pub data: *mut u8,
    pub callback: *mut c_void,
    pub debug: *mut c_void,
    pub cip: Cell,
    pub frm: Cell,
    /// Top of the heap
    pub hea: Cell,
    /// Bottom of the heap
    pub hlw: Cell,
    /// Stack pointer; the stack grows down towards the heap
    pub stk: Cell,
    /// Top of the stack
    pub stp: Cell,
    pub flags: c_int,
    pub usertags: [c_long; AMX_USERNUM],
    pub userdata: [*mut c_void; AMX_USERNUM],
    pub error: c_int,
    /// Number of arguments pushed for the next execution
    pub paramcount: c_int,
    pub pri: Cell,
    pub alt: Cell,
    pub reset_stk: Cell,
    pub reset_hea: Cell,
    pub sysreq_d: Cell,
}

impl Amx {
    /// An all-zero instance
    pub fn zeroed() -> Self {
        Amx {
            base: std::ptr::null_mut(),
            data: std::ptr::null_mut(),
            callback: std::ptr::null_mut(),
            debug: std::ptr::null_mut(),
            cip: 0,
            frm: 0,
            hea: 0,
            hlw: 0,
            stk: 0,
            stp: 0,
            flags: 0,
            usertags: [0; AMX_USERNUM],
            userdata: [std::ptr::null_mut(); AMX_USERNUM],
            error: 0,
            paramcount: 0,
            pri: 0,
            alt: 0,
            reset_stk: 0,
            reset_hea: 0,
            sysreq_d: 0,
        }
    }
}

/// Header at the start of every program image.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct AmxHeader {
    pub size: i32,
    pub magic: u16,
    pub file_version: u8,
    pub amx_version: u8,
    pub flags: i16,
    /// Size of one entry in the public/native tables
    pub defsize: i16,
    pub cod: i32,
    /// Offset of the data segment from the start of the image
    pub dat: i32,
    pub hea: i32,
    pub stp: i32,
    pub cip: i32,
    /// Offset of the public function table
    pub publics: i32,
    /// Offset of the native function table, directly after the publics
    pub natives: i32,
    pub libraries: i32,
    pub pubvars: i32,
    pub tags: i32,
    pub nametable: i32,
}

/// Entry of a function table that refers into the name table.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AmxFuncStubNt {
    pub address: Ucell,
    pub nameofs: u32,
}

/// Entry of a function table with an inline name.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AmxFuncStub {
    pub address: Ucell,
    pub name: [c_char; S_EXPMAX + 1],
}

/// One entry of a native registration list.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AmxNativeInfo {
    pub name: *const c_char,
    pub func: Option<NativeFn>,
}

// ============================================================================
// Constants
// ============================================================================

/// Maximum length of an inline function name
pub const S_EXPMAX: usize = 19;
/// Maximum length of a symbol name
pub const S_NAMEMAX: usize = 31;

pub const AMX_MAGIC: u16 = 0xf1e0;
pub const CUR_FILE_VERSION: u8 = 8;
pub const MIN_AMX_VERSION: u8 = 8;

pub const AMX_FLAG_NTVREG: c_int = 0x1000;
pub const AMX_FLAG_RELOC: c_int = 0x8000;

/// Index passed to `amx_Exec` to run the program's `main`
pub const AMX_EXEC_MAIN: c_int = -1;
/// Index passed to `amx_Exec` to continue a sleeping program
pub const AMX_EXEC_CONT: c_int = -2;

/// Largest cell value that is an unpacked character
pub const UNPACKED_MAX: Ucell = (1 << (32 - 8)) - 1;

pub const AMX_ERR_NONE: c_int = 0;
pub const AMX_ERR_EXIT: c_int = 1;
pub const AMX_ERR_STACKERR: c_int = 3;
pub const AMX_ERR_BOUNDS: c_int = 4;
pub const AMX_ERR_MEMACCESS: c_int = 5;
pub const AMX_ERR_NATIVE: c_int = 10;
pub const AMX_ERR_MEMORY: c_int = 16;
pub const AMX_ERR_NOTFOUND: c_int = 19;
pub const AMX_ERR_INDEX: c_int = 20;
pub const AMX_ERR_PARAMS: c_int = 25;
pub const AMX_ERR_GENERAL: c_int = 27;

/// Plugin capability flags returned from `Supports`
pub const SUPPORTS_VERSION: u32 = 0x0200;
pub const SUPPORTS_AMX_NATIVES: u32 = 0x10000;
pub const SUPPORTS_PROCESS_TICK: u32 = 0x20000;

/// Indices into the data array passed to a plugin's `Load`
pub const PLUGIN_DATA_LOGPRINTF: usize = 0x00;
pub const PLUGIN_DATA_AMX_EXPORTS: usize = 0x10;

const _: () = assert!(std::mem::size_of::<AmxHeader>() == 56);
const _: () = assert!(std::mem::size_of::<AmxFuncStubNt>() == 8);
const _: () = assert!(std::mem::size_of::<AmxFuncStub>() == 24);
