//! Thunks for natives implemented by the script host
//!
//! The runtime calls natives through plain function pointers without any
//! user data, so each slot of the allow-list gets its own monomorphized
//! thunk. The thunk knows its slot index and looks the name up in the bound
//! [`NativeTable`] before dispatching to the [`ReverseInvoker`].

use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::c_int;
use std::rc::Rc;

use pawnbridge_engine::amx::{Amx, AmxNativeInfo, NativeFn, RegisterFn, AMX_ERR_NONE};
use pawnbridge_engine::definitions::natives::MAX_NATIVES;
use pawnbridge_engine::{NativeParameters, ReverseInvoker};
use pawnbridge_sdk::Cell;
use tracing::warn;

macro_rules! thunk_table {
    ($($slot:literal),* $(,)?) => {
        [$(provided_native::<$slot> as NativeFn),*]
    };
}

static THUNKS: [NativeFn; MAX_NATIVES] = thunk_table![
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15,
    16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31,
    32, 33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47,
    48, 49, 50, 51, 52, 53, 54, 55, 56, 57, 58, 59, 60, 61, 62, 63,
    64, 65, 66, 67, 68, 69, 70, 71, 72, 73, 74, 75, 76, 77, 78, 79,
    80, 81, 82, 83, 84, 85, 86, 87, 88, 89, 90, 91, 92, 93, 94, 95,
    96, 97, 98, 99, 100, 101, 102, 103, 104, 105, 106, 107, 108, 109, 110, 111,
    112, 113, 114, 115, 116, 117, 118, 119, 120, 121, 122, 123, 124, 125, 126, 127,
    128, 129, 130, 131, 132, 133, 134, 135, 136, 137, 138, 139, 140, 141, 142, 143,
    144, 145, 146, 147, 148, 149, 150, 151, 152, 153, 154, 155, 156, 157, 158, 159,
    160, 161, 162, 163, 164, 165, 166, 167, 168, 169, 170, 171, 172, 173, 174, 175,
    176, 177, 178, 179, 180, 181, 182, 183, 184, 185, 186, 187, 188, 189, 190, 191,
    192, 193, 194, 195, 196, 197, 198, 199, 200, 201, 202, 203, 204, 205, 206, 207,
    208, 209, 210, 211, 212, 213, 214, 215, 216, 217, 218, 219, 220, 221, 222, 223,
    224, 225, 226, 227, 228, 229, 230, 231, 232, 233, 234, 235, 236, 237, 238, 239,
    240, 241, 242, 243, 244, 245, 246, 247, 248, 249, 250, 251, 252, 253, 254,
];

thread_local! {
    static BOUND: RefCell<Option<BoundNatives>> = const { RefCell::new(None) };
}

struct BoundNatives {
    names: Vec<String>,
    invoker: Rc<RefCell<ReverseInvoker>>,
}

/// Registration list of the provided natives.
pub struct NativeTable {
    names: Vec<CString>,
    entries: Vec<AmxNativeInfo>,
}

impl NativeTable {
    /// Build the table for the allow-listed `names`.
    ///
    /// Names past the slot count or containing NUL are skipped.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<CString> = names
            .into_iter()
            .filter_map(|name| CString::new(name.as_ref()).ok())
            .take(MAX_NATIVES)
            .collect();

        let entries = names
            .iter()
            .zip(THUNKS.iter())
            .map(|(name, thunk)| AmxNativeInfo {
                name: name.as_ptr(),
                func: Some(*thunk),
            })
            .collect();

        NativeTable { names, entries }
    }

    /// Name of the native in `slot`
    pub fn name(&self, slot: usize) -> Option<&str> {
        self.names.get(slot).and_then(|name| name.to_str().ok())
    }

    /// The entries, in slot order
    pub fn entries(&self) -> &[AmxNativeInfo] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Make the thunks dispatch to `invoker` by this table's names.
    pub fn bind(&self, invoker: Rc<RefCell<ReverseInvoker>>) {
        let names = (0..self.len())
            .filter_map(|slot| self.name(slot).map(str::to_string))
            .collect();
        BOUND.with(|bound| {
            *bound.borrow_mut() = Some(BoundNatives { names, invoker });
        });
    }

    /// Register the table with a program.
    ///
    /// # Safety
    ///
    /// `amx` must be a loaded program and `register` the runtime's
    /// `amx_Register`. The table must outlive the program.
    pub unsafe fn register(&self, amx: *mut Amx, register: RegisterFn) -> c_int {
        if self.is_empty() {
            return AMX_ERR_NONE;
        }
        register(amx, self.entries.as_ptr(), self.len() as c_int)
    }
}

/// Stop dispatching provided natives.
pub fn unbind() {
    BOUND.with(|bound| {
        if let Ok(mut bound) = bound.try_borrow_mut() {
            *bound = None;
        }
    });
}

unsafe extern "C" fn provided_native<const SLOT: usize>(amx: *mut Amx, params: *const Cell) -> Cell {
    dispatch(SLOT, amx, params)
}

/// # Safety
///
/// `amx` and `params` must be the arguments of a native call.
unsafe fn dispatch(slot: usize, amx: *mut Amx, params: *const Cell) -> Cell {
    BOUND.with(|bound| {
        let Ok(bound) = bound.try_borrow() else {
            return 0;
        };
        let Some(bound) = bound.as_ref() else {
            warn!(slot, "Provided native called before the plugin was loaded");
            return 0;
        };
        let Some(name) = bound.names.get(slot) else {
            return 0;
        };
        let Ok(mut invoker) = bound.invoker.try_borrow_mut() else {
            warn!(native = %name, "Provided native called while another one is running");
            return 0;
        };

        let mut params = unsafe { NativeParameters::new(amx, params) };
        invoker.call(name, &mut params)
    })
}
