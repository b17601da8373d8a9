//! Function hooks
//!
//! Two ways of redirecting a runtime function to the bridge are supported:
//!
//! - [`SlotHook`] replaces the function pointer stored in the server's export
//!   table. Only callers that go through the table (plugins) are redirected.
//! - [`InlineHook`] overwrites the first instructions of the function itself
//!   with a jump, so every caller is redirected, including the server. While
//!   the original is called through its [`Trampoline`] the jump is patched
//!   out, and it is written back when the trampoline is dropped.
//!
//! Both implement [`Hook`], which is what the rest of the engine sees.

use std::ffi::c_void;
use std::mem::size_of;
use std::ptr::NonNull;

use serde::Deserialize;
use thiserror::Error;

use crate::amx::{AmxExport, ExportTable};

/// Errors raised while installing or using a hook
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    /// The function to hook is missing
    #[error("Cannot hook a null address")]
    NullTarget,

    /// Inline hooks are not available on this architecture
    #[error("Inline hooks are not supported on {arch}")]
    Unsupported {
        /// Target architecture
        arch: &'static str,
    },

    /// The jump cannot reach the replacement
    #[error("Replacement at {to:#x} is out of jump range from {from:#x}")]
    OutOfRange {
        /// Address of the patched function
        from: usize,
        /// Address of the replacement
        to: usize,
    },

    /// Code memory could not be made writable
    #[error("Failed to change protection of {address:#x}: OS error {code}")]
    Protect {
        /// Start of the region
        address: usize,
        /// Operating system error code
        code: i32,
    },

    /// The hook is already in place
    #[error("Hook is already installed")]
    AlreadyInstalled,

    /// The hook is not in place
    #[error("Hook is not installed")]
    NotInstalled,
}

/// How runtime functions are hooked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookMode {
    /// Patch the function's code
    #[default]
    Inline,
    /// Replace the export table entry
    ExportTable,
}

/// A redirected function.
pub trait Hook {
    /// Redirect the function to its replacement.
    fn install(&mut self) -> Result<(), HookError>;

    /// Undo the redirection.
    fn uninstall(&mut self) -> Result<(), HookError>;

    /// Whether the redirection is in place
    fn is_installed(&self) -> bool;

    /// Access to the function as it was before hooking.
    fn original(&self) -> Result<Trampoline<'_>, HookError>;
}

/// A callable address for the original function.
///
/// For inline hooks the patch is re-applied when this value is dropped, so
/// it must be kept alive for exactly the duration of the call.
pub struct Trampoline<'a> {
    address: NonNull<c_void>,
    patch: Option<&'a InlinePatch>,
}

impl Trampoline<'_> {
    /// Address of the original function
    pub fn address(&self) -> *mut c_void {
        self.address.as_ptr()
    }

    /// The original function as a function pointer of type `F`.
    ///
    /// # Safety
    ///
    /// `F` must be a function pointer type matching the hooked function.
    pub unsafe fn cast<F: Copy>(&self) -> F {
        debug_assert_eq!(size_of::<F>(), size_of::<*mut c_void>());
        std::mem::transmute_copy::<*mut c_void, F>(&self.address.as_ptr())
    }
}

impl Drop for Trampoline<'_> {
    fn drop(&mut self) {
        if let Some(patch) = self.patch {
            patch.apply();
        }
    }
}

// ============================================================================
// Export Table Hook
// ============================================================================

/// Hook that swaps a function pointer in a table.
pub struct SlotHook {
    slot: NonNull<*mut c_void>,
    replacement: *mut c_void,
    original: Option<NonNull<c_void>>,
}

impl SlotHook {
    /// Prepare a hook of the pointer stored at `slot`.
    ///
    /// # Safety
    ///
    /// `slot` must stay valid and writable while the hook exists.
    pub unsafe fn new(slot: NonNull<*mut c_void>, replacement: *mut c_void) -> Self {
        SlotHook {
            slot,
            replacement,
            original: None,
        }
    }
}

impl Hook for SlotHook {
    fn install(&mut self) -> Result<(), HookError> {
        if self.original.is_some() {
            return Err(HookError::AlreadyInstalled);
        }

        let current = unsafe { *self.slot.as_ptr() };
        let original = NonNull::new(current).ok_or(HookError::NullTarget)?;
        unsafe { *self.slot.as_ptr() = self.replacement };
        self.original = Some(original);
        Ok(())
    }

    fn uninstall(&mut self) -> Result<(), HookError> {
        let original = self.original.take().ok_or(HookError::NotInstalled)?;
        unsafe { *self.slot.as_ptr() = original.as_ptr() };
        Ok(())
    }

    fn is_installed(&self) -> bool {
        self.original.is_some()
    }

    fn original(&self) -> Result<Trampoline<'_>, HookError> {
        let address = self.original.ok_or(HookError::NotInstalled)?;
        Ok(Trampoline {
            address,
            patch: None,
        })
    }
}

// ============================================================================
// Inline Hook
// ============================================================================

/// `jmp rel32`. On 64-bit targets the replacement must be within ±2 GiB;
/// on 32-bit targets the displacement wraps around the address space.
pub fn relative_jump(from: usize, to: usize) -> Option<[u8; 5]> {
    let displacement = (to as i64).wrapping_sub(from as i64 + 5);
    let displacement = if size_of::<usize>() == 4 {
        displacement as i32
    } else {
        i32::try_from(displacement).ok()?
    };

    let mut code = [0xE9, 0, 0, 0, 0];
    code[1..].copy_from_slice(&displacement.to_le_bytes());
    Some(code)
}

/// `jmp [rip+0]` followed by the absolute 64-bit destination.
pub fn absolute_jump(to: u64) -> [u8; 14] {
    let mut code = [0xFF, 0x25, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    code[6..].copy_from_slice(&to.to_le_bytes());
    code
}

/// The jump instruction used on the current architecture.
pub fn encode_jump(from: usize, to: usize) -> Result<Vec<u8>, HookError> {
    if cfg!(target_arch = "x86") {
        relative_jump(from, to)
            .map(|code| code.to_vec())
            .ok_or(HookError::OutOfRange { from, to })
    } else if cfg!(target_arch = "x86_64") {
        Ok(absolute_jump(to as u64).to_vec())
    } else {
        Err(HookError::Unsupported {
            arch: std::env::consts::ARCH,
        })
    }
}

/// Jump written over the start of a function, with the bytes it replaced.
pub struct InlinePatch {
    target: NonNull<u8>,
    original: Vec<u8>,
    jump: Vec<u8>,
}

impl InlinePatch {
    /// Prepare a patch redirecting `target` to `destination` and make the
    /// affected code writable.
    ///
    /// # Safety
    ///
    /// `target` must be the start of a function with at least as many bytes
    /// of code as the jump takes.
    pub unsafe fn new(target: NonNull<u8>, destination: *const c_void) -> Result<Self, HookError> {
        let jump = encode_jump(target.as_ptr() as usize, destination as usize)?;
        make_writable(target.as_ptr(), jump.len())?;

        let original = std::slice::from_raw_parts(target.as_ptr(), jump.len()).to_vec();
        Ok(InlinePatch {
            target,
            original,
            jump,
        })
    }

    /// Write the jump.
    pub fn apply(&self) {
        unsafe { self.write(&self.jump) }
    }

    /// Write back the original code.
    pub fn restore(&self) {
        unsafe { self.write(&self.original) }
    }

    unsafe fn write(&self, code: &[u8]) {
        std::ptr::copy_nonoverlapping(code.as_ptr(), self.target.as_ptr(), code.len());
    }
}

#[cfg(unix)]
unsafe fn make_writable(address: *mut u8, length: usize) -> Result<(), HookError> {
    let page = match libc::sysconf(libc::_SC_PAGESIZE) {
        size if size > 0 => size as usize,
        _ => 4096,
    };
    let start = address as usize & !(page - 1);
    let end = address as usize + length;

    let result = libc::mprotect(
        start as *mut libc::c_void,
        end - start,
        libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
    );
    if result != 0 {
        return Err(HookError::Protect {
            address: start,
            code: std::io::Error::last_os_error().raw_os_error().unwrap_or(-1),
        });
    }
    Ok(())
}

#[cfg(windows)]
unsafe fn make_writable(address: *mut u8, length: usize) -> Result<(), HookError> {
    use windows_sys::Win32::System::Memory::{VirtualProtect, PAGE_EXECUTE_READWRITE};

    let mut previous = 0;
    if VirtualProtect(address as *const c_void, length, PAGE_EXECUTE_READWRITE, &mut previous) == 0 {
        return Err(HookError::Protect {
            address: address as usize,
            code: std::io::Error::last_os_error().raw_os_error().unwrap_or(-1),
        });
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
unsafe fn make_writable(_address: *mut u8, _length: usize) -> Result<(), HookError> {
    Err(HookError::Unsupported {
        arch: std::env::consts::OS,
    })
}

/// Hook that patches the code of a function.
pub struct InlineHook {
    target: NonNull<u8>,
    replacement: *const c_void,
    patch: Option<InlinePatch>,
}

impl InlineHook {
    /// Prepare a hook of the function at `target`.
    ///
    /// # Safety
    ///
    /// `target` must be the start of a function that stays loaded while the
    /// hook exists, and `replacement` must have the same signature.
    pub unsafe fn new(target: NonNull<c_void>, replacement: *const c_void) -> Self {
        InlineHook {
            target: target.cast(),
            replacement,
            patch: None,
        }
    }
}

impl Hook for InlineHook {
    fn install(&mut self) -> Result<(), HookError> {
        if self.patch.is_some() {
            return Err(HookError::AlreadyInstalled);
        }

        let patch = unsafe { InlinePatch::new(self.target, self.replacement)? };
        patch.apply();
        self.patch = Some(patch);
        Ok(())
    }

    fn uninstall(&mut self) -> Result<(), HookError> {
        let patch = self.patch.take().ok_or(HookError::NotInstalled)?;
        patch.restore();
        Ok(())
    }

    fn is_installed(&self) -> bool {
        self.patch.is_some()
    }

    fn original(&self) -> Result<Trampoline<'_>, HookError> {
        let patch = self.patch.as_ref().ok_or(HookError::NotInstalled)?;
        patch.restore();
        Ok(Trampoline {
            address: self.target.cast(),
            patch: Some(patch),
        })
    }
}

impl Drop for InlineHook {
    fn drop(&mut self) {
        if let Some(patch) = self.patch.take() {
            patch.restore();
        }
    }
}

/// Hook an entry of the export table with the given mode.
///
/// # Safety
///
/// `replacement` must have the signature of the function behind `export`,
/// and the table must outlive the hook.
pub unsafe fn hook_export(
    exports: &ExportTable,
    export: AmxExport,
    replacement: *mut c_void,
    mode: HookMode,
) -> Result<Box<dyn Hook>, HookError> {
    let mut hook: Box<dyn Hook> = match mode {
        HookMode::Inline => {
            let target = NonNull::new(exports.address(export)).ok_or(HookError::NullTarget)?;
            Box::new(InlineHook::new(target, replacement))
        }
        HookMode::ExportTable => {
            let slot = NonNull::new(exports.slot(export)).ok_or(HookError::NullTarget)?;
            Box::new(SlotHook::new(slot, replacement))
        }
    };

    hook.install()?;
    Ok(hook)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amx::exports::EXPORT_COUNT;

    #[test]
    fn test_relative_jump() {
        assert_eq!(
            relative_jump(0x1000, 0x2000),
            Some([0xE9, 0xFB, 0x0F, 0x00, 0x00])
        );
        assert_eq!(
            relative_jump(0x2000, 0x1000),
            Some([0xE9, 0xFB, 0xEF, 0xFF, 0xFF])
        );
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_relative_jump_out_of_range() {
        assert_eq!(relative_jump(0, 0x1_0000_0000), None);
    }

    #[test]
    fn test_absolute_jump() {
        let code = absolute_jump(0x1122_3344_5566_7788);
        assert_eq!(&code[..6], &[0xFF, 0x25, 0, 0, 0, 0]);
        assert_eq!(&code[6..], &[0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_encode_jump_on_x86_64() {
        assert_eq!(encode_jump(0x1000, 0x2000).unwrap().len(), 14);
    }

    extern "C" fn original_function() -> i32 {
        1
    }

    extern "C" fn replacement_function() -> i32 {
        2
    }

    #[test]
    fn test_slot_hook() {
        let mut table = vec![std::ptr::null_mut::<c_void>(); EXPORT_COUNT];
        table[AmxExport::Exec as usize] = original_function as *mut c_void;

        let exports = unsafe { ExportTable::from_raw(table.as_mut_ptr() as *mut c_void) }.unwrap();
        let mut hook = unsafe {
            hook_export(
                &exports,
                AmxExport::Exec,
                replacement_function as *mut c_void,
                HookMode::ExportTable,
            )
        }
        .unwrap();

        assert!(hook.is_installed());
        assert_eq!(
            exports.address(AmxExport::Exec),
            replacement_function as *mut c_void
        );

        {
            let original = hook.original().unwrap();
            let function: extern "C" fn() -> i32 = unsafe { original.cast() };
            assert_eq!(function(), 1);
        }

        assert_eq!(hook.install(), Err(HookError::AlreadyInstalled));
        hook.uninstall().unwrap();
        assert!(!hook.is_installed());
        assert_eq!(
            exports.address(AmxExport::Exec),
            original_function as *mut c_void
        );
        assert!(hook.original().is_err());
    }

    #[test]
    fn test_hooking_an_empty_slot_fails() {
        let mut table = vec![std::ptr::null_mut::<c_void>(); EXPORT_COUNT];
        let exports = unsafe { ExportTable::from_raw(table.as_mut_ptr() as *mut c_void) }.unwrap();

        for mode in [HookMode::Inline, HookMode::ExportTable] {
            let result = unsafe {
                hook_export(
                    &exports,
                    AmxExport::Register,
                    replacement_function as *mut c_void,
                    mode,
                )
            };
            assert_eq!(result.err(), Some(HookError::NullTarget));
        }
    }
}
