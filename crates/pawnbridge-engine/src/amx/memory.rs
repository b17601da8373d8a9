//! Access to the memory of a raw [`Amx`]
//!
//! These helpers follow the runtime's own rules for address translation
//! (`amx_GetAddr`): an address is a byte offset into the data segment and is
//! valid when it lies below the heap top or inside the stack. They let the
//! bridge read and write program memory without going through the server's
//! exported functions, which also makes them usable on synthetic contexts.
//!
//! # Safety
//!
//! Every function takes a pointer to an [`Amx`] whose `base`/`data` pointers
//! and cursors describe valid memory, as is the case for any program handed
//! to a plugin by the server.

use std::ffi::CStr;
use std::mem::size_of;
use std::os::raw::c_char;
use std::ptr::NonNull;

use super::strings::decode_cells;
use super::{Amx, AmxFuncStub, AmxFuncStubNt, AmxHeader, Cell, S_NAMEMAX};

const CELL_SIZE: Cell = size_of::<Cell>() as Cell;

/// Returns the start of the data segment.
///
/// # Safety
///
/// `amx` must point to a valid program.
pub unsafe fn data_segment(amx: *const Amx) -> Option<NonNull<u8>> {
    let amx = &*amx;
    if !amx.data.is_null() {
        return NonNull::new(amx.data);
    }

    let header = NonNull::new(amx.base as *mut AmxHeader)?;
    NonNull::new(amx.base.offset(header.as_ref().dat as isize))
}

/// Number of cells that can be accessed from `address` onwards without
/// leaving the region (heap or stack) that contains it.
///
/// # Safety
///
/// `amx` must point to a valid program.
pub unsafe fn accessible_cells(amx: *const Amx, address: Cell) -> usize {
    let amx = &*amx;
    if address < 0 || address % CELL_SIZE != 0 {
        return 0;
    }

    let end = if address < amx.hea {
        amx.hea
    } else if address >= amx.stk && address < amx.stp {
        amx.stp
    } else {
        return 0;
    };

    ((end - address) / CELL_SIZE) as usize
}

/// Translates an address to a pointer to its cell, or `None` when the
/// address points outside of the accessible memory.
///
/// # Safety
///
/// `amx` must point to a valid program.
pub unsafe fn get_addr(amx: *const Amx, address: Cell) -> Option<NonNull<Cell>> {
    if accessible_cells(amx, address) == 0 {
        return None;
    }

    let data = data_segment(amx)?;
    NonNull::new(data.as_ptr().offset(address as isize) as *mut Cell)
}

/// Reads the cell at `address`.
///
/// # Safety
///
/// `amx` must point to a valid program.
pub unsafe fn read_cell(amx: *const Amx, address: Cell) -> Option<Cell> {
    get_addr(amx, address).map(|cell| cell.as_ptr().read_unaligned())
}

/// Writes the cell at `address`; returns whether the address was valid.
///
/// # Safety
///
/// `amx` must point to a valid program.
pub unsafe fn write_cell(amx: *mut Amx, address: Cell, value: Cell) -> bool {
    match get_addr(amx, address) {
        Some(cell) => {
            cell.as_ptr().write_unaligned(value);
            true
        }
        None => false,
    }
}

/// Reads the `index`th argument pushed for the upcoming execution.
///
/// # Safety
///
/// `amx` must point to a valid program.
pub unsafe fn stack_argument(amx: *const Amx, index: usize) -> Option<Cell> {
    let address = (*amx).stk.checked_add((index as Cell).checked_mul(CELL_SIZE)?)?;
    if address >= (*amx).stp {
        return None;
    }

    let data = data_segment(amx)?;
    Some((data.as_ptr().offset(address as isize) as *const Cell).read_unaligned())
}

/// Borrows the accessible cells starting at `address`.
///
/// # Safety
///
/// `amx` must point to a valid program, and the memory must not be written
/// while the slice is alive.
pub unsafe fn cells<'a>(amx: *const Amx, address: Cell) -> Option<&'a [Cell]> {
    let available = accessible_cells(amx, address);
    let start = get_addr(amx, address)?;
    Some(std::slice::from_raw_parts(start.as_ptr(), available))
}

/// Borrows the accessible cells starting at `address` mutably.
///
/// # Safety
///
/// `amx` must point to a valid program, and the memory must not be accessed
/// otherwise while the slice is alive.
pub unsafe fn cells_mut<'a>(amx: *mut Amx, address: Cell) -> Option<&'a mut [Cell]> {
    let available = accessible_cells(amx, address);
    let start = get_addr(amx, address)?;
    Some(std::slice::from_raw_parts_mut(start.as_ptr(), available))
}

/// Reads the string at `address` in the server code page, appending its
/// bytes to `output`. Returns `false` when the address is invalid.
///
/// # Safety
///
/// `amx` must point to a valid program.
pub unsafe fn read_string(amx: *const Amx, address: Cell, output: &mut Vec<u8>) -> bool {
    match cells(amx, address) {
        Some(cells) => {
            decode_cells(cells, output);
            true
        }
        None => false,
    }
}

// ============================================================================
// Public Function Table
// ============================================================================

unsafe fn header<'a>(amx: *const Amx) -> Option<&'a AmxHeader> {
    ((*amx).base as *const AmxHeader).as_ref()
}

/// Number of public functions exported by the program.
///
/// # Safety
///
/// `amx` must point to a valid program.
pub unsafe fn public_count(amx: *const Amx) -> usize {
    match header(amx) {
        Some(header) if header.defsize > 0 && header.natives >= header.publics => {
            ((header.natives - header.publics) / header.defsize as i32) as usize
        }
        _ => 0,
    }
}

/// Name of the public function at `index`.
///
/// # Safety
///
/// `amx` must point to a valid program.
pub unsafe fn public_name(amx: *const Amx, index: usize) -> Option<String> {
    if index >= public_count(amx) {
        return None;
    }

    let header = header(amx)?;
    let base = (*amx).base;
    let entry = base.offset(header.publics as isize + (index as isize) * header.defsize as isize);

    let name = if header.defsize as usize == size_of::<AmxFuncStubNt>() {
        let stub = (entry as *const AmxFuncStubNt).read_unaligned();
        base.offset(stub.nameofs as isize) as *const c_char
    } else {
        entry.add(std::mem::offset_of!(AmxFuncStub, name)) as *const c_char
    };

    bounded_c_str(name, S_NAMEMAX + 1)
}

unsafe fn bounded_c_str(name: *const c_char, limit: usize) -> Option<String> {
    let length = (0..limit).find(|offset| *name.add(*offset) == 0)?;
    let bytes = std::slice::from_raw_parts(name as *const u8, length + 1);
    let name = CStr::from_bytes_with_nul(bytes).ok()?;
    Some(name.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amx::strings::encode_cells;

    struct Image {
        amx: Amx,
        memory: Vec<Cell>,
    }

    /// 16 cells of data: heap occupies [0, 24), stack occupies [48, 64).
    fn image() -> Box<Image> {
        let mut image = Box::new(Image {
            amx: Amx::zeroed(),
            memory: vec![0; 16],
        });
        image.amx.data = image.memory.as_mut_ptr() as *mut u8;
        image.amx.hea = 24;
        image.amx.stk = 48;
        image.amx.stp = 64;
        image
    }

    #[test]
    fn test_address_validation() {
        let image = image();
        unsafe {
            assert_eq!(accessible_cells(&image.amx, 0), 6);
            assert_eq!(accessible_cells(&image.amx, 20), 1);
            assert_eq!(accessible_cells(&image.amx, 24), 0);
            assert_eq!(accessible_cells(&image.amx, 48), 4);
            assert_eq!(accessible_cells(&image.amx, 64), 0);
            assert_eq!(accessible_cells(&image.amx, -4), 0);
            assert_eq!(accessible_cells(&image.amx, 2), 0);
            assert!(get_addr(&image.amx, 30).is_none());
        }
    }

    #[test]
    fn test_read_write_cells() {
        let mut image = image();
        let amx: *mut Amx = &mut image.amx;
        unsafe {
            assert!(write_cell(amx, 8, 1234));
            assert_eq!(read_cell(amx, 8), Some(1234));
            assert!(!write_cell(amx, 32, 1));
        }
        assert_eq!(image.memory[2], 1234);
    }

    #[test]
    fn test_stack_arguments() {
        let mut image = image();
        image.memory[12] = 7;
        image.memory[13] = 8;
        unsafe {
            assert_eq!(stack_argument(&image.amx, 0), Some(7));
            assert_eq!(stack_argument(&image.amx, 1), Some(8));
            assert_eq!(stack_argument(&image.amx, 4), None);
        }
    }

    #[test]
    fn test_read_string() {
        let mut image = image();
        encode_cells(b"abc", &mut image.memory[1..]);

        let mut output = Vec::new();
        unsafe {
            assert!(read_string(&image.amx, 4, &mut output));
            assert!(!read_string(&image.amx, 28, &mut output));
        }
        assert_eq!(output, b"abc");
    }

    #[test]
    fn test_public_names_from_name_table() {
        // Header, two name table stubs, then the names themselves.
        let mut words = vec![0u32; 40];
        let raw =
            unsafe { std::slice::from_raw_parts_mut(words.as_mut_ptr() as *mut u8, 160) };
        let header_size = size_of::<AmxHeader>();
        let header = AmxHeader {
            defsize: size_of::<AmxFuncStubNt>() as i16,
            publics: header_size as i32,
            natives: header_size as i32 + 16,
            ..Default::default()
        };

        unsafe {
            std::ptr::write_unaligned(raw.as_mut_ptr() as *mut AmxHeader, header);
            for (index, (offset, name)) in [(80u32, "OnGameModeInit"), (100, "OnPlayerConnect")]
                .iter()
                .enumerate()
            {
                let stub = AmxFuncStubNt {
                    address: 0,
                    nameofs: *offset,
                };
                std::ptr::write_unaligned(
                    raw.as_mut_ptr().add(header_size + index * 8) as *mut AmxFuncStubNt,
                    stub,
                );
                raw[*offset as usize..*offset as usize + name.len()]
                    .copy_from_slice(name.as_bytes());
            }
        }

        let mut amx = Amx::zeroed();
        amx.base = raw.as_mut_ptr();

        unsafe {
            assert_eq!(public_count(&amx), 2);
            assert_eq!(public_name(&amx, 0).as_deref(), Some("OnGameModeInit"));
            assert_eq!(public_name(&amx, 1).as_deref(), Some("OnPlayerConnect"));
            assert_eq!(public_name(&amx, 2), None);
        }
    }
}
