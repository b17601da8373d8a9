//! Synthetic execution context
//!
//! Natives expect an [`Amx`] whose memory holds their by-reference arguments.
//! When the bridge calls a native on behalf of the script host there may be
//! no loaded program at all, so it provides its own: a program image that
//! consists of nothing but a header and a heap large enough for the largest
//! call the invoker accepts: every argument a full-size string.
//!
//! Memory is handed out through [`ScopedStackModifier`]s. A modifier
//! remembers the heap top when it is created and restores it when dropped,
//! which frees everything allocated through it. Nested modifiers borrow their
//! parent, so scopes are always released in reverse order of creation.

use std::marker::PhantomData;
use std::mem::{offset_of, size_of};
use std::ptr::NonNull;

use pawnbridge_sdk::MAX_ARGUMENT_COUNT;
use thiserror::Error;

use crate::amx::strings::{decode_cells, encode_cells, to_ansi};
use crate::amx::{
    Amx, AmxFuncStub, AmxHeader, Cell, AMX_FLAG_NTVREG, AMX_FLAG_RELOC, AMX_MAGIC,
    CUR_FILE_VERSION, MIN_AMX_VERSION,
};
use crate::invoke::MAX_STRING_LENGTH;

/// Number of cells in the synthetic heap
pub const HEAP_CELLS: usize = MAX_ARGUMENT_COUNT * MAX_STRING_LENGTH;

const CELL_SIZE: usize = size_of::<Cell>();

/// Errors raised while using the synthetic context
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntheticError {
    /// The heap cannot satisfy an allocation
    #[error("Synthetic heap exhausted: {requested} cells requested, {available} available")]
    OutOfMemory {
        /// Requested number of cells
        requested: usize,
        /// Number of cells left
        available: usize,
    },

    /// An address does not refer to allocated cells
    #[error("Invalid synthetic address {address} for {cells} cells")]
    InvalidAddress {
        /// The address, in bytes
        address: Cell,
        /// Number of cells that were to be accessed
        cells: usize,
    },
}

#[repr(C)]
struct Image {
    header: AmxHeader,
    heap: [Cell; HEAP_CELLS],
    amx: Amx,
}

/// A self-contained program image used to call natives without a live
/// program.
pub struct SyntheticContext {
    image: NonNull<Image>,
}

impl SyntheticContext {
    /// Create a context with an empty heap and stack.
    pub fn new() -> Self {
        let mut image = Box::new(Image {
            header: AmxHeader::default(),
            heap: [0; HEAP_CELLS],
            amx: Amx::zeroed(),
        });

        let stack_top = (HEAP_CELLS * CELL_SIZE) as Cell;

        image.header.magic = AMX_MAGIC;
        image.header.file_version = CUR_FILE_VERSION;
        image.header.amx_version = MIN_AMX_VERSION;
        image.header.flags = (AMX_FLAG_NTVREG | AMX_FLAG_RELOC) as i16;
        image.header.defsize = size_of::<AmxFuncStub>() as i16;
        image.header.dat = offset_of!(Image, heap) as i32;
        image.header.hea = 0;
        image.header.stp = stack_top;

        let image = NonNull::from(Box::leak(image));
        unsafe {
            let raw = image.as_ptr();
            let amx = &mut (*raw).amx;
            amx.base = std::ptr::addr_of_mut!((*raw).header) as *mut u8;
            amx.data = std::ptr::addr_of_mut!((*raw).heap) as *mut u8;
            amx.flags = AMX_FLAG_NTVREG | AMX_FLAG_RELOC;
            amx.hea = 0;
            amx.hlw = 0;
            amx.stk = stack_top;
            amx.stp = stack_top;
        }

        SyntheticContext { image }
    }

    /// The runtime structure to pass to natives
    pub fn amx(&self) -> *mut Amx {
        unsafe { std::ptr::addr_of_mut!((*self.image.as_ptr()).amx) }
    }

    /// Current heap top, in bytes
    pub fn heap_top(&self) -> Cell {
        unsafe { (*self.amx()).hea }
    }

    /// Number of cells that can still be allocated
    pub fn available_cells(&self) -> usize {
        unsafe {
            let amx = &*self.amx();
            ((amx.stk - amx.hea) as usize) / CELL_SIZE
        }
    }

    /// Open an allocation scope.
    pub fn scope(&mut self) -> ScopedStackModifier<'_> {
        ScopedStackModifier::new(self.image)
    }
}

impl Default for SyntheticContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SyntheticContext {
    fn drop(&mut self) {
        drop(unsafe { Box::from_raw(self.image.as_ptr()) });
    }
}

/// Allocation scope on a [`SyntheticContext`].
///
/// Dropping the modifier restores the heap top it observed on creation.
pub struct ScopedStackModifier<'a> {
    image: NonNull<Image>,
    snapshot: Cell,
    _context: PhantomData<&'a mut SyntheticContext>,
}

impl<'a> ScopedStackModifier<'a> {
    fn new(image: NonNull<Image>) -> Self {
        let snapshot = unsafe { (*image.as_ptr()).amx.hea };
        ScopedStackModifier {
            image,
            snapshot,
            _context: PhantomData,
        }
    }

    /// Open a nested scope, released before this one.
    pub fn scope(&mut self) -> ScopedStackModifier<'_> {
        ScopedStackModifier::new(self.image)
    }

    /// The runtime structure to pass to natives
    pub fn amx(&self) -> *mut Amx {
        unsafe { std::ptr::addr_of_mut!((*self.image.as_ptr()).amx) }
    }

    fn allocate(&mut self, count: usize) -> Result<Cell, SyntheticError> {
        let amx = unsafe { &mut *self.amx() };
        let available = ((amx.stk - amx.hea) as usize) / CELL_SIZE;
        if count > available {
            return Err(SyntheticError::OutOfMemory {
                requested: count,
                available,
            });
        }

        let address = amx.hea;
        amx.hea += (count * CELL_SIZE) as Cell;
        Ok(address)
    }

    fn cells_mut(&mut self, address: Cell, count: usize) -> Result<&mut [Cell], SyntheticError> {
        let invalid = SyntheticError::InvalidAddress {
            address,
            cells: count,
        };

        let hea = unsafe { (*self.amx()).hea };
        if address < 0 || address as usize % CELL_SIZE != 0 {
            return Err(invalid);
        }

        let start = address as usize / CELL_SIZE;
        if start + count > hea as usize / CELL_SIZE {
            return Err(invalid);
        }

        let heap = unsafe { &mut (*self.image.as_ptr()).heap };
        Ok(&mut heap[start..start + count])
    }

    /// Allocate one cell holding `value`; returns its address.
    pub fn push_cell(&mut self, value: Cell) -> Result<Cell, SyntheticError> {
        let address = self.allocate(1)?;
        self.cells_mut(address, 1)?[0] = value;
        Ok(address)
    }

    /// Allocate an unpacked, zero-terminated copy of `text` in the server
    /// code page; returns its address.
    pub fn push_string(&mut self, text: &str) -> Result<Cell, SyntheticError> {
        let bytes = to_ansi(text);
        let length = bytes.len() + 1;
        let address = self.allocate(length)?;
        encode_cells(&bytes, self.cells_mut(address, length)?);
        Ok(address)
    }

    /// Reserve `count` zeroed cells; returns their address.
    pub fn push_array(&mut self, count: usize) -> Result<Cell, SyntheticError> {
        let address = self.allocate(count)?;
        self.cells_mut(address, count)?.fill(0);
        Ok(address)
    }

    /// Allocate a copy of `values`; returns its address.
    pub fn push_cells(&mut self, values: &[Cell]) -> Result<Cell, SyntheticError> {
        let address = self.allocate(values.len())?;
        self.cells_mut(address, values.len())?
            .copy_from_slice(values);
        Ok(address)
    }

    /// Read the cell at `address`.
    pub fn read_cell(&mut self, address: Cell) -> Result<Cell, SyntheticError> {
        Ok(self.cells_mut(address, 1)?[0])
    }

    /// Read `output.len()` cells starting at `address`.
    pub fn read_array(&mut self, address: Cell, output: &mut [Cell]) -> Result<(), SyntheticError> {
        output.copy_from_slice(self.cells_mut(address, output.len())?);
        Ok(())
    }

    /// Read the string stored in the `capacity` cells at `address` into
    /// `output` as zero-terminated bytes in the server code page, truncating
    /// to the size of `output`.
    pub fn read_string(
        &mut self,
        address: Cell,
        capacity: usize,
        output: &mut [u8],
    ) -> Result<usize, SyntheticError> {
        let mut bytes = Vec::new();
        decode_cells(self.cells_mut(address, capacity)?, &mut bytes);

        let length = bytes.len().min(output.len().saturating_sub(1));
        output[..length].copy_from_slice(&bytes[..length]);
        if let Some(terminator) = output.get_mut(length) {
            *terminator = 0;
        }
        Ok(length)
    }
}

impl Drop for ScopedStackModifier<'_> {
    fn drop(&mut self) {
        unsafe { (*self.amx()).hea = self.snapshot };
    }
}
