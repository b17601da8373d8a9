//! Loaded programs
//!
//! The interceptor only needs to read from the program that is executing:
//! its identity, the arguments pushed for the call and its public table.
//! [`Program`] captures that surface so the interception logic can be
//! exercised without a server.

use std::ptr::NonNull;

use crate::amx::strings::from_ansi;
use crate::amx::{memory, Amx, Cell};

/// Identity of a loaded program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(NonNull<Amx>);

impl ProgramId {
    /// Identity of the program at `amx`, `None` for null
    pub fn from_raw(amx: *mut Amx) -> Option<Self> {
        NonNull::new(amx).map(ProgramId)
    }

    /// The raw runtime structure
    pub fn as_ptr(&self) -> *mut Amx {
        self.0.as_ptr()
    }
}

/// Read access to a program at the moment it is about to execute.
pub trait Program {
    /// Identity of this program
    fn id(&self) -> ProgramId;

    /// Number of arguments pushed for the upcoming execution
    fn param_count(&self) -> usize;

    /// The `index`th pushed argument
    fn stack_cell(&self, index: usize) -> Option<Cell>;

    /// The string at `address`, decoded from the server code page
    fn read_string(&self, address: Cell) -> Option<String>;

    /// Names of the exported public functions, by index
    fn public_names(&self) -> Vec<String>;
}

/// [`Program`] over a runtime structure owned by the server.
pub struct AmxProgram {
    amx: NonNull<Amx>,
}

impl AmxProgram {
    /// Wrap a program handed to the plugin.
    ///
    /// # Safety
    ///
    /// `amx` must point to a valid program for as long as the wrapper is
    /// used.
    pub unsafe fn new(amx: NonNull<Amx>) -> Self {
        AmxProgram { amx }
    }
}

impl Program for AmxProgram {
    fn id(&self) -> ProgramId {
        ProgramId(self.amx)
    }

    fn param_count(&self) -> usize {
        let count = unsafe { self.amx.as_ref().paramcount };
        count.max(0) as usize
    }

    fn stack_cell(&self, index: usize) -> Option<Cell> {
        unsafe { memory::stack_argument(self.amx.as_ptr(), index) }
    }

    fn read_string(&self, address: Cell) -> Option<String> {
        let mut bytes = Vec::new();
        if unsafe { memory::read_string(self.amx.as_ptr(), address, &mut bytes) } {
            Some(from_ansi(&bytes))
        } else {
            None
        }
    }

    fn public_names(&self) -> Vec<String> {
        let amx = self.amx.as_ptr();
        let count = unsafe { memory::public_count(amx) };
        (0..count)
            .map(|index| unsafe { memory::public_name(amx, index) }.unwrap_or_default())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amx::strings::encode_cells;

    #[test]
    fn test_reads_pushed_arguments() {
        let mut memory = vec![0 as Cell; 32];
        encode_cells(&[b'h', b'\xe9'], &mut memory[0..]);
        memory[28] = 0;
        memory[29] = 99;

        let mut amx = Amx::zeroed();
        amx.data = memory.as_mut_ptr() as *mut u8;
        amx.hea = 16;
        amx.stk = 112;
        amx.stp = 128;
        amx.paramcount = 2;

        let program = unsafe { AmxProgram::new(NonNull::from(&mut amx)) };
        assert_eq!(program.param_count(), 2);
        assert_eq!(program.stack_cell(0), Some(0));
        assert_eq!(program.stack_cell(1), Some(99));
        assert_eq!(program.read_string(0).as_deref(), Some("hé"));
        assert_eq!(program.read_string(64), None);
        assert!(program.public_names().is_empty());
    }

    #[test]
    fn test_identity() {
        let mut amx = Amx::zeroed();
        let id = ProgramId::from_raw(&mut amx).unwrap();
        assert_eq!(id.as_ptr(), &mut amx as *mut Amx);
        assert!(ProgramId::from_raw(std::ptr::null_mut()).is_none());
    }
}
