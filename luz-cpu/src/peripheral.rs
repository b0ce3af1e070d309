//! Memory-mapped peripherals.
//!
//! Two devices hang off the memory unit: the core-register block in
//! the low 4 KiB of the address space, and the debug queue, a
//! write-only word sink used by tests to observe program behavior.

use luz_isa::{ADDR_EXCEPTION_CAUSE, ADDR_EXCEPTION_RETURN, ADDR_EXCEPTION_VECTOR};

use crate::memory::MemError;

/// Last address of the core-register block.
pub const CORE_REGS_END: u32 = 0xFFF;

/// CPU core registers, program-accessible through word loads and
/// stores in the core address space. The cause and return-address
/// registers are written by the CPU on exception entry; program
/// stores to them are ignored.
#[derive(Debug, Default, Clone)]
pub struct CoreRegisters {
    pub exception_vector: u32,
    pub exception_cause: u32,
    pub exception_return: u32,
}

impl CoreRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn check(addr: u32, width: u32) -> Result<(), MemError> {
        if width != 4 || addr % 4 != 0 {
            return Err(MemError::Misaligned { addr, width });
        }
        Ok(())
    }

    /// Program-initiated read.
    pub fn read(&self, addr: u32, width: u32) -> Result<u32, MemError> {
        Self::check(addr, width)?;
        match addr {
            ADDR_EXCEPTION_VECTOR => Ok(self.exception_vector),
            ADDR_EXCEPTION_CAUSE => Ok(self.exception_cause),
            ADDR_EXCEPTION_RETURN => Ok(self.exception_return),
            _ => Err(MemError::BadCoreRegister { addr }),
        }
    }

    /// Program-initiated write.
    pub fn write(&mut self, addr: u32, width: u32, value: u32) -> Result<(), MemError> {
        Self::check(addr, width)?;
        match addr {
            ADDR_EXCEPTION_VECTOR => {
                self.exception_vector = value;
                Ok(())
            }
            // read-only to programs
            ADDR_EXCEPTION_CAUSE | ADDR_EXCEPTION_RETURN => Ok(()),
            _ => Err(MemError::BadCoreRegister { addr }),
        }
    }
}

/// The debug-queue peripheral: stored words accumulate in FIFO order
/// and are observable through the simulator's debug surface.
#[derive(Debug, Default, Clone)]
pub struct DebugQueue {
    items: Vec<u32>,
}

impl DebugQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: u32) {
        log::debug!("debug queue <- {:#010x}", value);
        self.items.push(value);
    }

    pub fn items(&self) -> &[u32] {
        &self.items
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
