//! Simulator for the Luz 32-bit RISC CPU.
//!
//! [`LuzSim`] owns the full machine: register file, program counter,
//! sparse memory, core registers and the debug-queue peripheral. The
//! caller loads segments, then steps or runs to HALT.

pub mod cpu;
pub mod memory;
pub mod peripheral;

pub use cpu::{LuzSim, SimConfig};
pub use memory::{MemError, Memory};
pub use peripheral::{CoreRegisters, DebugQueue};
