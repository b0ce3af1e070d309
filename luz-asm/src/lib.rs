//! Assembler, linker and disassembler for the Luz CPU.
//!
//! The pipeline is linear: LASM text goes through [`Assembler`] into a
//! relocatable [`ObjectImage`]; one or more objects go through
//! [`Linker`] into an [`Executable`] with absolute segment bases and
//! an entry point.

pub mod assembler;
pub mod disassembler;
pub mod error;
pub mod executable;
pub mod instructions;
pub mod lexer;
pub mod linker;
pub mod objectfile;
pub mod parser;

pub use assembler::Assembler;
pub use disassembler::disassemble;
pub use error::{AsmError, ImageError, LinkError};
pub use executable::{Executable, LoadedSegment};
pub use linker::{Linker, ENTRY_SYMBOL};
pub use objectfile::{ObjectImage, PatchKind, SegAddr};
