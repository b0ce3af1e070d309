//! Error types for assembly, linking and image files.

use thiserror::Error;

/// Errors produced while turning LASM source into an object image.
#[derive(Error, Debug)]
pub enum AsmError {
    #[error("{path}:{line}:{col}: syntax error: {message}")]
    Syntax {
        path: String,
        line: usize,
        col: usize,
        message: String,
    },

    #[error("{path}:{line}:{col}: {message}")]
    Semantic {
        path: String,
        line: usize,
        col: usize,
        message: String,
    },

    #[error("{path}: invalid object file: {source}")]
    ObjectFormat {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for assembler operations.
pub type Result<T> = std::result::Result<T, AsmError>;

/// Errors produced while combining object images into an executable.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("duplicated export symbol '{symbol}' in objects [{first}] and [{second}]")]
    DuplicateExport {
        symbol: String,
        first: String,
        second: String,
    },

    #[error("failed import of symbol '{symbol}' in object [{object}]")]
    UnresolvedImport { symbol: String, object: String },

    #[error("relocation in object [{object}] refers to unknown segment '{segment}'")]
    UnknownSegment { segment: String, object: String },

    #[error("entry symbol 'asm_main' is not exported by any object")]
    MissingEntry,

    #[error("patching '{name}': {message}")]
    BadPatch { name: String, message: String },

    #[error("patching '{name}': value {value:#x} does not fit the {nbits}-bit field")]
    FieldOverflow {
        name: String,
        value: u32,
        nbits: u32,
    },

    #[error("segment '{segment}' overlaps previously placed data at {addr:#010x}")]
    Overlap { segment: String, addr: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while reading an executable image file.
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("not a Luz executable (bad magic)")]
    BadMagic,

    #[error("unsupported executable format version {0}")]
    UnsupportedVersion(u16),

    #[error("truncated executable image")]
    Truncated,

    #[error("segment name is not valid UTF-8")]
    BadName,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
