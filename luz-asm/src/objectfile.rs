//! Relocatable object images.
//!
//! An object image is what the assembler produces for one translation
//! unit: segment contents plus the linkage tables (exports, imports
//! and segment relocations). Images serialize to JSON for the `.lo`
//! files passed between `assemble` and `link`.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AsmError, Result};

/// A (segment, offset) pair. Every address inside an object is an
/// offset into some segment; absolute addresses exist only after
/// linking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegAddr {
    pub segment: String,
    pub offset: u32,
}

impl SegAddr {
    pub fn new(segment: &str, offset: u32) -> Self {
        Self {
            segment: segment.to_string(),
            offset,
        }
    }
}

/// How the linker patches an instruction once the final address is
/// known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchKind {
    /// The 26-bit word-index field of a CALL.
    Call,
    /// The LUI/ORI pair produced by LI: high half in the LUI at the
    /// patch address, low half in the ORI one word after it.
    LoadImm,
}

/// A symbol made visible to other objects with `.global`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Export {
    pub symbol: String,
    pub addr: SegAddr,
}

/// A reference to a symbol this object does not define. The linker
/// writes the symbol's final address into the instruction at `addr`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Import {
    pub symbol: String,
    pub kind: PatchKind,
    pub addr: SegAddr,
}

/// A reference to a locally defined label. The segment-relative value
/// is already encoded; the linker adds the segment's final base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reloc {
    pub segment: String,
    pub kind: PatchKind,
    pub addr: SegAddr,
}

/// One named segment with its assembled bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub name: String,
    pub data: Vec<u8>,
}

/// A relocatable object image. Segments keep the order in which they
/// first appeared in the source, which the linker uses for layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectImage {
    /// Source file name, for link-error reporting.
    pub name: Option<String>,
    pub segments: Vec<Segment>,
    pub exports: Vec<Export>,
    pub imports: Vec<Import>,
    pub relocs: Vec<Reloc>,
}

impl ObjectImage {
    pub fn segment(&self, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.name == name)
    }

    pub fn segment_mut(&mut self, name: &str) -> Option<&mut Segment> {
        self.segments.iter_mut().find(|s| s.name == name)
    }

    /// Identification used in linker diagnostics.
    pub fn id(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let display = path.as_ref().display().to_string();
        let file = BufWriter::new(File::create(&path)?);
        serde_json::to_writer(file, self).map_err(|source| AsmError::ObjectFormat {
            path: display,
            source,
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let display = path.as_ref().display().to_string();
        let file = BufReader::new(File::open(&path)?);
        serde_json::from_reader(file).map_err(|source| AsmError::ObjectFormat {
            path: display,
            source,
        })
    }
}
