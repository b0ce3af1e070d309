//! Linker: combines object images into a loadable executable.
//!
//! Same-named segments from all objects are concatenated in input
//! order, segments are assigned absolute bases, exported symbols are
//! matched against imports, and the CALL / LUI+ORI patch requests left
//! by the assembler are applied to the merged bytes.

use std::collections::HashMap;

use log::{debug, info};

use luz_isa::{bits, field, fits_unsigned, Op, USER_MEMORY_START};

use crate::error::LinkError;
use crate::executable::{Executable, LoadedSegment};
use crate::objectfile::{ObjectImage, PatchKind};

/// Symbol that must be exported exactly once and becomes the entry
/// point of the executable.
pub const ENTRY_SYMBOL: &str = "asm_main";

pub struct Linker {
    base: u32,
}

impl Default for Linker {
    fn default() -> Self {
        Self::new()
    }
}

impl Linker {
    /// A linker placing the `code` segment at the architectural start
    /// of user memory.
    pub fn new() -> Self {
        Self {
            base: USER_MEMORY_START,
        }
    }

    /// Place `code` at a custom base address (word aligned).
    pub fn with_base(base: u32) -> Self {
        debug_assert_eq!(base % 4, 0);
        Self { base }
    }

    pub fn link(&self, mut objects: Vec<ObjectImage>) -> Result<Executable, LinkError> {
        let layout = self.compute_layout(&objects)?;
        let exports = collect_exports(&objects)?;

        // Work out every patch before touching any bytes; imports read
        // other objects' tables while relocations write this one's.
        let mut patches: Vec<Patch> = Vec::new();

        for (idx, obj) in objects.iter().enumerate() {
            for import in &obj.imports {
                let (exp_idx, exp_addr) = exports.get(&import.symbol).ok_or_else(|| {
                    LinkError::UnresolvedImport {
                        symbol: import.symbol.clone(),
                        object: obj.id().to_string(),
                    }
                })?;
                let exp_base = *layout.object_maps[*exp_idx]
                    .get(&exp_addr.segment)
                    .ok_or_else(|| LinkError::UnknownSegment {
                        segment: exp_addr.segment.clone(),
                        object: objects[*exp_idx].id().to_string(),
                    })?;
                let mapped = exp_base + exp_addr.offset;
                patches.push(Patch {
                    object: idx,
                    segment: import.addr.segment.clone(),
                    offset: import.addr.offset,
                    kind: import.kind,
                    mapped,
                    replace: true,
                    name: import.symbol.clone(),
                });
            }

            for reloc in &obj.relocs {
                let mapped = *layout.object_maps[idx].get(&reloc.segment).ok_or_else(|| {
                    LinkError::UnknownSegment {
                        segment: reloc.segment.clone(),
                        object: obj.id().to_string(),
                    }
                })?;
                patches.push(Patch {
                    object: idx,
                    segment: reloc.addr.segment.clone(),
                    offset: reloc.addr.offset,
                    kind: reloc.kind,
                    mapped,
                    replace: false,
                    name: reloc.segment.clone(),
                });
            }
        }

        for patch in &patches {
            let data = &mut objects[patch.object]
                .segment_mut(&patch.segment)
                .ok_or_else(|| LinkError::BadPatch {
                    name: patch.name.clone(),
                    message: format!("patch in unknown segment '{}'", patch.segment),
                })?
                .data;
            apply_patch(data, patch)?;
        }

        // Entry point
        let (entry_idx, entry_addr) = exports.get(ENTRY_SYMBOL).ok_or(LinkError::MissingEntry)?;
        let entry_base = *layout.object_maps[*entry_idx]
            .get(&entry_addr.segment)
            .ok_or_else(|| LinkError::UnknownSegment {
                segment: entry_addr.segment.clone(),
                object: objects[*entry_idx].id().to_string(),
            })?;
        let entry = entry_base + entry_addr.offset;

        // Merge segment contents in layout order
        let segments = layout
            .order
            .iter()
            .map(|name| {
                let mut data = Vec::new();
                for obj in &objects {
                    if let Some(seg) = obj.segment(name) {
                        data.extend_from_slice(&seg.data);
                    }
                }
                LoadedSegment {
                    name: name.clone(),
                    base: layout.bases[name],
                    data,
                }
            })
            .collect();

        info!("linked {} object(s), entry {:#010x}", objects.len(), entry);
        Ok(Executable { entry, segments })
    }

    /// Assign each merged segment an absolute base: `code` at the link
    /// base, `data` right after it, the rest in order of first
    /// appearance across the inputs, all word aligned.
    fn compute_layout(&self, objects: &[ObjectImage]) -> Result<Layout, LinkError> {
        let mut sizes: HashMap<String, u32> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for obj in objects {
            for seg in &obj.segments {
                if !sizes.contains_key(&seg.name) {
                    order.push(seg.name.clone());
                }
                *sizes.entry(seg.name.clone()).or_insert(0) += seg.data.len() as u32;
            }
        }

        order.sort_by_key(|name| match name.as_str() {
            "code" => 0,
            "data" => 1,
            _ => 2,
        });

        let mut bases: HashMap<String, u32> = HashMap::new();
        let mut ptr = self.base;
        for name in &order {
            ptr = align_word(ptr);
            bases.insert(name.clone(), ptr);
            debug!("segment '{}' placed at {:#010x} ({} bytes)", name, ptr, sizes[name]);
            ptr = ptr
                .checked_add(sizes[name])
                .ok_or_else(|| LinkError::Overlap {
                    segment: name.clone(),
                    addr: ptr,
                })?;
        }

        // Per-object view: where each object's slice of every segment
        // landed.
        let mut running = bases.clone();
        let mut object_maps = Vec::with_capacity(objects.len());
        for obj in objects {
            let mut map = HashMap::new();
            for seg in &obj.segments {
                let at = running[&seg.name];
                map.insert(seg.name.clone(), at);
                running.insert(seg.name.clone(), at + seg.data.len() as u32);
            }
            object_maps.push(map);
        }

        Ok(Layout {
            order,
            bases,
            object_maps,
        })
    }
}

struct Layout {
    order: Vec<String>,
    bases: HashMap<String, u32>,
    /// For each object, the absolute address of its slice of every
    /// segment it contributes to.
    object_maps: Vec<HashMap<String, u32>>,
}

struct Patch {
    object: usize,
    segment: String,
    offset: u32,
    kind: PatchKind,
    mapped: u32,
    /// Imports replace the encoded field; relocations add to it.
    replace: bool,
    name: String,
}

fn align_word(addr: u32) -> u32 {
    (addr + 3) & !3
}

fn read_word(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

fn write_word(data: &mut [u8], offset: usize, word: u32) {
    data[offset..offset + 4].copy_from_slice(&word.to_le_bytes());
}

fn apply_patch(data: &mut [u8], patch: &Patch) -> Result<(), LinkError> {
    let bad = |message: String| LinkError::BadPatch {
        name: patch.name.clone(),
        message,
    };

    let span = match patch.kind {
        PatchKind::Call => 4,
        PatchKind::LoadImm => 8,
    };
    let offset = patch.offset as usize;
    if offset + span > data.len() {
        return Err(bad("patch offset past the end of the segment".into()));
    }
    if patch.mapped % 4 != 0 {
        return Err(bad(format!("patched address {:#x} is not word aligned", patch.mapped)));
    }

    match patch.kind {
        PatchKind::Call => {
            let word = read_word(data, offset);
            if bits(word, 31, 26) != Op::Call.opcode() {
                return Err(bad("expected a CALL instruction at the patch site".into()));
            }
            let dest = if patch.replace {
                patch.mapped / 4
            } else {
                bits(word, 25, 0) + patch.mapped / 4
            };
            if !fits_unsigned(dest as i64, 26) {
                return Err(LinkError::FieldOverflow {
                    name: patch.name.clone(),
                    value: dest,
                    nbits: 26,
                });
            }
            write_word(
                data,
                offset,
                field(31, 26, Op::Call.opcode()) | field(25, 0, dest),
            );
        }
        PatchKind::LoadImm => {
            let lui = read_word(data, offset);
            let ori = read_word(data, offset + 4);
            if bits(lui, 31, 26) != Op::Lui.opcode() || bits(ori, 31, 26) != Op::Ori.opcode() {
                return Err(bad("expected a LUI/ORI pair at the patch site".into()));
            }
            let encoded = (bits(lui, 15, 0) << 16) | bits(ori, 15, 0);
            let value = if patch.replace {
                patch.mapped
            } else {
                encoded
                    .checked_add(patch.mapped)
                    .ok_or_else(|| LinkError::FieldOverflow {
                        name: patch.name.clone(),
                        value: encoded,
                        nbits: 32,
                    })?
            };
            // Registers carry over; the ORI of an LI pair keeps its
            // destination in both rd and rs.
            let rd = bits(lui, 25, 21);
            write_word(
                data,
                offset,
                field(31, 26, Op::Lui.opcode()) | field(25, 21, rd) | field(15, 0, value >> 16),
            );
            let ori_rd = bits(ori, 25, 21);
            write_word(
                data,
                offset + 4,
                field(31, 26, Op::Ori.opcode())
                    | field(25, 21, ori_rd)
                    | field(20, 16, ori_rd)
                    | field(15, 0, value & 0xFFFF),
            );
        }
    }
    Ok(())
}

type Exports = HashMap<String, (usize, crate::objectfile::SegAddr)>;

/// Collect exported symbols from all objects, rejecting duplicates.
fn collect_exports(objects: &[ObjectImage]) -> Result<Exports, LinkError> {
    let mut exports: Exports = HashMap::new();
    for (idx, obj) in objects.iter().enumerate() {
        for export in &obj.exports {
            if let Some((other_idx, _)) = exports.get(&export.symbol) {
                return Err(LinkError::DuplicateExport {
                    symbol: export.symbol.clone(),
                    first: objects[*other_idx].id().to_string(),
                    second: obj.id().to_string(),
                });
            }
            exports.insert(export.symbol.clone(), (idx, export.addr.clone()));
        }
    }
    Ok(exports)
}
