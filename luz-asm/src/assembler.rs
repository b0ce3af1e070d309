//! Two-pass assembler: LASM source in, relocatable object image out.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use log::debug;

use crate::error::{AsmError, Result};
use crate::instructions::{encode_instruction, mnemonic_info};
use crate::lexer::Lexer;
use crate::objectfile::{Export, Import, ObjectImage, Reloc, SegAddr, Segment};
use crate::parser::{Operand, Parser, Statement, StmtBody};

pub struct Assembler;

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    pub fn new() -> Self {
        Self
    }

    /// Assemble a source string. `path` is used in error messages and
    /// recorded as the object's name.
    pub fn assemble(&self, source: &str, path: &str) -> Result<ObjectImage> {
        let tokens = Lexer::new(source, path).tokenize()?;
        let stmts = Parser::new(tokens, path).parse()?;
        debug!("{}: parsed {} statements", path, stmts.len());

        let pass1 = first_pass(&stmts, path)?;
        debug!(
            "{}: first pass found {} labels in {} segment(s)",
            path,
            pass1.symtab.len(),
            pass1.segment_order.len()
        );
        second_pass(pass1, path)
    }

    pub fn assemble_file<P: AsRef<Path>>(&self, path: P) -> Result<ObjectImage> {
        let display = path.as_ref().display().to_string();
        let source = std::fs::read_to_string(&path)
            .map_err(|e| std::io::Error::new(e.kind(), format!("{}: {}", display, e)))?;
        self.assemble(&source, &display)
    }
}

/// Output of the first pass: the label table plus every statement that
/// still matters, bound to the segment offset it will occupy.
struct FirstPass<'a> {
    symtab: HashMap<String, SegAddr>,
    lines: Vec<(SegAddr, &'a Statement)>,
    segment_order: Vec<String>,
}

fn semantic(path: &str, stmt: &Statement, message: String) -> AsmError {
    AsmError::Semantic {
        path: path.to_string(),
        line: stmt.line,
        col: stmt.col,
        message,
    }
}

/// Walk the statements tracking each segment's write cursor, binding
/// labels and sizing every emission. Only the checks needed for
/// correct addresses happen here; operand validation waits for the
/// second pass.
fn first_pass<'a>(stmts: &'a [Statement], path: &str) -> Result<FirstPass<'a>> {
    let mut symtab = HashMap::new();
    let mut lines = Vec::new();
    let mut segment_order: Vec<String> = Vec::new();
    let mut cursors: HashMap<String, u32> = HashMap::new();
    let mut cur_seg: Option<String> = None;

    for stmt in stmts {
        // .segment switches the active segment and is consumed here
        if let Some(StmtBody::Directive { name, args }) = &stmt.body {
            if name == ".segment" {
                if stmt.label.is_some() {
                    return Err(semantic(path, stmt, "a label is not allowed on .segment".into()));
                }
                let seg = match args.as_slice() {
                    [Operand::Ident(seg)] => seg.clone(),
                    _ => {
                        return Err(semantic(path, stmt, ".segment expects a segment name".into()));
                    }
                };
                if !cursors.contains_key(&seg) {
                    cursors.insert(seg.clone(), 0);
                    segment_order.push(seg.clone());
                }
                cur_seg = Some(seg);
                continue;
            }
        }

        let seg = match &cur_seg {
            Some(seg) => seg.clone(),
            None => {
                return Err(semantic(
                    path,
                    stmt,
                    "a segment must be declared before this line".into(),
                ));
            }
        };
        let cursor = cursors[&seg];
        let addr = SegAddr::new(&seg, cursor);

        if let Some(label) = &stmt.label {
            if symtab.contains_key(label) {
                return Err(semantic(path, stmt, format!("label '{}' duplicated", label)));
            }
            symtab.insert(label.clone(), addr.clone());
        }

        let size = match &stmt.body {
            None => continue, // bare label
            Some(StmtBody::Instruction { mnemonic, .. }) => {
                let (_, size) = mnemonic_info(mnemonic).ok_or_else(|| {
                    semantic(path, stmt, format!("unknown instruction '{}'", mnemonic))
                })?;
                if cursor % 4 != 0 {
                    return Err(semantic(
                        path,
                        stmt,
                        format!("instruction at misaligned offset {:#x} in segment '{}'", cursor, seg),
                    ));
                }
                size
            }
            Some(StmtBody::Directive { name, args }) => match name.as_str() {
                ".word" => 4 * args.len() as u32,
                ".byte" => args.len() as u32,
                ".string" => match args.as_slice() {
                    [Operand::Str(s)] => s.len() as u32 + 1,
                    _ => {
                        return Err(semantic(path, stmt, ".string expects one string literal".into()));
                    }
                },
                ".alloc" => match args.as_slice() {
                    [Operand::Num(n)] if *n >= 0 && *n <= u32::MAX as i64 => *n as u32,
                    _ => {
                        return Err(semantic(path, stmt, ".alloc expects a non-negative size".into()));
                    }
                },
                // .define/.global and anything unrecognized occupy no
                // space; unknown names are rejected in the second pass
                _ => 0,
            },
        };

        lines.push((addr, stmt));
        cursors.insert(seg, cursor + size);
    }

    Ok(FirstPass {
        symtab,
        lines,
        segment_order,
    })
}

/// Emit bytes and linkage tables using the addresses computed by the
/// first pass.
fn second_pass(pass1: FirstPass<'_>, path: &str) -> Result<ObjectImage> {
    let FirstPass {
        symtab,
        lines,
        segment_order,
    } = pass1;

    let mut defines: HashMap<String, i64> = HashMap::new();
    let mut seg_data: HashMap<String, Vec<u8>> = segment_order
        .iter()
        .map(|name| (name.clone(), Vec::new()))
        .collect();
    let mut exports = Vec::new();
    let mut imports = Vec::new();
    let mut relocs = Vec::new();
    let mut globals_seen: HashSet<String> = HashSet::new();

    for (addr, stmt) in lines {
        match stmt.body.as_ref().expect("bare labels are dropped in pass one") {
            StmtBody::Instruction { mnemonic, args } => {
                let data = seg_data.get_mut(&addr.segment).expect("segment created in pass one");
                debug_assert_eq!(data.len() as u32, addr.offset);

                let encoded = encode_instruction(mnemonic, args, &addr, &symtab, &defines)
                    .map_err(|e| semantic(path, stmt, e.to_string()))?;

                for enc in encoded {
                    // Offsets are re-read per word: a pseudo-instruction
                    // may expand to two, and the patch belongs to the
                    // word carrying the request.
                    let offset = data.len() as u32;
                    if let Some((kind, symbol)) = enc.import_req {
                        imports.push(Import {
                            symbol,
                            kind,
                            addr: SegAddr::new(&addr.segment, offset),
                        });
                    }
                    if let Some((kind, segment)) = enc.reloc_req {
                        relocs.push(Reloc {
                            segment,
                            kind,
                            addr: SegAddr::new(&addr.segment, offset),
                        });
                    }
                    data.extend_from_slice(&enc.word.to_le_bytes());
                }
            }
            StmtBody::Directive { name, args } => match name.as_str() {
                ".define" => match args.as_slice() {
                    [Operand::Ident(name), Operand::Num(value)] => {
                        if defines.contains_key(name) {
                            return Err(semantic(
                                path,
                                stmt,
                                format!("redefinition of constant '{}'", name),
                            ));
                        }
                        defines.insert(name.clone(), *value);
                    }
                    _ => {
                        return Err(semantic(path, stmt, ".define expects a name and a value".into()));
                    }
                },
                ".global" => match args.as_slice() {
                    [Operand::Ident(symbol)] => {
                        let label_addr = symtab.get(symbol).ok_or_else(|| {
                            semantic(path, stmt, format!(".global names unknown label '{}'", symbol))
                        })?;
                        if !globals_seen.insert(symbol.clone()) {
                            return Err(semantic(
                                path,
                                stmt,
                                format!("duplicate .global for '{}'", symbol),
                            ));
                        }
                        exports.push(Export {
                            symbol: symbol.clone(),
                            addr: label_addr.clone(),
                        });
                    }
                    _ => {
                        return Err(semantic(path, stmt, ".global expects a label name".into()));
                    }
                },
                ".alloc" => {
                    // argument validated in the first pass
                    let n = match args.as_slice() {
                        [Operand::Num(n)] => *n as usize,
                        _ => unreachable!(),
                    };
                    let data = seg_data.get_mut(&addr.segment).expect("segment created in pass one");
                    data.resize(data.len() + n, 0);
                }
                ".byte" => {
                    let data = seg_data.get_mut(&addr.segment).expect("segment created in pass one");
                    for (i, arg) in args.iter().enumerate() {
                        match arg {
                            Operand::Num(v)
                                if luz_isa::fits_signed(*v, 8) || luz_isa::fits_unsigned(*v, 8) =>
                            {
                                data.push(*v as u8);
                            }
                            _ => {
                                return Err(semantic(
                                    path,
                                    stmt,
                                    format!(".byte argument {} is not a valid byte", i + 1),
                                ));
                            }
                        }
                    }
                }
                ".word" => {
                    let data = seg_data.get_mut(&addr.segment).expect("segment created in pass one");
                    for (i, arg) in args.iter().enumerate() {
                        match arg {
                            Operand::Num(v)
                                if luz_isa::fits_signed(*v, 32) || luz_isa::fits_unsigned(*v, 32) =>
                            {
                                data.extend_from_slice(&(*v as u32).to_le_bytes());
                            }
                            _ => {
                                return Err(semantic(
                                    path,
                                    stmt,
                                    format!(".word argument {} is not a valid word", i + 1),
                                ));
                            }
                        }
                    }
                }
                ".string" => {
                    // shape validated in the first pass
                    let s = match args.as_slice() {
                        [Operand::Str(s)] => s,
                        _ => unreachable!(),
                    };
                    let data = seg_data.get_mut(&addr.segment).expect("segment created in pass one");
                    data.extend_from_slice(s.as_bytes());
                    data.push(0);
                }
                other => {
                    return Err(semantic(path, stmt, format!("unknown directive '{}'", other)));
                }
            },
        }
    }

    let segments = segment_order
        .into_iter()
        .map(|name| {
            let data = seg_data.remove(&name).expect("segment created in pass one");
            Segment { name, data }
        })
        .collect();

    Ok(ObjectImage {
        name: Some(path.to_string()),
        segments,
        exports,
        imports,
        relocs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectfile::PatchKind;
    use luz_isa::{Instruction, Op};

    fn assemble(src: &str) -> ObjectImage {
        Assembler::new().assemble(src, "test.lasm").unwrap()
    }

    fn assemble_err(src: &str) -> String {
        Assembler::new()
            .assemble(src, "test.lasm")
            .unwrap_err()
            .to_string()
    }

    fn words(obj: &ObjectImage, seg: &str) -> Vec<u32> {
        obj.segment(seg)
            .unwrap()
            .data
            .chunks(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn simple_code_segment() {
        let obj = assemble(
            r#"
                .segment code
                addi $r6, $r0, 25
                halt
            "#,
        );
        let w = words(&obj, "code");
        assert_eq!(w.len(), 2);
        let addi = Instruction::decode(w[0]).unwrap();
        assert_eq!((addi.op, addi.rd, addi.rs, addi.imm), (Op::Addi, 6, 0, 25));
        assert_eq!(Instruction::decode(w[1]).unwrap().op, Op::Halt);
    }

    #[test]
    fn label_addresses_per_segment() {
        let obj = assemble(
            r#"
                .segment code
                nop
            here:
                nop
                .segment data
            tab:
                .word 1, 2
                .segment code
            after:
                halt
            "#,
        );
        // cursors resume per segment
        assert_eq!(obj.segment("code").unwrap().data.len(), 12);
        assert_eq!(obj.segment("data").unwrap().data.len(), 8);

        let obj2 = assemble(
            r#"
                .segment code
                nop
            here:
                beqz $r1, here
                halt
            "#,
        );
        let w = words(&obj2, "code");
        // branch at offset 4 targeting offset 4: field 0
        assert_eq!(w[1] & 0xFFFF, 0);
    }

    #[test]
    fn data_directives_sizes() {
        let obj = assemble(
            r#"
                .segment data
                .byte 1, 2, 3
                .string "ab"
                .alloc 5
                .word 0x01020304
            "#,
        );
        let data = &obj.segment("data").unwrap().data;
        assert_eq!(
            data.as_slice(),
            &[1, 2, 3, b'a', b'b', 0, 0, 0, 0, 0, 0, 4, 3, 2, 1]
        );
    }

    #[test]
    fn string_escapes_and_terminator() {
        let obj = assemble(".segment data\n.string \"a\\tb\"\n");
        assert_eq!(obj.segment("data").unwrap().data, vec![b'a', b'\t', b'b', 0]);
    }

    #[test]
    fn exports_and_imports() {
        let obj = assemble(
            r#"
                .segment code
                .global asm_main
            asm_main:
                call helper
                halt
            "#,
        );
        assert_eq!(obj.exports.len(), 1);
        assert_eq!(obj.exports[0].symbol, "asm_main");
        assert_eq!(obj.exports[0].addr, SegAddr::new("code", 0));
        assert_eq!(obj.imports.len(), 1);
        assert_eq!(obj.imports[0].symbol, "helper");
        assert_eq!(obj.imports[0].kind, PatchKind::Call);
    }

    #[test]
    fn li_to_local_label_relocates() {
        let obj = assemble(
            r#"
                .segment data
            value:
                .word 7
                .segment code
                li $r2, value
                halt
            "#,
        );
        assert_eq!(obj.relocs.len(), 1);
        assert_eq!(obj.relocs[0].segment, "data");
        assert_eq!(obj.relocs[0].kind, PatchKind::LoadImm);
        assert_eq!(obj.relocs[0].addr, SegAddr::new("code", 0));
        // LI reserves 8 bytes
        assert_eq!(obj.segment("code").unwrap().data.len(), 12);
    }

    #[test]
    fn define_must_precede_use() {
        let err = assemble_err(
            r#"
                .segment code
                addi $r1, $r0, LIMIT
                .define LIMIT, 10
            "#,
        );
        assert!(err.contains("undefined constant 'LIMIT'"));
    }

    #[test]
    fn define_redefinition_rejected() {
        let err = assemble_err(
            r#"
                .segment code
                .define X, 1
                .define X, 2
            "#,
        );
        assert!(err.contains("redefinition"));
    }

    #[test]
    fn duplicate_label_rejected() {
        let err = assemble_err(
            r#"
                .segment code
            a:
                nop
            a:
                nop
            "#,
        );
        assert!(err.contains("duplicated"));
    }

    #[test]
    fn duplicate_global_rejected() {
        let err = assemble_err(
            r#"
                .segment code
            f:
                nop
                .global f
                .global f
            "#,
        );
        assert!(err.contains("duplicate .global"));
    }

    #[test]
    fn global_of_unknown_label_rejected() {
        let err = assemble_err(".segment code\n.global nowhere\n");
        assert!(err.contains("unknown label"));
    }

    #[test]
    fn code_before_segment_rejected() {
        let err = assemble_err("nop\n");
        assert!(err.contains("segment must be declared"));
    }

    #[test]
    fn unknown_mnemonic_rejected() {
        let err = assemble_err(".segment code\nfrobnicate $r1\n");
        assert!(err.contains("unknown instruction"));
    }

    #[test]
    fn misaligned_instruction_rejected() {
        let err = assemble_err(
            r#"
                .segment code
                .byte 1
                nop
            "#,
        );
        assert!(err.contains("misaligned"));
    }

    #[test]
    fn errors_carry_position() {
        let err = Assembler::new()
            .assemble(".segment code\nfrobnicate $r1\n", "prog.lasm")
            .unwrap_err();
        assert!(err.to_string().starts_with("prog.lasm:2:"));
    }

    #[test]
    fn assembly_is_deterministic() {
        let src = r#"
            .segment code
            .global asm_main
        asm_main:
            li $r2, buffer
            call helper
            halt
            .segment data
        buffer:
            .alloc 16
        "#;
        let a = Assembler::new().assemble(src, "x.lasm").unwrap();
        let b = Assembler::new().assemble(src, "x.lasm").unwrap();
        assert_eq!(a, b);
    }
}
