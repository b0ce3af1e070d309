//! Per-instruction encoding.
//!
//! One encoder per mnemonic, shared templates per operand format,
//! mirroring the ISA field layouts in `luz_isa`. Pseudo-instructions
//! are expanded here: most to a single real instruction, LI to a
//! LUI/ORI pair.

use std::collections::HashMap;

use luz_isa::{fits_signed, fits_unsigned, Instruction, Op};
use thiserror::Error;

use crate::objectfile::{PatchKind, SegAddr};
use crate::parser::{MemOffset, Operand};

/// An instruction-level error. Carries no source position; the
/// assembler attaches the statement's location when reporting.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct EncodeError(pub String);

type EncResult<T> = std::result::Result<T, EncodeError>;

fn err<T>(message: impl Into<String>) -> EncResult<T> {
    Err(EncodeError(message.into()))
}

/// One encoded word, optionally asking the linker for a patch.
#[derive(Debug, Clone, PartialEq)]
pub struct Encoded {
    pub word: u32,
    /// (kind, symbol): patch with an external symbol's final address.
    pub import_req: Option<(PatchKind, String)>,
    /// (kind, segment): add the segment's final base to the encoded
    /// field.
    pub reloc_req: Option<(PatchKind, String)>,
}

impl Encoded {
    fn plain(word: u32) -> Self {
        Self {
            word,
            import_req: None,
            reloc_req: None,
        }
    }
}

/// Operand count and encoded size in bytes for every accepted
/// mnemonic, pseudo-instructions included. Returns None for unknown
/// mnemonics.
pub fn mnemonic_info(name: &str) -> Option<(usize, u32)> {
    let info = match name {
        "add" | "sub" | "mulu" | "mul" | "divu" | "div" | "sll" | "srl" | "and" | "or" | "nor"
        | "xor" => (3, 4),
        "addi" | "subi" | "andi" | "ori" | "slli" | "srli" => (3, 4),
        "beq" | "bne" | "bge" | "bgt" | "ble" | "blt" | "bgeu" | "bgtu" | "bleu" | "bltu" => (3, 4),
        "lb" | "lh" | "lw" | "lbu" | "lhu" | "sb" | "sh" | "sw" => (2, 4),
        "lui" | "lli" | "not" | "move" | "neg" | "beqz" | "bnez" => (2, 4),
        "jr" | "b" | "call" => (1, 4),
        "nop" | "ret" | "eret" | "halt" => (0, 4),
        "li" => (2, 8),
        _ => return None,
    };
    Some(info)
}

/// Assemble one (possibly pseudo) instruction into encoded words.
///
/// `addr` is the location the first word will occupy, `symtab` the
/// label table from the first pass, `defines` the constants bound so
/// far by `.define`.
pub fn encode_instruction(
    mnemonic: &str,
    args: &[Operand],
    addr: &SegAddr,
    symtab: &HashMap<String, SegAddr>,
    defines: &HashMap<String, i64>,
) -> EncResult<Vec<Encoded>> {
    let (nargs, _) =
        mnemonic_info(mnemonic).ok_or_else(|| EncodeError(format!("unknown instruction '{}'", mnemonic)))?;
    if args.len() != nargs {
        return err(format!("{} expects {} operand(s), got {}", mnemonic, nargs, args.len()));
    }

    let one = |e: Encoded| Ok(vec![e]);

    match mnemonic {
        // Three-register arithmetic and logic
        "add" => one(three_reg(Op::Add, args)?),
        "sub" => one(three_reg(Op::Sub, args)?),
        "mulu" => one(three_reg(Op::Mulu, args)?),
        "mul" => one(three_reg(Op::Mul, args)?),
        "divu" => one(three_reg(Op::Divu, args)?),
        "div" => one(three_reg(Op::Div, args)?),
        "sll" => one(three_reg(Op::Sll, args)?),
        "srl" => one(three_reg(Op::Srl, args)?),
        "and" => one(three_reg(Op::And, args)?),
        "or" => one(three_reg(Op::Or, args)?),
        "nor" => one(three_reg(Op::Nor, args)?),
        "xor" => one(three_reg(Op::Xor, args)?),

        // Pseudo: NOP is ADD $r0, $r0, $r0
        "nop" => one(three_reg_nums(Op::Add, 0, 0, 0)),
        // Pseudo: NOT rd, rs is NOR rd, rs, rs
        "not" => {
            let rd = want_reg(&args[0])?;
            let rs = want_reg(&args[1])?;
            one(three_reg_nums(Op::Nor, rd, rs, rs))
        }
        // Pseudo: MOVE rd, rs is ADD rd, rs, $r0
        "move" => {
            let rd = want_reg(&args[0])?;
            let rs = want_reg(&args[1])?;
            one(three_reg_nums(Op::Add, rd, rs, 0))
        }
        // Pseudo: NEG rd, rs is SUB rd, $r0, rs
        "neg" => {
            let rd = want_reg(&args[0])?;
            let rs = want_reg(&args[1])?;
            one(three_reg_nums(Op::Sub, rd, 0, rs))
        }

        // Two registers and a 16-bit immediate
        "addi" => one(two_reg_imm(Op::Addi, args, defines)?),
        "subi" => one(two_reg_imm(Op::Subi, args, defines)?),
        "andi" => one(two_reg_imm(Op::Andi, args, defines)?),
        "ori" => one(two_reg_imm(Op::Ori, args, defines)?),
        "slli" => one(two_reg_imm(Op::Slli, args, defines)?),
        "srli" => one(two_reg_imm(Op::Srli, args, defines)?),

        // Pseudo: LLI rd, imm is ORI rd, $r0, imm
        "lli" => {
            let rd = want_reg(&args[0])?;
            let imm = const_bits(&args[1], defines, 16)?;
            one(Encoded::plain(
                Instruction { op: Op::Ori, rd, rs: 0, rt: 0, imm }.encode(),
            ))
        }

        "lui" => {
            let rd = want_reg(&args[0])?;
            let imm = const_bits(&args[1], defines, 16)?;
            one(Encoded::plain(
                Instruction { op: Op::Lui, rd, rs: 0, rt: 0, imm }.encode(),
            ))
        }

        // Loads: rd takes the value, rs is the base register
        "lb" => one(load(Op::Lb, args, defines)?),
        "lh" => one(load(Op::Lh, args, defines)?),
        "lw" => one(load(Op::Lw, args, defines)?),
        "lbu" => one(load(Op::Lbu, args, defines)?),
        "lhu" => one(load(Op::Lhu, args, defines)?),

        // Stores: the base register sits in the rd field, the stored
        // value in rs
        "sb" => one(store(Op::Sb, args, defines)?),
        "sh" => one(store(Op::Sh, args, defines)?),
        "sw" => one(store(Op::Sw, args, defines)?),

        "jr" => {
            let rd = want_reg(&args[0])?;
            one(Encoded::plain(
                Instruction { op: Op::Jr, rd, rs: 0, rt: 0, imm: 0 }.encode(),
            ))
        }
        // Pseudo: RET is JR $ra
        "ret" => one(Encoded::plain(
            Instruction { op: Op::Jr, rd: luz_isa::REG_RA, rs: 0, rt: 0, imm: 0 }.encode(),
        )),

        "beq" => one(branch(Op::Beq, args, addr, symtab)?),
        "bne" => one(branch(Op::Bne, args, addr, symtab)?),
        "bge" => one(branch(Op::Bge, args, addr, symtab)?),
        "bgt" => one(branch(Op::Bgt, args, addr, symtab)?),
        "ble" => one(branch(Op::Ble, args, addr, symtab)?),
        "blt" => one(branch(Op::Blt, args, addr, symtab)?),
        "bgeu" => one(branch(Op::Bgeu, args, addr, symtab)?),
        "bgtu" => one(branch(Op::Bgtu, args, addr, symtab)?),
        "bleu" => one(branch(Op::Bleu, args, addr, symtab)?),
        "bltu" => one(branch(Op::Bltu, args, addr, symtab)?),

        // Pseudo: BEQZ/BNEZ compare against $r0
        "beqz" => {
            let rd = want_reg(&args[0])?;
            let imm = branch_offset(&args[1], 16, addr, symtab)?;
            one(Encoded::plain(
                Instruction { op: Op::Beq, rd, rs: 0, rt: 0, imm }.encode(),
            ))
        }
        "bnez" => {
            let rd = want_reg(&args[0])?;
            let imm = branch_offset(&args[1], 16, addr, symtab)?;
            one(Encoded::plain(
                Instruction { op: Op::Bne, rd, rs: 0, rt: 0, imm }.encode(),
            ))
        }

        "b" => {
            let imm = branch_offset(&args[0], 26, addr, symtab)?;
            one(Encoded::plain(
                Instruction { op: Op::B, rd: 0, rs: 0, rt: 0, imm }.encode(),
            ))
        }

        "call" => encode_call(&args[0], symtab, defines),
        "li" => encode_li(&args[0], &args[1], defines, symtab),

        "eret" => one(Encoded::plain(
            Instruction { op: Op::Eret, rd: 0, rs: 0, rt: 0, imm: 0 }.encode(),
        )),
        "halt" => one(Encoded::plain(
            Instruction { op: Op::Halt, rd: 0, rs: 0, rt: 0, imm: 0 }.encode(),
        )),

        _ => err(format!("unknown instruction '{}'", mnemonic)),
    }
}

// --- operand templates ---

fn three_reg(op: Op, args: &[Operand]) -> EncResult<Encoded> {
    let rd = want_reg(&args[0])?;
    let rs = want_reg(&args[1])?;
    let rt = want_reg(&args[2])?;
    Ok(three_reg_nums(op, rd, rs, rt))
}

fn three_reg_nums(op: Op, rd: u8, rs: u8, rt: u8) -> Encoded {
    Encoded::plain(Instruction { op, rd, rs, rt, imm: 0 }.encode())
}

fn two_reg_imm(op: Op, args: &[Operand], defines: &HashMap<String, i64>) -> EncResult<Encoded> {
    let rd = want_reg(&args[0])?;
    let rs = want_reg(&args[1])?;
    let imm = const_bits(&args[2], defines, 16)?;
    Ok(Encoded::plain(
        Instruction { op, rd, rs, rt: 0, imm }.encode(),
    ))
}

fn load(op: Op, args: &[Operand], defines: &HashMap<String, i64>) -> EncResult<Encoded> {
    let rd = want_reg(&args[0])?;
    let (base, off) = memref(&args[1], defines)?;
    Ok(Encoded::plain(
        Instruction { op, rd, rs: base, rt: 0, imm: off }.encode(),
    ))
}

fn store(op: Op, args: &[Operand], defines: &HashMap<String, i64>) -> EncResult<Encoded> {
    let rs = want_reg(&args[0])?;
    let (base, off) = memref(&args[1], defines)?;
    Ok(Encoded::plain(
        Instruction { op, rd: base, rs, rt: 0, imm: off }.encode(),
    ))
}

fn branch(
    op: Op,
    args: &[Operand],
    addr: &SegAddr,
    symtab: &HashMap<String, SegAddr>,
) -> EncResult<Encoded> {
    let rd = want_reg(&args[0])?;
    let rs = want_reg(&args[1])?;
    let imm = branch_offset(&args[2], 16, addr, symtab)?;
    Ok(Encoded::plain(
        Instruction { op, rd, rs, rt: 0, imm }.encode(),
    ))
}

fn encode_call(
    target: &Operand,
    symtab: &HashMap<String, SegAddr>,
    defines: &HashMap<String, i64>,
) -> EncResult<Vec<Encoded>> {
    // A numeric or defined-constant target is an absolute byte
    // address. A label defined in this unit gets its segment-relative
    // word index encoded now plus a relocation for the segment base.
    // Anything else becomes an import patched by the linker.
    match target {
        Operand::Num(_) | Operand::Ident(_) if constant_like(target, defines) => {
            let address = const_value(target, defines)?;
            let imm = call_word_index(address)?;
            Ok(vec![Encoded::plain(call_word(imm))])
        }
        Operand::Ident(label) => {
            if let Some(seg_addr) = symtab.get(label) {
                let imm = call_word_index(seg_addr.offset as i64)?;
                Ok(vec![Encoded {
                    word: call_word(imm),
                    import_req: None,
                    reloc_req: Some((PatchKind::Call, seg_addr.segment.clone())),
                }])
            } else {
                Ok(vec![Encoded {
                    word: call_word(0),
                    import_req: Some((PatchKind::Call, label.clone())),
                    reloc_req: None,
                }])
            }
        }
        _ => err("invalid CALL target"),
    }
}

fn call_word(imm: u32) -> u32 {
    Instruction { op: Op::Call, rd: 0, rs: 0, rt: 0, imm }.encode()
}

fn call_word_index(address: i64) -> EncResult<u32> {
    if address < 0 {
        return err(format!("CALL target {} is negative", address));
    }
    if address % 4 != 0 {
        return err(format!("CALL target {:#x} is not word aligned", address));
    }
    let index = address / 4;
    if !fits_unsigned(index, 26) {
        return err(format!("CALL target {:#x} out of 26-bit range", address));
    }
    Ok(index as u32)
}

fn encode_li(
    rd_arg: &Operand,
    value: &Operand,
    defines: &HashMap<String, i64>,
    symtab: &HashMap<String, SegAddr>,
) -> EncResult<Vec<Encoded>> {
    let rd = want_reg(rd_arg)?;

    let pair = |val: u32| {
        let lui = Instruction { op: Op::Lui, rd, rs: 0, rt: 0, imm: val >> 16 }.encode();
        let ori = Instruction { op: Op::Ori, rd, rs: rd, rt: 0, imm: val & 0xFFFF }.encode();
        (Encoded::plain(lui), Encoded::plain(ori))
    };

    match value {
        Operand::Num(_) | Operand::Ident(_) if constant_like(value, defines) => {
            let v = const_value(value, defines)?;
            if !(fits_signed(v, 32) || fits_unsigned(v, 32)) {
                return err(format!("constant {} won't fit in 32 bits", v));
            }
            let (lui, ori) = pair(v as u32);
            Ok(vec![lui, ori])
        }
        Operand::Ident(label) => {
            if let Some(seg_addr) = symtab.get(label) {
                // The relocation is attached to the LUI; the linker
                // patches the pair as one unit.
                let (mut lui, ori) = pair(seg_addr.offset);
                lui.reloc_req = Some((PatchKind::LoadImm, seg_addr.segment.clone()));
                Ok(vec![lui, ori])
            } else {
                let (mut lui, ori) = pair(0);
                lui.import_req = Some((PatchKind::LoadImm, label.clone()));
                Ok(vec![lui, ori])
            }
        }
        _ => err("invalid LI value"),
    }
}

// --- operand helpers ---

fn want_reg(arg: &Operand) -> EncResult<u8> {
    match arg {
        Operand::Reg(n) => Ok(*n),
        other => err(format!("expected a register, got {:?}", other)),
    }
}

/// Is this operand a number or a `.define`d constant (as opposed to a
/// label reference)?
fn constant_like(arg: &Operand, defines: &HashMap<String, i64>) -> bool {
    match arg {
        Operand::Num(_) => true,
        Operand::Ident(name) => defines.contains_key(name),
        _ => false,
    }
}

fn const_value(arg: &Operand, defines: &HashMap<String, i64>) -> EncResult<i64> {
    match arg {
        Operand::Num(n) => Ok(*n),
        Operand::Ident(name) => defines
            .get(name)
            .copied()
            .ok_or_else(|| EncodeError(format!("undefined constant '{}'", name))),
        other => err(format!("expected a numeric operand, got {:?}", other)),
    }
}

/// A constant that must fit `nbits` either as signed two's complement
/// or as unsigned; returned masked to the field width.
fn const_bits(arg: &Operand, defines: &HashMap<String, i64>, nbits: u32) -> EncResult<u32> {
    let v = const_value(arg, defines)?;
    if fits_signed(v, nbits) || fits_unsigned(v, nbits) {
        let mask = if nbits == 32 { !0u32 } else { (1u32 << nbits) - 1 };
        Ok((v as u32) & mask)
    } else {
        err(format!("constant {} won't fit in {} bits", v, nbits))
    }
}

fn memref(arg: &Operand, defines: &HashMap<String, i64>) -> EncResult<(u8, u32)> {
    match arg {
        Operand::Mem { base, offset } => {
            let v = match offset {
                MemOffset::Num(n) => *n,
                MemOffset::Name(name) => defines
                    .get(name)
                    .copied()
                    .ok_or_else(|| EncodeError(format!("undefined constant '{}'", name)))?,
            };
            if fits_signed(v, 16) || fits_unsigned(v, 16) {
                Ok((*base, (v as u32) & 0xFFFF))
            } else {
                err(format!("memory offset {} won't fit in 16 bits", v))
            }
        }
        other => err(format!("expected a memory operand offset(reg), got {:?}", other)),
    }
}

/// Relative branch offset in words. A number is used as-is; a label
/// must live in the same segment and be word aligned, and the offset
/// is measured from the branch instruction itself.
fn branch_offset(
    arg: &Operand,
    nbits: u32,
    addr: &SegAddr,
    symtab: &HashMap<String, SegAddr>,
) -> EncResult<u32> {
    let off: i64 = match arg {
        Operand::Num(n) => *n,
        Operand::Ident(label) => {
            let target = symtab
                .get(label)
                .ok_or_else(|| EncodeError(format!("undefined label '{}'", label)))?;
            if target.segment != addr.segment {
                return err(format!("branch target '{}' is in a different segment", label));
            }
            if target.offset % 4 != 0 {
                return err(format!("branch target '{}' is not word aligned", label));
            }
            (target.offset as i64 - addr.offset as i64) / 4
        }
        other => return err(format!("invalid branch target {:?}", other)),
    };
    if !fits_signed(off, nbits) {
        return err(format!("branch offset {} too large for {} bits", off, nbits));
    }
    let mask = (1u32 << nbits) - 1;
    Ok((off as u32) & mask)
}
