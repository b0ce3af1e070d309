//! Disassembler: instruction words back to canonical mnemonic form.

use luz_isa::{register_alias, sign_extend, Format, Instruction, Op};

fn reg_name(num: u8, alias: bool) -> String {
    if alias {
        register_alias(num).to_string()
    } else {
        format!("$r{}", num)
    }
}

/// Render the instruction word at `addr` as assembly text. Branch and
/// call operands are annotated with the absolute target address.
/// Returns None if the word does not decode to an instruction.
///
/// With `alias` set, registers print by their symbolic names (`$sp`,
/// `$ra`, ...) instead of `$rN`.
pub fn disassemble(word: u32, addr: u32, alias: bool) -> Option<String> {
    let instr = Instruction::decode(word)?;
    let op = instr.op;
    let name = op.mnemonic();
    let r = |num: u8| reg_name(num, alias);

    let text = match op.format() {
        Format::ThreeReg => format!("{} {}, {}, {}", name, r(instr.rd), r(instr.rs), r(instr.rt)),
        Format::TwoRegImm if op.is_load() => {
            let off = sign_extend(instr.imm, 16);
            format!("{} {}, {}({})", name, r(instr.rd), off, r(instr.rs))
        }
        Format::TwoRegImm if op.is_store() => {
            // the rd field holds the base register for stores
            let off = sign_extend(instr.imm, 16);
            format!("{} {}, {}({})", name, r(instr.rs), off, r(instr.rd))
        }
        Format::TwoRegImm if op.is_cond_branch() => {
            let off = sign_extend(instr.imm, 16);
            let target = addr.wrapping_add((off * 4) as u32);
            format!(
                "{} {}, {}, {} [{:#010x}]",
                name,
                r(instr.rd),
                r(instr.rs),
                off,
                target
            )
        }
        Format::TwoRegImm => {
            format!("{} {}, {}, {:#x}", name, r(instr.rd), r(instr.rs), instr.imm)
        }
        Format::RegImm => format!("{} {}, {:#x}", name, r(instr.rd), instr.imm),
        Format::Reg => format!("{} {}", name, r(instr.rd)),
        Format::Imm26 if op == Op::Call => {
            format!("{} {:#x} [{:#010x}]", name, instr.imm, instr.imm * 4)
        }
        Format::Imm26 => {
            let off = sign_extend(instr.imm, 26);
            let target = addr.wrapping_add((off * 4) as u32);
            format!("{} {} [{:#010x}]", name, off, target)
        }
        Format::Implied => name.to_string(),
    };
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use luz_isa::Instruction;

    fn encode(op: Op, rd: u8, rs: u8, rt: u8, imm: u32) -> u32 {
        Instruction { op, rd, rs, rt, imm }.encode()
    }

    #[test]
    fn three_reg() {
        let word = encode(Op::Add, 8, 6, 4, 0);
        assert_eq!(disassemble(word, 0, false).unwrap(), "add $r8, $r6, $r4");
        assert_eq!(disassemble(word, 0, true).unwrap(), "add $t0, $a2, $a0");
    }

    #[test]
    fn immediate_forms() {
        let word = encode(Op::Addi, 5, 0, 0, 25);
        assert_eq!(disassemble(word, 0, false).unwrap(), "addi $r5, $r0, 0x19");

        let word = encode(Op::Lui, 2, 0, 0, 0x1234);
        assert_eq!(disassemble(word, 0, false).unwrap(), "lui $r2, 0x1234");
    }

    #[test]
    fn loads_and_stores() {
        let word = encode(Op::Lw, 1, 29, 0, 8);
        assert_eq!(disassemble(word, 0, true).unwrap(), "lw $at, 8($sp)");
        assert_eq!(disassemble(word, 0, false).unwrap(), "lw $r1, 8($r29)");

        // store: base in rd, value in rs
        let word = encode(Op::Sw, 26, 5, 0, 0xFFFC);
        assert_eq!(disassemble(word, 0, true).unwrap(), "sw $a1, -4($k0)");
    }

    #[test]
    fn branch_annotates_target() {
        let word = encode(Op::Bltu, 5, 9, 0, (-2i32 as u32) & 0xFFFF);
        assert_eq!(
            disassemble(word, 0x0010_0010, false).unwrap(),
            "bltu $r5, $r9, -2 [0x00100008]"
        );
    }

    #[test]
    fn call_annotates_byte_address() {
        let word = encode(Op::Call, 0, 0, 0, 0x0010_0000 / 4);
        assert_eq!(
            disassemble(word, 0, false).unwrap(),
            "call 0x40000 [0x00100000]"
        );
    }

    #[test]
    fn implied_forms() {
        assert_eq!(disassemble(encode(Op::Halt, 0, 0, 0, 0), 0, false).unwrap(), "halt");
        assert_eq!(disassemble(encode(Op::Eret, 0, 0, 0, 0), 0, false).unwrap(), "eret");
    }

    #[test]
    fn garbage_word_is_none() {
        // opcode 0x1E is unused
        assert_eq!(disassemble(0x1Eu32 << 26, 0, false), None);
    }

    #[test]
    fn alias_mode_round_trips_register_names() {
        let word = encode(Op::Jr, 31, 0, 0, 0);
        assert_eq!(disassemble(word, 0, true).unwrap(), "jr $ra");
        assert_eq!(disassemble(word, 0, false).unwrap(), "jr $r31");
    }
}
