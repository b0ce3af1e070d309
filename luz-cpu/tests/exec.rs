//! Instruction-level semantics, driven through assembled source.

use luz_asm::{Assembler, Linker};
use luz_cpu::{LuzSim, SimConfig};
use luz_isa::ExceptionCause;

/// Assemble, link and run a program to HALT.
fn run(src: &str) -> LuzSim {
    let obj = Assembler::new().assemble(src, "test.lasm").unwrap();
    let exe = Linker::new().link(vec![obj]).unwrap();
    let mut sim = LuzSim::new(SimConfig {
        entry: exe.entry,
        ..SimConfig::default()
    });
    for seg in &exe.segments {
        sim.load_segment(seg.base, &seg.data);
    }
    sim.run();
    sim
}

const PROLOGUE: &str = ".segment code\n.global asm_main\nasm_main:\n";

fn run_main(body: &str) -> LuzSim {
    run(&format!("{}{}\nhalt\n", PROLOGUE, body))
}

#[test]
fn add_and_sub() {
    let sim = run_main(
        r#"
        addi $r6, $r0, 25
        addi $r4, $r0, 400
        add $r8, $r6, $r4
        sub $r9, $r6, $r4
    "#,
    );
    assert_eq!(sim.reg(8), 425);
    // 25 - 400 wraps modulo 2^32
    assert_eq!(sim.reg(9), (-375i32) as u32);
}

#[test]
fn addi_immediate_is_zero_extended() {
    let sim = run_main(
        r#"
        addi $r1, $r0, 100
        addi $r1, $r1, -4
    "#,
    );
    // -4 encodes as 0xFFFC and adds as an unsigned bit pattern
    assert_eq!(sim.reg(1), 100 + 0xFFFC);
}

#[test]
fn subi_subtracts() {
    let sim = run_main(
        r#"
        addi $r1, $r0, 100
        subi $r1, $r1, 4
    "#,
    );
    assert_eq!(sim.reg(1), 96);
}

#[test]
fn logical_operations() {
    let sim = run_main(
        r#"
        li $r1, 0xFF00FF00
        li $r2, 0x0F0F0F0F
        and $r3, $r1, $r2
        or $r4, $r1, $r2
        xor $r5, $r1, $r2
        nor $r6, $r1, $r2
    "#,
    );
    assert_eq!(sim.reg(3), 0x0F000F00);
    assert_eq!(sim.reg(4), 0xFF0FFF0F);
    assert_eq!(sim.reg(5), 0xF00FF00F);
    assert_eq!(sim.reg(6), !0xFF0FFF0Fu32);
}

#[test]
fn logical_immediates_zero_extend() {
    let sim = run_main(
        r#"
        li $r1, 0xFFFF0000
        ori $r2, $r1, 0x1234
        andi $r3, $r1, 0x1234
    "#,
    );
    assert_eq!(sim.reg(2), 0xFFFF1234);
    assert_eq!(sim.reg(3), 0);
}

#[test]
fn shifts_mask_the_amount() {
    let sim = run_main(
        r#"
        addi $r1, $r0, 1
        slli $r2, $r1, 4
        addi $r3, $r0, 33
        sll $r4, $r1, $r3
        li $r5, 0x80000000
        srli $r6, $r5, 31
        srl $r7, $r5, $r3
    "#,
    );
    assert_eq!(sim.reg(2), 16);
    // 33 & 0x1F == 1
    assert_eq!(sim.reg(4), 2);
    assert_eq!(sim.reg(6), 1);
    assert_eq!(sim.reg(7), 0x4000_0000);
}

#[test]
fn srl_is_logical() {
    let sim = run_main(
        r#"
        li $r1, 0xFFFFFFFF
        srli $r2, $r1, 1
    "#,
    );
    assert_eq!(sim.reg(2), 0x7FFF_FFFF);
}

#[test]
fn lui_and_lli() {
    let sim = run_main(
        r#"
        lui $r1, 0x1234
        lli $r2, 0x5678
    "#,
    );
    assert_eq!(sim.reg(1), 0x1234_0000);
    assert_eq!(sim.reg(2), 0x5678);
}

#[test]
fn mul_signed_full_product() {
    let sim = run_main(
        r#"
        li $r2, -3
        addi $r3, $r0, 7
        mul $r4, $r2, $r3
    "#,
    );
    assert_eq!(sim.reg(4), (-21i32) as u32);
    // high half of the sign-extended 64-bit product
    assert_eq!(sim.reg(5), 0xFFFF_FFFF);
}

#[test]
fn divu_quotient_and_remainder() {
    let sim = run_main(
        r#"
        addi $r2, $r0, 7
        addi $r3, $r0, 2
        divu $r4, $r2, $r3
    "#,
    );
    assert_eq!(sim.reg(4), 3);
    assert_eq!(sim.reg(5), 1);
}

#[test]
fn div_truncates_toward_zero() {
    let sim = run_main(
        r#"
        li $r2, -7
        addi $r3, $r0, 2
        div $r4, $r2, $r3
    "#,
    );
    assert_eq!(sim.reg(4), (-3i32) as u32);
    assert_eq!(sim.reg(5), (-1i32) as u32);
}

#[test]
fn divide_by_zero_faults() {
    let sim = run_main(
        r#"
        addi $r2, $r0, 7
        div $r4, $r2, $r0
    "#,
    );
    assert!(sim.halted());
    assert_eq!(sim.last_cause(), Some(ExceptionCause::DivideByZero));
}

#[test]
fn load_sign_and_zero_extension() {
    let sim = run(
        r#"
            .segment data
        bytes:
            .byte 0xFF, 0x7F
        half:
            .word 0x8000
            .segment code
            .global asm_main
        asm_main:
            li $t0, bytes
            lb $r1, 0($t0)
            lbu $r2, 0($t0)
            lb $r3, 1($t0)
            li $t1, half
            lh $r4, 0($t1)
            lhu $r5, 0($t1)
            halt
    "#,
    );
    assert_eq!(sim.reg(1), 0xFFFF_FFFF);
    assert_eq!(sim.reg(2), 0x0000_00FF);
    assert_eq!(sim.reg(3), 0x0000_007F);
    assert_eq!(sim.reg(4), 0xFFFF_8000);
    assert_eq!(sim.reg(5), 0x0000_8000);
}

#[test]
fn store_load_round_trip() {
    let sim = run(
        r#"
            .segment data
        buf:
            .alloc 16
            .segment code
            .global asm_main
        asm_main:
            li $t0, buf
            li $r1, 0xDEADBEEF
            sw $r1, 0($t0)
            lw $r2, 0($t0)
            sh $r1, 8($t0)
            lhu $r3, 8($t0)
            sb $r1, 12($t0)
            lbu $r4, 12($t0)
            halt
    "#,
    );
    assert_eq!(sim.reg(2), 0xDEAD_BEEF);
    assert_eq!(sim.reg(3), 0xBEEF);
    assert_eq!(sim.reg(4), 0xEF);
}

#[test]
fn negative_load_offset() {
    let sim = run(
        r#"
            .segment data
        a:
            .word 11
        b:
            .word 22
            .segment code
            .global asm_main
        asm_main:
            li $t0, b
            lw $r1, -4($t0)
            halt
    "#,
    );
    assert_eq!(sim.reg(1), 11);
}

#[test]
fn branch_loop_counts() {
    let sim = run_main(
        r#"
        addi $r9, $r0, 5
        addi $r5, $r0, 0
    loop:
        addi $r5, $r5, 1
        bltu $r5, $r9, loop
    "#,
    );
    assert_eq!(sim.reg(5), 5);
}

#[test]
fn beqz_and_bnez() {
    let sim = run_main(
        r#"
        addi $r1, $r0, 1
        beqz $r0, taken
        addi $r8, $r0, 99
    taken:
        bnez $r1, done
        addi $r9, $r0, 99
    done:
    "#,
    );
    assert_eq!(sim.reg(8), 0);
    assert_eq!(sim.reg(9), 0);
}

#[test]
fn unconditional_b_skips() {
    let sim = run_main(
        r#"
        b over
        addi $r8, $r0, 99
    over:
        addi $r9, $r0, 1
    "#,
    );
    assert_eq!(sim.reg(8), 0);
    assert_eq!(sim.reg(9), 1);
}

#[test]
fn jr_jumps_to_register() {
    let sim = run(
        r#"
            .segment code
            .global asm_main
        asm_main:
            li $r1, target
            jr $r1
            addi $r8, $r0, 99
        target:
            halt
    "#,
    );
    assert_eq!(sim.reg(8), 0);
    assert!(sim.halted());
}

#[test]
fn pseudo_move_neg_not() {
    let sim = run_main(
        r#"
        addi $r1, $r0, 5
        move $r2, $r1
        neg $r3, $r1
        not $r4, $r0
    "#,
    );
    assert_eq!(sim.reg(2), 5);
    assert_eq!(sim.reg(3), (-5i32) as u32);
    assert_eq!(sim.reg(4), 0xFFFF_FFFF);
}

#[test]
fn r0_stays_zero_after_every_program() {
    let sim = run_main(
        r#"
        addi $r0, $r0, 1
        li $r0, 0xFFFFFFFF
        not $r0, $r0
    "#,
    );
    assert_eq!(sim.reg(0), 0);
}

#[test]
fn mul_into_r31_drops_high_half() {
    let sim = run_main(
        r#"
        li $r2, 0x10000
        li $r3, 0x10000
        mulu $r31, $r2, $r3
    "#,
    );
    // low half lands in $ra, the high half has nowhere to go
    assert_eq!(sim.reg(31), 0);
}
