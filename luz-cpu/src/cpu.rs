//! The Luz CPU interpreter.
//!
//! A single-stepped fetch/decode/execute loop over the shared ISA
//! tables. Between steps all architectural state is stable and can be
//! inspected through the accessors, which is what the interactive
//! debugger builds on.

use log::debug;

use luz_isa::{
    register_alias, sign_extend, ExceptionCause, Instruction, Op, ADDR_DEBUG_QUEUE, NUM_REGS,
    REG_RA, USER_MEMORY_START,
};

use crate::memory::{MemError, Memory};
use crate::peripheral::{CoreRegisters, DebugQueue, CORE_REGS_END};

/// Simulator construction parameters.
#[derive(Debug, Clone, Copy)]
pub struct SimConfig {
    /// Initial PC after reset.
    pub entry: u32,
    /// Address whose word stores feed the debug queue; None disables
    /// the hook and lets such stores hit memory.
    pub debug_queue_addr: Option<u32>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            entry: USER_MEMORY_START,
            debug_queue_addr: Some(ADDR_DEBUG_QUEUE),
        }
    }
}

pub struct LuzSim {
    gpr: [u32; NUM_REGS],
    pc: u32,
    halted: bool,
    faulted: bool,
    in_exception: bool,
    last_cause: Option<ExceptionCause>,
    memory: Memory,
    cregs: CoreRegisters,
    queue: DebugQueue,
    config: SimConfig,
}

impl LuzSim {
    pub fn new(config: SimConfig) -> Self {
        Self {
            gpr: [0; NUM_REGS],
            pc: config.entry,
            halted: false,
            faulted: false,
            in_exception: false,
            last_cause: None,
            memory: Memory::new(),
            cregs: CoreRegisters::new(),
            queue: DebugQueue::new(),
            config,
        }
    }

    /// Place segment bytes into memory. Typically called once per
    /// executable segment before stepping.
    pub fn load_segment(&mut self, base: u32, data: &[u8]) {
        debug!("loading {} bytes at {:#010x}", data.len(), base);
        self.memory.load(base, data);
    }

    /// Reset the architectural state: registers cleared, PC back at
    /// the entry point, halt flag dropped, peripherals reset. Memory
    /// contents are kept.
    pub fn restart(&mut self) {
        self.gpr = [0; NUM_REGS];
        self.pc = self.config.entry;
        self.halted = false;
        self.faulted = false;
        self.in_exception = false;
        self.last_cause = None;
        self.cregs.reset();
        self.queue.clear();
    }

    /// Execute one instruction. Once the halt flag is set, further
    /// steps are no-ops.
    pub fn step(&mut self) {
        if self.halted {
            return;
        }
        if let Err(cause) = self.exec_one() {
            self.enter_exception(cause);
        }
    }

    pub fn step_n(&mut self, n: u64) {
        for _ in 0..n {
            if self.halted {
                break;
            }
            self.step();
        }
    }

    /// Run until HALT (or an unhandled exception).
    pub fn run(&mut self) {
        while !self.halted {
            self.step();
        }
    }

    // --- debug surface ---

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn reg(&self, num: u8) -> u32 {
        self.gpr[num as usize]
    }

    /// Register value by alias name (`$sp`, `$t0`, ...).
    pub fn reg_alias(&self, name: &str) -> Option<u32> {
        luz_isa::parse_register(name).map(|num| self.reg(num))
    }

    /// Cause of the most recent exception, if any.
    pub fn last_cause(&self) -> Option<ExceptionCause> {
        self.last_cause
    }

    /// True when the CPU stopped because of an unhandled exception
    /// rather than a HALT instruction.
    pub fn faulted(&self) -> bool {
        self.faulted
    }

    pub fn debug_queue(&self) -> &[u32] {
        self.queue.items()
    }

    pub fn core_registers(&self) -> &CoreRegisters {
        &self.cregs
    }

    /// Raw byte view of memory, for dumps. Does not go through the
    /// peripherals and never faults.
    pub fn peek8(&self, addr: u32) -> u8 {
        self.memory.peek8(addr)
    }

    /// The instruction word the next step would execute.
    pub fn current_instruction(&self) -> Option<u32> {
        self.memory.fetch(self.pc).ok()
    }

    /// A register-dump line per four registers, honoring the alias
    /// flag.
    pub fn dump_registers(&self, alias: bool) -> String {
        let mut out = String::new();
        for num in 0..NUM_REGS as u8 {
            let name = if alias {
                register_alias(num).to_string()
            } else {
                format!("$r{}", num)
            };
            out.push_str(&format!("{:<5} = 0x{:08X}", name, self.reg(num)));
            out.push_str(if num % 4 == 3 { "\n" } else { "   " });
        }
        out
    }

    // --- execution ---

    fn write_reg(&mut self, num: u8, value: u32) {
        // R0 is hard-wired zero
        if num != 0 {
            self.gpr[num as usize] = value;
        }
    }

    /// Write the low half of a 64-bit result to rd and the high half
    /// to rd+1. With rd = 31 the high half is dropped.
    fn write_pair(&mut self, rd: u8, value: u64) {
        self.write_reg(rd, value as u32);
        if rd != 31 {
            self.write_reg(rd + 1, (value >> 32) as u32);
        }
    }

    fn enter_exception(&mut self, cause: ExceptionCause) {
        debug!("exception {:?} at {:#010x}", cause, self.pc);
        self.last_cause = Some(cause);
        if self.in_exception {
            // fault inside the handler
            self.halted = true;
            self.faulted = true;
            return;
        }
        self.cregs.exception_cause = cause.code();
        // execution resumes after the faulting instruction
        self.cregs.exception_return = self.pc.wrapping_add(4);
        if self.cregs.exception_vector == 0 {
            self.halted = true;
            self.faulted = true;
        } else {
            self.in_exception = true;
            self.pc = self.cregs.exception_vector;
        }
    }

    /// Peripheral-aware load.
    fn load(&mut self, addr: u32, width: u32) -> Result<u32, MemError> {
        if addr <= CORE_REGS_END {
            return self.cregs.read(addr, width);
        }
        if self.config.debug_queue_addr == Some(addr) {
            // the queue is write-only
            return Ok(0);
        }
        self.memory.read(addr, width)
    }

    /// Peripheral-aware store.
    fn store(&mut self, addr: u32, width: u32, value: u32) -> Result<(), MemError> {
        if addr <= CORE_REGS_END {
            return self.cregs.write(addr, width, value);
        }
        if self.config.debug_queue_addr == Some(addr) {
            self.queue.push(value);
            return Ok(());
        }
        self.memory.write(addr, width, value)
    }

    fn exec_one(&mut self) -> Result<(), ExceptionCause> {
        let pc = self.pc;
        let word = self
            .memory
            .fetch(pc)
            .map_err(|_| ExceptionCause::MemoryAccess)?;
        let instr = Instruction::decode(word).ok_or(ExceptionCause::InvalidOpcode)?;

        let rd = instr.rd;
        let rs = self.gpr[instr.rs as usize];
        let rt = self.gpr[instr.rt as usize];
        let rd_val = self.gpr[instr.rd as usize];
        let imm = instr.imm;

        let mut next = pc.wrapping_add(4);

        match instr.op {
            Op::Add => self.write_reg(rd, rs.wrapping_add(rt)),
            Op::Sub => self.write_reg(rd, rs.wrapping_sub(rt)),
            // immediates are unsigned bit patterns for ADDI/SUBI
            Op::Addi => self.write_reg(rd, rs.wrapping_add(imm)),
            Op::Subi => self.write_reg(rd, rs.wrapping_sub(imm)),

            Op::Mulu => self.write_pair(rd, (rs as u64).wrapping_mul(rt as u64)),
            Op::Mul => {
                let prod = (rs as i32 as i64).wrapping_mul(rt as i32 as i64);
                self.write_pair(rd, prod as u64);
            }
            Op::Divu => {
                if rt == 0 {
                    return Err(ExceptionCause::DivideByZero);
                }
                self.write_reg(rd, rs / rt);
                if rd != 31 {
                    self.write_reg(rd + 1, rs % rt);
                }
            }
            Op::Div => {
                if rt == 0 {
                    return Err(ExceptionCause::DivideByZero);
                }
                let (a, b) = (rs as i32, rt as i32);
                self.write_reg(rd, a.wrapping_div(b) as u32);
                if rd != 31 {
                    self.write_reg(rd + 1, a.wrapping_rem(b) as u32);
                }
            }

            Op::Lui => self.write_reg(rd, imm << 16),

            Op::Sll => self.write_reg(rd, rs << (rt & 0x1F)),
            Op::Srl => self.write_reg(rd, rs >> (rt & 0x1F)),
            Op::Slli => self.write_reg(rd, rs << (imm & 0x1F)),
            Op::Srli => self.write_reg(rd, rs >> (imm & 0x1F)),

            Op::And => self.write_reg(rd, rs & rt),
            Op::Or => self.write_reg(rd, rs | rt),
            Op::Nor => self.write_reg(rd, !(rs | rt)),
            Op::Xor => self.write_reg(rd, rs ^ rt),
            Op::Andi => self.write_reg(rd, rs & imm),
            Op::Ori => self.write_reg(rd, rs | imm),

            Op::Lb | Op::Lbu | Op::Lh | Op::Lhu | Op::Lw => {
                let addr = rs.wrapping_add(sign_extend(imm, 16) as u32);
                let width = match instr.op {
                    Op::Lb | Op::Lbu => 1,
                    Op::Lh | Op::Lhu => 2,
                    _ => 4,
                };
                let data = self
                    .load(addr, width)
                    .map_err(|_| ExceptionCause::MemoryAccess)?;
                let value = match instr.op {
                    Op::Lb => sign_extend(data, 8) as u32,
                    Op::Lh => sign_extend(data, 16) as u32,
                    _ => data,
                };
                self.write_reg(rd, value);
            }

            Op::Sb | Op::Sh | Op::Sw => {
                // the rd field carries the base register for stores
                let addr = rd_val.wrapping_add(sign_extend(imm, 16) as u32);
                let (width, mask) = match instr.op {
                    Op::Sb => (1, 0xFF),
                    Op::Sh => (2, 0xFFFF),
                    _ => (4, !0u32),
                };
                self.store(addr, width, rs & mask)
                    .map_err(|_| ExceptionCause::MemoryAccess)?;
            }

            Op::Jr => next = rd_val,
            Op::Call => {
                self.write_reg(REG_RA, pc.wrapping_add(4));
                next = imm.wrapping_mul(4);
            }
            Op::B => {
                next = pc.wrapping_add(sign_extend(imm, 26).wrapping_mul(4) as u32);
            }

            Op::Beq | Op::Bne | Op::Bge | Op::Bgt | Op::Ble | Op::Blt | Op::Bgeu | Op::Bgtu
            | Op::Bleu | Op::Bltu => {
                let (a, b) = (rd_val, rs);
                let (sa, sb) = (a as i32, b as i32);
                let taken = match instr.op {
                    Op::Beq => a == b,
                    Op::Bne => a != b,
                    Op::Bge => sa >= sb,
                    Op::Bgt => sa > sb,
                    Op::Ble => sa <= sb,
                    Op::Blt => sa < sb,
                    Op::Bgeu => a >= b,
                    Op::Bgtu => a > b,
                    Op::Bleu => a <= b,
                    Op::Bltu => a < b,
                    _ => unreachable!(),
                };
                if taken {
                    next = pc.wrapping_add(sign_extend(imm, 16).wrapping_mul(4) as u32);
                }
            }

            Op::Eret => {
                next = self.cregs.exception_return;
                self.in_exception = false;
            }
            Op::Halt => {
                self.halted = true;
                next = pc;
            }
        }

        self.pc = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luz_isa::Instruction;

    fn sim_with_code(words: &[u32]) -> LuzSim {
        let mut sim = LuzSim::new(SimConfig::default());
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        sim.load_segment(USER_MEMORY_START, &bytes);
        sim
    }

    fn word(op: Op, rd: u8, rs: u8, rt: u8, imm: u32) -> u32 {
        Instruction { op, rd, rs, rt, imm }.encode()
    }

    #[test]
    fn pc_advances_by_four() {
        let mut sim = sim_with_code(&[word(Op::Addi, 1, 0, 0, 7), word(Op::Halt, 0, 0, 0, 0)]);
        assert_eq!(sim.pc(), USER_MEMORY_START);
        sim.step();
        assert_eq!(sim.pc(), USER_MEMORY_START + 4);
        assert_eq!(sim.reg(1), 7);
    }

    #[test]
    fn halt_is_stable() {
        let mut sim = sim_with_code(&[word(Op::Halt, 0, 0, 0, 0)]);
        sim.step();
        assert!(sim.halted());
        let pc = sim.pc();
        sim.step();
        sim.step();
        assert_eq!(sim.pc(), pc);
    }

    #[test]
    fn r0_writes_are_discarded() {
        let mut sim = sim_with_code(&[
            word(Op::Addi, 0, 0, 0, 0x1234),
            word(Op::Halt, 0, 0, 0, 0),
        ]);
        sim.run();
        assert_eq!(sim.reg(0), 0);
    }

    #[test]
    fn unaligned_fetch_faults() {
        let mut sim = LuzSim::new(SimConfig {
            entry: USER_MEMORY_START + 2,
            ..SimConfig::default()
        });
        sim.load_segment(USER_MEMORY_START, &[0; 16]);
        sim.step();
        assert!(sim.halted());
        assert_eq!(sim.last_cause(), Some(ExceptionCause::MemoryAccess));
    }

    #[test]
    fn fetch_outside_image_faults() {
        let mut sim = LuzSim::new(SimConfig::default());
        sim.step();
        assert!(sim.halted());
        assert_eq!(sim.last_cause(), Some(ExceptionCause::MemoryAccess));
    }

    #[test]
    fn invalid_opcode_faults() {
        let mut sim = sim_with_code(&[0x1Eu32 << 26]);
        sim.step();
        assert!(sim.halted());
        assert_eq!(sim.last_cause(), Some(ExceptionCause::InvalidOpcode));
    }

    #[test]
    fn exception_vectors_to_handler_and_eret_returns() {
        let handler = USER_MEMORY_START + 0x100;
        let mut sim = sim_with_code(&[
            // div by zero at entry; handler at entry+0x100
            word(Op::Div, 3, 1, 0, 0),
            word(Op::Addi, 9, 0, 0, 1),
            word(Op::Halt, 0, 0, 0, 0),
        ]);
        let handler_code: Vec<u8> = [word(Op::Addi, 8, 0, 0, 42), word(Op::Eret, 0, 0, 0, 0)]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect();
        sim.load_segment(handler, &handler_code);
        sim.cregs.exception_vector = handler;

        sim.run();
        assert!(sim.halted());
        // handler ran, then execution resumed after the DIV
        assert_eq!(sim.reg(8), 42);
        assert_eq!(sim.reg(9), 1);
        assert_eq!(
            sim.core_registers().exception_cause,
            ExceptionCause::DivideByZero.code()
        );
    }

    #[test]
    fn double_fault_halts() {
        let handler = USER_MEMORY_START + 0x100;
        let mut sim = sim_with_code(&[word(Op::Div, 3, 1, 0, 0)]);
        // handler immediately divides by zero again
        let handler_code: Vec<u8> = [word(Op::Div, 3, 1, 0, 0)]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect();
        sim.load_segment(handler, &handler_code);
        sim.cregs.exception_vector = handler;

        sim.run();
        assert!(sim.halted());
    }

    #[test]
    fn restart_clears_state_but_keeps_memory() {
        let mut sim = sim_with_code(&[
            word(Op::Addi, 5, 0, 0, 9),
            word(Op::Halt, 0, 0, 0, 0),
        ]);
        sim.run();
        assert_eq!(sim.reg(5), 9);
        sim.restart();
        assert_eq!(sim.reg(5), 0);
        assert_eq!(sim.pc(), USER_MEMORY_START);
        assert!(!sim.halted());
        sim.run();
        assert_eq!(sim.reg(5), 9);
    }

    #[test]
    fn debug_queue_hook_can_be_disabled() {
        let code = [
            word(Op::Lui, 1, 0, 0, 0x000F), // r1 = 0xF0000
            word(Op::Sw, 1, 5, 0, 0),
            word(Op::Halt, 0, 0, 0, 0),
        ];
        let mut with_hook = sim_with_code(&code);
        with_hook.run();
        assert_eq!(with_hook.debug_queue(), &[0]);

        let mut without = LuzSim::new(SimConfig {
            debug_queue_addr: None,
            ..SimConfig::default()
        });
        let bytes: Vec<u8> = code.iter().flat_map(|w| w.to_le_bytes()).collect();
        without.load_segment(USER_MEMORY_START, &bytes);
        without.run();
        assert!(without.debug_queue().is_empty());
        assert_eq!(without.peek8(0xF0000), 0);
    }
}
