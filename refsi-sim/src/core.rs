//! The `HartCore` seam trait and an in-tree reference implementation.
//!
//! `refsi-sim`'s facade only steps and inspects harts through this trait;
//! it never assumes a particular ISA simulator. `InterpCore` below is a
//! minimal RV64I(+M) interpreter, enough to run the kernels in the
//! end-to-end scenarios this repo tests against — it is not a claim of
//! ISA completeness.

use refsi_addr::UnitId;
use refsi_mem::MemoryController;

pub const CAUSE_MACHINE_ECALL: u64 = 11;
pub const CAUSE_ILLEGAL_INSTRUCTION: u64 = 2;
pub const CAUSE_LOAD_ACCESS: u64 = 5;
pub const CAUSE_STORE_ACCESS: u64 = 7;

/// Seam standing in for a full RISC-V ISA simulator. Implementors own their
/// own register file, CSRs and trap state; `refsi-sim`'s facade drives them
/// through this interface only.
pub trait HartCore: Send {
    fn pc(&self) -> u64;
    fn set_pc(&mut self, pc: u64);
    fn reg(&self, idx: usize) -> u64;
    fn set_reg(&mut self, idx: usize, val: u64);

    fn mcause(&self) -> u64;
    fn mepc(&self) -> u64;
    fn mtval(&self) -> u64;
    /// Clear `mcause`/`mtval`/`mtval2`/`mtinst`/`mepc` after a recovered trap.
    fn clear_trap(&mut self);

    fn read_csr(&self, addr: u16) -> Option<u64>;
    fn write_csr(&mut self, addr: u16, val: u64) -> bool;

    /// Drop any outstanding load-reservation (LR/SC) when yielding the hart.
    fn yield_reservation(&mut self);

    /// Execute exactly one instruction against `mem`. Faults are recorded
    /// into `mcause`/`mepc`/`mtval` rather than returned as an error.
    fn step_one(&mut self, mem: &mut MemoryController, unit: UnitId);

    /// Length in bytes of the instruction at `addr`, or `0` if the fetch
    /// itself faults (used to recover `pc` after a trap handler runs).
    fn instr_len_at(&self, mem: &mut MemoryController, addr: u64) -> u64;
}

const NUM_REGS: usize = 32;

/// A minimal RV64I interpreter with the `M` extension's `mul`/`div`/`rem`
/// family, enough integer arithmetic, branches, loads/stores, `jalr` and
/// `ecall` to run the kernels this repo's tests exercise.
pub struct InterpCore {
    regs: [u64; NUM_REGS],
    pc: u64,
    mcause: u64,
    mepc: u64,
    mtval: u64,
    reservation: Option<u64>,
}

impl InterpCore {
    pub fn new() -> InterpCore {
        InterpCore {
            regs: [0; NUM_REGS],
            pc: 0,
            mcause: 0,
            mepc: 0,
            mtval: 0,
            reservation: None,
        }
    }

    fn fetch(&self, mem: &mut MemoryController, unit: UnitId, addr: u64) -> Option<u32> {
        let mut buf = [0u8; 4];
        if mem.load(addr, 4, &mut buf, unit) {
            Some(u32::from_le_bytes(buf))
        } else {
            None
        }
    }

    fn fault(&mut self, cause: u64, addr: u64) {
        self.mcause = cause;
        self.mepc = self.pc;
        self.mtval = addr;
    }
}

impl Default for InterpCore {
    fn default() -> Self {
        InterpCore::new()
    }
}

fn sign_extend(val: u64, bits: u32) -> u64 {
    let shift = 64 - bits;
    ((val << shift) as i64 >> shift) as u64
}

struct Decoded {
    opcode: u32,
    rd: usize,
    funct3: u32,
    rs1: usize,
    rs2: usize,
    funct7: u32,
}

fn decode(instr: u32) -> Decoded {
    Decoded {
        opcode: instr & 0x7f,
        rd: ((instr >> 7) & 0x1f) as usize,
        funct3: (instr >> 12) & 0x7,
        rs1: ((instr >> 15) & 0x1f) as usize,
        rs2: ((instr >> 20) & 0x1f) as usize,
        funct7: (instr >> 25) & 0x7f,
    }
}

fn imm_i(instr: u32) -> u64 {
    sign_extend((instr >> 20) as u64, 12)
}

fn imm_s(instr: u32) -> u64 {
    let v = ((instr >> 7) & 0x1f) | (((instr >> 25) & 0x7f) << 5);
    sign_extend(v as u64, 12)
}

fn imm_b(instr: u32) -> u64 {
    let v = (((instr >> 8) & 0xf) << 1)
        | (((instr >> 25) & 0x3f) << 5)
        | (((instr >> 7) & 0x1) << 11)
        | (((instr >> 31) & 0x1) << 12);
    sign_extend(v as u64, 13)
}

fn imm_u(instr: u32) -> u64 {
    sign_extend((instr & 0xffff_f000) as u64, 32)
}

fn imm_j(instr: u32) -> u64 {
    let v = (((instr >> 21) & 0x3ff) << 1)
        | (((instr >> 20) & 0x1) << 11)
        | (((instr >> 12) & 0xff) << 12)
        | (((instr >> 31) & 0x1) << 20);
    sign_extend(v as u64, 21)
}

impl HartCore for InterpCore {
    fn pc(&self) -> u64 {
        self.pc
    }

    fn set_pc(&mut self, pc: u64) {
        self.pc = pc;
    }

    fn reg(&self, idx: usize) -> u64 {
        if idx == 0 {
            0
        } else {
            self.regs[idx]
        }
    }

    fn set_reg(&mut self, idx: usize, val: u64) {
        if idx != 0 {
            self.regs[idx] = val;
        }
    }

    fn mcause(&self) -> u64 {
        self.mcause
    }

    fn mepc(&self) -> u64 {
        self.mepc
    }

    fn mtval(&self) -> u64 {
        self.mtval
    }

    fn clear_trap(&mut self) {
        self.mcause = 0;
        self.mtval = 0;
        self.mepc = 0;
    }

    fn read_csr(&self, addr: u16) -> Option<u64> {
        match addr {
            0x342 => Some(self.mcause),
            0x341 => Some(self.mepc),
            0x343 => Some(self.mtval),
            _ => None,
        }
    }

    fn write_csr(&mut self, addr: u16, val: u64) -> bool {
        match addr {
            0x342 => {
                self.mcause = val;
                true
            }
            0x341 => {
                self.mepc = val;
                true
            }
            0x343 => {
                self.mtval = val;
                true
            }
            _ => false,
        }
    }

    fn yield_reservation(&mut self) {
        self.reservation = None;
    }

    fn step_one(&mut self, mem: &mut MemoryController, unit: UnitId) {
        let instr = match self.fetch(mem, unit, self.pc) {
            Some(i) => i,
            None => {
                self.fault(CAUSE_LOAD_ACCESS, self.pc);
                return;
            }
        };
        let d = decode(instr);
        let mut next_pc = self.pc.wrapping_add(4);

        macro_rules! load_and_store_fault {
            ($ok:expr, $addr:expr, $cause:expr) => {
                if !$ok {
                    self.fault($cause, $addr);
                    return;
                }
            };
        }

        match d.opcode {
            0x37 => self.set_reg(d.rd, imm_u(instr)), // LUI
            0x17 => self.set_reg(d.rd, self.pc.wrapping_add(imm_u(instr))), // AUIPC
            0x6f => {
                // JAL
                self.set_reg(d.rd, next_pc);
                next_pc = self.pc.wrapping_add(imm_j(instr));
            }
            0x67 => {
                // JALR
                let target = (self.reg(d.rs1).wrapping_add(imm_i(instr))) & !1u64;
                self.set_reg(d.rd, next_pc);
                next_pc = target;
            }
            0x63 => {
                // branches
                let a = self.reg(d.rs1);
                let b = self.reg(d.rs2);
                let taken = match d.funct3 {
                    0x0 => a == b,
                    0x1 => a != b,
                    0x4 => (a as i64) < (b as i64),
                    0x5 => (a as i64) >= (b as i64),
                    0x6 => a < b,
                    0x7 => a >= b,
                    _ => false,
                };
                if taken {
                    next_pc = self.pc.wrapping_add(imm_b(instr));
                }
            }
            0x03 => {
                // loads
                let addr = self.reg(d.rs1).wrapping_add(imm_i(instr));
                let mut buf = [0u8; 8];
                let (len, signed): (usize, bool) = match d.funct3 {
                    0x0 => (1, true),
                    0x1 => (2, true),
                    0x2 => (4, true),
                    0x3 => (8, false),
                    0x4 => (1, false),
                    0x5 => (2, false),
                    0x6 => (4, false),
                    _ => {
                        self.fault(CAUSE_ILLEGAL_INSTRUCTION, self.pc);
                        return;
                    }
                };
                load_and_store_fault!(mem.load(addr, len as u64, &mut buf[..len], unit), addr, CAUSE_LOAD_ACCESS);
                let mut val = u64::from_le_bytes(buf);
                if signed && len < 8 {
                    val = sign_extend(val, (len * 8) as u32);
                }
                self.set_reg(d.rd, val);
            }
            0x23 => {
                // stores
                let addr = self.reg(d.rs1).wrapping_add(imm_s(instr));
                let len = match d.funct3 {
                    0x0 => 1,
                    0x1 => 2,
                    0x2 => 4,
                    0x3 => 8,
                    _ => {
                        self.fault(CAUSE_ILLEGAL_INSTRUCTION, self.pc);
                        return;
                    }
                };
                let bytes = self.reg(d.rs2).to_le_bytes();
                load_and_store_fault!(mem.store(addr, len, &bytes[..len as usize], unit), addr, CAUSE_STORE_ACCESS);
            }
            0x13 => {
                // OP-IMM
                let a = self.reg(d.rs1);
                let imm = imm_i(instr);
                let shamt = (imm & 0x3f) as u32;
                let val = match d.funct3 {
                    0x0 => a.wrapping_add(imm),
                    0x2 => (((a as i64) < (imm as i64)) as u64),
                    0x3 => ((a < imm) as u64),
                    0x4 => a ^ imm,
                    0x6 => a | imm,
                    0x7 => a & imm,
                    0x1 => a << shamt,
                    0x5 => {
                        if (instr >> 30) & 1 == 1 {
                            ((a as i64) >> shamt) as u64
                        } else {
                            a >> shamt
                        }
                    }
                    _ => unreachable!(),
                };
                self.set_reg(d.rd, val);
            }
            0x33 => {
                // OP
                let a = self.reg(d.rs1);
                let b = self.reg(d.rs2);
                let val = match (d.funct7, d.funct3) {
                    (0x00, 0x0) => a.wrapping_add(b),
                    (0x20, 0x0) => a.wrapping_sub(b),
                    (0x00, 0x1) => a << (b & 0x3f),
                    (0x00, 0x2) => (((a as i64) < (b as i64)) as u64),
                    (0x00, 0x3) => ((a < b) as u64),
                    (0x00, 0x4) => a ^ b,
                    (0x00, 0x5) => a >> (b & 0x3f),
                    (0x20, 0x5) => ((a as i64) >> (b & 0x3f)) as u64,
                    (0x00, 0x6) => a | b,
                    (0x00, 0x7) => a & b,
                    (0x01, 0x0) => (a as i64).wrapping_mul(b as i64) as u64, // MUL
                    (0x01, 0x4) => {
                        if b == 0 {
                            u64::MAX
                        } else {
                            ((a as i64).wrapping_div(b as i64)) as u64
                        }
                    } // DIV
                    (0x01, 0x5) => {
                        if b == 0 {
                            u64::MAX
                        } else {
                            a / b
                        }
                    } // DIVU
                    (0x01, 0x6) => {
                        if b == 0 {
                            a
                        } else {
                            ((a as i64).wrapping_rem(b as i64)) as u64
                        }
                    } // REM
                    (0x01, 0x7) => {
                        if b == 0 {
                            a
                        } else {
                            a % b
                        }
                    } // REMU
                    _ => {
                        self.fault(CAUSE_ILLEGAL_INSTRUCTION, self.pc);
                        return;
                    }
                };
                self.set_reg(d.rd, val);
            }
            0x73 => {
                // SYSTEM: only ECALL is modelled
                if instr == 0x0000_0073 {
                    self.fault(CAUSE_MACHINE_ECALL, 0);
                    return;
                }
            }
            _ => {
                self.fault(CAUSE_ILLEGAL_INSTRUCTION, self.pc);
                return;
            }
        }

        self.pc = next_pc;
    }

    fn instr_len_at(&self, mem: &mut MemoryController, addr: u64) -> u64 {
        let mut buf = [0u8; 4];
        if mem.load(addr, 4, &mut buf, UnitId::Any) {
            4
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refsi_mem::{MemoryDevice, RamDevice};

    fn mem_with_code(code: &[u32]) -> MemoryController {
        let mut ctl = MemoryController::new();
        ctl.add(0, Box::new(RamDevice::new(0x1000))).unwrap();
        for (i, instr) in code.iter().enumerate() {
            ctl.store((i * 4) as u64, 4, &instr.to_le_bytes(), UnitId::External);
        }
        ctl
    }

    #[test]
    fn addi_advances_register_and_pc() {
        // addi x1, x0, 5
        let mut mem = mem_with_code(&[0x0050_0093]);
        let mut core = InterpCore::new();
        core.step_one(&mut mem, UnitId::AccHart(0));
        assert_eq!(core.reg(1), 5);
        assert_eq!(core.pc(), 4);
    }

    #[test]
    fn ecall_faults_with_machine_ecall_cause() {
        let mut mem = mem_with_code(&[0x0000_0073]);
        let mut core = InterpCore::new();
        core.step_one(&mut mem, UnitId::AccHart(0));
        assert_eq!(core.mcause(), CAUSE_MACHINE_ECALL);
        assert_eq!(core.mepc(), 0);
    }

    #[test]
    fn store_then_load_round_trips() {
        // sw x1, 0(x0) ; lw x2, 0(x0)
        let mut mem = mem_with_code(&[0x0010_2023, 0x0000_2103]);
        let mut core = InterpCore::new();
        core.set_reg(1, 0xdead_beef);
        core.step_one(&mut mem, UnitId::AccHart(0));
        core.step_one(&mut mem, UnitId::AccHart(0));
        assert_eq!(core.reg(2) as u32, 0xdead_beef);
    }
}
