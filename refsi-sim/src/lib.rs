//! Simulator facade (component I): interleaved multi-hart stepping over a
//! fixed hart pool, breakpoint-on-pc detection, trap dispatch and barrier
//! rendezvous. The actual instruction semantics live behind [`core::HartCore`].

pub mod core;

use refsi_addr::UnitId;
use refsi_mem::MemoryController;

use crate::core::HartCore;

/// Instructions stepped per hart before round-robin yields to the next.
pub const INTERLEAVE: u32 = 5000;

const HOST_IO_CMD_EXIT: u64 = 1;
const HOST_IO_CMD_PUTSTRING: u64 = 2;
const HOST_IO_CMD_BARRIER: u64 = 3;

/// Installed to intercept traps (and, separately, breakpoint hits) during
/// [`Simulator::run`]. Taken out of the simulator for the duration of the
/// call so it can be handed a `&mut Simulator` without aliasing `self`.
pub trait TrapHandler: Send {
    /// Return `true` if the trap was handled and the hart should resume at
    /// `mepc + instr_len`; `false` aborts the run with `0x80000000 | cause`.
    fn handle_trap(&mut self, sim: &mut Simulator, hart_idx: usize, mem: &mut MemoryController) -> bool;

    fn handle_breakpoint(&mut self, _sim: &mut Simulator, _hart_idx: usize, _mem: &mut MemoryController) {}
}

/// Recognises `CAUSE_MACHINE_ECALL` with `EXIT`/`PUTSTRING`/`BARRIER` in `a7`.
pub struct DefaultTrapHandler;

impl TrapHandler for DefaultTrapHandler {
    fn handle_trap(&mut self, sim: &mut Simulator, hart_idx: usize, mem: &mut MemoryController) -> bool {
        if sim.harts[hart_idx].mcause() != core::CAUSE_MACHINE_ECALL {
            return false;
        }
        let opc = sim.harts[hart_idx].reg(17); // a7
        let val = sim.harts[hart_idx].reg(10); // a0
        match opc {
            HOST_IO_CMD_EXIT => {
                sim.set_exited(hart_idx, val as i64);
                true
            }
            HOST_IO_CMD_PUTSTRING => {
                sim.mmio_print(mem, hart_idx, val);
                true
            }
            HOST_IO_CMD_BARRIER => {
                sim.handle_barrier(hart_idx, val);
                true
            }
            _ => false,
        }
    }
}

pub struct Simulator {
    harts: Vec<Box<dyn HartCore>>,
    running: Vec<bool>,
    max_active: usize,
    exited: bool,
    exit_code: i64,
    bp_addr: Option<u64>,
    trap_handler: Option<Box<dyn TrapHandler>>,
    barrier_link: Vec<Option<u64>>,
    max_phys_bits: u32,
    pre_run: Option<Box<dyn FnMut(&mut Simulator) + Send>>,
}

impl Simulator {
    pub fn new(harts: Vec<Box<dyn HartCore>>) -> Simulator {
        let n = harts.len();
        Simulator {
            harts,
            running: vec![false; n],
            max_active: n,
            exited: false,
            exit_code: 0,
            bp_addr: None,
            trap_handler: None,
            barrier_link: vec![None; n],
            max_phys_bits: 34,
            pre_run: None,
        }
    }

    /// Install a hook run once at the top of [`Simulator::run`], before any
    /// hart is stepped — e.g. to flip on profiler state or step to a kernel
    /// entry point under debugger control.
    pub fn set_pre_run_callback(&mut self, cb: Option<Box<dyn FnMut(&mut Simulator) + Send>>) {
        self.pre_run = cb;
    }

    pub fn num_harts(&self) -> usize {
        self.harts.len()
    }

    pub fn hart(&self, idx: usize) -> &dyn HartCore {
        self.harts[idx].as_ref()
    }

    pub fn hart_mut(&mut self, idx: usize) -> &mut dyn HartCore {
        self.harts[idx].as_mut()
    }

    pub fn set_max_active_harts(&mut self, n: usize) {
        self.max_active = n.min(self.harts.len());
    }

    pub fn set_breakpoint(&mut self, addr: Option<u64>) {
        self.bp_addr = addr;
    }

    pub fn set_trap_handler(&mut self, handler: Option<Box<dyn TrapHandler>>) {
        self.trap_handler = handler;
    }

    pub fn exit_code(&self) -> i64 {
        self.exit_code
    }

    pub fn is_hart_running(&self, idx: usize) -> bool {
        self.running[idx]
    }

    /// `code != 0` aborts every hart; `code == 0` retires only `hart_idx`,
    /// raising the exit flag once every hart has retired.
    pub fn set_exited(&mut self, hart_idx: usize, code: i64) {
        if code != 0 {
            for r in self.running.iter_mut() {
                *r = false;
            }
            self.exit_code = code;
            self.exited = true;
        } else {
            self.running[hart_idx] = false;
            if self.running.iter().all(|&r| !r) {
                self.exited = true;
            }
        }
    }

    /// Records `hart_idx`'s return-address PC and retires it from the
    /// running set; once every hart has checked in, verifies they all
    /// agreed on `link_addr` (mismatch aborts with `-1`) and re-arms all
    /// harts for the next round.
    pub fn handle_barrier(&mut self, hart_idx: usize, link_addr: u64) {
        self.barrier_link[hart_idx] = Some(link_addr);
        self.running[hart_idx] = false;
        if self.running.iter().all(|&r| !r) {
            let first = self.barrier_link[0];
            if self.barrier_link.iter().any(|&l| l != first) {
                self.set_exited(hart_idx, -1);
                return;
            }
            for l in self.barrier_link.iter_mut() {
                *l = None;
            }
            for r in self.running.iter_mut() {
                *r = true;
            }
        }
    }

    pub fn mmio_load(&mut self, mem: &mut MemoryController, hart_idx: usize, addr: u64, len: u64, out: &mut [u8]) -> bool {
        if addr >> self.max_phys_bits != 0 {
            return false;
        }
        mem.load(addr, len, out, UnitId::AccHart(hart_idx as u16))
    }

    pub fn mmio_store(&mut self, mem: &mut MemoryController, hart_idx: usize, addr: u64, len: u64, data: &[u8]) -> bool {
        if addr >> self.max_phys_bits != 0 {
            return false;
        }
        mem.store(addr, len, data, UnitId::AccHart(hart_idx as u16))
    }

    /// Fetch a NUL-terminated string via 8-byte polled loads and print it.
    pub fn mmio_print(&mut self, mem: &mut MemoryController, hart_idx: usize, addr: u64) {
        let unit = UnitId::AccHart(hart_idx as u16);
        let mut out = Vec::new();
        let mut cur = addr;
        'outer: loop {
            let mut buf = [0u8; 8];
            if !mem.load(cur, 8, &mut buf, unit) {
                break;
            }
            for b in buf {
                if b == 0 {
                    break 'outer;
                }
                out.push(b);
            }
            cur += 8;
        }
        print!("{}", String::from_utf8_lossy(&out));
    }

    fn dispatch_trap(&mut self, idx: usize, mem: &mut MemoryController) {
        let cause = self.harts[idx].mcause();
        let mut handler = self.trap_handler.take();
        let recovered = match handler.as_mut() {
            Some(h) => h.handle_trap(self, idx, mem),
            None => false,
        };
        self.trap_handler = handler;

        if recovered {
            let mepc = self.harts[idx].mepc();
            let len = self.harts[idx].instr_len_at(mem, mepc);
            self.harts[idx].set_pc(mepc + len);
            self.harts[idx].clear_trap();
        } else {
            self.set_exited(idx, (0x8000_0000u64 | cause) as i64);
        }
    }

    fn dispatch_breakpoint(&mut self, idx: usize, mem: &mut MemoryController) {
        let mut handler = self.trap_handler.take();
        if let Some(h) = handler.as_mut() {
            h.handle_breakpoint(self, idx, mem);
        }
        self.trap_handler = handler;
    }

    /// Mark the first `get_hart_number()` harts running (all of them,
    /// bounded by `max_active`), then round-robin step until no hart is
    /// running or the exit flag is set.
    pub fn run(&mut self, mem: &mut MemoryController) {
        self.exited = false;
        self.exit_code = 0;
        let n = self.max_active;
        for (i, r) in self.running.iter_mut().enumerate() {
            *r = i < n;
        }

        if self.harts.is_empty() {
            self.exited = true;
            return;
        }

        if let Some(mut cb) = self.pre_run.take() {
            cb(self);
            self.pre_run = Some(cb);
        }

        let mut current = 0usize;
        let mut scanned_without_progress = 0usize;
        while !self.exited && self.running.iter().any(|&r| r) {
            if !self.running[current] {
                current = (current + 1) % self.harts.len();
                scanned_without_progress += 1;
                if scanned_without_progress > self.harts.len() {
                    break;
                }
                continue;
            }
            scanned_without_progress = 0;

            for _ in 0..INTERLEAVE {
                if !self.running[current] || self.exited {
                    break;
                }
                self.harts[current].step_one(mem, UnitId::AccHart(current as u16));
                if self.harts[current].mcause() != 0 {
                    self.dispatch_trap(current, mem);
                } else if self.bp_addr == Some(self.harts[current].pc()) {
                    self.dispatch_breakpoint(current, mem);
                }
            }
            self.harts[current].yield_reservation();
            current = (current + 1) % self.harts.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::InterpCore;
    use refsi_mem::RamDevice;

    #[test]
    fn run_stops_when_a_hart_exits_with_zero() {
        // sw x17 (a7) holds HOST_IO_CMD_EXIT via addi, a0=0, then ecall.
        // addi a7,x0,1 ; addi a0,x0,0 ; ecall
        let code: [u32; 3] = [0x0010_0893, 0x0000_0513, 0x0000_0073];
        let mut mem = MemoryController::new();
        mem.add(0, Box::new(RamDevice::new(0x1000))).unwrap();
        for (i, instr) in code.iter().enumerate() {
            mem.store((i * 4) as u64, 4, &instr.to_le_bytes(), UnitId::External);
        }

        let mut sim = Simulator::new(vec![Box::new(InterpCore::new())]);
        sim.set_trap_handler(Some(Box::new(DefaultTrapHandler)));
        sim.run(&mut mem);
        assert_eq!(sim.exit_code(), 0);
        assert!(!sim.is_hart_running(0));
    }

    #[test]
    fn breakpoint_at_pc_invokes_handler() {
        struct Flag(std::sync::Arc<std::sync::atomic::AtomicBool>);
        impl TrapHandler for Flag {
            fn handle_trap(&mut self, _s: &mut Simulator, _h: usize, _m: &mut MemoryController) -> bool {
                false
            }
            fn handle_breakpoint(&mut self, sim: &mut Simulator, hart_idx: usize, _mem: &mut MemoryController) {
                self.0.store(true, std::sync::atomic::Ordering::SeqCst);
                sim.set_exited(hart_idx, 0);
            }
        }

        let code: [u32; 1] = [0x0000_0013]; // nop
        let mut mem = MemoryController::new();
        mem.add(0, Box::new(RamDevice::new(0x1000))).unwrap();
        mem.store(0, 4, &code[0].to_le_bytes(), UnitId::External);

        let hit = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mut sim = Simulator::new(vec![Box::new(InterpCore::new())]);
        // The hart lands here after executing the nop at address 0.
        sim.set_breakpoint(Some(4));
        sim.set_trap_handler(Some(Box::new(Flag(hit.clone()))));
        sim.run(&mut mem);
        assert!(hit.load(std::sync::atomic::Ordering::SeqCst));
    }
}
