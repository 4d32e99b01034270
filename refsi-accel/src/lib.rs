//! Accelerator (component J): ISA configuration, kernel-slice launch,
//! generic kernel launch and cache-sync for a pool of RISC-V harts.

mod error;

use refsi_mem::MemoryController;
use refsi_perf::{HartCounterSource, NUM_PER_HART_COUNTERS};
use refsi_sim::core::{InterpCore, CAUSE_LOAD_ACCESS, CAUSE_MACHINE_ECALL};
use refsi_sim::{DefaultTrapHandler, Simulator, TrapHandler};

pub use error::{AccelError, AccelResult};

/// `CSR_MCYCLE`; per-hart performance counters are mapped at
/// `CSR_MCYCLE + counter_idx`.
const CSR_MCYCLE: u16 = 0xb00;

/// Sentinel return address used by the G-family's generic kernel launch,
/// which otherwise never returns.
pub const GENERIC_KERNEL_SENTINEL: u64 = 0xffff_ffff_00de_fafa;

/// Per-hart inputs to a kernel-slice launch.
#[derive(Debug, Clone, Default)]
pub struct HartStateEntry {
    pub stack_top_addr: u64,
    pub extra_args: Vec<u64>,
}

/// Detects the trap/breakpoint that marks a kernel's entry point returning,
/// and otherwise falls back to the default ecall handling.
struct KernelReturnHandler {
    return_addr: u64,
}

impl TrapHandler for KernelReturnHandler {
    fn handle_trap(&mut self, sim: &mut Simulator, hart_idx: usize, mem: &mut MemoryController) -> bool {
        let core = sim.hart(hart_idx);
        if core.mcause() == CAUSE_LOAD_ACCESS && core.mtval() == self.return_addr {
            sim.set_exited(hart_idx, 0);
            return true;
        }
        if core.mcause() == CAUSE_MACHINE_ECALL {
            return DefaultTrapHandler.handle_trap(sim, hart_idx, mem);
        }
        false
    }

    fn handle_breakpoint(&mut self, sim: &mut Simulator, hart_idx: usize, _mem: &mut MemoryController) {
        sim.set_exited(hart_idx, 0);
    }
}

pub struct Accelerator {
    isa: String,
    vlen: u32,
    elen: u32,
    total_harts: u32,
    sim: Option<Simulator>,
    profiling_enabled: bool,
}

impl Accelerator {
    pub fn new() -> Accelerator {
        Accelerator {
            isa: String::new(),
            vlen: 0,
            elen: 0,
            total_harts: 1,
            sim: None,
            profiling_enabled: false,
        }
    }

    /// Whether the pre-run hook installed by [`Accelerator::create_sim`]
    /// should announce profiler enablement (device layer wires this to
    /// `CA_PROFILE_LEVEL > 2`). `InterpCore` has no profiling data to
    /// actually collect, so the hook only logs.
    pub fn set_profiling_enabled(&mut self, enabled: bool) {
        self.profiling_enabled = enabled;
    }

    pub fn set_isa(&mut self, isa: impl Into<String>) {
        self.isa = isa.into();
    }

    pub fn isa(&self) -> &str {
        &self.isa
    }

    pub fn set_vector_len(&mut self, vlen: u32) {
        self.vlen = vlen;
    }

    pub fn vector_len(&self) -> u32 {
        self.vlen
    }

    pub fn set_vector_elem_len(&mut self, elen: u32) {
        self.elen = elen;
    }

    pub fn vector_elem_len(&self) -> u32 {
        self.elen
    }

    pub fn set_num_harts(&mut self, n: u32) {
        self.total_harts = n;
    }

    pub fn num_harts(&self) -> u32 {
        self.total_harts
    }

    /// Materialise the simulator instance on first use. Each hart is given
    /// a reset initialisation pass; on this crate's reference `InterpCore`,
    /// that pass is inert (no mstatus/paging model), matching the fact that
    /// `InterpCore` doesn't claim ISA completeness.
    pub fn create_sim(&mut self) {
        if self.sim.is_some() {
            return;
        }
        let harts = (0..self.total_harts).map(|_| Box::new(InterpCore::new()) as Box<_>).collect();
        let mut sim = Simulator::new(harts);
        for i in 0..self.total_harts as usize {
            initialize_hart(sim.hart_mut(i));
        }
        if self.profiling_enabled {
            sim.set_pre_run_callback(Some(Box::new(|_sim: &mut Simulator| {
                log::debug!("profiler mode enabled for this run");
            })));
        }
        self.sim = Some(sim);
    }

    pub fn sim(&self) -> Option<&Simulator> {
        self.sim.as_ref()
    }

    pub fn sim_mut(&mut self) -> Option<&mut Simulator> {
        self.sim.as_mut()
    }

    /// Execute the kernel entry point `num_instances` times, distributed
    /// across at most `num_harts` harts per round.
    pub fn run_kernel_slice(
        &mut self,
        mem: &mut MemoryController,
        num_instances: u64,
        entry_point: u64,
        return_addr: u64,
        num_harts: usize,
        hart_data: &[HartStateEntry],
    ) -> AccelResult<()> {
        for entry in hart_data {
            if entry.extra_args.len() > 7 {
                return Err(AccelError::TooManyExtraArgs(entry.extra_args.len()));
            }
        }

        self.create_sim();
        let sim = self.sim.as_mut().expect("just created");
        sim.set_trap_handler(Some(Box::new(KernelReturnHandler { return_addr })));
        sim.set_breakpoint(Some(return_addr));

        let mut next_instance = 0u64;
        let mut result = Ok(());
        while next_instance < num_instances {
            let active = (num_instances - next_instance).min(num_harts as u64) as usize;
            sim.set_max_active_harts(active);
            for h in 0..active {
                let core = sim.hart_mut(h);
                core.set_pc(entry_point);
                core.set_reg(1, return_addr); // ra
                core.set_reg(2, hart_data[h].stack_top_addr); // sp
                core.set_reg(10, next_instance + h as u64); // a0: instance id
                for (i, extra) in hart_data[h].extra_args.iter().enumerate() {
                    core.set_reg(11 + i, *extra); // a1..a7
                }
            }
            sim.run(mem);
            if sim.exit_code() != 0 {
                result = Err(AccelError::KernelAborted(sim.exit_code()));
                break;
            }
            next_instance += active as u64;
        }

        sim.set_breakpoint(None);
        sim.set_trap_handler(None);
        result
    }

    /// Reset the whole hart pool, start every active hart at `entry_point`
    /// with `ra` pointed at the sentinel return address, and run until
    /// exit; the entry point itself owns scheduling work between harts
    /// (G-family has no command processor to distribute instances).
    pub fn run_kernel_generic(
        &mut self,
        mem: &mut MemoryController,
        entry_point: u64,
        num_harts: usize,
    ) -> AccelResult<()> {
        self.sim = None;
        self.create_sim();
        let sim = self.sim.as_mut().expect("just created");
        sim.set_trap_handler(Some(Box::new(KernelReturnHandler {
            return_addr: GENERIC_KERNEL_SENTINEL,
        })));
        sim.set_breakpoint(Some(GENERIC_KERNEL_SENTINEL));
        sim.set_max_active_harts(num_harts);
        for h in 0..num_harts {
            let core = sim.hart_mut(h);
            core.set_pc(entry_point);
            core.set_reg(1, GENERIC_KERNEL_SENTINEL); // ra
        }
        sim.run(mem);
        sim.set_breakpoint(None);
        sim.set_trap_handler(None);
        if sim.exit_code() != 0 {
            return Err(AccelError::KernelAborted(sim.exit_code()));
        }
        Ok(())
    }

    /// Flushes TLB/I-cache state on every hart. `InterpCore` doesn't model
    /// caches, so this is a structural no-op that still observes the
    /// "lower max active harts to zero during the flush" protocol.
    pub fn sync_cache(&mut self, flush_dcache: bool) {
        if let Some(sim) = self.sim.as_mut() {
            sim.set_max_active_harts(0);
            log::debug!(
                "cache sync: flushing {}",
                if flush_dcache { "tlb" } else { "icache" }
            );
        }
    }
}

impl Default for Accelerator {
    fn default() -> Self {
        Accelerator::new()
    }
}

fn initialize_hart(_core: &mut dyn refsi_sim::core::HartCore) {
    // Production wiring enables fp/vector mstatus bits when those
    // extensions are present, enables user/supervisor counter access, and
    // disables paging. `InterpCore` has no such state to initialise.
}

impl HartCounterSource for Accelerator {
    fn read_hart_counter(&self, counter_idx: usize, hart: u16) -> Option<u64> {
        if counter_idx >= NUM_PER_HART_COUNTERS {
            return None;
        }
        let sim = self.sim.as_ref()?;
        if hart as usize >= sim.num_harts() {
            return None;
        }
        let csr = CSR_MCYCLE.checked_add(counter_idx as u16)?;
        sim.hart(hart as usize).read_csr(csr)
    }

    fn write_hart_counter(&mut self, counter_idx: usize, hart: u16, value: u64) -> bool {
        if counter_idx >= NUM_PER_HART_COUNTERS {
            return false;
        }
        let sim = match self.sim.as_mut() {
            Some(s) => s,
            None => return false,
        };
        if hart as usize >= sim.num_harts() {
            return false;
        }
        match CSR_MCYCLE.checked_add(counter_idx as u16) {
            Some(csr) => sim.hart_mut(hart as usize).write_csr(csr, value),
            None => false,
        }
    }
}
