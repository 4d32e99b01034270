//! Command Processor (component K, M family): a worker thread that drains
//! a bounded queue of command-buffer requests against a 40-register file,
//! a set of memory windows, and the accelerator.

pub mod error;
pub mod regs;

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use refsi_accel::{Accelerator, HartStateEntry};
use refsi_addr::UnitId;
use refsi_dma::DmaEngine;
use refsi_mem::{MemoryController, WindowConfig, WindowHandle, WindowMode};
use refsi_perf::PerfCounterDevice;

pub use error::{CmpError, CmpResult};
use regs::{
    decode_header, get_entry_point_addr, get_kub_addr, get_tsd_offset, get_tsd_size, get_window_active,
    get_window_mode, get_window_scale_a, get_window_scale_b, get_window_size, split_window_register, CmpOpcode,
    WindowRegGroup, CMP_CACHE_SYNC_ACC_DCACHE, CMP_CACHE_SYNC_ACC_ICACHE, CMP_NUM_REGS, CMP_REG_ENTRY_PT_FN,
    CMP_REG_KUB_DESC, CMP_REG_RETURN_ADDR, CMP_REG_STACK_TOP, CMP_REG_TSD_INFO, CMP_WINDOW_MODE_PERT_HART,
    CMP_WINDOW_MODE_SHARED,
};

/// Requests queued past this size block the submitter on `executed`.
const MAX_REQUESTS: usize = 4;

/// Where a device's hart-local (TCDM) storage lives, for `RUN_KERNEL_SLICE`'s
/// default stack pointer and kernel-thread-block placement. Supplied by the
/// device-construction layer, which is the only place that knows the SoC's
/// memory map.
#[derive(Debug, Clone, Copy)]
pub struct HartLocalLayout {
    pub base: u64,
    pub stride: u64,
}

impl HartLocalLayout {
    pub fn hart_address(&self, hart_idx: usize, offset: u64) -> u64 {
        self.base + (hart_idx as u64) * self.stride + offset
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CommandRequest {
    pub command_buffer_addr: u64,
    pub command_buffer_size: u64,
}

/// Where the DMA engine's and performance counters' register banks sit in
/// the address space. Neither device lives in the [`MemoryController`]'s
/// device arena (see `refsi_dma::DmaEngine`'s doc comment for why), so the
/// command processor special-cases these ranges itself before falling
/// through to the generic bus — the same special-casing the original
/// command processor's address formatting shows it needs to be aware of.
#[derive(Debug, Clone, Copy)]
pub struct IoRanges {
    pub dma_io_base: u64,
    pub perf_io_base: u64,
}

struct Shared {
    mem: MemoryController,
    accel: Accelerator,
    dma: DmaEngine,
    perf: PerfCounterDevice,
    io: IoRanges,
    windows: Vec<WindowHandle>,
    hart_local: HartLocalLayout,
    registers: [u64; CMP_NUM_REGS],
    requests: VecDeque<CommandRequest>,
    started: bool,
    stopping: bool,
}

/// Drives command buffers submitted via [`CommandProcessor::enqueue_request`]
/// on a dedicated worker thread, started lazily on first use.
pub struct CommandProcessor {
    shared: Arc<Mutex<Shared>>,
    dispatched: Arc<Condvar>,
    executed: Arc<Condvar>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl CommandProcessor {
    pub fn new(
        mem: MemoryController,
        accel: Accelerator,
        windows: Vec<WindowHandle>,
        hart_local: HartLocalLayout,
        io: IoRanges,
    ) -> CommandProcessor {
        CommandProcessor {
            shared: Arc::new(Mutex::new(Shared {
                mem,
                accel,
                dma: DmaEngine::new(),
                perf: PerfCounterDevice::new(),
                io,
                windows,
                hart_local,
                registers: [0u64; CMP_NUM_REGS],
                requests: VecDeque::new(),
                started: false,
                stopping: false,
            })),
            dispatched: Arc::new(Condvar::new()),
            executed: Arc::new(Condvar::new()),
            worker: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        let mut guard = self.shared.lock().unwrap();
        if guard.started {
            return;
        }
        guard.stopping = false;
        guard.started = true;
        drop(guard);

        let shared = self.shared.clone();
        let dispatched = self.dispatched.clone();
        let executed = self.executed.clone();
        let handle = thread::spawn(move || worker_main(shared, dispatched, executed));
        *self.worker.lock().unwrap() = Some(handle);
    }

    pub fn stop(&self) {
        let mut guard = self.shared.lock().unwrap();
        if !guard.started {
            return;
        }
        guard.stopping = true;
        drop(guard);
        self.dispatched.notify_all();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            handle.join().ok();
        }
        let mut guard = self.shared.lock().unwrap();
        guard.stopping = false;
        guard.started = false;
    }

    /// Starts the worker on first call, then blocks while the queue is full.
    pub fn enqueue_request(&self, request: CommandRequest) {
        let mut guard = self.shared.lock().unwrap();
        if !guard.started {
            drop(guard);
            self.start();
            guard = self.shared.lock().unwrap();
        }
        while guard.requests.len() > MAX_REQUESTS {
            guard = self.executed.wait(guard).unwrap();
        }
        guard.requests.push_back(request);
        drop(guard);
        self.dispatched.notify_all();
    }

    pub fn wait_empty_queue(&self) {
        let mut guard = self.shared.lock().unwrap();
        while !guard.requests.is_empty() {
            guard = self.executed.wait(guard).unwrap();
        }
    }

    pub fn register(&self, reg_idx: usize) -> u64 {
        self.shared.lock().unwrap().registers[reg_idx]
    }

    /// Direct access to the underlying memory controller, for HAL
    /// operations (`mem_read`/`mem_write`/program load) that bypass the
    /// command-buffer protocol entirely — the same shortcut the original
    /// device takes by reading/writing `mem_ctl` straight from the HAL
    /// bridge rather than only through the command processor.
    pub fn with_memory<R>(&self, f: impl FnOnce(&mut MemoryController) -> R) -> R {
        let mut guard = self.shared.lock().unwrap();
        f(&mut guard.mem)
    }

    /// Read-only access to the accelerator, for HAL device-info queries
    /// (ISA string, vector width) that don't warrant their own getters here.
    pub fn with_accel<R>(&self, f: impl FnOnce(&Accelerator) -> R) -> R {
        let guard = self.shared.lock().unwrap();
        f(&guard.accel)
    }

    /// Mutable access to the accelerator, for one-off device-initialisation
    /// calls (`create_sim`) made outside the command-buffer protocol.
    pub fn with_accel_mut<R>(&self, f: impl FnOnce(&mut Accelerator) -> R) -> R {
        let mut guard = self.shared.lock().unwrap();
        f(&mut guard.accel)
    }
}

impl Drop for CommandProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_main(shared: Arc<Mutex<Shared>>, dispatched: Arc<Condvar>, executed: Arc<Condvar>) {
    let mut guard = shared.lock().unwrap();
    loop {
        if guard.stopping {
            break;
        }
        while let Some(request) = guard.requests.pop_front() {
            if let Err(err) = execute_buffer(&mut guard, &request) {
                log::warn!("command buffer at {:#x} aborted: {}", request.command_buffer_addr, err);
            }
            executed.notify_all();
        }
        guard = dispatched.wait(guard).unwrap();
    }
}

fn execute_buffer(state: &mut Shared, request: &CommandRequest) -> CmpResult<()> {
    let total_chunks = request.command_buffer_size / 8;
    let mut pos = 0u64;
    while pos < total_chunks {
        let header_addr = request.command_buffer_addr + pos * 8;
        let header = load_u64(state, header_addr)?;
        let raw = decode_header(header).ok_or(CmpError::BadHeader(header_addr))?;
        let opcode = CmpOpcode::from_u32(raw.opcode_raw).ok_or(CmpError::BadOpcode(raw.opcode_raw))?;
        pos += 1;
        let chunks_addr = request.command_buffer_addr + pos * 8;

        execute_command(state, opcode, raw.num_chunks, raw.inline_chunk, chunks_addr)?;
        if opcode == CmpOpcode::Finish {
            break;
        }
        pos += raw.num_chunks as u64;
    }
    Ok(())
}

/// Routes a bus access through the DMA and performance-counter register
/// banks before falling through to the memory controller, mirroring how
/// the original command processor's address space includes those two I/O
/// regions alongside ordinary memory.
fn bus_load(state: &mut Shared, addr: u64, len: u64, out: &mut [u8], unit: UnitId) -> bool {
    let dma_size = (refsi_dma::NUM_REGS * 8) as u64;
    if addr >= state.io.dma_io_base && addr < state.io.dma_io_base + dma_size {
        return state.dma.load(unit, addr - state.io.dma_io_base, len, out);
    }
    let perf_size = state.perf.mem_size();
    if addr >= state.io.perf_io_base && addr < state.io.perf_io_base + perf_size {
        return state.perf.load(&state.accel, addr - state.io.perf_io_base, len, out, unit);
    }
    state.mem.load(addr, len, out, unit)
}

fn bus_store(state: &mut Shared, addr: u64, len: u64, data: &[u8], unit: UnitId) -> bool {
    let dma_size = (refsi_dma::NUM_REGS * 8) as u64;
    if addr >= state.io.dma_io_base && addr < state.io.dma_io_base + dma_size {
        return state.dma.store(&mut state.mem, unit, addr - state.io.dma_io_base, len, data);
    }
    let perf_size = state.perf.mem_size();
    if addr >= state.io.perf_io_base && addr < state.io.perf_io_base + perf_size {
        return state.perf.store(&mut state.accel, addr - state.io.perf_io_base, len, data, unit);
    }
    state.mem.store(addr, len, data, unit)
}

fn load_u64(state: &mut Shared, addr: u64) -> CmpResult<u64> {
    let mut raw = [0u8; 8];
    if !bus_load(state, addr, 8, &mut raw, UnitId::Cmp) {
        return Err(CmpError::MemAccessFailed);
    }
    Ok(u64::from_le_bytes(raw))
}

fn load_chunk(state: &mut Shared, chunks_addr: u64, index: u32) -> CmpResult<u64> {
    load_u64(state, chunks_addr + (index as u64) * 8)
}

fn execute_command(
    state: &mut Shared,
    opcode: CmpOpcode,
    num_chunks: u32,
    inline_chunk: u32,
    chunks_addr: u64,
) -> CmpResult<()> {
    match opcode {
        CmpOpcode::Nop | CmpOpcode::Finish => Ok(()),
        CmpOpcode::WriteReg64 => execute_write_reg64(state, num_chunks, inline_chunk, chunks_addr),
        CmpOpcode::LoadReg64 => execute_load_reg64(state, num_chunks, inline_chunk, chunks_addr),
        CmpOpcode::StoreReg64 => execute_store_reg64(state, num_chunks, inline_chunk, chunks_addr),
        CmpOpcode::StoreImm64 => execute_store_imm64(state, num_chunks, inline_chunk, chunks_addr),
        CmpOpcode::CopyMem64 => execute_copy_mem64(state, num_chunks, inline_chunk, chunks_addr),
        CmpOpcode::RunKernelSlice => execute_run_kernel_slice(state, num_chunks, inline_chunk, chunks_addr),
        CmpOpcode::RunInstances => execute_run_instances(state, num_chunks, inline_chunk, chunks_addr),
        CmpOpcode::SyncCache => execute_sync_cache(state, num_chunks, inline_chunk),
    }
}

fn require_chunks(opcode: CmpOpcode, got: u32, want: u32) -> CmpResult<()> {
    if got != want {
        return Err(CmpError::WrongChunkCount(opcode, got, want));
    }
    Ok(())
}

fn execute_write_reg64(state: &mut Shared, num_chunks: u32, inline_chunk: u32, chunks_addr: u64) -> CmpResult<()> {
    require_chunks(CmpOpcode::WriteReg64, num_chunks, 1)?;
    let reg_idx = inline_chunk as usize;
    let imm_val = load_chunk(state, chunks_addr, 0)?;
    if reg_idx >= CMP_NUM_REGS {
        return Err(CmpError::BadRegister(reg_idx));
    }
    if let Some((group, window_id)) = split_window_register(reg_idx) {
        apply_window_register_write(state, group, window_id, imm_val)?;
    }
    state.registers[reg_idx] = imm_val;
    Ok(())
}

fn apply_window_register_write(
    state: &mut Shared,
    group: WindowRegGroup,
    window_id: usize,
    value: u64,
) -> CmpResult<()> {
    let handle = *state.windows.get(window_id).ok_or(CmpError::BadWindow(window_id))?;
    let mut cfg = state.mem.window_config(handle)?;
    match group {
        WindowRegGroup::Base => cfg.base = value,
        WindowRegGroup::Target => cfg.target = value,
        WindowRegGroup::Scale => {
            cfg.scale = WindowConfig::decode_scale(get_window_scale_a(value), get_window_scale_b(value));
        }
        WindowRegGroup::Mode => {
            cfg.active = get_window_active(value);
            cfg.mode = match get_window_mode(value) {
                CMP_WINDOW_MODE_SHARED => WindowMode::Shared,
                CMP_WINDOW_MODE_PERT_HART => WindowMode::PerHart,
                other => return Err(CmpError::BadWindowMode(other)),
            };
            cfg.size = get_window_size(value);
        }
    }
    state.mem.write_window_config(handle, cfg)?;
    Ok(())
}

fn execute_load_reg64(state: &mut Shared, num_chunks: u32, inline_chunk: u32, chunks_addr: u64) -> CmpResult<()> {
    require_chunks(CmpOpcode::LoadReg64, num_chunks, 1)?;
    let reg_idx = inline_chunk as usize;
    if reg_idx >= CMP_NUM_REGS {
        return Err(CmpError::BadRegister(reg_idx));
    }
    let src_addr = load_chunk(state, chunks_addr, 0)?;
    let val = load_u64(state, src_addr)?;
    state.registers[reg_idx] = val;
    Ok(())
}

fn execute_store_reg64(state: &mut Shared, num_chunks: u32, inline_chunk: u32, chunks_addr: u64) -> CmpResult<()> {
    require_chunks(CmpOpcode::StoreReg64, num_chunks, 1)?;
    let reg_idx = inline_chunk as usize;
    if reg_idx >= CMP_NUM_REGS {
        return Err(CmpError::BadRegister(reg_idx));
    }
    let dst_addr = load_chunk(state, chunks_addr, 0)?;
    let val = state.registers[reg_idx];
    if !bus_store(state, dst_addr, 8, &val.to_le_bytes(), UnitId::Cmp) {
        return Err(CmpError::MemAccessFailed);
    }
    Ok(())
}

fn execute_store_imm64(state: &mut Shared, num_chunks: u32, inline_chunk: u32, chunks_addr: u64) -> CmpResult<()> {
    require_chunks(CmpOpcode::StoreImm64, num_chunks, 1)?;
    let dest_addr = inline_chunk as u64;
    let imm_val = load_chunk(state, chunks_addr, 0)?;
    if !bus_store(state, dest_addr, 8, &imm_val.to_le_bytes(), UnitId::Cmp) {
        return Err(CmpError::MemAccessFailed);
    }
    Ok(())
}

fn execute_copy_mem64(state: &mut Shared, num_chunks: u32, inline_chunk: u32, chunks_addr: u64) -> CmpResult<()> {
    require_chunks(CmpOpcode::CopyMem64, num_chunks, 3)?;
    let count = inline_chunk as u64;
    let src_addr = load_chunk(state, chunks_addr, 0)?;
    let dst_addr = load_chunk(state, chunks_addr, 1)?;
    let unit_raw = load_chunk(state, chunks_addr, 2)?;
    if src_addr % 8 != 0 {
        return Err(CmpError::MemAccessFailed);
    }
    let src_unit = UnitId::decode(unit_raw as u32);
    for i in 0..count {
        let mut word = [0u8; 8];
        if !bus_load(state, src_addr + i * 8, 8, &mut word, src_unit) {
            return Err(CmpError::MemAccessFailed);
        }
        if !bus_store(state, dst_addr + i * 8, 8, &word, UnitId::Cmp) {
            return Err(CmpError::MemAccessFailed);
        }
    }
    Ok(())
}

fn execute_run_kernel_slice(state: &mut Shared, num_chunks: u32, inline_chunk: u32, chunks_addr: u64) -> CmpResult<()> {
    require_chunks(CmpOpcode::RunKernelSlice, num_chunks, 2)?;
    let max_harts = (inline_chunk & 0xff) as usize;
    let num_instances = load_chunk(state, chunks_addr, 0)?;
    let slice_id = load_chunk(state, chunks_addr, 1)?;

    let entry_point = get_entry_point_addr(state.registers[CMP_REG_ENTRY_PT_FN]);
    let kub_addr = get_kub_addr(state.registers[CMP_REG_KUB_DESC]);
    let tsd_size = get_tsd_size(state.registers[CMP_REG_TSD_INFO]);
    let tsd_offset = get_tsd_offset(state.registers[CMP_REG_TSD_INFO]);
    let stack_top_reg = state.registers[CMP_REG_STACK_TOP];
    let return_addr = state.registers[CMP_REG_RETURN_ADDR];

    let num_harts = if max_harts > 0 { max_harts } else { state.accel.num_harts() as usize };
    let mut hart_data = Vec::with_capacity(num_harts);
    for hart_idx in 0..num_harts {
        let stack_top = if stack_top_reg != 0 {
            stack_top_reg
        } else {
            state.hart_local.hart_address(hart_idx, state.hart_local.stride)
        };

        let ktb_addr = if tsd_size > 0 {
            let unit = UnitId::AccHart(hart_idx as u16);
            let ktb_addr = state.hart_local.hart_address(hart_idx, 0);
            let mut tsd = vec![0u8; tsd_size as usize];
            if !bus_load(state, kub_addr + tsd_offset, tsd_size, &mut tsd, unit) {
                return Err(CmpError::MemAccessFailed);
            }
            if !bus_store(state, ktb_addr, tsd_size, &tsd, unit) {
                return Err(CmpError::MemAccessFailed);
            }
            ktb_addr
        } else {
            0
        };

        hart_data.push(HartStateEntry {
            stack_top_addr: stack_top,
            extra_args: vec![slice_id, kub_addr, ktb_addr],
        });
    }

    state
        .accel
        .run_kernel_slice(&mut state.mem, num_instances, entry_point, return_addr, num_harts, &hart_data)
        .map_err(CmpError::from)
}

fn execute_run_instances(state: &mut Shared, num_chunks: u32, inline_chunk: u32, chunks_addr: u64) -> CmpResult<()> {
    const MAX_EXTRA_ARGS: u32 = 7;
    if num_chunks < 1 {
        return Err(CmpError::WrongChunkCount(CmpOpcode::RunInstances, num_chunks, 1));
    }
    let max_harts = (inline_chunk & 0xff) as usize;
    let num_extra_args = (inline_chunk >> 8) & 0x07;
    if num_extra_args > MAX_EXTRA_ARGS || num_chunks != num_extra_args + 1 {
        return Err(CmpError::WrongChunkCount(CmpOpcode::RunInstances, num_chunks, num_extra_args + 1));
    }
    let num_instances = load_chunk(state, chunks_addr, 0)?;
    let mut extra_args = Vec::with_capacity(num_extra_args as usize);
    for i in 0..num_extra_args {
        extra_args.push(load_chunk(state, chunks_addr, i + 1)?);
    }

    let entry_point = get_entry_point_addr(state.registers[CMP_REG_ENTRY_PT_FN]);
    let stack_top = state.registers[CMP_REG_STACK_TOP];
    let return_addr = state.registers[CMP_REG_RETURN_ADDR];
    let num_harts = if max_harts > 0 { max_harts } else { state.accel.num_harts() as usize };

    let hart_data: Vec<HartStateEntry> = (0..num_harts)
        .map(|_| HartStateEntry {
            stack_top_addr: stack_top,
            extra_args: extra_args.clone(),
        })
        .collect();

    state
        .accel
        .run_kernel_slice(&mut state.mem, num_instances, entry_point, return_addr, num_harts, &hart_data)
        .map_err(CmpError::from)
}

fn execute_sync_cache(state: &mut Shared, num_chunks: u32, inline_chunk: u32) -> CmpResult<()> {
    require_chunks(CmpOpcode::SyncCache, num_chunks, 0)?;
    let flags = inline_chunk & (CMP_CACHE_SYNC_ACC_DCACHE | CMP_CACHE_SYNC_ACC_ICACHE);
    state.accel.sync_cache(flags & CMP_CACHE_SYNC_ACC_DCACHE != 0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use refsi_mem::RamDevice;
    use regs::encode_header;

    fn cmp_with_ram() -> CommandProcessor {
        let mut mem = MemoryController::new();
        mem.add(0, Box::new(RamDevice::new(0x1000))).unwrap();
        let accel = Accelerator::new();
        CommandProcessor::new(
            mem,
            accel,
            Vec::new(),
            HartLocalLayout { base: 0x8000, stride: 0x100 },
            IoRanges { dma_io_base: 0xffff_0000, perf_io_base: 0xffff_8000 },
        )
    }

    fn write_buffer(cmp: &CommandProcessor, words: &[u64]) {
        let mut guard = cmp.shared.lock().unwrap();
        for (i, w) in words.iter().enumerate() {
            let addr = 0x100 + (i as u64) * 8;
            guard.mem.store(addr, 8, &w.to_le_bytes(), UnitId::External);
        }
    }

    #[test]
    fn store_imm_then_load_reg_round_trips() {
        let cmp = cmp_with_ram();
        let words = [
            encode_header(CmpOpcode::StoreImm64, 1, 0x200),
            0xcafe_babe,
            encode_header(CmpOpcode::LoadReg64, 1, regs::CMP_REG_SCRATCH as u32),
            0x200,
            encode_header(CmpOpcode::Finish, 0, 0),
        ];
        write_buffer(&cmp, &words);
        cmp.enqueue_request(CommandRequest {
            command_buffer_addr: 0x100,
            command_buffer_size: (words.len() as u64) * 8,
        });
        cmp.wait_empty_queue();
        assert_eq!(cmp.register(regs::CMP_REG_SCRATCH), 0xcafe_babe);
    }

    #[test]
    fn a_failing_command_aborts_only_its_own_buffer() {
        let cmp = cmp_with_ram();
        // STORE_IMM64 writes to register file (valid), then LOAD_REG64 with
        // an out-of-range register id fails and the FINISH after it never runs.
        let words = [
            encode_header(CmpOpcode::WriteReg64, 1, regs::CMP_REG_SCRATCH as u32),
            0x1234,
            encode_header(CmpOpcode::LoadReg64, 1, regs::CMP_NUM_REGS as u32),
            0x100,
            encode_header(CmpOpcode::Finish, 0, 0),
        ];
        write_buffer(&cmp, &words);
        cmp.enqueue_request(CommandRequest {
            command_buffer_addr: 0x100,
            command_buffer_size: (words.len() as u64) * 8,
        });
        cmp.wait_empty_queue();
        assert_eq!(cmp.register(regs::CMP_REG_SCRATCH), 0x1234);
    }

    #[test]
    fn queue_backpressure_releases_once_drained() {
        let cmp = cmp_with_ram();
        let words = [encode_header(CmpOpcode::Finish, 0, 0)];
        write_buffer(&cmp, &words);
        for _ in 0..(MAX_REQUESTS + 3) {
            cmp.enqueue_request(CommandRequest {
                command_buffer_addr: 0x100,
                command_buffer_size: 8,
            });
        }
        cmp.wait_empty_queue();
    }

    #[test]
    fn store_imm_reaches_dma_registers_outside_the_memory_controller() {
        let mut mem = MemoryController::new();
        mem.add(0, Box::new(RamDevice::new(0x1000))).unwrap();
        let accel = Accelerator::new();
        let dma_io_base = 0x9000u64;
        let cmp = CommandProcessor::new(
            mem,
            accel,
            Vec::new(),
            HartLocalLayout { base: 0x8000, stride: 0x100 },
            IoRanges { dma_io_base, perf_io_base: 0xa000 },
        );
        // Write the DMA row-size register (REG_DMAXFERSIZE0), then read it
        // back through LOAD_REG64: a plain MemoryController would reject
        // both accesses, since nothing is mapped at `dma_io_base`.
        let reg_addr = dma_io_base + (refsi_dma::REG_DMAXFERSIZE0 as u64) * 8;
        let words = [
            encode_header(CmpOpcode::StoreImm64, 1, reg_addr as u32),
            64,
            encode_header(CmpOpcode::LoadReg64, 1, regs::CMP_REG_SCRATCH as u32),
            reg_addr,
            encode_header(CmpOpcode::Finish, 0, 0),
        ];
        write_buffer(&cmp, &words);
        cmp.enqueue_request(CommandRequest {
            command_buffer_addr: 0x100,
            command_buffer_size: (words.len() as u64) * 8,
        });
        cmp.wait_empty_queue();
        assert_eq!(cmp.register(regs::CMP_REG_SCRATCH), 64);
    }

    #[test]
    fn copy_mem64_samples_a_global_performance_counter() {
        let mut mem = MemoryController::new();
        mem.add(0, Box::new(RamDevice::new(0x1000))).unwrap();
        let accel = Accelerator::new();
        let perf_io_base = 0xa000u64;
        let cmp = CommandProcessor::new(
            mem,
            accel,
            Vec::new(),
            HartLocalLayout { base: 0x8000, stride: 0x100 },
            IoRanges { dma_io_base: 0x9000, perf_io_base },
        );
        let counter_addr = perf_io_base + (refsi_perf::NUM_PER_HART_COUNTERS as u64) * 8;
        let scratch_addr = 0x300u64; // outside the command buffer itself
        let words = [
            encode_header(CmpOpcode::StoreImm64, 1, counter_addr as u32),
            0xfeed,
            encode_header(CmpOpcode::CopyMem64, 3, 1),
            counter_addr,
            scratch_addr,
            UnitId::Cmp.encode() as u64,
            encode_header(CmpOpcode::LoadReg64, 1, regs::CMP_REG_SCRATCH as u32),
            scratch_addr,
            encode_header(CmpOpcode::Finish, 0, 0),
        ];
        write_buffer(&cmp, &words);
        cmp.enqueue_request(CommandRequest {
            command_buffer_addr: 0x100,
            command_buffer_size: (words.len() as u64) * 8,
        });
        cmp.wait_empty_queue();
        assert_eq!(cmp.register(regs::CMP_REG_SCRATCH), 0xfeed);
    }
}
