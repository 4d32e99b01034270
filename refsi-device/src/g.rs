use refsi_accel::Accelerator;
use refsi_addr::{DeviceAddr, UnitId};
use refsi_alloc::Allocator;
use refsi_mem::{MemoryController, RamDevice, RomDevice, WindowConfig, WindowHandle, WindowMode};
use refsi_perf::PerfCounterDevice;

use crate::error::{DeviceError, DeviceResult};
use crate::memory_map::{MemoryMap, MemoryMapKind};
use crate::{read_profile_level, CORE_ELEN, DRAM_BASE, DRAM_SIZE, PERF_COUNTERS_IO_BASE, PERF_COUNTERS_IO_SIZE, REFSI_ISA, TCDM_BASE, TCDM_SIZE};
use crate::{DeviceInfo, SocFamily};

/// `REFSI_LOADER_ADDRESS`/`REFSI_LOADER_END_ADDRESS`: a 60 KiB bootloader
/// area with no dedicated instruction memory of its own on this family.
const LOADER_ADDRESS: u64 = 0x0000_1000;
const LOADER_END_ADDRESS: u64 = 0x0001_0000;

/// Default area for storing kernel ELF binaries, enlarged from the
/// original's 1 MiB to handle kernels over that size.
const ELF_BASE: u64 = 0x0001_0000;
const ELF_SIZE: u64 = (1 << 27) - ELF_BASE;

/// Per-hart storage, scaled by `max_harts` harts.
const HART_LOCAL_BASE: u64 = 0x2080_0000;
const HART_LOCAL_END: u64 = 0x2100_0000;
const HART_LOCAL_SIZE: u64 = HART_LOCAL_END - HART_LOCAL_BASE;

/// `NUM_HARTS_FOR_CA_MODE`.
const DEFAULT_NUM_HARTS: u32 = 2;

const WINDOW_ALIGN: u64 = 4096;

/// G-family device: a memory controller, accelerator and DRAM allocator
/// with no command processor — kernels run directly against the
/// simulator's hart pool, and the "device" owns scheduling across harts
/// itself rather than handing that off to a worker thread.
pub struct GDevice {
    mem: MemoryController,
    accel: Accelerator,
    alloc: Allocator,
    perf: PerfCounterDevice,
    elf_window: WindowHandle,
    hart_local_window: WindowHandle,
    memory_map: MemoryMap,
    max_harts: u32,
}

impl GDevice {
    /// `REFSI_CONTEXT_ADDRESS`: the fixed address within the hart-local
    /// window at which `refsi-hal` stages an `exec_state_t`-equivalent
    /// struct before a kernel launch.
    pub fn context_address() -> u64 {
        HART_LOCAL_BASE
    }

    /// `getDefaultConfig`: the ISA/vector-width pair used when a caller
    /// doesn't supply their own.
    pub fn default_config() -> (&'static str, u32) {
        let vlen = std::env::var("CA_RISCV_VLEN_BITS_MIN")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(128);
        (REFSI_ISA, vlen)
    }

    pub fn new(isa: &str, vlen: u32) -> GDevice {
        let mut mem = MemoryController::new();
        let loader_size = LOADER_END_ADDRESS - LOADER_ADDRESS;
        mem.add(LOADER_ADDRESS, Box::new(RomDevice::new(vec![0u8; loader_size as usize])))
            .expect("loader ROM region does not overlap an empty address space");
        mem.add(TCDM_BASE, Box::new(RamDevice::new(TCDM_SIZE)))
            .expect("TCDM region does not overlap the loader ROM");
        mem.add(DRAM_BASE, Box::new(RamDevice::new(DRAM_SIZE)))
            .expect("DRAM region does not overlap TCDM");

        let mut memory_map = MemoryMap::new();
        memory_map.push(MemoryMapKind::Tcim, LOADER_ADDRESS, loader_size);
        memory_map.push(MemoryMapKind::Tcdm, TCDM_BASE, TCDM_SIZE);
        memory_map.push(MemoryMapKind::Dram, DRAM_BASE, DRAM_SIZE);
        memory_map.push(MemoryMapKind::PerfCounters, PERF_COUNTERS_IO_BASE, PERF_COUNTERS_IO_SIZE);

        let elf_window = mem.create_window();
        let hart_local_window = mem.create_window();

        let mut accel = Accelerator::new();
        accel.set_isa(isa);
        accel.set_vector_len(vlen);
        accel.set_vector_elem_len(CORE_ELEN);
        accel.set_num_harts(DEFAULT_NUM_HARTS);

        GDevice {
            mem,
            accel,
            alloc: Allocator::new(DRAM_BASE, DRAM_SIZE),
            perf: PerfCounterDevice::new(),
            elf_window,
            hart_local_window,
            memory_map,
            max_harts: DEFAULT_NUM_HARTS,
        }
    }

    pub fn set_max_harts(&mut self, max_harts: u32) {
        self.max_harts = max_harts;
        self.accel.set_num_harts(max_harts);
    }

    /// `initialize`: materialise the simulator and program both memory
    /// windows over freshly allocated DRAM.
    pub fn initialize(&mut self) -> DeviceResult<()> {
        self.accel.create_sim();
        self.setup_elf_window()?;
        self.setup_hart_local_window()?;
        Ok(())
    }

    fn setup_elf_window(&mut self) -> DeviceResult<()> {
        let mapped = self.alloc_dram(ELF_SIZE, WINDOW_ALIGN)?;
        self.mem.write_window_config(
            self.elf_window,
            WindowConfig {
                active: true,
                mode: WindowMode::Shared,
                base: ELF_BASE,
                target: mapped.0,
                size: ELF_SIZE,
                scale: 0,
            },
        )?;
        Ok(())
    }

    fn setup_hart_local_window(&mut self) -> DeviceResult<()> {
        let mapped = self.alloc_dram(HART_LOCAL_SIZE * self.max_harts as u64, WINDOW_ALIGN)?;
        self.mem.write_window_config(
            self.hart_local_window,
            WindowConfig {
                active: true,
                mode: WindowMode::PerHart,
                base: HART_LOCAL_BASE,
                target: mapped.0,
                size: HART_LOCAL_SIZE,
                scale: HART_LOCAL_SIZE,
            },
        )?;
        Ok(())
    }

    fn alloc_dram(&mut self, size: u64, align: u64) -> DeviceResult<DeviceAddr> {
        let addr = self.alloc.alloc(size, align);
        if addr.is_null() {
            return Err(DeviceError::OutOfMemory(size));
        }
        Ok(addr)
    }

    pub fn elf_window_range(&self) -> (u64, u64) {
        (ELF_BASE, ELF_SIZE)
    }

    pub fn max_harts(&self) -> u32 {
        self.max_harts
    }

    pub fn query_device_info(&self) -> DeviceInfo {
        DeviceInfo {
            family: SocFamily::G,
            num_cores: crate::NUM_CORES,
            num_harts_per_core: self.max_harts,
            num_memory_map_entries: self.memory_map.entries().len(),
            core_isa: self.accel.isa().to_string(),
            core_vlen: self.accel.vector_len(),
            core_elen: self.accel.vector_elem_len(),
        }
    }

    pub fn memory_map(&self) -> &MemoryMap {
        &self.memory_map
    }

    pub fn alloc_device_memory(&mut self, size: u64, align: u64) -> DeviceAddr {
        self.alloc.alloc(size, align)
    }

    pub fn free_device_memory(&mut self, addr: DeviceAddr) {
        self.alloc.free(addr);
    }

    pub fn flush_device_memory(&mut self, _addr: u64, _size: u64) {}

    pub fn invalidate_device_memory(&mut self, _addr: u64, _size: u64) {}

    pub fn read_device_memory(&mut self, dest: &mut [u8], addr: u64, unit: UnitId) -> bool {
        let len = dest.len() as u64;
        self.mem.load(addr, len, dest, unit)
    }

    pub fn write_device_memory(&mut self, addr: u64, data: &[u8], unit: UnitId) -> bool {
        self.mem.store(addr, data.len() as u64, data, unit)
    }

    /// Direct access to the memory controller, for bulk operations (ELF
    /// loading, kernel-argument staging) that don't fit the byte-buffer
    /// read/write calls above.
    pub fn memory_mut(&mut self) -> &mut MemoryController {
        &mut self.mem
    }

    pub fn accel(&self) -> &Accelerator {
        &self.accel
    }

    pub fn accel_mut(&mut self) -> &mut Accelerator {
        &mut self.accel
    }

    /// `executeKernel`: run every active hart starting at `entry_fn_addr`,
    /// enabling the simulator's profiler hook first when
    /// `CA_PROFILE_LEVEL > 2`.
    pub fn execute_kernel(&mut self, entry_fn_addr: u64, num_harts: u32) -> DeviceResult<()> {
        self.accel.set_profiling_enabled(read_profile_level() > 2);
        self.accel
            .run_kernel_generic(&mut self.mem, entry_fn_addr, num_harts as usize)
            .map_err(DeviceError::from)
    }

    pub fn counter_load(&self, addr: u64, len: u64, out: &mut [u8], unit: UnitId) -> bool {
        self.perf.load(&self.accel, addr, len, out, unit)
    }

    pub fn counter_store(&mut self, addr: u64, len: u64, data: &[u8], unit: UnitId) -> bool {
        self.perf.store(&mut self.accel, addr, len, data, unit)
    }
}
