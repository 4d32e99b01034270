use refsi_accel::Accelerator;
use refsi_addr::{DeviceAddr, UnitId};
use refsi_alloc::Allocator;
use refsi_cmp::{CommandProcessor, CommandRequest, HartLocalLayout, IoRanges};
use refsi_cmp::regs::CMP_NUM_WINDOWS;
use refsi_mem::{MemoryController, RamDevice, WindowHandle};

use crate::error::DeviceResult;
use crate::memory_map::{MemoryMap, MemoryMapKind};
use crate::{
    read_profile_level, CORE_ELEN, DMA_IO_BASE, DMA_IO_SIZE, DRAM_BASE, DRAM_SIZE, PERF_COUNTERS_IO_BASE,
    PERF_COUNTERS_IO_SIZE, REFSI_ISA, TCDM_BASE, TCDM_HART_BASE, TCDM_HART_SIZE, TCDM_SIZE,
};
use crate::{DeviceInfo, SocFamily};

/// M-family device: a command processor owns the memory controller and the
/// accelerator, and everything a kernel launch needs — window programming,
/// KUB staging, ROM stubs — travels in over its command-buffer protocol
/// instead of through direct calls on this struct. This mirrors the split in
/// the original between `RefSiMDevice` (construction, queueing) and the M1
/// HAL (window setup, ROM generation): the HAL owns the window registers, so
/// `MDevice` only reserves the slots.
pub struct MDevice {
    cmp: CommandProcessor,
    alloc: Allocator,
    memory_map: MemoryMap,
    windows: Vec<WindowHandle>,
}

impl MDevice {
    pub fn new(isa: &str, vlen: u32) -> MDevice {
        let mut mem = MemoryController::new();
        mem.add(TCDM_BASE, Box::new(RamDevice::new(TCDM_SIZE)))
            .expect("TCDM region does not overlap an empty address space");
        mem.add(DRAM_BASE, Box::new(RamDevice::new(DRAM_SIZE)))
            .expect("DRAM region does not overlap TCDM");

        let mut memory_map = MemoryMap::new();
        memory_map.push(MemoryMapKind::Tcdm, TCDM_BASE, TCDM_SIZE);
        memory_map.push(MemoryMapKind::Dram, DRAM_BASE, DRAM_SIZE);
        memory_map.push(MemoryMapKind::KernelDmaPrivate, DMA_IO_BASE, DMA_IO_SIZE);
        memory_map.push(MemoryMapKind::PerfCounters, PERF_COUNTERS_IO_BASE, PERF_COUNTERS_IO_SIZE);

        let windows: Vec<WindowHandle> = (0..CMP_NUM_WINDOWS).map(|_| mem.create_window()).collect();

        let mut accel = Accelerator::new();
        accel.set_isa(isa);
        accel.set_vector_len(vlen);
        accel.set_vector_elem_len(CORE_ELEN);
        accel.set_num_harts(crate::NUM_HARTS_PER_CORE);
        accel.set_profiling_enabled(read_profile_level() > 2);

        let hart_local = HartLocalLayout {
            base: TCDM_HART_BASE,
            stride: TCDM_HART_SIZE / crate::NUM_HARTS_PER_CORE as u64,
        };
        let io = IoRanges { dma_io_base: DMA_IO_BASE, perf_io_base: PERF_COUNTERS_IO_BASE };

        let cmp = CommandProcessor::new(mem, accel, windows.clone(), hart_local, io);

        MDevice { cmp, alloc: Allocator::new(DRAM_BASE, DRAM_SIZE), memory_map, windows }
    }

    /// `initialize`: materialise the simulator backing the command
    /// processor's accelerator. Window programming happens later, over the
    /// command-buffer protocol, once a caller has an ELF loaded and knows
    /// where to point the windows.
    pub fn initialize(&mut self) -> DeviceResult<()> {
        self.cmp.with_accel_mut(|accel| accel.create_sim());
        Ok(())
    }

    pub fn num_windows(&self) -> usize {
        self.windows.len()
    }

    pub fn query_device_info(&self) -> DeviceInfo {
        self.cmp.with_accel(|accel| DeviceInfo {
            family: SocFamily::M,
            num_cores: crate::NUM_CORES,
            num_harts_per_core: accel.num_harts(),
            num_memory_map_entries: self.memory_map.entries().len(),
            core_isa: accel.isa().to_string(),
            core_vlen: accel.vector_len(),
            core_elen: accel.vector_elem_len(),
        })
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

    pub fn read_device_memory(&self, dest: &mut [u8], addr: u64, unit: UnitId) -> bool {
        let len = dest.len() as u64;
        self.cmp.with_memory(|mem| mem.load(addr, len, dest, unit))
    }

    pub fn write_device_memory(&self, addr: u64, data: &[u8], unit: UnitId) -> bool {
        self.cmp.with_memory(|mem| mem.store(addr, data.len() as u64, data, unit))
    }

    /// Direct access to the underlying command processor, for `refsi-hal`'s
    /// command-buffer assembly (window setup, ROM staging, kernel launch).
    pub fn command_processor(&self) -> &CommandProcessor {
        &self.cmp
    }

    /// `executeCommandBuffer`: queue a command buffer for the worker thread,
    /// starting it on first use.
    pub fn execute_command_buffer(&self, command_buffer_addr: u64, command_buffer_size: u64) {
        self.cmp.enqueue_request(CommandRequest { command_buffer_addr, command_buffer_size });
    }

    /// `waitForDeviceIdle`.
    pub fn wait_for_device_idle(&self) {
        self.cmp.wait_empty_queue();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_reserves_all_eight_command_processor_windows() {
        let mut dev = MDevice::new(REFSI_ISA, 128);
        dev.initialize().unwrap();
        assert_eq!(dev.num_windows(), CMP_NUM_WINDOWS);
    }

    #[test]
    fn direct_read_write_bypasses_the_command_buffer_protocol() {
        let mut dev = MDevice::new(REFSI_ISA, 128);
        dev.initialize().unwrap();
        assert!(dev.write_device_memory(TCDM_BASE, &[1, 2, 3, 4], UnitId::External));
        let mut out = [0u8; 4];
        assert!(dev.read_device_memory(&mut out, TCDM_BASE, UnitId::External));
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn query_device_info_reports_m_family() {
        let mut dev = MDevice::new(REFSI_ISA, 128);
        dev.initialize().unwrap();
        let info = dev.query_device_info();
        assert_eq!(info.family, SocFamily::M);
        assert_eq!(info.core_isa, REFSI_ISA);
    }
}
