//! Device construction (component L): assembles a G-family or M-family
//! SoC's memory map, allocator and accelerator out of the lower-level
//! `refsi-*` crates, and records the resulting memory map for the HAL to
//! discover DRAM/TCDM/counter ranges from.

mod error;
mod g;
mod m;
pub mod memory_map;

pub use error::{DeviceError, DeviceResult};
pub use g::GDevice;
pub use m::MDevice;
pub use memory_map::{MemoryMap, MemoryMapEntry, MemoryMapKind};

pub const NUM_CORES: u32 = 1;
pub const NUM_HARTS_PER_CORE: u32 = 4;
pub const CORE_VLEN: u32 = 512;
pub const CORE_ELEN: u32 = 64;
pub const REFSI_ISA: &str = "RV64GCVZbc";

pub const TCDM_BASE: u64 = 0x1000_0000;
pub const TCDM_SIZE: u64 = 4 << 20;
pub const TCDM_HART_SIZE: u64 = 2 << 20;
pub const TCDM_HART_BASE: u64 = TCDM_BASE + TCDM_SIZE - TCDM_HART_SIZE;

pub const DMA_IO_BASE: u64 = 0x2000_2000;
pub const DMA_IO_SIZE: u64 = (refsi_dma::NUM_REGS * 8) as u64;

pub const PERF_COUNTERS_IO_BASE: u64 = 0x0201_00000;
pub const PERF_COUNTERS_IO_SIZE: u64 = (refsi_perf::NUM_COUNTERS * 8) as u64;

pub const DRAM_BASE: u64 = 0x4000_0000;
pub const DRAM_SIZE: u64 = 1u64 << 31;

/// Which RefSi SoC variant a device was built as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocFamily {
    G,
    M,
}

/// Mirrors `refsi_device_info_t`: the fixed device-description fields the
/// HAL surfaces to a host compute runtime.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub family: SocFamily,
    pub num_cores: u32,
    pub num_harts_per_core: u32,
    pub num_memory_map_entries: usize,
    pub core_isa: String,
    pub core_vlen: u32,
    pub core_elen: u32,
}

fn read_env_debug(var: &str) -> bool {
    match std::env::var(var) {
        Ok(val) => val != "0",
        Err(_) => false,
    }
}

/// `REFSI_DEBUG`, read once at construction per family, matching the
/// original's `RefSiDevice` base-class constructor.
pub fn debug_enabled() -> bool {
    read_env_debug("REFSI_DEBUG")
}

fn read_profile_level() -> i32 {
    std::env::var("CA_PROFILE_LEVEL")
        .ok()
        .and_then(|v| v.parse::<i32>().ok())
        .unwrap_or(0)
}
