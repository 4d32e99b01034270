//! The memory-map bookkeeping a device hands to the HAL so it can discover
//! where DRAM, TCDM and the counter/DMA register banks live, independent of
//! whether a given range is backed by a leaf device in the memory
//! controller's own arena.

/// Mirrors `refsi_memory_map_kind`; `KernelDma`/`TcdmPrivate` are declared
/// in the original enum but never produced by either device family's
/// construction and so have no variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryMapKind {
    Dram,
    Tcim,
    Tcdm,
    KernelDmaPrivate,
    PerfCounters,
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryMapEntry {
    pub kind: MemoryMapKind,
    pub start_addr: u64,
    pub size: u64,
}

/// Append-only, in insertion order: the HAL iterates it to find DRAM/TCDM/
/// counter ranges rather than looking them up by kind.
#[derive(Debug, Clone, Default)]
pub struct MemoryMap {
    entries: Vec<MemoryMapEntry>,
}

impl MemoryMap {
    pub fn new() -> MemoryMap {
        MemoryMap { entries: Vec::new() }
    }

    pub fn push(&mut self, kind: MemoryMapKind, start_addr: u64, size: u64) {
        self.entries.push(MemoryMapEntry { kind, start_addr, size });
    }

    pub fn entries(&self) -> &[MemoryMapEntry] {
        &self.entries
    }
}
