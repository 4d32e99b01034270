use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use refsi_addr::{UnitId, UnitKind};

/// Uniform capability set exposed by every memory device in the fabric.
///
/// The source's `MemoryDevice` → `MemoryDeviceBase` → concrete-device
/// hierarchy collapses here into one trait: `size` is the only required
/// operation, and the provided `load`/`store` route through `direct_ptr`
/// when available. Devices that need different policy (ROM's
/// unit-independent reads, file-backed devices with no pointer at all)
/// override `load`/`store` directly instead of relying on the default.
pub trait MemoryDevice: Send {
    /// Declared size in bytes, or `0` for variable-sized/composite devices
    /// (e.g. a nested [`crate::controller::MemoryController`]).
    fn size(&self) -> u64;

    /// A host-accessible slice backing `[offset, offset+len)`, if this
    /// device can hand one out to `unit`. I/O-style devices (performance
    /// counters, DMA registers) never can; ROM only can for the host unit.
    fn direct_ptr(&mut self, offset: u64, len: u64, unit: UnitId) -> Option<&mut [u8]>;

    /// Bounds-check against `size()` unless the device is variable-sized,
    /// then delegate to `direct_ptr`.
    fn load(&mut self, offset: u64, len: u64, out: &mut [u8], unit: UnitId) -> bool {
        if !self.in_bounds(offset, len) {
            return false;
        }
        match self.direct_ptr(offset, len, unit) {
            Some(src) => {
                out[..len as usize].copy_from_slice(&src[..len as usize]);
                true
            }
            None => false,
        }
    }

    fn store(&mut self, offset: u64, len: u64, data: &[u8], unit: UnitId) -> bool {
        if !self.in_bounds(offset, len) {
            return false;
        }
        match self.direct_ptr(offset, len, unit) {
            Some(dst) => {
                dst[..len as usize].copy_from_slice(&data[..len as usize]);
                true
            }
            None => false,
        }
    }

    fn in_bounds(&self, offset: u64, len: u64) -> bool {
        let size = self.size();
        size == 0 || offset.checked_add(len).is_some_and(|end| end <= size)
    }
}

/// Owns a zero-initialised byte buffer.
pub struct RamDevice {
    data: Vec<u8>,
}

impl RamDevice {
    pub fn new(size: u64) -> RamDevice {
        RamDevice {
            data: vec![0u8; size as usize],
        }
    }
}

impl MemoryDevice for RamDevice {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn direct_ptr(&mut self, offset: u64, len: u64, _unit: UnitId) -> Option<&mut [u8]> {
        let offset = offset as usize;
        let len = len as usize;
        if offset.checked_add(len)? <= self.data.len() {
            Some(&mut self.data[offset..offset + len])
        } else {
            None
        }
    }
}

/// Read-only memory seeded at construction time. Only the host (`External`)
/// unit gets a raw pointer (and so can write through the default `store`
/// path); any unit can read it, bypassing the pointer gating.
pub struct RomDevice {
    data: Vec<u8>,
}

impl RomDevice {
    pub fn new(data: Vec<u8>) -> RomDevice {
        RomDevice { data }
    }
}

impl MemoryDevice for RomDevice {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn direct_ptr(&mut self, offset: u64, len: u64, unit: UnitId) -> Option<&mut [u8]> {
        if unit.kind() != UnitKind::External {
            return None;
        }
        let offset = offset as usize;
        let len = len as usize;
        if offset.checked_add(len)? <= self.data.len() {
            Some(&mut self.data[offset..offset + len])
        } else {
            None
        }
    }

    fn load(&mut self, offset: u64, len: u64, out: &mut [u8], _unit: UnitId) -> bool {
        if !self.in_bounds(offset, len) {
            return false;
        }
        let offset = offset as usize;
        let len = len as usize;
        out[..len].copy_from_slice(&self.data[offset..offset + len]);
        true
    }
}

/// Lazily allocates a zero-initialised slice of storage per hart index.
/// Only `AccHart` units ever see a pointer into the memory.
pub struct HartLocalDevice {
    per_hart_size: u64,
    banks: HashMap<u16, Vec<u8>>,
}

impl HartLocalDevice {
    pub fn new(per_hart_size: u64) -> HartLocalDevice {
        HartLocalDevice {
            per_hart_size,
            banks: HashMap::new(),
        }
    }
}

impl MemoryDevice for HartLocalDevice {
    fn size(&self) -> u64 {
        self.per_hart_size
    }

    fn direct_ptr(&mut self, offset: u64, len: u64, unit: UnitId) -> Option<&mut [u8]> {
        let hart = unit.hart_index()?;
        let offset = offset as usize;
        let len = len as usize;
        if offset.checked_add(len)? as u64 > self.per_hart_size {
            return None;
        }
        let bank = self
            .banks
            .entry(hart)
            .or_insert_with(|| vec![0u8; self.per_hart_size as usize]);
        Some(&mut bank[offset..offset + len])
    }
}

/// Read-only view of a host file; bytes are fetched with positional reads,
/// never mapped through `direct_ptr`.
pub struct FileDevice {
    file: File,
    len: u64,
}

impl FileDevice {
    pub fn open(path: &std::path::Path) -> std::io::Result<FileDevice> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(FileDevice { file, len })
    }
}

impl MemoryDevice for FileDevice {
    fn size(&self) -> u64 {
        self.len
    }

    fn direct_ptr(&mut self, _offset: u64, _len: u64, _unit: UnitId) -> Option<&mut [u8]> {
        None
    }

    fn load(&mut self, offset: u64, len: u64, out: &mut [u8], _unit: UnitId) -> bool {
        if !self.in_bounds(offset, len) {
            return false;
        }
        if self.file.seek(SeekFrom::Start(offset)).is_err() {
            return false;
        }
        self.file.read_exact(&mut out[..len as usize]).is_ok()
    }

    fn store(&mut self, _offset: u64, _len: u64, _data: &[u8], _unit: UnitId) -> bool {
        false
    }
}

/// A writable, non-owning view of host memory. The caller is responsible
/// for keeping the backing allocation alive and exclusively accessed for as
/// long as the device lives — in this simulator that's guaranteed by the
/// device-wide lock (§5) serialising every access.
pub struct BufferDevice {
    ptr: *mut u8,
    len: u64,
}

// SAFETY: all access to `ptr` happens through `&mut self` methods, which the
// caller can only reach while holding the device-wide lock; the pointee is
// therefore never touched from two places at once despite the raw pointer.
unsafe impl Send for BufferDevice {}

impl BufferDevice {
    /// # Safety
    /// `ptr` must be valid for reads and writes of `len` bytes for as long
    /// as the returned device is alive.
    pub unsafe fn new(ptr: *mut u8, len: u64) -> BufferDevice {
        BufferDevice { ptr, len }
    }
}

impl MemoryDevice for BufferDevice {
    fn size(&self) -> u64 {
        self.len
    }

    fn direct_ptr(&mut self, offset: u64, len: u64, _unit: UnitId) -> Option<&mut [u8]> {
        if offset.checked_add(len)? > self.len {
            return None;
        }
        // SAFETY: bounds were just checked against `self.len`, and the
        // validity of `self.ptr` for this range is the constructor's invariant.
        unsafe { Some(std::slice::from_raw_parts_mut(self.ptr.add(offset as usize), len as usize)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_round_trips_bytes() {
        let mut ram = RamDevice::new(16);
        let data = [1u8, 2, 3, 4];
        assert!(ram.store(4, 4, &data, UnitId::External));
        let mut out = [0u8; 4];
        assert!(ram.load(4, 4, &mut out, UnitId::External));
        assert_eq!(out, data);
    }

    #[test]
    fn rom_rejects_writes_from_any_unit_without_direct_ptr_but_reads_always() {
        let mut rom = RomDevice::new(vec![0xaa; 8]);
        let mut out = [0u8; 4];
        assert!(rom.load(0, 4, &mut out, UnitId::AccHart(0)));
        assert_eq!(out, [0xaa; 4]);
        assert!(!rom.store(0, 4, &[0; 4], UnitId::AccHart(0)));
        assert!(rom.store(0, 4, &[0; 4], UnitId::External));
    }

    #[test]
    fn hart_local_isolates_banks_and_rejects_non_hart_units() {
        let mut dev = HartLocalDevice::new(64);
        assert!(dev.store(0, 1, &[0x11], UnitId::AccHart(0)));
        assert!(dev.store(0, 1, &[0x22], UnitId::AccHart(1)));
        let mut out = [0u8; 1];
        assert!(dev.load(0, 1, &mut out, UnitId::AccHart(0)));
        assert_eq!(out, [0x11]);
        assert!(dev.load(0, 1, &mut out, UnitId::AccHart(1)));
        assert_eq!(out, [0x22]);
        assert!(!dev.load(0, 1, &mut out, UnitId::External));
    }

    #[test]
    fn out_of_bounds_access_fails() {
        let mut ram = RamDevice::new(4);
        let mut out = [0u8; 4];
        assert!(!ram.load(2, 4, &mut out, UnitId::External));
    }
}
