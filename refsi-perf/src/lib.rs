//! Performance counters (component G): a memory-mapped register bank split
//! into per-hart counters (read/written through an external CSR source,
//! since harts own their own counters) and global counters (owned directly
//! by this device).

use refsi_addr::{UnitId, UnitKind};

pub const NUM_PER_HART_COUNTERS: usize = 32;
pub const NUM_GLOBAL_COUNTERS: usize = 32;
pub const NUM_COUNTERS: usize = NUM_PER_HART_COUNTERS + NUM_GLOBAL_COUNTERS;

/// Per-hart counters live behind hart-local CSR-like state that this crate
/// doesn't own (that's the accelerator's job); a source is handed in so
/// `refsi-perf` never depends on `refsi-accel`.
pub trait HartCounterSource {
    fn read_hart_counter(&self, counter_idx: usize, hart: u16) -> Option<u64>;
    fn write_hart_counter(&mut self, counter_idx: usize, hart: u16, value: u64) -> bool;
}

fn decode_index(rel_addr: u64) -> Option<(usize, bool)> {
    if rel_addr % 8 != 0 {
        return None;
    }
    let abs_idx = (rel_addr / 8) as usize;
    if abs_idx < NUM_PER_HART_COUNTERS {
        Some((abs_idx, true))
    } else {
        let idx = abs_idx - NUM_PER_HART_COUNTERS;
        if idx < NUM_GLOBAL_COUNTERS {
            Some((idx, false))
        } else {
            None
        }
    }
}

/// Memory device exposing [`NUM_COUNTERS`] 64-bit counters at a fixed I/O
/// region. The per-hart half of the address range is only accessible to
/// `AccHart` units; the global half is shared.
pub struct PerfCounterDevice {
    global_counters: [u64; NUM_GLOBAL_COUNTERS],
}

impl PerfCounterDevice {
    pub fn new() -> PerfCounterDevice {
        PerfCounterDevice {
            global_counters: [0; NUM_GLOBAL_COUNTERS],
        }
    }

    pub fn mem_size(&self) -> u64 {
        (NUM_COUNTERS * 8) as u64
    }

    fn load_one(&self, source: &dyn HartCounterSource, addr: u64, unit: UnitId) -> Option<u64> {
        let (idx, is_per_hart) = decode_index(addr)?;
        if is_per_hart {
            if unit.kind() != UnitKind::AccHart {
                return None;
            }
            source.read_hart_counter(idx, unit.hart_index()?)
        } else {
            Some(self.global_counters[idx])
        }
    }

    /// Multi-counter reads (`len > 8`) read each 8-byte counter in turn;
    /// single reads may additionally be truncated to the low 32 bits.
    pub fn load(&self, source: &dyn HartCounterSource, addr: u64, len: u64, out: &mut [u8], unit: UnitId) -> bool {
        if len > 8 {
            if len % 8 != 0 {
                return false;
            }
            let mut off = 0;
            while off < len {
                if !self.load(source, addr + off, 8, &mut out[off as usize..], unit) {
                    return false;
                }
                off += 8;
            }
            return true;
        }
        let val = match self.load_one(source, addr, unit) {
            Some(v) => v,
            None => return false,
        };
        match len {
            8 => out[..8].copy_from_slice(&val.to_le_bytes()),
            4 => out[..4].copy_from_slice(&(val as u32).to_le_bytes()),
            _ => return false,
        }
        true
    }

    /// Multi-counter writes are not supported, matching the hardware's
    /// single-register write port.
    pub fn store(&mut self, source: &mut dyn HartCounterSource, addr: u64, len: u64, data: &[u8], unit: UnitId) -> bool {
        if len != 4 && len != 8 {
            return false;
        }
        let (idx, is_per_hart) = match decode_index(addr) {
            Some(v) => v,
            None => return false,
        };
        let val = if len == 8 {
            u64::from_le_bytes(data[..8].try_into().unwrap())
        } else {
            u32::from_le_bytes(data[..4].try_into().unwrap()) as u64
        };
        if is_per_hart {
            if unit.kind() != UnitKind::AccHart {
                return false;
            }
            let hart = match unit.hart_index() {
                Some(h) => h,
                None => return false,
            };
            source.write_hart_counter(idx, hart, val)
        } else {
            self.global_counters[idx] = val;
            true
        }
    }
}

impl Default for PerfCounterDevice {
    fn default() -> Self {
        PerfCounterDevice::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeHarts(HashMap<(usize, u16), u64>);

    impl HartCounterSource for FakeHarts {
        fn read_hart_counter(&self, counter_idx: usize, hart: u16) -> Option<u64> {
            Some(*self.0.get(&(counter_idx, hart)).unwrap_or(&0))
        }
        fn write_hart_counter(&mut self, counter_idx: usize, hart: u16, value: u64) -> bool {
            self.0.insert((counter_idx, hart), value);
            true
        }
    }

    #[test]
    fn global_counters_round_trip() {
        let mut dev = PerfCounterDevice::new();
        let mut harts = FakeHarts(HashMap::new());
        let addr = (NUM_PER_HART_COUNTERS as u64) * 8;
        assert!(dev.store(&mut harts, addr, 8, &42u64.to_le_bytes(), UnitId::External));
        let mut out = [0u8; 8];
        assert!(dev.load(&harts, addr, 8, &mut out, UnitId::External));
        assert_eq!(u64::from_le_bytes(out), 42);
    }

    #[test]
    fn per_hart_counters_require_acc_hart_unit_and_route_through_source() {
        let dev = PerfCounterDevice::new();
        let mut harts = FakeHarts(HashMap::new());
        assert!(dev.store(&mut harts, 0, 8, &7u64.to_le_bytes(), UnitId::AccHart(2)));
        let mut out = [0u8; 8];
        assert!(dev.load(&harts, 0, 8, &mut out, UnitId::AccHart(2)));
        assert_eq!(u64::from_le_bytes(out), 7);
        assert!(!dev.load(&harts, 0, 8, &mut out, UnitId::External));
    }

    #[test]
    fn thirty_two_bit_access_truncates_to_low_word() {
        let mut dev = PerfCounterDevice::new();
        let mut harts = FakeHarts(HashMap::new());
        let addr = (NUM_PER_HART_COUNTERS as u64) * 8;
        assert!(dev.store(&mut harts, addr, 8, &0x1_0000_0002u64.to_le_bytes(), UnitId::External));
        let mut out = [0u8; 4];
        assert!(dev.load(&harts, addr, 4, &mut out, UnitId::External));
        assert_eq!(u32::from_le_bytes(out), 2);
    }

    #[test]
    fn misaligned_access_is_rejected() {
        let dev = PerfCounterDevice::new();
        let harts = FakeHarts(HashMap::new());
        let mut out = [0u8; 8];
        assert!(!dev.load(&harts, 3, 8, &mut out, UnitId::External));
    }
}
