use std::collections::HashMap;

use refsi_addr::UnitId;
use refsi_mem::MemoryController;

use crate::regs::*;

#[derive(Clone, Copy)]
struct Bank {
    regs: [u64; NUM_REGS],
}

impl Bank {
    fn new() -> Bank {
        Bank { regs: [0; NUM_REGS] }
    }
}

/// The DMA engine's memory-mapped register file plus the strided-transfer
/// logic triggered by a `DMACTRL` write with the start bit set.
///
/// Unlike the devices in `refsi-mem`, a transfer needs to read and write
/// memory *outside* the engine's own registers, so `store` takes the owning
/// [`MemoryController`] as an explicit parameter rather than pretending to
/// be an ordinary [`refsi_mem::MemoryDevice`] — the same cyclic-ownership
/// problem windows solve with an arena, solved here by not forcing the
/// engine into that arena in the first place. The device layer (component
/// L) is expected to special-case the DMA I/O range ahead of the generic
/// bus dispatch.
pub struct DmaEngine {
    banks: HashMap<UnitId, Bank>,
}

impl DmaEngine {
    pub fn new() -> DmaEngine {
        DmaEngine {
            banks: HashMap::new(),
        }
    }

    fn bank_mut(&mut self, unit: UnitId) -> &mut Bank {
        self.banks.entry(unit).or_insert_with(Bank::new)
    }

    fn decode(offset: u64, len: u64) -> Option<usize> {
        if offset % 8 != 0 || (len != 4 && len != 8) {
            return None;
        }
        let idx = (offset / 8) as usize;
        if idx >= NUM_REGS {
            return None;
        }
        Some(idx)
    }

    /// Read a register. Lazily-allocated banks read back as all zero, so no
    /// allocation is needed on a pure read.
    pub fn load(&self, unit: UnitId, offset: u64, len: u64, out: &mut [u8]) -> bool {
        let idx = match Self::decode(offset, len) {
            Some(idx) => idx,
            None => return false,
        };
        let mut val = self.banks.get(&unit).map(|b| b.regs[idx]).unwrap_or(0);
        if idx == REG_DMACTRL {
            // The start bit is write-only; it never reads back set.
            val &= !CTRL_START;
        }
        let bytes = val.to_le_bytes();
        out[..len as usize].copy_from_slice(&bytes[..len as usize]);
        true
    }

    pub fn store(
        &mut self,
        controller: &mut MemoryController,
        unit: UnitId,
        offset: u64,
        len: u64,
        data: &[u8],
    ) -> bool {
        let idx = match Self::decode(offset, len) {
            Some(idx) => idx,
            None => return false,
        };
        let mut bytes = [0u8; 8];
        bytes[..len as usize].copy_from_slice(&data[..len as usize]);
        let val = u64::from_le_bytes(bytes);

        match idx {
            REG_DMASTARTSEQ => false,
            REG_DMADONESEQ => {
                let last_done = self.bank_mut(unit).regs[REG_DMADONESEQ];
                val <= last_done
            }
            REG_DMACTRL => {
                self.bank_mut(unit).regs[REG_DMACTRL] = val;
                if val & CTRL_START != 0 {
                    self.trigger(controller, unit, val)
                } else {
                    true
                }
            }
            _ => {
                self.bank_mut(unit).regs[idx] = val;
                true
            }
        }
    }

    fn trigger(&mut self, controller: &mut MemoryController, unit: UnitId, ctrl: u64) -> bool {
        let regs = self.bank_mut(unit).regs;
        let dim = ctrl & CTRL_DIM_MASK;
        let stride_mode = ctrl & CTRL_STRIDE_MASK;

        let src = regs[REG_DMASRCADDR];
        let dst = regs[REG_DMADSTADDR];
        let row = regs[REG_DMAXFERSIZE0];
        let rows = regs[REG_DMAXFERSIZE0 + 1];
        let planes = regs[REG_DMAXFERSIZE0 + 2];

        let empty = match dim {
            CTRL_DIM_1D => row == 0,
            CTRL_DIM_2D => row == 0 || rows == 0,
            CTRL_DIM_3D => row == 0 || rows == 0 || planes == 0,
            _ => return false,
        };
        if empty {
            // No bytes move; the transfer id is left untouched (resolved
            // open question: this holds for 1D/2D/3D alike).
            return true;
        }

        // Strides default to a contiguous layout and are only pulled from
        // the stride registers when the matching `CTRL_STRIDE_SRC`/`DST`
        // bit is set in `DMACTRL`.
        let ok = match dim {
            CTRL_DIM_1D => {
                if stride_mode != CTRL_STRIDE_NONE {
                    return false;
                }
                controller.copy(dst, src, row, unit)
            }
            CTRL_DIM_2D => {
                let src_row_stride = if stride_mode & CTRL_STRIDE_SRC != 0 {
                    regs[REG_DMAXFERSRCSTRIDE0]
                } else {
                    row
                };
                let dst_row_stride = if stride_mode & CTRL_STRIDE_DST != 0 {
                    regs[REG_DMAXFERDSTSTRIDE0]
                } else {
                    row
                };
                transfer_2d(controller, unit, src, dst, row, rows, stride_mode, src_row_stride, dst_row_stride)
            }
            CTRL_DIM_3D => {
                let src_row_stride = if stride_mode & CTRL_STRIDE_SRC != 0 {
                    regs[REG_DMAXFERSRCSTRIDE0]
                } else {
                    row
                };
                let src_plane_stride = if stride_mode & CTRL_STRIDE_SRC != 0 {
                    regs[REG_DMAXFERSRCSTRIDE0 + 1]
                } else {
                    rows
                };
                let dst_row_stride = if stride_mode & CTRL_STRIDE_DST != 0 {
                    regs[REG_DMAXFERDSTSTRIDE0]
                } else {
                    row
                };
                let dst_plane_stride = if stride_mode & CTRL_STRIDE_DST != 0 {
                    regs[REG_DMAXFERDSTSTRIDE0 + 1]
                } else {
                    rows
                };
                transfer_3d(
                    controller,
                    unit,
                    src,
                    dst,
                    row,
                    rows,
                    planes,
                    stride_mode,
                    src_row_stride,
                    src_plane_stride,
                    dst_row_stride,
                    dst_plane_stride,
                )
            }
            _ => false,
        };
        if !ok {
            return false;
        }

        let bank = self.bank_mut(unit);
        let new_id = bank.regs[REG_DMASTARTSEQ] + 1;
        bank.regs[REG_DMASTARTSEQ] = new_id;
        bank.regs[REG_DMADONESEQ] = new_id;
        true
    }
}

impl Default for DmaEngine {
    fn default() -> Self {
        DmaEngine::new()
    }
}

/// A source stride supplied via `CTRL_STRIDE_SRC` may be `0` (broadcast the
/// same row repeatedly); a destination stride supplied via `CTRL_STRIDE_DST`
/// must always advance past a full row. Strides left at their default
/// (neither bit set) are always contiguous and never validated.
fn transfer_2d(
    controller: &mut MemoryController,
    unit: UnitId,
    src: u64,
    dst: u64,
    row: u64,
    rows: u64,
    stride_mode: u64,
    src_stride: u64,
    dst_stride: u64,
) -> bool {
    if stride_mode & CTRL_STRIDE_SRC != 0 && src_stride < row && src_stride != 0 {
        return false;
    }
    if stride_mode & CTRL_STRIDE_DST != 0 && dst_stride < row {
        return false;
    }
    let mut src_mem = src;
    let mut dst_mem = dst;
    for _ in 0..rows {
        let soff = if src_stride == 0 { 0 } else { src_stride };
        if !controller.copy(dst_mem, src_mem, row, unit) {
            return false;
        }
        dst_mem = dst_mem.wrapping_add(dst_stride);
        src_mem = src_mem.wrapping_add(soff);
    }
    true
}

/// Unlike [`transfer_2d`], neither axis gets a zero-stride broadcast
/// exception here: a stride supplied via `CTRL_STRIDE_SRC`/`CTRL_STRIDE_DST`
/// must always be at least as large as the extent it strides over.
#[allow(clippy::too_many_arguments)]
fn transfer_3d(
    controller: &mut MemoryController,
    unit: UnitId,
    src: u64,
    dst: u64,
    row: u64,
    rows: u64,
    planes: u64,
    stride_mode: u64,
    src_row_stride: u64,
    src_plane_stride: u64,
    dst_row_stride: u64,
    dst_plane_stride: u64,
) -> bool {
    if stride_mode & CTRL_STRIDE_SRC != 0 && (src_row_stride < row || src_plane_stride < rows) {
        return false;
    }
    if stride_mode & CTRL_STRIDE_DST != 0 && (dst_row_stride < row || dst_plane_stride < rows) {
        return false;
    }
    let mut src_mem = src;
    let mut dst_mem = dst;
    for _ in 0..planes {
        for _ in 0..rows {
            if !controller.copy(dst_mem, src_mem, row, unit) {
                return false;
            }
            dst_mem = dst_mem.wrapping_add(dst_row_stride);
            src_mem = src_mem.wrapping_add(src_row_stride);
        }
        dst_mem = dst_mem.wrapping_add(dst_plane_stride).wrapping_sub(rows.wrapping_mul(dst_row_stride));
        src_mem = src_mem.wrapping_add(src_plane_stride).wrapping_sub(rows.wrapping_mul(src_row_stride));
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use refsi_mem::{MemoryDevice, RamDevice};

    fn setup() -> MemoryController {
        let mut ctl = MemoryController::new();
        ctl.add(0x1000, Box::new(RamDevice::new(0x200))).unwrap();
        ctl.add(0x2000, Box::new(RamDevice::new(0x200))).unwrap();
        ctl
    }

    fn write_reg(engine: &mut DmaEngine, ctl: &mut MemoryController, unit: UnitId, idx: usize, val: u64) {
        assert!(engine.store(ctl, unit, (idx as u64) * 8, 8, &val.to_le_bytes()));
    }

    fn read_reg(engine: &DmaEngine, unit: UnitId, idx: usize) -> u64 {
        let mut out = [0u8; 8];
        assert!(engine.load(unit, (idx as u64) * 8, 8, &mut out));
        u64::from_le_bytes(out)
    }

    #[test]
    fn one_d_transfer_moves_bytes_and_bumps_sequence() {
        let mut ctl = setup();
        let src: Vec<u8> = (0..16u8).collect();
        ctl.store(0x1000, 16, &src, UnitId::External);

        let mut engine = DmaEngine::new();
        let unit = UnitId::External;
        write_reg(&mut engine, &mut ctl, unit, REG_DMASRCADDR, 0x1000);
        write_reg(&mut engine, &mut ctl, unit, REG_DMADSTADDR, 0x2000);
        write_reg(&mut engine, &mut ctl, unit, REG_DMAXFERSIZE0, 16);
        write_reg(&mut engine, &mut ctl, unit, REG_DMACTRL, CTRL_DIM_1D | CTRL_START);

        let mut out = [0u8; 16];
        ctl.load(0x2000, 16, &mut out, UnitId::External);
        assert_eq!(&out[..], &src[..]);
        assert_eq!(read_reg(&engine, unit, REG_DMASTARTSEQ), 1);
        assert_eq!(read_reg(&engine, unit, REG_DMADONESEQ), 1);
    }

    #[test]
    fn empty_one_d_transfer_short_circuits_without_bumping_sequence() {
        let mut ctl = setup();
        let mut engine = DmaEngine::new();
        let unit = UnitId::External;
        write_reg(&mut engine, &mut ctl, unit, REG_DMAXFERSIZE0, 0);
        write_reg(&mut engine, &mut ctl, unit, REG_DMACTRL, CTRL_DIM_1D | CTRL_START);
        assert_eq!(read_reg(&engine, unit, REG_DMASTARTSEQ), 0);
    }

    #[test]
    fn two_d_transfer_scatters_source_into_contiguous_destination() {
        let mut ctl = setup();
        let src: Vec<u8> = (0..128u8).collect();
        ctl.store(0x1000, 128, &src, UnitId::External);

        let mut engine = DmaEngine::new();
        let unit = UnitId::External;
        write_reg(&mut engine, &mut ctl, unit, REG_DMASRCADDR, 0x1000);
        write_reg(&mut engine, &mut ctl, unit, REG_DMADSTADDR, 0x2000);
        write_reg(&mut engine, &mut ctl, unit, REG_DMAXFERSIZE0, 16);
        write_reg(&mut engine, &mut ctl, unit, REG_DMAXFERSIZE0 + 1, 4);
        write_reg(&mut engine, &mut ctl, unit, REG_DMAXFERSRCSTRIDE0, 32);
        write_reg(&mut engine, &mut ctl, unit, REG_DMAXFERDSTSTRIDE0, 16);
        write_reg(&mut engine, &mut ctl, unit, REG_DMACTRL, CTRL_DIM_2D | CTRL_STRIDE_BOTH | CTRL_START);

        let mut out = [0u8; 64];
        ctl.load(0x2000, 64, &mut out, UnitId::External);
        let mut expected = Vec::new();
        for row in 0..4u64 {
            expected.extend_from_slice(&src[(row * 32) as usize..(row * 32 + 16) as usize]);
        }
        assert_eq!(&out[..], &expected[..]);
        assert_eq!(read_reg(&engine, unit, REG_DMASTARTSEQ), 1);
    }

    #[test]
    fn two_d_contiguous_transfer_ignores_stale_stride_registers() {
        // With neither CTRL_STRIDE_SRC nor CTRL_STRIDE_DST set, the stride
        // registers (left at their power-on default of 0 here) are never
        // consulted; both sides default to a contiguous row.
        let mut ctl = setup();
        let src: Vec<u8> = (0..64u8).collect();
        ctl.store(0x1000, 64, &src, UnitId::External);

        let mut engine = DmaEngine::new();
        let unit = UnitId::External;
        write_reg(&mut engine, &mut ctl, unit, REG_DMASRCADDR, 0x1000);
        write_reg(&mut engine, &mut ctl, unit, REG_DMADSTADDR, 0x2000);
        write_reg(&mut engine, &mut ctl, unit, REG_DMAXFERSIZE0, 16);
        write_reg(&mut engine, &mut ctl, unit, REG_DMAXFERSIZE0 + 1, 4);
        write_reg(&mut engine, &mut ctl, unit, REG_DMAXFERSRCSTRIDE0, 0);
        write_reg(&mut engine, &mut ctl, unit, REG_DMAXFERDSTSTRIDE0, 0);
        assert!(engine.store(
            &mut ctl,
            unit,
            (REG_DMACTRL as u64) * 8,
            8,
            &(CTRL_DIM_2D | CTRL_START).to_le_bytes()
        ));

        let mut out = [0u8; 64];
        ctl.load(0x2000, 64, &mut out, UnitId::External);
        assert_eq!(&out[..], &src[..]);
    }

    #[test]
    fn two_d_rejects_destination_stride_smaller_than_row() {
        let mut ctl = setup();
        let mut engine = DmaEngine::new();
        let unit = UnitId::External;
        write_reg(&mut engine, &mut ctl, unit, REG_DMASRCADDR, 0x1000);
        write_reg(&mut engine, &mut ctl, unit, REG_DMADSTADDR, 0x2000);
        write_reg(&mut engine, &mut ctl, unit, REG_DMAXFERSIZE0, 16);
        write_reg(&mut engine, &mut ctl, unit, REG_DMAXFERSIZE0 + 1, 4);
        write_reg(&mut engine, &mut ctl, unit, REG_DMAXFERDSTSTRIDE0, 8);
        assert!(!engine.store(
            &mut ctl,
            unit,
            (REG_DMACTRL as u64) * 8,
            8,
            &(CTRL_DIM_2D | CTRL_STRIDE_DST | CTRL_START).to_le_bytes()
        ));
    }

    #[test]
    fn one_d_rejects_stride_mode() {
        let mut ctl = setup();
        let mut engine = DmaEngine::new();
        let unit = UnitId::External;
        write_reg(&mut engine, &mut ctl, unit, REG_DMASRCADDR, 0x1000);
        write_reg(&mut engine, &mut ctl, unit, REG_DMADSTADDR, 0x2000);
        write_reg(&mut engine, &mut ctl, unit, REG_DMAXFERSIZE0, 16);
        assert!(!engine.store(
            &mut ctl,
            unit,
            (REG_DMACTRL as u64) * 8,
            8,
            &(CTRL_DIM_1D | CTRL_STRIDE_SRC | CTRL_START).to_le_bytes()
        ));
    }

    #[test]
    fn dmastartseq_is_read_only() {
        let mut ctl = setup();
        let mut engine = DmaEngine::new();
        assert!(!engine.store(&mut ctl, UnitId::External, (REG_DMASTARTSEQ as u64) * 8, 8, &1u64.to_le_bytes()));
    }

    #[test]
    fn dmadoneseq_write_blocks_until_threshold_reached() {
        let mut ctl = setup();
        let mut engine = DmaEngine::new();
        let unit = UnitId::External;
        assert!(!engine.store(&mut ctl, unit, (REG_DMADONESEQ as u64) * 8, 8, &1u64.to_le_bytes()));

        write_reg(&mut engine, &mut ctl, unit, REG_DMAXFERSIZE0, 4);
        write_reg(&mut engine, &mut ctl, unit, REG_DMASRCADDR, 0x1000);
        write_reg(&mut engine, &mut ctl, unit, REG_DMADSTADDR, 0x2000);
        write_reg(&mut engine, &mut ctl, unit, REG_DMACTRL, CTRL_DIM_1D | CTRL_START);

        assert!(engine.store(&mut ctl, unit, (REG_DMADONESEQ as u64) * 8, 8, &1u64.to_le_bytes()));
    }
}
