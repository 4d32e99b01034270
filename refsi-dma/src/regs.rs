//! Register offsets and `DMACTRL` bitfields, mirroring the CMP's own
//! 8-byte-aligned register file convention (component K shares the layout).

pub const REG_DMACTRL: usize = 0x0;
pub const REG_DMASTARTSEQ: usize = 0x1;
pub const REG_DMADONESEQ: usize = 0x2;
pub const REG_DMASRCADDR: usize = 0x3;
pub const REG_DMADSTADDR: usize = 0x4;
/// `DMAXFERSIZE0..3`: row size, row count, plane count.
pub const REG_DMAXFERSIZE0: usize = 0x5;
/// `DMAXFERSRCSTRIDE0..2`: row stride, plane stride.
pub const REG_DMAXFERSRCSTRIDE0: usize = 0x8;
/// `DMAXFERDSTSTRIDE0..2`: row stride, plane stride.
pub const REG_DMAXFERDSTSTRIDE0: usize = 0xa;

pub const NUM_REGS: usize = 0x20;

pub const CTRL_START: u64 = 0x01;
pub const CTRL_DIM_1D: u64 = 0x10;
pub const CTRL_DIM_2D: u64 = 0x20;
pub const CTRL_DIM_3D: u64 = 0x30;
pub const CTRL_DIM_MASK: u64 = 0x30;
pub const CTRL_STRIDE_NONE: u64 = 0x00;
pub const CTRL_STRIDE_DST: u64 = 0x40;
pub const CTRL_STRIDE_SRC: u64 = 0x80;
pub const CTRL_STRIDE_BOTH: u64 = CTRL_STRIDE_DST | CTRL_STRIDE_SRC;
pub const CTRL_STRIDE_MASK: u64 = CTRL_STRIDE_BOTH;
