//! The DMA engine (component F): a memory-mapped register file driving
//! 1D/2D/3D strided transfers between arbitrary addresses in a
//! [`refsi_mem::MemoryController`]'s address space.

mod engine;
mod regs;

pub use engine::DmaEngine;
pub use regs::{
    CTRL_DIM_1D, CTRL_DIM_2D, CTRL_DIM_3D, CTRL_DIM_MASK, CTRL_START, CTRL_STRIDE_NONE, NUM_REGS,
    REG_DMACTRL, REG_DMADONESEQ, REG_DMADSTADDR, REG_DMASRCADDR, REG_DMASTARTSEQ,
    REG_DMAXFERDSTSTRIDE0, REG_DMAXFERSIZE0, REG_DMAXFERSRCSTRIDE0,
};
