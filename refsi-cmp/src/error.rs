use thiserror::Error;

use crate::regs::CmpOpcode;

#[derive(Debug, Error)]
pub enum CmpError {
    #[error("command buffer header at {0:#x} failed to decode")]
    BadHeader(u64),
    #[error("unrecognized opcode {0}")]
    BadOpcode(u32),
    #[error("{0:?} expected {2} chunks, got {1}")]
    WrongChunkCount(CmpOpcode, u32, u32),
    #[error("register index {0} is out of range")]
    BadRegister(usize),
    #[error("window index {0} is out of range")]
    BadWindow(usize),
    #[error("invalid window mode bits {0:#x}")]
    BadWindowMode(u64),
    #[error("memory access failed")]
    MemAccessFailed,
    #[error(transparent)]
    Window(#[from] refsi_mem::MemError),
    #[error(transparent)]
    Accel(#[from] refsi_accel::AccelError),
}

pub type CmpResult<T> = Result<T, CmpError>;
