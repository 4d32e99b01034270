use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("DRAM exhausted allocating {0} bytes")]
    OutOfMemory(u64),
    #[error("memory window could not be configured")]
    Window(#[from] refsi_mem::MemError),
    #[error(transparent)]
    Accel(#[from] refsi_accel::AccelError),
    #[error("device memory access out of range at {0:#x}")]
    AccessFailed(u64),
}

pub type DeviceResult<T> = Result<T, DeviceError>;
