use thiserror::Error;

/// Mirrors `hal::hal_status` / the source's `refsi_result`: callers get a
/// coarse pass/fail signal at the C ABI boundary, with the reason logged
/// at the point of failure rather than threaded back through the return
/// value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
    Success = 0,
    Failure = 1,
    InvalidDevice = 2,
    DeviceClosed = 3,
    NotSupported = 4,
}

#[derive(Debug, Error)]
pub enum HalError {
    #[error(transparent)]
    Device(#[from] refsi_device::DeviceError),
    #[error("device memory exhausted")]
    OutOfMemory,
    #[error("invalid program or kernel handle")]
    InvalidHandle,
    #[error("work-group size does not evenly divide the global range on dimension {0}")]
    UnevenWorkGroup(usize),
    #[error("work-group requires {0} harts, device only has {1}")]
    TooManyHarts(u32, u32),
    #[error("device memory access failed at {0:#x}")]
    AccessFailed(u64),
    #[error(transparent)]
    Elf(#[from] refsi_elf::ElfError),
}

pub type HalResult<T> = Result<T, HalError>;

impl From<HalError> for Status {
    fn from(err: HalError) -> Status {
        match err {
            HalError::InvalidHandle => Status::InvalidDevice,
            _ => Status::Failure,
        }
    }
}

/// Mirrors `hal::hal_arg_t`: either a plain value (POD kernel argument) or
/// a device address (buffer argument), tagged so the packer knows whether
/// to relocate it.
#[derive(Debug, Clone)]
pub enum HalArg {
    Value(Vec<u8>),
    Address(u64),
}

impl HalArg {
    pub fn size(&self) -> usize {
        match self {
            HalArg::Value(bytes) => bytes.len(),
            HalArg::Address(_) => 8,
        }
    }
}

/// Mirrors `hal::hal_ndrange_t`.
#[derive(Debug, Clone, Copy)]
pub struct NdRange {
    pub offset: [u64; 3],
    pub global: [u64; 3],
    pub local: [u64; 3],
}
