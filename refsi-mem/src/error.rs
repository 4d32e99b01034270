use refsi_addr::DeviceAddr;
use thiserror::Error;

/// Failures raised by the memory fabric (component D/E). Most per-byte
/// `load`/`store` failures are plain booleans per spec — this enum is for
/// the handful of operations (`add`, window reconfiguration) whose failure
/// mode benefits from being distinguishable by callers and log output.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemError {
    #[error("device range at {0} overlaps an existing device")]
    Overlap(DeviceAddr),
    #[error("no device registered at {0}")]
    NoDevice(DeviceAddr),
    #[error("window target {0} does not resolve to any device")]
    TargetUnresolved(DeviceAddr),
    #[error("window target {0} resolves to another window (cycle)")]
    TargetIsWindow(DeviceAddr),
    #[error("window mode must be Shared or PerHart")]
    InvalidMode,
    #[error("unknown window handle {0}")]
    BadWindowHandle(usize),
}

pub type MemResult<T> = Result<T, MemError>;
