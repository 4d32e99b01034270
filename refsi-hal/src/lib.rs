//! Bridges `hal_device`-shaped operations (load a program, find a kernel,
//! launch it over an nd-range, move memory) onto the two device families in
//! `refsi-device`. [`GHal`] drives a [`refsi_device::GDevice`] directly;
//! [`MHal`] drives a [`refsi_device::MDevice`] by assembling command buffers
//! for its command processor, mirroring the split between `refsi_hal_g1.cpp`
//! and `refsi_hal_m1.cpp` in the source this crate is based on.

mod argpack;
mod g;
mod m;
mod program;
mod riscv_encoder;
mod state;
mod types;

pub use g::GHal;
pub use m::MHal;
pub use program::{Kernel, Program};
pub use types::{HalArg, HalError, HalResult, NdRange, Status};
