//! The RefSi memory fabric: uniform memory devices (component C), the
//! address-decoding bus that composes them (component D), and the window
//! devices that virtually remap address ranges, including per-hart scaling
//! (component E).

mod controller;
mod device;
mod error;
mod window;

pub use controller::{MemoryController, WindowHandle};
pub use device::{BufferDevice, FileDevice, HartLocalDevice, MemoryDevice, RamDevice, RomDevice};
pub use error::{MemError, MemResult};
pub use window::{WindowConfig, WindowMode};
