//! Device address and execution-unit identifier primitives shared by every
//! other `refsi-*` crate.
//!
//! Nothing here owns memory or performs I/O: this crate is the leaf of the
//! dependency graph, holding only the small tagged types that every memory
//! request in the simulator carries along with it.

use std::fmt;

/// A 64-bit device-physical address.
///
/// Arithmetic on `DeviceAddr` is unsigned and never wraps silently: both
/// [`DeviceAddr::checked_add`] and [`DeviceAddr::checked_sub`] return `None`
/// on overflow/underflow rather than wrapping, since a wrapped address would
/// otherwise decode to an unrelated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct DeviceAddr(pub u64);

impl DeviceAddr {
    pub const NULL: DeviceAddr = DeviceAddr(0);

    pub fn checked_add(self, rhs: u64) -> Option<DeviceAddr> {
        self.0.checked_add(rhs).map(DeviceAddr)
    }

    pub fn checked_sub(self, rhs: DeviceAddr) -> Option<u64> {
        self.0.checked_sub(rhs.0)
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for DeviceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl From<u64> for DeviceAddr {
    fn from(v: u64) -> Self {
        DeviceAddr(v)
    }
}

impl From<DeviceAddr> for u64 {
    fn from(v: DeviceAddr) -> Self {
        v.0
    }
}

/// Kind tag of an execution unit, as it appears in the high byte of the
/// wire-encoded [`UnitId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UnitKind {
    Any = 0,
    External = 1,
    Cmp = 2,
    AccCore = 3,
    AccHart = 4,
}

impl UnitKind {
    fn from_u8(v: u8) -> Option<UnitKind> {
        Some(match v {
            0 => UnitKind::Any,
            1 => UnitKind::External,
            2 => UnitKind::Cmp,
            3 => UnitKind::AccCore,
            4 => UnitKind::AccHart,
            _ => return None,
        })
    }
}

/// Identifies the execution unit issuing a memory request.
///
/// Per-hart-scoped devices (hart-local storage, per-hart DMA registers,
/// per-hart performance counters) key their storage off the `index` carried
/// by `AccHart`, so the same address returns different contents depending on
/// which unit asks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitId {
    /// No particular unit; used when a request's origin doesn't matter.
    Any,
    /// The host, issuing DMA or direct memory requests.
    External,
    /// The command processor.
    Cmp,
    /// A RISC-V accelerator core (a group of harts).
    AccCore(u16),
    /// A single RISC-V accelerator hart.
    AccHart(u16),
}

impl UnitId {
    /// Wire encoding: `index` in bits `[0, 16)`, `kind` in bits `[16, 24)`.
    pub fn encode(self) -> u32 {
        let (kind, index) = match self {
            UnitId::Any => (UnitKind::Any, 0),
            UnitId::External => (UnitKind::External, 0),
            UnitId::Cmp => (UnitKind::Cmp, 0),
            UnitId::AccCore(i) => (UnitKind::AccCore, i),
            UnitId::AccHart(i) => (UnitKind::AccHart, i),
        };
        (index as u32) | ((kind as u32) << 16)
    }

    pub fn decode(raw: u32) -> UnitId {
        let index = (raw & 0xffff) as u16;
        let kind = ((raw >> 16) & 0xff) as u8;
        match UnitKind::from_u8(kind) {
            Some(UnitKind::Any) => UnitId::Any,
            Some(UnitKind::External) => UnitId::External,
            Some(UnitKind::Cmp) => UnitId::Cmp,
            Some(UnitKind::AccCore) => UnitId::AccCore(index),
            Some(UnitKind::AccHart) => UnitId::AccHart(index),
            None => UnitId::Any,
        }
    }

    pub fn kind(self) -> UnitKind {
        match self {
            UnitId::Any => UnitKind::Any,
            UnitId::External => UnitKind::External,
            UnitId::Cmp => UnitKind::Cmp,
            UnitId::AccCore(_) => UnitKind::AccCore,
            UnitId::AccHart(_) => UnitKind::AccHart,
        }
    }

    /// Hart index, if this unit identifies a single accelerator hart.
    pub fn hart_index(self) -> Option<u16> {
        match self {
            UnitId::AccHart(i) => Some(i),
            _ => None,
        }
    }

    pub fn is_hart(self) -> bool {
        matches!(self, UnitId::AccHart(_))
    }

    /// Human-readable form: `any`, `external`, `cmp`, `hart:<n>`, `core:<n>`,
    /// or a hex fallback for anything that doesn't decode cleanly.
    pub fn format(self) -> String {
        match self {
            UnitId::Any => "any".to_string(),
            UnitId::External => "external".to_string(),
            UnitId::Cmp => "cmp".to_string(),
            UnitId::AccCore(i) => format!("core:{i}"),
            UnitId::AccHart(i) => format!("hart:{i}"),
        }
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}
