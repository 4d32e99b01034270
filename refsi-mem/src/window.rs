/// Addressing mode of a memory window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMode {
    /// Every unit sees the same underlying range.
    Shared,
    /// Unit `AccHart(h)` sees the underlying range offset by `h * scale`.
    PerHart,
}

/// The pending (and, once enabled, active) configuration of a window, as
/// last written through the CMP register protocol (§4.E/§4.K).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowConfig {
    pub active: bool,
    pub mode: WindowMode,
    /// Window's own base address in the controller's address space.
    pub base: u64,
    /// Address of the range this window remaps to.
    pub target: u64,
    pub size: u64,
    /// `PerHart` stride; meaningless in `Shared` mode.
    pub scale: u64,
}

impl Default for WindowConfig {
    fn default() -> WindowConfig {
        WindowConfig {
            active: false,
            mode: WindowMode::Shared,
            base: 0,
            target: 0,
            size: 0,
            scale: 0,
        }
    }
}

impl WindowConfig {
    /// Decode the two-subfield scale encoding used by the CMP's scale
    /// register: `scale = (1 << (a-1)) * (b+1)` when `a != 0`, else `0`.
    pub fn decode_scale(a: u32, b: u32) -> u64 {
        if a == 0 {
            0
        } else {
            (1u64 << (a - 1)) * (b as u64 + 1)
        }
    }

    /// Whether `other` differs from `self` in any field that forces a
    /// disable+reenable cycle (§4.E: size, mode, scale, base, target).
    pub fn differs_from(&self, other: &WindowConfig) -> bool {
        self.size != other.size
            || self.mode != other.mode
            || self.scale != other.scale
            || self.base != other.base
            || self.target != other.target
    }
}

/// The snapshot recorded the last time a window was successfully inserted
/// into its controller. `load`/`store` consult this, never the (possibly
/// newer, not-yet-applied) pending [`WindowConfig`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct MappedWindow {
    pub target_index: usize,
    pub mapped_offset: u64,
    pub size: u64,
    pub mode: WindowMode,
    pub scale: u64,
}

/// A window's state as held in the controller's device arena: its pending
/// configuration plus (if enabled) the resolved mapping. Kept in the arena
/// at a stable index regardless of whether it is currently inserted into
/// the address map, so reconfiguration never invalidates other entries'
/// indices (§9 "Cyclic ownership").
pub struct WindowSlot {
    pub config: WindowConfig,
    pub(crate) mapped: Option<MappedWindow>,
    /// The exact config in effect when `mapped` was last set; compared
    /// against incoming writes to decide whether a remap is needed.
    pub(crate) mapped_config: Option<WindowConfig>,
}

impl WindowSlot {
    pub fn new() -> WindowSlot {
        WindowSlot {
            config: WindowConfig::default(),
            mapped: None,
            mapped_config: None,
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    pub fn config(&self) -> WindowConfig {
        self.config
    }

    pub(crate) fn mapped_config(&self) -> Option<WindowConfig> {
        self.mapped_config
    }
}

impl Default for WindowSlot {
    fn default() -> Self {
        WindowSlot::new()
    }
}
