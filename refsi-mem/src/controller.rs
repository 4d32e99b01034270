use std::collections::BTreeMap;

use refsi_addr::UnitId;

use crate::device::MemoryDevice;
use crate::error::{MemError, MemResult};
use crate::window::{MappedWindow, WindowConfig, WindowMode, WindowSlot};

enum Slot {
    Leaf(Box<dyn MemoryDevice>),
    Window(WindowSlot),
}

/// An opaque handle to a window created with [`MemoryController::create_window`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHandle(usize);

/// Ordered base-address → device map (component D), extended with an arena
/// that also holds not-yet-enabled [`WindowSlot`]s (component E).
///
/// Per §9 "Cyclic ownership": windows live in `arena` at a stable index for
/// their whole lifetime, independent of whether they currently occupy a
/// slot in `map`. This sidesteps the self-referential-structure problem of
/// a window needing to address its own hosting controller.
pub struct MemoryController {
    arena: Vec<Option<Slot>>,
    map: BTreeMap<u64, usize>,
}

impl MemoryController {
    pub fn new() -> MemoryController {
        MemoryController {
            arena: Vec::new(),
            map: BTreeMap::new(),
        }
    }

    fn slot_size(&self, idx: usize) -> u64 {
        match self.arena.get(idx) {
            Some(Some(Slot::Leaf(d))) => d.size(),
            Some(Some(Slot::Window(w))) => w.mapped.map(|m| m.size).unwrap_or(0),
            _ => 0,
        }
    }

    fn check_overlap(&self, base: u64, size: u64) -> MemResult<()> {
        if let Some((&pbase, &pidx)) = self.map.range(..=base).next_back() {
            let psize = self.slot_size(pidx);
            if psize == 0 || base < pbase + psize {
                return Err(MemError::Overlap(base.into()));
            }
        }
        if let Some((&sbase, _)) = self.map.range(base + 1..).next() {
            if size == 0 || sbase < base + size {
                return Err(MemError::Overlap(base.into()));
            }
        }
        Ok(())
    }

    /// Register a leaf device at `base`. Fails if `base` falls within an
    /// existing device's declared range (or would contain one).
    pub fn add(&mut self, base: u64, device: Box<dyn MemoryDevice>) -> MemResult<()> {
        self.check_overlap(base, device.size())?;
        let idx = self.arena.len();
        self.arena.push(Some(Slot::Leaf(device)));
        self.map.insert(base, idx);
        Ok(())
    }

    /// Remove and return the leaf device registered at `base`, if any.
    pub fn remove(&mut self, base: u64) -> Option<Box<dyn MemoryDevice>> {
        let idx = *self.map.get(&base)?;
        if !matches!(self.arena.get(idx), Some(Some(Slot::Leaf(_)))) {
            return None;
        }
        self.map.remove(&base);
        match self.arena[idx].take() {
            Some(Slot::Leaf(dev)) => Some(dev),
            _ => None,
        }
    }

    /// Create a new, initially disabled window and return a handle to it.
    pub fn create_window(&mut self) -> WindowHandle {
        let idx = self.arena.len();
        self.arena.push(Some(Slot::Window(WindowSlot::new())));
        WindowHandle(idx)
    }

    fn window_slot(&self, handle: WindowHandle) -> MemResult<&WindowSlot> {
        match self.arena.get(handle.0) {
            Some(Some(Slot::Window(w))) => Ok(w),
            _ => Err(MemError::BadWindowHandle(handle.0)),
        }
    }

    pub fn window_config(&self, handle: WindowHandle) -> MemResult<WindowConfig> {
        Ok(self.window_slot(handle)?.config())
    }

    /// Apply the register-write protocol of §4.E: update the pending
    /// config, and if it differs from the last-mapped snapshot in any of
    /// size/mode/scale/base/target, disable then (if now active) re-enable.
    pub fn write_window_config(
        &mut self,
        handle: WindowHandle,
        new_config: WindowConfig,
    ) -> MemResult<()> {
        let needs_remap = {
            let win = self.window_slot(handle)?;
            match win.mapped_config() {
                Some(old) => new_config.differs_from(&old),
                None => true,
            }
        };

        match self.arena.get_mut(handle.0) {
            Some(Some(Slot::Window(w))) => w.config = new_config,
            _ => return Err(MemError::BadWindowHandle(handle.0)),
        }

        if !needs_remap {
            return Ok(());
        }
        self.disable_window(handle)?;
        if new_config.active {
            self.enable_window(handle)?;
        }
        Ok(())
    }

    fn disable_window(&mut self, handle: WindowHandle) -> MemResult<()> {
        let old_base = match self.arena.get(handle.0) {
            Some(Some(Slot::Window(w))) => w.mapped_config().map(|c| c.base),
            _ => return Err(MemError::BadWindowHandle(handle.0)),
        };
        if let Some(base) = old_base {
            self.map.remove(&base);
        }
        if let Some(Some(Slot::Window(w))) = self.arena.get_mut(handle.0) {
            w.mapped = None;
        }
        Ok(())
    }

    fn enable_window(&mut self, handle: WindowHandle) -> MemResult<()> {
        let cfg = self.window_slot(handle)?.config();

        let (target_base, target_idx) = self
            .find(cfg.target)
            .ok_or(MemError::TargetUnresolved(cfg.target.into()))?;
        if matches!(self.arena.get(target_idx), Some(Some(Slot::Window(_)))) {
            return Err(MemError::TargetIsWindow(cfg.target.into()));
        }

        self.check_overlap(cfg.base, cfg.size)?;

        let mapped = MappedWindow {
            target_index: target_idx,
            mapped_offset: cfg.target - target_base,
            size: cfg.size,
            mode: cfg.mode,
            scale: cfg.scale,
        };
        match self.arena.get_mut(handle.0) {
            Some(Some(Slot::Window(w))) => {
                w.mapped = Some(mapped);
                w.mapped_config = Some(cfg);
            }
            _ => return Err(MemError::BadWindowHandle(handle.0)),
        }
        self.map.insert(cfg.base, handle.0);
        Ok(())
    }

    /// "Price-is-right" lookup: the greatest registered base `<= addr` whose
    /// device range actually contains `addr`.
    pub fn find(&self, addr: u64) -> Option<(u64, usize)> {
        let (&base, &idx) = self.map.range(..=addr).next_back()?;
        let size = self.slot_size(idx);
        if size == 0 || addr - base < size {
            Some((base, idx))
        } else {
            None
        }
    }

    fn effective_access(
        &self,
        m: &MappedWindow,
        window_offset: u64,
        len: u64,
        unit: UnitId,
    ) -> Option<(usize, u64)> {
        if window_offset.checked_add(len)? >= m.size {
            return None;
        }
        let eff = match m.mode {
            WindowMode::Shared => m.mapped_offset.checked_add(window_offset)?,
            WindowMode::PerHart => {
                let hart = unit.hart_index()? as u64;
                m.mapped_offset
                    .checked_add(hart.checked_mul(m.scale)?)?
                    .checked_add(window_offset)?
            }
        };
        Some((m.target_index, eff))
    }

    fn dispatch_ptr(&mut self, idx: usize, offset: u64, len: u64, unit: UnitId) -> Option<&mut [u8]> {
        let redirect = match self.arena.get(idx)? {
            Some(Slot::Window(w)) => Some(self.effective_access(&w.mapped?, offset, len, unit)),
            Some(Slot::Leaf(_)) => None,
            None => return None,
        };
        match redirect {
            Some(Some((tidx, teff))) => self.dispatch_ptr(tidx, teff, len, unit),
            Some(None) => None,
            None => match self.arena.get_mut(idx)? {
                Some(Slot::Leaf(dev)) => dev.direct_ptr(offset, len, unit),
                _ => None,
            },
        }
    }

    fn dispatch_load(&mut self, idx: usize, offset: u64, len: u64, out: &mut [u8], unit: UnitId) -> bool {
        let redirect = match self.arena.get(idx) {
            Some(Some(Slot::Window(w))) => match w.mapped {
                Some(m) => Some(self.effective_access(&m, offset, len, unit)),
                None => return false,
            },
            Some(Some(Slot::Leaf(_))) => None,
            _ => return false,
        };
        match redirect {
            Some(Some((tidx, teff))) => self.dispatch_load(tidx, teff, len, out, unit),
            Some(None) => false,
            None => match self.arena.get_mut(idx) {
                Some(Some(Slot::Leaf(dev))) => dev.load(offset, len, out, unit),
                _ => false,
            },
        }
    }

    fn dispatch_store(&mut self, idx: usize, offset: u64, len: u64, data: &[u8], unit: UnitId) -> bool {
        let redirect = match self.arena.get(idx) {
            Some(Some(Slot::Window(w))) => match w.mapped {
                Some(m) => Some(self.effective_access(&m, offset, len, unit)),
                None => return false,
            },
            Some(Some(Slot::Leaf(_))) => None,
            _ => return false,
        };
        match redirect {
            Some(Some((tidx, teff))) => self.dispatch_store(tidx, teff, len, data, unit),
            Some(None) => false,
            None => match self.arena.get_mut(idx) {
                Some(Some(Slot::Leaf(dev))) => dev.store(offset, len, data, unit),
                _ => false,
            },
        }
    }

    pub fn direct_ptr(&mut self, addr: u64, len: u64, unit: UnitId) -> Option<&mut [u8]> {
        let (base, idx) = self.find(addr)?;
        self.dispatch_ptr(idx, addr - base, len, unit)
    }

    pub fn load(&mut self, addr: u64, len: u64, out: &mut [u8], unit: UnitId) -> bool {
        match self.find(addr) {
            Some((base, idx)) => self.dispatch_load(idx, addr - base, len, out, unit),
            None => false,
        }
    }

    pub fn store(&mut self, addr: u64, len: u64, data: &[u8], unit: UnitId) -> bool {
        match self.find(addr) {
            Some((base, idx)) => self.dispatch_store(idx, addr - base, len, data, unit),
            None => false,
        }
    }

    /// Copy `len` bytes from `src` to `dst`. Both endpoints must resolve to
    /// directly-pointable memory; there is no per-byte fallback.
    pub fn copy(&mut self, dst: u64, src: u64, len: u64, unit: UnitId) -> bool {
        let mut tmp = vec![0u8; len as usize];
        match self.direct_ptr(src, len, unit) {
            Some(s) => tmp.copy_from_slice(s),
            None => return false,
        }
        match self.direct_ptr(dst, len, unit) {
            Some(d) => d.copy_from_slice(&tmp),
            None => return false,
        }
        true
    }
}

impl Default for MemoryController {
    fn default() -> Self {
        MemoryController::new()
    }
}

impl MemoryDevice for MemoryController {
    fn size(&self) -> u64 {
        0
    }

    fn direct_ptr(&mut self, offset: u64, len: u64, unit: UnitId) -> Option<&mut [u8]> {
        self.direct_ptr(offset, len, unit)
    }

    fn load(&mut self, offset: u64, len: u64, out: &mut [u8], unit: UnitId) -> bool {
        self.load(offset, len, out, unit)
    }

    fn store(&mut self, offset: u64, len: u64, data: &[u8], unit: UnitId) -> bool {
        self.store(offset, len, data, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RamDevice;

    fn ram(size: u64) -> Box<dyn MemoryDevice> {
        Box::new(RamDevice::new(size))
    }

    #[test]
    fn add_rejects_overlap_and_find_resolves_every_offset() {
        let mut ctl = MemoryController::new();
        ctl.add(0x1000, ram(0x100)).unwrap();
        assert!(ctl.add(0x1050, ram(0x10)).is_err());
        ctl.add(0x2000, ram(0x10)).unwrap();
        for delta in 0..0x100u64 {
            let (base, _) = ctl.find(0x1000 + delta).unwrap();
            assert_eq!(base, 0x1000);
        }
        assert!(ctl.find(0x1100).is_none());
    }

    #[test]
    fn window_shared_mode_aliases_target() {
        let mut ctl = MemoryController::new();
        ctl.add(0x4000_0000, ram(0x1000)).unwrap();
        let handle = ctl.create_window();
        ctl.write_window_config(
            handle,
            WindowConfig {
                active: true,
                mode: WindowMode::Shared,
                base: 0x1000_0000,
                target: 0x4000_0000,
                size: 0x1000,
                scale: 0,
            },
        )
        .unwrap();

        assert!(ctl.store(0x1000_0010, 4, &[1, 2, 3, 4], UnitId::External));
        let mut out = [0u8; 4];
        assert!(ctl.load(0x4000_0010, 4, &mut out, UnitId::External));
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn window_per_hart_mode_isolates_harts() {
        let mut ctl = MemoryController::new();
        ctl.add(0x103E_0000, ram(0x10000)).unwrap();
        let handle = ctl.create_window();
        ctl.write_window_config(
            handle,
            WindowConfig {
                active: true,
                mode: WindowMode::PerHart,
                base: 0x1400_0000,
                target: 0x103E_0000,
                size: 0x8000,
                scale: 0x8000,
            },
        )
        .unwrap();

        assert!(ctl.store(0x1400_0010, 1, &[0x11], UnitId::AccHart(0)));
        assert!(ctl.store(0x1400_0010, 1, &[0x22], UnitId::AccHart(1)));

        let mut out = [0u8; 1];
        assert!(ctl.load(0x103E_0010, 1, &mut out, UnitId::External));
        assert_eq!(out, [0x11]);
        assert!(ctl.load(0x103E_8010, 1, &mut out, UnitId::External));
        assert_eq!(out, [0x22]);

        assert!(!ctl.load(0x1400_0010, 1, &mut out, UnitId::External));
    }

    #[test]
    fn window_cycle_is_rejected() {
        let mut ctl = MemoryController::new();
        ctl.add(0x4000_0000, ram(0x1000)).unwrap();
        let inner = ctl.create_window();
        ctl.write_window_config(
            inner,
            WindowConfig {
                active: true,
                mode: WindowMode::Shared,
                base: 0x1000_0000,
                target: 0x4000_0000,
                size: 0x100,
                scale: 0,
            },
        )
        .unwrap();

        let outer = ctl.create_window();
        let result = ctl.write_window_config(
            outer,
            WindowConfig {
                active: true,
                mode: WindowMode::Shared,
                base: 0x2000_0000,
                target: 0x1000_0000,
                size: 0x100,
                scale: 0,
            },
        );
        assert!(matches!(result, Err(MemError::TargetIsWindow(_))));
    }

    #[test]
    fn copy_requires_both_endpoints_direct_pointable() {
        let mut ctl = MemoryController::new();
        ctl.add(0x1000, ram(0x100)).unwrap();
        ctl.add(0x2000, ram(0x100)).unwrap();
        ctl.store(0x1000, 4, &[9, 9, 9, 9], UnitId::External);
        assert!(ctl.copy(0x2000, 0x1000, 4, UnitId::External));
        let mut out = [0u8; 4];
        ctl.load(0x2000, 4, &mut out, UnitId::External);
        assert_eq!(out, [9, 9, 9, 9]);
        assert!(!ctl.copy(0x3000, 0x1000, 4, UnitId::External));
    }
}
