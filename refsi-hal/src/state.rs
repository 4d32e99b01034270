//! Wire-compatible layout for the two structs a kernel reads out of device
//! memory to find its own scheduling parameters: `wg_info_t` (work-group
//! shape) nested inside `exec_state_t` (the per-hart execution-state
//! template `refsi-hal` stages before a kernel launch).
//!
//! Packing is hand-rolled rather than derived from a C header since no
//! compiled kernel binary in this port reads these bytes except the ones
//! produced alongside it for tests — only internal consistency matters.

pub const REFSI_MAGIC: u32 = u32::from_le_bytes(*b"ReSi");

/// Mirrors `wg_info_t`: work-group shape plus the three fields a kernel
/// needs to compute its own global/local ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct WgInfo {
    pub group_id: [u64; 3],
    pub num_groups: [u64; 3],
    pub global_offset: [u64; 3],
    pub local_size: [u64; 3],
    pub num_dim: u32,
    pub num_groups_per_call: [u64; 3],
    pub hal_extra: u64,
}

impl WgInfo {
    /// Five `[u64; 3]` fields (`group_id`, `num_groups`, `global_offset`,
    /// `local_size`, `num_groups_per_call`), plus `num_dim` and its padding,
    /// plus `hal_extra`.
    pub const SIZE: usize = 8 * 3 * 5 + 4 + 4 + 8;

    pub fn write_le(&self, out: &mut Vec<u8>) {
        for v in self.group_id {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for v in self.num_groups {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for v in self.global_offset {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for v in self.local_size {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&self.num_dim.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // padding to the next 8-byte field
        for v in self.num_groups_per_call {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&self.hal_extra.to_le_bytes());
    }
}

/// Mirrors `exec_state_t`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecState {
    pub wg: WgInfo,
    pub kernel_entry: u64,
    pub packed_args: u64,
    pub magic: u32,
    pub state_size: u32,
    pub flags: u32,
    pub thread_id: u32,
}

impl ExecState {
    pub const SIZE: usize = WgInfo::SIZE + 8 + 8 + 4 + 4 + 4 + 4;

    pub fn write_le(&self, out: &mut Vec<u8>) {
        self.wg.write_le(out);
        out.extend_from_slice(&self.kernel_entry.to_le_bytes());
        out.extend_from_slice(&self.packed_args.to_le_bytes());
        out.extend_from_slice(&self.magic.to_le_bytes());
        out.extend_from_slice(&self.state_size.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.thread_id.to_le_bytes());
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ExecState::SIZE);
        self.write_le(&mut buf);
        buf
    }
}
