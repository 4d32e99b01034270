//! Command-buffer wire format: the command header layout, the opcode
//! vocabulary, the 40-entry register file's layout, and the bitfields
//! packed into individual registers.

/// Window-related register groups come in banks of this many entries, one
/// per memory window a device exposes.
pub const CMP_NUM_WINDOWS: usize = 8;

pub const CMP_REG_SCRATCH: usize = 0;
pub const CMP_REG_ENTRY_PT_FN: usize = 1;
pub const CMP_REG_KUB_DESC: usize = 2;
pub const CMP_REG_KARGS_INFO: usize = 3;
pub const CMP_REG_TSD_INFO: usize = 4;
pub const CMP_REG_STACK_TOP: usize = 5;
pub const CMP_REG_RETURN_ADDR: usize = 6;
pub const CMP_REG_WINDOW_BASE0: usize = 8;
pub const CMP_REG_WINDOW_BASEN: usize = CMP_REG_WINDOW_BASE0 + CMP_NUM_WINDOWS - 1;
pub const CMP_REG_WINDOW_TARGET0: usize = CMP_REG_WINDOW_BASEN + 1;
pub const CMP_REG_WINDOW_TARGETN: usize = CMP_REG_WINDOW_TARGET0 + CMP_NUM_WINDOWS - 1;
pub const CMP_REG_WINDOW_MODE0: usize = CMP_REG_WINDOW_TARGETN + 1;
pub const CMP_REG_WINDOW_MODEN: usize = CMP_REG_WINDOW_MODE0 + CMP_NUM_WINDOWS - 1;
pub const CMP_REG_WINDOW_SCALE0: usize = CMP_REG_WINDOW_MODEN + 1;
pub const CMP_REG_WINDOW_SCALEN: usize = CMP_REG_WINDOW_SCALE0 + CMP_NUM_WINDOWS - 1;
pub const CMP_NUM_REGS: usize = CMP_REG_WINDOW_SCALEN + 1;

pub const CMP_WINDOW_MODE_SHARED: u64 = 0;
pub const CMP_WINDOW_MODE_PERT_HART: u64 = 2;

pub const CMP_CACHE_SYNC_ACC_DCACHE: u32 = 1;
pub const CMP_CACHE_SYNC_ACC_ICACHE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOpcode {
    Nop = 0,
    Finish = 1,
    WriteReg64 = 2,
    LoadReg64 = 3,
    StoreReg64 = 4,
    StoreImm64 = 5,
    CopyMem64 = 6,
    RunKernelSlice = 7,
    RunInstances = 8,
    SyncCache = 9,
}

impl CmpOpcode {
    pub fn from_u32(v: u32) -> Option<CmpOpcode> {
        Some(match v {
            0 => CmpOpcode::Nop,
            1 => CmpOpcode::Finish,
            2 => CmpOpcode::WriteReg64,
            3 => CmpOpcode::LoadReg64,
            4 => CmpOpcode::StoreReg64,
            5 => CmpOpcode::StoreImm64,
            6 => CmpOpcode::CopyMem64,
            7 => CmpOpcode::RunKernelSlice,
            8 => CmpOpcode::RunInstances,
            9 => CmpOpcode::SyncCache,
            _ => return None,
        })
    }
}

/// A header chunk's fields, before the opcode number has been validated.
pub struct RawHeader {
    pub opcode_raw: u32,
    pub num_chunks: u32,
    pub inline_chunk: u32,
}

/// A header chunk occupies bits `[0,8)=0`, `[8,16)=opcode`,
/// `[16,30)=chunk_count*2`, `[30,32)="11"`, `[32,64)=inline_chunk`; the
/// whole thing is valid only if `header & 0xc00000ff == 0xc0000000`.
pub fn decode_header(header: u64) -> Option<RawHeader> {
    if header & 0xc00000ff != 0xc0000000 {
        return None;
    }
    Some(RawHeader {
        opcode_raw: ((header & 0xff00) >> 8) as u32,
        num_chunks: (((header & 0x3fff0000) >> 16) / 2) as u32,
        inline_chunk: (header >> 32) as u32,
    })
}

pub fn encode_header(opcode: CmpOpcode, chunk_count: u32, inline_chunk: u32) -> u64 {
    0xc0000000u64 | ((opcode as u64) << 8) | (((chunk_count * 2) as u64) << 16) | ((inline_chunk as u64) << 32)
}

pub fn get_entry_point_addr(reg: u64) -> u64 {
    reg & 0xffff_ffff
}

pub fn get_kub_addr(reg: u64) -> u64 {
    reg & 0xffff_ffff_ffff
}

pub fn get_kargs_offset(reg: u64) -> u64 {
    (reg >> 16) & 0xff_ffff
}

pub fn get_tsd_offset(reg: u64) -> u64 {
    (reg >> 16) & 0xff_ffff
}

pub fn get_tsd_size(reg: u64) -> u64 {
    reg >> 40
}

pub fn get_window_active(reg: u64) -> bool {
    reg & 0x1 != 0
}

/// Raw mode bits, directly comparable against `CMP_WINDOW_MODE_*`.
pub fn get_window_mode(reg: u64) -> u64 {
    reg & 0x6
}

pub fn get_window_size(reg: u64) -> u64 {
    (reg >> 32) + 1
}

pub fn get_window_scale_a(reg: u64) -> u32 {
    (reg & 0x1f) as u32
}

pub fn get_window_scale_b(reg: u64) -> u32 {
    (reg >> 32) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowRegGroup {
    Base,
    Target,
    Mode,
    Scale,
}

/// Splits a register id in the window-register range into which field it
/// addresses and which window it belongs to; `None` for scalar registers.
pub fn split_window_register(reg_idx: usize) -> Option<(WindowRegGroup, usize)> {
    if (CMP_REG_WINDOW_BASE0..=CMP_REG_WINDOW_BASEN).contains(&reg_idx) {
        Some((WindowRegGroup::Base, reg_idx - CMP_REG_WINDOW_BASE0))
    } else if (CMP_REG_WINDOW_TARGET0..=CMP_REG_WINDOW_TARGETN).contains(&reg_idx) {
        Some((WindowRegGroup::Target, reg_idx - CMP_REG_WINDOW_TARGET0))
    } else if (CMP_REG_WINDOW_MODE0..=CMP_REG_WINDOW_MODEN).contains(&reg_idx) {
        Some((WindowRegGroup::Mode, reg_idx - CMP_REG_WINDOW_MODE0))
    } else if (CMP_REG_WINDOW_SCALE0..=CMP_REG_WINDOW_SCALEN).contains(&reg_idx) {
        Some((WindowRegGroup::Scale, reg_idx - CMP_REG_WINDOW_SCALE0))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = encode_header(CmpOpcode::CopyMem64, 3, 0xdead_beef);
        let decoded = decode_header(header).unwrap();
        assert_eq!(CmpOpcode::from_u32(decoded.opcode_raw), Some(CmpOpcode::CopyMem64));
        assert_eq!(decoded.num_chunks, 3);
        assert_eq!(decoded.inline_chunk, 0xdead_beef);
    }

    #[test]
    fn header_requires_the_fixed_top_bits() {
        assert!(decode_header(0).is_none());
        assert!(decode_header(0x8000_0000).is_none());
    }

    #[test]
    fn window_register_ids_split_into_group_and_index() {
        assert_eq!(split_window_register(CMP_REG_WINDOW_BASE0 + 3), Some((WindowRegGroup::Base, 3)));
        assert_eq!(split_window_register(CMP_REG_WINDOW_MODEN), Some((WindowRegGroup::Mode, CMP_NUM_WINDOWS - 1)));
        assert_eq!(split_window_register(CMP_REG_SCRATCH), None);
    }

    #[test]
    fn num_regs_matches_the_40_register_layout() {
        assert_eq!(CMP_NUM_REGS, 40);
    }
}
