//! ELF loader (component H): parses 32- or 64-bit little-endian RISC-V ELF
//! images into a segment list and a global symbol table, and loads those
//! segments into any [`refsi_mem::MemoryDevice`].

mod error;

use std::collections::HashMap;

use refsi_addr::UnitId;
use refsi_mem::MemoryDevice;

pub use error::{ElfError, ElfResult};

const EI_CLASS: usize = 4;
const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const EM_RISCV: u16 = 243;
const PT_LOAD: u32 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;
const STB_GLOBAL: u8 = 1;

const ZERO_CHUNK: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfMachine {
    Rv32,
    Rv64,
}

/// A single `PT_LOAD` segment: file-backed bytes plus the BSS tail implied
/// by `memory_size > data.len()`.
#[derive(Debug, Clone)]
pub struct ElfSegment {
    pub address: u64,
    pub data: Vec<u8>,
    pub memory_size: u64,
}

pub type SymbolMap = HashMap<String, u64>;

#[derive(Debug, Clone)]
pub struct ElfProgram {
    machine: ElfMachine,
    segments: Vec<ElfSegment>,
    symbols: SymbolMap,
    entry_address: u64,
}

fn need(buf: &[u8], offset: usize, len: usize) -> ElfResult<()> {
    let fits = matches!(offset.checked_add(len), Some(end) if end <= buf.len());
    if !fits {
        return Err(ElfError::Truncated {
            needed: offset + len,
            got: buf.len(),
        });
    }
    Ok(())
}

fn u16_at(buf: &[u8], off: usize) -> ElfResult<u16> {
    need(buf, off, 2)?;
    Ok(u16::from_le_bytes(buf[off..off + 2].try_into().unwrap()))
}

fn u32_at(buf: &[u8], off: usize) -> ElfResult<u32> {
    need(buf, off, 4)?;
    Ok(u32::from_le_bytes(buf[off..off + 4].try_into().unwrap()))
}

fn u64_at(buf: &[u8], off: usize) -> ElfResult<u64> {
    need(buf, off, 8)?;
    Ok(u64::from_le_bytes(buf[off..off + 8].try_into().unwrap()))
}

struct Ehdr {
    machine: ElfMachine,
    entry: u64,
    phoff: u64,
    shoff: u64,
    phentsize: u16,
    phnum: u16,
    shentsize: u16,
    shnum: u16,
}

fn read_header(buf: &[u8]) -> ElfResult<Ehdr> {
    need(buf, 0, 16)?;
    if &buf[0..4] != b"\x7fELF" {
        return Err(ElfError::BadMagic);
    }
    let class = buf[EI_CLASS];
    let machine_kind = match class {
        ELFCLASS32 => ElfMachine::Rv32,
        ELFCLASS64 => ElfMachine::Rv64,
        other => return Err(ElfError::UnsupportedClass(other)),
    };

    let e_machine = u16_at(buf, 18)?;
    if e_machine != EM_RISCV {
        return Err(ElfError::UnsupportedMachine(e_machine));
    }

    Ok(match machine_kind {
        ElfMachine::Rv32 => Ehdr {
            machine: machine_kind,
            entry: u32_at(buf, 24)? as u64,
            phoff: u32_at(buf, 28)? as u64,
            shoff: u32_at(buf, 32)? as u64,
            phentsize: u16_at(buf, 42)?,
            phnum: u16_at(buf, 44)?,
            shentsize: u16_at(buf, 46)?,
            shnum: u16_at(buf, 48)?,
        },
        ElfMachine::Rv64 => Ehdr {
            machine: machine_kind,
            entry: u64_at(buf, 24)?,
            phoff: u64_at(buf, 32)?,
            shoff: u64_at(buf, 40)?,
            phentsize: u16_at(buf, 54)?,
            phnum: u16_at(buf, 56)?,
            shentsize: u16_at(buf, 58)?,
            shnum: u16_at(buf, 60)?,
        },
    })
}

struct Phdr {
    p_type: u32,
    offset: u64,
    vaddr: u64,
    filesz: u64,
    memsz: u64,
}

fn read_phdr(buf: &[u8], machine: ElfMachine, off: usize) -> ElfResult<Phdr> {
    match machine {
        ElfMachine::Rv32 => Ok(Phdr {
            p_type: u32_at(buf, off)?,
            offset: u32_at(buf, off + 4)? as u64,
            vaddr: u32_at(buf, off + 8)? as u64,
            filesz: u32_at(buf, off + 16)? as u64,
            memsz: u32_at(buf, off + 20)? as u64,
        }),
        ElfMachine::Rv64 => Ok(Phdr {
            p_type: u32_at(buf, off)?,
            offset: u64_at(buf, off + 8)?,
            vaddr: u64_at(buf, off + 16)?,
            filesz: u64_at(buf, off + 32)?,
            memsz: u64_at(buf, off + 40)?,
        }),
    }
}

struct Shdr {
    sh_type: u32,
    offset: u64,
    size: u64,
    link: u32,
    entsize: u64,
}

fn read_shdr(buf: &[u8], machine: ElfMachine, off: usize) -> ElfResult<Shdr> {
    match machine {
        ElfMachine::Rv32 => Ok(Shdr {
            sh_type: u32_at(buf, off + 4)?,
            offset: u32_at(buf, off + 16)? as u64,
            size: u32_at(buf, off + 20)? as u64,
            link: u32_at(buf, off + 24)?,
            entsize: u32_at(buf, off + 36)? as u64,
        }),
        ElfMachine::Rv64 => Ok(Shdr {
            sh_type: u32_at(buf, off + 4)?,
            offset: u64_at(buf, off + 24)?,
            size: u64_at(buf, off + 32)?,
            link: u32_at(buf, off + 40)?,
            entsize: u64_at(buf, off + 56)?,
        }),
    }
}

struct Sym {
    name_off: u32,
    value: u64,
    info: u8,
}

fn read_sym(buf: &[u8], machine: ElfMachine, off: usize) -> ElfResult<Sym> {
    match machine {
        ElfMachine::Rv32 => Ok(Sym {
            name_off: u32_at(buf, off)?,
            value: u32_at(buf, off + 4)? as u64,
            info: *buf.get(off + 12).ok_or(ElfError::Truncated {
                needed: off + 13,
                got: buf.len(),
            })?,
        }),
        ElfMachine::Rv64 => Ok(Sym {
            name_off: u32_at(buf, off)?,
            value: u64_at(buf, off + 8)?,
            info: *buf.get(off + 4).ok_or(ElfError::Truncated {
                needed: off + 5,
                got: buf.len(),
            })?,
        }),
    }
}

fn sym_entsize(machine: ElfMachine) -> usize {
    match machine {
        ElfMachine::Rv32 => 16,
        ElfMachine::Rv64 => 24,
    }
}

fn read_c_string(buf: &[u8], off: usize) -> String {
    let end = buf[off..].iter().position(|&b| b == 0).map(|p| off + p).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[off..end]).into_owned()
}

impl ElfProgram {
    pub fn machine(&self) -> ElfMachine {
        self.machine
    }

    pub fn entry_address(&self) -> u64 {
        self.entry_address
    }

    pub fn segments(&self) -> &[ElfSegment] {
        &self.segments
    }

    pub fn symbols(&self) -> &SymbolMap {
        &self.symbols
    }

    pub fn find_symbol(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).copied()
    }

    /// Parse an in-memory ELF image.
    pub fn read(buf: &[u8]) -> ElfResult<ElfProgram> {
        let ehdr = read_header(buf)?;

        let mut segments = Vec::new();
        for i in 0..ehdr.phnum {
            let off = ehdr.phoff as usize + i as usize * ehdr.phentsize as usize;
            let ph = read_phdr(buf, ehdr.machine, off)?;
            if ph.p_type != PT_LOAD || ph.memsz == 0 {
                continue;
            }
            need(buf, ph.offset as usize, ph.filesz as usize)?;
            let data = buf[ph.offset as usize..ph.offset as usize + ph.filesz as usize].to_vec();
            segments.push(ElfSegment {
                address: ph.vaddr,
                data,
                memory_size: ph.memsz,
            });
        }

        let mut symtab_off = None;
        let mut symtab_size = 0u64;
        let mut strtab_off = None;
        for i in 0..ehdr.shnum {
            let off = ehdr.shoff as usize + i as usize * ehdr.shentsize as usize;
            let sh = read_shdr(buf, ehdr.machine, off)?;
            if sh.sh_type == SHT_SYMTAB {
                symtab_off = Some(sh.offset);
                symtab_size = sh.size;
                let strtab_idx = sh.link as usize;
                let strtab_hdr_off = ehdr.shoff as usize + strtab_idx * ehdr.shentsize as usize;
                let strtab_sh = read_shdr(buf, ehdr.machine, strtab_hdr_off)?;
                if strtab_sh.sh_type == SHT_STRTAB {
                    strtab_off = Some(strtab_sh.offset);
                }
            }
        }

        let mut symbols = SymbolMap::new();
        if let (Some(symtab_off), Some(strtab_off)) = (symtab_off, strtab_off) {
            let entsize = sym_entsize(ehdr.machine);
            let count = symtab_size as usize / entsize;
            for i in 0..count {
                let off = symtab_off as usize + i * entsize;
                let sym = read_sym(buf, ehdr.machine, off)?;
                let bind = sym.info >> 4;
                if bind != STB_GLOBAL || sym.name_off == 0 {
                    continue;
                }
                need(buf, strtab_off as usize + sym.name_off as usize, 0)?;
                let name = read_c_string(buf, strtab_off as usize + sym.name_off as usize);
                if !name.is_empty() {
                    symbols.insert(name, sym.value);
                }
            }
        }

        Ok(ElfProgram {
            machine: ehdr.machine,
            segments,
            symbols,
            entry_address: ehdr.entry,
        })
    }

    /// Write every segment's initialised bytes into `dst`, then zero-fill
    /// each segment's BSS tail (`memory_size - data.len()`) in chunks.
    pub fn load(&self, dst: &mut dyn MemoryDevice, unit: UnitId) -> ElfResult<()> {
        for seg in &self.segments {
            if !seg.data.is_empty() && !dst.store(seg.address, seg.data.len() as u64, &seg.data, unit) {
                return Err(ElfError::LoadFailed(seg.address));
            }
            let bss_start = seg.address + seg.data.len() as u64;
            let bss_len = seg.memory_size - seg.data.len() as u64;
            let zeros = [0u8; ZERO_CHUNK];
            let mut written = 0u64;
            while written < bss_len {
                let chunk = (bss_len - written).min(ZERO_CHUNK as u64);
                if !dst.store(bss_start + written, chunk, &zeros[..chunk as usize], unit) {
                    return Err(ElfError::LoadFailed(bss_start + written));
                }
                written += chunk;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refsi_mem::RamDevice;

    /// Hand-builds a minimal 64-bit RV ELF: one `PT_LOAD` segment plus a
    /// symtab/strtab pair naming it.
    fn build_test_elf() -> Vec<u8> {
        let code = vec![0x13, 0x00, 0x00, 0x00]; // nop (addi x0,x0,0)
        let vaddr = 0x1000u64;

        let ehsize = 64;
        let phentsize = 56;
        let phoff = ehsize;
        let phnum = 1u16;
        let code_off = phoff + phentsize as u64 * phnum as u64;

        let strtab = b"\0main\0";
        let strtab_off = code_off + code.len() as u64;
        let symentsize = 24u64;
        let symtab_off = strtab_off + strtab.len() as u64;
        // One symbol: global, name "main" at vaddr.
        let mut symtab = Vec::new();
        symtab.extend_from_slice(&1u32.to_le_bytes()); // st_name -> "main"
        symtab.push((1u8 << 4) | 1); // STB_GLOBAL, STT_OBJECT
        symtab.push(0);
        symtab.extend_from_slice(&0u16.to_le_bytes());
        symtab.extend_from_slice(&vaddr.to_le_bytes());
        symtab.extend_from_slice(&4u64.to_le_bytes());
        assert_eq!(symtab.len() as u64, symentsize);

        let shentsize = 64u64;
        let shoff = symtab_off + symtab.len() as u64;
        // section 0: null, section 1: symtab (link->2), section 2: strtab
        let mut shdrs = Vec::new();
        shdrs.extend_from_slice(&[0u8; 64]); // null section
        {
            let mut sh = vec![0u8; 64];
            sh[4..8].copy_from_slice(&2u32.to_le_bytes()); // SHT_SYMTAB
            sh[24..32].copy_from_slice(&symtab_off.to_le_bytes());
            sh[32..40].copy_from_slice(&(symtab.len() as u64).to_le_bytes());
            sh[40..44].copy_from_slice(&2u32.to_le_bytes()); // sh_link -> strtab section index
            sh[56..64].copy_from_slice(&symentsize.to_le_bytes());
            shdrs.extend_from_slice(&sh);
        }
        {
            let mut sh = vec![0u8; 64];
            sh[4..8].copy_from_slice(&3u32.to_le_bytes()); // SHT_STRTAB
            sh[24..32].copy_from_slice(&strtab_off.to_le_bytes());
            sh[32..40].copy_from_slice(&(strtab.len() as u64).to_le_bytes());
            shdrs.extend_from_slice(&sh);
        }
        let shnum = 3u16;

        let mut buf = vec![0u8; ehsize as usize];
        buf[0..4].copy_from_slice(b"\x7fELF");
        buf[4] = 2; // ELFCLASS64
        buf[18..20].copy_from_slice(&243u16.to_le_bytes()); // EM_RISCV
        buf[24..32].copy_from_slice(&vaddr.to_le_bytes()); // e_entry
        buf[32..40].copy_from_slice(&phoff.to_le_bytes());
        buf[40..48].copy_from_slice(&shoff.to_le_bytes());
        buf[54..56].copy_from_slice(&(phentsize as u16).to_le_bytes());
        buf[56..58].copy_from_slice(&phnum.to_le_bytes());
        buf[58..60].copy_from_slice(&(shentsize as u16).to_le_bytes());
        buf[60..62].copy_from_slice(&shnum.to_le_bytes());

        let mut phdr = vec![0u8; phentsize as usize];
        phdr[0..4].copy_from_slice(&1u32.to_le_bytes()); // PT_LOAD
        phdr[8..16].copy_from_slice(&code_off.to_le_bytes());
        phdr[16..24].copy_from_slice(&vaddr.to_le_bytes());
        phdr[32..40].copy_from_slice(&(code.len() as u64).to_le_bytes());
        phdr[40..48].copy_from_slice(&(code.len() as u64 + 12).to_le_bytes()); // memsz > filesz -> BSS tail

        buf.extend_from_slice(&phdr);
        buf.extend_from_slice(&code);
        buf.extend_from_slice(strtab);
        buf.extend_from_slice(&symtab);
        buf.extend_from_slice(&shdrs);
        buf
    }

    #[test]
    fn round_trips_segments_and_entry() {
        let image = build_test_elf();
        let prog = ElfProgram::read(&image).unwrap();
        assert_eq!(prog.machine(), ElfMachine::Rv64);
        assert_eq!(prog.entry_address(), 0x1000);
        assert_eq!(prog.segments().len(), 1);
        assert_eq!(prog.segments()[0].memory_size, 16);
    }

    #[test]
    fn finds_global_symbol_by_name() {
        let image = build_test_elf();
        let prog = ElfProgram::read(&image).unwrap();
        assert_eq!(prog.find_symbol("main"), Some(0x1000));
        assert_eq!(prog.find_symbol("missing"), None);
    }

    #[test]
    fn load_writes_segment_and_zero_fills_bss() {
        let image = build_test_elf();
        let prog = ElfProgram::read(&image).unwrap();
        let mut ram = RamDevice::new(0x2000);
        prog.load(&mut ram, UnitId::External).unwrap();
        let mut out = [0u8; 16];
        ram.load(0x1000, 16, &mut out, UnitId::External);
        assert_eq!(&out[..4], &[0x13, 0x00, 0x00, 0x00]);
        assert_eq!(&out[4..], &[0u8; 12]);
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(matches!(ElfProgram::read(&[0u8; 64]), Err(ElfError::BadMagic)));
    }
}
