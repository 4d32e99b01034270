use refsi_addr::UnitId;
use refsi_device::GDevice;
use refsi_elf::ElfProgram;

use crate::argpack::pack_args;
use crate::program::{Kernel, Program};
use crate::state::{ExecState, WgInfo, REFSI_MAGIC};
use crate::types::{HalArg, HalError, HalResult, NdRange};

/// G-family HAL bridge: no command processor sits between this bridge and
/// the accelerator, so every operation here either goes straight to
/// [`GDevice`]'s byte-buffer read/write calls or drives the hart pool
/// directly via `execute_kernel`.
pub struct GHal {
    device: GDevice,
    programs: Vec<Option<Program>>,
    kernels: Vec<Option<(u64, Kernel)>>,
}

impl GHal {
    pub fn new() -> HalResult<GHal> {
        let (isa, vlen) = GDevice::default_config();
        let mut device = GDevice::new(isa, vlen);
        device.initialize()?;
        Ok(GHal { device, programs: Vec::new(), kernels: Vec::new() })
    }

    pub fn device(&self) -> &GDevice {
        &self.device
    }

    pub fn mem_alloc(&mut self, size: u64, align: u64) -> u64 {
        self.device.alloc_device_memory(size, align).0
    }

    pub fn mem_free(&mut self, addr: u64) {
        self.device.free_device_memory(addr.into());
    }

    pub fn mem_read(&mut self, dest: &mut [u8], src: u64) -> bool {
        self.device.read_device_memory(dest, src, UnitId::External)
    }

    pub fn mem_write(&mut self, dst: u64, data: &[u8]) -> bool {
        self.device.write_device_memory(dst, data, UnitId::External)
    }

    pub fn mem_copy(&mut self, dst: u64, src: u64, size: u64) -> bool {
        self.device.memory_mut().copy(dst, src, size, UnitId::External)
    }

    pub fn mem_fill(&mut self, dst: u64, pattern: &[u8], size: u64) -> bool {
        let mut off = 0u64;
        while off < size {
            let chunk = pattern.len().min((size - off) as usize);
            if !self.device.write_device_memory(dst + off, &pattern[..chunk], UnitId::External) {
                return false;
            }
            off += chunk as u64;
        }
        true
    }

    pub fn program_load(&mut self, data: &[u8]) -> HalResult<u64> {
        let elf = ElfProgram::read(data)?;
        self.programs.push(Some(Program { elf }));
        Ok(self.programs.len() as u64)
    }

    pub fn program_free(&mut self, program: u64) -> bool {
        match self.programs.get_mut(program.wrapping_sub(1) as usize) {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    pub fn program_find_kernel(&mut self, program: u64, name: &str) -> HalResult<u64> {
        let prog = self.program(program)?;
        let symbol = prog.elf.find_symbol(name).ok_or(HalError::InvalidHandle)?;
        self.kernels.push(Some((program, Kernel { symbol })));
        Ok(self.kernels.len() as u64)
    }

    fn program(&self, program: u64) -> HalResult<&Program> {
        self.programs
            .get(program.wrapping_sub(1) as usize)
            .and_then(|slot| slot.as_ref())
            .ok_or(HalError::InvalidHandle)
    }

    fn kernel(&self, program: u64, kernel: u64) -> HalResult<Kernel> {
        let (owner, k) = self
            .kernels
            .get(kernel.wrapping_sub(1) as usize)
            .and_then(|slot| slot.as_ref())
            .copied()
            .ok_or(HalError::InvalidHandle)?;
        if owner != program {
            return Err(HalError::InvalidHandle);
        }
        // also validates that `program` hasn't since been freed
        self.program(program)?;
        Ok(k)
    }

    /// `kernel_exec` (G1): stage one `exec_state_t` per hart at the fixed
    /// context address, then run every hart from the kernel's entry point.
    pub fn kernel_exec(
        &mut self,
        program: u64,
        kernel: u64,
        nd_range: &NdRange,
        args: &[HalArg],
        work_dim: u32,
    ) -> HalResult<()> {
        let kernel = self.kernel(program, kernel)?;
        let idx = program.wrapping_sub(1) as usize;
        let elf = &self
            .programs
            .get(idx)
            .and_then(|slot| slot.as_ref())
            .ok_or(HalError::InvalidHandle)?
            .elf;
        elf.load(self.device.memory_mut(), UnitId::External)?;

        let mut wg = WgInfo::default();
        wg.num_dim = work_dim;
        let mut work_group_size = 1u64;
        for i in 0..3 {
            wg.local_size[i] = nd_range.local[i];
            work_group_size *= wg.local_size[i].max(1);
            wg.num_groups[i] = if wg.local_size[i] > 0 { nd_range.global[i] / wg.local_size[i] } else { 1 };
            if wg.local_size[i] > 0 && wg.num_groups[i] * wg.local_size[i] != nd_range.global[i] {
                return Err(HalError::UnevenWorkGroup(i));
            }
            wg.global_offset[i] = nd_range.offset[i];
        }
        wg.hal_extra = GDevice::context_address();

        let num_harts = work_group_size.min(self.device.max_harts() as u64) as u32;
        if num_harts > self.device.max_harts() {
            return Err(HalError::TooManyHarts(num_harts, self.device.max_harts()));
        }

        let packed_args = pack_args(args);
        let args_size = packed_args.len() as u64;
        let args_addr = if args_size > 0 {
            let addr = self.device.alloc_device_memory(args_size, 8);
            if addr.is_null() {
                return Err(HalError::OutOfMemory);
            }
            self.device.write_device_memory(addr.0, &packed_args, UnitId::External);
            addr.0
        } else {
            0
        };

        let mut exec = ExecState::default();
        exec.wg = wg;
        exec.kernel_entry = kernel.symbol;
        exec.packed_args = args_addr;
        exec.magic = REFSI_MAGIC;
        exec.state_size = ExecState::SIZE as u32;
        exec.flags = 0;

        for hart_id in 0..num_harts {
            exec.thread_id = hart_id;
            let bytes = exec.to_bytes();
            let unit = UnitId::AccHart(hart_id as u16);
            if !self.device.write_device_memory(GDevice::context_address(), &bytes, unit) {
                return Err(HalError::AccessFailed(GDevice::context_address()));
            }
        }

        self.device.execute_kernel(kernel.symbol, num_harts)?;
        Ok(())
    }

    pub fn counter_read(&self, index: u64, unit: UnitId) -> Option<u64> {
        let addr = (index as u64) * 8;
        let mut out = [0u8; 8];
        if self.device.counter_load(addr, 8, &mut out, unit) {
            Some(u64::from_le_bytes(out))
        } else {
            None
        }
    }

    pub fn counter_set_enabled(&mut self, enabled: bool) {
        self.device.accel_mut().set_profiling_enabled(enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_alloc_write_read_round_trips() {
        let mut hal = GHal::new().unwrap();
        let addr = hal.mem_alloc(16, 8);
        assert_ne!(addr, 0);
        assert!(hal.mem_write(addr, &[1, 2, 3, 4]));
        let mut out = [0u8; 4];
        assert!(hal.mem_read(&mut out, addr));
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn program_free_invalidates_its_kernels() {
        let mut hal = GHal::new().unwrap();
        hal.programs.push(Some(Program { elf: minimal_elf() }));
        let program = hal.programs.len() as u64;
        let kernel = hal.program_find_kernel(program, "main").unwrap();
        assert!(hal.program_free(program));
        assert!(hal.kernel(program, kernel).is_err());
    }

    /// Hand-builds a minimal 64-bit RV ELF: one `PT_LOAD` segment plus a
    /// symtab/strtab pair naming it, matching `refsi-elf`'s own test fixture.
    fn minimal_elf() -> ElfProgram {
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
        let mut symtab = Vec::new();
        symtab.extend_from_slice(&1u32.to_le_bytes());
        symtab.push((1u8 << 4) | 1);
        symtab.push(0);
        symtab.extend_from_slice(&0u16.to_le_bytes());
        symtab.extend_from_slice(&vaddr.to_le_bytes());
        symtab.extend_from_slice(&4u64.to_le_bytes());
        assert_eq!(symtab.len() as u64, symentsize);

        let shentsize = 64u64;
        let shoff = symtab_off + symtab.len() as u64;
        let mut shdrs = Vec::new();
        shdrs.extend_from_slice(&[0u8; 64]);
        {
            let mut sh = vec![0u8; 64];
            sh[4..8].copy_from_slice(&2u32.to_le_bytes());
            sh[24..32].copy_from_slice(&symtab_off.to_le_bytes());
            sh[32..40].copy_from_slice(&(symtab.len() as u64).to_le_bytes());
            sh[40..44].copy_from_slice(&2u32.to_le_bytes());
            sh[56..64].copy_from_slice(&symentsize.to_le_bytes());
            shdrs.extend_from_slice(&sh);
        }
        {
            let mut sh = vec![0u8; 64];
            sh[4..8].copy_from_slice(&3u32.to_le_bytes());
            sh[24..32].copy_from_slice(&strtab_off.to_le_bytes());
            sh[32..40].copy_from_slice(&(strtab.len() as u64).to_le_bytes());
            shdrs.extend_from_slice(&sh);
        }
        let shnum = 3u16;

        let mut buf = vec![0u8; ehsize as usize];
        buf[0..4].copy_from_slice(b"\x7fELF");
        buf[4] = 2;
        buf[18..20].copy_from_slice(&243u16.to_le_bytes());
        buf[24..32].copy_from_slice(&vaddr.to_le_bytes());
        buf[32..40].copy_from_slice(&phoff.to_le_bytes());
        buf[40..48].copy_from_slice(&shoff.to_le_bytes());
        buf[54..56].copy_from_slice(&(phentsize as u16).to_le_bytes());
        buf[56..58].copy_from_slice(&phnum.to_le_bytes());
        buf[58..60].copy_from_slice(&(shentsize as u16).to_le_bytes());
        buf[60..62].copy_from_slice(&shnum.to_le_bytes());

        let mut phdr = vec![0u8; phentsize as usize];
        phdr[0..4].copy_from_slice(&1u32.to_le_bytes());
        phdr[8..16].copy_from_slice(&code_off.to_le_bytes());
        phdr[16..24].copy_from_slice(&vaddr.to_le_bytes());
        phdr[32..40].copy_from_slice(&(code.len() as u64).to_le_bytes());
        phdr[40..48].copy_from_slice(&(code.len() as u64 + 12).to_le_bytes());

        buf.extend_from_slice(&phdr);
        buf.extend_from_slice(&code);
        buf.extend_from_slice(strtab);
        buf.extend_from_slice(&symtab);
        buf.extend_from_slice(&shdrs);

        ElfProgram::read(&buf).unwrap()
    }
}
