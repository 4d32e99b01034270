use refsi_addr::UnitId;
use refsi_cmp::regs::{
    encode_header, CmpOpcode, CMP_NUM_WINDOWS, CMP_REG_ENTRY_PT_FN, CMP_REG_RETURN_ADDR, CMP_REG_SCRATCH,
    CMP_REG_STACK_TOP, CMP_REG_WINDOW_BASE0, CMP_REG_WINDOW_MODE0, CMP_REG_WINDOW_SCALE0, CMP_REG_WINDOW_TARGET0,
    CMP_WINDOW_MODE_PERT_HART, CMP_WINDOW_MODE_SHARED,
};
use refsi_device::{MDevice, NUM_HARTS_PER_CORE, TCDM_HART_BASE, TCDM_HART_SIZE};
use refsi_dma::{
    CTRL_DIM_1D, CTRL_START, REG_DMACTRL, REG_DMADONESEQ, REG_DMADSTADDR, REG_DMASRCADDR, REG_DMASTARTSEQ,
    REG_DMAXFERSIZE0,
};
use refsi_elf::ElfProgram;

use crate::argpack::pack_args;
use crate::program::{Kernel, Program};
use crate::riscv_encoder::{MulOp, RiscvEncoder, A0, A1, A2, A3, A7, T1, T2};
use crate::state::{ExecState, WgInfo, REFSI_MAGIC};
use crate::types::{HalArg, HalError, HalResult, NdRange};

/// Window 0: the ELF region, `Shared` across every hart (mirrors the
/// G-family's ELF window, re-used here since the two families don't share
/// an address space).
const ELF_WINDOW: usize = 0;
const ELF_WINDOW_BASE: u64 = 0x0001_0000;
const ELF_WINDOW_SIZE: u64 = (1 << 27) - ELF_WINDOW_BASE;

/// Window 1: the hart-local (`PerHart`) region each hart stages its own
/// `exec_state_t`-equivalent and kernel arguments in before a launch.
const HART_LOCAL_WINDOW: usize = 1;
const HART_LOCAL_WINDOW_BASE: u64 = 0x2080_0000;

/// Highest nd-range rank the launch-kernel thunks are generated for.
const DIMS: usize = 3;

const WINDOW_ALIGN: u64 = 4096;

/// `encodeKernelExit`: sets the hal_device-visible exit code to 0 (`a0`,
/// `a7` both zero means "no error") and traps. The simulator's breakpoint on
/// `rom_base` (this stub's address) means the `ecall` itself never actually
/// executes here, but the encoding is kept bit-exact with the hardware path.
fn encode_kernel_exit(enc: &mut RiscvEncoder) {
    enc.add_li(A0, 0);
    enc.add_li(A7, 0);
    enc.add_ecall();
}

/// `encodeLaunchKernel`: computes `group_id` from the instance/slice ids the
/// command processor put in `a0`/`a1`, then tail-jumps to the kernel's real
/// entry point loaded out of the `exec_state_t` `a3` points at.
fn encode_launch_kernel(enc: &mut RiscvEncoder, num_dims: u32) {
    let wg_offset = 0u32; // offsetof(exec_state_t, wg)
    let group_id_offset = 0u32; // offsetof(wg_info_t, group_id)
    let num_groups_offset = 24u32; // offsetof(wg_info_t, num_groups)
    let rank_offset = |offset: u32, rank: u32| offset + rank * 8;

    // group_id[0] = instance_id
    enc.add_sw(A0, A3, rank_offset(group_id_offset, 0));
    if num_dims > 1 {
        // group_id[1] = slice_id % num_groups[1]
        enc.add_lw(T1, A3, rank_offset(num_groups_offset, 1));
        enc.add_mul_inst(MulOp::Remu, T2, A1, T1);
        enc.add_sw(T2, A3, rank_offset(group_id_offset, 1));
        if num_dims > 2 {
            // group_id[2] = slice_id / num_groups[2]; reuses `T1`
            // (num_groups[1]) rather than loading num_groups[2], matching
            // the original thunk's own arithmetic exactly.
            enc.add_mul_inst(MulOp::Divu, T2, A1, T1);
            enc.add_sw(T2, A3, rank_offset(group_id_offset, 2));
        }
    }

    // Set the packed kernel argument pointer argument.
    enc.add_mv(A0, A2);
    // Compute the address of the wg_info_t scheduling struct.
    enc.add_addi(A1, A3, wg_offset);
    // Load the kernel entry point address and tail-jump to it.
    enc.add_lw(T1, A3, WgInfo::SIZE as u32);
    enc.add_jr(T1);
}

/// Builds a command-processor buffer word-by-word, mirroring the chunked
/// header format `refsi_cmp::regs` decodes.
#[derive(Default)]
struct CmdBuf {
    words: Vec<u64>,
}

impl CmdBuf {
    fn write_reg64(&mut self, reg: usize, value: u64) -> &mut Self {
        self.words.push(encode_header(CmpOpcode::WriteReg64, 1, reg as u32));
        self.words.push(value);
        self
    }

    fn load_reg64(&mut self, reg: usize, src_addr: u64) -> &mut Self {
        self.words.push(encode_header(CmpOpcode::LoadReg64, 1, reg as u32));
        self.words.push(src_addr);
        self
    }

    fn store_reg64(&mut self, reg: usize, dst_addr: u64) -> &mut Self {
        self.words.push(encode_header(CmpOpcode::StoreReg64, 1, reg as u32));
        self.words.push(dst_addr);
        self
    }

    fn store_imm64(&mut self, dst_addr: u64, value: u64) -> &mut Self {
        self.words.push(encode_header(CmpOpcode::StoreImm64, 1, dst_addr as u32));
        self.words.push(value);
        self
    }

    fn run_instances(&mut self, max_harts: u32, num_instances: u64, extra_args: &[u64]) -> &mut Self {
        let inline = (max_harts & 0xff) | ((extra_args.len() as u32) << 8);
        self.words.push(encode_header(CmpOpcode::RunInstances, extra_args.len() as u32 + 1, inline));
        self.words.push(num_instances);
        self.words.extend_from_slice(extra_args);
        self
    }

    fn sync_cache(&mut self) -> &mut Self {
        self.words.push(encode_header(CmpOpcode::SyncCache, 0, 0x3));
        self
    }

    fn finish(&mut self) -> &mut Self {
        self.words.push(encode_header(CmpOpcode::Finish, 0, 0));
        self
    }
}

/// `decode_scale(1, b) == b + 1`, so any non-zero stride has an exact
/// `(a, b)` encoding without needing it to be a power of two.
fn encode_window_scale(scale: u64) -> u64 {
    if scale == 0 {
        0
    } else {
        1 | ((scale - 1) << 32)
    }
}

fn window_mode_value(active: bool, mode: u64, size: u64) -> u64 {
    (active as u64) | mode | ((size.max(1) - 1) << 32)
}

/// M-family HAL bridge: kernel launches, window setup and bulk memory
/// moves all travel through [`MDevice`]'s command processor rather than
/// landing on the device directly, the same split `refsi_hal_m1.cpp` draws
/// against `RefSiMDevice`.
pub struct MHal {
    device: MDevice,
    num_harts: u32,
    programs: Vec<Option<Program>>,
    kernels: Vec<Option<(u64, Kernel)>>,
    rom_base: u64,
    launch_kernel_addrs: [u64; DIMS],
}

impl MHal {
    pub fn new() -> HalResult<MHal> {
        let mut device = MDevice::new(refsi_device::REFSI_ISA, refsi_device::CORE_VLEN);
        device.initialize()?;
        let num_harts = device.query_device_info().num_harts_per_core;
        let mut hal = MHal {
            device,
            num_harts,
            programs: Vec::new(),
            kernels: Vec::new(),
            rom_base: 0,
            launch_kernel_addrs: [0; DIMS],
        };
        hal.setup_windows()?;
        hal.create_rom()?;
        Ok(hal)
    }

    /// `createROM`: assembles the kernel-exit stub followed by one
    /// launch-kernel thunk per rank into a single buffer, writes it to
    /// device memory once, and records each thunk's absolute address.
    fn create_rom(&mut self) -> HalResult<()> {
        let mut enc = RiscvEncoder::new();
        encode_kernel_exit(&mut enc);

        let mut offsets = [0u64; DIMS];
        for (i, offset) in offsets.iter_mut().enumerate() {
            *offset = enc.len() as u64;
            encode_launch_kernel(&mut enc, (i + 1) as u32);
        }

        let bytes = enc.bytes();
        let rom = self.device.alloc_device_memory(bytes.len() as u64, 8);
        if rom.is_null() {
            return Err(HalError::OutOfMemory);
        }
        if !self.device.write_device_memory(rom.0, &bytes, UnitId::External) {
            return Err(HalError::AccessFailed(rom.0));
        }

        self.rom_base = rom.0;
        for (dst, offset) in self.launch_kernel_addrs.iter_mut().zip(offsets) {
            *dst = rom.0 + offset;
        }
        Ok(())
    }

    fn setup_windows(&mut self) -> HalResult<()> {
        debug_assert!(CMP_NUM_WINDOWS > HART_LOCAL_WINDOW);
        let elf_target = self.device.alloc_device_memory(ELF_WINDOW_SIZE, WINDOW_ALIGN);
        if elf_target.is_null() {
            return Err(HalError::OutOfMemory);
        }
        let stride = TCDM_HART_SIZE / NUM_HARTS_PER_CORE as u64;

        let mut cmd = CmdBuf::default();
        cmd.write_reg64(CMP_REG_WINDOW_BASE0 + ELF_WINDOW, ELF_WINDOW_BASE)
            .write_reg64(CMP_REG_WINDOW_TARGET0 + ELF_WINDOW, elf_target.0)
            .write_reg64(CMP_REG_WINDOW_SCALE0 + ELF_WINDOW, 0)
            .write_reg64(
                CMP_REG_WINDOW_MODE0 + ELF_WINDOW,
                window_mode_value(true, CMP_WINDOW_MODE_SHARED, ELF_WINDOW_SIZE),
            )
            .write_reg64(CMP_REG_WINDOW_BASE0 + HART_LOCAL_WINDOW, HART_LOCAL_WINDOW_BASE)
            .write_reg64(CMP_REG_WINDOW_TARGET0 + HART_LOCAL_WINDOW, TCDM_HART_BASE)
            .write_reg64(CMP_REG_WINDOW_SCALE0 + HART_LOCAL_WINDOW, encode_window_scale(stride))
            .write_reg64(
                CMP_REG_WINDOW_MODE0 + HART_LOCAL_WINDOW,
                window_mode_value(true, CMP_WINDOW_MODE_PERT_HART, stride),
            )
            .finish();
        self.run_command_buffer(&cmd.words)
    }

    fn run_command_buffer(&mut self, words: &[u64]) -> HalResult<()> {
        let size = (words.len() * 8) as u64;
        let addr = self.device.alloc_device_memory(size, 8);
        if addr.is_null() {
            return Err(HalError::OutOfMemory);
        }
        let mut bytes = Vec::with_capacity(size as usize);
        for w in words {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        let wrote = self.device.write_device_memory(addr.0, &bytes, UnitId::External);
        if !wrote {
            self.device.free_device_memory(addr);
            return Err(HalError::AccessFailed(addr.0));
        }
        self.device.execute_command_buffer(addr.0, size);
        self.device.wait_for_device_idle();
        self.device.free_device_memory(addr);
        Ok(())
    }

    pub fn device(&self) -> &MDevice {
        &self.device
    }

    pub fn mem_alloc(&mut self, size: u64, align: u64) -> u64 {
        self.device.alloc_device_memory(size, align).0
    }

    pub fn mem_free(&mut self, addr: u64) {
        self.device.free_device_memory(addr.into());
    }

    pub fn mem_read(&self, dest: &mut [u8], src: u64) -> bool {
        self.device.read_device_memory(dest, src, UnitId::External)
    }

    pub fn mem_write(&self, dst: u64, data: &[u8]) -> bool {
        self.device.write_device_memory(dst, data, UnitId::External)
    }

    /// `mem_copy`: a 1D DMA transfer followed by the `DMASTARTSEQ`/
    /// `DMADONESEQ` wait idiom. The transfer already completed
    /// synchronously by the time the wait runs (see `refsi-dma`'s design
    /// notes), so the wait is a formality kept for fidelity to the
    /// original command-buffer shape.
    pub fn mem_copy(&mut self, dst: u64, src: u64, size: u64) -> HalResult<()> {
        let dma_base = refsi_device::DMA_IO_BASE;
        let mut cmd = CmdBuf::default();
        cmd.store_imm64(dma_base + (REG_DMASRCADDR as u64) * 8, src)
            .store_imm64(dma_base + (REG_DMADSTADDR as u64) * 8, dst)
            .store_imm64(dma_base + (REG_DMAXFERSIZE0 as u64) * 8, size)
            .store_imm64(dma_base + (REG_DMACTRL as u64) * 8, CTRL_DIM_1D | CTRL_START)
            .load_reg64(CMP_REG_SCRATCH, dma_base + (REG_DMASTARTSEQ as u64) * 8)
            .store_reg64(CMP_REG_SCRATCH, dma_base + (REG_DMADONESEQ as u64) * 8)
            .finish();
        self.run_command_buffer(&cmd.words)
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
        let idx = program.wrapping_sub(1) as usize;
        let symbol = self
            .programs
            .get(idx)
            .and_then(|slot| slot.as_ref())
            .ok_or(HalError::InvalidHandle)?
            .elf
            .find_symbol(name)
            .ok_or(HalError::InvalidHandle)?;
        self.kernels.push(Some((program, Kernel { symbol })));
        Ok(self.kernels.len() as u64)
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
        self.programs
            .get(program.wrapping_sub(1) as usize)
            .and_then(|slot| slot.as_ref())
            .ok_or(HalError::InvalidHandle)?;
        Ok(k)
    }

    /// `kernel_exec` (M1): stages one shared `exec_state_t`-equivalent
    /// through the `PerHart` window (`group_id` left zeroed — the
    /// launch-kernel ROM thunk fills it in from `a0`/`a1` at runtime), points
    /// the command processor's entry/return registers at the matching ROM
    /// thunk and the ROM's base respectively, then issues one
    /// `RUN_INSTANCES` per slice of the nd-range's higher dimensions.
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
        self.device.command_processor().with_memory(|mem| elf.load(mem, UnitId::External))?;

        let mut num_groups = [1u64; 3];
        let mut local_size = [0u64; 3];
        for i in 0..3 {
            local_size[i] = nd_range.local[i];
            num_groups[i] = if local_size[i] > 0 { nd_range.global[i] / local_size[i] } else { 1 };
            if local_size[i] > 0 && num_groups[i] * local_size[i] != nd_range.global[i] {
                return Err(HalError::UnevenWorkGroup(i));
            }
        }

        let packed_args = pack_args(args);
        let args_addr = if !packed_args.is_empty() {
            let addr = self.device.alloc_device_memory(packed_args.len() as u64, 8);
            if addr.is_null() {
                return Err(HalError::OutOfMemory);
            }
            if !self.device.write_device_memory(addr.0, &packed_args, UnitId::External) {
                return Err(HalError::AccessFailed(addr.0));
            }
            addr.0
        } else {
            0
        };

        let mut wg = WgInfo::default();
        wg.num_dim = work_dim;
        wg.local_size = local_size;
        wg.num_groups = num_groups;
        wg.global_offset = nd_range.offset;
        wg.hal_extra = HART_LOCAL_WINDOW_BASE;

        let mut exec = ExecState::default();
        exec.wg = wg;
        exec.kernel_entry = kernel.symbol;
        exec.packed_args = args_addr;
        exec.magic = REFSI_MAGIC;
        exec.state_size = ExecState::SIZE as u32;
        let bytes = exec.to_bytes();
        for hart in 0..self.num_harts {
            let unit = UnitId::AccHart(hart as u16);
            if !self.device.write_device_memory(HART_LOCAL_WINDOW_BASE, &bytes, unit) {
                return Err(HalError::AccessFailed(HART_LOCAL_WINDOW_BASE));
            }
        }

        let mut setup = CmdBuf::default();
        setup
            .write_reg64(CMP_REG_ENTRY_PT_FN, self.launch_kernel_addrs[(work_dim - 1) as usize])
            .write_reg64(CMP_REG_STACK_TOP, HART_LOCAL_WINDOW_BASE + TCDM_HART_SIZE / self.num_harts as u64)
            .write_reg64(CMP_REG_RETURN_ADDR, self.rom_base)
            .sync_cache();
        self.run_command_buffer(&setup.words)?;

        let num_instances = num_groups[0];
        let num_slices = match work_dim {
            1 => 1,
            2 => num_groups[1],
            _ => num_groups[1] * num_groups[2],
        };
        for slice_id in 0..num_slices {
            let mut slice = CmdBuf::default();
            slice.run_instances(self.num_harts, num_instances, &[slice_id, args_addr, HART_LOCAL_WINDOW_BASE]);
            self.run_command_buffer(&slice.words)?;
        }

        let mut teardown = CmdBuf::default();
        teardown.sync_cache().finish();
        self.run_command_buffer(&teardown.words)?;

        if args_addr != 0 {
            self.device.free_device_memory(args_addr.into());
        }
        Ok(())
    }

    pub fn counter_read(&self, index: u64) -> Option<u64> {
        let addr = refsi_device::PERF_COUNTERS_IO_BASE + index * 8;
        let mut out = [0u8; 8];
        if self.device.read_device_memory(&mut out, addr, UnitId::External) {
            Some(u64::from_le_bytes(out))
        } else {
            None
        }
    }

    pub fn counter_set_enabled(&mut self, enabled: bool) {
        self.device.command_processor().with_accel_mut(|accel| accel.set_profiling_enabled(enabled));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_are_mapped_after_construction() {
        let mut hal = MHal::new().unwrap();
        assert!(hal.mem_write(ELF_WINDOW_BASE, &[1, 2, 3, 4]));
        let mut out = [0u8; 4];
        assert!(hal.mem_read(&mut out, ELF_WINDOW_BASE));
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn hart_local_window_is_distinct_per_hart() {
        let hal = MHal::new().unwrap();
        let unit0 = UnitId::AccHart(0);
        let unit1 = UnitId::AccHart(1);
        assert!(hal.device.write_device_memory(HART_LOCAL_WINDOW_BASE, &[7, 7, 7, 7], unit0));
        assert!(hal.device.write_device_memory(HART_LOCAL_WINDOW_BASE, &[9, 9, 9, 9], unit1));
        let mut out0 = [0u8; 4];
        let mut out1 = [0u8; 4];
        assert!(hal.device.read_device_memory(&mut out0, HART_LOCAL_WINDOW_BASE, unit0));
        assert!(hal.device.read_device_memory(&mut out1, HART_LOCAL_WINDOW_BASE, unit1));
        assert_eq!(out0, [7, 7, 7, 7]);
        assert_eq!(out1, [9, 9, 9, 9]);
    }

    #[test]
    fn mem_copy_moves_bytes_through_the_dma_engine() {
        let mut hal = MHal::new().unwrap();
        let src = hal.mem_alloc(16, 8);
        let dst = hal.mem_alloc(16, 8);
        assert!(hal.mem_write(src, &[1, 2, 3, 4, 5, 6, 7, 8]));
        hal.mem_copy(dst, src, 8).unwrap();
        let mut out = [0u8; 8];
        assert!(hal.mem_read(&mut out, dst));
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
