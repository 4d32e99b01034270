use refsi_elf::ElfProgram;

/// A loaded ELF binary, kept around so a kernel launch can re-load it into
/// device memory without re-reading the file (mirrors `refsi_hal_program`
/// holding on to its `ELFProgram`).
pub struct Program {
    pub(crate) elf: ElfProgram,
}

impl Program {
    pub fn elf(&self) -> &ElfProgram {
        &self.elf
    }
}

/// A symbol resolved out of a [`Program`]'s ELF (`refsi_hal_kernel`).
#[derive(Debug, Clone, Copy)]
pub struct Kernel {
    pub symbol: u64,
}
