use thiserror::Error;

#[derive(Debug, Error)]
pub enum ElfError {
    #[error("truncated ELF image: needed {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
    #[error("not an ELF file (bad magic)")]
    BadMagic,
    #[error("unsupported ELF class byte {0:#x}")]
    UnsupportedClass(u8),
    #[error("unsupported ELF machine {0}")]
    UnsupportedMachine(u16),
    #[error("failed to write segment at {0:#x} into the destination device")]
    LoadFailed(u64),
}

pub type ElfResult<T> = Result<T, ElfError>;
