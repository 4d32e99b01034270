use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccelError {
    #[error("kernel entry point takes at most 7 extra arguments, got {0}")]
    TooManyExtraArgs(usize),
    #[error("kernel slice aborted with exit code {0:#x}")]
    KernelAborted(i64),
    #[error("performance counter index {0} is out of range")]
    CounterOutOfRange(usize),
}

pub type AccelResult<T> = Result<T, AccelError>;
