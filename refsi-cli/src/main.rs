//! Smoke-test harness over the `refsi-hal` library crates: opens a G- or
//! M-family device, loads an ELF, and runs one kernel over an nd-range.
//! Not a surface named by the device this crate drives — a runnable
//! entry point alongside the libraries, in the shape every other crate
//! in this workspace's lineage ships one.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::info;
use refsi_hal::{GHal, HalArg, MHal, NdRange};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Family {
    G,
    M,
}

/// Run a RefSi kernel against a simulated accelerator.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Device family to simulate.
    #[arg(long, value_enum, default_value_t = Family::G)]
    family: Family,

    /// Path to the kernel ELF.
    #[arg(long)]
    elf: std::path::PathBuf,

    /// Kernel symbol to launch.
    #[arg(long)]
    kernel: String,

    /// Global work size, comma-separated (up to 3 dimensions).
    #[arg(long, value_delimiter = ',', default_value = "1,1,1")]
    global: Vec<u64>,

    /// Local (work-group) size, comma-separated; 0 means "unconstrained".
    #[arg(long, value_delimiter = ',', default_value = "0,0,0")]
    local: Vec<u64>,

    /// Device buffers to allocate before the launch, given as byte sizes;
    /// each becomes one `HalArg::Address` argument to the kernel, in order.
    #[arg(long = "buffer", value_name = "BYTES")]
    buffers: Vec<u64>,

    /// Plain 64-bit integer arguments, appended after the buffer arguments.
    #[arg(long = "value", value_name = "U64")]
    values: Vec<u64>,
}

fn dims(v: &[u64], what: &str) -> Result<[u64; 3]> {
    if v.len() > 3 {
        bail!("{what} takes at most 3 dimensions, got {}", v.len());
    }
    let mut out = [0u64; 3];
    for (i, x) in v.iter().enumerate() {
        out[i] = *x;
    }
    Ok(out)
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let elf_bytes = std::fs::read(&cli.elf).with_context(|| format!("reading {}", cli.elf.display()))?;
    let global = dims(&cli.global, "--global")?;
    let local = dims(&cli.local, "--local")?;
    let nd_range = NdRange { offset: [0, 0, 0], global, local };
    let work_dim = cli.global.len().max(1) as u32;

    match cli.family {
        Family::G => run(GHal::new().context("opening G-family device")?, &elf_bytes, &cli, &nd_range, work_dim),
        Family::M => run(MHal::new().context("opening M-family device")?, &elf_bytes, &cli, &nd_range, work_dim),
    }
}

/// Shared launch sequence, generic over which family's HAL bridge is in
/// play — both expose the same program/kernel/mem_alloc/kernel_exec shape.
trait Hal {
    fn info(&self) -> String;
    fn mem_alloc(&mut self, size: u64, align: u64) -> u64;
    fn program_load(&mut self, data: &[u8]) -> Result<u64>;
    fn program_find_kernel(&mut self, program: u64, name: &str) -> Result<u64>;
    fn kernel_exec(&mut self, program: u64, kernel: u64, nd_range: &NdRange, args: &[HalArg], work_dim: u32) -> Result<()>;
}

impl Hal for GHal {
    fn info(&self) -> String {
        format!("{:?}", self.device().query_device_info())
    }
    fn mem_alloc(&mut self, size: u64, align: u64) -> u64 {
        GHal::mem_alloc(self, size, align)
    }
    fn program_load(&mut self, data: &[u8]) -> Result<u64> {
        Ok(GHal::program_load(self, data)?)
    }
    fn program_find_kernel(&mut self, program: u64, name: &str) -> Result<u64> {
        Ok(GHal::program_find_kernel(self, program, name)?)
    }
    fn kernel_exec(&mut self, program: u64, kernel: u64, nd_range: &NdRange, args: &[HalArg], work_dim: u32) -> Result<()> {
        Ok(GHal::kernel_exec(self, program, kernel, nd_range, args, work_dim)?)
    }
}

impl Hal for MHal {
    fn info(&self) -> String {
        format!("{:?}", self.device().query_device_info())
    }
    fn mem_alloc(&mut self, size: u64, align: u64) -> u64 {
        MHal::mem_alloc(self, size, align)
    }
    fn program_load(&mut self, data: &[u8]) -> Result<u64> {
        Ok(MHal::program_load(self, data)?)
    }
    fn program_find_kernel(&mut self, program: u64, name: &str) -> Result<u64> {
        Ok(MHal::program_find_kernel(self, program, name)?)
    }
    fn kernel_exec(&mut self, program: u64, kernel: u64, nd_range: &NdRange, args: &[HalArg], work_dim: u32) -> Result<()> {
        Ok(MHal::kernel_exec(self, program, kernel, nd_range, args, work_dim)?)
    }
}

fn run(mut hal: impl Hal, elf_bytes: &[u8], cli: &Cli, nd_range: &NdRange, work_dim: u32) -> Result<()> {
    info!("device: {}", hal.info());

    let program = hal.program_load(elf_bytes).context("loading ELF")?;
    let kernel = hal.program_find_kernel(program, &cli.kernel).with_context(|| format!("finding kernel `{}`", cli.kernel))?;

    let mut args = Vec::with_capacity(cli.buffers.len() + cli.values.len());
    for &size in &cli.buffers {
        let addr = hal.mem_alloc(size, 8);
        if addr == 0 {
            bail!("out of device memory allocating a {size}-byte buffer");
        }
        info!("buffer argument: {size} bytes at {addr:#x}");
        args.push(HalArg::Address(addr));
    }
    for &value in &cli.values {
        args.push(HalArg::Value(value.to_le_bytes().to_vec()));
    }

    hal.kernel_exec(program, kernel, nd_range, &args, work_dim).context("running kernel")?;
    info!("kernel `{}` completed", cli.kernel);
    Ok(())
}
