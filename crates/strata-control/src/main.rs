#![forbid(unsafe_code)]

// The workspace is also built for wasm32; the CLI only runs natively.
#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use std::io;
    use std::path::PathBuf;

    use anyhow::{bail, Context, Result};
    use clap::Parser;
    use strata_control::config::{parse_mode, parse_size};
    use strata_control::server::serve;
    use strata_control::{ControlConfig, EmulatorControl, LocalControl};
    use strata_cpu_core::state::CpuMode;

    #[derive(Debug, Parser)]
    #[command(
        name = "strata-ctl",
        version,
        about = "Serve the strata control interface as line-delimited JSON over stdin/stdout"
    )]
    pub struct Args {
        /// Guest physical memory size (bytes, or with a K/M/G suffix).
        ///
        /// Environment variable: `STRATA_MEMORY_SIZE`.
        #[arg(long, value_parser = size_arg)]
        memory_size: Option<usize>,

        /// Upper bound on instructions per block.
        ///
        /// Environment variable: `STRATA_MAX_BLOCK_INSTS`.
        #[arg(long)]
        max_block_insts: Option<usize>,

        /// Number of compiled blocks kept in the cache.
        ///
        /// Environment variable: `STRATA_CACHE_CAPACITY`.
        #[arg(long)]
        cache_capacity: Option<usize>,

        /// Compile blocks without dead-flag elimination.
        #[arg(long)]
        no_flag_elimination: bool,

        /// Initial processor mode: `real`, `protected` or `v86`.
        ///
        /// Environment variable: `STRATA_START_MODE`.
        #[arg(long, value_parser = mode_arg)]
        mode: Option<CpuMode>,

        /// Raw image loaded into guest memory before serving.
        #[arg(long)]
        image: Option<PathBuf>,

        /// Physical address the image is loaded at.
        #[arg(long, default_value = "0x7c00", value_parser = addr_arg)]
        load_addr: u32,

        /// Initial EIP.
        #[arg(long, value_parser = addr_arg)]
        entry: Option<u32>,
    }

    fn size_arg(s: &str) -> Result<usize, String> {
        parse_size(s).ok_or_else(|| format!("invalid size {s:?}"))
    }

    fn mode_arg(s: &str) -> Result<CpuMode, String> {
        parse_mode(s).ok_or_else(|| format!("unknown mode {s:?}"))
    }

    fn addr_arg(s: &str) -> Result<u32, String> {
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => s.parse(),
        };
        parsed.map_err(|e| format!("invalid address {s:?}: {e}"))
    }

    fn config(args: &Args) -> Result<ControlConfig> {
        let mut config = ControlConfig::from_env().context("reading STRATA_* environment")?;
        if let Some(size) = args.memory_size {
            config.memory_size = size;
        }
        if let Some(n) = args.max_block_insts {
            config.cpu.max_block_insts = n;
        }
        if let Some(n) = args.cache_capacity {
            config.cpu.cache_capacity = n;
        }
        if args.no_flag_elimination {
            config.cpu.flag_elimination = false;
        }
        if let Some(mode) = args.mode {
            config.start_mode = mode;
        }
        if config.memory_size == 0 {
            bail!("guest memory size must be non-zero");
        }
        Ok(config)
    }

    pub fn main() -> Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(io::stderr)
            .init();

        let args = Args::parse();
        let config = config(&args)?;
        let mut control = LocalControl::new(&config);

        if let Some(path) = &args.image {
            let image = std::fs::read(path)
                .with_context(|| format!("reading image {}", path.display()))?;
            control
                .set_physical_memory(args.load_addr, &image)
                .with_context(|| format!("loading image at {:#x}", args.load_addr))?;
            tracing::info!(
                path = %path.display(),
                addr = args.load_addr,
                len = image.len(),
                "image loaded"
            );
        }
        if let Some(entry) = args.entry.or(args.image.as_ref().map(|_| args.load_addr)) {
            control.vcpu_mut().cpu.eip = entry;
        }

        let stdin = io::stdin();
        let stats = serve(&mut control, stdin.lock(), io::stdout().lock())
            .context("serving control requests")?;
        tracing::info!(
            requests = stats.requests,
            malformed = stats.malformed,
            "input closed"
        );
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn main() -> anyhow::Result<()> {
    native::main()
}
