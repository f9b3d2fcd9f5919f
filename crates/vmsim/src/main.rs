use clap::{Parser, Subcommand};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use vmm::{
    FaultError, ImageBuilder, MemFile, MemFileSystem, PAGE_SIZE, PageNumber, PolicyKind,
    SpaceId, VirtualAddress, VirtualMemory, VmConfig,
};

mod console;
mod trace;

use console::Console;
use trace::Op;

#[derive(Parser)]
#[command(name = "vmsim")]
#[command(about = "Demand paging simulator for the Polaris virtual memory manager")]
struct Args {
    /// Increase log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a demo NOFF executable with patterned code and data
    MakeImage {
        /// Code segment size in bytes
        #[arg(long, default_value_t = 1024)]
        code: usize,

        /// Initialized data segment size in bytes
        #[arg(long, default_value_t = 256)]
        data: usize,

        /// Uninitialized data segment size in bytes
        #[arg(long, default_value_t = 512)]
        bss: usize,

        /// Emit the header in big-endian byte order
        #[arg(long)]
        big_endian: bool,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Load an executable and replay memory accesses against it
    Run {
        /// NOFF executable to load
        image: PathBuf,

        /// Access trace; without one every page is written and read back
        #[arg(short, long)]
        trace: Option<PathBuf>,

        /// TOML file with VmConfig settings
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Replacement policy (fifo, lifo, random, clock, enhanced-clock, lru)
        #[arg(long)]
        policy: Option<PolicyKind>,

        /// Number of physical frames
        #[arg(long)]
        frames: Option<usize>,

        /// Residency ceiling per address space, in pages
        #[arg(long)]
        max_resident: Option<usize>,

        /// Demand paging threshold and eager prefix, in pages
        #[arg(long)]
        min_resident: Option<usize>,

        /// Seed for the random policy
        #[arg(long)]
        seed: Option<u64>,

        /// Print the page table after the run
        #[arg(long)]
        dump: bool,
    },
}

/// Settings given on the command line, applied over the configuration file.
struct Overrides {
    policy: Option<PolicyKind>,
    frames: Option<usize>,
    max_resident: Option<usize>,
    min_resident: Option<usize>,
    seed: Option<u64>,
}

fn load_config(path: Option<&Path>, overrides: Overrides) -> Result<VmConfig, Box<dyn Error>> {
    let mut config = match path {
        Some(path) => toml::from_str::<VmConfig>(&fs::read_to_string(path)?)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?,
        None => VmConfig::default(),
    };

    if let Some(policy) = overrides.policy {
        config.policy = policy;
    }
    if let Some(frames) = overrides.frames {
        config.num_frames = frames;
    }
    if let Some(max_resident) = overrides.max_resident {
        config.max_resident = max_resident;
    }
    if let Some(min_resident) = overrides.min_resident {
        config.min_resident = min_resident;
    }
    if let Some(seed) = overrides.seed {
        config.seed = seed;
    }

    config.validate()?;
    Ok(config)
}

fn make_image(
    code: usize,
    data: usize,
    bss: usize,
    big_endian: bool,
    output: PathBuf,
) -> Result<(), Box<dyn Error>> {
    let code_bytes: Vec<u8> = (0..code).map(|i| (i % 251) as u8).collect();
    let data_bytes: Vec<u8> = (0..data).map(|i| 0xD0 ^ (i % 16) as u8).collect();
    let image = ImageBuilder::new()
        .code(&code_bytes)
        .data(&data_bytes)
        .bss(bss)
        .big_endian(big_endian)
        .build();

    fs::write(&output, &image)?;
    println!(
        "{}: {} bytes (code {}, data {}, bss {})",
        output.display(),
        image.len(),
        code,
        data,
        bss
    );
    Ok(())
}

/// Byte written to every address of `page` by the default sweep.
fn sweep_pattern(page: usize) -> u8 {
    (page as u8).wrapping_mul(37) ^ 0xA5
}

/// Writes every page, then reads every page back and compares.
fn sweep(
    vm: &mut VirtualMemory<MemFileSystem>,
    id: SpaceId,
    num_pages: usize,
) -> Result<usize, FaultError> {
    for vpn in 0..num_pages {
        let data = [sweep_pattern(vpn); PAGE_SIZE];
        vm.write_user(id, PageNumber::new(vpn).start(), &data)?;
    }

    let mut mismatches = 0;
    for vpn in 0..num_pages {
        let mut data = [0u8; PAGE_SIZE];
        vm.read_user(id, PageNumber::new(vpn).start(), &mut data)?;
        if data.iter().any(|b| *b != sweep_pattern(vpn)) {
            log::error!("page {vpn}: read back differs from what was written");
            mismatches += 1;
        }
    }
    Ok(mismatches)
}

fn replay(
    vm: &mut VirtualMemory<MemFileSystem>,
    id: SpaceId,
    ops: &[Op],
) -> Result<(), FaultError> {
    for op in ops {
        match *op {
            Op::Read { addr, len } => {
                let mut buf = vec![0u8; len];
                vm.read_user(id, VirtualAddress::new(addr), &mut buf)?;
                let hex: Vec<String> = buf.iter().map(|b| format!("{b:02x}")).collect();
                println!("r {addr:#x}: {}", hex.join(" "));
            }
            Op::Write { addr, byte, len } => {
                vm.write_user(id, VirtualAddress::new(addr), &vec![byte; len])?;
                println!("w {addr:#x}: {len} bytes of {byte:#04x}");
            }
        }
    }
    Ok(())
}

fn run(
    image: PathBuf,
    trace: Option<PathBuf>,
    config: VmConfig,
    dump: bool,
) -> Result<(), Box<dyn Error>> {
    let executable = MemFile::from_bytes(fs::read(&image)?);
    let ops = match &trace {
        Some(path) => Some(trace::parse(&fs::read_to_string(path)?)?),
        None => None,
    };

    let mut vm = VirtualMemory::new(config, MemFileSystem::new())?;
    let id = vm.create(&executable)?;
    let context = vm.install(id)?;
    println!(
        "{}: space {} with {} pages, sp {:#x}, {} frames, {} replacement",
        image.display(),
        id,
        context.num_pages,
        context.sp(),
        config.num_frames,
        vm.policy_kind()
    );

    let result = match &ops {
        Some(ops) => replay(&mut vm, id, ops).map(|()| 0),
        None => sweep(&mut vm, id, context.num_pages),
    };

    let mut failed = false;
    match result {
        Ok(0) => {}
        Ok(mismatches) => {
            println!("{mismatches} pages read back wrong");
            failed = true;
        }
        Err(err) if err.is_fatal() => {
            log::error!("space {id} terminated: {err}");
            println!("space {id} terminated: {err}");
            failed = true;
        }
        Err(err) => return Err(err.into()),
    }

    vm.check_invariants()?;
    if dump {
        if let Some(space) = vm.space(id) {
            print!("{}", space.page_table());
        }
    }
    println!("{}", vm.stats());

    vm.destroy(id);
    vm.check_invariants()?;

    if failed {
        return Err("run failed".into());
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    Console::init(console::level_for(args.verbose));

    match args.command {
        Command::MakeImage {
            code,
            data,
            bss,
            big_endian,
            output,
        } => make_image(code, data, bss, big_endian, output),
        Command::Run {
            image,
            trace,
            config,
            policy,
            frames,
            max_resident,
            min_resident,
            seed,
            dump,
        } => {
            let config = load_config(
                config.as_deref(),
                Overrides {
                    policy,
                    frames,
                    max_resident,
                    min_resident,
                    seed,
                },
            )?;
            run(image, trace, config, dump)
        }
    }
}
