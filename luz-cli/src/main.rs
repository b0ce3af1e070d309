use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use luz_asm::{disassemble, Assembler, Executable, Linker, ObjectImage};
use luz_cpu::{LuzSim, SimConfig};

/// Luz toolchain: assembler, linker and CPU simulator
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Assemble LASM sources into relocatable object images
    Assemble {
        /// Input .lasm files
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Output object file (single source only; defaults to the
        /// source name with a .lo extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Link object images into an executable
    Link {
        /// Input .lo files, in link order
        #[arg(required = true)]
        objects: Vec<PathBuf>,

        /// Output executable image
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Load an executable, run it to HALT and print the registers
    Run {
        exe: PathBuf,

        /// Debug-queue address (default 0xF0000)
        #[arg(long, value_parser = parse_addr)]
        queue_addr: Option<u32>,

        /// Treat queue-address stores as ordinary memory writes
        #[arg(long)]
        no_queue: bool,
    },

    /// Load an executable into the interactive debug shell
    Debug {
        exe: PathBuf,

        /// Debug-queue address (default 0xF0000)
        #[arg(long, value_parser = parse_addr)]
        queue_addr: Option<u32>,

        /// Treat queue-address stores as ordinary memory writes
        #[arg(long)]
        no_queue: bool,
    },
}

fn parse_addr(s: &str) -> std::result::Result<u32, String> {
    let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (s, 10),
    };
    u32::from_str_radix(digits, radix).map_err(|e| format!("invalid address '{}': {}", s, e))
}

fn main() -> Result<()> {
    let env = env_logger::Env::default().filter_or("LUZ_LOG", "warn");
    env_logger::init_from_env(env);

    match Args::parse().command {
        Command::Assemble { sources, output } => cmd_assemble(&sources, output),
        Command::Link { objects, output } => cmd_link(&objects, &output),
        Command::Run {
            exe,
            queue_addr,
            no_queue,
        } => cmd_run(&exe, queue_addr, no_queue),
        Command::Debug {
            exe,
            queue_addr,
            no_queue,
        } => cmd_debug(&exe, queue_addr, no_queue),
    }
}

fn cmd_assemble(sources: &[PathBuf], output: Option<PathBuf>) -> Result<()> {
    if sources.len() > 1 && output.is_some() {
        bail!("-o is only valid with a single source file");
    }
    let asm = Assembler::new();
    for source in sources {
        let obj = asm.assemble_file(source)?;
        let out = match &output {
            Some(path) => path.clone(),
            None => source.with_extension("lo"),
        };
        obj.save(&out)
            .with_context(|| format!("failed to write {}", out.display()))?;
        info!("{} -> {}", source.display(), out.display());
    }
    Ok(())
}

fn cmd_link(objects: &[PathBuf], output: &PathBuf) -> Result<()> {
    let images = objects
        .iter()
        .map(ObjectImage::load)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let exe = Linker::new().link(images)?;
    exe.save(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!("linked {} object(s) -> {}", objects.len(), output.display());
    Ok(())
}

fn load_sim(exe_path: &PathBuf, queue_addr: Option<u32>, no_queue: bool) -> Result<LuzSim> {
    let exe = Executable::load(exe_path)
        .with_context(|| format!("failed to load {}", exe_path.display()))?;
    let config = SimConfig {
        entry: exe.entry,
        debug_queue_addr: if no_queue {
            None
        } else {
            Some(queue_addr.unwrap_or(luz_isa::ADDR_DEBUG_QUEUE))
        },
    };
    let mut sim = LuzSim::new(config);
    for seg in &exe.segments {
        sim.load_segment(seg.base, &seg.data);
    }
    Ok(sim)
}

fn cmd_run(exe: &PathBuf, queue_addr: Option<u32>, no_queue: bool) -> Result<()> {
    let mut sim = load_sim(exe, queue_addr, no_queue)?;
    sim.run();
    print!("{}", sim.dump_registers(true));
    if !sim.debug_queue().is_empty() {
        println!("debug queue: {:?}", sim.debug_queue());
    }
    if let (true, Some(cause)) = (sim.faulted(), sim.last_cause()) {
        bail!("runtime error at {:#010x}: {:?}", sim.pc(), cause);
    }
    Ok(())
}

const HELP: &str = r#"
Supported commands:

    s [nsteps]      Single step. If 'nsteps' is given, steps that
                    many instructions.

    r               Print the contents of all registers.

    sr              Single step, then print all registers.

    m <addr> [n]    Show n bytes of memory at <addr> (default 64).

    dq              Print the debug-queue contents.

    rst             Restart the simulator (memory is kept).

    set alias 0|1   Show plain ($rN) or alias ($sp, ...) register
                    names.

    ? or help       Print this help message.

    q               Quit.
"#;

fn cmd_debug(exe: &PathBuf, queue_addr: Option<u32>, no_queue: bool) -> Result<()> {
    let mut sim = load_sim(exe, queue_addr, no_queue)?;
    let mut alias = true;

    println!("\nLuz simulator started at {:#010x}\n", sim.pc());
    prompt(&sim, alias)?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        let cmd = match parts.next() {
            Some(cmd) => cmd,
            None => {
                prompt(&sim, alias)?;
                continue;
            }
        };
        let args: Vec<&str> = parts.collect();

        match cmd {
            "s" => {
                let n = match args.first().map(|s| s.parse::<u64>()) {
                    Some(Ok(n)) => n,
                    Some(Err(_)) => {
                        println!("Error: expected a step count");
                        prompt(&sim, alias)?;
                        continue;
                    }
                    None => 1,
                };
                sim.step_n(n);
                report_halt(&sim);
            }
            "r" => print!("{}", sim.dump_registers(alias)),
            "sr" => {
                sim.step();
                report_halt(&sim);
                print!("{}", sim.dump_registers(alias));
            }
            "m" => match parse_mem_args(&args) {
                Ok((addr, count)) => dump_memory(&sim, addr, count),
                Err(message) => println!("Error: {}", message),
            },
            "dq" => println!("{:?}", sim.debug_queue()),
            "rst" => {
                sim.restart();
                println!("Restarted");
            }
            "set" => match args.as_slice() {
                ["alias", value] => match parse_addr(value) {
                    Ok(v) => alias = v != 0,
                    Err(message) => println!("Error: {}", message),
                },
                _ => println!("Error: no such parameter"),
            },
            "?" | "help" => println!("{}", HELP),
            "q" => return Ok(()),
            _ => println!("Unknown command. To get some help, type ? or help"),
        }

        prompt(&sim, alias)?;
    }
    Ok(())
}

/// Print the debugger prompt: current PC plus the disassembly of the
/// instruction the next step would execute.
fn prompt(sim: &LuzSim, alias: bool) -> Result<()> {
    let instr = sim
        .current_instruction()
        .and_then(|word| disassemble(word, sim.pc(), alias))
        .unwrap_or_else(|| "??".to_string());
    print!("[{:#010x}] [{}] >> ", sim.pc(), instr);
    io::stdout().flush()?;
    Ok(())
}

fn report_halt(sim: &LuzSim) {
    if let (true, Some(cause)) = (sim.faulted(), sim.last_cause()) {
        println!("CPU halted: {:?}", cause);
    }
}

fn parse_mem_args(args: &[&str]) -> std::result::Result<(u32, u32), String> {
    match args {
        [addr] => Ok((parse_addr(addr)?, 64)),
        [addr, count] => Ok((parse_addr(addr)?, parse_addr(count)?)),
        _ => Err("expected a memory address".to_string()),
    }
}

fn dump_memory(sim: &LuzSim, addr: u32, count: u32) {
    for row in 0..count.div_ceil(16) {
        let base = addr + row * 16;
        print!("{:#010x}:  ", base);
        for i in 0..16u32 {
            if i % 4 == 0 {
                print!(" ");
            }
            if row * 16 + i < count {
                print!(" {:02X}", sim.peek8(base + i));
            }
        }
        println!();
    }
}
