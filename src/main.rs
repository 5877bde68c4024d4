use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use clap_derive::Parser;
use env_logger::Env;

use crate::io::disk::{FIRST_HARD_UNIT, UNIT_COUNT};
use crate::io::terminal::TerminalConsole;
use crate::vm::emulator::{Emulator, EmulatorConfig, StepOutcome};

mod hbios;
mod io;
mod vm;

const BATCH_SIZE: usize = 10_000;

#[derive(Parser, Debug)]
#[command(
    name = "wbwemu",
    about = "RomWBW Z80/8080 machine emulator",
    long_about = "Runs RomWBW-class firmware against an emulated banked memory system\n\
        and a host-side HBIOS. The ROM must be an HBIOS-proxy build; real-hardware\n\
        ROMs with device drivers are not supported.",
    version
)]
struct Cli {
    /// Path to the 512 KB ROM image
    rom_path: PathBuf,

    /// Attach a disk image to a unit: N=PATH (N = 2..15; 0 and 1 are the memory disks)
    #[arg(long = "disk", value_name = "N=PATH")]
    disks: Vec<String>,

    /// Halt emulation on access to unrecognized I/O ports
    #[arg(long)]
    strict_io: bool,

    /// Enable debug tracing
    #[arg(long)]
    debug: bool,

    /// Fixed per-unit slice count instead of the dynamic policy
    #[arg(long, value_name = "N")]
    max_slices: Option<u32>,

    /// Main HBIOS entry address (hex), default FFF0
    #[arg(long, value_name = "ADDR", value_parser = parse_hex16)]
    main_entry: Option<u16>,

    /// Override the bank-select I/O port (hex), default 78/7C
    #[arg(long, value_name = "PORT", value_parser = parse_hex8)]
    bank_port: Option<u8>,

    /// Emulate an 8080 instead of a Z80
    #[arg(long)]
    cpu_8080: bool,
}

fn parse_hex16(s: &str) -> Result<u16, String> {
    u16::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|e| e.to_string())
}

fn parse_hex8(s: &str) -> Result<u8, String> {
    u8::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|e| e.to_string())
}

/// "N=PATH" disk attachment argument.
fn parse_disk_spec(spec: &str) -> Result<(usize, PathBuf), String> {
    let (unit, path) = spec
        .split_once('=')
        .ok_or_else(|| format!("'{}' is not of the form N=PATH", spec))?;
    let unit: usize = unit
        .parse()
        .map_err(|_| format!("'{}' is not a unit number", unit))?;
    if unit >= UNIT_COUNT {
        return Err(format!("unit {} out of range (0..{})", unit, UNIT_COUNT - 1));
    }
    if unit < FIRST_HARD_UNIT {
        return Err(format!("unit {} is reserved for the memory disks", unit));
    }
    Ok((unit, PathBuf::from(path)))
}

fn main() {
    // Usage errors exit with 1; clap's default of 2 is reserved for ROM
    // load failures.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            exit(code);
        }
    };

    let filter = if cli.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(filter)).init();

    // Validate disk arguments before touching the terminal.
    let mut disk_specs = Vec::new();
    for spec in &cli.disks {
        match parse_disk_spec(spec) {
            Ok(parsed) => disk_specs.push(parsed),
            Err(e) => {
                eprintln!("wbwemu: {}", e);
                exit(1);
            }
        }
    }

    let rom = match std::fs::read(&cli.rom_path) {
        Ok(rom) => rom,
        Err(e) => {
            eprintln!("wbwemu: cannot read ROM {}: {}", cli.rom_path.display(), e);
            exit(2);
        }
    };

    let console = match TerminalConsole::new() {
        Ok(con) => con,
        Err(e) => {
            eprintln!("wbwemu: cannot initialize terminal: {}", e);
            exit(1);
        }
    };

    let config = EmulatorConfig {
        cpu_8080: cli.cpu_8080,
        main_entry: cli.main_entry.unwrap_or(hbios::MAIN_ENTRY),
        strict_io: cli.strict_io,
        bank_port: cli.bank_port,
        max_slices: cli.max_slices,
        // The terminal host waits inside the dispatch for input.
        blocking_input: true,
        exit_on_cold_reset: false,
        trace: false,
    };

    let mut emu = match Emulator::new(&rom, Box::new(console), config) {
        Ok(emu) => emu,
        Err(e) => {
            eprintln!("wbwemu: {}", e);
            exit(2);
        }
    };

    for (unit, path) in disk_specs {
        if let Err(e) = emu.attach_disk_file(unit, &path) {
            eprintln!("wbwemu: disk {}: {}", path.display(), e);
            exit(3);
        }
    }

    loop {
        match emu.run_batch(BATCH_SIZE) {
            StepOutcome::Running => {}
            StepOutcome::WaitingForInput => {
                // Blocking hosts rarely get here; yield briefly anyway.
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            StepOutcome::Exit(code) => {
                exit(code);
            }
            StepOutcome::Fatal(msg) => {
                eprintln!("wbwemu: fatal: {}", msg);
                exit(4);
            }
        }
    }
}
