use iz80::Cpu;
use log::{debug, error, info};

use crate::hbios::{HbiosDispatch, RESET_COLD, RESET_WARM};
use crate::io::console::Console;
use crate::vm::machine::GuestBus;
use crate::vm::memory::{MemBus, BANK_BOOT};

/// Why a batch stopped early.
pub enum StepOutcome {
    Running,
    /// Non-blocking input stall: PC is parked at the HBIOS entry and the
    /// host must queue input, then re-drive the batch loop.
    WaitingForInput,
    Exit(i32),
    Fatal(String),
}

pub struct EmulatorConfig {
    pub cpu_8080: bool,
    pub main_entry: u16,
    pub strict_io: bool,
    pub bank_port: Option<u8>,
    pub max_slices: Option<u32>,
    pub blocking_input: bool,
    /// Embedded hosts set this so a cold reset terminates the session
    /// (exit code 0) instead of restarting the ROM.
    pub exit_on_cold_reset: bool,
    pub trace: bool,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            cpu_8080: false,
            main_entry: crate::hbios::MAIN_ENTRY,
            strict_io: false,
            bank_port: None,
            max_slices: None,
            blocking_input: false,
            exit_on_cold_reset: false,
            trace: false,
        }
    }
}

/// One emulated machine: CPU, bus, and HBIOS service layer. A fresh start
/// is a fresh `Emulator`; disk buffers worth keeping should be detached
/// and re-attached by the host.
pub struct Emulator {
    pub cpu: Cpu,
    pub bus: GuestBus,
    pub hbios: HbiosDispatch,
    exit_on_cold_reset: bool,
}

impl Emulator {
    pub fn new(
        rom: &[u8],
        console: Box<dyn Console>,
        config: EmulatorConfig,
    ) -> Result<Self, String> {
        let mut mem = MemBus::new();
        mem.enable_banking();
        mem.load_rom(rom)?;
        let bus = GuestBus::new(mem, config.bank_port, config.strict_io);

        let mut cpu = if config.cpu_8080 {
            Cpu::new_8080()
        } else {
            Cpu::new_z80()
        };
        cpu.set_trace(config.trace);

        let mut hbios = HbiosDispatch::new(console);
        hbios.main_entry = config.main_entry;
        hbios.blocking_input = config.blocking_input;
        hbios.max_slices = config.max_slices;

        let mut emu = Self {
            cpu,
            bus,
            hbios,
            exit_on_cold_reset: config.exit_on_cold_reset,
        };
        crate::hbios::init::run(&mut emu.bus.mem, &mut emu.hbios.disks);
        // The proxy ROM also announces readiness through the signal port;
        // enabling here covers ROMs that call the entry straight away.
        emu.hbios.trapping_enabled = true;
        Ok(emu)
    }

    pub fn attach_disk_file(&mut self, unit: usize, path: &std::path::Path) -> Result<(), String> {
        self.hbios.disks.attach_file(unit, path)
    }

    /// Run up to `limit` instructions. Typical batches are 10k-50k; the
    /// host drains console output and queues input between batches.
    pub fn run_batch(&mut self, limit: usize) -> StepOutcome {
        for _ in 0..limit {
            match self.step() {
                StepOutcome::Running => continue,
                other => return other,
            }
        }
        StepOutcome::Running
    }

    pub fn step(&mut self) -> StepOutcome {
        if self.hbios.console.exit_requested() {
            info!("[EMU] console requested exit");
            return StepOutcome::Exit(0);
        }

        // PC trap: service the call without executing an opcode. On
        // completion the simulated RET moved PC; while input is pending
        // PC stays parked here so the call retries.
        if self.hbios.trapping_enabled && self.cpu.registers().pc() == self.hbios.main_entry {
            self.hbios
                .handle_main_entry(&mut self.cpu, &mut self.bus.mem, true);
            if self.hbios.waiting_for_input {
                return StepOutcome::WaitingForInput;
            }
            if let Some(kind) = self.hbios.pending_reset.take() {
                return self.apply_reset(kind);
            }
            return StepOutcome::Running;
        }

        self.cpu.execute_instruction(&mut self.bus);

        // Drain I/O latched while the instruction held the bus.
        if !self.bus.pending_signals.is_empty() {
            for b in std::mem::take(&mut self.bus.pending_signals) {
                self.hbios.handle_signal(b);
            }
        }
        if self.bus.pending_hbios {
            self.bus.pending_hbios = false;
            self.hbios
                .handle_main_entry(&mut self.cpu, &mut self.bus.mem, false);
        }

        if let Some(kind) = self.hbios.pending_reset.take() {
            return self.apply_reset(kind);
        }
        if let Some(msg) = self.bus.fault.take() {
            error!("[EMU] {}", msg);
            return StepOutcome::Fatal(msg);
        }
        if self.cpu.is_halted() {
            // No interrupt source exists on this machine, so a HALT can
            // never resume.
            let pc = self.cpu.registers().pc();
            let msg = format!("HALT at PC={:04X} with no interrupt source", pc);
            error!("[EMU] {}", msg);
            return StepOutcome::Fatal(msg);
        }

        StepOutcome::Running
    }

    /// Carry out a reset requested by the system-reset call.
    fn apply_reset(&mut self, kind: u8) -> StepOutcome {
        match kind {
            RESET_WARM | RESET_COLD => {
                debug!(
                    "[EMU] {} reset",
                    if kind == RESET_COLD { "cold" } else { "warm" }
                );
                self.hbios.console.clear_queue();
                self.hbios.waiting_for_input = false;
                self.bus.mem.select_bank(BANK_BOOT);
                self.bus.mem.clear_shadow();
                self.cpu.registers().set_pc(0x0000);
                if kind == RESET_COLD && self.exit_on_cold_reset {
                    return StepOutcome::Exit(0);
                }
                StepOutcome::Running
            }
            other => {
                debug!("[EMU] reset type {} acknowledged", other);
                StepOutcome::Running
            }
        }
    }
}
