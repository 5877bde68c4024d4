pub mod hcb;
pub mod init;

mod cio;
mod dio;
mod rtc;
mod snd;
mod sys;
mod vda;

#[cfg(test)]
mod tests;

use std::time::Instant;

use iz80::{Cpu, Reg16, Reg8};
use log::debug;

use crate::io::console::Console;
use crate::io::disk::{DiskStore, UNIT_COUNT};
use crate::vm::memory::MemBus;

// ---------------------------------------------------------------------------
// Function codes (B register). The disk family follows the canonical
// assignment: seek 0x12, read 0x13, write 0x14 -- no code serves two
// operations.
// ---------------------------------------------------------------------------

pub const CIOIN: u8 = 0x00;
pub const CIOOUT: u8 = 0x01;
pub const CIOIST: u8 = 0x02;
pub const CIOOST: u8 = 0x03;
pub const CIOINIT: u8 = 0x04;
pub const CIOQUERY: u8 = 0x05;
pub const CIODEVICE: u8 = 0x06;

pub const DIOSTATUS: u8 = 0x10;
pub const DIORESET: u8 = 0x11;
pub const DIOSEEK: u8 = 0x12;
pub const DIOREAD: u8 = 0x13;
pub const DIOWRITE: u8 = 0x14;
pub const DIOVERIFY: u8 = 0x15;
pub const DIOFORMAT: u8 = 0x16;
pub const DIODEVICE: u8 = 0x17;
pub const DIOMEDIA: u8 = 0x18;
pub const DIODEFMED: u8 = 0x19;
pub const DIOCAP: u8 = 0x1A;
pub const DIOGEOM: u8 = 0x1B;

pub const RTCGETTIM: u8 = 0x20;
pub const RTCSETTIM: u8 = 0x21;
pub const RTCGETBYT: u8 = 0x22;
pub const RTCSETBYT: u8 = 0x23;
pub const RTCGETBLK: u8 = 0x24;
pub const RTCSETBLK: u8 = 0x25;
pub const RTCGETALM: u8 = 0x26;
pub const RTCSETALM: u8 = 0x27;
pub const RTCINIT: u8 = 0x28;
pub const RTCQUERY: u8 = 0x29;
pub const RTCDEVICE: u8 = 0x2A;

pub const DSKYRESET: u8 = 0x30;
pub const DSKYDEVICE: u8 = 0x3A;

pub const VDAINIT: u8 = 0x40;
pub const VDAQUERY: u8 = 0x41;
pub const VDARESET: u8 = 0x42;
pub const VDADEVICE: u8 = 0x43;
pub const VDASCS: u8 = 0x44;
pub const VDASCP: u8 = 0x45;
pub const VDASAT: u8 = 0x46;
pub const VDASCO: u8 = 0x47;
pub const VDAWRC: u8 = 0x48;
pub const VDAFIL: u8 = 0x49;
pub const VDACPY: u8 = 0x4A;
pub const VDASCR: u8 = 0x4B;
pub const VDAKST: u8 = 0x4C;
pub const VDAKFL: u8 = 0x4D;
pub const VDAKRD: u8 = 0x4E;
pub const VDARDC: u8 = 0x4F;

pub const SNDRESET: u8 = 0x50;
pub const SNDVOL: u8 = 0x51;
pub const SNDPER: u8 = 0x52;
pub const SNDNOTE: u8 = 0x53;
pub const SNDPLAY: u8 = 0x54;
pub const SNDQUERY: u8 = 0x55;
pub const SNDDUR: u8 = 0x56;
pub const SNDDEVICE: u8 = 0x57;
pub const SNDBEEP: u8 = 0x58;

pub const EXTSLICE: u8 = 0xE0;

pub const SYSRESET: u8 = 0xF0;
pub const SYSVER: u8 = 0xF1;
pub const SYSSETBNK: u8 = 0xF2;
pub const SYSGETBNK: u8 = 0xF3;
pub const SYSSETCPY: u8 = 0xF4;
pub const SYSBNKCPY: u8 = 0xF5;
pub const SYSALLOC: u8 = 0xF6;
pub const SYSFREE: u8 = 0xF7;
pub const SYSGET: u8 = 0xF8;
pub const SYSSET: u8 = 0xF9;
pub const SYSPEEK: u8 = 0xFA;
pub const SYSPOKE: u8 = 0xFB;
pub const SYSINT: u8 = 0xFC;

// ---------------------------------------------------------------------------
// Result codes (signed bytes in A; Carry mirrors the sign bit).
// ---------------------------------------------------------------------------

pub const ERR_NONE: i8 = 0;
pub const ERR_UNDEF: i8 = -1;
pub const ERR_NOTIMPL: i8 = -2;
pub const ERR_NOFUNC: i8 = -3;
pub const ERR_NOUNIT: i8 = -4;
pub const ERR_NOMEM: i8 = -5;
pub const ERR_RANGE: i8 = -6;
pub const ERR_NOMEDIA: i8 = -7;
pub const ERR_NOHW: i8 = -8;
pub const ERR_IO: i8 = -9;
pub const ERR_READONLY: i8 = -10;
pub const ERR_TIMEOUT: i8 = -11;
pub const ERR_BADCFG: i8 = -12;
pub const ERR_INTERNAL: i8 = -13;

/// Default main HBIOS entry; a PC equal to this fires the dispatch trap.
pub const MAIN_ENTRY: u16 = 0xFFF0;

/// How one dispatch attempt ended. `Pending` is the non-blocking input
/// case: registers and PC are left alone so re-entering the dispatch
/// retries the same call once input arrives.
pub enum Outcome {
    Complete(i8),
    Pending,
}

/// Reset types carried by the system-reset call.
pub const RESET_INTERNAL: u8 = 0;
pub const RESET_WARM: u8 = 1;
pub const RESET_COLD: u8 = 2;
pub const RESET_USER: u8 = 3;

#[derive(Clone, Copy)]
enum SignalState {
    Idle,
    AwaitLo(usize),
    AwaitHi(usize, u8),
}

pub(crate) struct VdaState {
    pub rows: u8,
    pub cols: u8,
    pub cur_row: u8,
    pub cur_col: u8,
    pub attr: u8,
    pub color: u8,
    pub cursor_style: u8,
}

impl VdaState {
    fn new() -> Self {
        Self {
            rows: 25,
            cols: 80,
            cur_row: 0,
            cur_col: 0,
            attr: 0x07,
            color: 0x07,
            cursor_style: 0,
        }
    }
}

pub(crate) struct SndState {
    pub volume: [u8; 4],
    pub period: [u16; 4],
    pub note: [u16; 4],
    pub duration: u16,
}

impl SndState {
    fn new() -> Self {
        Self {
            volume: [0; 4],
            period: [0; 4],
            note: [0; 4],
            duration: 100,
        }
    }
}

// SYSALLOC hands out space from this window of the BIOS bank.
const HEAP_BASE: u16 = 0x6000;
const HEAP_END: u16 = 0x8000;

/// The HBIOS service layer. Reads the call from CPU registers, touches the
/// disk store / console / memory bus as needed, writes results back, and
/// simulates the RET when entered through the PC trap.
///
/// Cross-call state is deliberately small: per-unit seek positions, the
/// two-phase bank-copy scratch, and the signal-port state machine.
pub struct HbiosDispatch {
    pub console: Box<dyn Console>,
    pub disks: DiskStore,
    pub main_entry: u16,
    pub trapping_enabled: bool,
    pub waiting_for_input: bool,
    /// Blocking hosts poll the console inside CIOIN; non-blocking hosts
    /// get `Pending` and re-drive the dispatch when input arrives.
    pub blocking_input: bool,
    pub max_slices: Option<u32>,
    pub pending_reset: Option<u8>,

    pub(crate) unit_lba: [u32; UNIT_COUNT],
    pub(crate) unit_status: [i8; UNIT_COUNT],
    pub(crate) copy_dst_bank: u8,
    pub(crate) copy_src_bank: u8,
    pub(crate) copy_len: u16,
    signal_state: SignalState,
    pub(crate) family_entries: [u16; 6],
    pub(crate) nvram: [u8; 256],
    pub(crate) alarm: [u8; 6],
    pub(crate) vda: VdaState,
    pub(crate) snd: SndState,
    pub(crate) heap_top: u16,
    pub(crate) started: Instant,
}

impl HbiosDispatch {
    pub fn new(console: Box<dyn Console>) -> Self {
        Self {
            console,
            disks: DiskStore::new(),
            main_entry: MAIN_ENTRY,
            trapping_enabled: false,
            waiting_for_input: false,
            blocking_input: false,
            max_slices: None,
            pending_reset: None,
            unit_lba: [0; UNIT_COUNT],
            unit_status: [0; UNIT_COUNT],
            copy_dst_bank: 0,
            copy_src_bank: 0,
            copy_len: 0,
            signal_state: SignalState::Idle,
            family_entries: [0; 6],
            nvram: [0; 256],
            alarm: [0; 6],
            vda: VdaState::new(),
            snd: SndState::new(),
            heap_top: HEAP_BASE,
            started: Instant::now(),
        }
    }

    /// Service one HBIOS call. `via_trap` is true when the CPU arrived at
    /// the main entry (simulated RET on completion) and false for the
    /// dispatch-port path (the CPU already continued past the OUT).
    pub fn handle_main_entry(&mut self, cpu: &mut Cpu, mem: &mut MemBus, via_trap: bool) {
        let func = cpu.registers().get8(Reg8::B);
        debug!(
            "[HBIOS] call B={:02X} C={:02X} DE={:04X} HL={:04X}",
            func,
            cpu.registers().get8(Reg8::C),
            cpu.registers().get16(Reg16::DE),
            cpu.registers().get16(Reg16::HL),
        );

        let outcome = self.dispatch(func, cpu, mem);
        match outcome {
            Outcome::Pending => {
                self.waiting_for_input = true;
            }
            Outcome::Complete(status) => {
                self.waiting_for_input = false;
                set_result(cpu, status);
                if via_trap {
                    sim_ret(cpu, mem);
                }
            }
        }
    }

    fn dispatch(&mut self, func: u8, cpu: &mut Cpu, mem: &mut MemBus) -> Outcome {
        match func {
            0x00..=0x06 => self.cio(func, cpu),
            0x10..=0x1B => self.dio(func, cpu, mem),
            0x20..=0x2A => self.rtc(func, cpu, mem),
            DSKYRESET..=DSKYDEVICE => self.dsky(func),
            0x40..=0x4F => self.vda(func, cpu),
            0x50..=0x58 => self.snd(func, cpu),
            EXTSLICE => self.ext_slice(cpu),
            0xF0..=0xFC => self.sys(func, cpu, mem),
            _ => {
                debug!("[HBIOS] unknown function {:02X}", func);
                Outcome::Complete(ERR_NOFUNC)
            }
        }
    }

    /// Signal-port protocol: simple status bytes, plus an optional 3-byte
    /// sequence registering a per-family dispatch address (informational).
    pub fn handle_signal(&mut self, value: u8) {
        match self.signal_state {
            SignalState::Idle => match value {
                0x01 => debug!("[HBIOS] proxy ROM start"),
                0xFE => debug!("[HBIOS] proxy ROM pre-init"),
                0xFF => {
                    debug!("[HBIOS] proxy ROM handlers ready, trapping enabled");
                    self.trapping_enabled = true;
                }
                0xE0..=0xE5 => {
                    self.signal_state = SignalState::AwaitLo((value - 0xE0) as usize);
                }
                other => debug!("[HBIOS] unknown signal byte {:02X}", other),
            },
            SignalState::AwaitLo(family) => {
                self.signal_state = SignalState::AwaitHi(family, value);
            }
            SignalState::AwaitHi(family, lo) => {
                let addr = u16::from_le_bytes([lo, value]);
                self.family_entries[family] = addr;
                debug!(
                    "[HBIOS] family {} dispatch address registered: {:04X}",
                    family, addr
                );
                self.signal_state = SignalState::Idle;
            }
        }
    }
}

/// Write the result code into A and mirror its sign bit into Carry.
pub(crate) fn set_result(cpu: &mut Cpu, status: i8) {
    let a = status as u8;
    let f = (cpu.registers().get16(Reg16::AF) & 0xFF) as u8;
    let f = if a & 0x80 != 0 { f | 0x01 } else { f & !0x01 };
    cpu.registers().set16(Reg16::AF, ((a as u16) << 8) | f as u16);
}

/// Simulated RET: pop the return address from the guest stack into PC.
pub(crate) fn sim_ret(cpu: &mut Cpu, mem: &MemBus) {
    let sp = cpu.registers().get16(Reg16::SP);
    let lo = mem.fetch(sp);
    let hi = mem.fetch(sp.wrapping_add(1));
    cpu.registers().set_pc(u16::from_le_bytes([lo, hi]));
    cpu.registers().set16(Reg16::SP, sp.wrapping_add(2));
}

/// Unit number from C; the table has 16 entries.
pub(crate) fn unit_from_c(cpu: &mut Cpu) -> Option<usize> {
    let unit = cpu.registers().get8(Reg8::C) as usize;
    if unit < UNIT_COUNT {
        Some(unit)
    } else {
        None
    }
}
