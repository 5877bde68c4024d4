use iz80::{Cpu, Reg16, Reg8};
use log::debug;

use super::hcb::*;
use super::*;
use crate::vm::memory::{MemBus, BANK_BIOS};

// SYSGET subfunctions (C register).
const SYSGET_CIOCNT: u8 = 0x00;
const SYSGET_CIODEV: u8 = 0x01;
const SYSGET_DIOCNT: u8 = 0x10;
const SYSGET_DIODEV: u8 = 0x11;
const SYSGET_RTCCNT: u8 = 0x20;
const SYSGET_VDACNT: u8 = 0x40;
const SYSGET_SNDCNT: u8 = 0x50;
const SYSGET_TIMER: u8 = 0xD0;
const SYSGET_SECS: u8 = 0xD1;
const SYSGET_BOOTINFO: u8 = 0xD2;
const SYSGET_CPUINFO: u8 = 0xF0;
const SYSGET_MEMINFO: u8 = 0xF1;
const SYSGET_BNKINFO: u8 = 0xF2;

// SYSINT subfunctions.
const SYSINT_INFO: u8 = 0x00;

const TICKS_PER_SEC: u64 = 50;

fn hcb_byte(mem: &MemBus, offset: u16) -> u8 {
    mem.read_bank(BANK_BIOS, HCB_BASE + offset)
}

impl HbiosDispatch {
    pub(crate) fn sys(&mut self, func: u8, cpu: &mut Cpu, mem: &mut MemBus) -> Outcome {
        let status = match func {
            SYSRESET => {
                let kind = cpu.registers().get8(Reg8::C);
                debug!("[HBIOS] SYSRESET type {}", kind);
                self.pending_reset = Some(kind);
                ERR_NONE
            }
            SYSVER => {
                cpu.registers().set16(Reg16::DE, VERSION_WORD);
                cpu.registers().set8(Reg8::L, hcb_byte(mem, HCB_PLATFORM));
                ERR_NONE
            }
            SYSSETBNK => {
                let bank = cpu.registers().get8(Reg8::C);
                let previous = mem.current_bank();
                init::seed_ram_bank(mem, bank);
                mem.select_bank(bank);
                cpu.registers().set8(Reg8::C, previous);
                ERR_NONE
            }
            SYSGETBNK => {
                cpu.registers().set8(Reg8::C, mem.current_bank());
                ERR_NONE
            }
            SYSSETCPY => {
                self.copy_dst_bank = cpu.registers().get8(Reg8::D);
                self.copy_src_bank = cpu.registers().get8(Reg8::E);
                self.copy_len = cpu.registers().get16(Reg16::HL);
                ERR_NONE
            }
            SYSBNKCPY => {
                let src = cpu.registers().get16(Reg16::HL);
                let dst = cpu.registers().get16(Reg16::DE);
                debug!(
                    "[HBIOS] SYSBNKCPY {:02X}:{:04X} -> {:02X}:{:04X} len {:04X}",
                    self.copy_src_bank, src, self.copy_dst_bank, dst, self.copy_len
                );
                for i in 0..self.copy_len {
                    let b = mem.read_bank(self.copy_src_bank, src.wrapping_add(i));
                    mem.write_bank(self.copy_dst_bank, dst.wrapping_add(i), b);
                }
                ERR_NONE
            }
            SYSALLOC => {
                let size = cpu.registers().get16(Reg16::HL);
                let top = self.heap_top;
                match top.checked_add(size) {
                    Some(next) if next <= super::HEAP_END => {
                        self.heap_top = next;
                        cpu.registers().set16(Reg16::HL, top);
                        ERR_NONE
                    }
                    _ => ERR_NOMEM,
                }
            }
            SYSFREE => {
                // The heap never reclaims; matching firmware behavior.
                ERR_NONE
            }
            SYSGET => self.sys_get(cpu, mem),
            SYSSET => {
                debug!(
                    "[HBIOS] SYSSET {:02X} not supported",
                    cpu.registers().get8(Reg8::C)
                );
                ERR_UNDEF
            }
            SYSPEEK => {
                let bank = cpu.registers().get8(Reg8::D);
                let addr = cpu.registers().get16(Reg16::HL);
                cpu.registers().set8(Reg8::E, mem.read_bank(bank, addr));
                ERR_NONE
            }
            SYSPOKE => {
                let bank = cpu.registers().get8(Reg8::D);
                let addr = cpu.registers().get16(Reg16::HL);
                let value = cpu.registers().get8(Reg8::E);
                mem.write_bank(bank, addr, value);
                ERR_NONE
            }
            SYSINT => match cpu.registers().get8(Reg8::C) {
                SYSINT_INFO => {
                    // No interrupt vector table on this machine.
                    cpu.registers().set8(Reg8::E, 0);
                    ERR_NONE
                }
                _ => ERR_UNDEF,
            },
            _ => ERR_NOFUNC,
        };
        Outcome::Complete(status)
    }

    fn sys_get(&mut self, cpu: &mut Cpu, mem: &MemBus) -> i8 {
        let sub = cpu.registers().get8(Reg8::C);
        match sub {
            SYSGET_CIOCNT | SYSGET_RTCCNT | SYSGET_VDACNT | SYSGET_SNDCNT => {
                cpu.registers().set8(Reg8::E, 1);
                ERR_NONE
            }
            SYSGET_CIODEV => {
                cpu.registers().set8(Reg8::D, 0);
                cpu.registers().set8(Reg8::E, 0);
                ERR_NONE
            }
            SYSGET_DIOCNT => {
                cpu.registers().set8(Reg8::E, self.disks.loaded_count() as u8);
                ERR_NONE
            }
            SYSGET_DIODEV => {
                let unit = cpu.registers().get8(Reg8::D) as usize;
                if self.disks.is_loaded(unit) {
                    self.dio_device_info(unit, cpu)
                } else {
                    ERR_NOUNIT
                }
            }
            SYSGET_TIMER => {
                let ticks = self.started.elapsed().as_millis() as u64 * TICKS_PER_SEC / 1000;
                cpu.registers().set16(Reg16::DE, (ticks >> 16) as u16);
                cpu.registers().set16(Reg16::HL, ticks as u16);
                ERR_NONE
            }
            SYSGET_SECS => {
                let secs = self.started.elapsed().as_secs();
                cpu.registers().set16(Reg16::DE, (secs >> 16) as u16);
                cpu.registers().set16(Reg16::HL, secs as u16);
                ERR_NONE
            }
            SYSGET_BOOTINFO => {
                cpu.registers().set8(Reg8::L, hcb_byte(mem, HCB_BOOTBANK));
                cpu.registers().set8(Reg8::D, hcb_byte(mem, HCB_BOOTVOL));
                cpu.registers().set8(Reg8::E, hcb_byte(mem, HCB_BOOTSLICE));
                ERR_NONE
            }
            SYSGET_CPUINFO => {
                // H = CPU family (Z80), L = MHz, DE = kHz.
                cpu.registers().set8(Reg8::H, 1);
                cpu.registers().set8(Reg8::L, hcb_byte(mem, HCB_CPUMHZ));
                let khz = u16::from_le_bytes([
                    hcb_byte(mem, HCB_CPUKHZ),
                    hcb_byte(mem, HCB_CPUKHZ + 1),
                ]);
                cpu.registers().set16(Reg16::DE, khz);
                ERR_NONE
            }
            SYSGET_MEMINFO => {
                cpu.registers().set8(Reg8::D, hcb_byte(mem, HCB_ROMBANKS));
                cpu.registers().set8(Reg8::E, hcb_byte(mem, HCB_RAMBANKS));
                ERR_NONE
            }
            SYSGET_BNKINFO => {
                cpu.registers().set8(Reg8::D, hcb_byte(mem, HCB_BIDBIOS));
                cpu.registers().set8(Reg8::E, hcb_byte(mem, HCB_BIDUSER));
                ERR_NONE
            }
            _ => {
                debug!("[HBIOS] SYSGET {:02X} not supported", sub);
                ERR_UNDEF
            }
        }
    }

    fn dio_device_info(&mut self, unit: usize, cpu: &mut Cpu) -> i8 {
        use crate::io::disk::Unit;
        match self.disks.get(unit) {
            Some(Unit::Mem(_)) => {
                cpu.registers().set8(Reg8::D, 0x00);
                cpu.registers().set8(Reg8::E, unit as u8);
                ERR_NONE
            }
            Some(Unit::Image(_)) => {
                cpu.registers().set8(Reg8::D, 0x03);
                cpu.registers().set8(Reg8::E, unit as u8);
                ERR_NONE
            }
            None => ERR_NOUNIT,
        }
    }
}
