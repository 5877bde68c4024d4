use chrono::{Datelike, Local, Timelike};
use iz80::{Cpu, Reg16, Reg8};
use log::debug;

use super::*;
use crate::vm::memory::MemBus;

const RTCDEV_SOFT: u8 = 0x00;

fn bcd(v: u8) -> u8 {
    ((v / 10) << 4) | (v % 10)
}

/// Current host time as the 6-byte RomWBW record: YY MM DD HH MM SS, BCD.
fn host_time_bcd() -> [u8; 6] {
    let now = Local::now();
    [
        bcd((now.year() % 100) as u8),
        bcd(now.month() as u8),
        bcd(now.day() as u8),
        bcd(now.hour() as u8),
        bcd(now.minute() as u8),
        bcd(now.second() as u8),
    ]
}

impl HbiosDispatch {
    pub(crate) fn rtc(&mut self, func: u8, cpu: &mut Cpu, mem: &mut MemBus) -> Outcome {
        let status = match func {
            RTCGETTIM => {
                let hl = cpu.registers().get16(Reg16::HL);
                for (i, b) in host_time_bcd().iter().enumerate() {
                    mem.store(hl.wrapping_add(i as u16), *b);
                }
                ERR_NONE
            }
            RTCSETTIM => {
                // The host clock stays authoritative; accept and log.
                let hl = cpu.registers().get16(Reg16::HL);
                let mut t = [0u8; 6];
                for (i, b) in t.iter_mut().enumerate() {
                    *b = mem.fetch(hl.wrapping_add(i as u16));
                }
                debug!("[HBIOS] RTCSETTIM {:02X?} ignored", t);
                ERR_NONE
            }
            RTCGETBYT => {
                let idx = cpu.registers().get8(Reg8::E) as usize;
                cpu.registers().set8(Reg8::E, self.nvram[idx]);
                ERR_NONE
            }
            RTCSETBYT => {
                let idx = cpu.registers().get8(Reg8::E) as usize;
                self.nvram[idx] = cpu.registers().get8(Reg8::D);
                ERR_NONE
            }
            RTCGETBLK => {
                let hl = cpu.registers().get16(Reg16::HL);
                for (i, b) in self.nvram.iter().enumerate() {
                    mem.store(hl.wrapping_add(i as u16), *b);
                }
                ERR_NONE
            }
            RTCSETBLK => {
                let hl = cpu.registers().get16(Reg16::HL);
                for i in 0..self.nvram.len() {
                    self.nvram[i] = mem.fetch(hl.wrapping_add(i as u16));
                }
                ERR_NONE
            }
            RTCGETALM => {
                let hl = cpu.registers().get16(Reg16::HL);
                for (i, b) in self.alarm.iter().enumerate() {
                    mem.store(hl.wrapping_add(i as u16), *b);
                }
                ERR_NONE
            }
            RTCSETALM => {
                let hl = cpu.registers().get16(Reg16::HL);
                for i in 0..self.alarm.len() {
                    self.alarm[i] = mem.fetch(hl.wrapping_add(i as u16));
                }
                ERR_NONE
            }
            RTCINIT => ERR_NONE,
            RTCQUERY => {
                cpu.registers().set16(Reg16::DE, 0);
                ERR_NONE
            }
            RTCDEVICE => {
                cpu.registers().set8(Reg8::D, RTCDEV_SOFT);
                cpu.registers().set8(Reg8::E, 0);
                ERR_NONE
            }
            _ => ERR_NOFUNC,
        };
        Outcome::Complete(status)
    }
}

#[cfg(test)]
mod tests {
    use super::bcd;

    #[test]
    fn bcd_encoding() {
        assert_eq!(bcd(0), 0x00);
        assert_eq!(bcd(9), 0x09);
        assert_eq!(bcd(10), 0x10);
        assert_eq!(bcd(59), 0x59);
        assert_eq!(bcd(99), 0x99);
    }
}
