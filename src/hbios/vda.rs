use iz80::{Cpu, Reg16, Reg8};
use log::debug;

use super::*;

const VDADEV_EMU: u8 = 0x00;

impl HbiosDispatch {
    /// No display/keypad hardware is modeled; every DSKY call reports the
    /// same thing.
    pub(crate) fn dsky(&mut self, func: u8) -> Outcome {
        debug!("[HBIOS] DSKY function {:02X}: no hardware", func);
        Outcome::Complete(ERR_NOHW)
    }

    /// The video display adapter is a glass tty over the console: writes
    /// pass through, the keyboard is the console input queue, and
    /// cursor/attribute calls keep local state for the guest to read back.
    pub(crate) fn vda(&mut self, func: u8, cpu: &mut Cpu) -> Outcome {
        let status = match func {
            VDAINIT | VDARESET => {
                self.vda = super::VdaState::new();
                ERR_NONE
            }
            VDAQUERY => {
                cpu.registers().set8(Reg8::D, self.vda.rows);
                cpu.registers().set8(Reg8::E, self.vda.cols);
                cpu.registers().set16(Reg16::HL, 0);
                ERR_NONE
            }
            VDADEVICE => {
                cpu.registers().set8(Reg8::D, VDADEV_EMU);
                cpu.registers().set8(Reg8::E, 0);
                ERR_NONE
            }
            VDASCS => {
                self.vda.cursor_style = cpu.registers().get8(Reg8::E);
                ERR_NONE
            }
            VDASCP => {
                let row = cpu.registers().get8(Reg8::D);
                let col = cpu.registers().get8(Reg8::E);
                self.vda.cur_row = row.min(self.vda.rows.saturating_sub(1));
                self.vda.cur_col = col.min(self.vda.cols.saturating_sub(1));
                ERR_NONE
            }
            VDASAT => {
                self.vda.attr = cpu.registers().get8(Reg8::E);
                ERR_NONE
            }
            VDASCO => {
                self.vda.color = cpu.registers().get8(Reg8::E);
                ERR_NONE
            }
            VDAWRC => {
                let ch = cpu.registers().get8(Reg8::E) & 0x7F;
                self.console.write_byte(ch);
                ERR_NONE
            }
            VDAFIL => {
                let ch = cpu.registers().get8(Reg8::E) & 0x7F;
                let count = cpu.registers().get16(Reg16::HL);
                let limit = self.vda.rows as u16 * self.vda.cols as u16;
                for _ in 0..count.min(limit) {
                    self.console.write_byte(ch);
                }
                ERR_NONE
            }
            VDACPY | VDASCR => {
                // No addressable frame buffer behind a byte console.
                ERR_NONE
            }
            VDAKST => {
                return Outcome::Complete(if self.console.has_input() { 1 } else { 0 });
            }
            VDAKFL => {
                self.console.clear_queue();
                ERR_NONE
            }
            VDAKRD => {
                // Same contract as console input, including the
                // non-blocking waiting state.
                return self.cio(CIOIN, cpu);
            }
            VDARDC => {
                cpu.registers().set8(Reg8::E, b' ');
                ERR_NONE
            }
            _ => ERR_NOFUNC,
        };
        Outcome::Complete(status)
    }
}
