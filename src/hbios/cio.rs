use iz80::{Cpu, Reg16, Reg8};
use log::debug;

use super::*;

// Reported console device: a plain serial device, unit 0.
const CIODEV_SERIAL: u8 = 0x00;

impl HbiosDispatch {
    pub(crate) fn cio(&mut self, func: u8, cpu: &mut Cpu) -> Outcome {
        match func {
            CIOIN => self.cio_in(cpu),
            CIOOUT => {
                // 7-bit output path.
                let ch = cpu.registers().get8(Reg8::E) & 0x7F;
                self.console.write_byte(ch);
                Outcome::Complete(ERR_NONE)
            }
            CIOIST => {
                // A = count of pending input bytes (0 = none ready).
                Outcome::Complete(if self.console.has_input() { 1 } else { 0 })
            }
            CIOOST => {
                // Output never blocks on the host side.
                Outcome::Complete(1)
            }
            CIOINIT | CIOQUERY => {
                // No line configuration to report for an emulated port.
                cpu.registers().set16(Reg16::DE, 0);
                Outcome::Complete(ERR_NONE)
            }
            CIODEVICE => {
                cpu.registers().set8(Reg8::D, CIODEV_SERIAL);
                cpu.registers().set8(Reg8::E, 0);
                Outcome::Complete(ERR_NONE)
            }
            _ => Outcome::Complete(ERR_NOFUNC),
        }
    }

    /// Console input. Blocking hosts poll here (after flushing pending
    /// output so a prompt is visible); non-blocking hosts get `Pending`
    /// with every register untouched and re-drive the dispatch later.
    fn cio_in(&mut self, cpu: &mut Cpu) -> Outcome {
        if let Some(b) = self.console.read_byte() {
            return self.deliver_input(cpu, b);
        }
        if !self.blocking_input {
            debug!("[HBIOS] CIOIN: no input, waiting");
            return Outcome::Pending;
        }

        self.console.flush();
        loop {
            if let Some(b) = self.console.read_byte() {
                return self.deliver_input(cpu, b);
            }
            if self.console.exit_requested() {
                // The host is tearing down; leave the call unanswered.
                return Outcome::Pending;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    pub(crate) fn deliver_input(&mut self, cpu: &mut Cpu, b: u8) -> Outcome {
        // Host line ends arrive as LF; the guest expects CR.
        let b = if b == 0x0A { 0x0D } else { b };
        cpu.registers().set8(Reg8::E, b);
        Outcome::Complete(ERR_NONE)
    }
}
