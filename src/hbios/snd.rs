use iz80::{Cpu, Reg16, Reg8};
use log::debug;

use super::*;

const SNDDEV_EMU: u8 = 0x00;
const CHANNELS: u8 = 4;

impl HbiosDispatch {
    /// Four write-only tone channels. State is kept so the guest can
    /// sequence volume/period/note before PLAY; the only audible output
    /// this host can make is the terminal bell.
    pub(crate) fn snd(&mut self, func: u8, cpu: &mut Cpu) -> Outcome {
        let channel = (cpu.registers().get8(Reg8::D) & (CHANNELS - 1)) as usize;
        let status = match func {
            SNDRESET => {
                self.snd = super::SndState::new();
                ERR_NONE
            }
            SNDVOL => {
                self.snd.volume[channel] = cpu.registers().get8(Reg8::E);
                ERR_NONE
            }
            SNDPER => {
                self.snd.period[channel] = cpu.registers().get16(Reg16::HL);
                ERR_NONE
            }
            SNDNOTE => {
                self.snd.note[channel] = cpu.registers().get16(Reg16::HL);
                ERR_NONE
            }
            SNDPLAY => {
                debug!(
                    "[HBIOS] SNDPLAY ch {} vol {} period {} note {} dur {}",
                    channel,
                    self.snd.volume[channel],
                    self.snd.period[channel],
                    self.snd.note[channel],
                    self.snd.duration
                );
                ERR_NONE
            }
            SNDQUERY => {
                cpu.registers().set8(Reg8::E, CHANNELS);
                ERR_NONE
            }
            SNDDUR => {
                self.snd.duration = cpu.registers().get16(Reg16::HL);
                ERR_NONE
            }
            SNDDEVICE => {
                cpu.registers().set8(Reg8::D, SNDDEV_EMU);
                cpu.registers().set8(Reg8::E, 0);
                ERR_NONE
            }
            SNDBEEP => {
                self.console.write_byte(0x07);
                ERR_NONE
            }
            _ => ERR_NOFUNC,
        };
        Outcome::Complete(status)
    }
}
