use iz80::{Cpu, Reg16, Reg8};
use log::{debug, warn};

use super::*;
use crate::io::disk::{MediaId, Unit, MD_SECTOR_SIZE, SECTOR_SIZE};
use crate::vm::memory::MemBus;

// Device-type codes reported by the device-info call.
const DIODEV_MD: u8 = 0x00;
const DIODEV_IDE: u8 = 0x03;

impl HbiosDispatch {
    pub(crate) fn dio(&mut self, func: u8, cpu: &mut Cpu, mem: &mut MemBus) -> Outcome {
        let unit = match unit_from_c(cpu) {
            Some(u) => u,
            None => return Outcome::Complete(ERR_NOUNIT),
        };

        let status = match func {
            DIOSTATUS => self.unit_status[unit],
            DIORESET => {
                self.unit_lba[unit] = 0;
                self.unit_status[unit] = ERR_NONE;
                ERR_NONE
            }
            DIOSEEK => self.dio_seek(unit, cpu),
            DIOREAD => self.dio_transfer(unit, cpu, mem, false),
            DIOWRITE => self.dio_transfer(unit, cpu, mem, true),
            DIOVERIFY => self.dio_verify(unit, cpu),
            DIOFORMAT => match self.disks.get(unit) {
                // LBA images have no track structure to format.
                Some(Unit::Image(_)) => ERR_NOTIMPL,
                Some(Unit::Mem(_)) => ERR_NONE,
                None => ERR_NOMEDIA,
            },
            DIODEVICE => self.dio_device(unit, cpu),
            DIOMEDIA => self.dio_media(unit, cpu),
            DIODEFMED => match self.disks.get(unit) {
                Some(_) => {
                    debug!(
                        "[HBIOS] DIODEFMED unit {} media {:02X} accepted",
                        unit,
                        cpu.registers().get8(Reg8::E)
                    );
                    ERR_NONE
                }
                None => ERR_NOMEDIA,
            },
            DIOCAP => self.dio_capacity(unit, cpu),
            DIOGEOM => self.dio_geometry(unit, cpu),
            _ => ERR_NOFUNC,
        };

        if func != DIOSTATUS {
            self.unit_status[unit] = status;
        }
        Outcome::Complete(status)
    }

    /// Record the seek target. D bit 7 selects a 32-bit LBA in DE:HL;
    /// otherwise (head, sector, track) is converted via unit geometry.
    /// The image itself is not touched.
    fn dio_seek(&mut self, unit: usize, cpu: &mut Cpu) -> i8 {
        let (_cylinders, heads, spt) = match self.unit_geometry(unit) {
            Some(g) => g,
            None => return ERR_NOMEDIA,
        };
        let d = cpu.registers().get8(Reg8::D);
        let e = cpu.registers().get8(Reg8::E);
        let hl = cpu.registers().get16(Reg16::HL);

        let lba = if d & 0x80 != 0 {
            (((d & 0x7F) as u32) << 24) | ((e as u32) << 16) | hl as u32
        } else {
            let head = (d & 0x7F) as u32;
            let sector = e as u32;
            let track = hl as u32;
            (track * heads as u32 + head) * spt as u32 + sector
        };
        debug!("[HBIOS] DIOSEEK unit {} -> LBA {}", unit, lba);
        self.unit_lba[unit] = lba;
        ERR_NONE
    }

    /// Transfer E sectors between the unit and guest memory at (HL, bank
    /// D), advancing the unit's seek position. The explicit-bank accessors
    /// are used for every byte so a buffer below 0x8000 in a non-current
    /// bank never leaks through the current-bank path. E returns the
    /// count actually moved.
    fn dio_transfer(&mut self, unit: usize, cpu: &mut Cpu, mem: &mut MemBus, writing: bool) -> i8 {
        let count = cpu.registers().get8(Reg8::E) as u32;
        let addr = cpu.registers().get16(Reg16::HL);
        let bank = cpu.registers().get8(Reg8::D);
        let lba = self.unit_lba[unit];

        let (done, status) = match self.disks.get_mut(unit) {
            None => (0, ERR_NOMEDIA),
            Some(Unit::Mem(md)) => {
                let md = *md;
                if writing && md.media == MediaId::MdRom {
                    (0, ERR_READONLY)
                } else {
                    let mut done = 0u32;
                    let mut status = ERR_NONE;
                    for s in 0..count {
                        let (src_bank, offset) = match md.locate(lba + s) {
                            Some(loc) => loc,
                            None => {
                                status = ERR_IO;
                                break;
                            }
                        };
                        let guest = addr.wrapping_add((s * MD_SECTOR_SIZE as u32) as u16);
                        for i in 0..MD_SECTOR_SIZE as u16 {
                            if writing {
                                let b = mem.read_bank(bank, guest.wrapping_add(i));
                                mem.write_bank(src_bank, offset + i, b);
                            } else {
                                let b = mem.read_bank(src_bank, offset + i);
                                mem.write_bank(bank, guest.wrapping_add(i), b);
                            }
                        }
                        done += 1;
                    }
                    (done, status)
                }
            }
            Some(Unit::Image(img)) => {
                if writing && img.readonly() {
                    (0, ERR_READONLY)
                } else {
                    let mut sector = vec![0u8; SECTOR_SIZE];
                    let mut done = 0u32;
                    let mut status = ERR_NONE;
                    for s in 0..count {
                        let guest = addr.wrapping_add((s * SECTOR_SIZE as u32) as u16);
                        if writing {
                            for (i, b) in sector.iter_mut().enumerate() {
                                *b = mem.read_bank(bank, guest.wrapping_add(i as u16));
                            }
                            if let Err(e) = img.write(lba + s, &sector) {
                                warn!("[HBIOS] DIOWRITE unit {} LBA {}: {}", unit, lba + s, e);
                                status = ERR_IO;
                                break;
                            }
                        } else {
                            if let Err(e) = img.read(lba + s, &mut sector) {
                                warn!("[HBIOS] DIOREAD unit {} LBA {}: {}", unit, lba + s, e);
                                status = ERR_IO;
                                break;
                            }
                            for (i, b) in sector.iter().enumerate() {
                                mem.write_bank(bank, guest.wrapping_add(i as u16), *b);
                            }
                        }
                        done += 1;
                    }
                    (done, status)
                }
            }
        };

        self.unit_lba[unit] = lba + done;
        cpu.registers().set8(Reg8::E, done as u8);
        status
    }

    /// Bounds check only; the emulated media cannot rot.
    fn dio_verify(&mut self, unit: usize, cpu: &mut Cpu) -> i8 {
        let count = cpu.registers().get8(Reg8::E) as u32;
        let total = match self.unit_total_sectors(unit) {
            Some(t) => t,
            None => return ERR_NOMEDIA,
        };
        if self.unit_lba[unit] + count > total {
            return ERR_IO;
        }
        ERR_NONE
    }

    fn dio_device(&mut self, unit: usize, cpu: &mut Cpu) -> i8 {
        match self.disks.get(unit) {
            None => ERR_NOMEDIA,
            Some(Unit::Mem(_)) => {
                cpu.registers().set8(Reg8::D, DIODEV_MD);
                cpu.registers().set8(Reg8::E, unit as u8);
                // Attribute byte: not a floppy, not removable.
                cpu.registers().set8(Reg8::C, 0x00);
                ERR_NONE
            }
            Some(Unit::Image(_)) => {
                cpu.registers().set8(Reg8::D, DIODEV_IDE);
                cpu.registers().set8(Reg8::E, unit as u8);
                cpu.registers().set8(Reg8::C, 0x00);
                ERR_NONE
            }
        }
    }

    fn dio_media(&mut self, unit: usize, cpu: &mut Cpu) -> i8 {
        match self.disks.get(unit) {
            None => ERR_NOMEDIA,
            Some(unit_ref) => {
                let media = match unit_ref {
                    Unit::Mem(md) => md.media,
                    Unit::Image(img) => img.media(),
                };
                cpu.registers().set8(Reg8::E, media.code());
                ERR_NONE
            }
        }
    }

    fn dio_capacity(&mut self, unit: usize, cpu: &mut Cpu) -> i8 {
        let (blocks, block_size) = match self.disks.get(unit) {
            None => return ERR_NOMEDIA,
            Some(Unit::Mem(md)) => (md.total_sectors(), MD_SECTOR_SIZE as u16),
            Some(Unit::Image(img)) => (img.total_blocks(), SECTOR_SIZE as u16),
        };
        cpu.registers().set16(Reg16::DE, (blocks >> 16) as u16);
        cpu.registers().set16(Reg16::HL, blocks as u16);
        cpu.registers().set16(Reg16::BC, block_size);
        ERR_NONE
    }

    fn dio_geometry(&mut self, unit: usize, cpu: &mut Cpu) -> i8 {
        let (cylinders, heads, spt, block_size) = match self.disks.get(unit) {
            None => return ERR_NOMEDIA,
            Some(Unit::Mem(md)) => {
                let spt = 1u8;
                ((md.total_sectors() / spt as u32) as u16, 1u8, spt, MD_SECTOR_SIZE as u16)
            }
            Some(Unit::Image(img)) => {
                let (c, h, s) = img.geometry();
                (c, h, s, SECTOR_SIZE as u16)
            }
        };
        cpu.registers().set16(Reg16::HL, cylinders);
        // Bit 7 of D: unit is LBA-capable.
        cpu.registers().set8(Reg8::D, heads | 0x80);
        cpu.registers().set8(Reg8::E, spt);
        cpu.registers().set16(Reg16::BC, block_size);
        ERR_NONE
    }

    /// EXTSLICE: (unit in D, slice in E) -> DE:HL = slice LBA, B = media
    /// id, C = device attribute byte. Combo images bound the slice number
    /// by their physical count; raw images by the dynamic policy.
    pub(crate) fn ext_slice(&mut self, cpu: &mut Cpu) -> Outcome {
        let unit = cpu.registers().get8(Reg8::D) as usize;
        let slice = cpu.registers().get8(Reg8::E) as u32;
        if unit >= crate::io::disk::UNIT_COUNT {
            return Outcome::Complete(ERR_NOUNIT);
        }

        let status = match self.disks.get(unit) {
            None => ERR_NOMEDIA,
            Some(Unit::Mem(md)) => {
                if slice > 0 {
                    ERR_RANGE
                } else {
                    cpu.registers().set16(Reg16::DE, 0);
                    cpu.registers().set16(Reg16::HL, 0);
                    cpu.registers().set8(Reg8::B, md.media.code());
                    cpu.registers().set8(Reg8::C, 0x00);
                    ERR_NONE
                }
            }
            Some(Unit::Image(img)) => {
                let limit = match img.layout() {
                    crate::io::disk::DiskLayout::Hd1kCombo { slices } => slices,
                    _ => self.disks.slices(unit, self.max_slices),
                };
                if slice >= limit {
                    ERR_RANGE
                } else {
                    let lba = img.slice_lba(slice);
                    let media = img.media();
                    debug!(
                        "[HBIOS] EXTSLICE unit {} slice {} -> LBA {} media {:?}",
                        unit, slice, lba, media
                    );
                    cpu.registers().set16(Reg16::DE, (lba >> 16) as u16);
                    cpu.registers().set16(Reg16::HL, lba as u16);
                    cpu.registers().set8(Reg8::B, media.code());
                    cpu.registers().set8(Reg8::C, 0x00);
                    ERR_NONE
                }
            }
        };
        Outcome::Complete(status)
    }

    fn unit_geometry(&self, unit: usize) -> Option<(u16, u8, u8)> {
        match self.disks.get(unit)? {
            Unit::Mem(md) => Some((md.total_sectors() as u16, 1, 1)),
            Unit::Image(img) => Some(img.geometry()),
        }
    }

    fn unit_total_sectors(&self, unit: usize) -> Option<u32> {
        match self.disks.get(unit)? {
            Unit::Mem(md) => Some(md.total_sectors()),
            Unit::Image(img) => Some(img.total_blocks()),
        }
    }
}
