use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};

use crate::vm::memory::BANK_SIZE;

pub const SECTOR_SIZE: usize = 512;
/// Memory disks transfer in 128-byte records.
pub const MD_SECTOR_SIZE: usize = 128;

pub const HD1K_SINGLE_SIZE: u64 = 8_388_608; // 8MB slice
pub const HD512_SINGLE_SIZE: u64 = 8_519_680; // 8.32MB slice
pub const HD1K_PREFIX_SIZE: u64 = 1_048_576; // combo-disk partition prefix

/// Prefix and slice sizes in 512-byte blocks.
pub const HD1K_PREFIX_BLOCKS: u32 = (HD1K_PREFIX_SIZE / 512) as u32; // 2048
pub const HD1K_SLICE_BLOCKS: u32 = (HD1K_SINGLE_SIZE / 512) as u32; // 16384
pub const HD512_SLICE_BLOCKS: u32 = (HD512_SINGLE_SIZE / 512) as u32; // 16640

pub const PART_TYPE_ROMWBW: u8 = 0x2E;
const PART_TYPE_FAT16: u8 = 0x06;
const PART_TYPE_FAT32_CHS: u8 = 0x0B;
const PART_TYPE_FAT32_LBA: u8 = 0x0C;

const MBR_SIG_OFFSET: usize = 510;
const MBR_ENTRY_BASE: usize = 0x1BE;
const MBR_ENTRY_SIZE: usize = 16;

pub const UNIT_COUNT: usize = 16;
/// Units 0 and 1 are the ROM and RAM memory disks.
pub const FIRST_HARD_UNIT: usize = 2;

/// RomWBW media ids, as reported by the disk-media query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaId {
    None = 0,
    MdRom = 1,
    MdRam = 2,
    Hd = 4,
    HdNew = 10,
}

impl MediaId {
    pub fn code(self) -> u8 {
        self as u8
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiskLayout {
    /// One raw 8MB hd1k slice, no partition prefix.
    Hd1kSingle,
    /// 1MB prefix carrying the MBR, then N 8MB slices.
    Hd1kCombo { slices: u32 },
    /// One or more sequential 8.32MB hd512 slices.
    Hd512 { slices: u32 },
}

/// Where the image bytes live.
#[derive(Debug)]
enum DiskStorage {
    FileBacked(std::fs::File),
    InMemory(Vec<u8>),
}

#[derive(Debug)]
pub struct DiskImage {
    storage: DiskStorage,
    size: u64,
    layout: DiskLayout,
    readonly: bool,
    /// Starting LBA of the RomWBW partition when an MBR declares one.
    part_base: u32,
    part_type: u8,
}

impl DiskImage {
    /// Open an image file, validating its size against the RomWBW layouts.
    pub fn open(path: &Path, readonly: bool) -> Result<Self, String> {
        let file = OpenOptions::new()
            .read(true)
            .write(!readonly)
            .open(path)
            .map_err(|e| format!("cannot open {}: {}", path.display(), e))?;
        let size = file
            .metadata()
            .map_err(|e| format!("cannot stat {}: {}", path.display(), e))?
            .len();

        let mut image = Self {
            storage: DiskStorage::FileBacked(file),
            size,
            layout: DiskLayout::Hd1kSingle,
            readonly,
            part_base: 0,
            part_type: 0,
        };
        let mbr = image.read_mbr();
        image.layout = classify(size, mbr.as_deref())?;
        image.scan_partition(mbr.as_deref());
        Ok(image)
    }

    /// Wrap an in-memory buffer as a disk image.
    pub fn from_buffer(data: Vec<u8>) -> Result<Self, String> {
        let size = data.len() as u64;
        let mbr = if data.len() >= SECTOR_SIZE {
            Some(data[..SECTOR_SIZE].to_vec())
        } else {
            None
        };
        let layout = classify(size, mbr.as_deref())?;
        let mut image = Self {
            storage: DiskStorage::InMemory(data),
            size,
            layout,
            readonly: false,
            part_base: 0,
            part_type: 0,
        };
        image.scan_partition(mbr.as_deref());
        Ok(image)
    }

    fn read_mbr(&mut self) -> Option<Vec<u8>> {
        if self.size < SECTOR_SIZE as u64 {
            return None;
        }
        match &mut self.storage {
            DiskStorage::FileBacked(file) => {
                let mut buf = vec![0u8; SECTOR_SIZE];
                file.seek(SeekFrom::Start(0)).ok()?;
                file.read_exact(&mut buf).ok()?;
                Some(buf)
            }
            DiskStorage::InMemory(data) => Some(data[..SECTOR_SIZE].to_vec()),
        }
    }

    fn scan_partition(&mut self, mbr: Option<&[u8]>) {
        let mbr = match mbr {
            Some(m) if has_mbr_signature(m) => m,
            _ => return,
        };
        if let Some((base, ptype)) = find_romwbw_partition(mbr) {
            self.part_base = base;
            self.part_type = ptype;
            debug!(
                "[DISK] RomWBW partition type {:02X} at LBA {}",
                ptype, base
            );
        }
    }

    pub fn layout(&self) -> DiskLayout {
        self.layout
    }

    pub fn media(&self) -> MediaId {
        match self.layout {
            DiskLayout::Hd1kSingle | DiskLayout::Hd1kCombo { .. } => MediaId::HdNew,
            DiskLayout::Hd512 { .. } => MediaId::Hd,
        }
    }

    pub fn readonly(&self) -> bool {
        self.readonly
    }

    pub fn total_blocks(&self) -> u32 {
        (self.size / SECTOR_SIZE as u64) as u32
    }

    pub fn partition_base(&self) -> u32 {
        self.part_base
    }

    /// RomWBW hard-disk geometry: 16 heads x 16 sectors per track.
    pub fn geometry(&self) -> (u16, u8, u8) {
        let heads = 16u8;
        let spt = 16u8;
        let cylinders = (self.total_blocks() / (heads as u32 * spt as u32)) as u16;
        (cylinders, heads, spt)
    }

    /// Physical slice count carried by the image itself.
    pub fn slices(&self) -> u32 {
        match self.layout {
            DiskLayout::Hd1kSingle => 1,
            DiskLayout::Hd1kCombo { slices } => slices,
            DiskLayout::Hd512 { slices } => slices,
        }
    }

    /// LBA of a slice: a combo image offsets past the 1MB prefix; raw
    /// images stack slices from block 0.
    pub fn slice_lba(&self, slice: u32) -> u32 {
        match self.layout {
            DiskLayout::Hd1kCombo { .. } => HD1K_PREFIX_BLOCKS + slice * HD1K_SLICE_BLOCKS,
            DiskLayout::Hd1kSingle => slice * HD1K_SLICE_BLOCKS,
            DiskLayout::Hd512 { .. } => slice * HD512_SLICE_BLOCKS,
        }
    }

    /// Read whole 512-byte blocks. Partial reads at end-of-image fail.
    pub fn read(&mut self, lba: u32, buf: &mut [u8]) -> std::io::Result<()> {
        let offset = lba as u64 * SECTOR_SIZE as u64;
        if offset + buf.len() as u64 > self.size {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "read past end of disk image",
            ));
        }
        match &mut self.storage {
            DiskStorage::FileBacked(file) => {
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(buf)?;
            }
            DiskStorage::InMemory(data) => {
                let start = offset as usize;
                buf.copy_from_slice(&data[start..start + buf.len()]);
            }
        }
        Ok(())
    }

    pub fn write(&mut self, lba: u32, data: &[u8]) -> std::io::Result<()> {
        if self.readonly {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "disk image is write-protected",
            ));
        }
        let offset = lba as u64 * SECTOR_SIZE as u64;
        if offset + data.len() as u64 > self.size {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "write past end of disk image",
            ));
        }
        match &mut self.storage {
            DiskStorage::FileBacked(file) => {
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(data)?;
                file.flush()?;
            }
            DiskStorage::InMemory(mem) => {
                let start = offset as usize;
                mem[start..start + data.len()].copy_from_slice(data);
            }
        }
        Ok(())
    }

    /// Dump the full image, whatever the backing storage.
    pub fn save_to_file(&mut self, path: &Path) -> std::io::Result<()> {
        let mut out = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        match &mut self.storage {
            DiskStorage::InMemory(data) => out.write_all(data)?,
            DiskStorage::FileBacked(file) => {
                file.seek(SeekFrom::Start(0))?;
                let mut buf = vec![0u8; self.size as usize];
                file.read_exact(&mut buf)?;
                out.write_all(&buf)?;
            }
        }
        out.flush()
    }

    #[cfg(test)]
    pub fn read_all(&mut self) -> std::io::Result<Vec<u8>> {
        let mut buf = vec![0u8; self.size as usize];
        self.read(0, &mut buf)?;
        Ok(buf)
    }
}

fn has_mbr_signature(mbr: &[u8]) -> bool {
    mbr.len() >= SECTOR_SIZE && mbr[MBR_SIG_OFFSET] == 0x55 && mbr[MBR_SIG_OFFSET + 1] == 0xAA
}

/// Walk the four MBR entries for a RomWBW (0x2E) partition.
fn find_romwbw_partition(mbr: &[u8]) -> Option<(u32, u8)> {
    for p in 0..4 {
        let entry = &mbr[MBR_ENTRY_BASE + p * MBR_ENTRY_SIZE..];
        let ptype = entry[4];
        if ptype == PART_TYPE_ROMWBW {
            let base = LittleEndian::read_u32(&entry[8..12]);
            return Some((base, ptype));
        }
    }
    None
}

/// Pure size/MBR classification per the RomWBW image table. Errors are the
/// short diagnostic strings surfaced to the host; the unit stays empty.
fn classify(size: u64, mbr: Option<&[u8]>) -> Result<DiskLayout, String> {
    if size == HD1K_SINGLE_SIZE {
        if let Some(warning) = check_single_slice_mbr(mbr) {
            warn!("[DISK] {}", warning);
        }
        return Ok(DiskLayout::Hd1kSingle);
    }
    if size == HD512_SINGLE_SIZE {
        return Ok(DiskLayout::Hd512 { slices: 1 });
    }
    let combo_sized = size > HD1K_PREFIX_SIZE && (size - HD1K_PREFIX_SIZE) % HD1K_SINGLE_SIZE == 0;
    if combo_sized {
        let slices = ((size - HD1K_PREFIX_SIZE) / HD1K_SINGLE_SIZE) as u32;
        if let Some(m) = mbr.filter(|m| has_mbr_signature(m)) {
            if find_romwbw_partition(m).is_some() {
                return Ok(DiskLayout::Hd1kCombo { slices });
            }
        }
        // Some sizes satisfy both layouts (e.g. 8 hd512 slices match
        // 1MB + 8x8MB); without a RomWBW MBR, try hd512 before rejecting.
    }
    if size > 0 && size % HD512_SINGLE_SIZE == 0 {
        return Ok(DiskLayout::Hd512 {
            slices: (size / HD512_SINGLE_SIZE) as u32,
        });
    }
    if combo_sized {
        return Err("combo-sized image has no RomWBW (0x2E) partition".to_string());
    }
    Err("invalid disk size (must be 8MB for hd1k or 8.32MB for hd512)".to_string())
}

/// Warning heuristics for single-slice 8MB images that carry an MBR: a FAT
/// table without a RomWBW partition is probably the wrong image, and an MBR
/// signature over something that is not Z80 boot code is suspect.
fn check_single_slice_mbr(mbr: Option<&[u8]>) -> Option<String> {
    let mbr = mbr?;
    if !has_mbr_signature(mbr) {
        return None; // Raw hd1k slice, fine.
    }
    if find_romwbw_partition(mbr).is_some() {
        return None;
    }
    let mut has_fat = false;
    for p in 0..4 {
        let ptype = mbr[MBR_ENTRY_BASE + p * MBR_ENTRY_SIZE + 4];
        if matches!(
            ptype,
            PART_TYPE_FAT16 | PART_TYPE_FAT32_CHS | PART_TYPE_FAT32_LBA
        ) {
            has_fat = true;
        }
    }
    if has_fat {
        return Some(
            "disk has FAT MBR but no RomWBW partition - may not work correctly".to_string(),
        );
    }
    // JR or JP at offset 0 means this is likely a boot slice with a stale
    // MBR signature.
    if mbr[0] == 0x18 || mbr[0] == 0xC3 {
        return None;
    }
    Some("disk has MBR but no RomWBW partition (0x2E) - format may be invalid".to_string())
}

/// Memory-disk descriptor: a run of ROM or RAM banks served as a disk with
/// 128-byte sectors. Actual bytes are read through the memory bus.
#[derive(Clone, Copy, Debug)]
pub struct MemDisk {
    pub media: MediaId,
    pub first_bank: u8,
    pub bank_count: u8,
}

impl MemDisk {
    pub fn total_sectors(&self) -> u32 {
        self.bank_count as u32 * (BANK_SIZE / MD_SECTOR_SIZE) as u32
    }

    /// (bank, in-bank offset) of a 128-byte sector, or None past the end.
    pub fn locate(&self, sector: u32) -> Option<(u8, u16)> {
        if sector >= self.total_sectors() {
            return None;
        }
        let byte_offset = sector as usize * MD_SECTOR_SIZE;
        let bank = self.first_bank.wrapping_add((byte_offset / BANK_SIZE) as u8);
        Some((bank, (byte_offset % BANK_SIZE) as u16))
    }
}

pub enum Unit {
    Mem(MemDisk),
    Image(DiskImage),
}

/// The 16-entry unit table: the source of truth the firmware queries.
pub struct DiskStore {
    units: [Option<Unit>; 16],
}

impl DiskStore {
    pub fn new() -> Self {
        Self {
            units: Default::default(),
        }
    }

    pub fn get(&self, unit: usize) -> Option<&Unit> {
        self.units.get(unit).and_then(|u| u.as_ref())
    }

    pub fn get_mut(&mut self, unit: usize) -> Option<&mut Unit> {
        self.units.get_mut(unit).and_then(|u| u.as_mut())
    }

    pub fn is_loaded(&self, unit: usize) -> bool {
        self.get(unit).is_some()
    }

    /// Install a memory-disk descriptor on one of the reserved units.
    pub fn set_mem_disk(&mut self, unit: usize, md: MemDisk) {
        debug_assert!(unit < FIRST_HARD_UNIT);
        self.units[unit] = Some(Unit::Mem(md));
    }

    pub fn attach_image(&mut self, unit: usize, image: DiskImage) -> Result<(), String> {
        if unit >= UNIT_COUNT {
            return Err(format!("unit {} out of range", unit));
        }
        if unit < FIRST_HARD_UNIT {
            return Err(format!(
                "unit {} is reserved for the memory disks",
                unit
            ));
        }
        debug!(
            "[DISK] unit {}: {:?}, {} blocks, {} slice(s)",
            unit,
            image.layout(),
            image.total_blocks(),
            image.slices()
        );
        self.units[unit] = Some(Unit::Image(image));
        Ok(())
    }

    pub fn attach_file(&mut self, unit: usize, path: &Path) -> Result<(), String> {
        let image = DiskImage::open(path, false)?;
        self.attach_image(unit, image)
    }

    pub fn attach_buffer(&mut self, unit: usize, data: Vec<u8>) -> Result<(), String> {
        let image = DiskImage::from_buffer(data)?;
        self.attach_image(unit, image)
    }

    pub fn detach(&mut self, unit: usize) -> Option<Unit> {
        self.units.get_mut(unit).and_then(|u| u.take())
    }

    /// Count of non-empty units; this is what the firmware sees as the
    /// disk device count.
    pub fn loaded_count(&self) -> usize {
        self.units.iter().filter(|u| u.is_some()).count()
    }

    pub fn hard_count(&self) -> usize {
        self.units[FIRST_HARD_UNIT..]
            .iter()
            .filter(|u| u.is_some())
            .count()
    }

    /// Slices available on a unit. Combo images are bounded by what they
    /// physically carry; raw slices follow the guest CBIOS convention of
    /// max(2, 8 / hard-disk-count), unless the host pinned a value.
    pub fn slices(&self, unit: usize, max_override: Option<u32>) -> u32 {
        match self.get(unit) {
            Some(Unit::Mem(_)) => 1,
            Some(Unit::Image(img)) => match img.layout() {
                DiskLayout::Hd1kCombo { slices } => slices,
                _ => max_override.unwrap_or_else(|| self.dynamic_slice_count()),
            },
            None => 0,
        }
    }

    fn dynamic_slice_count(&self) -> u32 {
        match self.hard_count() as u32 {
            0 => 8,
            k => (8 / k).max(2),
        }
    }
}

impl Default for DiskStore {
    fn default() -> Self {
        Self::new()
    }
}
