use log::debug;

use super::hcb::*;
use crate::io::disk::{DiskStore, MediaId, MemDisk};
use crate::vm::memory::{MemBus, BANK_BIOS, BANK_BOOT, BANK_COMMON, SHADOW_SPAN};

/// Post-ROM-load setup, run once before the CPU executes. The shadow
/// replay must come last: it captures the final post-init bytes so reads
/// from ROM bank 0 at 0x000-0x1FF see them.
pub fn run(mem: &mut MemBus, disks: &mut DiskStore) {
    patch_apitype(mem);
    copy_hcb_to_ram(mem);
    setup_ident(mem);
    init_memory_disks(mem, disks);
    copy_hcb_to_shadow(mem);
    debug!("[INIT] initialization sequence complete");
}

/// Force APITYPE to HBIOS (0x00) instead of UNA (0xFF). REBOOT and other
/// utilities refuse to run against a UNA-flagged system.
fn patch_apitype(mem: &mut MemBus) {
    mem.patch_rom(BANK_BOOT, HCB_BASE + HCB_APITYPE, APITYPE_HBIOS);
    debug!(
        "[INIT] patched APITYPE at {:04X} to HBIOS",
        HCB_BASE + HCB_APITYPE
    );
}

/// Copy page zero + HCB from ROM bank 0 into the BIOS runtime bank.
fn copy_hcb_to_ram(mem: &mut MemBus) {
    for addr in 0..SHADOW_SPAN {
        let b = mem.read_bank(BANK_BOOT, addr);
        mem.write_bank(BANK_BIOS, addr, b);
    }
    debug!("[INIT] copied page zero and HCB to the BIOS bank");
}

/// Place the ident signature at both probe addresses in common RAM and a
/// pointer to the primary block at 0xFFFC.
fn setup_ident(mem: &mut MemBus) {
    for (i, b) in IDENT_SIG.iter().enumerate() {
        mem.write_bank(BANK_COMMON, IDENT_ADDR + i as u16, *b);
        mem.write_bank(BANK_COMMON, IDENT_ALT_ADDR + i as u16, *b);
    }
    let ptr = IDENT_ADDR.to_le_bytes();
    mem.write_bank(BANK_COMMON, IDENT_PTR_ADDR, ptr[0]);
    mem.write_bank(BANK_COMMON, IDENT_PTR_ADDR + 1, ptr[1]);
    debug!(
        "[INIT] ident at {:04X}/{:04X}, pointer at {:04X}",
        IDENT_ALT_ADDR, IDENT_ADDR, IDENT_PTR_ADDR
    );
}

/// Configure units 0 (ROM disk) and 1 (RAM disk) from the HCB bank table,
/// with the conventional defaults when the ROM left the fields blank.
fn init_memory_disks(mem: &MemBus, disks: &mut DiskStore) {
    let rom_banks = match mem.read_bank(BANK_BIOS, HCB_BASE + HCB_ROMBANKS) {
        0 => 16,
        n => n,
    };

    let romd_first = match mem.read_bank(BANK_BIOS, HCB_BASE + HCB_BIDROMD0) {
        0 => 0x02,
        b => b,
    };
    let romd_count = match mem.read_bank(BANK_BIOS, HCB_BASE + HCB_CNTROMD) {
        0 => rom_banks.saturating_sub(2),
        n => n,
    };

    let ramd_first = match mem.read_bank(BANK_BIOS, HCB_BASE + HCB_BIDRAMD0) {
        0 => 0x81,
        b => b,
    };
    let user_bank = match mem.read_bank(BANK_BIOS, HCB_BASE + HCB_BIDUSER) {
        0 => 0x8E,
        b => b,
    };
    let ramd_count = match mem.read_bank(BANK_BIOS, HCB_BASE + HCB_CNTRAMD) {
        0 => user_bank.saturating_sub(ramd_first),
        n => n,
    };

    disks.set_mem_disk(
        0,
        MemDisk {
            media: MediaId::MdRom,
            first_bank: romd_first,
            bank_count: romd_count,
        },
    );
    disks.set_mem_disk(
        1,
        MemDisk {
            media: MediaId::MdRam,
            first_bank: ramd_first,
            bank_count: ramd_count,
        },
    );
    debug!(
        "[INIT] memory disks: ROM {:02X}+{}, RAM {:02X}+{}",
        romd_first, romd_count, ramd_first, ramd_count
    );
}

/// Replay the first 512 bytes of ROM bank 0 through the shadow store path
/// so the shadow bitmap covers every byte and later bank-0 reads return
/// the post-init values.
fn copy_hcb_to_shadow(mem: &mut MemBus) {
    let saved = mem.current_bank();
    mem.select_bank(BANK_BOOT);
    for addr in 0..SHADOW_SPAN {
        let b = mem.read_bank(BANK_BOOT, addr);
        mem.store(addr, b);
    }
    mem.select_bank(saved);
    debug!("[INIT] HCB shadow installed over ROM bank 0");
}

/// Lazy per-bank seeding: the first time a RAM bank is activated after a
/// ROM load, it receives page zero and the HCB from ROM bank 0 plus the
/// APITYPE patch. CP/M-3 switches into a fresh TPA bank and expects valid
/// RST vectors there.
pub fn seed_ram_bank(mem: &mut MemBus, bank: u8) {
    if bank & 0x80 == 0 || bank & 0x70 != 0 {
        return;
    }
    if !mem.rom_loaded() {
        return;
    }
    let idx = (bank & 0x0F) as usize;
    if mem.bank_seeded(idx) {
        return;
    }
    debug!("[INIT] seeding RAM bank {:02X} with page zero and HCB", bank);
    for addr in 0..SHADOW_SPAN {
        let b = mem.read_bank(BANK_BOOT, addr);
        mem.write_bank(bank, addr, b);
    }
    mem.write_bank(bank, HCB_BASE + HCB_APITYPE, APITYPE_HBIOS);
    mem.mark_seeded(idx);
}
