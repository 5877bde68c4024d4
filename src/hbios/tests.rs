use byteorder::{ByteOrder, LittleEndian};
use iz80::{Reg16, Reg8};

use super::hcb::*;
use super::*;
use crate::io::console::QueueConsole;
use crate::io::disk::{HD1K_PREFIX_SIZE, HD1K_SINGLE_SIZE};
use crate::vm::emulator::{Emulator, EmulatorConfig, StepOutcome};
use crate::vm::memory::ROM_SIZE;

/// Build a ROM image with a populated HCB, UNA APITYPE (to be patched),
/// RST vectors in page zero, and recognizable bytes in ROM bank 1.
fn test_rom() -> Vec<u8> {
    let mut rom = vec![0u8; ROM_SIZE];

    // Page zero: a plausible RST 0 vector.
    rom[0x0000] = 0xC3; // JP
    rom[0x0001] = 0xF0;
    rom[0x0002] = 0xFF;

    // HCB.
    rom[0x0100] = b'W';
    rom[0x0101] = 0xA8;
    rom[0x0102] = VERSION_BYTE;
    rom[0x0104] = 0x01; // platform
    rom[0x0105] = 8; // CPU MHz
    LittleEndian::write_u16(&mut rom[0x0106..0x0108], 8000); // CPU kHz
    rom[0x0108] = 16; // RAM banks
    rom[0x0109] = 16; // ROM banks
    rom[0x010A] = 0x02; // boot volume
    rom[0x010B] = 0x00; // boot slice
    rom[0x010C] = 0x01; // boot bank
    rom[0x0112] = 0xFF; // APITYPE: UNA until patched
    rom[0x0114] = 0x80; // BIOS bank
    rom[0x0115] = 0x8E; // user bank
    rom[0x0116] = 0x8F; // common bank
    rom[0x0117] = 0x8D; // aux bank
    rom[0x0118] = 0x81; // RAM disk first bank
    rom[0x0119] = 13;
    rom[0x011A] = 0x02; // ROM disk first bank
    rom[0x011B] = 14;

    // ROM bank 1: a different APITYPE-offset byte plus a copy pattern.
    rom[0x8000 + 0x0112] = 0x77;
    for i in 0..0x100usize {
        rom[0x8000 + 0x1000 + i] = (i ^ 0xA5) as u8;
    }
    rom
}

fn emulator() -> Emulator {
    Emulator::new(
        &test_rom(),
        Box::new(QueueConsole::new()),
        EmulatorConfig::default(),
    )
    .unwrap()
}

/// Drive one dispatch through the I/O-port path (no simulated RET).
fn call(emu: &mut Emulator) {
    emu.hbios
        .handle_main_entry(&mut emu.cpu, &mut emu.bus.mem, false);
}

fn reg_a(emu: &mut Emulator) -> u8 {
    emu.cpu.registers().get8(Reg8::A)
}

fn carry(emu: &mut Emulator) -> bool {
    emu.cpu.registers().get16(Reg16::AF) & 0x01 != 0
}

fn combo_image(slices: usize) -> Vec<u8> {
    let mut data = vec![0u8; HD1K_PREFIX_SIZE as usize + slices * HD1K_SINGLE_SIZE as usize];
    data[510] = 0x55;
    data[511] = 0xAA;
    data[0x1BE + 4] = 0x2E;
    LittleEndian::write_u32(&mut data[0x1BE + 8..0x1BE + 12], 2048);
    data
}

// ========================================================================
// S1/S2: init sequencing, ident, shadow
// ========================================================================

#[test]
fn ident_visible_in_common_ram() {
    let emu = emulator();
    assert_eq!(emu.bus.mem.fetch(0xFE00), 0x57);
    assert_eq!(emu.bus.mem.fetch(0xFE01), 0xA8);
    assert_eq!(emu.bus.mem.fetch(0xFE02), 0x35);
    assert_eq!(emu.bus.mem.fetch(0xFF00), 0x57);
    // Little-endian pointer to the primary ident block.
    assert_eq!(emu.bus.mem.fetch(0xFFFC), 0x00);
    assert_eq!(emu.bus.mem.fetch(0xFFFD), 0xFF);
}

#[test]
fn shadow_shows_patched_apitype_only_in_bank0() {
    let mut emu = emulator();
    emu.bus.mem.select_bank(0x00);
    assert_eq!(emu.bus.mem.fetch(0x0112), 0x00);
    // The boot-loader bank must see its own unpatched byte.
    emu.bus.mem.select_bank(0x01);
    assert_eq!(emu.bus.mem.fetch(0x0112), 0x77);
}

#[test]
fn bios_bank_holds_hcb_copy() {
    let emu = emulator();
    assert_eq!(emu.bus.mem.read_bank(0x80, 0x0100), b'W');
    assert_eq!(emu.bus.mem.read_bank(0x80, 0x0101), 0xA8);
}

// ========================================================================
// Lazy RAM-bank seeding
// ========================================================================

#[test]
fn bank_switch_seeds_page_zero_and_patches_apitype() {
    let mut emu = emulator();
    emu.cpu.registers().set8(Reg8::B, SYSSETBNK);
    emu.cpu.registers().set8(Reg8::C, 0x8E);
    call(&mut emu);
    assert_eq!(reg_a(&mut emu), 0);
    // Previous bank comes back in C.
    assert_eq!(emu.cpu.registers().get8(Reg8::C), 0x00);
    assert_eq!(emu.bus.mem.current_bank(), 0x8E);
    // RST vector and patched APITYPE landed in the fresh bank.
    assert_eq!(emu.bus.mem.read_bank(0x8E, 0x0000), 0xC3);
    assert_eq!(emu.bus.mem.read_bank(0x8E, 0x0112), 0x00);
}

#[test]
fn seeding_happens_once_per_bank() {
    let mut emu = emulator();
    emu.cpu.registers().set8(Reg8::B, SYSSETBNK);
    emu.cpu.registers().set8(Reg8::C, 0x8E);
    call(&mut emu);
    // Guest modifies its page; a later re-activation must not clobber it.
    emu.bus.mem.write_bank(0x8E, 0x0100, 0x42);
    emu.cpu.registers().set8(Reg8::B, SYSSETBNK);
    emu.cpu.registers().set8(Reg8::C, 0x80);
    call(&mut emu);
    emu.cpu.registers().set8(Reg8::B, SYSSETBNK);
    emu.cpu.registers().set8(Reg8::C, 0x8E);
    call(&mut emu);
    assert_eq!(emu.bus.mem.read_bank(0x8E, 0x0100), 0x42);
}

#[test]
fn get_bank_reflects_set_bank() {
    let mut emu = emulator();
    emu.cpu.registers().set8(Reg8::B, SYSSETBNK);
    emu.cpu.registers().set8(Reg8::C, 0x84);
    call(&mut emu);
    emu.cpu.registers().set8(Reg8::B, SYSGETBNK);
    call(&mut emu);
    assert_eq!(emu.cpu.registers().get8(Reg8::C), 0x84);
}

// ========================================================================
// S3: disk seek/write/read round trip through the dispatch
// ========================================================================

fn seek(emu: &mut Emulator, unit: u8, lba: u32) {
    emu.cpu.registers().set8(Reg8::B, DIOSEEK);
    emu.cpu.registers().set8(Reg8::C, unit);
    emu.cpu.registers().set8(Reg8::D, 0x80 | ((lba >> 24) as u8 & 0x7F));
    emu.cpu.registers().set8(Reg8::E, (lba >> 16) as u8);
    emu.cpu.registers().set16(Reg16::HL, lba as u16);
    call(emu);
    assert_eq!(reg_a(emu), 0);
}

#[test]
fn disk_round_trip_via_dispatch() {
    let mut emu = emulator();
    emu.hbios
        .disks
        .attach_buffer(2, vec![0u8; HD1K_SINGLE_SIZE as usize])
        .unwrap();

    for i in 0..1024u16 {
        emu.bus.mem.store(0x8000 + i, 0xAB);
    }

    seek(&mut emu, 2, 5);
    emu.cpu.registers().set8(Reg8::B, DIOWRITE);
    emu.cpu.registers().set8(Reg8::C, 2);
    emu.cpu.registers().set8(Reg8::D, 0x8F);
    emu.cpu.registers().set8(Reg8::E, 2);
    emu.cpu.registers().set16(Reg16::HL, 0x8000);
    call(&mut emu);
    assert_eq!(reg_a(&mut emu), 0);
    assert!(!carry(&mut emu));
    assert_eq!(emu.cpu.registers().get8(Reg8::E), 2);

    seek(&mut emu, 2, 5);
    emu.cpu.registers().set8(Reg8::B, DIOREAD);
    emu.cpu.registers().set8(Reg8::C, 2);
    emu.cpu.registers().set8(Reg8::D, 0x8F);
    emu.cpu.registers().set8(Reg8::E, 2);
    emu.cpu.registers().set16(Reg16::HL, 0x9000);
    call(&mut emu);
    assert_eq!(reg_a(&mut emu), 0);
    assert_eq!(emu.cpu.registers().get8(Reg8::E), 2);
    for i in 0..1024u16 {
        assert_eq!(emu.bus.mem.fetch(0x9000 + i), 0xAB);
    }
}

#[test]
fn read_advances_seek_position() {
    let mut emu = emulator();
    let mut data = vec![0u8; HD1K_SINGLE_SIZE as usize];
    data[512] = 0x11; // LBA 1
    data[1024] = 0x22; // LBA 2
    emu.hbios.disks.attach_buffer(2, data).unwrap();

    seek(&mut emu, 2, 1);
    for expect in [0x11u8, 0x22] {
        emu.cpu.registers().set8(Reg8::B, DIOREAD);
        emu.cpu.registers().set8(Reg8::C, 2);
        emu.cpu.registers().set8(Reg8::D, 0x8F);
        emu.cpu.registers().set8(Reg8::E, 1);
        emu.cpu.registers().set16(Reg16::HL, 0x9000);
        call(&mut emu);
        assert_eq!(reg_a(&mut emu), 0);
        assert_eq!(emu.bus.mem.fetch(0x9000), expect);
    }
}

#[test]
fn disk_errors_surface_as_status_codes() {
    let mut emu = emulator();
    // Unit with no media.
    emu.cpu.registers().set8(Reg8::B, DIOREAD);
    emu.cpu.registers().set8(Reg8::C, 5);
    emu.cpu.registers().set8(Reg8::E, 1);
    call(&mut emu);
    assert_eq!(reg_a(&mut emu) as i8, ERR_NOMEDIA);
    assert!(carry(&mut emu));

    // Unit number beyond the table.
    emu.cpu.registers().set8(Reg8::B, DIOREAD);
    emu.cpu.registers().set8(Reg8::C, 16);
    call(&mut emu);
    assert_eq!(reg_a(&mut emu) as i8, ERR_NOUNIT);

    // Writing to the ROM memory disk.
    emu.cpu.registers().set8(Reg8::B, DIOWRITE);
    emu.cpu.registers().set8(Reg8::C, 0);
    emu.cpu.registers().set8(Reg8::D, 0x8F);
    emu.cpu.registers().set8(Reg8::E, 1);
    emu.cpu.registers().set16(Reg16::HL, 0x8000);
    call(&mut emu);
    assert_eq!(reg_a(&mut emu) as i8, ERR_READONLY);
}

#[test]
fn memory_disk_reads_rom_banks() {
    let mut emu = emulator();
    // ROM disk starts at bank 2; sector 0 is the start of that bank.
    emu.bus.mem.patch_rom(0x02, 0x0000, 0x5A);
    seek(&mut emu, 0, 0);
    emu.cpu.registers().set8(Reg8::B, DIOREAD);
    emu.cpu.registers().set8(Reg8::C, 0);
    emu.cpu.registers().set8(Reg8::D, 0x8F);
    emu.cpu.registers().set8(Reg8::E, 1);
    emu.cpu.registers().set16(Reg16::HL, 0xA000);
    call(&mut emu);
    assert_eq!(reg_a(&mut emu), 0);
    assert_eq!(emu.bus.mem.fetch(0xA000), 0x5A);
}

#[test]
fn media_and_capacity_queries() {
    let mut emu = emulator();
    emu.hbios
        .disks
        .attach_buffer(2, vec![0u8; HD1K_SINGLE_SIZE as usize])
        .unwrap();

    emu.cpu.registers().set8(Reg8::B, DIOMEDIA);
    emu.cpu.registers().set8(Reg8::C, 0);
    call(&mut emu);
    assert_eq!(emu.cpu.registers().get8(Reg8::E), 1); // MDROM

    emu.cpu.registers().set8(Reg8::B, DIOMEDIA);
    emu.cpu.registers().set8(Reg8::C, 2);
    call(&mut emu);
    assert_eq!(emu.cpu.registers().get8(Reg8::E), 10); // HDNEW

    emu.cpu.registers().set8(Reg8::B, DIOCAP);
    emu.cpu.registers().set8(Reg8::C, 2);
    call(&mut emu);
    assert_eq!(emu.cpu.registers().get16(Reg16::DE), 0);
    assert_eq!(emu.cpu.registers().get16(Reg16::HL), 16384);
    assert_eq!(emu.cpu.registers().get16(Reg16::BC), 512);

    emu.cpu.registers().set8(Reg8::B, DIOGEOM);
    emu.cpu.registers().set8(Reg8::C, 2);
    call(&mut emu);
    assert_eq!(emu.cpu.registers().get16(Reg16::HL), 64); // cylinders
    assert_eq!(emu.cpu.registers().get8(Reg8::D), 16 | 0x80); // heads + LBA flag
    assert_eq!(emu.cpu.registers().get8(Reg8::E), 16); // sectors
    assert_eq!(emu.cpu.registers().get16(Reg16::BC), 512);
}

// ========================================================================
// S4/S5: slices
// ========================================================================

#[test]
fn combo_slice_lba_and_media() {
    let mut emu = emulator();
    emu.hbios.disks.attach_buffer(2, combo_image(6)).unwrap();

    emu.cpu.registers().set8(Reg8::B, EXTSLICE);
    emu.cpu.registers().set8(Reg8::D, 2);
    emu.cpu.registers().set8(Reg8::E, 3);
    call(&mut emu);
    assert_eq!(reg_a(&mut emu), 0);
    let lba =
        ((emu.cpu.registers().get16(Reg16::DE) as u32) << 16) | emu.cpu.registers().get16(Reg16::HL) as u32;
    assert_eq!(lba, 2048 + 3 * 16384);
    assert_eq!(emu.cpu.registers().get8(Reg8::B), 10); // HDNEW
}

#[test]
fn single_slice_zero_is_lba_zero() {
    let mut emu = emulator();
    emu.hbios
        .disks
        .attach_buffer(2, vec![0u8; HD1K_SINGLE_SIZE as usize])
        .unwrap();
    emu.cpu.registers().set8(Reg8::B, EXTSLICE);
    emu.cpu.registers().set8(Reg8::D, 2);
    emu.cpu.registers().set8(Reg8::E, 0);
    call(&mut emu);
    assert_eq!(reg_a(&mut emu), 0);
    assert_eq!(emu.cpu.registers().get16(Reg16::DE), 0);
    assert_eq!(emu.cpu.registers().get16(Reg16::HL), 0);
    assert_eq!(emu.cpu.registers().get8(Reg8::B), 10);
}

#[test]
fn dynamic_slice_count_with_three_disks() {
    let mut emu = emulator();
    for unit in 2..5 {
        emu.hbios
            .disks
            .attach_buffer(unit, vec![0u8; HD1K_SINGLE_SIZE as usize])
            .unwrap();
    }

    // 2 memory disks + 3 hard disks.
    emu.cpu.registers().set8(Reg8::B, SYSGET);
    emu.cpu.registers().set8(Reg8::C, 0x10);
    call(&mut emu);
    assert_eq!(emu.cpu.registers().get8(Reg8::E), 5);

    // Three hard disks leave two slices each.
    for unit in 2..5 {
        assert_eq!(emu.hbios.disks.slices(unit, None), 2);
    }

    // Slice 1 is reachable, slice 2 is out of range.
    emu.cpu.registers().set8(Reg8::B, EXTSLICE);
    emu.cpu.registers().set8(Reg8::D, 2);
    emu.cpu.registers().set8(Reg8::E, 1);
    call(&mut emu);
    assert_eq!(reg_a(&mut emu), 0);

    emu.cpu.registers().set8(Reg8::B, EXTSLICE);
    emu.cpu.registers().set8(Reg8::D, 2);
    emu.cpu.registers().set8(Reg8::E, 2);
    call(&mut emu);
    assert_eq!(reg_a(&mut emu) as i8, ERR_RANGE);
    assert!(carry(&mut emu));
}

// ========================================================================
// S6: two-phase bank copy
// ========================================================================

#[test]
fn bank_copy_moves_os_image_to_user_bank() {
    let mut emu = emulator();
    emu.cpu.registers().set8(Reg8::B, SYSSETCPY);
    emu.cpu.registers().set8(Reg8::D, 0x8E);
    emu.cpu.registers().set8(Reg8::E, 0x01);
    emu.cpu.registers().set16(Reg16::HL, 0x0100);
    call(&mut emu);
    assert_eq!(reg_a(&mut emu), 0);

    emu.cpu.registers().set8(Reg8::B, SYSBNKCPY);
    emu.cpu.registers().set16(Reg16::HL, 0x1000);
    emu.cpu.registers().set16(Reg16::DE, 0x3000);
    call(&mut emu);
    assert_eq!(reg_a(&mut emu), 0);

    for i in 0..0x100u16 {
        assert_eq!(
            emu.bus.mem.read_bank(0x8E, 0x3000 + i),
            emu.bus.mem.read_bank(0x01, 0x1000 + i)
        );
        assert_eq!(emu.bus.mem.read_bank(0x8E, 0x3000 + i), ((i ^ 0xA5) & 0xFF) as u8);
    }
}

#[test]
fn bank_copy_of_common_addresses_is_coherent() {
    let mut emu = emulator();
    for i in 0..0x100u16 {
        emu.bus.mem.store(0xD000 + i, (i & 0xFF) as u8);
    }
    emu.cpu.registers().set8(Reg8::B, SYSSETCPY);
    emu.cpu.registers().set8(Reg8::D, 0x8E);
    emu.cpu.registers().set8(Reg8::E, 0x01);
    emu.cpu.registers().set16(Reg16::HL, 0x0100);
    call(&mut emu);
    emu.cpu.registers().set8(Reg8::B, SYSBNKCPY);
    emu.cpu.registers().set16(Reg16::HL, 0xD000);
    emu.cpu.registers().set16(Reg16::DE, 0xD000);
    call(&mut emu);
    for i in 0..0x100u16 {
        assert_eq!(
            emu.bus.mem.read_bank(0x8E, 0xD000 + i),
            emu.bus.mem.read_bank(0x01, 0xD000 + i)
        );
    }
}

// ========================================================================
// Peek / poke
// ========================================================================

#[test]
fn peek_poke_do_not_touch_current_bank() {
    let mut emu = emulator();
    let before = emu.bus.mem.current_bank();

    emu.cpu.registers().set8(Reg8::B, SYSPOKE);
    emu.cpu.registers().set8(Reg8::D, 0x8C);
    emu.cpu.registers().set16(Reg16::HL, 0x2345);
    emu.cpu.registers().set8(Reg8::E, 0x5A);
    call(&mut emu);
    assert_eq!(reg_a(&mut emu), 0);

    emu.cpu.registers().set8(Reg8::B, SYSPEEK);
    emu.cpu.registers().set8(Reg8::D, 0x8C);
    emu.cpu.registers().set16(Reg16::HL, 0x2345);
    call(&mut emu);
    assert_eq!(emu.cpu.registers().get8(Reg8::E), 0x5A);
    assert_eq!(emu.bus.mem.current_bank(), before);
}

// ========================================================================
// Character I/O
// ========================================================================

#[test]
fn console_input_translates_lf_to_cr() {
    let mut emu = emulator();
    emu.hbios.console.queue_byte(0x0A);
    emu.cpu.registers().set8(Reg8::B, CIOIN);
    call(&mut emu);
    assert_eq!(reg_a(&mut emu), 0);
    assert_eq!(emu.cpu.registers().get8(Reg8::E), 0x0D);
}

#[test]
fn console_output_masks_to_seven_bits() {
    let mut emu = emulator();
    emu.cpu.registers().set8(Reg8::B, CIOOUT);
    emu.cpu.registers().set8(Reg8::E, 0xC1);
    call(&mut emu);
    assert_eq!(emu.hbios.console.drain_output(), vec![0x41]);
}

#[test]
fn nonblocking_input_leaves_registers_untouched() {
    let mut emu = emulator();
    emu.cpu.registers().set8(Reg8::B, CIOIN);
    emu.cpu.registers().set8(Reg8::E, 0x99);
    call(&mut emu);
    assert!(emu.hbios.waiting_for_input);
    assert_eq!(emu.cpu.registers().get8(Reg8::E), 0x99);

    // Input arrives; re-driving the dispatch completes the call.
    emu.hbios.console.queue_byte(b'x');
    emu.cpu.registers().set8(Reg8::B, CIOIN);
    call(&mut emu);
    assert!(!emu.hbios.waiting_for_input);
    assert_eq!(emu.cpu.registers().get8(Reg8::E), b'x');
}

#[test]
fn input_status_reflects_queue() {
    let mut emu = emulator();
    emu.cpu.registers().set8(Reg8::B, CIOIST);
    call(&mut emu);
    assert_eq!(reg_a(&mut emu), 0);
    emu.hbios.console.queue_byte(b'q');
    emu.cpu.registers().set8(Reg8::B, CIOIST);
    call(&mut emu);
    assert_eq!(reg_a(&mut emu), 1);
}

// ========================================================================
// PC trap and simulated RET
// ========================================================================

#[test]
fn pc_trap_services_call_and_returns() {
    let mut emu = emulator();
    emu.bus.mem.store(0xFF80, 0x34);
    emu.bus.mem.store(0xFF81, 0x12);
    emu.cpu.registers().set16(Reg16::SP, 0xFF80);
    emu.cpu.registers().set_pc(0xFFF0);
    emu.cpu.registers().set8(Reg8::B, CIOOST);

    assert!(matches!(emu.step(), StepOutcome::Running));
    assert_eq!(reg_a(&mut emu), 1);
    assert_eq!(emu.cpu.registers().pc(), 0x1234);
    assert_eq!(emu.cpu.registers().get16(Reg16::SP), 0xFF82);
}

#[test]
fn pc_trap_waits_for_input_without_moving() {
    let mut emu = emulator();
    emu.cpu.registers().set16(Reg16::SP, 0xFF80);
    emu.bus.mem.store(0xFF80, 0x34);
    emu.bus.mem.store(0xFF81, 0x12);
    emu.cpu.registers().set_pc(0xFFF0);
    emu.cpu.registers().set8(Reg8::B, CIOIN);

    assert!(matches!(emu.step(), StepOutcome::WaitingForInput));
    assert_eq!(emu.cpu.registers().pc(), 0xFFF0);

    emu.hbios.console.queue_byte(b'z');
    assert!(matches!(emu.step(), StepOutcome::Running));
    assert_eq!(emu.cpu.registers().get8(Reg8::E), b'z');
    assert_eq!(emu.cpu.registers().pc(), 0x1234);
}

// ========================================================================
// System reset
// ========================================================================

#[test]
fn warm_reset_restores_boot_state() {
    let mut emu = emulator();
    // Plant a guest shadow write to watch the bitmap get cleared.
    emu.bus.mem.select_bank(0x00);
    emu.bus.mem.store(0x01F0, 0xEE);
    assert_eq!(emu.bus.mem.fetch(0x01F0), 0xEE);

    emu.hbios.console.queue_byte(b'g');
    emu.bus.mem.store(0xFF80, 0x34);
    emu.bus.mem.store(0xFF81, 0x12);
    emu.cpu.registers().set16(Reg16::SP, 0xFF80);
    emu.cpu.registers().set_pc(0xFFF0);
    emu.cpu.registers().set8(Reg8::B, SYSRESET);
    emu.cpu.registers().set8(Reg8::C, 1);

    assert!(matches!(emu.step(), StepOutcome::Running));
    assert_eq!(emu.cpu.registers().pc(), 0x0000);
    assert_eq!(emu.bus.mem.current_bank(), 0x00);
    assert!(!emu.hbios.console.has_input());
    // The shadow byte reverted to the ROM value.
    assert_eq!(emu.bus.mem.fetch(0x01F0), 0x00);
}

#[test]
fn cold_reset_can_request_exit() {
    let rom = test_rom();
    let mut config = EmulatorConfig::default();
    config.exit_on_cold_reset = true;
    let mut emu = Emulator::new(&rom, Box::new(QueueConsole::new()), config).unwrap();

    emu.bus.mem.store(0xFF80, 0x00);
    emu.bus.mem.store(0xFF81, 0x00);
    emu.cpu.registers().set16(Reg16::SP, 0xFF80);
    emu.cpu.registers().set_pc(0xFFF0);
    emu.cpu.registers().set8(Reg8::B, SYSRESET);
    emu.cpu.registers().set8(Reg8::C, 2);
    assert!(matches!(emu.step(), StepOutcome::Exit(0)));
}

// ========================================================================
// System queries and misc
// ========================================================================

#[test]
fn version_and_platform() {
    let mut emu = emulator();
    emu.cpu.registers().set8(Reg8::B, SYSVER);
    call(&mut emu);
    assert_eq!(emu.cpu.registers().get16(Reg16::DE), 0x3500);
    assert_eq!(emu.cpu.registers().get8(Reg8::L), 0x01);
}

#[test]
fn sysget_reports_bank_and_memory_info() {
    let mut emu = emulator();
    emu.cpu.registers().set8(Reg8::B, SYSGET);
    emu.cpu.registers().set8(Reg8::C, 0xF2);
    call(&mut emu);
    assert_eq!(emu.cpu.registers().get8(Reg8::D), 0x80);
    assert_eq!(emu.cpu.registers().get8(Reg8::E), 0x8E);

    emu.cpu.registers().set8(Reg8::B, SYSGET);
    emu.cpu.registers().set8(Reg8::C, 0xF1);
    call(&mut emu);
    assert_eq!(emu.cpu.registers().get8(Reg8::D), 16);
    assert_eq!(emu.cpu.registers().get8(Reg8::E), 16);

    emu.cpu.registers().set8(Reg8::B, SYSGET);
    emu.cpu.registers().set8(Reg8::C, 0xD2);
    call(&mut emu);
    assert_eq!(emu.cpu.registers().get8(Reg8::L), 0x01); // boot bank
    assert_eq!(emu.cpu.registers().get8(Reg8::D), 0x02); // boot unit
}

#[test]
fn unknown_codes_return_the_documented_errors() {
    let mut emu = emulator();
    emu.cpu.registers().set8(Reg8::B, 0x70);
    call(&mut emu);
    assert_eq!(reg_a(&mut emu) as i8, ERR_NOFUNC);
    assert!(carry(&mut emu));

    emu.cpu.registers().set8(Reg8::B, SYSGET);
    emu.cpu.registers().set8(Reg8::C, 0x7F);
    call(&mut emu);
    assert_eq!(reg_a(&mut emu) as i8, ERR_UNDEF);
}

#[test]
fn dsky_reports_no_hardware() {
    let mut emu = emulator();
    emu.cpu.registers().set8(Reg8::B, DSKYRESET);
    call(&mut emu);
    assert_eq!(reg_a(&mut emu) as i8, ERR_NOHW);
    assert!(carry(&mut emu));
}

#[test]
fn alloc_is_a_bump_allocator() {
    let mut emu = emulator();
    emu.cpu.registers().set8(Reg8::B, SYSALLOC);
    emu.cpu.registers().set16(Reg16::HL, 0x100);
    call(&mut emu);
    assert_eq!(reg_a(&mut emu), 0);
    let first = emu.cpu.registers().get16(Reg16::HL);

    emu.cpu.registers().set8(Reg8::B, SYSALLOC);
    emu.cpu.registers().set16(Reg16::HL, 0x100);
    call(&mut emu);
    let second = emu.cpu.registers().get16(Reg16::HL);
    assert_eq!(second, first + 0x100);

    // Exhaustion reports out-of-memory.
    emu.cpu.registers().set8(Reg8::B, SYSALLOC);
    emu.cpu.registers().set16(Reg16::HL, 0x4000);
    call(&mut emu);
    assert_eq!(reg_a(&mut emu) as i8, ERR_NOMEM);
}

#[test]
fn signal_port_registers_family_entries() {
    let mut emu = emulator();
    emu.hbios.trapping_enabled = false;
    emu.hbios.handle_signal(0xFE);
    assert!(!emu.hbios.trapping_enabled);
    emu.hbios.handle_signal(0xFF);
    assert!(emu.hbios.trapping_enabled);

    emu.hbios.handle_signal(0xE1);
    emu.hbios.handle_signal(0x20);
    emu.hbios.handle_signal(0xFE);
    assert_eq!(emu.hbios.family_entries[1], 0xFE20);
}

#[test]
fn rtc_nvram_round_trip() {
    let mut emu = emulator();
    emu.cpu.registers().set8(Reg8::B, RTCSETBYT);
    emu.cpu.registers().set8(Reg8::E, 0x10);
    emu.cpu.registers().set8(Reg8::D, 0x99);
    call(&mut emu);
    assert_eq!(reg_a(&mut emu), 0);

    emu.cpu.registers().set8(Reg8::B, RTCGETBYT);
    emu.cpu.registers().set8(Reg8::E, 0x10);
    call(&mut emu);
    assert_eq!(emu.cpu.registers().get8(Reg8::E), 0x99);
}

#[test]
fn rtc_writes_bcd_time_to_guest_buffer() {
    let mut emu = emulator();
    emu.cpu.registers().set8(Reg8::B, RTCGETTIM);
    emu.cpu.registers().set16(Reg16::HL, 0x9000);
    call(&mut emu);
    assert_eq!(reg_a(&mut emu), 0);
    // Every field is valid BCD; month is 0x01..=0x12.
    for i in 0..6u16 {
        let b = emu.bus.mem.fetch(0x9000 + i);
        assert!(b & 0x0F <= 9 && b >> 4 <= 9, "byte {} not BCD: {:02X}", i, b);
    }
    let month = emu.bus.mem.fetch(0x9001);
    assert!((0x01..=0x12).contains(&month));
}
