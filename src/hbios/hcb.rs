// HBIOS Configuration Block — 256 bytes at 0x0100 in the BIOS bank,
// populated from the ROM image. Offsets are relative to HCB_BASE.

pub const HCB_BASE: u16 = 0x0100;

pub const HCB_MARKER: u16 = 0x00; // 'W', ~'W'
pub const HCB_VERSION: u16 = 0x02; // (major << 4) | minor, update
pub const HCB_PLATFORM: u16 = 0x04;
pub const HCB_CPUMHZ: u16 = 0x05;
pub const HCB_CPUKHZ: u16 = 0x06; // word, little-endian
pub const HCB_RAMBANKS: u16 = 0x08;
pub const HCB_ROMBANKS: u16 = 0x09;
pub const HCB_BOOTVOL: u16 = 0x0A; // boot disk unit
pub const HCB_BOOTSLICE: u16 = 0x0B;
pub const HCB_BOOTBANK: u16 = 0x0C;
pub const HCB_CONDEV: u16 = 0x0D; // console CIO device
pub const HCB_APITYPE: u16 = 0x12; // 0x00 = HBIOS, 0xFF = UNA

// Bank-id constants published to the firmware.
pub const HCB_BIDBIOS: u16 = 0x14;
pub const HCB_BIDUSER: u16 = 0x15;
pub const HCB_BIDCOM: u16 = 0x16;
pub const HCB_BIDAUX: u16 = 0x17;
pub const HCB_BIDRAMD0: u16 = 0x18;
pub const HCB_CNTRAMD: u16 = 0x19;
pub const HCB_BIDROMD0: u16 = 0x1A;
pub const HCB_CNTROMD: u16 = 0x1B;
pub const HCB_BIDAPP0: u16 = 0x1C;
pub const HCB_CNTAPP: u16 = 0x1D;

pub const APITYPE_HBIOS: u8 = 0x00;

// Ident block: 'W', ~'W', combined version. Firmware utilities check for
// it at both addresses and follow the pointer at 0xFFFC.
pub const IDENT_SIG: [u8; 3] = [b'W', 0xA8, VERSION_BYTE];
pub const IDENT_ADDR: u16 = 0xFF00;
pub const IDENT_ALT_ADDR: u16 = 0xFE00;
pub const IDENT_PTR_ADDR: u16 = 0xFFFC;

/// (major << 4) | minor.
pub const VERSION_BYTE: u8 = 0x35;
/// Version word reported by the system-version call.
pub const VERSION_WORD: u16 = 0x3500;
