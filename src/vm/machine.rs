use iz80::Machine;
use log::{debug, trace};

use crate::hbios::init;
use crate::vm::memory::MemBus;

/// Default bank-select ports of the classic platform. A write of a BankId
/// to either one switches the lower 32KB window.
pub const BANK_PORTS: [u8; 2] = [0x78, 0x7C];
/// Any write here is an HBIOS call; parameters travel in CPU registers.
pub const DISPATCH_PORT: u8 = 0xEF;
/// Proxy-ROM status/handshake port.
pub const SIGNAL_PORT: u8 = 0xEE;

/// The guest-visible bus: banked memory plus the two-port I/O surface.
///
/// A dispatch-port write cannot service the HBIOS call inline because the
/// CPU core holds the bus borrow while the OUT executes; instead it latches
/// a request that the emulator drains once the instruction retires. That is
/// exactly the contract for I/O-trapped calls: execution continues at the
/// instruction after the OUT, with no simulated RET.
pub struct GuestBus {
    pub mem: MemBus,
    /// Overrides the default pair when set.
    pub bank_port: Option<u8>,
    pub strict_io: bool,
    pub pending_hbios: bool,
    pub pending_signals: Vec<u8>,
    pub fault: Option<String>,
}

impl GuestBus {
    pub fn new(mem: MemBus, bank_port: Option<u8>, strict_io: bool) -> Self {
        Self {
            mem,
            bank_port,
            strict_io,
            pending_hbios: false,
            pending_signals: Vec::new(),
            fault: None,
        }
    }

    fn is_bank_port(&self, port: u8) -> bool {
        match self.bank_port {
            Some(p) => port == p,
            None => BANK_PORTS.contains(&port),
        }
    }
}

impl Machine for GuestBus {
    fn peek(&mut self, address: u16) -> u8 {
        self.mem.fetch(address)
    }

    fn poke(&mut self, address: u16, value: u8) {
        self.mem.store(address, value);
    }

    fn port_in(&mut self, address: u16) -> u8 {
        let port = (address & 0xFF) as u8;
        if port == SIGNAL_PORT {
            return 0x00;
        }
        if self.is_bank_port(port) {
            return self.mem.current_bank();
        }
        trace!("[IO] read from unhandled port {:02X}", port);
        if self.strict_io && self.fault.is_none() {
            self.fault = Some(format!("read from unrecognized I/O port {:02X}", port));
        }
        // No hardware present.
        0xFF
    }

    fn port_out(&mut self, address: u16, value: u8) {
        let port = (address & 0xFF) as u8;
        if self.is_bank_port(port) {
            init::seed_ram_bank(&mut self.mem, value);
            self.mem.select_bank(value);
        } else if port == DISPATCH_PORT {
            // The written byte carries no information.
            self.pending_hbios = true;
        } else if port == SIGNAL_PORT {
            self.pending_signals.push(value);
        } else {
            debug!("[IO] dropped write {:02X} to port {:02X}", value, port);
            if self.strict_io && self.fault.is_none() {
                self.fault = Some(format!("write to unrecognized I/O port {:02X}", port));
            }
        }
    }
}
