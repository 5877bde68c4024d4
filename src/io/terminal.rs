use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use log::debug;

use crate::io::console::Console;

/// Consecutive ^C presses that terminate the emulator.
const CTRL_C_EXIT_COUNT: u32 = 5;

/// Raw-mode TTY console. A background thread translates key events into
/// bytes and feeds a shared queue; output goes straight to stdout. Five
/// consecutive ^C presses request emulator exit (the guest sees each one
/// as a normal 0x03 until then).
pub struct TerminalConsole {
    input: Arc<Mutex<VecDeque<u8>>>,
    exit_flag: Arc<AtomicBool>,
}

impl TerminalConsole {
    pub fn new() -> std::io::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        let input = Arc::new(Mutex::new(VecDeque::new()));
        let exit_flag = Arc::new(AtomicBool::new(false));
        start_input_thread(input.clone(), exit_flag.clone());
        Ok(Self { input, exit_flag })
    }
}

impl Drop for TerminalConsole {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

impl Console for TerminalConsole {
    fn write_byte(&mut self, b: u8) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(&[b]);
        let _ = out.flush();
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.input.lock().unwrap().pop_front()
    }

    fn has_input(&mut self) -> bool {
        !self.input.lock().unwrap().is_empty()
    }

    fn queue_byte(&mut self, b: u8) {
        self.input.lock().unwrap().push_back(b);
    }

    fn clear_queue(&mut self) {
        self.input.lock().unwrap().clear();
    }

    fn flush(&mut self) {
        let _ = std::io::stdout().flush();
    }

    fn exit_requested(&mut self) -> bool {
        self.exit_flag.load(Ordering::SeqCst)
    }
}

/// Translate a key event into the byte(s) a serial terminal would send.
fn key_bytes(code: KeyCode, modifiers: KeyModifiers) -> Vec<u8> {
    match code {
        KeyCode::Char(c) => {
            if modifiers.contains(KeyModifiers::CONTROL) {
                let c = c.to_ascii_uppercase();
                if c.is_ascii_uppercase() {
                    return vec![(c as u8) & 0x1F];
                }
                Vec::new()
            } else if c.is_ascii() {
                vec![c as u8]
            } else {
                Vec::new()
            }
        }
        KeyCode::Enter => vec![0x0D],
        KeyCode::Backspace => vec![0x7F],
        KeyCode::Tab => vec![0x09],
        KeyCode::Esc => vec![0x1B],
        KeyCode::Up => vec![0x1B, b'[', b'A'],
        KeyCode::Down => vec![0x1B, b'[', b'B'],
        KeyCode::Right => vec![0x1B, b'[', b'C'],
        KeyCode::Left => vec![0x1B, b'[', b'D'],
        _ => Vec::new(),
    }
}

fn start_input_thread(input: Arc<Mutex<VecDeque<u8>>>, exit_flag: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        debug!("[TERM] input thread started");
        let mut ctrl_c_run = 0u32;

        loop {
            // Poll with a timeout so the thread never wedges on a console
            // state change.
            match event::poll(Duration::from_millis(100)) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    debug!("[TERM] poll error: {:?}", e);
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }
            }

            let ev = match event::read() {
                Ok(ev) => ev,
                Err(e) => {
                    debug!("[TERM] read error: {:?}", e);
                    continue;
                }
            };

            if let Event::Key(key) = ev {
                if key.kind != KeyEventKind::Press {
                    continue;
                }

                let is_ctrl_c = key.modifiers.contains(KeyModifiers::CONTROL)
                    && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('C'));
                if is_ctrl_c {
                    ctrl_c_run += 1;
                    if ctrl_c_run >= CTRL_C_EXIT_COUNT {
                        exit_flag.store(true, Ordering::SeqCst);
                        return;
                    }
                } else {
                    ctrl_c_run = 0;
                }

                let bytes = key_bytes(key.code, key.modifiers);
                if !bytes.is_empty() {
                    let mut queue = input.lock().unwrap();
                    queue.extend(bytes);
                }
            }
        }
    });
}
