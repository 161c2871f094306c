//! 16550a-compatible UART (`spec.md` §4.8, §5).
//!
//! Grounded on `original_source/src/Uart.{h,cpp}`: a mutex-guarded register
//! file, independently-mutexed host->guest and guest->host FIFOs, and an
//! atomic edge-triggered interrupt flag fed by a background reader thread.
//! The C++ original polls a console keypress directly; this crate has no
//! terminal of its own (`spec.md` §1's Non-goals: keyboard polling is a host
//! concern), so the reader thread instead drains bytes the host pushed
//! through [`Uart::guest_input`].
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use super::Device;
use crate::exception::Exception;
use crate::primitives::BYTE;

/// Interrupt line UART drives into the PLIC.
pub const UART_IRQ: u64 = 10;

const UART_RHR: u64 = 0;
const UART_THR: u64 = 0;
const UART_LCR: u64 = 3;
const UART_LSR: u64 = 5;

const UART_LSR_RX: u8 = 1;
const UART_LSR_TX: u8 = 1 << 5;

/// Size of the UART address window.
pub const UART_SIZE: u64 = 0x100;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

struct Shared {
    regs: Mutex<[u8; UART_SIZE as usize]>,
    input: Mutex<VecDeque<u8>>,
    output: Mutex<VecDeque<u8>>,
    interrupting: AtomicBool,
    quit: AtomicBool,
}

pub struct Uart {
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
}

impl Uart {
    /// Create a UART with `LSR.TX` set (transmitter ready) and start its
    /// background reader thread.
    pub fn new() -> Self {
        let mut regs = [0u8; UART_SIZE as usize];
        regs[UART_LSR as usize] |= UART_LSR_TX;

        let shared = Arc::new(Shared {
            regs: Mutex::new(regs),
            input: Mutex::new(VecDeque::new()),
            output: Mutex::new(VecDeque::new()),
            interrupting: AtomicBool::new(false),
            quit: AtomicBool::new(false),
        });

        let worker = Arc::clone(&shared);
        let reader = thread::spawn(move || uart_reader_loop(worker));
        info!("uart reader thread started");

        Self {
            shared,
            reader: Some(reader),
        }
    }

    /// Push a byte into the host-to-guest FIFO; the reader thread delivers
    /// it to the guest as soon as `LSR.RX` is clear.
    pub fn guest_input(&self, byte: u8) {
        self.shared.input.lock().push_back(byte);
    }

    /// Pop the next byte the guest has written to `THR`, if any.
    pub fn guest_output(&self) -> Option<u8> {
        self.shared.output.lock().pop_front()
    }

    /// Edge-triggered: returns `true` once after the reader thread delivers
    /// a byte, then clears until the next delivery.
    pub fn is_interrupting(&self) -> bool {
        self.shared.interrupting.swap(false, Ordering::AcqRel)
    }
}

impl Default for Uart {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Uart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uart").finish_non_exhaustive()
    }
}

impl Drop for Uart {
    fn drop(&mut self) {
        self.shared.quit.store(true, Ordering::Release);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        info!("uart reader thread stopped");
    }
}

fn uart_reader_loop(shared: Arc<Shared>) {
    while !shared.quit.load(Ordering::Acquire) {
        let next = shared.input.lock().pop_front();
        if let Some(byte) = next {
            loop {
                if shared.quit.load(Ordering::Acquire) {
                    return;
                }
                let ready = shared.regs.lock()[UART_LSR as usize] & UART_LSR_RX == 0;
                if ready {
                    break;
                }
                thread::sleep(POLL_INTERVAL);
            }
            let mut regs = shared.regs.lock();
            regs[UART_RHR as usize] = byte;
            regs[UART_LSR as usize] |= UART_LSR_RX;
            drop(regs);
            shared.interrupting.store(true, Ordering::Release);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

impl Device for Uart {
    fn load(&self, addr: u64, width: u8) -> Result<u64, Exception> {
        if width != BYTE {
            return Err(Exception::LoadAccessFault);
        }
        let mut regs = self.shared.regs.lock();
        if addr == UART_RHR {
            let byte = regs[UART_RHR as usize];
            regs[UART_LSR as usize] &= !UART_LSR_RX;
            Ok(byte as u64)
        } else {
            Ok(regs[addr as usize] as u64)
        }
    }

    fn store(&mut self, addr: u64, width: u8, value: u64) -> Result<(), Exception> {
        if width != BYTE {
            return Err(Exception::StoreAMOAccessFault);
        }
        if addr == UART_THR {
            self.shared.output.lock().push_back(value as u8);
        } else {
            self.shared.regs.lock()[addr as usize] = value as u8;
        }
        Ok(())
    }

    fn size(&self) -> u64 {
        UART_SIZE
    }
}
