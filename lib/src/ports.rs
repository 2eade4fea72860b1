//! Legacy I/O port numbers and raw serial output.
//!
//! The only port consumer left in the kernel core is the early klog
//! fallback, which writes straight to COM1 before any console backend has
//! registered itself.

use x86_64::instructions::port::Port;

pub const COM1: u16 = 0x3F8;
pub const COM2: u16 = 0x2F8;

const UART_REG_LSR: u16 = 5;
const UART_LSR_TX_EMPTY: u8 = 0x20;

/// Write raw bytes to a UART data port, spinning on the transmit-empty bit.
///
/// # Safety
///
/// `base` must be the base port of a present 16550-compatible UART. No
/// locking is performed; concurrent callers may interleave output.
pub unsafe fn serial_write_bytes(base: u16, bytes: &[u8]) {
    let mut data: Port<u8> = Port::new(base);
    let mut lsr: Port<u8> = Port::new(base + UART_REG_LSR);
    for &byte in bytes {
        while lsr.read() & UART_LSR_TX_EMPTY == 0 {
            core::hint::spin_loop();
        }
        data.write(byte);
    }
}
