//! QEMU debug console sink.
//!
//! QEMU's `-debugcon` device captures every byte written to I/O port `0x402`.
//! On real hardware the port is normally unused and the writes are ignored.

use crate::ConsoleSink;

/// The port number for QEMU's debug port.
pub const QEMU_DEBUG_PORT: u16 = 0x402;

/// [`ConsoleSink`] writing each byte to an I/O port.
#[derive(Debug, Copy, Clone)]
pub struct DebugConSink {
    port: u16,
}

impl Default for DebugConSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugConSink {
    #[must_use]
    pub const fn new() -> Self {
        Self::with_port(QEMU_DEBUG_PORT)
    }

    #[must_use]
    pub const fn with_port(port: u16) -> Self {
        Self { port }
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl ConsoleSink for DebugConSink {
    fn write_str(&self, s: &str) {
        for b in s.bytes() {
            // SAFETY: requires CPL0 (or IOPL); the sink is only installed by the kernel.
            unsafe { outb(self.port, b) }
        }
    }
}

#[allow(clippy::inline_always)]
#[inline(always)]
unsafe fn outb(port: u16, val: u8) {
    unsafe {
        core::arch::asm!(
        "out dx, al",
        in("dx") port,
        in("al") val,
        options(nomem, nostack, preserves_flags)
        );
    }
}
