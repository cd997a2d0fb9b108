// SPDX-License-Identifier: MPL-2.0

//! A port-mapped 8250 UART, 8N1.

use crate::sync::SpinLock;

use super::device::IoPort;

/// Base of the first serial port.
const COM1: u16 = 0x3f8;

/// Divisor for 115200 baud.
const BAUD_DIVISOR: u16 = 1;

/// Transmitter-holding-register-empty bit of the line status register.
const LSR_THRE: u8 = 1 << 5;

struct SerialPort {
    data: IoPort<u8>,
    int_en: IoPort<u8>,
    fifo_ctrl: IoPort<u8>,
    line_ctrl: IoPort<u8>,
    modem_ctrl: IoPort<u8>,
    line_status: IoPort<u8>,
}

impl SerialPort {
    /// # Safety
    ///
    /// `base` must be the base of a serial device.
    const unsafe fn new(base: u16) -> Self {
        Self {
            data: IoPort::new(base),
            int_en: IoPort::new(base + 1),
            fifo_ctrl: IoPort::new(base + 2),
            line_ctrl: IoPort::new(base + 3),
            modem_ctrl: IoPort::new(base + 4),
            line_status: IoPort::new(base + 5),
        }
    }

    fn init(&self, divisor: u16) {
        // Disable interrupts.
        self.int_en.write(0x00);
        // Enable DLAB and program the divisor latch.
        self.line_ctrl.write(0x80);
        self.data.write((divisor & 0xff) as u8);
        self.int_en.write((divisor >> 8) as u8);
        // Disable DLAB, 8 bits, no parity, one stop bit.
        self.line_ctrl.write(0x03);
        // Enable FIFO, clear queues, 14-byte watermark.
        self.fifo_ctrl.write(0xc7);
        // Data terminal ready, request to send.
        self.modem_ctrl.write(0x03);
    }

    fn write_byte(&self, byte: u8) {
        while self.line_status.read() & LSR_THRE == 0 {
            core::hint::spin_loop();
        }
        self.data.write(byte);
    }
}

static UART: SpinLock<SerialPort> = SpinLock::new(unsafe { SerialPort::new(COM1) });

/// Initializes the console UART.
pub(crate) fn init() {
    UART.lock_irq_disabled().init(BAUD_DIVISOR);
}

/// Writes `bytes` out, polling the transmitter between bytes.
pub(crate) fn write(bytes: &[u8]) {
    let uart = UART.lock_irq_disabled();
    for &byte in bytes {
        if byte == b'\n' {
            uart.write_byte(b'\r');
        }
        uart.write_byte(byte);
    }
}
