//! Console I/O for the emulated machine.
//!
//! `Uart` is a 16550-style serial port: the host queues keystrokes into its
//! receive FIFO and collects whatever the guest transmits. The same queues
//! back the HBIOS character calls, so a guest may mix both paths.

use std::collections::VecDeque;

/// Receives guest output at batch boundaries.
pub trait OutputSink: Send {
    fn deliver(&mut self, bytes: &[u8]);
}

impl<F> OutputSink for F
where
    F: FnMut(&[u8]) + Send,
{
    fn deliver(&mut self, bytes: &[u8]) {
        (*self)(bytes)
    }
}

// Register offsets.
const RBR_THR: u8 = 0;
const IER: u8 = 1;
const IIR_FCR: u8 = 2;
const LCR: u8 = 3;
const MCR: u8 = 4;
const LSR: u8 = 5;
const MSR: u8 = 6;
const SCR: u8 = 7;

const LCR_DLAB: u8 = 0x80;
const LSR_DATA_READY: u8 = 0x01;
const LSR_THR_EMPTY: u8 = 0x20;
const LSR_TX_IDLE: u8 = 0x40;
/// CTS, DSR and DCD asserted.
const MSR_LINES_UP: u8 = 0xB0;
const IIR_NONE_PENDING: u8 = 0x01;
const IIR_FIFO_ENABLED: u8 = 0xC0;

/// 16550-style UART with unbounded queues.
#[derive(Debug)]
pub struct Uart {
    input: VecDeque<u8>,
    output: Vec<u8>,
    lf_to_cr: bool,
    strip_high_bit: bool,
    ier: u8,
    fcr: u8,
    lcr: u8,
    mcr: u8,
    scr: u8,
    divisor: u16,
}

impl Default for Uart {
    fn default() -> Self {
        Self::new(true, true)
    }
}

impl Uart {
    pub fn new(lf_to_cr: bool, strip_high_bit: bool) -> Self {
        Self {
            input: VecDeque::new(),
            output: Vec::new(),
            lf_to_cr,
            strip_high_bit,
            ier: 0,
            fcr: 0,
            lcr: 0x03,
            mcr: 0,
            scr: 0,
            divisor: 1,
        }
    }

    /// Queue one byte of keyboard input.
    pub fn queue_input(&mut self, byte: u8) {
        self.input.push_back(byte);
    }

    /// Queue the ASCII characters of `s` in order. Other characters are skipped.
    pub fn queue_input_str(&mut self, s: &str) {
        self.input
            .extend(s.chars().filter(char::is_ascii).map(|c| c as u8));
    }

    /// Number of bytes waiting to be read by the guest.
    pub fn pending_input(&self) -> usize {
        self.input.len()
    }

    pub fn has_input(&self) -> bool {
        !self.input.is_empty()
    }

    /// Take the next input byte as the guest sees it.
    pub fn take_input(&mut self) -> Option<u8> {
        let byte = self.input.pop_front()?;
        if self.lf_to_cr && byte == b'\n' {
            Some(b'\r')
        } else {
            Some(byte)
        }
    }

    /// Record one byte transmitted by the guest.
    pub fn put_output(&mut self, byte: u8) {
        let byte = if self.strip_high_bit { byte & 0x7F } else { byte };
        self.output.push(byte);
    }

    pub fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// Bytes transmitted since the last drain, without clearing them.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Return and clear everything the guest has transmitted, in order.
    pub fn drain_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    /// Hand buffered output to `sink` and clear it. Does nothing when empty.
    pub fn flush_to(&mut self, sink: &mut dyn OutputSink) {
        if !self.output.is_empty() {
            sink.deliver(&self.output);
            self.output.clear();
        }
    }

    /// Drop both queues and return the registers to power-on values.
    pub fn reset(&mut self) {
        *self = Self::new(self.lf_to_cr, self.strip_high_bit);
    }

    fn dlab(&self) -> bool {
        self.lcr & LCR_DLAB != 0
    }

    fn line_status(&self) -> u8 {
        let mut lsr = LSR_THR_EMPTY | LSR_TX_IDLE;
        if self.has_input() {
            lsr |= LSR_DATA_READY;
        }
        lsr
    }

    /// Guest read of register `reg` (0-7).
    pub fn read_reg(&mut self, reg: u8) -> u8 {
        match reg {
            RBR_THR if self.dlab() => self.divisor as u8,
            RBR_THR => self.take_input().unwrap_or(0),
            IER if self.dlab() => (self.divisor >> 8) as u8,
            IER => self.ier,
            IIR_FCR => {
                if self.fcr & 0x01 != 0 {
                    IIR_FIFO_ENABLED | IIR_NONE_PENDING
                } else {
                    IIR_NONE_PENDING
                }
            }
            LCR => self.lcr,
            MCR => self.mcr,
            LSR => self.line_status(),
            MSR => MSR_LINES_UP,
            SCR => self.scr,
            _ => 0xFF,
        }
    }

    /// Guest write of register `reg` (0-7).
    pub fn write_reg(&mut self, reg: u8, value: u8) {
        match reg {
            RBR_THR if self.dlab() => self.divisor = (self.divisor & 0xFF00) | u16::from(value),
            RBR_THR => self.put_output(value),
            IER if self.dlab() => {
                self.divisor = (self.divisor & 0x00FF) | (u16::from(value) << 8)
            }
            IER => self.ier = value & 0x0F,
            IIR_FCR => {
                // Bit 1 clears the receive FIFO.
                if value & 0x02 != 0 {
                    self.input.clear();
                }
                self.fcr = value;
            }
            LCR => self.lcr = value,
            MCR => self.mcr = value & 0x1F,
            SCR => self.scr = value,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_order_and_drain() {
        let mut uart = Uart::default();
        uart.write_reg(RBR_THR, b'H');
        uart.write_reg(RBR_THR, b'i');
        assert_eq!(uart.drain_output(), b"Hi");
        assert!(uart.drain_output().is_empty());
    }

    #[test]
    fn test_high_bit_stripped() {
        let mut uart = Uart::default();
        uart.put_output(b'A' | 0x80);
        assert_eq!(uart.output(), b"A");

        let mut raw = Uart::new(true, false);
        raw.put_output(0xC1);
        assert_eq!(raw.output(), &[0xC1]);
    }

    #[test]
    fn test_line_status_tracks_input() {
        let mut uart = Uart::default();
        assert_eq!(uart.read_reg(LSR), 0x60);
        uart.queue_input(b'x');
        assert_eq!(uart.read_reg(LSR), 0x61);
        assert_eq!(uart.read_reg(RBR_THR), b'x');
        assert_eq!(uart.read_reg(LSR), 0x60);
    }

    #[test]
    fn test_lf_translated_on_read() {
        let mut uart = Uart::default();
        uart.queue_input_str("a\n");
        assert_eq!(uart.take_input(), Some(b'a'));
        assert_eq!(uart.take_input(), Some(b'\r'));
        assert_eq!(uart.take_input(), None);
    }

    #[test]
    fn test_non_ascii_skipped() {
        let mut uart = Uart::default();
        uart.queue_input_str("é1ü2");
        assert_eq!(uart.pending_input(), 2);
        assert_eq!(uart.take_input(), Some(b'1'));
        assert_eq!(uart.take_input(), Some(b'2'));
    }

    #[test]
    fn test_divisor_latch_hides_data_register() {
        let mut uart = Uart::default();
        uart.write_reg(LCR, 0x83);
        uart.write_reg(RBR_THR, 0x0C);
        uart.write_reg(IER, 0x00);
        uart.write_reg(LCR, 0x03);
        assert!(!uart.has_output());
        assert_eq!(uart.divisor, 12);
    }

    #[test]
    fn test_fifo_reset_clears_input() {
        let mut uart = Uart::default();
        uart.queue_input_str("abc");
        uart.write_reg(IIR_FCR, 0x07);
        assert_eq!(uart.pending_input(), 0);
        assert_eq!(uart.read_reg(IIR_FCR), 0xC1);
    }

    #[test]
    fn test_closure_sink() {
        let mut uart = Uart::default();
        let mut seen = Vec::new();
        uart.put_output(b'o');
        uart.put_output(b'k');
        {
            let mut sink = |bytes: &[u8]| seen.extend_from_slice(bytes);
            uart.flush_to(&mut sink);
        }
        assert_eq!(seen, b"ok");
        assert!(!uart.has_output());
    }
}
