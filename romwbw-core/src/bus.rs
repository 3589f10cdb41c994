//! System bus seen by the CPU core: banked memory plus the port dispatcher.

use std::num::NonZeroU16;

use z80emu::{Io, Memory};

use crate::memory::BankedMemory;
use crate::ports::IoDispatcher;

/// Why an OUT instruction stopped the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusBreak {
    /// The guest wrote the HBIOS trap port; the value written is carried along.
    HbiosCall(u8),
}

/// Borrowed view of memory and devices for one step of the core.
pub struct Bus<'a> {
    pub memory: &'a mut BankedMemory,
    pub io: &'a mut IoDispatcher,
}

impl Memory for Bus<'_> {
    type Timestamp = i32;

    fn read_debug(&self, addr: u16) -> u8 {
        self.memory.read_byte(addr)
    }

    fn read_mem(&self, addr: u16, _ts: Self::Timestamp) -> u8 {
        self.memory.read_byte(addr)
    }

    fn write_mem(&mut self, addr: u16, value: u8, _ts: Self::Timestamp) {
        self.memory.write_byte(addr, value);
    }
}

impl Io for Bus<'_> {
    type Timestamp = i32;
    type WrIoBreak = BusBreak;
    type RetiBreak = ();

    fn read_io(&mut self, port: u16, _ts: Self::Timestamp) -> (u8, Option<NonZeroU16>) {
        (self.io.read(self.memory, port as u8), None)
    }

    fn write_io(
        &mut self,
        port: u16,
        value: u8,
        _ts: Self::Timestamp,
    ) -> (Option<Self::WrIoBreak>, Option<NonZeroU16>) {
        (self.io.write(self.memory, port as u8, value), None)
    }
}
