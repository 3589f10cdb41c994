//! Banked memory: ROM and RAM pages behind a 64 KiB logical address space.
//!
//! The lower 32 KiB (0x0000-0x7FFF) is a window onto one physical bank picked
//! by the bank select port. The upper 32 KiB is always the common bank, the
//! last page of RAM. Bank ids follow RomWBW: 0x00-0x7F are ROM pages,
//! 0x80-0xFF are RAM pages.

use crate::error::{EmuError, EmuResult};

/// Size of one bank and of the switched window.
pub const BANK_SIZE: usize = 0x8000;

/// Bit set in a bank id that selects RAM instead of ROM.
pub const BID_RAM: u8 = 0x80;

/// Bank selected after reset: first ROM page.
pub const BID_BOOT: u8 = 0x00;

/// Value read from memory that nothing backs.
const OPEN_BUS: u8 = 0xFF;

/// Check a ROM image length without loading it.
pub fn check_rom_size(len: usize, max_size: usize) -> EmuResult<()> {
    if len == 0 || len % BANK_SIZE != 0 || len > max_size {
        return Err(EmuError::InvalidRomSize { len, max: max_size });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Window {
    Rom(usize),
    Ram(usize),
    Empty,
}

/// ROM and RAM pages plus the current bank selection.
pub struct BankedMemory {
    rom: Vec<u8>,
    ram: Vec<u8>,
    bank: u8,
}

impl BankedMemory {
    /// Create memory with `ram_size` bytes of RAM (a multiple of `BANK_SIZE`) and no ROM.
    pub fn new(ram_size: usize) -> Self {
        let banks = (ram_size / BANK_SIZE).max(2);
        Self {
            rom: Vec::new(),
            ram: vec![0; banks * BANK_SIZE],
            bank: BID_BOOT,
        }
    }

    /// Replace the ROM image.
    ///
    /// The image must be a non-empty multiple of `BANK_SIZE` no larger than
    /// `max_size`; otherwise the current ROM is left untouched.
    pub fn load_rom(&mut self, image: &[u8], max_size: usize) -> EmuResult<()> {
        check_rom_size(image.len(), max_size)?;
        self.rom = image.to_vec();
        Ok(())
    }

    pub fn has_rom(&self) -> bool {
        !self.rom.is_empty()
    }

    pub fn rom_banks(&self) -> usize {
        self.rom.len() / BANK_SIZE
    }

    pub fn ram_banks(&self) -> usize {
        self.ram.len() / BANK_SIZE
    }

    /// Bank id of the common (upper) page.
    pub fn common_bank(&self) -> u8 {
        BID_RAM | (self.ram_banks() - 1) as u8
    }

    /// Currently selected bank id.
    pub fn current_bank(&self) -> u8 {
        self.bank
    }

    /// Select the bank mapped into the lower window.
    ///
    /// Takes effect on the next memory access.
    pub fn select_bank(&mut self, id: u8) {
        self.bank = id;
    }

    fn window(&self) -> Window {
        if self.bank & BID_RAM != 0 {
            let page = usize::from(self.bank & !BID_RAM) % self.ram_banks();
            Window::Ram(page * BANK_SIZE)
        } else if self.rom.is_empty() {
            Window::Empty
        } else {
            let page = usize::from(self.bank) % self.rom_banks();
            Window::Rom(page * BANK_SIZE)
        }
    }

    fn common_base(&self) -> usize {
        self.ram.len() - BANK_SIZE
    }

    /// Read a byte through the current mapping.
    pub fn read_byte(&self, addr: u16) -> u8 {
        let offset = usize::from(addr);
        if offset >= BANK_SIZE {
            return self.ram[self.common_base() + offset - BANK_SIZE];
        }
        match self.window() {
            Window::Rom(base) => self.rom[base + offset],
            Window::Ram(base) => self.ram[base + offset],
            Window::Empty => OPEN_BUS,
        }
    }

    /// Write a byte through the current mapping. Writes to ROM are dropped.
    pub fn write_byte(&mut self, addr: u16, value: u8) {
        let offset = usize::from(addr);
        if offset >= BANK_SIZE {
            let base = self.common_base();
            self.ram[base + offset - BANK_SIZE] = value;
            return;
        }
        if let Window::Ram(base) = self.window() {
            self.ram[base + offset] = value;
        }
    }

    /// Copy `data` into memory starting at `addr`, wrapping at 0xFFFF.
    pub fn load_at(&mut self, addr: u16, data: &[u8]) {
        let mut at = addr;
        for &b in data {
            self.write_byte(at, b);
            at = at.wrapping_add(1);
        }
    }

    /// Read `len` bytes starting at `addr`, wrapping at 0xFFFF.
    pub fn read_block(&self, addr: u16, len: usize) -> Vec<u8> {
        let mut at = addr;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.read_byte(at));
            at = at.wrapping_add(1);
        }
        out
    }

    /// Select the boot bank. With `clear_ram`, also zero every RAM page.
    pub fn reset(&mut self, clear_ram: bool) {
        self.bank = BID_BOOT;
        if clear_ram {
            self.ram.fill(0);
        }
    }
}
