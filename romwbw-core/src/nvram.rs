//! Non-volatile boot configuration.
//!
//! The record is five bytes:
//!
//! | Byte | Meaning |
//! |---|---|
//! | 0 | signature `'W'` |
//! | 1 | boot selector low byte |
//! | 2 | boot selector high byte |
//! | 3 | autoboot flags |
//! | 4 | XOR of bytes 0-3 |
//!
//! The host works with the string form of the boot selection (`"C"`,
//! `"2"`, `"0.3"`, `"H"`) and treats the raw bytes as opaque.

use std::fmt;
use std::str::FromStr;

use crate::disk::MAX_UNITS;
use crate::error::{EmuError, EmuResult};

pub const NVRAM_SIZE: usize = 5;
pub const SIGNATURE: u8 = b'W';

/// Autoboot enabled.
const AUTOBOOT: u8 = 0x20;
/// Set in the high selector byte for a disk boot.
const DISK_BOOT: u8 = 0x80;
const MAX_SLICE: u8 = 0x7F;

/// What the loader should do at power-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootOption {
    /// Show the boot menu.
    Menu,
    /// Boot the ROM application with this selector letter.
    Rom(char),
    /// Boot from a disk unit and slice.
    Disk { unit: u8, slice: u8 },
}

impl BootOption {
    fn encode(self) -> [u8; 3] {
        match self {
            BootOption::Menu => [0, 0, 0],
            BootOption::Rom(letter) => [letter as u8, 0, AUTOBOOT],
            BootOption::Disk { unit, slice } => [unit, DISK_BOOT | slice, AUTOBOOT],
        }
    }

    fn decode(low: u8, high: u8) -> Option<Self> {
        if high & DISK_BOOT != 0 {
            if usize::from(low) >= MAX_UNITS {
                return None;
            }
            return Some(BootOption::Disk {
                unit: low,
                slice: high & MAX_SLICE,
            });
        }
        match (low, high) {
            (0, 0) => Some(BootOption::Menu),
            (b'A'..=b'Z', 0) if low != b'H' => Some(BootOption::Rom(low as char)),
            _ => None,
        }
    }
}

impl FromStr for BootOption {
    type Err = EmuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || EmuError::InvalidBootOption(s.to_string());
        let text = s.trim();

        if let [letter] = text.as_bytes() {
            if letter.is_ascii_alphabetic() {
                let letter = letter.to_ascii_uppercase();
                return Ok(if letter == b'H' {
                    BootOption::Menu
                } else {
                    BootOption::Rom(letter as char)
                });
            }
        }

        let (unit, slice) = match text.split_once('.') {
            Some((unit, slice)) => (unit, slice),
            None => (text, "0"),
        };
        let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if !digits(unit) || !digits(slice) {
            return Err(bad());
        }
        let unit: u8 = unit.parse().map_err(|_| bad())?;
        let slice: u8 = slice.parse().map_err(|_| bad())?;
        if usize::from(unit) >= MAX_UNITS || slice > MAX_SLICE {
            return Err(bad());
        }
        Ok(BootOption::Disk { unit, slice })
    }
}

impl fmt::Display for BootOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootOption::Menu => f.write_str("H"),
            BootOption::Rom(letter) => write!(f, "{}", letter),
            BootOption::Disk { unit, slice: 0 } => write!(f, "{}", unit),
            BootOption::Disk { unit, slice } => write!(f, "{}.{}", unit, slice),
        }
    }
}

/// The NVRAM device: record, dirty flag and port address latch.
#[derive(Debug, Clone, Default)]
pub struct Nvram {
    bytes: [u8; NVRAM_SIZE],
    dirty: bool,
    addr: u8,
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

impl Nvram {
    /// An uninitialised record.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the signature byte is present. The checksum is not checked.
    pub fn is_initialized(&self) -> bool {
        self.bytes[0] == SIGNATURE
    }

    /// True when both signature and checksum are correct.
    pub fn is_valid(&self) -> bool {
        self.is_initialized() && checksum(&self.bytes[..4]) == self.bytes[4]
    }

    /// The decoded boot option, if the record is valid.
    pub fn boot_option(&self) -> Option<BootOption> {
        if !self.is_valid() {
            return None;
        }
        BootOption::decode(self.bytes[1], self.bytes[2])
    }

    /// Boot option string, or empty when uninitialised or corrupt.
    pub fn setting(&self) -> String {
        self.boot_option()
            .map(|opt| opt.to_string())
            .unwrap_or_default()
    }

    /// Parse and store a boot option. Malformed input leaves the record alone.
    pub fn set_setting(&mut self, setting: &str) -> EmuResult<()> {
        let option: BootOption = setting.parse()?;
        self.set_boot_option(option);
        Ok(())
    }

    pub fn set_boot_option(&mut self, option: BootOption) {
        let [low, high, flags] = option.encode();
        self.bytes[..4].copy_from_slice(&[SIGNATURE, low, high, flags]);
        self.seal();
        log::debug!("nvram boot option set to {}", option);
    }

    /// Return the record to the uninitialised state.
    pub fn clear(&mut self) {
        self.bytes = [0; NVRAM_SIZE];
        self.dirty = true;
    }

    /// Report and clear the dirty flag.
    pub fn has_change(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn to_bytes(&self) -> [u8; NVRAM_SIZE] {
        self.bytes
    }

    /// Restore a persisted record verbatim. Does not mark it dirty.
    pub fn load_bytes(&mut self, bytes: &[u8]) -> EmuResult<()> {
        let record: [u8; NVRAM_SIZE] = bytes
            .try_into()
            .map_err(|_| EmuError::InvalidBootOption(format!("{} byte record", bytes.len())))?;
        self.bytes = record;
        Ok(())
    }

    fn seal(&mut self) {
        self.bytes[4] = checksum(&self.bytes[..4]);
        self.dirty = true;
    }

    /// Guest read: register 0 is the address latch, 1 the addressed byte.
    pub fn read_reg(&self, reg: u8) -> u8 {
        match reg {
            0 => self.addr,
            _ => self.bytes.get(usize::from(self.addr)).copied().unwrap_or(0xFF),
        }
    }

    /// Guest write. Data writes to bytes 0-3 reseal the record; the
    /// checksum byte itself is read-only.
    pub fn write_reg(&mut self, reg: u8, value: u8) {
        match reg {
            0 => self.addr = value,
            _ => {
                let addr = usize::from(self.addr);
                if addr < 4 {
                    self.bytes[addr] = value;
                    self.seal();
                }
            }
        }
    }
}
