//! Engine configuration.
//!
//! Every field has a default, so a JSON config only needs to name what it
//! changes:
//!
//! ```
//! use romwbw_core::EngineConfig;
//! let cfg = EngineConfig::from_json(r#"{ "batchInstructions": 20000 }"#).unwrap();
//! assert_eq!(cfg.batch_instructions, 20000);
//! assert_eq!(cfg.sector_size, 512);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::disk::MAX_SLICES;
use crate::error::{EmuError, EmuResult};
use crate::memory::BANK_SIZE;
use crate::ports::PortMap;

/// Instructions executed by one `run_batch` call unless configured otherwise.
pub const DEFAULT_BATCH_INSTRUCTIONS: u32 = 50_000;

/// Which Z80 variant the core emulates. Only undocumented behaviour differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuFlavour {
    /// Zilog NMOS Z80.
    #[default]
    Nmos,
    /// Zilog CMOS Z80.
    Cmos,
    /// BM1 clone.
    Bm1,
}

/// Base port of each device on the Z80 I/O space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PortLayout {
    pub uart_base: u8,
    pub bank_select: u8,
    pub disk_base: u8,
    pub nvram_base: u8,
    pub host_file_base: u8,
    pub hbios_trap: u8,
}

impl Default for PortLayout {
    fn default() -> Self {
        Self {
            uart_base: 0x68,
            bank_select: 0x78,
            disk_base: 0x90,
            nvram_base: 0xA0,
            host_file_base: 0xB0,
            hbios_trap: 0xEF,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Instruction budget of a single batch.
    pub batch_instructions: u32,
    pub cpu_flavour: CpuFlavour,
    /// Largest accepted ROM image in bytes.
    pub max_rom_size: usize,
    pub ram_size: usize,
    pub sector_size: usize,
    /// Sectors in one slice (8 MiB with 512 byte sectors).
    pub sectors_per_slice: u32,
    /// Recompute slice counts whenever the set of loaded disks changes.
    pub auto_slices: bool,
    /// Translate LF to CR on console input.
    pub lf_to_cr: bool,
    /// Clear bit 7 of console output.
    pub strip_high_bit: bool,
    pub ports: PortLayout,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_instructions: DEFAULT_BATCH_INSTRUCTIONS,
            cpu_flavour: CpuFlavour::Nmos,
            max_rom_size: 512 * 1024,
            ram_size: 512 * 1024,
            sector_size: 512,
            sectors_per_slice: 16_384,
            auto_slices: true,
            lf_to_cr: true,
            strip_high_bit: true,
            ports: PortLayout::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON config.
    pub fn from_json(text: &str) -> EmuResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_path(path: &Path) -> EmuResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Check the values the engine depends on.
    pub fn validate(&self) -> EmuResult<()> {
        if self.batch_instructions == 0 {
            return Err(EmuError::InvalidConfig("batchInstructions must be > 0".into()));
        }
        if !self.sector_size.is_power_of_two() || !(128..=4096).contains(&self.sector_size) {
            return Err(EmuError::InvalidConfig(format!(
                "sectorSize {} must be a power of two between 128 and 4096",
                self.sector_size
            )));
        }
        if self.ram_size % BANK_SIZE != 0 || self.ram_size < 2 * BANK_SIZE {
            return Err(EmuError::InvalidConfig(format!(
                "ramSize {} must be a multiple of 32 KiB and at least 64 KiB",
                self.ram_size
            )));
        }
        // Bank ids are 7 bits wide on each side.
        if self.ram_size > 128 * BANK_SIZE || self.max_rom_size > 128 * BANK_SIZE {
            return Err(EmuError::InvalidConfig("at most 128 banks of ROM or RAM".into()));
        }
        if self.max_rom_size == 0 || self.max_rom_size % BANK_SIZE != 0 {
            return Err(EmuError::InvalidConfig(format!(
                "maxRomSize {} must be a non-zero multiple of 32 KiB",
                self.max_rom_size
            )));
        }
        if self.sectors_per_slice == 0 {
            return Err(EmuError::InvalidConfig("sectorsPerSlice must be > 0".into()));
        }
        // Every slice of a fully sliced unit must have a 32-bit LBA.
        if u64::from(self.sectors_per_slice) * u64::from(MAX_SLICES) > u64::from(u32::MAX) {
            return Err(EmuError::InvalidConfig(format!(
                "sectorsPerSlice {} is too large for {} slices",
                self.sectors_per_slice, MAX_SLICES
            )));
        }
        PortMap::from_layout(&self.ports).map(|_| ())
    }
}
