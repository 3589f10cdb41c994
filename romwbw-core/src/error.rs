//! Error types for the RomWBW emulator engine.

use thiserror::Error;

/// Errors that can occur while loading images or driving the engine.
#[derive(Error, Debug)]
pub enum EmuError {
    #[error("Invalid ROM image size: {len} bytes (expected a non-zero multiple of 32 KiB up to {max})")]
    InvalidRomSize { len: usize, max: usize },

    #[error("Invalid disk image size: {len} bytes (not a non-zero multiple of {sector_size})")]
    InvalidDiskSize { len: usize, sector_size: usize },

    #[error("Invalid disk unit: {0}")]
    InvalidUnit(usize),

    #[error("No media in disk unit {0}")]
    NoMedia(usize),

    #[error("Sector {lba} out of range on unit {unit}")]
    SectorOutOfRange { unit: usize, lba: u32 },

    #[error("Bad sector length: expected {expected}, got {got}")]
    BadSectorLength { expected: usize, got: usize },

    #[error("Invalid slice count: {0}")]
    InvalidSliceCount(u8),

    #[error("Invalid boot option: {0:?}")]
    InvalidBootOption(String),

    #[error("Engine not ready: {0}")]
    NotReady(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O port {0:#04X} mapped twice")]
    PortConflict(u8),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Bundle error: {0}")]
    Bundle(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for engine operations.
pub type EmuResult<T> = Result<T, EmuError>;
