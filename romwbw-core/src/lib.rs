//! RomWBW HBIOS Emulator Core
//!
//! This crate emulates a Z80 machine of the kind RomWBW firmware runs on:
//! - Z80 CPU (via `z80emu`) with banked ROM/RAM
//! - 16550-style console UART
//! - Virtual disk controller with slice-based drive letters
//! - NVRAM boot configuration
//! - Host file transfer bridge
//! - HBIOS call trap
//!
//! # Architecture
//!
//! - `Engine`: owns the CPU, memory and devices; the host drives it one
//!   bounded batch at a time
//! - `IoDispatcher`: static port table routing IN/OUT to devices
//! - `SharedEngine`: `Arc<Mutex<Engine>>` handle for a batch thread plus
//!   control threads
//! - `LoadedBundle`: ROM, disks and settings packed in one ZIP

pub mod bundle;
pub mod bus;
pub mod config;
pub mod console;
pub mod cpu;
pub mod disk;
pub mod engine;
pub mod error;
pub mod hbios;
pub mod hostfile;
pub mod memory;
pub mod nvram;
pub mod ports;
pub mod shared;

pub use bundle::{load_bundle, load_bundle_from_path, BundleManifest, DiskEntry, LoadedBundle};
pub use config::{CpuFlavour, EngineConfig, PortLayout};
pub use console::OutputSink;
pub use cpu::Registers;
pub use disk::{DriveAssignment, MAX_UNITS};
pub use engine::{BatchOutcome, BatchReport, Engine, EngineStats, LifecycleState};
pub use error::{EmuError, EmuResult};
pub use hostfile::HostFileState;
pub use nvram::BootOption;
pub use shared::SharedEngine;
