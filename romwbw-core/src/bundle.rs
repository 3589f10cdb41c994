//! Machine bundles: a ROM, its disk images and a `bundle.json` manifest in one ZIP.
//!
//! ```json
//! {
//!   "name": "RomWBW CP/M",
//!   "rom": "emu_avw.rom",
//!   "disks": [
//!     { "filename": "hd1k_cpm22.img", "name": "CP/M 2.2", "defaultSlot": 0 }
//!   ],
//!   "boot": "0"
//! }
//! ```
//!
//! Files are matched by base name, ignoring case and any directory prefix.

use std::collections::HashMap;
use std::io::{Read, Seek};
use std::path::Path;

use serde::{Deserialize, Serialize};
use zip::ZipArchive;

use crate::config::EngineConfig;
use crate::disk::{DiskUnit, MAX_UNITS};
use crate::engine::Engine;
use crate::error::{EmuError, EmuResult};
use crate::memory::check_rom_size;
use crate::nvram::BootOption;

/// Name of the manifest inside a bundle.
pub const MANIFEST_NAME: &str = "bundle.json";

fn default_true() -> bool {
    true
}

/// A disk image listed in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskEntry {
    pub filename: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    /// Preferred unit. Entries without one fill the lowest free units.
    #[serde(default)]
    pub default_slot: Option<usize>,
    /// Catalog image (true) or user data (false).
    #[serde(default = "default_true")]
    pub manifest: bool,
}

/// Bundle manifest schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleManifest {
    pub name: String,
    pub rom: String,
    #[serde(default)]
    pub disks: Vec<DiskEntry>,
    /// Boot option applied to NVRAM on install.
    #[serde(default)]
    pub boot: Option<String>,
    #[serde(default)]
    pub config: Option<EngineConfig>,
}

/// A disk image with the unit it was assigned.
#[derive(Debug, Clone)]
pub struct BundleDisk {
    pub unit: usize,
    pub entry: DiskEntry,
    pub data: Vec<u8>,
}

/// A bundle read into memory.
#[derive(Debug, Clone)]
pub struct LoadedBundle {
    pub manifest: BundleManifest,
    pub rom: Vec<u8>,
    pub disks: Vec<BundleDisk>,
}

fn base_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_lowercase()
}

/// Read a bundle from ZIP data.
pub fn load_bundle<R: Read + Seek>(reader: R) -> EmuResult<LoadedBundle> {
    let mut archive = ZipArchive::new(reader)?;
    let mut files: HashMap<String, Vec<u8>> = HashMap::new();

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let mut content = Vec::new();
        file.read_to_end(&mut content)?;
        files.insert(base_name(file.name()), content);
    }

    let manifest_bytes = files
        .remove(MANIFEST_NAME)
        .ok_or_else(|| EmuError::Bundle(format!("no {} in bundle", MANIFEST_NAME)))?;
    let manifest: BundleManifest = serde_json::from_slice(&manifest_bytes)?;

    let rom = files
        .remove(&base_name(&manifest.rom))
        .ok_or_else(|| EmuError::Bundle(format!("ROM {:?} not in bundle", manifest.rom)))?;

    let units = assign_units(&manifest.disks)?;
    let mut disks = Vec::with_capacity(manifest.disks.len());
    for (entry, unit) in manifest.disks.iter().zip(units) {
        let data = files
            .get(&base_name(&entry.filename))
            .cloned()
            .ok_or_else(|| EmuError::Bundle(format!("disk {:?} not in bundle", entry.filename)))?;
        disks.push(BundleDisk {
            unit,
            entry: entry.clone(),
            data,
        });
    }

    log::info!(
        "bundle {:?}: ROM {} bytes, {} disks",
        manifest.name,
        rom.len(),
        disks.len()
    );
    Ok(LoadedBundle {
        manifest,
        rom,
        disks,
    })
}

/// Read a bundle from a file path.
pub fn load_bundle_from_path(path: &Path) -> EmuResult<LoadedBundle> {
    let file = std::fs::File::open(path)?;
    load_bundle(std::io::BufReader::new(file))
}

/// Pick a unit for every entry: explicit slots first, then the lowest
/// free units in listed order.
fn assign_units(entries: &[DiskEntry]) -> EmuResult<Vec<usize>> {
    let mut taken = [false; MAX_UNITS];
    let mut units = vec![None; entries.len()];

    for (i, entry) in entries.iter().enumerate() {
        if let Some(slot) = entry.default_slot {
            if slot >= MAX_UNITS {
                return Err(EmuError::InvalidUnit(slot));
            }
            if taken[slot] {
                return Err(EmuError::Bundle(format!("unit {} assigned twice", slot)));
            }
            taken[slot] = true;
            units[i] = Some(slot);
        }
    }

    let mut assigned = Vec::with_capacity(entries.len());
    for unit in units {
        let unit = match unit {
            Some(unit) => unit,
            None => {
                let free = taken
                    .iter()
                    .position(|t| !t)
                    .ok_or_else(|| EmuError::Bundle(format!("more than {} disks", MAX_UNITS)))?;
                taken[free] = true;
                free
            }
        };
        assigned.push(unit);
    }
    Ok(assigned)
}

impl LoadedBundle {
    fn check(&self, config: &EngineConfig) -> EmuResult<()> {
        check_rom_size(self.rom.len(), config.max_rom_size)?;
        for disk in &self.disks {
            DiskUnit::check_size(disk.data.len(), config.sector_size).map_err(|err| {
                EmuError::Bundle(format!("disk {:?}: {}", disk.entry.filename, err))
            })?;
        }
        if let Some(boot) = &self.manifest.boot {
            boot.parse::<BootOption>()?;
        }
        Ok(())
    }

    /// Engine config embedded in the manifest, or the default.
    pub fn config(&self) -> EngineConfig {
        self.manifest.config.clone().unwrap_or_default()
    }

    /// Load ROM and disks into `engine`, flag catalog disks, complete
    /// init and apply the boot option.
    ///
    /// Every image and the boot option are checked first; a bundle that
    /// fails leaves the engine untouched.
    pub fn install(self, engine: &mut Engine) -> EmuResult<BundleManifest> {
        self.check(engine.config())?;
        engine.load_rom(&self.rom)?;
        for disk in self.disks {
            engine.load_disk(disk.unit, disk.data)?;
            engine.set_disk_is_manifest(disk.unit, disk.entry.manifest)?;
        }
        engine.complete_init()?;
        if let Some(boot) = &self.manifest.boot {
            engine.set_nvram_setting(boot)?;
        }
        Ok(self.manifest)
    }
}
