//! Virtual disk controller.
//!
//! Sixteen unit slots, each optionally holding a disk image. The guest
//! reaches the controller two ways: the port registers below, and the
//! HBIOS disk calls, which share the same units and dirty tracking.
//!
//! Port registers (offset from the disk base):
//!
//! | Offset | Read | Write |
//! |---|---|---|
//! | 0 | selected unit | select unit |
//! | 1-4 | LBA, little endian | LBA, little endian |
//! | 5-6 | DMA address | DMA address |
//! | 7 | status of last command | command |
//! | 8 | slice count of selected unit | - |
//! | 9 | 1 if media present | - |

mod slices;
mod unit;

pub use slices::{assign_drives, slice_capacity, slices_for, DriveAssignment, MAX_DRIVES};
pub use unit::{DiskUnit, MAX_SLICES};

use crate::error::{EmuError, EmuResult};
use crate::memory::BankedMemory;

/// Number of unit slots.
pub const MAX_UNITS: usize = 16;

/// Commands written to register 7.
pub mod cmd {
    pub const READ: u8 = 0x01;
    pub const WRITE: u8 = 0x02;
    pub const CAPACITY: u8 = 0x03;
}

/// Values read back from register 7.
pub mod status {
    pub const OK: u8 = 0;
    pub const NO_MEDIA: u8 = 1;
    pub const OUT_OF_RANGE: u8 = 2;
    pub const BAD_UNIT: u8 = 3;
    pub const BAD_COMMAND: u8 = 4;
}

fn status_of(err: &EmuError) -> u8 {
    match err {
        EmuError::InvalidUnit(_) => status::BAD_UNIT,
        EmuError::NoMedia(_) => status::NO_MEDIA,
        EmuError::SectorOutOfRange { .. } => status::OUT_OF_RANGE,
        _ => status::BAD_COMMAND,
    }
}

/// Owns every loaded disk image.
#[derive(Debug)]
pub struct DiskController {
    units: [Option<DiskUnit>; MAX_UNITS],
    warning_suppressed: [bool; MAX_UNITS],
    pending_warning: Option<usize>,
    sector_size: usize,
    sectors_per_slice: u32,
    auto_slices: bool,
    // Port register file.
    sel_unit: u8,
    lba: u32,
    dma: u16,
    status: u8,
}

impl DiskController {
    pub fn new(sector_size: usize, sectors_per_slice: u32, auto_slices: bool) -> Self {
        Self {
            units: std::array::from_fn(|_| None),
            warning_suppressed: [false; MAX_UNITS],
            pending_warning: None,
            sector_size,
            sectors_per_slice,
            auto_slices,
            sel_unit: 0,
            lba: 0,
            dma: 0,
            status: status::OK,
        }
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn check_unit(unit: usize) -> EmuResult<()> {
        if unit >= MAX_UNITS {
            return Err(EmuError::InvalidUnit(unit));
        }
        Ok(())
    }

    /// Borrow a loaded unit.
    pub fn unit(&self, unit: usize) -> EmuResult<&DiskUnit> {
        Self::check_unit(unit)?;
        self.units[unit].as_ref().ok_or(EmuError::NoMedia(unit))
    }

    pub fn unit_mut(&mut self, unit: usize) -> EmuResult<&mut DiskUnit> {
        Self::check_unit(unit)?;
        self.units[unit].as_mut().ok_or(EmuError::NoMedia(unit))
    }

    /// Load `data` into `unit`, replacing any previous image.
    ///
    /// On error the slot keeps what it had.
    pub fn load(&mut self, unit: usize, data: Vec<u8>) -> EmuResult<()> {
        Self::check_unit(unit)?;
        let disk = DiskUnit::new(data, self.sector_size)?;
        log::info!(
            "disk unit {} loaded: {} sectors of {} bytes",
            unit,
            disk.total_sectors(),
            self.sector_size
        );
        self.units[unit] = Some(disk);
        self.rebalance();
        Ok(())
    }

    /// Remove the image in `unit`, returning it.
    pub fn unload(&mut self, unit: usize) -> EmuResult<Option<Vec<u8>>> {
        Self::check_unit(unit)?;
        let old = self.units[unit].take().map(DiskUnit::into_data);
        if old.is_some() {
            log::info!("disk unit {} unloaded", unit);
            self.rebalance();
        }
        Ok(old)
    }

    pub fn is_loaded(&self, unit: usize) -> bool {
        self.units.get(unit).is_some_and(Option::is_some)
    }

    pub fn loaded_count(&self) -> usize {
        self.units.iter().filter(|u| u.is_some()).count()
    }

    /// Indices of loaded units in ascending order.
    pub fn loaded_units(&self) -> impl Iterator<Item = usize> + '_ {
        self.units
            .iter()
            .enumerate()
            .filter_map(|(i, u)| u.as_ref().map(|_| i))
    }

    /// Reapply the slice policy to every loaded unit, if enabled.
    pub fn rebalance(&mut self) {
        if !self.auto_slices {
            return;
        }
        let slices = slices_for(self.loaded_count());
        for disk in self.units.iter_mut().flatten() {
            disk.set_slice_count(slices).ok();
        }
        log::debug!("slice policy: {} slices per loaded unit", slices);
    }

    pub fn set_slice_count(&mut self, unit: usize, slices: u8) -> EmuResult<()> {
        self.unit_mut(unit)?.set_slice_count(slices)
    }

    pub fn slice_count(&self, unit: usize) -> Option<u8> {
        self.unit(unit).ok().map(DiskUnit::slice_count)
    }

    pub fn read_sector(&self, unit: usize, lba: u32) -> EmuResult<&[u8]> {
        self.unit(unit)?.read_sector(unit, lba)
    }

    /// Write one sector. Raises the manifest warning when the unit is a
    /// catalog image and its warning is not suppressed.
    pub fn write_sector(&mut self, unit: usize, lba: u32, bytes: &[u8]) -> EmuResult<()> {
        let disk = self.unit_mut(unit)?;
        disk.write_sector(unit, lba, bytes)?;
        if disk.is_manifest() && !self.warning_suppressed[unit] {
            self.pending_warning = Some(unit);
        }
        Ok(())
    }

    pub fn is_dirty(&self, unit: usize) -> bool {
        self.unit(unit).is_ok_and(DiskUnit::is_dirty)
    }

    pub fn clear_dirty(&mut self, unit: usize) {
        if let Ok(disk) = self.unit_mut(unit) {
            disk.clear_dirty();
        }
    }

    /// The full image of `unit`, if loaded.
    pub fn data(&self, unit: usize) -> Option<&[u8]> {
        self.unit(unit).ok().map(DiskUnit::data)
    }

    pub fn set_manifest(&mut self, unit: usize, manifest: bool) -> EmuResult<()> {
        self.unit_mut(unit)?.set_manifest(manifest);
        Ok(())
    }

    /// Suppress (or re-enable) the manifest warning for one unit.
    /// Survives image reloads.
    pub fn set_warning_suppressed(&mut self, unit: usize, suppressed: bool) -> EmuResult<()> {
        Self::check_unit(unit)?;
        self.warning_suppressed[unit] = suppressed;
        Ok(())
    }

    pub fn set_all_warnings_suppressed(&mut self, suppressed: bool) {
        self.warning_suppressed = [suppressed; MAX_UNITS];
    }

    pub fn is_warning_suppressed(&self, unit: usize) -> bool {
        self.warning_suppressed.get(unit).copied().unwrap_or(false)
    }

    /// Unit of the latest write to a warned manifest disk, cleared on read.
    pub fn take_manifest_warning(&mut self) -> Option<usize> {
        self.pending_warning.take()
    }

    /// Current drive letter layout.
    pub fn drive_map(&self) -> Vec<DriveAssignment> {
        let units = self.units.iter().enumerate().filter_map(|(i, u)| {
            u.as_ref()
                .map(|d| (i, d.slice_count(), d.total_sectors()))
        });
        assign_drives(units, self.sectors_per_slice)
    }

    /// Absolute sector for `lba` within `slice` of `unit`.
    pub fn slice_lba(&self, unit: usize, slice: u8, lba: u32) -> EmuResult<u32> {
        let disk = self.unit(unit)?;
        if slice >= disk.slice_count() || lba >= self.sectors_per_slice {
            return Err(EmuError::SectorOutOfRange { unit, lba });
        }
        match u32::from(slice)
            .checked_mul(self.sectors_per_slice)
            .and_then(|base| base.checked_add(lba))
        {
            Some(absolute) if absolute < disk.total_sectors() => Ok(absolute),
            Some(absolute) => Err(EmuError::SectorOutOfRange {
                unit,
                lba: absolute,
            }),
            None => Err(EmuError::SectorOutOfRange { unit, lba }),
        }
    }

    /// Copy sector `lba` of `unit` into memory at `addr`.
    pub fn read_into(
        &self,
        unit: usize,
        lba: u32,
        memory: &mut BankedMemory,
        addr: u16,
    ) -> EmuResult<()> {
        let sector = self.read_sector(unit, lba)?;
        memory.load_at(addr, sector);
        Ok(())
    }

    /// Copy one sector from memory at `addr` to sector `lba` of `unit`.
    pub fn write_from(
        &mut self,
        unit: usize,
        lba: u32,
        memory: &BankedMemory,
        addr: u16,
    ) -> EmuResult<()> {
        let sector = memory.read_block(addr, self.sector_size);
        self.write_sector(unit, lba, &sector)
    }

    /// Clear the port register file. Images and flags stay.
    pub fn reset_registers(&mut self) {
        self.sel_unit = 0;
        self.lba = 0;
        self.dma = 0;
        self.status = status::OK;
        for disk in self.units.iter_mut().flatten() {
            disk.seek = 0;
        }
    }

    /// Guest read of register `reg`.
    pub fn read_reg(&self, reg: u8) -> u8 {
        let unit = usize::from(self.sel_unit);
        match reg {
            0 => self.sel_unit,
            1..=4 => self.lba.to_le_bytes()[usize::from(reg - 1)],
            5 => self.dma as u8,
            6 => (self.dma >> 8) as u8,
            7 => self.status,
            8 => self.slice_count(unit).unwrap_or(0),
            9 => u8::from(self.is_loaded(unit)),
            _ => 0xFF,
        }
    }

    /// Guest write of register `reg`. Commands run immediately.
    pub fn write_reg(&mut self, reg: u8, value: u8, memory: &mut BankedMemory) {
        match reg {
            0 => self.sel_unit = value,
            1..=4 => {
                let mut bytes = self.lba.to_le_bytes();
                bytes[usize::from(reg - 1)] = value;
                self.lba = u32::from_le_bytes(bytes);
            }
            5 => self.dma = (self.dma & 0xFF00) | u16::from(value),
            6 => self.dma = (self.dma & 0x00FF) | (u16::from(value) << 8),
            7 => self.status = self.command(value, memory),
            _ => {}
        }
    }

    fn command(&mut self, command: u8, memory: &mut BankedMemory) -> u8 {
        let unit = usize::from(self.sel_unit);
        let result = match command {
            cmd::READ => self.read_into(unit, self.lba, memory, self.dma),
            cmd::WRITE => self.write_from(unit, self.lba, memory, self.dma),
            cmd::CAPACITY => self
                .unit(unit)
                .map(DiskUnit::total_sectors)
                .map(|sectors| self.lba = sectors),
            _ => {
                log::debug!("disk: unknown command {:#04X}", command);
                return status::BAD_COMMAND;
            }
        };
        match result {
            Ok(()) => {
                if command != cmd::CAPACITY {
                    self.lba = self.lba.wrapping_add(1);
                    self.dma = self.dma.wrapping_add(self.sector_size as u16);
                }
                status::OK
            }
            Err(err) => {
                log::debug!("disk command {:#04X} failed: {}", command, err);
                status_of(&err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::BID_RAM;

    fn controller() -> DiskController {
        DiskController::new(512, 16_384, true)
    }

    fn image(sectors: usize, fill: u8) -> Vec<u8> {
        vec![fill; sectors * 512]
    }

    #[test]
    fn test_load_rejects_bad_size_and_keeps_old_image() {
        let mut dc = controller();
        dc.load(2, image(4, 0x11)).unwrap();
        assert!(dc.load(2, vec![0; 700]).is_err());
        assert_eq!(dc.read_sector(2, 0).unwrap()[0], 0x11);
        assert!(matches!(dc.load(16, image(1, 0)), Err(EmuError::InvalidUnit(16))));
    }

    #[test]
    fn test_slice_policy_rebalances() {
        let mut dc = controller();
        dc.load(0, image(4, 0)).unwrap();
        assert_eq!(dc.slice_count(0), Some(8));
        dc.load(1, image(4, 0)).unwrap();
        assert_eq!(dc.slice_count(0), Some(4));
        assert_eq!(dc.slice_count(1), Some(4));
        dc.load(5, image(4, 0)).unwrap();
        assert_eq!(dc.slice_count(0), Some(2));
        assert_eq!(dc.slice_count(5), Some(2));

        dc.unload(5).unwrap();
        assert_eq!(dc.slice_count(0), Some(4));
        assert_eq!(dc.slice_count(5), None);
    }

    #[test]
    fn test_manual_slices_when_auto_off() {
        let mut dc = DiskController::new(512, 16_384, false);
        dc.load(0, image(1, 0)).unwrap();
        assert_eq!(dc.slice_count(0), Some(1));
        dc.set_slice_count(0, 3).unwrap();
        dc.load(1, image(1, 0)).unwrap();
        assert_eq!(dc.slice_count(0), Some(3));
    }

    #[test]
    fn test_manifest_warning_is_one_shot() {
        let mut dc = controller();
        dc.load(3, image(2, 0)).unwrap();
        dc.write_sector(3, 0, &[1; 512]).unwrap();
        assert_eq!(dc.take_manifest_warning(), None);

        dc.set_manifest(3, true).unwrap();
        dc.write_sector(3, 1, &[2; 512]).unwrap();
        assert_eq!(dc.take_manifest_warning(), Some(3));
        assert_eq!(dc.take_manifest_warning(), None);

        dc.set_all_warnings_suppressed(true);
        dc.write_sector(3, 1, &[3; 512]).unwrap();
        assert_eq!(dc.take_manifest_warning(), None);
        assert!(dc.is_dirty(3));
    }

    #[test]
    fn test_warning_suppression_per_unit_and_all() {
        let mut dc = controller();
        assert!(matches!(
            dc.set_warning_suppressed(MAX_UNITS, true),
            Err(EmuError::InvalidUnit(16))
        ));
        dc.set_warning_suppressed(4, true).unwrap();
        assert!(dc.is_warning_suppressed(4));
        assert!(!dc.is_warning_suppressed(5));

        dc.set_all_warnings_suppressed(true);
        assert!((0..MAX_UNITS).all(|u| dc.is_warning_suppressed(u)));
        dc.set_all_warnings_suppressed(false);
        assert!(!dc.is_warning_suppressed(4));
    }

    #[test]
    fn test_slice_lba() {
        let mut dc = DiskController::new(512, 100, false);
        dc.load(0, image(250, 0)).unwrap();
        dc.set_slice_count(0, 3).unwrap();
        assert_eq!(dc.slice_lba(0, 0, 5).unwrap(), 5);
        assert_eq!(dc.slice_lba(0, 2, 49).unwrap(), 249);
        assert!(dc.slice_lba(0, 2, 50).is_err());
        assert!(dc.slice_lba(0, 3, 0).is_err());
        assert!(dc.slice_lba(0, 0, 100).is_err());
    }

    #[test]
    fn test_slice_lba_past_u32_is_an_error() {
        let mut dc = DiskController::new(512, 40_000_000, false);
        dc.load(0, image(4, 0)).unwrap();
        dc.set_slice_count(0, 120).unwrap();
        assert!(matches!(
            dc.slice_lba(0, 110, 7),
            Err(EmuError::SectorOutOfRange { unit: 0, lba: 7 })
        ));
        assert!(dc.slice_lba(0, 1, 0).is_err());
        assert_eq!(dc.slice_lba(0, 0, 3).unwrap(), 3);
    }

    #[test]
    fn test_port_read_command() {
        let mut dc = controller();
        let mut mem = BankedMemory::new(64 * 1024);
        let mut img = image(3, 0);
        img[512] = 0xDE;
        img[1023] = 0xAD;
        dc.load(1, img).unwrap();

        dc.write_reg(0, 1, &mut mem);
        dc.write_reg(1, 1, &mut mem);
        dc.write_reg(5, 0x00, &mut mem);
        dc.write_reg(6, 0x90, &mut mem);
        dc.write_reg(7, cmd::READ, &mut mem);

        assert_eq!(dc.read_reg(7), status::OK);
        assert_eq!(mem.read_byte(0x9000), 0xDE);
        assert_eq!(mem.read_byte(0x91FF), 0xAD);
        // LBA and DMA advance by one sector.
        assert_eq!(dc.read_reg(1), 2);
        assert_eq!(dc.read_reg(6), 0x92);
    }

    #[test]
    fn test_port_write_and_errors() {
        let mut dc = controller();
        let mut mem = BankedMemory::new(64 * 1024);
        mem.select_bank(BID_RAM);
        mem.load_at(0x1000, &[0x77; 512]);
        dc.load(0, image(1, 0)).unwrap();

        dc.write_reg(5, 0x00, &mut mem);
        dc.write_reg(6, 0x10, &mut mem);
        dc.write_reg(7, cmd::WRITE, &mut mem);
        assert_eq!(dc.read_reg(7), status::OK);
        assert_eq!(dc.read_sector(0, 0).unwrap(), &[0x77; 512][..]);
        assert!(dc.is_dirty(0));

        // LBA is now 1, past the end.
        dc.write_reg(7, cmd::READ, &mut mem);
        assert_eq!(dc.read_reg(7), status::OUT_OF_RANGE);

        dc.write_reg(0, 4, &mut mem);
        dc.write_reg(7, cmd::READ, &mut mem);
        assert_eq!(dc.read_reg(7), status::NO_MEDIA);
        assert_eq!(dc.read_reg(9), 0);

        dc.write_reg(0, 20, &mut mem);
        dc.write_reg(7, cmd::READ, &mut mem);
        assert_eq!(dc.read_reg(7), status::BAD_UNIT);

        dc.write_reg(7, 0x7E, &mut mem);
        assert_eq!(dc.read_reg(7), status::BAD_COMMAND);
    }

    #[test]
    fn test_capacity_command() {
        let mut dc = controller();
        let mut mem = BankedMemory::new(64 * 1024);
        dc.load(0, image(300, 0)).unwrap();
        dc.write_reg(7, cmd::CAPACITY, &mut mem);
        assert_eq!(dc.read_reg(7), status::OK);
        assert_eq!(dc.read_reg(1), 300u32.to_le_bytes()[0]);
        assert_eq!(dc.read_reg(2), 300u32.to_le_bytes()[1]);
        assert_eq!(dc.read_reg(8), 8);
        assert_eq!(dc.read_reg(9), 1);
    }
}
