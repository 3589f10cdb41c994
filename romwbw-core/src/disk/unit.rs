//! One loaded disk image.

use crate::error::{EmuError, EmuResult};

/// Largest slice count a unit accepts.
pub const MAX_SLICES: u8 = 128;

/// A disk image owned by one controller slot.
#[derive(Debug, Clone)]
pub struct DiskUnit {
    data: Vec<u8>,
    sector_size: usize,
    slices: u8,
    manifest: bool,
    dirty: bool,
    /// Sector the next HBIOS read or write starts at.
    pub(crate) seek: u32,
}

impl DiskUnit {
    /// Take ownership of `data` as a disk image.
    ///
    /// Fails if the image is empty or not a whole number of sectors.
    pub fn new(data: Vec<u8>, sector_size: usize) -> EmuResult<Self> {
        Self::check_size(data.len(), sector_size)?;
        Ok(Self {
            data,
            sector_size,
            slices: 1,
            manifest: false,
            dirty: false,
            seek: 0,
        })
    }

    /// Check an image length without taking the image.
    pub fn check_size(len: usize, sector_size: usize) -> EmuResult<()> {
        if len == 0 || len % sector_size != 0 {
            return Err(EmuError::InvalidDiskSize { len, sector_size });
        }
        Ok(())
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    pub fn total_sectors(&self) -> u32 {
        (self.data.len() / self.sector_size) as u32
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Give the image back, consuming the unit.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    fn range(&self, lba: u32) -> Option<std::ops::Range<usize>> {
        if lba >= self.total_sectors() {
            return None;
        }
        let start = lba as usize * self.sector_size;
        Some(start..start + self.sector_size)
    }

    /// Borrow sector `lba`. `unit` only labels the error.
    pub fn read_sector(&self, unit: usize, lba: u32) -> EmuResult<&[u8]> {
        let range = self
            .range(lba)
            .ok_or(EmuError::SectorOutOfRange { unit, lba })?;
        Ok(&self.data[range])
    }

    /// Overwrite sector `lba` and mark the unit dirty.
    pub fn write_sector(&mut self, unit: usize, lba: u32, bytes: &[u8]) -> EmuResult<()> {
        if bytes.len() != self.sector_size {
            return Err(EmuError::BadSectorLength {
                expected: self.sector_size,
                got: bytes.len(),
            });
        }
        let range = self
            .range(lba)
            .ok_or(EmuError::SectorOutOfRange { unit, lba })?;
        self.data[range].copy_from_slice(bytes);
        self.dirty = true;
        Ok(())
    }

    pub fn slice_count(&self) -> u8 {
        self.slices
    }

    pub fn set_slice_count(&mut self, slices: u8) -> EmuResult<()> {
        if slices == 0 || slices > MAX_SLICES {
            return Err(EmuError::InvalidSliceCount(slices));
        }
        self.slices = slices;
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn is_manifest(&self) -> bool {
        self.manifest
    }

    pub fn set_manifest(&mut self, manifest: bool) {
        self.manifest = manifest;
    }
}
