//! Slice policy and drive-letter assignment.

use serde::Serialize;

/// Drive letters available to the guest.
pub const MAX_DRIVES: usize = 16;

/// Slices each loaded unit gets when `loaded` units are present.
///
/// One disk gets eight slices, two share four each, three or more get two.
pub fn slices_for(loaded: usize) -> u8 {
    match loaded {
        0 | 1 => 8,
        2 => 4,
        _ => 2,
    }
}

/// One drive letter and the unit slice behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DriveAssignment {
    pub letter: char,
    pub unit: usize,
    pub slice: u8,
}

/// Slices a unit of `sectors` can actually hold. Small images count as one.
pub fn slice_capacity(sectors: u32, sectors_per_slice: u32) -> u32 {
    (sectors / sectors_per_slice.max(1)).max(1)
}

/// Assign letters A-P in unit order. Each entry is `(unit, slice_count, sectors)`.
pub fn assign_drives<I>(units: I, sectors_per_slice: u32) -> Vec<DriveAssignment>
where
    I: IntoIterator<Item = (usize, u8, u32)>,
{
    let mut map = Vec::new();
    'units: for (unit, slice_count, sectors) in units {
        let usable = u32::from(slice_count).min(slice_capacity(sectors, sectors_per_slice));
        for slice in 0..usable {
            if map.len() == MAX_DRIVES {
                break 'units;
            }
            map.push(DriveAssignment {
                letter: (b'A' + map.len() as u8) as char,
                unit,
                slice: slice as u8,
            });
        }
    }
    map
}
