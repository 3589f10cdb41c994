//! HBIOS call layer.
//!
//! Guest firmware requests services by loading B with a function number,
//! C with a unit or subfunction, and writing any value to the HBIOS trap
//! port. The result code comes back in A: zero for success, a negative
//! error code otherwise.

mod dispatch;
mod rtc;

pub(crate) use dispatch::{dispatch, HbiosAction};
pub use rtc::RtcTime;

/// HBIOS function numbers (register B).
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
pub enum HbiosFunction {
    /// 0x00: Console input (E = character)
    CioIn = 0x00,
    /// 0x01: Console output (E = character)
    CioOut = 0x01,
    /// 0x02: Console input status (A = pending count)
    CioIst = 0x02,
    /// 0x03: Console output status
    CioOst = 0x03,
    /// 0x10: Disk status
    DioStatus = 0x10,
    /// 0x12: Disk seek (DEHL = LBA)
    DioSeek = 0x12,
    /// 0x13: Disk read (HL = buffer, E = count)
    DioRead = 0x13,
    /// 0x14: Disk write (HL = buffer, E = count)
    DioWrite = 0x14,
    /// 0x18: Disk media id
    DioMedia = 0x18,
    /// 0x1A: Disk capacity
    DioCap = 0x1A,
    /// 0x20: Read the clock into a 6-byte BCD buffer at HL
    RtcGetTim = 0x20,
    /// 0xF0: System reset (C = 1 warm, 2 cold)
    SysReset = 0xF0,
    /// 0xF1: HBIOS version
    SysVer = 0xF1,
    /// 0xF2: Select bank (C = bank id)
    SysSetBnk = 0xF2,
    /// 0xF3: Current bank
    SysGetBnk = 0xF3,
    /// 0xF8: System information (C = subfunction)
    SysGet = 0xF8,
}

impl TryFrom<u8> for HbiosFunction {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::CioIn),
            0x01 => Ok(Self::CioOut),
            0x02 => Ok(Self::CioIst),
            0x03 => Ok(Self::CioOst),
            0x10 => Ok(Self::DioStatus),
            0x12 => Ok(Self::DioSeek),
            0x13 => Ok(Self::DioRead),
            0x14 => Ok(Self::DioWrite),
            0x18 => Ok(Self::DioMedia),
            0x1A => Ok(Self::DioCap),
            0x20 => Ok(Self::RtcGetTim),
            0xF0 => Ok(Self::SysReset),
            0xF1 => Ok(Self::SysVer),
            0xF2 => Ok(Self::SysSetBnk),
            0xF3 => Ok(Self::SysGetBnk),
            0xF8 => Ok(Self::SysGet),
            _ => Err(value),
        }
    }
}

/// Result codes returned in A.
pub mod result {
    pub const NONE: i8 = 0;
    pub const NOFUNC: i8 = -3;
    pub const NOUNIT: i8 = -4;
    pub const RANGE: i8 = -6;
    pub const NOMEDIA: i8 = -7;
    pub const IO: i8 = -9;
}

/// SYSRESET subfunctions (register C).
pub mod reset {
    pub const WARM: u8 = 0x01;
    pub const COLD: u8 = 0x02;
}

/// SYSGET subfunctions (register C).
pub mod sysget {
    pub const CIOCNT: u8 = 0x00;
    pub const DIOCNT: u8 = 0x10;
    pub const DRVCNT: u8 = 0x20;
}

/// Reported by SYSVER in DE: version 3.5.1.0.
pub const HBIOS_VERSION: u16 = 0x3510;
/// Reported by SYSVER in L.
pub const PLATFORM_ID: u8 = 0x11;
/// DIOMEDIA id for a hard disk.
pub const MEDIA_HD: u8 = 0x04;
