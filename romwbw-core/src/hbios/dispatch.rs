use z80emu::{Reg8, StkReg16};

use super::{result, HbiosFunction, RtcTime, HBIOS_VERSION, MEDIA_HD, PLATFORM_ID};
use crate::cpu::Processor;
use crate::error::EmuError;
use crate::memory::BankedMemory;
use crate::ports::IoDispatcher;

/// Length of the trapping OUT instruction, used to re-arm a blocked call.
const TRAP_INSN_LEN: u16 = 2;
/// Console unit numbers accepted by the CIO calls (0x80 = current console).
const CONSOLE_UNITS: [u8; 2] = [0x00, 0x80];

/// What the engine must do after a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HbiosAction {
    Continue,
    /// CIOIN found no input. PC was wound back onto the trap.
    WaitForInput,
    Reset { cold: bool },
}

fn set_result(cpu: &mut Processor, code: i8) {
    cpu.set_reg8(Reg8::A, code as u8);
}

fn error_code(err: &EmuError) -> i8 {
    match err {
        EmuError::InvalidUnit(_) => result::NOUNIT,
        EmuError::NoMedia(_) => result::NOMEDIA,
        EmuError::SectorOutOfRange { .. } => result::RANGE,
        _ => result::IO,
    }
}

fn set_dehl(cpu: &mut Processor, value: u32) {
    cpu.set_reg16(StkReg16::DE, (value >> 16) as u16);
    cpu.set_reg16(StkReg16::HL, value as u16);
}

/// Service the HBIOS call described by the current registers.
pub(crate) fn dispatch(
    cpu: &mut Processor,
    memory: &mut BankedMemory,
    io: &mut IoDispatcher,
) -> HbiosAction {
    let b = cpu.reg8(Reg8::B);
    let c = cpu.reg8(Reg8::C);

    let func = match HbiosFunction::try_from(b) {
        Ok(func) => func,
        Err(_) => {
            log::debug!("HBIOS: unknown function {:#04X}", b);
            set_result(cpu, result::NOFUNC);
            return HbiosAction::Continue;
        }
    };
    log::debug!(
        "HBIOS {:?} (C={:#04X}, DE={:#06X}, HL={:#06X})",
        func,
        c,
        cpu.reg16(StkReg16::DE),
        cpu.reg16(StkReg16::HL)
    );

    use HbiosFunction::*;
    match func {
        CioIn | CioOut | CioIst | CioOst if !CONSOLE_UNITS.contains(&c) => {
            set_result(cpu, result::NOUNIT);
        }
        CioIn => match io.uart.take_input() {
            Some(byte) => {
                cpu.set_reg8(Reg8::E, byte);
                set_result(cpu, result::NONE);
            }
            None => {
                cpu.set_pc(cpu.pc().wrapping_sub(TRAP_INSN_LEN));
                return HbiosAction::WaitForInput;
            }
        },
        CioOut => {
            io.uart.put_output(cpu.reg8(Reg8::E));
            set_result(cpu, result::NONE);
        }
        CioIst => {
            let pending = io.uart.pending_input().min(0xFF) as u8;
            cpu.set_reg8(Reg8::A, pending);
        }
        CioOst => cpu.set_reg8(Reg8::A, 1),

        DioStatus => {
            let code = match io.disks.unit(usize::from(c)) {
                Ok(_) => result::NONE,
                Err(err) => error_code(&err),
            };
            set_result(cpu, code);
        }
        DioSeek => {
            let de = u32::from(cpu.reg16(StkReg16::DE));
            let hl = u32::from(cpu.reg16(StkReg16::HL));
            let lba = ((de << 16) | hl) & 0x7FFF_FFFF;
            let code = match io.disks.unit_mut(usize::from(c)) {
                Ok(disk) => {
                    disk.seek = lba;
                    result::NONE
                }
                Err(err) => error_code(&err),
            };
            set_result(cpu, code);
        }
        DioRead | DioWrite => {
            let code = transfer(cpu, memory, io, func == DioWrite, usize::from(c));
            set_result(cpu, code);
        }
        DioMedia => match io.disks.unit(usize::from(c)) {
            Ok(_) => {
                cpu.set_reg8(Reg8::E, MEDIA_HD);
                set_result(cpu, result::NONE);
            }
            Err(err) => {
                cpu.set_reg8(Reg8::E, 0);
                set_result(cpu, error_code(&err));
            }
        },
        DioCap => match io.disks.unit(usize::from(c)) {
            Ok(disk) => {
                let (sectors, size) = (disk.total_sectors(), disk.sector_size() as u16);
                set_dehl(cpu, sectors);
                cpu.set_reg16(StkReg16::BC, size);
                set_result(cpu, result::NONE);
            }
            Err(err) => set_result(cpu, error_code(&err)),
        },

        RtcGetTim => {
            let addr = cpu.reg16(StkReg16::HL);
            memory.load_at(addr, &RtcTime::now().to_bcd());
            set_result(cpu, result::NONE);
        }

        SysReset => match c {
            super::reset::WARM => return HbiosAction::Reset { cold: false },
            super::reset::COLD => return HbiosAction::Reset { cold: true },
            _ => set_result(cpu, result::NOFUNC),
        },
        SysVer => {
            cpu.set_reg16(StkReg16::DE, HBIOS_VERSION);
            cpu.set_reg8(Reg8::L, PLATFORM_ID);
            set_result(cpu, result::NONE);
        }
        SysSetBnk => {
            let previous = memory.current_bank();
            memory.select_bank(c);
            cpu.set_reg8(Reg8::C, previous);
            set_result(cpu, result::NONE);
        }
        SysGetBnk => {
            cpu.set_reg8(Reg8::C, memory.current_bank());
            set_result(cpu, result::NONE);
        }
        SysGet => {
            let count = match c {
                super::sysget::CIOCNT => Some(1),
                super::sysget::DIOCNT => Some(io.disks.loaded_count()),
                super::sysget::DRVCNT => Some(io.disks.drive_map().len()),
                _ => None,
            };
            match count {
                Some(n) => {
                    cpu.set_reg8(Reg8::E, n as u8);
                    set_result(cpu, result::NONE);
                }
                None => set_result(cpu, result::NOFUNC),
            }
        }
    }
    HbiosAction::Continue
}

/// Move E sectors between memory at HL and the unit's seek position.
/// E is left holding the number actually transferred.
fn transfer(
    cpu: &mut Processor,
    memory: &mut BankedMemory,
    io: &mut IoDispatcher,
    write: bool,
    unit: usize,
) -> i8 {
    let count = cpu.reg8(Reg8::E);
    let mut addr = cpu.reg16(StkReg16::HL);
    let sector_size = io.disks.sector_size() as u16;
    let mut done = 0u8;
    let mut code = result::NONE;

    while done < count {
        let lba = match io.disks.unit(unit) {
            Ok(disk) => disk.seek,
            Err(err) => {
                code = error_code(&err);
                break;
            }
        };
        let moved = if write {
            io.disks.write_from(unit, lba, memory, addr)
        } else {
            io.disks.read_into(unit, lba, memory, addr)
        };
        if let Err(err) = moved {
            log::debug!("HBIOS disk transfer stopped: {}", err);
            code = error_code(&err);
            break;
        }
        if let Ok(disk) = io.disks.unit_mut(unit) {
            disk.seek += 1;
        }
        addr = addr.wrapping_add(sector_size);
        done += 1;
    }
    cpu.set_reg8(Reg8::E, done);
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CpuFlavour, PortLayout};
    use crate::console::Uart;
    use crate::disk::DiskController;
    use crate::hostfile::HostFileBridge;
    use crate::hbios::sysget;
    use crate::memory::BID_RAM;
    use crate::nvram::Nvram;
    use crate::ports::PortMap;

    struct Rig {
        cpu: Processor,
        memory: BankedMemory,
        io: IoDispatcher,
    }

    impl Rig {
        fn new() -> Self {
            let mut memory = BankedMemory::new(128 * 1024);
            memory.select_bank(BID_RAM);
            Self {
                cpu: Processor::new(CpuFlavour::Nmos),
                memory,
                io: IoDispatcher::new(
                    PortMap::from_layout(&PortLayout::default()).unwrap(),
                    Uart::default(),
                    DiskController::new(512, 16_384, true),
                    Nvram::new(),
                    HostFileBridge::new(),
                ),
            }
        }

        fn call(&mut self, b: u8, c: u8) -> HbiosAction {
            self.cpu.set_reg8(Reg8::B, b);
            self.cpu.set_reg8(Reg8::C, c);
            dispatch(&mut self.cpu, &mut self.memory, &mut self.io)
        }

        fn a(&self) -> i8 {
            self.cpu.reg8(Reg8::A) as i8
        }
    }

    #[test]
    fn test_unknown_function() {
        let mut rig = Rig::new();
        assert_eq!(rig.call(0x55, 0), HbiosAction::Continue);
        assert_eq!(rig.a(), result::NOFUNC);
    }

    #[test]
    fn test_console_in_waits_then_delivers() {
        let mut rig = Rig::new();
        rig.cpu.set_pc(0x0102);
        assert_eq!(rig.call(0x00, 0), HbiosAction::WaitForInput);
        assert_eq!(rig.cpu.pc(), 0x0100);

        rig.io.uart.queue_input(b'k');
        assert_eq!(rig.call(0x00, 0), HbiosAction::Continue);
        assert_eq!(rig.cpu.reg8(Reg8::E), b'k');
        assert_eq!(rig.a(), result::NONE);
    }

    #[test]
    fn test_console_bad_unit() {
        let mut rig = Rig::new();
        rig.call(0x01, 3);
        assert_eq!(rig.a(), result::NOUNIT);
        assert!(!rig.io.uart.has_output());
    }

    #[test]
    fn test_disk_seek_read_write() {
        let mut rig = Rig::new();
        let mut image = vec![0u8; 4 * 512];
        image[2 * 512] = 0x42;
        rig.io.disks.load(2, image).unwrap();

        // Seek to LBA 2 with the LBA-mode bit set.
        rig.cpu.set_reg16(StkReg16::DE, 0x8000);
        rig.cpu.set_reg16(StkReg16::HL, 0x0002);
        rig.call(0x12, 2);
        assert_eq!(rig.a(), result::NONE);

        rig.cpu.set_reg16(StkReg16::HL, 0x9000);
        rig.cpu.set_reg8(Reg8::E, 3);
        rig.call(0x13, 2);
        // Only two sectors remain past LBA 2.
        assert_eq!(rig.a(), result::RANGE);
        assert_eq!(rig.cpu.reg8(Reg8::E), 2);
        assert_eq!(rig.memory.read_byte(0x9000), 0x42);

        rig.memory.load_at(0xA000, &[0xEE; 512]);
        rig.cpu.set_reg16(StkReg16::DE, 0);
        rig.cpu.set_reg16(StkReg16::HL, 0);
        rig.call(0x12, 2);
        rig.cpu.set_reg16(StkReg16::HL, 0xA000);
        rig.cpu.set_reg8(Reg8::E, 1);
        rig.call(0x14, 2);
        assert_eq!(rig.a(), result::NONE);
        assert_eq!(rig.io.disks.read_sector(2, 0).unwrap()[511], 0xEE);
        assert!(rig.io.disks.is_dirty(2));
    }

    #[test]
    fn test_disk_errors() {
        let mut rig = Rig::new();
        rig.call(0x10, 1);
        assert_eq!(rig.a(), result::NOMEDIA);
        rig.call(0x10, 40);
        assert_eq!(rig.a(), result::NOUNIT);
        rig.call(0x18, 1);
        assert_eq!(rig.cpu.reg8(Reg8::E), 0);
    }

    #[test]
    fn test_capacity_and_sysget() {
        let mut rig = Rig::new();
        rig.io.disks = DiskController::new(128, 16_384, true);
        rig.io.disks.load(0, vec![0; 70_000 * 128]).unwrap();
        rig.call(0x1A, 0);
        assert_eq!(rig.a(), result::NONE);
        assert_eq!(rig.cpu.reg16(StkReg16::DE), 1);
        assert_eq!(rig.cpu.reg16(StkReg16::HL), (70_000u32 & 0xFFFF) as u16);
        assert_eq!(rig.cpu.reg16(StkReg16::BC), 128);

        rig.call(0xF8, sysget::DIOCNT);
        assert_eq!(rig.cpu.reg8(Reg8::E), 1);
        // 70000 sectors hold four full slices.
        rig.call(0xF8, sysget::DRVCNT);
        assert_eq!(rig.cpu.reg8(Reg8::E), 4);
        rig.call(0xF8, 0x77);
        assert_eq!(rig.a(), result::NOFUNC);
    }

    #[test]
    fn test_bank_calls() {
        let mut rig = Rig::new();
        rig.call(0xF2, 0x81);
        assert_eq!(rig.cpu.reg8(Reg8::C), BID_RAM);
        assert_eq!(rig.memory.current_bank(), 0x81);
        rig.call(0xF3, 0);
        assert_eq!(rig.cpu.reg8(Reg8::C), 0x81);
    }

    #[test]
    fn test_clock_fills_bcd_buffer() {
        let mut rig = Rig::new();
        // Buffer inside the banked window.
        rig.memory.load_at(0x4000, &[0xFF; 7]);
        rig.cpu.set_reg16(StkReg16::HL, 0x4000);
        assert_eq!(rig.call(0x20, 0), HbiosAction::Continue);
        assert_eq!(rig.a(), result::NONE);

        let buf = rig.memory.read_block(0x4000, 7);
        assert!(buf[..6].iter().all(|b| b >> 4 <= 9 && b & 0x0F <= 9));
        let from_bcd = |b: u8| (b >> 4) * 10 + (b & 0x0F);
        assert!((1..=12).contains(&from_bcd(buf[1])));
        assert!((1..=31).contains(&from_bcd(buf[2])));
        assert!(from_bcd(buf[3]) < 24);
        assert_eq!(buf[6], 0xFF);
    }

    #[test]
    fn test_version_and_reset() {
        let mut rig = Rig::new();
        rig.call(0xF1, 0);
        assert_eq!(rig.cpu.reg16(StkReg16::DE), HBIOS_VERSION);
        assert_eq!(rig.cpu.reg8(Reg8::L), PLATFORM_ID);
        assert_eq!(rig.call(0xF0, 1), HbiosAction::Reset { cold: false });
        assert_eq!(rig.call(0xF0, 2), HbiosAction::Reset { cold: true });
        assert_eq!(rig.call(0xF0, 9), HbiosAction::Continue);
    }
}
