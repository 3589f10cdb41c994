//! Z80 processor wrapper.
//!
//! Decoding and execution come from `z80emu`. `Processor` picks the
//! silicon flavour at runtime through `Z80Any`, owns the T-state clock
//! and turns the core's break causes into step events.

use log::Level;
use z80emu::host::TsCounter;
use z80emu::{BreakCause, Clock, Cpu, CpuDebug, Reg8, StkReg16, Z80Any};

use crate::bus::{Bus, BusBreak};
use crate::config::CpuFlavour;

type TsClock = TsCounter<i32>;

/// Something other than plain execution happened during a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    /// The core executed HALT, or was already halted.
    Halted,
    /// An OUT hit a trapping port. PC is past the OUT instruction.
    Trap(BusBreak),
}

/// Result of executing one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub cycles: u32,
    pub event: Option<StepEvent>,
}

/// Result of `Processor::run_batch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuBatch {
    pub executed: u32,
    pub cycles: u64,
    /// The event that ended the batch early, if any.
    pub stop: Option<StepEvent>,
}

/// Snapshot of the main register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Registers {
    pub af: u16,
    pub bc: u16,
    pub de: u16,
    pub hl: u16,
    pub sp: u16,
    pub pc: u16,
    pub iff1: bool,
    pub iff2: bool,
    pub halted: bool,
}

/// A Z80 core plus its T-state clock.
pub struct Processor {
    core: Z80Any,
    clock: TsClock,
    flavour: CpuFlavour,
}

impl Processor {
    pub fn new(flavour: CpuFlavour) -> Self {
        let core = match flavour {
            CpuFlavour::Nmos => Z80Any::new_nmos(),
            CpuFlavour::Cmos => Z80Any::new_cmos(),
            CpuFlavour::Bm1 => Z80Any::new_bm1(),
        };
        let mut cpu = Self {
            core,
            clock: TsClock::default(),
            flavour,
        };
        cpu.reset();
        cpu
    }

    pub fn flavour(&self) -> CpuFlavour {
        self.flavour
    }

    /// PC = 0, SP = 0, interrupts off, IM 0, not halted, clock at zero.
    pub fn reset(&mut self) {
        self.core.reset();
        self.core.set_sp(0);
        self.clock = TsClock::default();
    }

    /// Total T-states since reset (wraps after 2^31).
    pub fn t_states(&self) -> i32 {
        self.clock.as_timestamp()
    }

    pub fn is_halted(&self) -> bool {
        self.core.is_halt()
    }

    /// Execute one instruction. A halted core does nothing.
    pub fn step(&mut self, bus: &mut Bus<'_>) -> Step {
        if self.is_halted() {
            return Step {
                cycles: 0,
                event: Some(StepEvent::Halted),
            };
        }
        let before = self.clock.as_timestamp();
        let trace = log::log_enabled!(Level::Trace);
        let result = if trace {
            self.core.execute_next(
                bus,
                &mut self.clock,
                Some(|deb: CpuDebug| log::trace!("{:X}", deb)),
            )
        } else {
            self.core.execute_next(bus, &mut self.clock, None::<fn(CpuDebug)>)
        };
        let cycles = self.clock.as_timestamp().wrapping_sub(before) as u32;
        let event = match result {
            Ok(()) => None,
            Err(BreakCause::Halt) => Some(StepEvent::Halted),
            Err(BreakCause::WriteIo(brk)) => Some(StepEvent::Trap(brk)),
            Err(_) => None,
        };
        Step { cycles, event }
    }

    /// Step until `max` instructions have run or an event stops the core.
    pub fn run_batch(&mut self, bus: &mut Bus<'_>, max: u32) -> CpuBatch {
        let mut batch = CpuBatch {
            executed: 0,
            cycles: 0,
            stop: None,
        };
        while batch.executed < max {
            let step = self.step(bus);
            batch.cycles += u64::from(step.cycles);
            if step.cycles > 0 {
                batch.executed += 1;
            }
            if step.event.is_some() {
                batch.stop = step.event;
                break;
            }
        }
        batch
    }

    pub fn reg8(&self, reg: Reg8) -> u8 {
        self.core.get_reg(reg, None)
    }

    pub fn set_reg8(&mut self, reg: Reg8, value: u8) {
        self.core.set_reg(reg, None, value)
    }

    pub fn reg16(&self, reg: StkReg16) -> u16 {
        self.core.get_reg16(reg)
    }

    pub fn set_reg16(&mut self, reg: StkReg16, value: u16) {
        self.core.set_reg16(reg, value)
    }

    pub fn pc(&self) -> u16 {
        self.core.get_pc()
    }

    pub fn set_pc(&mut self, pc: u16) {
        self.core.set_pc(pc)
    }

    pub fn sp(&self) -> u16 {
        self.core.get_sp()
    }

    pub fn set_sp(&mut self, sp: u16) {
        self.core.set_sp(sp)
    }

    pub fn registers(&self) -> Registers {
        let (iff1, iff2) = self.core.get_iffs();
        Registers {
            af: self.reg16(StkReg16::AF),
            bc: self.reg16(StkReg16::BC),
            de: self.reg16(StkReg16::DE),
            hl: self.reg16(StkReg16::HL),
            sp: self.sp(),
            pc: self.pc(),
            iff1,
            iff2,
            halted: self.is_halted(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortLayout;
    use crate::console::Uart;
    use crate::disk::DiskController;
    use crate::hostfile::HostFileBridge;
    use crate::memory::{BankedMemory, BID_RAM};
    use crate::nvram::Nvram;
    use crate::ports::{IoDispatcher, PortMap};

    fn machine(program: &[u8]) -> (BankedMemory, IoDispatcher) {
        let mut memory = BankedMemory::new(64 * 1024);
        memory.select_bank(BID_RAM);
        memory.load_at(0, program);
        let io = IoDispatcher::new(
            PortMap::from_layout(&PortLayout::default()).unwrap(),
            Uart::default(),
            DiskController::new(512, 16_384, true),
            Nvram::new(),
            HostFileBridge::new(),
        );
        (memory, io)
    }

    #[test]
    fn test_flags_from_add() {
        // LD A,7Fh; ADD A,1; HALT
        let (mut memory, mut io) = machine(&[0x3E, 0x7F, 0xC6, 0x01, 0x76]);
        let mut bus = Bus {
            memory: &mut memory,
            io: &mut io,
        };
        let mut cpu = Processor::new(CpuFlavour::Nmos);
        let batch = cpu.run_batch(&mut bus, 100);
        assert_eq!(batch.stop, Some(StepEvent::Halted));
        assert_eq!(batch.executed, 3);
        assert_eq!(cpu.reg8(Reg8::A), 0x80);
        // S, H and P/V set; Z, N and C clear.
        let flags = cpu.reg16(StkReg16::AF) as u8;
        assert_eq!(flags & 0xD7, 0x94);
    }

    #[test]
    fn test_budget_bounds_tight_loop() {
        // JR $
        let (mut memory, mut io) = machine(&[0x18, 0xFE]);
        let mut bus = Bus {
            memory: &mut memory,
            io: &mut io,
        };
        let mut cpu = Processor::new(CpuFlavour::Cmos);
        let batch = cpu.run_batch(&mut bus, 1000);
        assert_eq!(batch.executed, 1000);
        assert_eq!(batch.cycles, 12_000);
        assert_eq!(batch.stop, None);
    }

    #[test]
    fn test_trap_port_breaks_after_out() {
        // LD A,5; OUT (0EFh),A; NOP
        let (mut memory, mut io) = machine(&[0x3E, 0x05, 0xD3, 0xEF, 0x00]);
        let mut bus = Bus {
            memory: &mut memory,
            io: &mut io,
        };
        let mut cpu = Processor::new(CpuFlavour::Bm1);
        let batch = cpu.run_batch(&mut bus, 10);
        assert_eq!(batch.stop, Some(StepEvent::Trap(BusBreak::HbiosCall(5))));
        assert_eq!(cpu.pc(), 4);
    }

    #[test]
    fn test_halted_core_stays_put() {
        let (mut memory, mut io) = machine(&[0x76]);
        let mut bus = Bus {
            memory: &mut memory,
            io: &mut io,
        };
        let mut cpu = Processor::new(CpuFlavour::Nmos);
        assert_eq!(cpu.step(&mut bus).event, Some(StepEvent::Halted));
        let again = cpu.step(&mut bus);
        assert_eq!(again.cycles, 0);
        assert!(cpu.registers().halted);

        cpu.reset();
        assert!(!cpu.is_halted());
        assert_eq!(cpu.pc(), 0);
        assert_eq!(cpu.sp(), 0);
        assert_eq!(cpu.t_states(), 0);
    }

    #[test]
    fn test_every_flavour_runs() {
        for flavour in [CpuFlavour::Nmos, CpuFlavour::Cmos, CpuFlavour::Bm1] {
            // LD A,7Fh; INC A; HALT
            let (mut memory, mut io) = machine(&[0x3E, 0x7F, 0x3C, 0x76]);
            let mut bus = Bus {
                memory: &mut memory,
                io: &mut io,
            };
            let mut cpu = Processor::new(flavour);
            assert_eq!(cpu.flavour(), flavour);
            let batch = cpu.run_batch(&mut bus, 10);
            assert_eq!(batch.stop, Some(StepEvent::Halted), "{:?}", flavour);
            assert_eq!(cpu.reg8(Reg8::A), 0x80);
        }
    }
}
