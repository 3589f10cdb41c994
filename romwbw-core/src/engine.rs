//! The emulator engine: CPU, banked memory and devices behind one host API.

use crate::bus::{Bus, BusBreak};
use crate::config::EngineConfig;
use crate::console::{OutputSink, Uart};
use crate::cpu::{Processor, Registers, StepEvent};
use crate::disk::{DiskController, DriveAssignment};
use crate::error::{EmuError, EmuResult};
use crate::hbios::{self, HbiosAction};
use crate::hostfile::{HostFileBridge, HostFileState};
use crate::memory::BankedMemory;
use crate::nvram::{Nvram, NVRAM_SIZE};
use crate::ports::{IoDispatcher, PortMap};

/// Where the engine is in its setup sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No ROM yet.
    Created,
    /// ROM present, `complete_init` not called since.
    RomLoaded,
    /// Batches execute.
    Ready,
    /// The guest executed HALT. `reset` makes it `Ready` again.
    Halted,
}

/// Why a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The instruction budget was used up.
    BudgetExhausted,
    /// The guest is blocked in a console read with no input queued.
    WaitingForInput,
    /// The guest halted the CPU.
    Halted,
    /// The engine was not `Ready`; nothing ran.
    NotRunning,
}

/// Summary of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub executed: u32,
    pub t_states: u64,
    pub outcome: BatchOutcome,
}

impl BatchReport {
    fn not_running() -> Self {
        Self {
            executed: 0,
            t_states: 0,
            outcome: BatchOutcome::NotRunning,
        }
    }

    /// Whether the host should schedule another batch.
    pub fn should_continue(&self) -> bool {
        matches!(
            self.outcome,
            BatchOutcome::BudgetExhausted | BatchOutcome::WaitingForInput
        )
    }
}

/// Counters since the last reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    pub batches: u64,
    pub instructions: u64,
    pub t_states: u64,
}

/// A complete emulated machine.
///
/// Setup order is `new`, `load_rom`, any `load_disk` calls, then
/// `complete_init`. After that the host calls `run_batch` repeatedly.
pub struct Engine {
    config: EngineConfig,
    cpu: Processor,
    memory: BankedMemory,
    io: IoDispatcher,
    state: LifecycleState,
    sink: Option<Box<dyn OutputSink>>,
    stats: EngineStats,
}

impl Engine {
    /// Build an engine. The port table is fixed from here on.
    pub fn new(config: EngineConfig) -> EmuResult<Self> {
        config.validate()?;
        let map = PortMap::from_layout(&config.ports)?;
        let io = IoDispatcher::new(
            map,
            Uart::new(config.lf_to_cr, config.strip_high_bit),
            DiskController::new(
                config.sector_size,
                config.sectors_per_slice,
                config.auto_slices,
            ),
            Nvram::new(),
            HostFileBridge::new(),
        );
        log::info!(
            "engine created: {:?} core, {} KiB RAM, batch of {} instructions",
            config.cpu_flavour,
            config.ram_size / 1024,
            config.batch_instructions
        );
        Ok(Self {
            cpu: Processor::new(config.cpu_flavour),
            memory: BankedMemory::new(config.ram_size),
            io,
            state: LifecycleState::Created,
            sink: None,
            stats: EngineStats::default(),
            config,
        })
    }

    /// Tear the engine down. Dropping it has the same effect.
    pub fn destroy(self) {
        log::info!(
            "engine destroyed after {} batches, {} instructions",
            self.stats.batches,
            self.stats.instructions
        );
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == LifecycleState::Ready
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn registers(&self) -> Registers {
        self.cpu.registers()
    }

    /// Read a byte through the current bank mapping.
    pub fn peek(&self, addr: u16) -> u8 {
        self.memory.read_byte(addr)
    }

    pub fn current_bank(&self) -> u8 {
        self.memory.current_bank()
    }

    // ---- setup ----

    /// Install a ROM image. A rejected image leaves the engine as it was.
    pub fn load_rom(&mut self, image: &[u8]) -> EmuResult<()> {
        if let Err(err) = self.memory.load_rom(image, self.config.max_rom_size) {
            log::warn!("ROM rejected: {}", err);
            return Err(err);
        }
        log::info!("ROM loaded: {} banks", self.memory.rom_banks());
        self.state = LifecycleState::RomLoaded;
        Ok(())
    }

    /// Finish setup and arm the CPU at address 0.
    pub fn complete_init(&mut self) -> EmuResult<()> {
        if self.state == LifecycleState::Created {
            return Err(EmuError::NotReady("no ROM loaded"));
        }
        self.power_on();
        self.state = LifecycleState::Ready;
        log::info!(
            "init complete: {} disk units, boot setting {:?}",
            self.io.disks.loaded_count(),
            self.io.nvram.setting()
        );
        Ok(())
    }

    fn power_on(&mut self) {
        self.cpu.reset();
        self.memory.reset(true);
        self.io.uart.reset();
        self.io.host_file.reset();
        self.io.disks.reset_registers();
        self.stats = EngineStats::default();
    }

    /// Restart the machine. Disk images, their flags and NVRAM survive.
    pub fn reset(&mut self) {
        self.power_on();
        if self.state == LifecycleState::Halted {
            self.state = LifecycleState::Ready;
        }
        log::info!("engine reset");
    }

    // ---- execution ----

    /// Run one batch of the configured size. Returns false when the engine
    /// is not running or the guest halted.
    pub fn run_batch(&mut self) -> bool {
        self.run_for(self.config.batch_instructions).should_continue()
    }

    /// Run at most `budget` instructions, then deliver buffered output.
    pub fn run_for(&mut self, budget: u32) -> BatchReport {
        if self.state != LifecycleState::Ready {
            return BatchReport::not_running();
        }

        let mut executed = 0u32;
        let mut t_states = 0u64;
        let outcome = loop {
            if executed >= budget {
                break BatchOutcome::BudgetExhausted;
            }
            let batch = {
                let mut bus = Bus {
                    memory: &mut self.memory,
                    io: &mut self.io,
                };
                self.cpu.run_batch(&mut bus, budget - executed)
            };
            executed += batch.executed;
            t_states += batch.cycles;

            match batch.stop {
                None => break BatchOutcome::BudgetExhausted,
                Some(StepEvent::Halted) => {
                    log::info!("guest halted at {:#06X}", self.cpu.pc());
                    self.state = LifecycleState::Halted;
                    break BatchOutcome::Halted;
                }
                Some(StepEvent::Trap(BusBreak::HbiosCall(_))) => {
                    match hbios::dispatch(&mut self.cpu, &mut self.memory, &mut self.io) {
                        HbiosAction::Continue => {}
                        HbiosAction::WaitForInput => break BatchOutcome::WaitingForInput,
                        HbiosAction::Reset { cold } => self.guest_restart(cold),
                    }
                }
            }
        };

        self.stats.batches += 1;
        self.stats.instructions += u64::from(executed);
        self.stats.t_states += t_states;
        if let Some(sink) = self.sink.as_mut() {
            self.io.uart.flush_to(sink.as_mut());
        }
        BatchReport {
            executed,
            t_states,
            outcome,
        }
    }

    fn guest_restart(&mut self, cold: bool) {
        log::info!("guest requested {} restart", if cold { "cold" } else { "warm" });
        self.cpu.reset();
        self.memory.reset(cold);
    }

    // ---- console ----

    pub fn queue_input(&mut self, byte: u8) {
        self.io.uart.queue_input(byte);
    }

    pub fn queue_input_str(&mut self, s: &str) {
        self.io.uart.queue_input_str(s);
    }

    pub fn pending_input(&self) -> usize {
        self.io.uart.pending_input()
    }

    /// Take all output produced since the last drain. Empty while a sink
    /// is installed, since the sink receives it instead.
    pub fn drain_output(&mut self) -> Vec<u8> {
        self.io.uart.drain_output()
    }

    /// Deliver output to `sink` at the end of every batch.
    pub fn set_output_sink<S: OutputSink + 'static>(&mut self, sink: S) {
        self.sink = Some(Box::new(sink));
    }

    /// Go back to collecting output for `drain_output`.
    pub fn clear_output_sink(&mut self) {
        self.sink = None;
    }

    // ---- disks ----

    pub fn load_disk(&mut self, unit: usize, image: Vec<u8>) -> EmuResult<()> {
        self.io.disks.load(unit, image).inspect_err(|err| {
            log::warn!("disk unit {} rejected: {}", unit, err);
        })
    }

    /// Remove a disk image and hand it back.
    pub fn unload_disk(&mut self, unit: usize) -> EmuResult<Option<Vec<u8>>> {
        self.io.disks.unload(unit)
    }

    pub fn is_disk_loaded(&self, unit: usize) -> bool {
        self.io.disks.is_loaded(unit)
    }

    pub fn set_disk_slice_count(&mut self, unit: usize, slices: u8) -> EmuResult<()> {
        self.io.disks.set_slice_count(unit, slices)
    }

    pub fn disk_slice_count(&self, unit: usize) -> Option<u8> {
        self.io.disks.slice_count(unit)
    }

    pub fn is_disk_dirty(&self, unit: usize) -> bool {
        self.io.disks.is_dirty(unit)
    }

    pub fn clear_disk_dirty(&mut self, unit: usize) {
        self.io.disks.clear_dirty(unit);
    }

    pub fn disk_data(&self, unit: usize) -> Option<&[u8]> {
        self.io.disks.data(unit)
    }

    pub fn drive_map(&self) -> Vec<DriveAssignment> {
        self.io.disks.drive_map()
    }

    pub fn set_disk_is_manifest(&mut self, unit: usize, manifest: bool) -> EmuResult<()> {
        self.io.disks.set_manifest(unit, manifest)
    }

    pub fn set_disk_warning_suppressed(&mut self, unit: usize, suppressed: bool) -> EmuResult<()> {
        self.io.disks.set_warning_suppressed(unit, suppressed)
    }

    pub fn set_all_disk_warnings_suppressed(&mut self, suppressed: bool) {
        self.io.disks.set_all_warnings_suppressed(suppressed);
    }

    /// The unit of a write to a manifest disk since the last check, if any.
    /// Each write event is reported once.
    pub fn check_manifest_write_warning(&mut self) -> Option<usize> {
        self.io.disks.take_manifest_warning()
    }

    // ---- NVRAM ----

    pub fn nvram_setting(&self) -> String {
        self.io.nvram.setting()
    }

    pub fn set_nvram_setting(&mut self, setting: &str) -> EmuResult<()> {
        self.io.nvram.set_setting(setting)
    }

    pub fn nvram_has_change(&mut self) -> bool {
        self.io.nvram.has_change()
    }

    pub fn is_nvram_initialized(&self) -> bool {
        self.io.nvram.is_initialized()
    }

    pub fn clear_nvram(&mut self) {
        self.io.nvram.clear();
    }

    pub fn nvram_bytes(&self) -> [u8; NVRAM_SIZE] {
        self.io.nvram.to_bytes()
    }

    // ---- host file transfer ----

    pub fn host_file_state(&self) -> HostFileState {
        self.io.host_file.state()
    }

    pub fn host_file_read_name(&self) -> Option<&str> {
        self.io.host_file.read_name()
    }

    pub fn provide_host_file_data(&mut self, data: &[u8]) -> bool {
        self.io.host_file.provide_data(data)
    }

    pub fn host_file_write_name(&self) -> Option<&str> {
        self.io.host_file.write_name()
    }

    pub fn host_file_write_data(&self) -> Option<&[u8]> {
        self.io.host_file.write_data()
    }

    pub fn host_file_write_done(&mut self) -> bool {
        self.io.host_file.write_done()
    }

    pub fn host_file_cancel(&mut self) -> bool {
        self.io.host_file.cancel()
    }
}
