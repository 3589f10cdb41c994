//! Z80 I/O space: static port table and the device dispatcher.

use crate::bus::BusBreak;
use crate::config::PortLayout;
use crate::console::Uart;
use crate::disk::DiskController;
use crate::error::{EmuError, EmuResult};
use crate::hostfile::HostFileBridge;
use crate::memory::BankedMemory;
use crate::nvram::Nvram;

/// Value returned by reads from ports no device claims.
pub const IDLE_READ: u8 = 0xFF;

/// Devices attached to the I/O space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceId {
    Uart,
    BankSelect,
    Disk,
    Nvram,
    HostFile,
    HbiosTrap,
}

impl DeviceId {
    /// Number of consecutive ports the device decodes.
    pub const fn width(self) -> u8 {
        match self {
            DeviceId::Uart => 8,
            DeviceId::BankSelect => 1,
            DeviceId::Disk => 10,
            DeviceId::Nvram => 2,
            DeviceId::HostFile => 4,
            DeviceId::HbiosTrap => 1,
        }
    }
}

/// A 256-entry table from port number to `(device, register offset)`.
#[derive(Debug, Clone)]
pub struct PortMap {
    slots: [Option<(DeviceId, u8)>; 256],
}

impl PortMap {
    /// Build the table, rejecting layouts where two devices share a port
    /// or a device runs past 0xFF.
    pub fn from_layout(layout: &PortLayout) -> EmuResult<Self> {
        let mut map = Self { slots: [None; 256] };
        map.register(DeviceId::Uart, layout.uart_base)?;
        map.register(DeviceId::BankSelect, layout.bank_select)?;
        map.register(DeviceId::Disk, layout.disk_base)?;
        map.register(DeviceId::Nvram, layout.nvram_base)?;
        map.register(DeviceId::HostFile, layout.host_file_base)?;
        map.register(DeviceId::HbiosTrap, layout.hbios_trap)?;
        Ok(map)
    }

    fn register(&mut self, device: DeviceId, base: u8) -> EmuResult<()> {
        for offset in 0..device.width() {
            let port = base
                .checked_add(offset)
                .ok_or(EmuError::PortConflict(base))?;
            let slot = &mut self.slots[usize::from(port)];
            if slot.is_some() {
                return Err(EmuError::PortConflict(port));
            }
            *slot = Some((device, offset));
        }
        Ok(())
    }

    /// Look up the device decoding `port`.
    #[inline]
    pub fn resolve(&self, port: u8) -> Option<(DeviceId, u8)> {
        self.slots[usize::from(port)]
    }
}

/// Owns every I/O device and routes port accesses to them.
pub struct IoDispatcher {
    map: PortMap,
    pub uart: Uart,
    pub disks: DiskController,
    pub nvram: Nvram,
    pub host_file: HostFileBridge,
}

impl IoDispatcher {
    pub fn new(
        map: PortMap,
        uart: Uart,
        disks: DiskController,
        nvram: Nvram,
        host_file: HostFileBridge,
    ) -> Self {
        Self {
            map,
            uart,
            disks,
            nvram,
            host_file,
        }
    }

    pub fn port_map(&self) -> &PortMap {
        &self.map
    }

    /// Handle an IN instruction. Only the low byte of the port is decoded.
    pub fn read(&mut self, memory: &BankedMemory, port: u8) -> u8 {
        let Some((device, reg)) = self.map.resolve(port) else {
            return IDLE_READ;
        };
        match device {
            DeviceId::Uart => self.uart.read_reg(reg),
            DeviceId::BankSelect => memory.current_bank(),
            DeviceId::Disk => self.disks.read_reg(reg),
            DeviceId::Nvram => self.nvram.read_reg(reg),
            DeviceId::HostFile => self.host_file.read_reg(reg),
            DeviceId::HbiosTrap => IDLE_READ,
        }
    }

    /// Handle an OUT instruction. A write to the HBIOS trap port breaks out
    /// of the instruction so the engine can service the call.
    pub fn write(&mut self, memory: &mut BankedMemory, port: u8, value: u8) -> Option<BusBreak> {
        let (device, reg) = self.map.resolve(port)?;
        match device {
            DeviceId::Uart => self.uart.write_reg(reg, value),
            DeviceId::BankSelect => {
                log::trace!("bank select {:#04X}", value);
                memory.select_bank(value);
            }
            DeviceId::Disk => self.disks.write_reg(reg, value, memory),
            DeviceId::Nvram => self.nvram.write_reg(reg, value),
            DeviceId::HostFile => self.host_file.write_reg(reg, value),
            DeviceId::HbiosTrap => return Some(BusBreak::HbiosCall(value)),
        }
        None
    }
}
