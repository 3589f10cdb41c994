//! Host file transfer bridge.
//!
//! Lets guest utilities pull a file from the host ("read") or push one to
//! it ("write"). One session at a time:
//!
//! ```text
//! Idle --guest open read--> WaitingRead --provide_data / cancel--> Idle
//! Idle --guest open write--> Writing --guest close--> WriteReady --write_done--> Idle
//! ```
//!
//! After `provide_data` the host-side session is finished; the guest keeps
//! draining the delivered bytes and sees `Reading` until they run out.
//!
//! Guest registers (offset from the bridge base): 0 command / state code,
//! 1 filename character, 2 data byte, 3 status bits.

use std::collections::VecDeque;
use std::fmt;

/// Filename used when the guest opens a write without naming it.
pub const DEFAULT_WRITE_NAME: &str = "download.bin";

/// Returned by data reads once the delivered bytes are exhausted (CP/M EOF).
pub const EOF_BYTE: u8 = 0x1A;

const MAX_NAME_LEN: usize = 255;

/// Guest commands written to register 0.
pub mod cmd {
    pub const OPEN_READ: u8 = 0x01;
    pub const OPEN_WRITE: u8 = 0x02;
    pub const CLOSE_READ: u8 = 0x03;
    pub const CLOSE_WRITE: u8 = 0x04;
    pub const CLEAR_NAME: u8 = 0x05;
}

/// Bits of register 3.
pub mod status {
    pub const DATA_AVAILABLE: u8 = 0x01;
    pub const END_OF_DATA: u8 = 0x02;
    pub const FAILED: u8 = 0x04;
    pub const WAITING_ON_HOST: u8 = 0x80;
}

/// Transfer state. The numeric values are part of the host interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum HostFileState {
    #[default]
    Idle = 0,
    WaitingRead = 1,
    Reading = 2,
    Writing = 3,
    WriteReady = 4,
}

impl TryFrom<u8> for HostFileState {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use HostFileState::*;
        Ok(match value {
            0 => Idle,
            1 => WaitingRead,
            2 => Reading,
            3 => Writing,
            4 => WriteReady,
            other => return Err(other),
        })
    }
}

impl fmt::Display for HostFileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostFileState::Idle => "idle",
            HostFileState::WaitingRead => "waiting-read",
            HostFileState::Reading => "reading",
            HostFileState::Writing => "writing",
            HostFileState::WriteReady => "write-ready",
        };
        f.write_str(name)
    }
}

/// The transfer bridge device.
#[derive(Debug, Default)]
pub struct HostFileBridge {
    state: HostFileState,
    name_buf: String,
    read_name: String,
    inbox: VecDeque<u8>,
    delivered: bool,
    write_name: String,
    write_buf: Vec<u8>,
    failed: bool,
}

impl HostFileBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host-visible session state.
    pub fn state(&self) -> HostFileState {
        self.state
    }

    /// State as the guest sees it on register 0.
    pub fn guest_state(&self) -> HostFileState {
        if self.state == HostFileState::Idle && !self.inbox.is_empty() {
            HostFileState::Reading
        } else {
            self.state
        }
    }

    /// Name the guest asked for, while waiting on the host.
    pub fn read_name(&self) -> Option<&str> {
        (self.state == HostFileState::WaitingRead).then_some(self.read_name.as_str())
    }

    /// Deliver the requested file. Returns false (and changes nothing)
    /// unless a read is pending.
    pub fn provide_data(&mut self, data: &[u8]) -> bool {
        if self.state != HostFileState::WaitingRead {
            log::warn!("host file: provide_data ignored in state {}", self.state);
            return false;
        }
        log::debug!("host file: delivering {} bytes for {:?}", data.len(), self.read_name);
        self.inbox = data.iter().copied().collect();
        self.delivered = true;
        self.state = HostFileState::Idle;
        true
    }

    /// Refuse the pending read. The guest sees the failed bit.
    pub fn cancel(&mut self) -> bool {
        if self.state != HostFileState::WaitingRead {
            log::warn!("host file: cancel ignored in state {}", self.state);
            return false;
        }
        log::debug!("host file: read of {:?} cancelled", self.read_name);
        self.read_name.clear();
        self.failed = true;
        self.state = HostFileState::Idle;
        true
    }

    /// Name of a completed guest write.
    pub fn write_name(&self) -> Option<&str> {
        (self.state == HostFileState::WriteReady).then_some(self.write_name.as_str())
    }

    /// Contents of a completed guest write.
    pub fn write_data(&self) -> Option<&[u8]> {
        (self.state == HostFileState::WriteReady).then_some(self.write_buf.as_slice())
    }

    /// Acknowledge a completed guest write, discarding it.
    pub fn write_done(&mut self) -> bool {
        if self.state != HostFileState::WriteReady {
            log::warn!("host file: write_done ignored in state {}", self.state);
            return false;
        }
        self.write_name.clear();
        self.write_buf = Vec::new();
        self.state = HostFileState::Idle;
        true
    }

    /// Drop any session and buffered data.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn busy(&self) -> bool {
        self.guest_state() != HostFileState::Idle
    }

    fn command(&mut self, command: u8) {
        match command {
            cmd::OPEN_READ | cmd::OPEN_WRITE if self.busy() => {
                log::debug!("host file: open refused in state {}", self.guest_state());
                self.failed = true;
            }
            cmd::OPEN_READ => {
                self.read_name = std::mem::take(&mut self.name_buf);
                self.delivered = false;
                self.failed = false;
                self.state = HostFileState::WaitingRead;
                log::debug!("host file: guest requests {:?}", self.read_name);
            }
            cmd::OPEN_WRITE => {
                let name = std::mem::take(&mut self.name_buf);
                self.write_name = if name.is_empty() {
                    DEFAULT_WRITE_NAME.to_string()
                } else {
                    name
                };
                self.write_buf.clear();
                self.failed = false;
                self.state = HostFileState::Writing;
                log::debug!("host file: guest writing {:?}", self.write_name);
            }
            cmd::CLOSE_READ => {
                self.inbox.clear();
                self.delivered = false;
                if self.state == HostFileState::WaitingRead {
                    self.read_name.clear();
                    self.state = HostFileState::Idle;
                }
            }
            cmd::CLOSE_WRITE if self.state == HostFileState::Writing => {
                log::debug!(
                    "host file: {:?} ready ({} bytes)",
                    self.write_name,
                    self.write_buf.len()
                );
                self.state = HostFileState::WriteReady;
            }
            cmd::CLEAR_NAME => self.name_buf.clear(),
            _ => {}
        }
    }

    fn status(&self) -> u8 {
        let mut bits = 0;
        if !self.inbox.is_empty() {
            bits |= status::DATA_AVAILABLE;
        } else if self.delivered {
            bits |= status::END_OF_DATA;
        }
        if self.failed {
            bits |= status::FAILED;
        }
        if matches!(
            self.state,
            HostFileState::WaitingRead | HostFileState::WriteReady
        ) {
            bits |= status::WAITING_ON_HOST;
        }
        bits
    }

    /// Guest read of register `reg`.
    pub fn read_reg(&mut self, reg: u8) -> u8 {
        match reg {
            0 => self.guest_state() as u8,
            1 => self.name_buf.len() as u8,
            2 => self.inbox.pop_front().unwrap_or(EOF_BYTE),
            3 => self.status(),
            _ => 0xFF,
        }
    }

    /// Guest write of register `reg`.
    pub fn write_reg(&mut self, reg: u8, value: u8) {
        match reg {
            0 => self.command(value),
            1 => {
                if value != 0 && value.is_ascii() && self.name_buf.len() < MAX_NAME_LEN {
                    self.name_buf.push(value as char);
                }
            }
            2 if self.state == HostFileState::Writing => self.write_buf.push(value),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guest_name(bridge: &mut HostFileBridge, name: &str) {
        for b in name.bytes() {
            bridge.write_reg(1, b);
        }
    }

    #[test]
    fn test_state_codes() {
        assert_eq!(HostFileState::WriteReady as u8, 4);
        assert_eq!(HostFileState::try_from(2), Ok(HostFileState::Reading));
        assert_eq!(HostFileState::try_from(5), Err(5));
    }

    #[test]
    fn test_read_session() {
        let mut bridge = HostFileBridge::new();
        guest_name(&mut bridge, "HELLO.TXT");
        bridge.write_reg(0, cmd::OPEN_READ);
        assert_eq!(bridge.state(), HostFileState::WaitingRead);
        assert_eq!(bridge.read_name(), Some("HELLO.TXT"));
        assert_eq!(bridge.read_reg(3) & status::WAITING_ON_HOST, status::WAITING_ON_HOST);

        assert!(bridge.provide_data(b"hi"));
        assert_eq!(bridge.state(), HostFileState::Idle);
        assert_eq!(bridge.read_reg(0), HostFileState::Reading as u8);
        assert_eq!(bridge.read_reg(3), status::DATA_AVAILABLE);
        assert_eq!(bridge.read_reg(2), b'h');
        assert_eq!(bridge.read_reg(2), b'i');
        assert_eq!(bridge.read_reg(2), EOF_BYTE);
        assert_eq!(bridge.read_reg(3), status::END_OF_DATA);
        assert_eq!(bridge.read_reg(0), HostFileState::Idle as u8);
    }

    #[test]
    fn test_cancel_sets_failed() {
        let mut bridge = HostFileBridge::new();
        bridge.write_reg(0, cmd::OPEN_READ);
        assert!(bridge.cancel());
        assert_eq!(bridge.state(), HostFileState::Idle);
        assert_eq!(bridge.read_reg(3), status::FAILED);
        // Nothing to cancel any more.
        assert!(!bridge.cancel());
    }

    #[test]
    fn test_write_session_with_default_name() {
        let mut bridge = HostFileBridge::new();
        bridge.write_reg(0, cmd::OPEN_WRITE);
        assert_eq!(bridge.state(), HostFileState::Writing);
        for b in b"data" {
            bridge.write_reg(2, *b);
        }
        assert_eq!(bridge.write_name(), None);
        bridge.write_reg(0, cmd::CLOSE_WRITE);
        assert_eq!(bridge.state(), HostFileState::WriteReady);
        assert_eq!(bridge.write_name(), Some(DEFAULT_WRITE_NAME));
        assert_eq!(bridge.write_data(), Some(&b"data"[..]));

        assert!(bridge.write_done());
        assert_eq!(bridge.state(), HostFileState::Idle);
        assert_eq!(bridge.write_data(), None);
    }

    #[test]
    fn test_host_calls_ignored_when_idle() {
        let mut bridge = HostFileBridge::new();
        assert!(!bridge.provide_data(b"x"));
        assert!(!bridge.write_done());
        assert!(!bridge.cancel());
        assert_eq!(bridge.state(), HostFileState::Idle);
        assert_eq!(bridge.read_reg(2), EOF_BYTE);
    }

    #[test]
    fn test_second_open_refused() {
        let mut bridge = HostFileBridge::new();
        guest_name(&mut bridge, "A.COM");
        bridge.write_reg(0, cmd::OPEN_READ);
        guest_name(&mut bridge, "B.COM");
        bridge.write_reg(0, cmd::OPEN_WRITE);
        assert_eq!(bridge.state(), HostFileState::WaitingRead);
        assert_eq!(bridge.read_name(), Some("A.COM"));
        assert_ne!(bridge.read_reg(3) & status::FAILED, 0);
    }

    #[test]
    fn test_guest_close_read_abandons_request() {
        let mut bridge = HostFileBridge::new();
        bridge.write_reg(0, cmd::OPEN_READ);
        bridge.write_reg(0, cmd::CLOSE_READ);
        assert_eq!(bridge.state(), HostFileState::Idle);
        assert!(!bridge.provide_data(b"late"));
    }
}
