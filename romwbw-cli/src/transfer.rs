//! Serves guest host-file requests from local directories.

use std::path::{Path, PathBuf};

use romwbw_core::{Engine, HostFileState};

/// What one servicing pass did.
#[derive(Debug, PartialEq, Eq)]
pub enum TransferEvent {
    /// A file was delivered to the guest.
    Served { file: PathBuf, bytes: usize },
    /// The guest's request could not be met.
    Cancelled { name: String },
    /// A guest write was stored.
    Saved { file: PathBuf, bytes: usize },
    /// A guest write could not be stored and was dropped.
    Dropped { name: String },
}

pub struct FileTransfer {
    imports: PathBuf,
    exports: PathBuf,
}

/// Keep only the final path component of a guest-supplied name.
fn plain_name(name: &str) -> Option<&str> {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
}

impl FileTransfer {
    pub fn new(imports: PathBuf, exports: PathBuf) -> Self {
        Self { imports, exports }
    }

    /// Look up `name` in the imports directory: an exact (case-insensitive)
    /// match, else the first file in name order.
    fn find_import(&self, name: &str) -> std::io::Result<Option<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.imports)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        let wanted = plain_name(name).map(str::to_ascii_lowercase);
        let exact = wanted.and_then(|wanted| {
            files.iter().find(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.to_ascii_lowercase() == wanted)
            })
        });
        Ok(exact.or(files.first()).cloned())
    }

    /// Handle a pending request, if any. Call between batches.
    pub fn service(&self, engine: &mut Engine) -> Option<TransferEvent> {
        match engine.host_file_state() {
            HostFileState::WaitingRead => Some(self.serve_read(engine)),
            HostFileState::WriteReady => Some(self.store_write(engine)),
            _ => None,
        }
    }

    fn serve_read(&self, engine: &mut Engine) -> TransferEvent {
        let name = engine.host_file_read_name().unwrap_or_default().to_string();
        let found = self.find_import(&name).and_then(|file| match file {
            Some(file) => std::fs::read(&file).map(|data| Some((file, data))),
            None => Ok(None),
        });
        match found {
            Ok(Some((file, data))) => {
                engine.provide_host_file_data(&data);
                log::info!("sent {} ({} bytes) for {:?}", file.display(), data.len(), name);
                TransferEvent::Served {
                    file,
                    bytes: data.len(),
                }
            }
            Ok(None) => {
                log::warn!("no file in {} for {:?}", self.imports.display(), name);
                engine.host_file_cancel();
                TransferEvent::Cancelled { name }
            }
            Err(e) => {
                log::warn!("cannot read import for {:?}: {}", name, e);
                engine.host_file_cancel();
                TransferEvent::Cancelled { name }
            }
        }
    }

    fn store_write(&self, engine: &mut Engine) -> TransferEvent {
        let name = engine.host_file_write_name().unwrap_or_default().to_string();
        let data = engine.host_file_write_data().unwrap_or_default().to_vec();
        let event = match plain_name(&name) {
            Some(plain) => {
                let file = self.exports.join(plain);
                match std::fs::write(&file, &data) {
                    Ok(()) => {
                        log::info!("received {} ({} bytes)", file.display(), data.len());
                        TransferEvent::Saved {
                            file,
                            bytes: data.len(),
                        }
                    }
                    Err(e) => {
                        log::error!("cannot write {}: {}", file.display(), e);
                        TransferEvent::Dropped { name }
                    }
                }
            }
            None => {
                log::error!("guest wrote a file with an unusable name {:?}", name);
                TransferEvent::Dropped { name }
            }
        };
        engine.host_file_write_done();
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use romwbw_core::EngineConfig;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("romwbw-xfer-{}-{}", std::process::id(), name));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Guest program: send `name` to the filename register, then issue `command`.
    fn engine_issuing(name: &str, command: u8) -> Engine {
        let mut rom = vec![0u8; 0x8000];
        let mut program = Vec::new();
        for b in name.bytes() {
            program.extend_from_slice(&[0x3E, b, 0xD3, 0xB1]);
        }
        program.extend_from_slice(&[0x3E, command, 0xD3, 0xB0]);
        if command == 0x02 {
            // Two data bytes, then close.
            program.extend_from_slice(&[0x3E, b'h', 0xD3, 0xB2, 0x3E, b'i', 0xD3, 0xB2]);
            program.extend_from_slice(&[0x3E, 0x04, 0xD3, 0xB0]);
        }
        program.push(0x76);
        rom[..program.len()].copy_from_slice(&program);

        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        engine.load_rom(&rom).unwrap();
        engine.complete_init().unwrap();
        engine.run_batch();
        engine
    }

    #[test]
    fn test_serves_exact_match() {
        let dir = temp_dir("exact");
        std::fs::write(dir.join("a.txt"), b"first").unwrap();
        std::fs::write(dir.join("hello.txt"), b"hello").unwrap();

        let mut engine = engine_issuing("HELLO.TXT", 0x01);
        assert_eq!(engine.host_file_state(), HostFileState::WaitingRead);
        let xfer = FileTransfer::new(dir.clone(), dir.clone());
        assert_eq!(
            xfer.service(&mut engine),
            Some(TransferEvent::Served {
                file: dir.join("hello.txt"),
                bytes: 5
            })
        );
        assert_eq!(engine.host_file_state(), HostFileState::Idle);
        assert_eq!(xfer.service(&mut engine), None);
    }

    #[test]
    fn test_falls_back_to_first_file() {
        let dir = temp_dir("first");
        std::fs::write(dir.join("b.bin"), b"bb").unwrap();
        std::fs::write(dir.join("a.bin"), b"a").unwrap();

        let mut engine = engine_issuing("OTHER.COM", 0x01);
        let xfer = FileTransfer::new(dir.clone(), dir.clone());
        assert_eq!(
            xfer.service(&mut engine),
            Some(TransferEvent::Served {
                file: dir.join("a.bin"),
                bytes: 1
            })
        );
    }

    #[test]
    fn test_cancels_when_nothing_to_send() {
        let dir = temp_dir("empty");
        let mut engine = engine_issuing("X.COM", 0x01);
        let xfer = FileTransfer::new(dir.join("absent"), dir);
        assert_eq!(
            xfer.service(&mut engine),
            Some(TransferEvent::Cancelled {
                name: "X.COM".into()
            })
        );
        assert_eq!(engine.host_file_state(), HostFileState::Idle);
    }

    #[test]
    fn test_stores_guest_write() {
        let dir = temp_dir("write");
        let mut engine = engine_issuing("../OUT.TXT", 0x02);
        assert_eq!(engine.host_file_state(), HostFileState::WriteReady);

        let xfer = FileTransfer::new(dir.clone(), dir.clone());
        assert_eq!(
            xfer.service(&mut engine),
            Some(TransferEvent::Saved {
                file: dir.join("OUT.TXT"),
                bytes: 2
            })
        );
        assert_eq!(std::fs::read(dir.join("OUT.TXT")).unwrap(), b"hi");
        assert_eq!(engine.host_file_state(), HostFileState::Idle);
    }
}
