//! RomWBW CLI - Run a RomWBW machine in the terminal.
//!
//! Usage:
//!   romwbw [bundle.zip] [--rom FILE] [--disk [UNIT=]FILE ...] [options]
//!
//! Examples:
//!   romwbw cpm22.zip                          # ROM, disks and boot setting from a bundle
//!   romwbw --rom emu_avw.rom --disk hd1k.img  # Bare ROM plus one disk in unit 0
//!   romwbw cpm22.zip --disk 4=work.img --save-disks
//!   romwbw cpm22.zip --boot 0.1 --state romwbw.json
//!
//! Press Ctrl-C five times in a row to quit.

mod logger;
mod state;
mod transfer;

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use tokio::sync::mpsc as tokio_mpsc;

use romwbw_core::{
    load_bundle_from_path, BatchOutcome, Engine, EngineConfig, SharedEngine, MAX_UNITS,
};

use state::SessionState;
use transfer::FileTransfer;

/// Consecutive Ctrl-C presses that end the session.
const QUIT_PRESSES: u32 = 5;
const CTRL_C: u8 = 0x03;

/// RomWBW emulator CLI
#[derive(Parser, Debug)]
#[command(name = "romwbw")]
#[command(about = "Run a RomWBW HBIOS machine in the terminal")]
struct Args {
    /// Machine bundle (ZIP with bundle.json, ROM and disks)
    bundle: Option<PathBuf>,

    /// ROM image (replaces the bundle's ROM)
    #[arg(long, value_name = "FILE")]
    rom: Option<PathBuf>,

    /// Disk image, optionally prefixed with its unit number
    #[arg(long = "disk", value_name = "[UNIT=]FILE", value_parser = parse_disk)]
    disks: Vec<DiskArg>,

    /// NVRAM boot setting ("H" menu, ROM letter, "UNIT" or "UNIT.SLICE")
    #[arg(long, value_name = "SETTING")]
    boot: Option<String>,

    /// Engine config JSON
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory the guest reads host files from
    #[arg(long, value_name = "DIR", default_value = ".")]
    imports: PathBuf,

    /// Directory guest writes are stored in
    #[arg(long, value_name = "DIR", default_value = ".")]
    exports: PathBuf,

    /// Session state file (NVRAM setting, silenced warnings)
    #[arg(long, value_name = "FILE")]
    state: Option<PathBuf>,

    /// Write modified --disk images back on exit
    #[arg(long)]
    save_disks: bool,

    /// Stop warning about writes to bundle disks
    #[arg(long)]
    quiet_writes: bool,

    /// Enable debug logging (HBIOS calls, device commands)
    #[arg(short, long)]
    trace: bool,
}

#[derive(Debug, Clone)]
struct DiskArg {
    unit: Option<usize>,
    path: PathBuf,
}

fn parse_disk(s: &str) -> Result<DiskArg, String> {
    if let Some((unit, path)) = s.split_once('=') {
        if let Ok(unit) = unit.parse::<usize>() {
            if unit >= MAX_UNITS {
                return Err(format!("unit {} out of range (0-{})", unit, MAX_UNITS - 1));
            }
            return Ok(DiskArg {
                unit: Some(unit),
                path: PathBuf::from(path),
            });
        }
    }
    Ok(DiskArg {
        unit: None,
        path: PathBuf::from(s),
    })
}

/// Translate crossterm key events to the bytes a CP/M console expects.
fn translate_key(code: KeyCode, modifiers: KeyModifiers) -> Option<u8> {
    if modifiers.contains(KeyModifiers::CONTROL) {
        if let KeyCode::Char(c) = code {
            let upper = c.to_ascii_uppercase();
            if upper.is_ascii_uppercase() {
                return Some(upper as u8 - 64);
            }
        }
    }

    match code {
        KeyCode::Char(c) if c.is_ascii() => Some(c as u8),
        KeyCode::Enter => Some(13),
        KeyCode::Backspace => Some(8),
        KeyCode::Tab => Some(9),
        KeyCode::Esc => Some(27),
        KeyCode::Delete => Some(127),
        // WordStar cursor diamond
        KeyCode::Up => Some(0x05),
        KeyCode::Down => Some(0x18),
        KeyCode::Left => Some(0x13),
        KeyCode::Right => Some(0x04),
        _ => None,
    }
}

/// Build and initialise the engine from the command line.
/// Returns the engine plus the file behind each `--disk` unit.
fn build_engine(
    args: &Args,
) -> Result<(Engine, Vec<(usize, PathBuf)>), Box<dyn std::error::Error>> {
    let bundle = match &args.bundle {
        Some(path) => {
            let bundle = load_bundle_from_path(path)?;
            eprintln!("Loaded bundle: {} ({} disks)", bundle.manifest.name, bundle.disks.len());
            Some(bundle)
        }
        None => None,
    };

    let config = match (&args.config, &bundle) {
        (Some(path), _) => EngineConfig::from_path(path)?,
        (None, Some(bundle)) => bundle.config(),
        (None, None) => EngineConfig::default(),
    };
    let mut engine = Engine::new(config)?;

    match bundle {
        Some(bundle) => {
            bundle.install(&mut engine)?;
        }
        None if args.rom.is_none() => return Err("no bundle or --rom given".into()),
        None => {}
    }
    if let Some(path) = &args.rom {
        engine.load_rom(&std::fs::read(path)?)?;
    }

    let mut disk_files = Vec::new();
    for disk in &args.disks {
        let unit = match disk.unit {
            Some(unit) => unit,
            None => (0..MAX_UNITS)
                .find(|&u| !engine.is_disk_loaded(u))
                .ok_or("no free disk unit")?,
        };
        engine.load_disk(unit, std::fs::read(&disk.path)?)?;
        engine.set_disk_is_manifest(unit, false)?;
        eprintln!("Disk unit {}: {}", unit, disk.path.display());
        disk_files.push((unit, disk.path.clone()));
    }

    if !engine.is_ready() {
        engine.complete_init()?;
    }
    Ok((engine, disk_files))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    logger::init(args.trace)?;

    let (mut engine, disk_files) = build_engine(&args)?;

    let mut session = match &args.state {
        Some(path) => SessionState::load(path)?,
        None => SessionState::default(),
    };
    if args.quiet_writes {
        session.suppress_all_warnings = true;
    }
    session.apply(&mut engine)?;
    if let Some(boot) = &args.boot {
        engine.set_nvram_setting(boot)?;
    }

    for drive in engine.drive_map() {
        eprintln!("  {}: unit {} slice {}", drive.letter, drive.unit, drive.slice);
    }
    let boot = engine.nvram_setting();
    eprintln!(
        "Boot setting: {}",
        if boot.is_empty() { "(none)" } else { boot.as_str() }
    );

    engine.set_output_sink(|bytes: &[u8]| {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        let _ = handle.write_all(bytes);
        let _ = handle.flush();
    });

    let shared = SharedEngine::new(engine);
    shared.start();

    // Create shutdown signal
    let (shutdown_tx, mut shutdown_rx) = tokio_mpsc::channel::<()>(1);

    // Enable raw mode (gracefully handle non-TTY)
    let raw_mode_enabled = enable_raw_mode().is_ok();

    let transfer = FileTransfer::new(args.imports.clone(), args.exports.clone());
    let state_path = args.state.clone();
    let runner = shared.clone();

    // Spawn emulator in blocking task
    let emu_handle = tokio::task::spawn_blocking(move || -> romwbw_core::EmuResult<()> {
        while let Some(report) = runner.run_batch_report()? {
            runner.with(|engine| {
                transfer.service(engine);

                if let Some(unit) = engine.check_manifest_write_warning() {
                    eprint!(
                        "\r\n*** write to bundle disk in unit {} (changes are not kept; use --quiet-writes to silence)\r\n",
                        unit
                    );
                }

                if engine.nvram_has_change() {
                    session.nvram = engine.nvram_setting();
                    if let Some(path) = &state_path {
                        if let Err(e) = session.save(path) {
                            log::error!("cannot save {}: {}", path.display(), e);
                        }
                    }
                }
            })?;

            match report.outcome {
                BatchOutcome::WaitingForInput => std::thread::sleep(Duration::from_millis(10)),
                BatchOutcome::Halted => eprint!("\r\nGuest halted.\r\n"),
                _ => {}
            }
        }
        Ok(())
    });

    // Spawn terminal input reader
    let input = shared.clone();
    let input_handle = tokio::spawn(async move {
        let mut presses = 0u32;
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(10)) => {
                    // Poll for terminal events
                    if !event::poll(Duration::from_millis(0)).unwrap_or(false) {
                        continue;
                    }
                    let Ok(Event::Key(key_event)) = event::read() else {
                        continue;
                    };
                    if key_event.kind == KeyEventKind::Release {
                        continue;
                    }
                    let Some(ch) = translate_key(key_event.code, key_event.modifiers) else {
                        continue;
                    };
                    presses = if ch == CTRL_C { presses + 1 } else { 0 };
                    if presses >= QUIT_PRESSES {
                        input.stop();
                        break;
                    }
                    if input.queue_input(ch).is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Wait for emulator to finish
    let result = emu_handle.await?;

    // Signal input handler to stop
    let _ = shutdown_tx.send(()).await;
    let _ = input_handle.await;

    // Disable raw mode if we enabled it
    if raw_mode_enabled {
        let _ = disable_raw_mode();
    }

    if let Err(e) = result {
        eprintln!("\nError: {}", e);
    }

    let engine = shared.into_inner()?;
    if args.save_disks {
        for (unit, path) in &disk_files {
            if !engine.is_disk_dirty(*unit) {
                continue;
            }
            if let Some(data) = engine.disk_data(*unit) {
                std::fs::write(path, data)?;
                eprintln!("Saved unit {} to {}", unit, path.display());
            }
        }
    }
    let stats = engine.stats();
    log::info!(
        "{} instructions, {} T-states in {} batches",
        stats.instructions,
        stats.t_states,
        stats.batches
    );
    engine.destroy();

    Ok(())
}
