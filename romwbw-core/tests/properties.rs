//! Property tests for the guarantees the host relies on.

use proptest::prelude::*;

use romwbw_core::disk::DiskController;
use romwbw_core::nvram::Nvram;
use romwbw_core::{BatchOutcome, BootOption, Engine, EngineConfig};

const SECTOR: usize = 512;

fn boot_option() -> impl Strategy<Value = BootOption> {
    prop_oneof![
        Just(BootOption::Menu),
        prop::sample::select(('A'..='Z').filter(|c| *c != 'H').collect::<Vec<_>>())
            .prop_map(BootOption::Rom),
        (0u8..16, 0u8..128).prop_map(|(unit, slice)| BootOption::Disk { unit, slice }),
    ]
}

proptest! {
    #[test]
    fn prop_disk_read_after_write(
        unit in 0usize..16,
        sectors in 1usize..8,
        lba_seed in any::<u32>(),
        payload in prop::collection::vec(any::<u8>(), SECTOR),
    ) {
        let mut disks = DiskController::new(SECTOR, 16_384, true);
        disks.load(unit, vec![0xE5; sectors * SECTOR]).unwrap();
        let lba = lba_seed % sectors as u32;

        prop_assert!(!disks.is_dirty(unit));
        disks.write_sector(unit, lba, &payload).unwrap();
        prop_assert_eq!(disks.read_sector(unit, lba).unwrap(), payload.as_slice());
        prop_assert!(disks.is_dirty(unit));

        disks.clear_dirty(unit);
        prop_assert!(!disks.is_dirty(unit));
        // Past the end is refused and leaves the image alone.
        prop_assert!(disks.write_sector(unit, sectors as u32, &payload).is_err());
        prop_assert!(!disks.is_dirty(unit));
    }

    #[test]
    fn prop_nvram_setting_round_trip(option in boot_option()) {
        let mut nvram = Nvram::new();
        let text = option.to_string();
        nvram.set_setting(&text).unwrap();

        prop_assert_eq!(nvram.setting(), text.clone());
        prop_assert_eq!(nvram.boot_option(), Some(option));
        prop_assert!(nvram.is_valid());
        prop_assert!(nvram.has_change());
        prop_assert!(!nvram.has_change());

        let mut restored = Nvram::new();
        restored.load_bytes(&nvram.to_bytes()).unwrap();
        prop_assert_eq!(restored.setting(), text);
        prop_assert!(!restored.has_change());
    }

    #[test]
    fn prop_bad_setting_leaves_record(bad in "[0-9]{1,2}\\.[2-9][0-9]{3}|[!-/]{1,3}|1[6-9]") {
        let mut nvram = Nvram::new();
        nvram.set_setting("3.1").unwrap();
        nvram.has_change();
        prop_assert!(nvram.set_setting(&bad).is_err());
        prop_assert_eq!(nvram.setting(), "3.1");
        prop_assert!(!nvram.has_change());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_batch_stays_within_budget(
        code in prop::collection::vec(any::<u8>(), 1..512),
        budget in 1u32..5_000,
    ) {
        let mut rom = vec![0u8; 0x8000];
        rom[..code.len()].copy_from_slice(&code);

        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        engine.load_rom(&rom).unwrap();
        engine.complete_init().unwrap();

        for _ in 0..4 {
            let report = engine.run_for(budget);
            prop_assert!(report.executed <= budget);
            if report.outcome == BatchOutcome::Halted {
                prop_assert!(!engine.run_batch());
                break;
            }
        }
    }
}
