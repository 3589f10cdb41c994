//! Settings kept between sessions: the NVRAM boot setting and which
//! manifest-write warnings the user has silenced.

use std::path::Path;

use serde::{Deserialize, Serialize};

use romwbw_core::{EmuResult, Engine};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionState {
    /// Boot setting string, empty when NVRAM was never configured.
    pub nvram: String,
    pub suppress_all_warnings: bool,
    pub suppressed_units: Vec<usize>,
}

impl SessionState {
    /// Read the state file. A missing file is an empty state.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Push the saved settings into a freshly set up engine.
    pub fn apply(&self, engine: &mut Engine) -> EmuResult<()> {
        if !self.nvram.is_empty() {
            engine.set_nvram_setting(&self.nvram)?;
        }
        if self.suppress_all_warnings {
            engine.set_all_disk_warnings_suppressed(true);
        }
        for &unit in &self.suppressed_units {
            engine.set_disk_warning_suppressed(unit, true)?;
        }
        Ok(())
    }
}
