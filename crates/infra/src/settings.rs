//! Runtime settings.
//!
//! Sources, later ones winning: defaults, an optional `forgewms.toml` (or the
//! file passed in), then `FORGEWMS_*` environment variables with `__` as the
//! section separator (`FORGEWMS_LOG__JSON=false`).

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use forgewms_observability::LogConfig;

pub const DEFAULT_FILE: &str = "forgewms.toml";
pub const ENV_PREFIX: &str = "FORGEWMS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumberingSettings {
    /// Digits of the zero-padded sequence segment.
    pub sequence_width: usize,
}

impl Default for NumberingSettings {
    fn default() -> Self {
        Self { sequence_width: 4 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationSettings {
    /// Actor recorded on history entries written by transfer automation.
    pub system_actor: String,
    /// Destination location that auto-created transfer receipts stage into.
    pub receiving_location: String,
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            system_actor: "system".to_string(),
            receiving_location: "RECEIVING".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub publish_events: bool,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            publish_events: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log: LogConfig,
    pub numbering: NumberingSettings,
    pub automation: AutomationSettings,
    pub bus: BusSettings,
}

impl Settings {
    /// Load from `forgewms.toml` in the working directory (if present) and
    /// the environment.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Path::new(DEFAULT_FILE))
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to read settings from {}", path.display()))?;

        let parsed: Settings = settings
            .try_deserialize()
            .context("failed to deserialize settings")?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Install the tracing subscriber described by `log`.
    pub fn init_logging(&self) {
        forgewms_observability::init_with(&self.log);
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !(1..=9).contains(&self.numbering.sequence_width) {
            anyhow::bail!(
                "numbering.sequence_width must be between 1 and 9, got {}",
                self.numbering.sequence_width
            );
        }
        if self.automation.system_actor.trim().is_empty() {
            anyhow::bail!("automation.system_actor cannot be empty");
        }
        if self.automation.receiving_location.trim().is_empty() {
            anyhow::bail!("automation.receiving_location cannot be empty");
        }
        Ok(())
    }
}
