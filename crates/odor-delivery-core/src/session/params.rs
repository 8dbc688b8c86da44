//! Session parameters
//!
//! Everything the caller resolves before a session starts. Validated once,
//! at construction, and immutable afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use super::ConfigError;

/// Physical odor panel (each wired to its own board)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Panel {
    /// 1% dilution panel
    #[serde(rename = "1%", alias = "1")]
    OnePercent,
    /// 10% dilution panel
    #[serde(rename = "10%", alias = "10")]
    TenPercent,
}

impl Panel {
    /// Both panels
    pub const ALL: [Panel; 2] = [Panel::OnePercent, Panel::TenPercent];

    /// Label used in file headers
    pub fn label(&self) -> &'static str {
        match self {
            Panel::OnePercent => "1%",
            Panel::TenPercent => "10%",
        }
    }

    /// Serial port the panel's board is attached to
    #[cfg(windows)]
    pub fn port_name(&self) -> &'static str {
        match self {
            Panel::OnePercent => "COM8",
            Panel::TenPercent => "COM7",
        }
    }

    /// Serial port the panel's board is attached to
    #[cfg(not(windows))]
    pub fn port_name(&self) -> &'static str {
        match self {
            Panel::OnePercent => "/dev/ttyACM0",
            Panel::TenPercent => "/dev/ttyACM1",
        }
    }
}

impl fmt::Display for Panel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Panel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1%" | "1" => Ok(Panel::OnePercent),
            "10%" | "10" => Ok(Panel::TenPercent),
            other => Err(ConfigError::UnknownPanel(other.to_string())),
        }
    }
}

/// Identifying metadata, used only to name output files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Experiment date
    pub date: String,
    /// Animal / subject identifier
    pub subject_id: String,
    /// Region-of-interest label
    pub roi: String,
}

impl SessionMetadata {
    /// Create metadata (validated when the params are built)
    pub fn new(
        date: impl Into<String>,
        subject_id: impl Into<String>,
        roi: impl Into<String>,
    ) -> Self {
        Self {
            date: date.into(),
            subject_id: subject_id.into(),
            roi: roi.into(),
        }
    }

    /// `{date}_{subject}_{roi}`
    pub fn file_stem(&self) -> String {
        format!("{}_{}_{}", self.date, self.subject_id, self.roi)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("date", &self.date),
            ("subject_id", &self.subject_id),
            ("roi", &self.roi),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyField { field });
            }
            if value.contains(['/', '\\']) {
                return Err(ConfigError::PathInField {
                    field,
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Validated, immutable settings for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedParams")]
pub struct SessionParams {
    panel: Panel,
    odor_duration_s: u32,
    delay_s: u32,
    output_dir: PathBuf,
    metadata: SessionMetadata,
}

/// Wire shape of [`SessionParams`] before validation
#[derive(Deserialize)]
struct UncheckedParams {
    panel: Panel,
    odor_duration_s: u32,
    delay_s: u32,
    output_dir: PathBuf,
    metadata: SessionMetadata,
}

impl TryFrom<UncheckedParams> for SessionParams {
    type Error = ConfigError;

    fn try_from(raw: UncheckedParams) -> Result<Self, Self::Error> {
        SessionParams::new(
            raw.panel,
            raw.odor_duration_s,
            raw.delay_s,
            raw.output_dir,
            raw.metadata,
        )
    }
}

impl SessionParams {
    /// Build and validate session parameters
    pub fn new(
        panel: Panel,
        odor_duration_s: u32,
        delay_s: u32,
        output_dir: impl Into<PathBuf>,
        metadata: SessionMetadata,
    ) -> Result<Self, ConfigError> {
        if odor_duration_s == 0 {
            return Err(ConfigError::NonPositiveSeconds {
                field: "odor_duration_s",
            });
        }
        if delay_s == 0 {
            return Err(ConfigError::NonPositiveSeconds { field: "delay_s" });
        }
        metadata.validate()?;

        Ok(Self {
            panel,
            odor_duration_s,
            delay_s,
            output_dir: output_dir.into(),
            metadata,
        })
    }

    /// Load parameters from a JSON settings file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Selected panel
    pub fn panel(&self) -> Panel {
        self.panel
    }

    /// Odor-on duration in seconds
    pub fn odor_duration_s(&self) -> u32 {
        self.odor_duration_s
    }

    /// Inter-trial delay in seconds
    pub fn delay_s(&self) -> u32 {
        self.delay_s
    }

    /// Directory receiving the order and timings files
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Identifying metadata
    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }
}

/// Ordered odor identifiers, one per trial
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialSpec(Arc<[u8]>);

impl TrialSpec {
    /// Build a trial sequence; every odor id must be positive
    pub fn new(odors: Vec<u8>) -> Result<Self, ConfigError> {
        if let Some(i) = odors.iter().position(|&o| o == 0) {
            return Err(ConfigError::ZeroOdor { trial: i + 1 });
        }
        Ok(Self(odors.into()))
    }

    /// Number of trials
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no trials
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Odor for trial `index` (zero-based)
    pub fn get(&self, index: usize) -> Option<u8> {
        self.0.get(index).copied()
    }

    /// Iterate odors in trial order
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.iter().copied()
    }

    /// The odors as a slice
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

/// Parses a comma- or whitespace-separated list such as `"1,2,1"`
impl FromStr for TrialSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let odors = s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .map(|t| {
                t.parse::<u8>()
                    .map_err(|_| ConfigError::InvalidOdor(t.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        TrialSpec::new(odors)
    }
}
