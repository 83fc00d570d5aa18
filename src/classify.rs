use crate::settings::ColorSettings;
use serde::{Deserialize, Serialize};

/// Maps a temperature to a status colour. Implementations must be pure.
pub trait ColorClassifier: Send + Sync {
    fn status(&self, temperature: f64) -> StatusLevel;

    fn color_for(&self, status: StatusLevel) -> String;

    fn classify(&self, temperature: f64) -> String {
        self.color_for(self.status(temperature))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Normal,
    Warn,
    Critical,
    Disconnect,
}

impl StatusLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusLevel::Normal => "normal",
            StatusLevel::Warn => "warn",
            StatusLevel::Critical => "critical",
            StatusLevel::Disconnect => "disconnect",
        }
    }

    fn priority(&self) -> u8 {
        match self {
            StatusLevel::Normal => 1,
            StatusLevel::Warn => 2,
            StatusLevel::Critical => 3,
            StatusLevel::Disconnect => 4,
        }
    }

    /// Most severe status of the set, `Normal` when empty.
    pub fn worst<I: IntoIterator<Item = StatusLevel>>(statuses: I) -> StatusLevel {
        statuses
            .into_iter()
            .max_by_key(|s| s.priority())
            .unwrap_or(StatusLevel::Normal)
    }
}

/// Fixed-threshold classifier: `<= normal_max` is normal, `<= warn_max` is
/// warn, anything hotter is critical. Values at or below the sensor's
/// disconnect sentinel and non-finite values are reported as disconnected.
#[derive(Debug, Clone)]
pub struct ThresholdClassifier {
    settings: ColorSettings,
}

impl ThresholdClassifier {
    pub fn new(settings: ColorSettings) -> Self {
        Self { settings }
    }
}

impl Default for ThresholdClassifier {
    fn default() -> Self {
        Self::new(ColorSettings::default())
    }
}

impl ColorClassifier for ThresholdClassifier {
    fn status(&self, temperature: f64) -> StatusLevel {
        if !temperature.is_finite() || temperature <= self.settings.disconnect_sentinel {
            return StatusLevel::Disconnect;
        }
        if temperature <= self.settings.normal_max {
            StatusLevel::Normal
        } else if temperature <= self.settings.warn_max {
            StatusLevel::Warn
        } else {
            StatusLevel::Critical
        }
    }

    fn color_for(&self, status: StatusLevel) -> String {
        let hex = match status {
            StatusLevel::Normal => &self.settings.normal_color,
            StatusLevel::Warn => &self.settings.warn_color,
            StatusLevel::Critical => &self.settings.critical_color,
            StatusLevel::Disconnect => &self.settings.disconnect_color,
        };
        hex.to_lowercase()
    }
}
