// ⚙️ Settings - run configuration
//
// Loaded once per run from a TOML file with environment overrides, then
// passed down explicitly. Every field has a default, so a missing file is a
// valid configuration: notifications off, standard paths.

use crate::parser::DEFAULT_SHENZHEN_MARKERS;
use crate::reconciliation::MergePrecedence;
use crate::summary::SummaryOptions;
use crate::table::ColumnOrder;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "config/settings.toml";
pub const DEFAULT_WEBHOOK_ENDPOINT: &str = "http://www.pushplus.plus/send";

/// File locations
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub input_dir: PathBuf,
    pub template: PathBuf,
    pub output: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("input"),
            template: PathBuf::from("config/fund_list.xlsx"),
            output: PathBuf::from("output/collateral_rates.xlsx"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    /// Filename fragments that mark a Shenzhen file
    pub shenzhen_markers: Vec<String>,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            shenzhen_markers: DEFAULT_SHENZHEN_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MergeSettings {
    pub precedence: MergePrecedence,
    /// Append template funds missing from a loaded table
    pub sync_template_funds: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ColumnSettings {
    pub order: ColumnOrder,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NotifySettings {
    pub enabled: bool,
    /// Recipient token / channel id understood by the endpoint
    pub target: String,
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            target: String::new(),
            endpoint: DEFAULT_WEBHOOK_ENDPOINT.to_string(),
            timeout_secs: 10,
        }
    }
}

/// Complete settings for one run
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub paths: PathSettings,
    pub exchange: ExchangeSettings,
    pub merge: MergeSettings,
    pub columns: ColumnSettings,
    pub summary: SummaryOptions,
    pub notify: NotifySettings,
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

impl Settings {
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load settings, falling back to defaults.
    ///
    /// A missing file is silent; an unreadable or malformed one is logged.
    /// Either way notifications end up disabled unless something enables them.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(config = %path.display(), error = %e, "cannot read config; using defaults");
                return Self::default();
            }
        };

        match Self::from_toml(&content) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(config = %path.display(), error = %e, "invalid config; using defaults");
                Self::default()
            }
        }
    }

    /// Apply `ETF_RATES_*` environment overrides
    pub fn with_env_override(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Same as [`Settings::with_env_override`] with an injectable lookup
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup("ETF_RATES_NOTIFY") {
            match parse_bool(&value) {
                Some(enabled) => self.notify.enabled = enabled,
                None => {
                    warn!(
                        value = %value,
                        "ETF_RATES_NOTIFY is not a boolean; notifications disabled"
                    );
                    self.notify.enabled = false;
                }
            }
        }

        if let Some(target) = lookup("ETF_RATES_NOTIFY_TARGET") {
            self.notify.target = target;
        }

        if let Some(order) = lookup("ETF_RATES_COLUMN_ORDER") {
            match order.parse() {
                Ok(order) => self.columns.order = order,
                Err(e) => warn!(error = %e, "ignoring ETF_RATES_COLUMN_ORDER"),
            }
        }

        self
    }

    /// Notifications go out only when enabled and a target is set
    pub fn notifications_active(&self) -> bool {
        self.notify.enabled && !self.notify.target.trim().is_empty()
    }
}
