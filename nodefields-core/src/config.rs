//! Policy knobs for entry fields, loadable from TOML.

use crate::history::DEFAULT_PASSWORD_HISTORY_MAX;
use crate::otp::carriers::{OtpSource, DEFAULT_OTP_PRECEDENCE};
use crate::{NodeFieldsError, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default lookahead for `nearly_expired`.
pub const DEFAULT_NEARLY_EXPIRED_WINDOW_DAYS: i64 = 14;
/// Upper bound for the lookahead (100 years).
pub const MAX_NEARLY_EXPIRED_WINDOW_DAYS: i64 = 36_500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldsConfig {
    pub nearly_expired_window_days: i64,
    pub password_history_max: usize,
    pub password_history_enabled: bool,
    /// Extractor order used when deriving the entry's OTP configuration.
    pub otp_precedence: Vec<OtpSource>,
}

impl Default for FieldsConfig {
    fn default() -> Self {
        Self {
            nearly_expired_window_days: DEFAULT_NEARLY_EXPIRED_WINDOW_DAYS,
            password_history_max: DEFAULT_PASSWORD_HISTORY_MAX,
            password_history_enabled: true,
            otp_precedence: DEFAULT_OTP_PRECEDENCE.to_vec(),
        }
    }
}

impl FieldsConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| NodeFieldsError::Config(e.to_string()))?;
        if !(0..=MAX_NEARLY_EXPIRED_WINDOW_DAYS).contains(&config.nearly_expired_window_days) {
            return Err(NodeFieldsError::Config(format!(
                "nearly_expired_window_days must be between 0 and {}",
                MAX_NEARLY_EXPIRED_WINDOW_DAYS
            )));
        }
        Ok(config)
    }

    /// The lookahead, clamped to the accepted range for hand-built configs.
    pub fn nearly_expired_window(&self) -> Duration {
        Duration::days(
            self.nearly_expired_window_days
                .clamp(0, MAX_NEARLY_EXPIRED_WINDOW_DAYS),
        )
    }
}
