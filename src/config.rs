//! Compensator configuration

use crate::{ConfigError, WireFormat};
use serde::{Deserialize, Serialize};

/// How [`TransactionContext::compensate`](crate::TransactionContext::compensate)
/// treats a trigger with nothing registered
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationMode {
    /// Missing registration is a no-op (already compensated or never started)
    #[default]
    Lenient,
    /// Missing registration is a protocol violation
    Strict,
}

/// Participant-level settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompensatorConfig {
    /// Name of this participant, attached to log spans
    pub service_name: Box<str>,
    /// Whether an unregistered compensation request is an error
    pub compensation_mode: CompensationMode,
    /// Frame format of participants built with [`Compensator::framed`](crate::Compensator::framed)
    pub wire_format: WireFormat,
}

impl Default for CompensatorConfig {
    fn default() -> Self {
        Self {
            service_name: "saga-participant".into(),
            compensation_mode: CompensationMode::Lenient,
            wire_format: WireFormat::Text,
        }
    }
}

impl CompensatorConfig {
    /// Parse a JSON document; absent keys keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no participant can run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::EmptyServiceName);
        }
        Ok(())
    }
}
