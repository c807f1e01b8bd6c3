//! Bank profiles: the mission and disposition a bank's pipeline runs under.
//!
//! Profile management itself belongs to the host application; the engine
//! only receives a profile with every call.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::agent::Disposition;
use crate::error::{ConfigError, ModelError};

/// Mission and disposition of one bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankProfile {
    pub bank_id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Free-text purpose driving structural derivation.
    #[serde(default)]
    pub mission: Option<String>,
    #[serde(default)]
    pub disposition: Disposition,
}

impl BankProfile {
    pub fn new(bank_id: impl Into<String>) -> Self {
        Self {
            bank_id: bank_id.into(),
            name: None,
            mission: None,
            disposition: Disposition::default(),
        }
    }

    pub fn with_mission(mut self, mission: impl Into<String>) -> Self {
        self.mission = Some(mission.into());
        self
    }

    pub fn with_disposition(mut self, disposition: Disposition) -> Self {
        self.disposition = disposition;
        self
    }

    /// Mission text, `None` when absent or blank.
    pub fn mission(&self) -> Option<&str> {
        self.mission.as_deref().map(str::trim).filter(|m| !m.is_empty())
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.bank_id.trim().is_empty() {
            return Err(ModelError::Validation {
                field: "bank_id".into(),
                message: "bank id must not be empty".into(),
            });
        }
        self.disposition.validate()
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_mission_is_none() {
        let p = BankProfile::new("b").with_mission("   ");
        assert_eq!(p.mission(), None);
        let p = BankProfile::new("b").with_mission(" Be a PM ");
        assert_eq!(p.mission(), Some("Be a PM"));
    }

    #[test]
    fn profile_parses_from_toml() {
        let p: BankProfile = toml::from_str(
            "bank_id = \"acme\"\nmission = \"Be a PM\"\n[disposition]\nskepticism = 5\n",
        )
        .unwrap();
        assert_eq!(p.disposition.skepticism, 5);
        assert_eq!(p.disposition.empathy, 3);
        assert!(p.validate().is_ok());
    }
}
