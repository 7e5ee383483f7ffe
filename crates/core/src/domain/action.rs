use serde::{Deserialize, Serialize};

use crate::errors::PolicyError;

/// Identifier of the remediation action a workflow gates. The action record
/// itself lives with the remediation subsystem; the engine only holds this
/// reference plus the risk snapshot taken at workflow creation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" => Some(Self::Development),
            "staging" => Some(Self::Staging),
            "production" => Some(Self::Production),
            _ => None,
        }
    }

    pub fn from_input(value: &str) -> Result<Self, PolicyError> {
        Self::parse(value).ok_or_else(|| PolicyError::InvalidPolicyInput {
            field: "environment".to_owned(),
            value: value.to_owned(),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerCriticality {
    Low,
    Medium,
    High,
    Critical,
}

impl ServerCriticality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn from_input(value: &str) -> Result<Self, PolicyError> {
        Self::parse(value).ok_or_else(|| PolicyError::InvalidPolicyInput {
            field: "server_criticality".to_owned(),
            value: value.to_owned(),
        })
    }
}

/// Risk score snapshot, fixed at workflow creation. Construction is the only
/// range check in the engine; everything downstream can rely on 0..=100.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct RiskScore(u8);

impl RiskScore {
    pub fn new(value: i64) -> Result<Self, PolicyError> {
        if (0..=100).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(PolicyError::InvalidRiskScore { risk_score: value })
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for RiskScore {
    type Error = PolicyError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RiskScore> for u8 {
    fn from(value: RiskScore) -> Self {
        value.0
    }
}
