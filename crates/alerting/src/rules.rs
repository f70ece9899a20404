//! Anomaly rules

use obd_protocol::Pid;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rule configuration problems
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleError {
    #[error("Rule name must not be empty")]
    EmptyName,

    #[error("Rule {name} has a non-finite threshold")]
    InvalidThreshold { name: String },

    #[error("Duplicate rule name {0}")]
    Duplicate(String),
}

/// How serious an anomaly is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

/// Which side of the threshold is anomalous
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Above,
    Below,
}

/// A threshold check on one PID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRule {
    /// Unique key used for cooldown tracking
    pub name: String,
    pub pid: Pid,
    pub comparison: Comparison,
    pub threshold: f64,
    pub severity: Severity,
    /// Text shown to the driver
    pub message: String,
}

impl AnomalyRule {
    /// Coolant above 110 °C
    pub fn overheating() -> Self {
        Self {
            name: "engine_overheating".to_string(),
            pid: Pid::CoolantTemp,
            comparison: Comparison::Above,
            threshold: 110.0,
            severity: Severity::Critical,
            message: "Engine overheating detected".to_string(),
        }
    }

    /// Check whether `value` trips the rule; the threshold itself does not
    pub fn is_triggered(&self, value: f64) -> bool {
        match self.comparison {
            Comparison::Above => value > self.threshold,
            Comparison::Below => value < self.threshold,
        }
    }
}

/// Reject rule sets the manager cannot key by name
pub fn validate_rules(rules: &[AnomalyRule]) -> Result<(), RuleError> {
    let mut seen: Vec<&str> = Vec::with_capacity(rules.len());
    for rule in rules {
        if rule.name.trim().is_empty() {
            return Err(RuleError::EmptyName);
        }
        if !rule.threshold.is_finite() {
            return Err(RuleError::InvalidThreshold {
                name: rule.name.clone(),
            });
        }
        if seen.contains(&rule.name.as_str()) {
            return Err(RuleError::Duplicate(rule.name.clone()));
        }
        seen.push(&rule.name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overheating_threshold_is_exclusive() {
        let rule = AnomalyRule::overheating();
        assert!(!rule.is_triggered(110.0));
        assert!(rule.is_triggered(110.5));
        assert!(!rule.is_triggered(90.0));
    }

    #[test]
    fn test_below_rule() {
        let rule = AnomalyRule {
            name: "low_voltage".to_string(),
            pid: Pid::ControlModuleVoltage,
            comparison: Comparison::Below,
            threshold: 11.5,
            severity: Severity::Warning,
            message: "Battery voltage low".to_string(),
        };
        assert!(rule.is_triggered(11.0));
        assert!(!rule.is_triggered(13.8));
    }

    #[test]
    fn test_validate_rules() {
        let rule = AnomalyRule::overheating();
        assert!(validate_rules(&[rule.clone()]).is_ok());
        assert_eq!(
            validate_rules(&[rule.clone(), rule.clone()]),
            Err(RuleError::Duplicate("engine_overheating".to_string()))
        );

        let broken = AnomalyRule {
            threshold: f64::NAN,
            ..rule
        };
        assert!(matches!(
            validate_rules(&[broken]),
            Err(RuleError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_rule_deserializes_from_config_shape() {
        let rule: AnomalyRule = serde_json::from_value(serde_json::json!({
            "name": "hot_intake",
            "pid": "010F",
            "comparison": "above",
            "threshold": 60.0,
            "severity": "warning",
            "message": "Intake air hot"
        }))
        .unwrap();
        assert_eq!(rule.pid, Pid::IntakeTemp);
        assert_eq!(rule.severity, Severity::Warning);
    }
}
