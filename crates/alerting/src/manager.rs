//! Alert Manager Implementation

use metrics::counter;
use obd_protocol::Pid;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::rules::{validate_rules, AnomalyRule, RuleError, Severity};
use telemetry_store::TelemetrySnapshot;

/// Alert configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Same-rule anomalies inside this window are dropped (milliseconds)
    pub cooldown_ms: u64,
    /// Raised anomalies kept before the oldest are discarded
    pub max_retained: usize,
    pub rules: Vec<AnomalyRule>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 5000,
            max_retained: 200,
            rules: vec![AnomalyRule::overheating()],
        }
    }
}

/// One raised anomaly
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    pub id: u64,
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub pid: Pid,
    pub value: f64,
    pub timestamp_ms: u64,
    pub acknowledged: bool,
}

/// State of an alert
#[derive(Debug, Clone)]
pub struct AlertState {
    /// Last time this rule fired (Unix ms)
    pub last_fired_ms: u64,
    /// Number of times fired
    pub fire_count: usize,
}

/// Rule evaluation with per-rule cooldown
pub struct AlertManager {
    config: AlertConfig,
    /// Alert states by rule name
    states: HashMap<String, AlertState>,
    anomalies: Vec<Anomaly>,
    next_id: u64,
    /// Newest sample time already evaluated
    last_evaluated_ms: Option<u64>,
}

impl AlertManager {
    /// Create a new alert manager
    pub fn new(config: AlertConfig) -> Result<Self, RuleError> {
        validate_rules(&config.rules)?;
        info!(
            "Creating alert manager with {} rule(s), {}ms cooldown",
            config.rules.len(),
            config.cooldown_ms
        );
        Ok(Self {
            config,
            states: HashMap::new(),
            anomalies: Vec::new(),
            next_id: 1,
            last_evaluated_ms: None,
        })
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// Check whether `rule` is outside its cooldown at `now_ms`
    pub fn should_fire(&self, rule: &str, now_ms: u64) -> bool {
        match self.states.get(rule) {
            Some(state) if now_ms.saturating_sub(state.last_fired_ms) < self.config.cooldown_ms => {
                debug!("Anomaly {} suppressed: in cooldown period", rule);
                false
            }
            _ => true,
        }
    }

    /// Record that a rule fired
    pub fn record_fire(&mut self, rule: &str, now_ms: u64) {
        let state = self
            .states
            .entry(rule.to_string())
            .or_insert(AlertState {
                last_fired_ms: now_ms,
                fire_count: 0,
            });
        state.last_fired_ms = now_ms;
        state.fire_count += 1;
    }

    /// Evaluate every rule against the newest batch in `snapshot`
    ///
    /// Only PIDs carried by that batch are checked. A snapshot without new
    /// samples since the last call raises nothing.
    pub fn evaluate(&mut self, snapshot: &TelemetrySnapshot) -> Vec<Anomaly> {
        let Some(sample_ms) = snapshot.last_update_ms else {
            return Vec::new();
        };
        if self.last_evaluated_ms.is_some_and(|seen| seen >= sample_ms) {
            return Vec::new();
        }
        self.last_evaluated_ms = Some(sample_ms);

        let mut raised = Vec::new();
        for index in 0..self.config.rules.len() {
            let rule = &self.config.rules[index];
            let Some(value) = snapshot.fresh_value(rule.pid) else {
                continue;
            };
            if !rule.is_triggered(value) || !self.should_fire(&rule.name, sample_ms) {
                continue;
            }

            let anomaly = Anomaly {
                id: self.next_id,
                rule: rule.name.clone(),
                severity: rule.severity,
                message: rule.message.clone(),
                pid: rule.pid,
                value,
                timestamp_ms: sample_ms,
                acknowledged: false,
            };
            warn!(
                "{}: {} ({} = {:.1})",
                anomaly.severity.as_str().to_uppercase(),
                anomaly.message,
                anomaly.pid,
                value
            );
            self.next_id += 1;
            self.record_fire(&anomaly.rule, sample_ms);
            counter!("obd_anomalies_raised_total", "severity" => anomaly.severity.as_str())
                .increment(1);
            raised.push(anomaly);
        }

        self.anomalies.extend(raised.iter().cloned());
        if self.anomalies.len() > self.config.max_retained {
            let excess = self.anomalies.len() - self.config.max_retained;
            self.anomalies.drain(..excess);
        }
        raised
    }

    /// Raised anomalies, oldest first
    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    /// Get pending (unacknowledged) anomalies
    pub fn pending(&self) -> Vec<&Anomaly> {
        self.anomalies.iter().filter(|a| !a.acknowledged).collect()
    }

    /// Acknowledge an anomaly by id
    pub fn acknowledge(&mut self, id: u64) -> bool {
        match self.anomalies.iter_mut().find(|a| a.id == id) {
            Some(anomaly) => {
                anomaly.acknowledged = true;
                info!("Anomaly {} acknowledged", id);
                true
            }
            None => false,
        }
    }

    /// Fire count for a rule
    pub fn fire_count(&self, rule: &str) -> usize {
        self.states.get(rule).map_or(0, |s| s.fire_count)
    }

    /// Clear all anomalies and cooldowns
    pub fn clear(&mut self) {
        self.anomalies.clear();
        self.states.clear();
        self.last_evaluated_ms = None;
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self {
            config: AlertConfig::default(),
            states: HashMap::new(),
            anomalies: Vec::new(),
            next_id: 1,
            last_evaluated_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::TelemetrySample;
    use std::collections::BTreeMap;
    use telemetry_store::TelemetryStore;

    fn snapshot(coolant: f64, at_ms: u64) -> TelemetrySnapshot {
        let mut latest_values = BTreeMap::new();
        latest_values.insert(Pid::CoolantTemp, coolant);
        let mut history = BTreeMap::new();
        history.insert(
            Pid::CoolantTemp,
            vec![TelemetrySample::new(Pid::CoolantTemp, coolant, at_ms)],
        );
        TelemetrySnapshot {
            latest_values,
            history,
            last_update_ms: Some(at_ms),
            ..Default::default()
        }
    }

    #[test]
    fn test_overheating_raises_critical() {
        let mut manager = AlertManager::default();
        let raised = manager.evaluate(&snapshot(115.0, 1_000));
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].severity, Severity::Critical);
        assert_eq!(raised[0].message, "Engine overheating detected");
        assert_eq!(raised[0].value, 115.0);
    }

    #[test]
    fn test_normal_values_raise_nothing() {
        let mut manager = AlertManager::default();
        assert!(manager.evaluate(&snapshot(92.0, 1_000)).is_empty());
        assert!(manager.anomalies().is_empty());
    }

    #[test]
    fn test_deduplication() {
        let mut manager = AlertManager::default();
        assert_eq!(manager.evaluate(&snapshot(115.0, 1_000)).len(), 1);

        // Inside the 5 s cooldown
        assert!(manager.evaluate(&snapshot(116.0, 3_000)).is_empty());
        assert!(manager.evaluate(&snapshot(117.0, 5_999)).is_empty());

        assert_eq!(manager.evaluate(&snapshot(118.0, 6_000)).len(), 1);
        assert_eq!(manager.fire_count("engine_overheating"), 2);
        assert_eq!(manager.anomalies().len(), 2);
    }

    #[test]
    fn test_same_sample_not_evaluated_twice() {
        let mut manager = AlertManager::new(AlertConfig {
            cooldown_ms: 0,
            ..Default::default()
        })
        .unwrap();
        let hot = snapshot(120.0, 1_000);
        assert_eq!(manager.evaluate(&hot).len(), 1);
        assert!(manager.evaluate(&hot).is_empty());
    }

    #[test]
    fn test_stale_value_does_not_refire() {
        let store = TelemetryStore::default();
        let mut manager = AlertManager::default();

        store.publish_samples(vec![TelemetrySample::new(Pid::CoolantTemp, 115.0, 1_000)]);
        assert_eq!(manager.evaluate(&store.snapshot()).len(), 1);

        // Coolant missing from later sweeps; its last value is still 115
        store.publish_samples(vec![TelemetrySample::new(Pid::Rpm, 900.0, 7_000)]);
        store.publish_samples(vec![TelemetrySample::new(Pid::Rpm, 910.0, 13_000)]);
        assert!(manager.evaluate(&store.snapshot()).is_empty());
        assert_eq!(store.snapshot().value(Pid::CoolantTemp), Some(115.0));

        store.publish_samples(vec![TelemetrySample::new(Pid::CoolantTemp, 116.0, 19_000)]);
        assert_eq!(manager.evaluate(&store.snapshot()).len(), 1);
        assert_eq!(manager.fire_count("engine_overheating"), 2);
    }

    #[test]
    fn test_acknowledgement() {
        let mut manager = AlertManager::default();
        let raised = manager.evaluate(&snapshot(115.0, 1_000));
        assert_eq!(manager.pending().len(), 1);

        assert!(manager.acknowledge(raised[0].id));
        assert!(manager.pending().is_empty());
        assert!(!manager.acknowledge(999));
    }

    #[test]
    fn test_clear_resets_cooldown() {
        let mut manager = AlertManager::default();
        manager.evaluate(&snapshot(115.0, 1_000));
        manager.clear();
        assert!(manager.anomalies().is_empty());
        assert_eq!(manager.evaluate(&snapshot(115.0, 1_500)).len(), 1);
    }

    #[test]
    fn test_retention_cap() {
        let mut manager = AlertManager::new(AlertConfig {
            cooldown_ms: 0,
            max_retained: 3,
            ..Default::default()
        })
        .unwrap();
        for i in 1..=5 {
            manager.evaluate(&snapshot(115.0, i * 1_000));
        }
        let ids: Vec<u64> = manager.anomalies().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
    }
}
