//! Configuration management for Palisade.

use serde::{Deserialize, Serialize};

use crate::admission::{PolicyTable, DEFAULT_SWEEP_INTERVAL};
use crate::audit::ThreatThresholds;

/// Main configuration for the Palisade core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PalisadeConfig {
    /// Admission control configuration
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Audit log configuration
    #[serde(default)]
    pub audit: AuditConfig,

    /// Telemetry collector configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Admission control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Seconds between expiry sweeps of the window map
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Policy set and endpoint routing rules
    #[serde(default)]
    pub policy_table: PolicyTable,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            policy_table: PolicyTable::default(),
        }
    }
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL.as_secs()
}

/// Audit log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Maximum events held in the audit trail
    #[serde(default = "default_audit_capacity")]
    pub max_events: usize,

    /// Threat-detection thresholds
    #[serde(default)]
    pub thresholds: ThreatThresholds,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_events: default_audit_capacity(),
            thresholds: ThreatThresholds::default(),
        }
    }
}

fn default_audit_capacity() -> usize {
    crate::audit::DEFAULT_MAX_EVENTS
}

/// Telemetry collector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Maximum events held in the telemetry store
    #[serde(default = "default_telemetry_capacity")]
    pub max_events: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            max_events: default_telemetry_capacity(),
        }
    }
}

fn default_telemetry_capacity() -> usize {
    crate::telemetry::DEFAULT_MAX_EVENTS
}

impl PalisadeConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> crate::error::Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| crate::error::PalisadeError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PalisadeConfig::default();
        assert_eq!(config.admission.sweep_interval_secs, 300);
        assert_eq!(config.audit.max_events, 10_000);
        assert_eq!(config.telemetry.max_events, 10_000);
        assert_eq!(config.audit.thresholds.brute_force_auth_failures, 10);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
audit:
  max_events: 500
"#;
        let config = PalisadeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.audit.max_events, 500);
        assert_eq!(config.audit.thresholds.rate_limit_abuse_hits, 20);
        assert_eq!(config.telemetry.max_events, 10_000);
    }

    #[test]
    fn test_full_yaml_parses() {
        let yaml = r#"
admission:
  sweep_interval_secs: 60
  policy_table:
    policies:
      - name: general
        window_ms: 60000
        max_requests: 50
    routes: []
audit:
  max_events: 1000
  thresholds:
    brute_force_auth_failures: 5
    rate_limit_abuse_hits: 10
    suspicious_behavior_events: 3
telemetry:
  max_events: 2000
"#;
        let config = PalisadeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.admission.sweep_interval_secs, 60);
        assert_eq!(config.admission.policy_table.policies.len(), 1);
        assert_eq!(config.audit.thresholds.brute_force_auth_failures, 5);
        assert_eq!(config.telemetry.max_events, 2000);
    }

    #[test]
    fn test_invalid_yaml_is_a_config_error() {
        assert!(PalisadeConfig::from_yaml("audit: [nonsense").is_err());
    }

    #[test]
    fn test_components_build_from_config() {
        let config = PalisadeConfig::default();

        let controller = crate::admission::AdmissionController::from_config(&config.admission)
            .expect("default config must build");
        assert_eq!(controller.registry().default_policy().name, "general");

        let log = crate::audit::SecurityAuditLog::from_config(&config.audit);
        assert!(log.is_empty());

        let collector = crate::telemetry::TelemetryCollector::from_config(&config.telemetry);
        assert!(collector.is_empty());
    }
}
