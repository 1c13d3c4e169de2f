//! Append-only bounded security audit log.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bounded::BoundedBuffer;

use super::event::{AuditCategory, AuditDetail, AuditEvent, AuditKind, RequestContext, Severity};
use super::sink::{AuditSink, TracingSink};

/// Default event capacity of the audit trail.
pub const DEFAULT_MAX_EVENTS: usize = 10_000;

/// Thresholds for the last-hour threat heuristics.
///
/// Each rule fires when the observed count is strictly greater than its
/// threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatThresholds {
    /// Auth failures before flagging brute force
    #[serde(default = "default_brute_force_threshold")]
    pub brute_force_auth_failures: u64,
    /// Rate-limit hits before flagging abuse
    #[serde(default = "default_rate_limit_abuse_threshold")]
    pub rate_limit_abuse_hits: u64,
    /// Suspicious-activity events before flagging a behavior pattern
    #[serde(default = "default_suspicious_behavior_threshold")]
    pub suspicious_behavior_events: u64,
}

impl Default for ThreatThresholds {
    fn default() -> Self {
        Self {
            brute_force_auth_failures: default_brute_force_threshold(),
            rate_limit_abuse_hits: default_rate_limit_abuse_threshold(),
            suspicious_behavior_events: default_suspicious_behavior_threshold(),
        }
    }
}

fn default_brute_force_threshold() -> u64 {
    10
}

fn default_rate_limit_abuse_threshold() -> u64 {
    20
}

fn default_suspicious_behavior_threshold() -> u64 {
    5
}

/// Running counters over the events currently in the buffer.
///
/// Updated incrementally on every append and eviction, so reading them is
/// always O(1). `total_events` equals the buffer length, not an all-time
/// count.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityMetrics {
    pub total_events: u64,
    pub auth_failures: u64,
    pub rate_limit_hits: u64,
    pub suspicious_activities: u64,
    pub last_updated: DateTime<Utc>,
}

impl SecurityMetrics {
    fn empty() -> Self {
        Self {
            total_events: 0,
            auth_failures: 0,
            rate_limit_hits: 0,
            suspicious_activities: 0,
            last_updated: Utc::now(),
        }
    }

    fn record(&mut self, kind: AuditKind) {
        self.total_events += 1;
        if let Some(counter) = self.kind_counter(kind) {
            *counter += 1;
        }
    }

    fn unrecord(&mut self, kind: AuditKind) {
        self.total_events = self.total_events.saturating_sub(1);
        if let Some(counter) = self.kind_counter(kind) {
            *counter = counter.saturating_sub(1);
        }
    }

    fn kind_counter(&mut self, kind: AuditKind) -> Option<&mut u64> {
        match kind {
            AuditKind::AuthFailure => Some(&mut self.auth_failures),
            AuditKind::RateLimitExceeded => Some(&mut self.rate_limit_hits),
            AuditKind::SuspiciousActivity => Some(&mut self.suspicious_activities),
            _ => None,
        }
    }
}

/// A heuristic threat class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatKind {
    BruteForce,
    RateLimitAbuse,
    SuspiciousBehavior,
}

/// One raised threat heuristic.
#[derive(Debug, Clone, Serialize)]
pub struct ThreatFinding {
    pub kind: ThreatKind,
    pub severity: Severity,
    /// Matching events observed in the last hour
    pub count: u64,
    pub description: String,
}

struct LogState {
    events: BoundedBuffer<AuditEvent>,
    metrics: SecurityMetrics,
}

/// Append-only bounded log of security-relevant events.
///
/// Appends never fail and never throw outward: capacity pressure evicts the
/// oldest event silently, and a failing sink is counted and swallowed after
/// the in-memory append has already succeeded.
pub struct SecurityAuditLog {
    inner: Mutex<LogState>,
    sink: Box<dyn AuditSink>,
    thresholds: ThreatThresholds,
    next_id: AtomicU64,
    sink_failures: AtomicU64,
}

impl SecurityAuditLog {
    /// Create a log with the default capacity, thresholds and tracing sink.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_EVENTS)
    }

    /// Create a log holding at most `max_events` entries.
    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            inner: Mutex::new(LogState {
                events: BoundedBuffer::new(max_events),
                metrics: SecurityMetrics::empty(),
            }),
            sink: Box::new(TracingSink),
            thresholds: ThreatThresholds::default(),
            next_id: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
        }
    }

    /// Build a log from configuration, keeping the default tracing sink.
    pub fn from_config(config: &crate::config::AuditConfig) -> Self {
        Self::with_capacity(config.max_events).with_thresholds(config.thresholds.clone())
    }

    /// Replace the side-channel sink.
    pub fn with_sink(mut self, sink: Box<dyn AuditSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Replace the threat-detection thresholds.
    pub fn with_thresholds(mut self, thresholds: ThreatThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Append a prebuilt event.
    ///
    /// The log assigns the id; the event's timestamp is kept as given, so
    /// callers replaying history can backdate. Events are assumed to arrive
    /// in timestamp order.
    pub fn log_event(&self, mut event: AuditEvent) {
        event.id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        let emitted = event.clone();
        {
            let mut state = self.inner.lock();
            if let Some(evicted) = state.events.push(event) {
                state.metrics.unrecord(evicted.kind);
            }
            state.metrics.record(emitted.kind);
            state.metrics.last_updated = Utc::now();
        }

        // Outside the lock: the sink is a side channel and must never block
        // or fail the audit trail itself.
        if let Err(err) = self.sink.emit(&emitted) {
            self.sink_failures.fetch_add(1, Ordering::Relaxed);
            warn!(error = %err, event_id = emitted.id, "Audit sink emit failed");
        }
    }

    /// Record an authentication attempt.
    pub fn log_auth_attempt(
        &self,
        ctx: &RequestContext,
        method: &str,
        success: bool,
        failure_reason: Option<&str>,
    ) {
        let kind = if success {
            AuditKind::AuthSuccess
        } else {
            AuditKind::AuthFailure
        };
        self.log_event(AuditEvent::new(
            kind,
            success,
            ctx,
            AuditDetail::AuthAttempt {
                method: method.to_string(),
                failure_reason: failure_reason.map(str::to_string),
            },
        ));
    }

    /// Record an admitted API call completing. Success is derived from the
    /// status code.
    pub fn log_api_access(
        &self,
        ctx: &RequestContext,
        endpoint: &str,
        http_method: &str,
        status_code: u16,
    ) {
        self.log_event(AuditEvent::new(
            AuditKind::ApiAccess,
            status_code < 400,
            ctx,
            AuditDetail::ApiAccess {
                endpoint: endpoint.to_string(),
                http_method: http_method.to_string(),
                status_code,
            },
        ));
    }

    /// Record a call rejected by the admission controller.
    pub fn log_rate_limit_hit(
        &self,
        ctx: &RequestContext,
        endpoint: &str,
        policy: &str,
        retry_after_secs: u64,
    ) {
        self.log_event(AuditEvent::new(
            AuditKind::RateLimitExceeded,
            false,
            ctx,
            AuditDetail::RateLimitHit {
                endpoint: endpoint.to_string(),
                policy: policy.to_string(),
                retry_after_secs,
            },
        ));
    }

    /// Record behavior flagged as suspicious.
    pub fn log_suspicious_activity(&self, ctx: &RequestContext, description: &str) {
        self.log_event(AuditEvent::new(
            AuditKind::SuspiciousActivity,
            false,
            ctx,
            AuditDetail::SuspiciousActivity {
                description: description.to_string(),
            },
        ));
    }

    /// Record access to guarded data.
    pub fn log_data_access(
        &self,
        ctx: &RequestContext,
        resource: &str,
        action: &str,
        success: bool,
    ) {
        self.log_event(AuditEvent::new(
            AuditKind::DataAccess,
            success,
            ctx,
            AuditDetail::DataAccess {
                resource: resource.to_string(),
                action: action.to_string(),
            },
        ));
    }

    /// Record a security-relevant configuration change.
    pub fn log_config_change(
        &self,
        ctx: &RequestContext,
        setting: &str,
        old_value: Option<&str>,
        new_value: &str,
    ) {
        self.log_event(AuditEvent::new(
            AuditKind::SecurityConfigChange,
            true,
            ctx,
            AuditDetail::ConfigChange {
                setting: setting.to_string(),
                old_value: old_value.map(str::to_string),
                new_value: new_value.to_string(),
            },
        ));
    }

    /// The running metrics snapshot.
    pub fn metrics(&self) -> SecurityMetrics {
        self.inner.lock().metrics.clone()
    }

    /// Newest-first slice of the buffer, optionally filtered by category
    /// and severity.
    pub fn recent_events(
        &self,
        limit: usize,
        category: Option<AuditCategory>,
        severity: Option<Severity>,
    ) -> Vec<AuditEvent> {
        let state = self.inner.lock();
        state
            .events
            .iter()
            .rev()
            .filter(|e| category.map_or(true, |c| e.category == c))
            .filter(|e| severity.map_or(true, |s| e.severity == s))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Newest-first events attributed to one actor.
    pub fn events_by_user(&self, actor_id: &str, limit: usize) -> Vec<AuditEvent> {
        let state = self.inner.lock();
        state
            .events
            .iter()
            .rev()
            .filter(|e| e.actor_id.as_deref() == Some(actor_id))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Failed authentication attempts within the trailing window.
    pub fn failed_auth_attempts(&self, window_ms: i64) -> Vec<AuditEvent> {
        let cutoff = Utc::now() - Duration::milliseconds(window_ms);
        let state = self.inner.lock();
        state
            .events
            .iter()
            .filter(|e| e.kind == AuditKind::AuthFailure && e.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    /// Oldest-first export for external analysis, optionally bounded by an
    /// inclusive time range.
    pub fn export_events(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<AuditEvent> {
        let state = self.inner.lock();
        state
            .events
            .iter()
            .filter(|e| start.map_or(true, |s| e.timestamp >= s))
            .filter(|e| end.map_or(true, |t| e.timestamp <= t))
            .cloned()
            .collect()
    }

    /// Purge events older than `cutoff`, returning how many were removed.
    pub fn clear_old_events(&self, cutoff: DateTime<Utc>) -> usize {
        let mut state = self.inner.lock();
        let drained = state.events.drain_front_while(|e| e.timestamp < cutoff);
        for event in &drained {
            state.metrics.unrecord(event.kind);
        }
        if !drained.is_empty() {
            state.metrics.last_updated = Utc::now();
        }
        drained.len()
    }

    /// Run the threat heuristics over the last hour of the buffer.
    pub fn detect_threats(&self) -> Vec<ThreatFinding> {
        let cutoff = Utc::now() - Duration::hours(1);
        let (auth_failures, rate_limit_hits, suspicious) = {
            let state = self.inner.lock();
            let mut counts = (0u64, 0u64, 0u64);
            for event in state.events.iter().filter(|e| e.timestamp >= cutoff) {
                match event.kind {
                    AuditKind::AuthFailure => counts.0 += 1,
                    AuditKind::RateLimitExceeded => counts.1 += 1,
                    AuditKind::SuspiciousActivity => counts.2 += 1,
                    _ => {}
                }
            }
            counts
        };

        let mut findings = Vec::new();
        if auth_failures > self.thresholds.brute_force_auth_failures {
            findings.push(ThreatFinding {
                kind: ThreatKind::BruteForce,
                severity: Severity::High,
                count: auth_failures,
                description: format!("{} failed auth attempts in the last hour", auth_failures),
            });
        }
        if rate_limit_hits > self.thresholds.rate_limit_abuse_hits {
            findings.push(ThreatFinding {
                kind: ThreatKind::RateLimitAbuse,
                severity: Severity::Medium,
                count: rate_limit_hits,
                description: format!("{} rate limit rejections in the last hour", rate_limit_hits),
            });
        }
        if suspicious > self.thresholds.suspicious_behavior_events {
            findings.push(ThreatFinding {
                kind: ThreatKind::SuspiciousBehavior,
                severity: Severity::High,
                count: suspicious,
                description: format!("{} suspicious activity events in the last hour", suspicious),
            });
        }
        findings
    }

    /// Number of events currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    /// Whether the log holds no events.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many sink emits have failed since construction.
    pub fn sink_failures(&self) -> u64 {
        self.sink_failures.load(Ordering::Relaxed)
    }
}

impl Default for SecurityAuditLog {
    fn default() -> Self {
        Self::new()
    }
}
