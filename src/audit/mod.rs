//! Security audit trail: bounded event log, rolling metrics, threat
//! heuristics, and side-channel sinks.

mod event;
mod log;
mod sink;

pub use event::{AuditCategory, AuditDetail, AuditEvent, AuditKind, RequestContext, Severity};
pub use log::{
    SecurityAuditLog, SecurityMetrics, ThreatFinding, ThreatKind, ThreatThresholds,
    DEFAULT_MAX_EVENTS,
};
pub use sink::{AuditSink, JsonLinesSink, NullSink, TracingSink};
