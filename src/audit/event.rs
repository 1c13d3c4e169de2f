//! Security audit event model.
//!
//! Events are immutable records. What used to be a free-form details map is
//! a closed per-kind payload ([`AuditDetail`]), so each event kind statically
//! determines which fields are legal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    AuthSuccess,
    AuthFailure,
    ApiAccess,
    RateLimitExceeded,
    SuspiciousActivity,
    DataAccess,
    SecurityConfigChange,
}

impl AuditKind {
    /// The category this kind always files under.
    pub fn category(self) -> AuditCategory {
        match self {
            AuditKind::AuthSuccess | AuditKind::AuthFailure => AuditCategory::Auth,
            AuditKind::ApiAccess => AuditCategory::Api,
            AuditKind::RateLimitExceeded | AuditKind::SuspiciousActivity => {
                AuditCategory::Security
            }
            AuditKind::DataAccess => AuditCategory::Data,
            AuditKind::SecurityConfigChange => AuditCategory::System,
        }
    }

    /// Default severity for this kind.
    pub fn severity(self) -> Severity {
        match self {
            AuditKind::AuthSuccess | AuditKind::ApiAccess | AuditKind::DataAccess => Severity::Low,
            AuditKind::AuthFailure | AuditKind::RateLimitExceeded => Severity::Medium,
            AuditKind::SuspiciousActivity | AuditKind::SecurityConfigChange => Severity::High,
        }
    }
}

/// Broad grouping used by the query surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditCategory {
    Auth,
    Api,
    Security,
    Data,
    System,
}

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Caller-supplied request context attached to audit events.
///
/// Everything here is optional: events raised by background work carry none
/// of it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    pub actor_id: Option<String>,
    pub session_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    /// Context carrying only an actor id.
    pub fn for_actor(actor_id: &str) -> Self {
        Self {
            actor_id: Some(actor_id.to_string()),
            ..Self::default()
        }
    }
}

/// Kind-specific event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditDetail {
    /// An authentication attempt, successful or not
    AuthAttempt {
        /// Authentication method (password, token, oauth, ...)
        method: String,
        /// Why the attempt failed, absent on success
        failure_reason: Option<String>,
    },
    /// An admitted API call completing
    ApiAccess {
        endpoint: String,
        http_method: String,
        status_code: u16,
    },
    /// A call rejected by the admission controller
    RateLimitHit {
        endpoint: String,
        policy: String,
        retry_after_secs: u64,
    },
    /// Behavior flagged by upstream heuristics
    SuspiciousActivity { description: String },
    /// A read or write of guarded data
    DataAccess { resource: String, action: String },
    /// A change to security-relevant configuration
    ConfigChange {
        setting: String,
        old_value: Option<String>,
        new_value: String,
    },
}

/// A single security-relevant occurrence.
///
/// Created once, never mutated; evicted only by capacity pressure or an
/// explicit age purge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Monotonic sequence number assigned by the owning log
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: AuditKind,
    pub category: AuditCategory,
    pub severity: Severity,
    pub success: bool,
    pub actor_id: Option<String>,
    pub session_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub detail: AuditDetail,
}

impl AuditEvent {
    /// Build an event with kind-derived category and severity.
    ///
    /// The id is a placeholder until the log appends the event; the
    /// timestamp is the current instant.
    pub fn new(kind: AuditKind, success: bool, ctx: &RequestContext, detail: AuditDetail) -> Self {
        Self {
            id: 0,
            timestamp: Utc::now(),
            kind,
            category: kind.category(),
            severity: kind.severity(),
            success,
            actor_id: ctx.actor_id.clone(),
            session_id: ctx.session_id.clone(),
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
            detail,
        }
    }

    /// Same as [`AuditEvent::new`] with an explicit timestamp.
    pub fn new_at(
        timestamp: DateTime<Utc>,
        kind: AuditKind,
        success: bool,
        ctx: &RequestContext,
        detail: AuditDetail,
    ) -> Self {
        Self {
            timestamp,
            ..Self::new(kind, success, ctx, detail)
        }
    }

    /// Override the derived severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}
