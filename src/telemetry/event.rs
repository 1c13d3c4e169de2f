//! Telemetry event model.
//!
//! Each event kind carries its own typed payload instead of an open
//! metadata map, so illegal field combinations cannot be constructed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of business event occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryKind {
    MessageReceived,
    MessageSent,
    AutomationTriggered,
    AiResponseGenerated,
    UserJoined,
    UserActive,
}

/// Kind-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    MessageReceived {
        segment: Option<String>,
        tags: Vec<String>,
    },
    MessageSent {
        response_time_ms: Option<u64>,
    },
    AutomationTriggered {
        flow_id: String,
        /// Present when the flow run failed
        error_code: Option<String>,
    },
    AiResponseGenerated {
        model: Option<String>,
        confidence: Option<f64>,
        /// Present when generation failed
        error_code: Option<String>,
    },
    UserJoined {
        segment: Option<String>,
    },
    UserActive,
}

impl EventPayload {
    /// The kind this payload belongs to.
    pub fn kind(&self) -> TelemetryKind {
        match self {
            EventPayload::MessageReceived { .. } => TelemetryKind::MessageReceived,
            EventPayload::MessageSent { .. } => TelemetryKind::MessageSent,
            EventPayload::AutomationTriggered { .. } => TelemetryKind::AutomationTriggered,
            EventPayload::AiResponseGenerated { .. } => TelemetryKind::AiResponseGenerated,
            EventPayload::UserJoined { .. } => TelemetryKind::UserJoined,
            EventPayload::UserActive => TelemetryKind::UserActive,
        }
    }
}

/// A discrete, immutable record of something that happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Monotonic sequence number assigned by the collector
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub conversation_id: Option<String>,
    pub actor_id: Option<String>,
    /// Platform the event originated on (e.g. "whatsapp", "webchat")
    pub channel: Option<String>,
    pub payload: EventPayload,
}

impl TelemetryEvent {
    /// The event kind, determined by the payload.
    pub fn kind(&self) -> TelemetryKind {
        self.payload.kind()
    }

    /// Whether this is an inbound or outbound message event.
    pub fn is_message(&self) -> bool {
        matches!(
            self.kind(),
            TelemetryKind::MessageReceived | TelemetryKind::MessageSent
        )
    }

    /// The user segment, for the payloads that carry one.
    pub fn segment(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::MessageReceived { segment, .. }
            | EventPayload::UserJoined { segment } => segment.as_deref(),
            _ => None,
        }
    }

    /// The automation flow id, for automation events.
    pub fn flow_id(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::AutomationTriggered { flow_id, .. } => Some(flow_id),
            _ => None,
        }
    }

    /// The error code, for payloads that can fail.
    pub fn error_code(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::AutomationTriggered { error_code, .. }
            | EventPayload::AiResponseGenerated { error_code, .. } => error_code.as_deref(),
            _ => None,
        }
    }

    /// Outbound response time, when measured.
    pub fn response_time_ms(&self) -> Option<u64> {
        match &self.payload {
            EventPayload::MessageSent { response_time_ms } => *response_time_ms,
            _ => None,
        }
    }
}

/// Resolve an automation flow id to its display name.
///
/// Unknown ids pass through unchanged.
pub fn flow_display_name(flow_id: &str) -> &str {
    match flow_id {
        "welcome-flow" => "Welcome New Users",
        "order-followup" => "Order Follow-up",
        "abandoned-cart" => "Abandoned Cart Recovery",
        "faq-autoreply" => "FAQ Auto-Reply",
        "reengagement" => "Re-engagement Campaign",
        other => other,
    }
}
