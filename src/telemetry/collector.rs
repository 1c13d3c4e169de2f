//! In-memory telemetry collector.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::trace;

use crate::bounded::BoundedBuffer;

use super::event::{EventPayload, TelemetryEvent, TelemetryKind};
use super::metrics::{aggregate, AggregatedMetrics, MetricsFilter};

/// Default event capacity of the telemetry store.
pub const DEFAULT_MAX_EVENTS: usize = 10_000;

/// Length of the realtime-stats window.
const REALTIME_WINDOW_SECS: i64 = 300;

/// Totals over the last five minutes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RealtimeStats {
    pub total_events: u64,
    pub messages: u64,
    pub active_users: u64,
    pub automation_triggers: u64,
    pub ai_responses: u64,
}

/// Ingests typed business events into a bounded store and derives metrics
/// from it on demand.
///
/// The store is the rolling window feeding every aggregate: once it exceeds
/// its capacity, the oldest event is evicted on each append.
pub struct TelemetryCollector {
    events: Mutex<BoundedBuffer<TelemetryEvent>>,
    next_id: AtomicU64,
}

impl TelemetryCollector {
    /// Create a collector with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_EVENTS)
    }

    /// Create a collector holding at most `max_events` entries.
    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: Mutex::new(BoundedBuffer::new(max_events)),
            next_id: AtomicU64::new(0),
        }
    }

    /// Build a collector from configuration.
    pub fn from_config(config: &crate::config::TelemetryConfig) -> Self {
        Self::with_capacity(config.max_events)
    }

    /// Record an inbound message.
    pub fn track_message_received(
        &self,
        conversation_id: &str,
        actor_id: &str,
        channel: &str,
        segment: Option<&str>,
        tags: &[&str],
    ) {
        self.track(
            Some(conversation_id),
            Some(actor_id),
            Some(channel),
            EventPayload::MessageReceived {
                segment: segment.map(str::to_string),
                tags: tags.iter().map(|t| t.to_string()).collect(),
            },
        );
    }

    /// Record an outbound message, optionally with the time it took to
    /// produce it.
    pub fn track_message_sent(
        &self,
        conversation_id: &str,
        actor_id: &str,
        channel: &str,
        response_time_ms: Option<u64>,
    ) {
        self.track(
            Some(conversation_id),
            Some(actor_id),
            Some(channel),
            EventPayload::MessageSent { response_time_ms },
        );
    }

    /// Record an automation flow firing. An error code marks the run as
    /// failed.
    pub fn track_automation_triggered(
        &self,
        conversation_id: Option<&str>,
        actor_id: Option<&str>,
        channel: &str,
        flow_id: &str,
        error_code: Option<&str>,
    ) {
        self.track(
            conversation_id,
            actor_id,
            Some(channel),
            EventPayload::AutomationTriggered {
                flow_id: flow_id.to_string(),
                error_code: error_code.map(str::to_string),
            },
        );
    }

    /// Record a completed AI generation call.
    pub fn track_ai_response(
        &self,
        conversation_id: &str,
        actor_id: Option<&str>,
        channel: &str,
        model: Option<&str>,
        confidence: Option<f64>,
        error_code: Option<&str>,
    ) {
        self.track(
            Some(conversation_id),
            actor_id,
            Some(channel),
            EventPayload::AiResponseGenerated {
                model: model.map(str::to_string),
                confidence,
                error_code: error_code.map(str::to_string),
            },
        );
    }

    /// Record a user joining the platform.
    pub fn track_user_joined(&self, actor_id: &str, channel: &str, segment: Option<&str>) {
        self.track(
            None,
            Some(actor_id),
            Some(channel),
            EventPayload::UserJoined {
                segment: segment.map(str::to_string),
            },
        );
    }

    /// Record a user being active.
    pub fn track_user_activity(&self, actor_id: &str, channel: &str) {
        self.track(None, Some(actor_id), Some(channel), EventPayload::UserActive);
    }

    fn track(
        &self,
        conversation_id: Option<&str>,
        actor_id: Option<&str>,
        channel: Option<&str>,
        payload: EventPayload,
    ) {
        self.ingest(TelemetryEvent {
            id: 0,
            timestamp: Utc::now(),
            conversation_id: conversation_id.map(str::to_string),
            actor_id: actor_id.map(str::to_string),
            channel: channel.map(str::to_string),
            payload,
        });
    }

    /// Append one event, enforcing the capacity bound.
    fn ingest(&self, mut event: TelemetryEvent) {
        event.id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(id = event.id, kind = ?event.kind(), "Telemetry event ingested");

        let mut events = self.events.lock();
        events.push(event);
    }

    /// Compute the aggregate metrics for a filter.
    ///
    /// Recomputed from the current buffer on every call; results are never
    /// cached across calls.
    pub fn calculate_metrics(&self, filter: &MetricsFilter) -> AggregatedMetrics {
        self.calculate_metrics_at(filter, Utc::now())
    }

    fn calculate_metrics_at(&self, filter: &MetricsFilter, now: DateTime<Utc>) -> AggregatedMetrics {
        let events = self.events.lock();
        let all: Vec<&TelemetryEvent> = events.iter().collect();
        aggregate(&all, filter, now)
    }

    /// The filtered raw events, oldest-first.
    pub fn export_events(&self, filter: &MetricsFilter) -> Vec<TelemetryEvent> {
        self.export_events_at(filter, Utc::now())
    }

    fn export_events_at(&self, filter: &MetricsFilter, now: DateTime<Utc>) -> Vec<TelemetryEvent> {
        let events = self.events.lock();
        events
            .iter()
            .filter(|e| filter.matches(e, now))
            .cloned()
            .collect()
    }

    /// Totals over the last five minutes.
    pub fn realtime_stats(&self) -> RealtimeStats {
        self.realtime_stats_at(Utc::now())
    }

    fn realtime_stats_at(&self, now: DateTime<Utc>) -> RealtimeStats {
        let cutoff = now - Duration::seconds(REALTIME_WINDOW_SECS);
        let events = self.events.lock();

        let mut stats = RealtimeStats {
            total_events: 0,
            messages: 0,
            active_users: 0,
            automation_triggers: 0,
            ai_responses: 0,
        };
        let mut actors = std::collections::BTreeSet::new();
        for event in events.iter().filter(|e| e.timestamp >= cutoff) {
            stats.total_events += 1;
            match event.kind() {
                TelemetryKind::MessageReceived | TelemetryKind::MessageSent => stats.messages += 1,
                TelemetryKind::AutomationTriggered => stats.automation_triggers += 1,
                TelemetryKind::AiResponseGenerated => stats.ai_responses += 1,
                _ => {}
            }
            if let Some(actor) = event.actor_id.as_deref() {
                actors.insert(actor.to_string());
            }
        }
        stats.active_users = actors.len() as u64;
        stats
    }

    /// Purge events older than `older_than_days`, returning how many were
    /// removed.
    pub fn clear_old_events(&self, older_than_days: i64) -> usize {
        let cutoff = Utc::now() - Duration::days(older_than_days);
        let mut events = self.events.lock();
        events.drain_front_while(|e| e.timestamp < cutoff).len()
    }

    /// Number of events currently held.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether the store holds no events.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::metrics::TimeRange;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn ingest_received(collector: &TelemetryCollector, ts: DateTime<Utc>, actor: &str) {
        collector.ingest(TelemetryEvent {
            id: 0,
            timestamp: ts,
            conversation_id: Some("conv-1".to_string()),
            actor_id: Some(actor.to_string()),
            channel: Some("webchat".to_string()),
            payload: EventPayload::MessageReceived {
                segment: None,
                tags: vec![],
            },
        });
    }

    #[test]
    fn test_trackers_build_canonical_events() {
        let collector = TelemetryCollector::new();
        collector.track_message_received("conv-1", "user-1", "webchat", Some("trial"), &["vip"]);
        collector.track_message_sent("conv-1", "bot", "webchat", Some(1200));
        collector.track_automation_triggered(Some("conv-1"), None, "webchat", "welcome-flow", None);
        collector.track_ai_response("conv-1", Some("bot"), "webchat", Some("sonnet"), Some(0.9), None);
        collector.track_user_joined("user-2", "telegram", None);
        collector.track_user_activity("user-2", "telegram");

        assert_eq!(collector.len(), 6);

        let events = collector.export_events(&MetricsFilter::default());
        assert_eq!(events[0].kind(), TelemetryKind::MessageReceived);
        assert_eq!(events[0].segment(), Some("trial"));
        assert_eq!(events[1].response_time_ms(), Some(1200));
        assert_eq!(events[2].flow_id(), Some("welcome-flow"));
        assert_eq!(events[4].channel.as_deref(), Some("telegram"));

        // Ids are assigned in ingestion order
        let ids: Vec<u64> = events.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_capacity_bound_evicts_oldest() {
        let collector = TelemetryCollector::with_capacity(3);
        for i in 0..5 {
            ingest_received(&collector, at(9, i), "user-1");
        }

        assert_eq!(collector.len(), 3);
        let events = collector.export_events(&MetricsFilter::default());
        let ids: Vec<u64> = events.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[test]
    fn test_end_to_end_morning_scenario() {
        let collector = TelemetryCollector::new();
        let now = at(12, 0);

        ingest_received(&collector, at(9, 0), "user-1");
        ingest_received(&collector, at(9, 15), "user-2");
        collector.ingest(TelemetryEvent {
            id: 0,
            timestamp: at(9, 16),
            conversation_id: Some("conv-1".to_string()),
            actor_id: Some("bot".to_string()),
            channel: Some("webchat".to_string()),
            payload: EventPayload::MessageSent {
                response_time_ms: Some(2000),
            },
        });
        collector.ingest(TelemetryEvent {
            id: 0,
            timestamp: at(9, 17),
            conversation_id: Some("conv-1".to_string()),
            actor_id: None,
            channel: Some("webchat".to_string()),
            payload: EventPayload::AutomationTriggered {
                flow_id: "welcome-flow".to_string(),
                error_code: None,
            },
        });

        let metrics =
            collector.calculate_metrics_at(&MetricsFilter::last(TimeRange::LastDay), now);

        assert_eq!(metrics.total_messages, 3);
        assert_eq!(metrics.average_response_time_ms, 2000.0);
        assert_eq!(metrics.automation_triggers, 1);
        assert_eq!(metrics.automation_success, 1);
        assert_eq!(metrics.automation_failures, 0);
        assert_eq!(metrics.top_flows.len(), 1);
        assert_eq!(metrics.top_flows[0].flow_id, "welcome-flow");
        assert_eq!(metrics.top_flows[0].name, "Welcome New Users");
        assert_eq!(metrics.top_flows[0].triggers, 1);
    }

    #[test]
    fn test_identical_filters_yield_identical_metrics() {
        let collector = TelemetryCollector::new();
        let now = at(12, 0);
        for i in 0..10 {
            ingest_received(&collector, at(9, i), &format!("user-{}", i % 3));
        }

        let filter = MetricsFilter::last(TimeRange::LastDay);
        let first = collector.calculate_metrics_at(&filter, now);
        let second = collector.calculate_metrics_at(&filter, now);
        assert_eq!(first, second);
    }

    #[test]
    fn test_export_respects_filter() {
        let collector = TelemetryCollector::new();
        let now = at(12, 0);
        ingest_received(&collector, at(9, 0), "user-1");
        collector.ingest(TelemetryEvent {
            id: 0,
            timestamp: at(9, 5),
            conversation_id: None,
            actor_id: Some("user-2".to_string()),
            channel: Some("telegram".to_string()),
            payload: EventPayload::MessageReceived {
                segment: None,
                tags: vec![],
            },
        });

        let filter = MetricsFilter {
            platform: Some("telegram".to_string()),
            ..MetricsFilter::default()
        };
        let events = collector.export_events_at(&filter, now);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].channel.as_deref(), Some("telegram"));
    }

    #[test]
    fn test_realtime_stats_window() {
        let collector = TelemetryCollector::new();
        let now = at(12, 0);

        ingest_received(&collector, now - Duration::seconds(60), "user-1");
        ingest_received(&collector, now - Duration::seconds(400), "user-2");
        collector.ingest(TelemetryEvent {
            id: 0,
            timestamp: now - Duration::seconds(30),
            conversation_id: None,
            actor_id: None,
            channel: Some("webchat".to_string()),
            payload: EventPayload::AutomationTriggered {
                flow_id: "welcome-flow".to_string(),
                error_code: Some("timeout".to_string()),
            },
        });

        let stats = collector.realtime_stats_at(now);
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.messages, 1);
        assert_eq!(stats.active_users, 1);
        assert_eq!(stats.automation_triggers, 1);
        assert_eq!(stats.ai_responses, 0);
    }

    #[test]
    fn test_clear_old_events_by_age() {
        let collector = TelemetryCollector::new();
        let now = Utc::now();

        ingest_received(&collector, now - Duration::days(40), "user-1");
        ingest_received(&collector, now - Duration::days(10), "user-2");
        ingest_received(&collector, now, "user-3");

        let removed = collector.clear_old_events(30);
        assert_eq!(removed, 1);
        assert_eq!(collector.len(), 2);
    }

    #[test]
    fn test_metrics_reflect_evictions() {
        let collector = TelemetryCollector::with_capacity(2);
        let now = at(12, 0);
        ingest_received(&collector, at(9, 0), "user-1");
        ingest_received(&collector, at(9, 1), "user-2");
        ingest_received(&collector, at(9, 2), "user-3");

        let metrics = collector.calculate_metrics_at(&MetricsFilter::default(), now);
        // user-1's event was evicted, so only two messages remain visible
        assert_eq!(metrics.total_messages, 2);
        assert_eq!(metrics.total_users, 2);
    }
}
