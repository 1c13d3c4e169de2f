//! Windowed metric aggregation over the telemetry store.
//!
//! Aggregates are a pure function of a filtered slice of events. They are
//! recomputed on every query and never cached, so the numbers always
//! reflect the current event buffer.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::event::{flow_display_name, EventPayload, TelemetryEvent, TelemetryKind};

/// Relative time range, anchored at query time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "1h")]
    LastHour,
    #[serde(rename = "24h")]
    LastDay,
    #[serde(rename = "7d")]
    LastWeek,
    #[serde(rename = "30d")]
    LastMonth,
    #[serde(rename = "90d")]
    LastQuarter,
}

impl TimeRange {
    /// Length of the range.
    pub fn duration(self) -> Duration {
        match self {
            TimeRange::LastHour => Duration::hours(1),
            TimeRange::LastDay => Duration::hours(24),
            TimeRange::LastWeek => Duration::days(7),
            TimeRange::LastMonth => Duration::days(30),
            TimeRange::LastQuarter => Duration::days(90),
        }
    }

    /// Parse the wire form (`1h`, `24h`, `7d`, `30d`, `90d`).
    ///
    /// Unknown tokens yield `None`: a malformed range means "no time
    /// filter", never a failed query.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "1h" => Some(TimeRange::LastHour),
            "24h" => Some(TimeRange::LastDay),
            "7d" => Some(TimeRange::LastWeek),
            "30d" => Some(TimeRange::LastMonth),
            "90d" => Some(TimeRange::LastQuarter),
            _ => None,
        }
    }
}

/// Event filter for metric queries and exports.
///
/// All set fields compose conjunctively. Events whose payload does not
/// carry a filtered dimension (e.g. a segment filter against a message-sent
/// event) are excluded when that filter is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsFilter {
    /// Relative range anchored at query time
    pub time_range: Option<TimeRange>,
    /// Inclusive lower timestamp bound
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper timestamp bound
    pub end: Option<DateTime<Utc>>,
    /// Platform (channel) equality filter
    pub platform: Option<String>,
    /// User segment equality filter
    pub user_segment: Option<String>,
    /// Automation flow equality filter
    pub automation_flow_id: Option<String>,
}

impl MetricsFilter {
    /// Filter to a relative range only.
    pub fn last(range: TimeRange) -> Self {
        Self {
            time_range: Some(range),
            ..Self::default()
        }
    }

    pub(crate) fn matches(&self, event: &TelemetryEvent, now: DateTime<Utc>) -> bool {
        if let Some(range) = self.time_range {
            if event.timestamp < now - range.duration() {
                return false;
            }
        }
        if let Some(start) = self.start {
            if event.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if event.timestamp > end {
                return false;
            }
        }
        if let Some(platform) = &self.platform {
            if event.channel.as_deref() != Some(platform.as_str()) {
                return false;
            }
        }
        if let Some(segment) = &self.user_segment {
            if event.segment() != Some(segment.as_str()) {
                return false;
            }
        }
        if let Some(flow_id) = &self.automation_flow_id {
            if event.flow_id() != Some(flow_id.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Trigger count for one automation flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowActivity {
    pub flow_id: String,
    /// Display name; unknown flow ids pass through as-is
    pub name: String,
    pub triggers: u64,
}

/// Message and user counts for one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformActivity {
    pub platform: String,
    pub messages: u64,
    pub users: u64,
}

/// Activity for one hour of the day (0-23).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HourActivity {
    pub hour: u32,
    pub messages: u64,
    pub users: u64,
}

/// Activity for one calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayActivity {
    pub date: NaiveDate,
    pub messages: u64,
    pub users: u64,
    pub new_users: u64,
}

/// The full derived-metric set for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedMetrics {
    pub total_messages: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    /// Mean over outbound messages carrying a response time; 0 when none do
    pub average_response_time_ms: f64,
    /// Distinct actors in the filtered set
    pub total_users: u64,
    /// Distinct actors across the whole store in the last 24 hours,
    /// independent of the filter
    pub active_users: u64,
    /// Joins in the filtered set
    pub new_users: u64,
    /// Of users who joined in the last 7 days, the fraction (0..1) with a
    /// user-active event in the last 7 days; independent of the filter
    pub user_retention: f64,
    pub automation_triggers: u64,
    pub automation_success: u64,
    pub automation_failures: u64,
    /// Top 5 flows by trigger count
    pub top_flows: Vec<FlowActivity>,
    pub ai_responses: u64,
    /// Percentage (0..100) of AI responses without an error code
    pub ai_success_rate: f64,
    pub avg_ai_confidence: f64,
    pub ai_error_count: u64,
    pub platform_breakdown: Vec<PlatformActivity>,
    /// Always 24 entries, hours 0-23, zero-filled
    pub hourly_activity: Vec<HourActivity>,
    /// Only dates present in the filtered set, ascending
    pub daily_activity: Vec<DayActivity>,
}

/// Compute the aggregate metrics for a filter over the full store.
///
/// `all` is the store's events oldest-first; `now` anchors the relative
/// windows.
pub(crate) fn aggregate(
    all: &[&TelemetryEvent],
    filter: &MetricsFilter,
    now: DateTime<Utc>,
) -> AggregatedMetrics {
    let filtered: Vec<&TelemetryEvent> = all
        .iter()
        .copied()
        .filter(|e| filter.matches(e, now))
        .collect();

    // Message counts and response times
    let mut messages_received = 0u64;
    let mut messages_sent = 0u64;
    let mut response_time_sum = 0u64;
    let mut response_time_samples = 0u64;

    // Automation
    let mut automation_success = 0u64;
    let mut automation_failures = 0u64;
    let mut flow_triggers: BTreeMap<&str, u64> = BTreeMap::new();

    // AI
    let mut ai_responses = 0u64;
    let mut ai_errors = 0u64;
    let mut confidence_sum = 0.0f64;
    let mut confidence_samples = 0u64;

    // Users and breakdowns
    let mut users: BTreeSet<&str> = BTreeSet::new();
    let mut new_users = 0u64;
    let mut platforms: BTreeMap<&str, (u64, BTreeSet<&str>)> = BTreeMap::new();
    let mut hours: Vec<(u64, BTreeSet<&str>)> = vec![(0, BTreeSet::new()); 24];
    let mut days: BTreeMap<NaiveDate, (u64, BTreeSet<&str>, u64)> = BTreeMap::new();

    for event in &filtered {
        let is_message = event.is_message();
        match event.kind() {
            TelemetryKind::MessageReceived => messages_received += 1,
            TelemetryKind::MessageSent => {
                messages_sent += 1;
                if let Some(ms) = event.response_time_ms() {
                    response_time_sum += ms;
                    response_time_samples += 1;
                }
            }
            TelemetryKind::AutomationTriggered => {
                if event.error_code().is_some() {
                    automation_failures += 1;
                } else {
                    automation_success += 1;
                }
                if let Some(flow_id) = event.flow_id() {
                    *flow_triggers.entry(flow_id).or_insert(0) += 1;
                }
            }
            TelemetryKind::AiResponseGenerated => {
                ai_responses += 1;
                if event.error_code().is_some() {
                    ai_errors += 1;
                }
                if let EventPayload::AiResponseGenerated {
                    confidence: Some(c),
                    ..
                } = &event.payload
                {
                    confidence_sum += c;
                    confidence_samples += 1;
                }
            }
            TelemetryKind::UserJoined => new_users += 1,
            TelemetryKind::UserActive => {}
        }

        let actor = event.actor_id.as_deref();
        if let Some(actor) = actor {
            users.insert(actor);
        }

        if let Some(channel) = event.channel.as_deref() {
            let slot = platforms.entry(channel).or_default();
            if is_message {
                slot.0 += 1;
            }
            if let Some(actor) = actor {
                slot.1.insert(actor);
            }
        }

        let hour = &mut hours[event.timestamp.hour() as usize];
        if is_message {
            hour.0 += 1;
        }
        if let Some(actor) = actor {
            hour.1.insert(actor);
        }

        let day = days.entry(event.timestamp.date_naive()).or_default();
        if is_message {
            day.0 += 1;
        }
        if let Some(actor) = actor {
            day.1.insert(actor);
        }
        if event.kind() == TelemetryKind::UserJoined {
            day.2 += 1;
        }
    }

    // Fixed recency windows over the whole store, independent of the filter
    let day_ago = now - Duration::hours(24);
    let week_ago = now - Duration::days(7);
    let mut active_users: BTreeSet<&str> = BTreeSet::new();
    let mut recent_joiners: BTreeSet<&str> = BTreeSet::new();
    let mut recently_active: BTreeSet<&str> = BTreeSet::new();
    for event in all {
        let Some(actor) = event.actor_id.as_deref() else {
            continue;
        };
        if event.timestamp >= day_ago {
            active_users.insert(actor);
        }
        if event.timestamp >= week_ago {
            match event.kind() {
                TelemetryKind::UserJoined => {
                    recent_joiners.insert(actor);
                }
                TelemetryKind::UserActive => {
                    recently_active.insert(actor);
                }
                _ => {}
            }
        }
    }
    let user_retention = if recent_joiners.is_empty() {
        0.0
    } else {
        let retained = recent_joiners.intersection(&recently_active).count();
        retained as f64 / recent_joiners.len() as f64
    };

    // Top flows: highest trigger count first, flow id breaks ties
    let mut ranked: Vec<(&str, u64)> = flow_triggers.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    let top_flows = ranked
        .into_iter()
        .take(5)
        .map(|(flow_id, triggers)| FlowActivity {
            flow_id: flow_id.to_string(),
            name: flow_display_name(flow_id).to_string(),
            triggers,
        })
        .collect();

    let average_response_time_ms = if response_time_samples == 0 {
        0.0
    } else {
        response_time_sum as f64 / response_time_samples as f64
    };
    let ai_success_rate = if ai_responses == 0 {
        0.0
    } else {
        (ai_responses - ai_errors) as f64 / ai_responses as f64 * 100.0
    };
    let avg_ai_confidence = if confidence_samples == 0 {
        0.0
    } else {
        confidence_sum / confidence_samples as f64
    };

    AggregatedMetrics {
        total_messages: messages_received + messages_sent,
        messages_received,
        messages_sent,
        average_response_time_ms,
        total_users: users.len() as u64,
        active_users: active_users.len() as u64,
        new_users,
        user_retention,
        automation_triggers: automation_success + automation_failures,
        automation_success,
        automation_failures,
        top_flows,
        ai_responses,
        ai_success_rate,
        avg_ai_confidence,
        ai_error_count: ai_errors,
        platform_breakdown: platforms
            .into_iter()
            .map(|(platform, (messages, users))| PlatformActivity {
                platform: platform.to_string(),
                messages,
                users: users.len() as u64,
            })
            .collect(),
        hourly_activity: hours
            .into_iter()
            .enumerate()
            .map(|(hour, (messages, users))| HourActivity {
                hour: hour as u32,
                messages,
                users: users.len() as u64,
            })
            .collect(),
        daily_activity: days
            .into_iter()
            .map(|(date, (messages, users, new_users))| DayActivity {
                date,
                messages,
                users: users.len() as u64,
                new_users,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::event::EventPayload;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn event(
        id: u64,
        timestamp: DateTime<Utc>,
        actor: Option<&str>,
        channel: Option<&str>,
        payload: EventPayload,
    ) -> TelemetryEvent {
        TelemetryEvent {
            id,
            timestamp,
            conversation_id: None,
            actor_id: actor.map(str::to_string),
            channel: channel.map(str::to_string),
            payload,
        }
    }

    fn received(id: u64, ts: DateTime<Utc>, actor: &str, channel: &str) -> TelemetryEvent {
        event(
            id,
            ts,
            Some(actor),
            Some(channel),
            EventPayload::MessageReceived {
                segment: None,
                tags: vec![],
            },
        )
    }

    #[test]
    fn test_time_range_parse() {
        assert_eq!(TimeRange::parse("24h"), Some(TimeRange::LastDay));
        assert_eq!(TimeRange::parse("90d"), Some(TimeRange::LastQuarter));
        assert_eq!(TimeRange::parse("2w"), None);
        assert_eq!(TimeRange::parse(""), None);
    }

    #[test]
    fn test_filter_platform_equality() {
        let now = at(12, 0);
        let e = received(1, at(11, 0), "u1", "webchat");

        let mut filter = MetricsFilter::default();
        assert!(filter.matches(&e, now));

        filter.platform = Some("webchat".to_string());
        assert!(filter.matches(&e, now));

        filter.platform = Some("telegram".to_string());
        assert!(!filter.matches(&e, now));
    }

    #[test]
    fn test_segment_filter_excludes_carrierless_kinds() {
        let now = at(12, 0);
        let sent = event(
            1,
            at(11, 0),
            Some("u1"),
            Some("webchat"),
            EventPayload::MessageSent {
                response_time_ms: None,
            },
        );
        let joined = event(
            2,
            at(11, 0),
            Some("u2"),
            Some("webchat"),
            EventPayload::UserJoined {
                segment: Some("trial".to_string()),
            },
        );

        let filter = MetricsFilter {
            user_segment: Some("trial".to_string()),
            ..MetricsFilter::default()
        };
        assert!(!filter.matches(&sent, now));
        assert!(filter.matches(&joined, now));
    }

    #[test]
    fn test_relative_range_and_bounds_compose() {
        let now = at(12, 0);
        let e = received(1, at(9, 0), "u1", "webchat");

        let filter = MetricsFilter::last(TimeRange::LastHour);
        assert!(!filter.matches(&e, now));

        let filter = MetricsFilter {
            time_range: Some(TimeRange::LastDay),
            end: Some(at(8, 0)),
            ..MetricsFilter::default()
        };
        assert!(!filter.matches(&e, now));
    }

    #[test]
    fn test_hourly_activity_is_zero_filled() {
        let metrics = aggregate(&[], &MetricsFilter::default(), at(12, 0));
        assert_eq!(metrics.hourly_activity.len(), 24);
        for (hour, entry) in metrics.hourly_activity.iter().enumerate() {
            assert_eq!(entry.hour, hour as u32);
            assert_eq!(entry.messages, 0);
            assert_eq!(entry.users, 0);
        }
        assert!(metrics.daily_activity.is_empty());
        assert_eq!(metrics.average_response_time_ms, 0.0);
        assert_eq!(metrics.ai_success_rate, 0.0);
        assert_eq!(metrics.user_retention, 0.0);
    }

    #[test]
    fn test_hourly_buckets_by_hour_of_day() {
        let now = at(12, 0);
        let events = vec![
            received(1, at(9, 0), "u1", "webchat"),
            received(2, at(9, 30), "u2", "webchat"),
            received(3, at(11, 5), "u1", "webchat"),
        ];
        let refs: Vec<&TelemetryEvent> = events.iter().collect();

        let metrics = aggregate(&refs, &MetricsFilter::default(), now);
        assert_eq!(metrics.hourly_activity[9].messages, 2);
        assert_eq!(metrics.hourly_activity[9].users, 2);
        assert_eq!(metrics.hourly_activity[11].messages, 1);
        assert_eq!(metrics.hourly_activity[10].messages, 0);
    }

    #[test]
    fn test_top_flows_ranked_and_capped() {
        let now = at(12, 0);
        let mut events = Vec::new();
        let mut id = 0;
        for (flow, count) in [
            ("flow-a", 3),
            ("flow-b", 5),
            ("flow-c", 1),
            ("flow-d", 2),
            ("flow-e", 4),
            ("flow-f", 1),
        ] {
            for _ in 0..count {
                id += 1;
                events.push(event(
                    id,
                    at(11, 0),
                    Some("u1"),
                    Some("webchat"),
                    EventPayload::AutomationTriggered {
                        flow_id: flow.to_string(),
                        error_code: None,
                    },
                ));
            }
        }
        let refs: Vec<&TelemetryEvent> = events.iter().collect();

        let metrics = aggregate(&refs, &MetricsFilter::default(), now);
        assert_eq!(metrics.top_flows.len(), 5);
        assert_eq!(metrics.top_flows[0].flow_id, "flow-b");
        assert_eq!(metrics.top_flows[0].triggers, 5);
        // flow-c and flow-f tie at 1; the id orders them and flow-f drops out
        assert_eq!(metrics.top_flows[4].flow_id, "flow-c");
    }

    #[test]
    fn test_ai_success_rate_and_confidence() {
        let now = at(12, 0);
        let events = vec![
            event(
                1,
                at(11, 0),
                Some("u1"),
                Some("webchat"),
                EventPayload::AiResponseGenerated {
                    model: Some("sonnet".to_string()),
                    confidence: Some(0.8),
                    error_code: None,
                },
            ),
            event(
                2,
                at(11, 1),
                Some("u1"),
                Some("webchat"),
                EventPayload::AiResponseGenerated {
                    model: Some("sonnet".to_string()),
                    confidence: Some(0.6),
                    error_code: None,
                },
            ),
            event(
                3,
                at(11, 2),
                Some("u1"),
                Some("webchat"),
                EventPayload::AiResponseGenerated {
                    model: Some("sonnet".to_string()),
                    confidence: None,
                    error_code: Some("timeout".to_string()),
                },
            ),
            event(
                4,
                at(11, 3),
                Some("u1"),
                Some("webchat"),
                EventPayload::AiResponseGenerated {
                    model: Some("sonnet".to_string()),
                    confidence: None,
                    error_code: Some("timeout".to_string()),
                },
            ),
        ];
        let refs: Vec<&TelemetryEvent> = events.iter().collect();

        let metrics = aggregate(&refs, &MetricsFilter::default(), now);
        assert_eq!(metrics.ai_responses, 4);
        assert_eq!(metrics.ai_error_count, 2);
        assert_eq!(metrics.ai_success_rate, 50.0);
        assert!((metrics.avg_ai_confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_active_users_ignore_the_filter_window() {
        let now = at(12, 0);
        let events = vec![
            received(1, now - Duration::hours(2), "u1", "webchat"),
            received(2, now - Duration::hours(26), "u2", "webchat"),
        ];
        let refs: Vec<&TelemetryEvent> = events.iter().collect();

        // The filter excludes everything, but active_users still sees the
        // store's last 24 hours
        let filter = MetricsFilter {
            platform: Some("telegram".to_string()),
            ..MetricsFilter::default()
        };
        let metrics = aggregate(&refs, &filter, now);
        assert_eq!(metrics.total_messages, 0);
        assert_eq!(metrics.active_users, 1);
    }

    #[test]
    fn test_user_retention_fraction() {
        let now = at(12, 0);
        let joined = |id, actor: &str| {
            event(
                id,
                now - Duration::days(3),
                Some(actor),
                Some("webchat"),
                EventPayload::UserJoined { segment: None },
            )
        };
        let active = |id, actor: &str| {
            event(
                id,
                now - Duration::days(1),
                Some(actor),
                Some("webchat"),
                EventPayload::UserActive,
            )
        };
        let events = vec![
            joined(1, "u1"),
            joined(2, "u2"),
            joined(3, "u3"),
            joined(4, "u4"),
            active(5, "u1"),
            active(6, "u2"),
            active(7, "u3"),
            // u5 is active but never joined recently: not counted
            active(8, "u5"),
        ];
        let refs: Vec<&TelemetryEvent> = events.iter().collect();

        let metrics = aggregate(&refs, &MetricsFilter::default(), now);
        assert_eq!(metrics.user_retention, 0.75);
    }

    #[test]
    fn test_daily_activity_sorted_without_zero_fill() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let d = |day, hour| Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap();
        let events = vec![
            received(1, d(8, 9), "u1", "webchat"),
            received(2, d(3, 10), "u2", "webchat"),
            event(
                3,
                d(8, 11),
                Some("u3"),
                Some("webchat"),
                EventPayload::UserJoined { segment: None },
            ),
        ];
        let refs: Vec<&TelemetryEvent> = events.iter().collect();

        let metrics = aggregate(&refs, &MetricsFilter::default(), now);
        // Only the two dates with events, ascending; the gap days are absent
        assert_eq!(metrics.daily_activity.len(), 2);
        assert_eq!(
            metrics.daily_activity[0].date,
            NaiveDate::from_ymd_opt(2026, 3, 3).unwrap()
        );
        assert_eq!(metrics.daily_activity[1].messages, 1);
        assert_eq!(metrics.daily_activity[1].users, 2);
        assert_eq!(metrics.daily_activity[1].new_users, 1);
    }

    #[test]
    fn test_aggregate_is_deterministic() {
        let now = at(12, 0);
        let events = vec![
            received(1, at(9, 0), "u2", "telegram"),
            received(2, at(9, 1), "u1", "webchat"),
            event(
                3,
                at(9, 2),
                Some("u3"),
                Some("webchat"),
                EventPayload::AutomationTriggered {
                    flow_id: "welcome-flow".to_string(),
                    error_code: None,
                },
            ),
        ];
        let refs: Vec<&TelemetryEvent> = events.iter().collect();

        let filter = MetricsFilter::last(TimeRange::LastDay);
        let first = aggregate(&refs, &filter, now);
        let second = aggregate(&refs, &filter, now);
        assert_eq!(first, second);
    }
}
