//! Business telemetry: typed event ingestion and on-demand aggregation.

mod collector;
mod event;
mod metrics;

pub use collector::{RealtimeStats, TelemetryCollector, DEFAULT_MAX_EVENTS};
pub use event::{flow_display_name, EventPayload, TelemetryEvent, TelemetryKind};
pub use metrics::{
    AggregatedMetrics, DayActivity, FlowActivity, HourActivity, MetricsFilter, PlatformActivity,
    TimeRange,
};
