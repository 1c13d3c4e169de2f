//! Side-channel sinks for audit events.
//!
//! A sink is a separate failure domain from the audit trail itself: the log
//! appends to its in-memory buffer first and forwards to the sink
//! best-effort. A failing sink can never lose the in-memory event or fail
//! the caller's original operation.

use std::io::{self, Write};

use parking_lot::Mutex;
use tracing::{error, info, warn};

use super::event::{AuditEvent, Severity};

/// Destination for audit events outside the in-memory trail.
pub trait AuditSink: Send + Sync {
    /// Forward one event. Errors are counted and swallowed by the log.
    fn emit(&self, event: &AuditEvent) -> io::Result<()>;
}

/// Emits audit events as `tracing` events, mapped by severity.
#[derive(Debug, Default)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn emit(&self, event: &AuditEvent) -> io::Result<()> {
        match event.severity {
            Severity::Low => info!(
                id = event.id,
                kind = ?event.kind,
                actor = event.actor_id.as_deref(),
                success = event.success,
                "audit"
            ),
            Severity::Medium => warn!(
                id = event.id,
                kind = ?event.kind,
                actor = event.actor_id.as_deref(),
                success = event.success,
                "audit"
            ),
            Severity::High | Severity::Critical => error!(
                id = event.id,
                kind = ?event.kind,
                actor = event.actor_id.as_deref(),
                success = event.success,
                "audit"
            ),
        }
        Ok(())
    }
}

/// Writes each event as one JSON line to any `Write` target.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> AuditSink for JsonLinesSink<W> {
    fn emit(&self, event: &AuditEvent) -> io::Result<()> {
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, event)?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

/// Discards every event. Useful in tests and for audit logs that only ever
/// serve in-process queries.
#[derive(Debug, Default)]
pub struct NullSink;

impl AuditSink for NullSink {
    fn emit(&self, _event: &AuditEvent) -> io::Result<()> {
        Ok(())
    }
}
