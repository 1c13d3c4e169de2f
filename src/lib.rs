//! Palisade - Admission, Audit & Telemetry Core
//!
//! This crate guards the inbound API boundary of a multi-tenant automation
//! platform: it decides whether a call is admitted (fixed-window rate
//! limiting), keeps a bounded tamper-resistant trail of security-relevant
//! events, and aggregates operational telemetry for reporting. Everything is
//! in-process and in-memory; callers hold explicitly constructed instances
//! and wire them together at the boundary.

pub mod admission;
pub mod audit;
pub mod bounded;
pub mod config;
pub mod error;
pub mod telemetry;
