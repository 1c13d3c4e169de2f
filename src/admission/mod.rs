//! Admission control: per-key fixed-window rate limiting.

mod controller;
mod policy;
mod sweeper;

pub use controller::{AdmissionController, AdmissionDecision, QuotaStatus, WindowKey};
pub use policy::{Policy, PolicyRegistry, PolicyTable, RouteRule, DEFAULT_POLICY};
pub use sweeper::{spawn_sweeper, SweeperHandle, DEFAULT_SWEEP_INTERVAL};
