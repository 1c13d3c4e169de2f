//! Core admission controller implementation.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, trace};

use super::policy::{Policy, PolicyRegistry};

/// A key that uniquely identifies a counting window.
///
/// The key is composed of the policy name and the caller identifier, so the
/// same identifier gets an independent budget under each policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    /// The policy this window counts against
    pub policy: String,
    /// Caller identifier (derived upstream from auth token or IP)
    pub identifier: String,
}

impl WindowKey {
    /// Create a new window key.
    pub fn new(policy: &str, identifier: &str) -> Self {
        Self {
            policy: policy.to_string(),
            identifier: identifier.to_string(),
        }
    }
}

impl std::fmt::Display for WindowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.policy, self.identifier)
    }
}

/// Per-key fixed-window counter state.
#[derive(Debug, Clone)]
struct WindowEntry {
    /// Requests counted in the current window
    count: u32,
    /// When the current window opened
    window_start: DateTime<Utc>,
    /// When the current window ends and the count resets
    reset_at: DateTime<Utc>,
    /// First request ever seen for this key
    first_request_at: DateTime<Utc>,
}

impl WindowEntry {
    /// Open a fresh window at `now` with the first request already counted.
    fn open(now: DateTime<Utc>, window_ms: i64) -> Self {
        Self {
            count: 1,
            window_start: now,
            reset_at: now + Duration::milliseconds(window_ms),
            first_request_at: now,
        }
    }

    /// Reopen the window, keeping the key's first-seen time.
    fn reopen(&mut self, now: DateTime<Utc>, window_ms: i64) {
        self.count = 1;
        self.window_start = now;
        self.reset_at = now + Duration::milliseconds(window_ms);
    }
}

/// The outcome of an admission check.
///
/// Callers translate this into the `X-RateLimit-Remaining`,
/// `X-RateLimit-Reset` and (when denied) `Retry-After` response headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionDecision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u32,
    /// When the current window resets
    pub reset_at: DateTime<Utc>,
    /// Seconds until retry is worthwhile, only set when denied
    pub retry_after_secs: Option<u64>,
}

impl AdmissionDecision {
    fn allowed(remaining: u32, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_at,
            retry_after_secs: None,
        }
    }

    fn denied(reset_at: DateTime<Utc>, retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_at,
            retry_after_secs: Some(retry_after_secs),
        }
    }
}

/// Read-only view of a counting window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    /// Requests counted in the current window
    pub count: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// When the current window opened
    pub window_start: DateTime<Utc>,
    /// When the current window resets
    pub reset_at: DateTime<Utc>,
    /// First request ever seen for this key
    pub first_request_at: DateTime<Utc>,
}

/// Decides whether inbound calls are admitted, one fixed window per
/// (policy, identifier) pair.
///
/// The counting scheme is an intentional fixed window, not a sliding one: a
/// burst straddling a window boundary can admit up to twice the budget.
/// That trade-off buys O(1) state per key and a single compare-and-count
/// per request.
///
/// The controller never logs admission outcomes anywhere but its own trace
/// output; callers route deny/allow decisions into the audit log.
pub struct AdmissionController {
    registry: PolicyRegistry,
    windows: DashMap<WindowKey, WindowEntry>,
}

impl AdmissionController {
    /// Create a controller over the given policy registry.
    pub fn new(registry: PolicyRegistry) -> Self {
        Self {
            registry,
            windows: DashMap::new(),
        }
    }

    /// Build a controller from configuration.
    ///
    /// Fails when the configured policy table is invalid; see
    /// [`PolicyRegistry::from_table`].
    pub fn from_config(config: &crate::config::AdmissionConfig) -> crate::error::Result<Self> {
        Ok(Self::new(PolicyRegistry::from_table(
            config.policy_table.clone(),
        )?))
    }

    /// The policy registry this controller resolves endpoints against.
    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    /// Check the rate limit for an identifier under a policy.
    ///
    /// Counts the request against the current window, opening a new window
    /// when none exists or the previous one has ended.
    pub fn check(&self, identifier: &str, policy: &Policy) -> AdmissionDecision {
        self.check_at(identifier, policy, Utc::now())
    }

    /// Resolve the policy for an endpoint path, then check the limit.
    pub fn check_path(&self, identifier: &str, path: &str) -> AdmissionDecision {
        let policy = self.registry.resolve(path);
        self.check_at(identifier, policy, Utc::now())
    }

    fn check_at(
        &self,
        identifier: &str,
        policy: &Policy,
        now: DateTime<Utc>,
    ) -> AdmissionDecision {
        let key = WindowKey::new(&policy.name, identifier);

        // The entry guard holds the shard lock, making the whole
        // read-modify-write atomic per key.
        let decision = match self.windows.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                let entry = vacant.insert(WindowEntry::open(now, policy.window_ms));
                AdmissionDecision::allowed(policy.max_requests.saturating_sub(1), entry.reset_at)
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                // A backward-moving clock keeps the current window: the
                // window ends only once `now` reaches `reset_at`.
                if now >= entry.reset_at {
                    entry.reopen(now, policy.window_ms);
                    AdmissionDecision::allowed(
                        policy.max_requests.saturating_sub(1),
                        entry.reset_at,
                    )
                } else if entry.count < policy.max_requests {
                    entry.count += 1;
                    AdmissionDecision::allowed(
                        policy.max_requests - entry.count,
                        entry.reset_at,
                    )
                } else {
                    AdmissionDecision::denied(entry.reset_at, retry_after_secs(entry.reset_at, now))
                }
            }
        };

        if decision.allowed {
            trace!(
                key = %key,
                remaining = decision.remaining,
                "Request admitted"
            );
        } else {
            debug!(
                key = %key,
                retry_after_secs = decision.retry_after_secs,
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// Read the current window for a key without counting a request.
    ///
    /// Returns `None` when the key has never been seen. An entry whose
    /// window has already ended reads as a fresh window with nothing
    /// consumed, since the phase is re-derived on each access.
    pub fn status(&self, identifier: &str, policy: &Policy) -> Option<QuotaStatus> {
        self.status_at(identifier, policy, Utc::now())
    }

    fn status_at(
        &self,
        identifier: &str,
        policy: &Policy,
        now: DateTime<Utc>,
    ) -> Option<QuotaStatus> {
        let key = WindowKey::new(&policy.name, identifier);
        let entry = self.windows.get(&key)?;

        if now >= entry.reset_at {
            Some(QuotaStatus {
                count: 0,
                remaining: policy.max_requests,
                window_start: entry.window_start,
                reset_at: entry.reset_at,
                first_request_at: entry.first_request_at,
            })
        } else {
            Some(QuotaStatus {
                count: entry.count,
                remaining: policy.max_requests.saturating_sub(entry.count),
                window_start: entry.window_start,
                reset_at: entry.reset_at,
                first_request_at: entry.first_request_at,
            })
        }
    }

    /// Delete the window for a key, restoring its full budget.
    ///
    /// Admin/test override; the next request opens a fresh window.
    pub fn reset(&self, identifier: &str, policy: &Policy) {
        let key = WindowKey::new(&policy.name, identifier);
        if self.windows.remove(&key).is_some() {
            debug!(key = %key, "Rate limit window reset");
        }
    }

    /// Drop every window whose reset time has passed.
    ///
    /// Returns the number of entries removed. Purely a memory bound: an
    /// expired entry left in place is treated as fresh on its next access
    /// anyway.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now())
    }

    fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, entry| now < entry.reset_at);
        before - self.windows.len()
    }

    /// Number of live counting windows.
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(PolicyRegistry::default())
    }
}

fn retry_after_secs(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let ms = (reset_at - now).num_milliseconds().max(0);
    // Round up so callers never retry before the window actually resets
    ((ms + 999) / 1000) as u64
}
