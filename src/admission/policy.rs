//! Rate-limit policies and endpoint-to-policy routing.
//!
//! Policies are immutable values defined at construction time. Inbound
//! endpoint paths are resolved to a policy through an ordered route table of
//! path fragments; the first matching fragment wins and the `general` policy
//! is the fallback for everything else.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::trace;

use crate::error::{PalisadeError, Result};

/// Name of the fallback policy every table must define.
pub const DEFAULT_POLICY: &str = "general";

/// An immutable rate-limit policy: a fixed window and a request budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Policy name, referenced by route rules
    pub name: String,
    /// Window length in milliseconds
    pub window_ms: i64,
    /// Maximum requests admitted per window
    pub max_requests: u32,
}

impl Policy {
    /// Create a policy value.
    pub fn new(name: &str, window_ms: i64, max_requests: u32) -> Self {
        Self {
            name: name.to_string(),
            window_ms,
            max_requests,
        }
    }
}

/// A single route rule: paths containing `fragment` map to `policy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    /// Path fragment matched by substring
    pub fragment: String,
    /// Name of the policy to apply
    pub policy: String,
}

/// The full policy table: the policy set plus the ordered route rules.
///
/// Deserializable from configuration; `Default` yields the built-in table
/// used when no configuration is supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyTable {
    /// All defined policies
    #[serde(default = "default_policies")]
    pub policies: Vec<Policy>,
    /// Ordered route rules, first match wins
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteRule>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            policies: default_policies(),
            routes: default_routes(),
        }
    }
}

fn default_policies() -> Vec<Policy> {
    vec![
        Policy::new("auth", 900_000, 20),
        Policy::new("messaging", 60_000, 60),
        Policy::new("ai_generation", 60_000, 10),
        Policy::new("bulk", 3_600_000, 10),
        Policy::new("analytics", 60_000, 30),
        Policy::new("onboarding", 3_600_000, 15),
        Policy::new(DEFAULT_POLICY, 60_000, 100),
    ]
}

fn default_routes() -> Vec<RouteRule> {
    let route = |fragment: &str, policy: &str| RouteRule {
        fragment: fragment.to_string(),
        policy: policy.to_string(),
    };
    vec![
        route("/auth", "auth"),
        route("/messages", "messaging"),
        route("/ai", "ai_generation"),
        route("/bulk", "bulk"),
        route("/analytics", "analytics"),
        route("/onboarding", "onboarding"),
    ]
}

/// Maps an endpoint path to its rate-limit policy.
///
/// Stateless after construction; lookups never fail because construction
/// guarantees the fallback policy exists.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    policies: HashMap<String, Policy>,
    routes: Vec<RouteRule>,
}

impl PolicyRegistry {
    /// Build a registry from a policy table.
    ///
    /// Fails when the table lacks the `general` fallback policy or a route
    /// references an undefined policy. Both are configuration mistakes that
    /// must abort construction rather than surface per request.
    pub fn from_table(table: PolicyTable) -> Result<Self> {
        let policies: HashMap<String, Policy> = table
            .policies
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();

        if !policies.contains_key(DEFAULT_POLICY) {
            return Err(PalisadeError::Policy(format!(
                "policy table has no '{}' fallback policy",
                DEFAULT_POLICY
            )));
        }

        for rule in &table.routes {
            if !policies.contains_key(&rule.policy) {
                return Err(PalisadeError::Policy(format!(
                    "route '{}' references undefined policy '{}'",
                    rule.fragment, rule.policy
                )));
            }
        }

        Ok(Self {
            policies,
            routes: table.routes,
        })
    }

    /// Look up a policy by name.
    pub fn get(&self, name: &str) -> Option<&Policy> {
        self.policies.get(name)
    }

    /// The fallback policy.
    pub fn default_policy(&self) -> &Policy {
        // Guaranteed present by construction
        &self.policies[DEFAULT_POLICY]
    }

    /// Resolve an endpoint path to its policy.
    ///
    /// Route rules are tried in order and match by substring; the first hit
    /// wins. Paths matching no rule get the fallback policy.
    pub fn resolve(&self, path: &str) -> &Policy {
        for rule in &self.routes {
            if path.contains(&rule.fragment) {
                trace!(path = %path, policy = %rule.policy, "Resolved endpoint policy");
                // Guaranteed present by construction
                return &self.policies[&rule.policy];
            }
        }
        trace!(path = %path, policy = DEFAULT_POLICY, "No route matched, using fallback policy");
        self.default_policy()
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        // The built-in table always validates
        Self::from_table(PolicyTable::default()).unwrap()
    }
}
