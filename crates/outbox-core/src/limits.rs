//! Per-integration rate limit policies.
//!
//! The table is plain injected configuration: the dispatcher receives it at
//! construction time and uses it to report load against provider limits.
//! Capacity is enforced indirectly through batch sizing, not a live token
//! bucket, so lookups here never mutate anything.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Load policy for a single integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatePolicy {
    /// Sustained requests per second the provider tolerates.
    pub requests_per_second: u32,
    /// Maximum concurrent in-flight requests to the provider.
    pub max_concurrent: u32,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            requests_per_second: 5,
            max_concurrent: 2,
        }
    }
}

/// Per-integration rate limit table with a default fallback policy.
///
/// Unknown integration ids resolve to the default policy, so producers can
/// enqueue for integrations that have no explicit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitTable {
    /// Fallback policy for integrations without an explicit entry.
    #[serde(default)]
    pub default_policy: RatePolicy,
    /// Explicit per-integration policies, keyed by integration id.
    #[serde(default)]
    pub integrations: HashMap<String, RatePolicy>,
}

impl Default for RateLimitTable {
    fn default() -> Self {
        let mut integrations = HashMap::new();
        integrations.insert(
            "slack".to_string(),
            RatePolicy {
                requests_per_second: 1,
                max_concurrent: 1,
            },
        );
        integrations.insert(
            "twilio".to_string(),
            RatePolicy {
                requests_per_second: 10,
                max_concurrent: 5,
            },
        );
        integrations.insert(
            "sendgrid".to_string(),
            RatePolicy {
                requests_per_second: 20,
                max_concurrent: 10,
            },
        );
        integrations.insert(
            "webhook".to_string(),
            RatePolicy {
                requests_per_second: 10,
                max_concurrent: 4,
            },
        );

        Self {
            default_policy: RatePolicy::default(),
            integrations,
        }
    }
}

impl RateLimitTable {
    /// Create an empty table with only the fallback policy.
    pub fn with_default(default_policy: RatePolicy) -> Self {
        Self {
            default_policy,
            integrations: HashMap::new(),
        }
    }

    /// Add or replace the policy for an integration.
    pub fn with_policy(mut self, integration_id: &str, policy: RatePolicy) -> Self {
        self.integrations.insert(integration_id.to_string(), policy);
        self
    }

    /// Look up the policy for an integration, falling back to the default.
    pub fn policy_for(&self, integration_id: &str) -> &RatePolicy {
        self.integrations
            .get(integration_id)
            .unwrap_or(&self.default_policy)
    }
}
