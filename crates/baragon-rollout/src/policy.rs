//! How the coordinator reacts to a partial failure.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use baragon_core::config::CoordinatorConfig;

/// What to do when some nodes applied a request and others did not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPolicy {
    /// Leave succeeded nodes as they are.
    Never,
    /// Send one compensating request to the nodes that succeeded.
    #[default]
    OnFailure,
}

/// Coordinator-wide settings.
#[derive(Debug, Clone)]
pub struct RolloutPolicy {
    /// How long to wait for every targeted node's outcome.
    pub outcome_timeout: Duration,
    pub rollback: RollbackPolicy,
    /// Cancel queued requests when a full-state request for the same
    /// service and group arrives.
    pub supersede_queued: bool,
    pub dead_timeout: Duration,
}

impl Default for RolloutPolicy {
    fn default() -> Self {
        Self::from(&CoordinatorConfig::default())
    }
}

impl From<&CoordinatorConfig> for RolloutPolicy {
    fn from(config: &CoordinatorConfig) -> Self {
        Self {
            outcome_timeout: config.outcome_timeout(),
            rollback: if config.rollback_on_failure {
                RollbackPolicy::OnFailure
            } else {
                RollbackPolicy::Never
            },
            supersede_queued: config.supersede_queued,
            dead_timeout: config.dead_timeout(),
        }
    }
}

/// Per-submission overrides.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Target these groups instead of the service's own groups.
    pub group_override: Option<Vec<String>>,
    /// Override the coordinator's rollback policy.
    pub rollback: Option<RollbackPolicy>,
}

impl SubmitOptions {
    pub fn with_groups(mut self, groups: &[&str]) -> Self {
        self.group_override = Some(groups.iter().map(|g| g.to_string()).collect());
        self
    }

    pub fn with_rollback(mut self, policy: RollbackPolicy) -> Self {
        self.rollback = Some(policy);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_coordinator_config() {
        let policy = RolloutPolicy::default();
        assert_eq!(policy.rollback, RollbackPolicy::OnFailure);
        assert!(policy.supersede_queued);
        assert_eq!(policy.outcome_timeout, Duration::from_secs(30));

        let config = CoordinatorConfig {
            rollback_on_failure: false,
            ..CoordinatorConfig::default()
        };
        assert_eq!(RolloutPolicy::from(&config).rollback, RollbackPolicy::Never);
    }

    #[test]
    fn policy_wire_names() {
        let json = serde_json::to_string(&RollbackPolicy::OnFailure).unwrap();
        assert_eq!(json, "\"on_failure\"");
        let back: RollbackPolicy = serde_json::from_str("\"never\"").unwrap();
        assert_eq!(back, RollbackPolicy::Never);
    }

    #[test]
    fn submit_options_builders() {
        let options = SubmitOptions::default()
            .with_groups(&["edge", "internal"])
            .with_rollback(RollbackPolicy::Never);
        assert_eq!(options.group_override.unwrap(), ["edge", "internal"]);
        assert_eq!(options.rollback, Some(RollbackPolicy::Never));
    }
}
