//! Optimizer configuration that downstream crates can serialize/deserialize.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Where the optimizer looks for new matches after a successful transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RescanPolicy {
    /// Only the changed region reported by the transformer (plus its neighbours).
    Region,
    /// The whole plan.
    Whole,
}

impl FromStr for RescanPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "region" => Ok(RescanPolicy::Region),
            "whole" => Ok(RescanPolicy::Whole),
            other => Err(Error::Config(format!("unknown rescan policy: {other}"))),
        }
    }
}

/// What happens when a rule fails while checking or transforming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the whole optimization pass and report the error.
    Abort,
    /// Restore the plan, disable the failing rule for this pass, record a warning.
    BestEffort,
}

impl FromStr for FailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "abort" => Ok(FailurePolicy::Abort),
            "best_effort" => Ok(FailurePolicy::BestEffort),
            other => Err(Error::Config(format!("unknown failure policy: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Iteration ceiling per rule set. Each iteration runs every rule of the set once.
    pub max_iterations: usize,

    pub rescan: RescanPolicy,

    pub failure_policy: FailurePolicy,

    /// Rule names that must not run.
    pub disabled_rules: Vec<String>,

    /// Record an explain string before/after every rule application.
    pub enable_trace: bool,

    /// Validate plan invariants after every transform.
    pub validate_after_transform: bool,

    /// Run the map-key pruning helper after the rule sets.
    pub prune_map_keys: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            rescan: RescanPolicy::Region,
            failure_policy: FailurePolicy::Abort,
            disabled_rules: Vec::new(),
            enable_trace: false,
            validate_after_transform: true,
            prune_map_keys: true,
        }
    }
}

impl OptimizerConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `FLOWPLAN_MAX_ITERATIONS`: iteration ceiling per rule set
    /// - `FLOWPLAN_RESCAN`: `region` or `whole`
    /// - `FLOWPLAN_FAILURE_POLICY`: `abort` or `best_effort`
    /// - `FLOWPLAN_DISABLED_RULES`: comma separated rule names
    /// - `FLOWPLAN_TRACE`: `1`/`true` to record rule traces
    /// - `FLOWPLAN_PRUNE_MAP_KEYS`: `0`/`false` to skip map-key pruning
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("FLOWPLAN_MAX_ITERATIONS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.max_iterations = v;
            }
        }

        if let Ok(s) = std::env::var("FLOWPLAN_RESCAN") {
            if let Ok(v) = s.parse::<RescanPolicy>() {
                cfg.rescan = v;
            }
        }

        if let Ok(s) = std::env::var("FLOWPLAN_FAILURE_POLICY") {
            if let Ok(v) = s.parse::<FailurePolicy>() {
                cfg.failure_policy = v;
            }
        }

        if let Ok(s) = std::env::var("FLOWPLAN_DISABLED_RULES") {
            cfg.disabled_rules = parse_rule_list(&s);
        }

        if let Ok(s) = std::env::var("FLOWPLAN_TRACE") {
            if let Some(v) = parse_flag(&s) {
                cfg.enable_trace = v;
            }
        }

        if let Ok(s) = std::env::var("FLOWPLAN_PRUNE_MAP_KEYS") {
            if let Some(v) = parse_flag(&s) {
                cfg.prune_map_keys = v;
            }
        }

        cfg
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_rescan(mut self, rescan: RescanPolicy) -> Self {
        self.rescan = rescan;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_trace(mut self, enable: bool) -> Self {
        self.enable_trace = enable;
        self
    }

    pub fn disable_rule(mut self, name: impl Into<String>) -> Self {
        self.disabled_rules.push(name.into());
        self
    }

    pub fn is_disabled(&self, rule: &str) -> bool {
        self.disabled_rules
            .iter()
            .any(|r| r.eq_ignore_ascii_case(rule))
    }

    /// Reject settings the optimizer cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_iterations == 0 {
            return Err(Error::Config(
                "max_iterations must be at least one iteration".into(),
            ));
        }
        Ok(())
    }
}

pub fn parse_rule_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|r| r.trim())
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
