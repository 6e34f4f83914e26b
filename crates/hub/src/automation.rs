//! Advisory automation rules.
//!
//! Each metric may carry up to three actions.  Every tick the latest
//! readings are compared against the metric's bounds and at most one action
//! per metric is reported, first match wins:
//!
//!   1. value < min          -> `if_below_min`
//!   2. value < optimal      -> `if_below_optimal`
//!   3. value > max          -> `if_above_max`
//!
//! A condition only matches if its action is configured, so a value below
//! `min` on a metric with no `if_below_min` can still report
//! `if_below_optimal`.  Nothing here drives the actuator.

use std::collections::BTreeMap;

use irrigation_sim::{round_to, Metric, Readings, Thresholds};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_below_min: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_below_optimal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_above_max: Option<String>,
}

pub type AutomationRules = BTreeMap<Metric, RuleSet>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    BelowMin,
    BelowOptimal,
    AboveMax,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggeredAction {
    pub sensor: Metric,
    pub condition: Condition,
    pub action: String,
    /// Reading at evaluation time, two decimals.
    pub value: f64,
    pub threshold: f64,
}

/// Evaluate `rules` against the current readings.  The result replaces the
/// previous tick's list.
pub fn evaluate(
    rules: &AutomationRules,
    thresholds: &Thresholds,
    readings: &Readings,
) -> Vec<TriggeredAction> {
    rules
        .iter()
        .filter_map(|(&metric, rule)| {
            let value = readings.value_for(metric);
            let bounds = thresholds.bounds(metric);

            let candidates = [
                (value < bounds.min, &rule.if_below_min, Condition::BelowMin, bounds.min),
                (
                    value < bounds.optimal,
                    &rule.if_below_optimal,
                    Condition::BelowOptimal,
                    bounds.optimal,
                ),
                (value > bounds.max, &rule.if_above_max, Condition::AboveMax, bounds.max),
            ];

            candidates
                .into_iter()
                .find_map(|(hit, action, condition, threshold)| match action {
                    Some(action) if hit => Some(TriggeredAction {
                        sensor: metric,
                        condition,
                        action: action.clone(),
                        value: round_to(value, 2),
                        threshold,
                    }),
                    _ => None,
                })
        })
        .collect()
}
