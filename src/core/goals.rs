//! Spending goals captured alongside a forecast.
//!
//! Goals are expanded into a flat per-age table for display and export.
//! They are not applied to `project`; a goal never changes a projection row.

use serde::{Deserialize, Serialize};

pub const MAX_GOALS: usize = 5;
pub const RECURRING_GOAL_YEARS: u32 = 5;
pub const GOAL_AGE_RANGE: std::ops::RangeInclusive<u32> = 50..=95;
pub const GOAL_AMOUNT_RANGE: std::ops::RangeInclusive<f64> = 1_000.0..=1_000_000.0;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GoalRecurrence {
    #[serde(alias = "oneTime", alias = "one_time", alias = "once")]
    OneTime,
    /// Repeats yearly for `RECURRING_GOAL_YEARS` years from the target age.
    #[serde(alias = "fiveYear", alias = "five_year", alias = "recurring")]
    FiveYear,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub name: String,
    pub target_age: u32,
    pub amount: f64,
    pub recurrence: GoalRecurrence,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalEntry {
    pub name: String,
    pub age: u32,
    pub amount: f64,
}

pub fn validate_goals(goals: &[Goal]) -> Result<(), String> {
    if goals.is_empty() || goals.len() > MAX_GOALS {
        return Err(format!("goals must contain between 1 and {MAX_GOALS} entries"));
    }

    for (idx, goal) in goals.iter().enumerate() {
        let label = idx + 1;
        if !GOAL_AGE_RANGE.contains(&goal.target_age) {
            return Err(format!(
                "goal {label}: targetAge must be between {} and {}",
                GOAL_AGE_RANGE.start(),
                GOAL_AGE_RANGE.end()
            ));
        }
        if !GOAL_AMOUNT_RANGE.contains(&goal.amount) {
            return Err(format!(
                "goal {label}: amount must be between {} and {}",
                GOAL_AMOUNT_RANGE.start(),
                GOAL_AMOUNT_RANGE.end()
            ));
        }
    }
    Ok(())
}

/// One entry per goal year, in input order.
pub fn expand_goals(goals: &[Goal]) -> Vec<GoalEntry> {
    goals
        .iter()
        .flat_map(|goal| {
            let years = match goal.recurrence {
                GoalRecurrence::OneTime => 1,
                GoalRecurrence::FiveYear => RECURRING_GOAL_YEARS,
            };
            (0..years).map(move |offset| GoalEntry {
                name: goal.name.clone(),
                age: goal.target_age.saturating_add(offset),
                amount: goal.amount,
            })
        })
        .collect()
}
