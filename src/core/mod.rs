mod compare;
mod engine;
mod goals;
mod types;

pub use compare::compare_scenarios;
pub use engine::{annuity_payment, project, project_default};
pub use goals::{Goal, GoalEntry, GoalRecurrence, expand_goals, validate_goals};
pub use types::{
    DrawPolicy, ProjectionConstants, ProjectionError, ProjectionRow, RetirementAccountModel,
    ScenarioComparison, ScenarioParameters, SeriesPoint,
};
