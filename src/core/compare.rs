use std::collections::BTreeMap;

use super::engine::project;
use super::types::{
    ProjectionConstants, ProjectionError, ProjectionRow, ScenarioComparison, ScenarioParameters,
    SeriesPoint,
};

/// Projects both scenarios and lines up the charted columns by age.
pub fn compare_scenarios(
    scenario_a: &ScenarioParameters,
    scenario_b: &ScenarioParameters,
    constants: &ProjectionConstants,
) -> Result<ScenarioComparison, ProjectionError> {
    let rows_a = project(scenario_a, constants)?;
    let rows_b = project(scenario_b, constants)?;

    let total_income = align_series(&rows_a, &rows_b, |row| row.total_income);
    let balance_401k = align_series(&rows_a, &rows_b, |row| row.balance_401k);

    Ok(ScenarioComparison {
        scenario_a: rows_a,
        scenario_b: rows_b,
        total_income,
        balance_401k,
    })
}

fn align_series(
    rows_a: &[ProjectionRow],
    rows_b: &[ProjectionRow],
    column: impl Fn(&ProjectionRow) -> f64,
) -> Vec<SeriesPoint> {
    let mut by_age: BTreeMap<u32, SeriesPoint> = BTreeMap::new();
    for row in rows_a {
        by_age
            .entry(row.age)
            .or_insert_with(|| empty_point(row.age))
            .scenario_a = Some(column(row));
    }
    for row in rows_b {
        by_age
            .entry(row.age)
            .or_insert_with(|| empty_point(row.age))
            .scenario_b = Some(column(row));
    }
    by_age.into_values().collect()
}

fn empty_point(age: u32) -> SeriesPoint {
    SeriesPoint {
        age,
        scenario_a: None,
        scenario_b: None,
    }
}
