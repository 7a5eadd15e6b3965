//! CSV renderings of projections, scenario comparisons and goal tables.
//!
//! Column headers follow the forecast table as shown to users; age is always
//! the first column.

use std::io::Write;

use thiserror::Error;

use crate::core::{GoalEntry, ProjectionRow, ScenarioComparison};

pub const PROJECTION_HEADERS: [&str; 11] = [
    "Age",
    "Spouse Income",
    "Dividend Income",
    "After-Tax Draw",
    "After-Tax Balance",
    "Dividend Balance",
    "401k Income",
    "401k Balance",
    "Social Security",
    "Total Income",
    "Gap",
];

pub const COMPARISON_HEADERS: [&str; 5] = [
    "Age",
    "Total Income (A)",
    "Total Income (B)",
    "401k Balance (A)",
    "401k Balance (B)",
];

pub const GOAL_HEADERS: [&str; 3] = ["Name", "Age", "Amount"];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to flush CSV output: {0}")]
    Io(#[from] std::io::Error),
}

fn money(value: f64) -> String {
    format!("{value:.2}")
}

fn optional_money(value: Option<f64>) -> String {
    value.map(money).unwrap_or_default()
}

fn projection_record(row: &ProjectionRow) -> [String; 11] {
    [
        row.age.to_string(),
        money(row.spouse_income),
        money(row.dividend_income),
        money(row.after_tax_draw),
        money(row.after_tax_balance),
        money(row.dividend_balance),
        money(row.income_401k),
        money(row.balance_401k),
        money(row.social_security),
        money(row.total_income),
        money(row.gap),
    ]
}

pub fn write_projection_csv<W: Write>(
    rows: &[ProjectionRow],
    writer: W,
) -> Result<(), ExportError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(PROJECTION_HEADERS)?;
    for row in rows {
        csv_writer.write_record(projection_record(row))?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Chart series of both scenarios side by side; ages covered by only one
/// scenario leave the other's cells empty.
pub fn write_comparison_csv<W: Write>(
    comparison: &ScenarioComparison,
    writer: W,
) -> Result<(), ExportError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(COMPARISON_HEADERS)?;
    for (income, balance) in comparison
        .total_income
        .iter()
        .zip(&comparison.balance_401k)
    {
        csv_writer.write_record([
            income.age.to_string(),
            optional_money(income.scenario_a),
            optional_money(income.scenario_b),
            optional_money(balance.scenario_a),
            optional_money(balance.scenario_b),
        ])?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Both full scenario tables in one file, stacked, with a leading
/// `Scenario` column.
pub fn write_scenarios_csv<W: Write>(
    comparison: &ScenarioComparison,
    writer: W,
) -> Result<(), ExportError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    let mut header = vec!["Scenario"];
    header.extend(PROJECTION_HEADERS);
    csv_writer.write_record(&header)?;
    for (label, rows) in [("A", &comparison.scenario_a), ("B", &comparison.scenario_b)] {
        for row in rows.iter() {
            let mut record = vec![label.to_string()];
            record.extend(projection_record(row));
            csv_writer.write_record(&record)?;
        }
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_goals_csv<W: Write>(entries: &[GoalEntry], writer: W) -> Result<(), ExportError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(GOAL_HEADERS)?;
    for entry in entries {
        csv_writer.write_record([
            entry.name.clone(),
            entry.age.to_string(),
            money(entry.amount),
        ])?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn projection_csv_string(rows: &[ProjectionRow]) -> Result<String, ExportError> {
    let mut buffer = Vec::new();
    write_projection_csv(rows, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

pub fn comparison_csv_string(comparison: &ScenarioComparison) -> Result<String, ExportError> {
    let mut buffer = Vec::new();
    write_comparison_csv(comparison, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

pub fn scenarios_csv_string(comparison: &ScenarioComparison) -> Result<String, ExportError> {
    let mut buffer = Vec::new();
    write_scenarios_csv(comparison, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

pub fn goals_csv_string(entries: &[GoalEntry]) -> Result<String, ExportError> {
    let mut buffer = Vec::new();
    write_goals_csv(entries, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SeriesPoint;

    fn sample_row(age: u32) -> ProjectionRow {
        ProjectionRow {
            age,
            spouse_income: 34_000.0,
            dividend_income: 34_000.0,
            after_tax_draw: 32_000.0,
            after_tax_balance: 1_346_000.0,
            dividend_balance: 1_030_000.0,
            income_401k: 0.0,
            balance_401k: 925_550.0,
            social_security: 0.0,
            total_income: 68_000.0,
            gap: -32_000.0,
        }
    }

    #[test]
    fn projection_csv_has_header_and_one_line_per_row() {
        let csv = projection_csv_string(&[sample_row(53), sample_row(54)]).expect("csv renders");
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "Age,Spouse Income,Dividend Income,After-Tax Draw,After-Tax Balance,Dividend Balance,401k Income,401k Balance,Social Security,Total Income,Gap"
        );
        assert_eq!(
            lines[1],
            "53,34000.00,34000.00,32000.00,1346000.00,1030000.00,0.00,925550.00,0.00,68000.00,-32000.00"
        );
        assert!(lines[2].starts_with("54,"));
    }

    #[test]
    fn empty_projection_still_writes_header() {
        let csv = projection_csv_string(&[]).expect("csv renders");
        assert_eq!(csv.lines().count(), 1);
    }

    #[test]
    fn comparison_csv_leaves_missing_scenario_cells_empty() {
        let comparison = ScenarioComparison {
            scenario_a: vec![sample_row(51)],
            scenario_b: vec![sample_row(50), sample_row(51)],
            total_income: vec![
                SeriesPoint {
                    age: 50,
                    scenario_a: None,
                    scenario_b: Some(1.0),
                },
                SeriesPoint {
                    age: 51,
                    scenario_a: Some(2.0),
                    scenario_b: Some(3.0),
                },
            ],
            balance_401k: vec![
                SeriesPoint {
                    age: 50,
                    scenario_a: None,
                    scenario_b: Some(4.0),
                },
                SeriesPoint {
                    age: 51,
                    scenario_a: Some(5.0),
                    scenario_b: Some(6.0),
                },
            ],
        };
        let csv = comparison_csv_string(&comparison).expect("csv renders");
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[1], "50,,1.00,,4.00");
        assert_eq!(lines[2], "51,2.00,3.00,5.00,6.00");
    }

    #[test]
    fn scenarios_csv_stacks_both_full_tables() {
        let comparison = ScenarioComparison {
            scenario_a: vec![sample_row(53)],
            scenario_b: vec![sample_row(57), sample_row(58)],
            total_income: Vec::new(),
            balance_401k: Vec::new(),
        };
        let csv = scenarios_csv_string(&comparison).expect("csv renders");
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Scenario,Age,Spouse Income,"));
        assert!(lines[0].ends_with(",Total Income,Gap"));
        assert_eq!(
            lines[1],
            "A,53,34000.00,34000.00,32000.00,1346000.00,1030000.00,0.00,925550.00,0.00,68000.00,-32000.00"
        );
        assert!(lines[2].starts_with("B,57,"));
        assert!(lines[3].starts_with("B,58,"));
    }

    #[test]
    fn goals_csv_quotes_names_with_commas() {
        let entries = vec![GoalEntry {
            name: "Kitchen, bath".to_string(),
            age: 61,
            amount: 30_000.0,
        }];
        let csv = goals_csv_string(&entries).expect("csv renders");
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Name,Age,Amount");
        assert_eq!(lines[1], "\"Kitchen, bath\",61,30000.00");
    }
}
