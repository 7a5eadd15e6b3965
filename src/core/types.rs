use serde::Serialize;
use thiserror::Error;

/// How the 401(k) balance is drawn down from the withdrawal age onward.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RetirementAccountModel {
    /// Annuity withdrawal over `end_age - withdraw_401k_age + 1` years,
    /// recomputed every year against the current balance.
    Amortized,
    /// Fixed gross withdrawal each year, capped at the available balance.
    Flat { annual_withdrawal: f64 },
}

/// Which years the after-tax draw is taken out of the after-tax balance.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DrawPolicy {
    /// Stop drawing once 401(k) withdrawals start.
    UntilWithdrawalAge,
    /// Draw every year of the plan.
    Always,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioParameters {
    pub retirement_age: u32,
    pub withdraw_401k_age: u32,
    pub social_security_age: u32,
    pub end_age: u32,
    pub annual_need: f64,
    pub after_tax_start: f64,
    pub dividend_start: f64,
    pub after_tax_return: f64,
    pub dividend_yield: f64,
    pub capital_appreciation: f64,
    pub contrib_start_age: u32,
    pub contrib_end_age: u32,
    pub annual_contribution: f64,
    pub return_401k: f64,
    pub roth_fraction: f64,
    pub withdraw_tax_rate: f64,
    pub inflation_rate: f64,
    pub retirement_account: RetirementAccountModel,
    pub draw_policy: DrawPolicy,
}

impl ScenarioParameters {
    pub fn start_age(&self) -> u32 {
        self.retirement_age.min(self.contrib_start_age)
    }
}

/// Values the calculators hard-code rather than expose as inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionConstants {
    pub spouse_income: f64,
    /// Spouse income is paid up to and including this age.
    pub spouse_income_until_age: u32,
    pub dividend_tax_rate: f64,
    pub social_security_income: f64,
    pub seed_401k_balance: f64,
    /// First age at which the dividend portfolio switches to annuity payouts.
    pub annuity_start_age: u32,
}

impl Default for ProjectionConstants {
    fn default() -> Self {
        Self {
            spouse_income: 34_000.0,
            spouse_income_until_age: 60,
            dividend_tax_rate: 0.15,
            social_security_income: 60_000.0,
            seed_401k_balance: 865_000.0,
            annuity_start_age: 75,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionRow {
    pub age: u32,
    pub spouse_income: f64,
    pub dividend_income: f64,
    pub after_tax_draw: f64,
    pub after_tax_balance: f64,
    pub dividend_balance: f64,
    #[serde(rename = "income401k")]
    pub income_401k: f64,
    #[serde(rename = "balance401k")]
    pub balance_401k: f64,
    pub social_security: f64,
    pub total_income: f64,
    pub gap: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    pub age: u32,
    pub scenario_a: Option<f64>,
    pub scenario_b: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioComparison {
    pub scenario_a: Vec<ProjectionRow>,
    pub scenario_b: Vec<ProjectionRow>,
    pub total_income: Vec<SeriesPoint>,
    #[serde(rename = "balance401k")]
    pub balance_401k: Vec<SeriesPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ProjectionError {
    #[error("net {stream} growth rate {rate} must be greater than -100%")]
    NetRateOutOfRange { stream: &'static str, rate: f64 },
    #[error("{column} is not finite at age {age}")]
    NonFinite { age: u32, column: &'static str },
}
