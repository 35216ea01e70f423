//! Catalyst context supplied by the surrounding system.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::agent::evidence::Evidence;
use crate::filing::CompanyId;

/// Outcomes of past catalysts at the same stage and indication.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoricalOutcomes {
    /// Percentage of positive outcomes.
    pub success_rate: f64,
    pub total_events: u32,
    pub positive_outcomes: u32,
    /// Average stock move around the catalyst, in percent.
    pub average_price_change: f64,
    /// Drugs in the company's pipeline.
    pub pipeline_drugs: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinancialSnapshot {
    pub cash_on_hand: f64,
    pub quarterly_burn_rate: f64,
    pub runway_months: f64,
    pub revenue: f64,
    pub market_cap: f64,
}

/// The catalyst under analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalystContext {
    pub company_id: CompanyId,
    pub company_name: String,
    #[serde(default)]
    pub ticker: Option<String>,
    pub drug: String,
    #[serde(default)]
    pub indication: Option<String>,
    pub stage: String,
    #[serde(default)]
    pub catalyst_date: Option<NaiveDate>,
    #[serde(default)]
    pub historical: HistoricalOutcomes,
    #[serde(default)]
    pub financials: FinancialSnapshot,
}

impl CatalystContext {
    /// Seed evidence derived from the structured context.
    pub fn seed_evidence(&self) -> Vec<Evidence> {
        let h = &self.historical;
        let f = &self.financials;
        vec![
            Evidence::Seed {
                label: "historical outcomes".to_string(),
                summary: format!(
                    "{:.1}% positive across {} {} catalysts ({} positive), average move {:+.1}%; {} drugs in pipeline",
                    h.success_rate,
                    h.total_events,
                    self.stage,
                    h.positive_outcomes,
                    h.average_price_change,
                    h.pipeline_drugs
                ),
            },
            Evidence::Seed {
                label: "financials".to_string(),
                summary: format!(
                    "cash {:.0}, quarterly burn {:.0}, runway {:.1} months, revenue {:.0}, market cap {:.0}",
                    f.cash_on_hand, f.quarterly_burn_rate, f.runway_months, f.revenue, f.market_cap
                ),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_evidence() {
        let context = CatalystContext {
            company_id: 1,
            company_name: "Acme Bio".into(),
            ticker: Some("ACME".into()),
            drug: "acmezumab".into(),
            indication: Some("psoriasis".into()),
            stage: "Phase 3".into(),
            catalyst_date: None,
            historical: HistoricalOutcomes {
                success_rate: 62.5,
                total_events: 8,
                positive_outcomes: 5,
                ..Default::default()
            },
            financials: FinancialSnapshot::default(),
        };
        let seeds = context.seed_evidence();
        assert_eq!(seeds.len(), 2);
        assert!(seeds.iter().all(|e| e.round() == 0));
        assert!(seeds[0].summary().contains("62.5% positive across 8 Phase 3"));
    }
}
