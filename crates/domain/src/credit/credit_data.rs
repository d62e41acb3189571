//! Customer credit data and the credit-worthiness policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::Record;
use crate::value_objects::{CustomerId, Money};

/// Scores below this are never credit-worthy.
pub const MIN_CREDIT_SCORE: u32 = 500;

/// Debt-to-income ratios above this are never credit-worthy.
pub const MAX_DEBT_TO_INCOME: f64 = 0.5;

/// Requested limits above `monthly_income * LIMIT_INCOME_MULTIPLE` are refused.
pub const LIMIT_INCOME_MULTIPLE: i64 = 12;

/// Errors raised when building or evaluating credit data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CreditError {
    /// An amount that must be non-negative was negative.
    #[error("{field} must not be negative (got {amount})")]
    NegativeAmount { field: &'static str, amount: Money },

    /// The debt-to-income ratio is undefined because income is zero.
    #[error("Debt-to-income ratio is undefined for zero monthly income")]
    DivisionByZero,
}

/// Stored credit row for a customer, as read from the relational store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditRecord {
    pub customer_id: CustomerId,
    pub credit_score: u32,
    pub monthly_income: Money,
    pub existing_debts: Money,
    pub created_at: DateTime<Utc>,
}

/// Partial update for a [`CreditRecord`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreditRecordPatch {
    pub credit_score: Option<u32>,
    pub monthly_income: Option<Money>,
    pub existing_debts: Option<Money>,
}

/// Query filter for credit records. The default matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreditFilter {
    pub min_credit_score: Option<u32>,
}

impl Record for CreditRecord {
    type Patch = CreditRecordPatch;
    type Filter = CreditFilter;

    fn record_id(&self) -> &str {
        self.customer_id.as_str()
    }

    fn apply_patch(&mut self, patch: CreditRecordPatch) {
        if let Some(score) = patch.credit_score {
            self.credit_score = score;
        }
        if let Some(income) = patch.monthly_income {
            self.monthly_income = income;
        }
        if let Some(debts) = patch.existing_debts {
            self.existing_debts = debts;
        }
    }

    fn matches(&self, filter: &CreditFilter) -> bool {
        filter
            .min_credit_score
            .is_none_or(|min| self.credit_score >= min)
    }
}

/// Coarse risk classification produced by the scoring step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBand {
    Low,
    Medium,
    High,
    /// No income on record, so no ratio can be computed.
    Unscorable,
}

impl RiskBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskBand::Low => "low",
            RiskBand::Medium => "medium",
            RiskBand::High => "high",
            RiskBand::Unscorable => "unscorable",
        }
    }
}

impl std::fmt::Display for RiskBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated, immutable credit data for one customer.
///
/// All policy methods are pure functions of the fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditData {
    customer_id: CustomerId,
    credit_score: u32,
    monthly_income: Money,
    existing_debts: Money,
    created_at: DateTime<Utc>,
}

impl CreditData {
    /// Creates credit data, rejecting negative income or debts.
    pub fn new(
        customer_id: CustomerId,
        credit_score: u32,
        monthly_income: Money,
        existing_debts: Money,
        created_at: DateTime<Utc>,
    ) -> Result<Self, CreditError> {
        if monthly_income.is_negative() {
            return Err(CreditError::NegativeAmount {
                field: "monthly_income",
                amount: monthly_income,
            });
        }
        if existing_debts.is_negative() {
            return Err(CreditError::NegativeAmount {
                field: "existing_debts",
                amount: existing_debts,
            });
        }
        Ok(Self {
            customer_id,
            credit_score,
            monthly_income,
            existing_debts,
            created_at,
        })
    }

    pub fn customer_id(&self) -> &CustomerId {
        &self.customer_id
    }

    pub fn credit_score(&self) -> u32 {
        self.credit_score
    }

    pub fn monthly_income(&self) -> Money {
        self.monthly_income
    }

    pub fn existing_debts(&self) -> Money {
        self.existing_debts
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns `existing_debts / monthly_income`.
    pub fn debt_to_income_ratio(&self) -> Result<f64, CreditError> {
        self.existing_debts
            .ratio_to(self.monthly_income)
            .ok_or(CreditError::DivisionByZero)
    }

    /// Decides whether a credit limit of `limit` may be granted.
    ///
    /// A customer with zero income is never credit-worthy.
    pub fn is_credit_worthy(&self, limit: Money) -> bool {
        let Ok(dti) = self.debt_to_income_ratio() else {
            return false;
        };

        if self.credit_score < MIN_CREDIT_SCORE {
            return false;
        }
        if dti > MAX_DEBT_TO_INCOME {
            return false;
        }
        if limit > self.monthly_income.times(LIMIT_INCOME_MULTIPLE) {
            return false;
        }
        true
    }

    /// Classifies the customer into a risk band.
    pub fn risk_band(&self) -> RiskBand {
        match self.debt_to_income_ratio() {
            Err(_) => RiskBand::Unscorable,
            Ok(dti) if self.credit_score < MIN_CREDIT_SCORE || dti > MAX_DEBT_TO_INCOME => {
                RiskBand::High
            }
            Ok(dti) if self.credit_score < 650 || dti > 0.35 => RiskBand::Medium,
            Ok(_) => RiskBand::Low,
        }
    }

    /// Returns a serializable view including the derived ratio.
    pub fn to_summary(&self) -> CreditSummary {
        CreditSummary {
            customer_id: self.customer_id.clone(),
            credit_score: self.credit_score,
            monthly_income: self.monthly_income,
            existing_debts: self.existing_debts,
            created_at: self.created_at,
            debt_to_income_ratio: self.debt_to_income_ratio().ok(),
        }
    }
}

impl TryFrom<CreditRecord> for CreditData {
    type Error = CreditError;

    fn try_from(record: CreditRecord) -> Result<Self, Self::Error> {
        CreditData::new(
            record.customer_id,
            record.credit_score,
            record.monthly_income,
            record.existing_debts,
            record.created_at,
        )
    }
}

impl From<&CreditData> for CreditRecord {
    fn from(data: &CreditData) -> Self {
        CreditRecord {
            customer_id: data.customer_id.clone(),
            credit_score: data.credit_score,
            monthly_income: data.monthly_income,
            existing_debts: data.existing_debts,
            created_at: data.created_at,
        }
    }
}

/// Serializable credit view with the derived debt-to-income ratio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditSummary {
    pub customer_id: CustomerId,
    pub credit_score: u32,
    pub monthly_income: Money,
    pub existing_debts: Money,
    pub created_at: DateTime<Utc>,
    /// Absent when monthly income is zero.
    pub debt_to_income_ratio: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(score: u32, income: i64, debts: i64) -> CreditData {
        CreditData::new(
            CustomerId::new("cust-1"),
            score,
            Money::from_dollars(income),
            Money::from_dollars(debts),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_low_score_is_not_credit_worthy() {
        let credit = data(450, 5000, 1000);
        assert!(!credit.is_credit_worthy(Money::from_dollars(10000)));
    }

    #[test]
    fn test_good_profile_is_credit_worthy() {
        let credit = data(700, 5000, 1000);
        assert_eq!(credit.debt_to_income_ratio().unwrap(), 0.2);
        assert!(credit.is_credit_worthy(Money::from_dollars(40000)));
    }

    #[test]
    fn test_zero_income_is_never_credit_worthy() {
        let credit = data(850, 0, 0);
        assert_eq!(
            credit.debt_to_income_ratio(),
            Err(CreditError::DivisionByZero)
        );
        assert!(!credit.is_credit_worthy(Money::zero()));
        assert!(!credit.is_credit_worthy(Money::from_dollars(1)));
    }

    #[test]
    fn test_high_debt_ratio_is_not_credit_worthy() {
        let credit = data(800, 5000, 2600);
        assert!(!credit.is_credit_worthy(Money::from_dollars(1000)));
    }

    #[test]
    fn test_ratio_exactly_at_threshold_is_allowed() {
        let credit = data(800, 5000, 2500);
        assert!(credit.is_credit_worthy(Money::from_dollars(1000)));
    }

    #[test]
    fn test_limit_above_twelve_months_income_is_refused() {
        let credit = data(800, 5000, 0);
        assert!(credit.is_credit_worthy(Money::from_dollars(60000)));
        assert!(!credit.is_credit_worthy(Money::from_cents(6_000_001)));
    }

    #[test]
    fn test_negative_amounts_are_rejected() {
        let err = CreditData::new(
            CustomerId::new("c"),
            700,
            Money::from_cents(-1),
            Money::zero(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CreditError::NegativeAmount {
                field: "monthly_income",
                ..
            }
        ));

        let record = CreditRecord {
            customer_id: CustomerId::new("c"),
            credit_score: 700,
            monthly_income: Money::from_dollars(10),
            existing_debts: Money::from_cents(-5),
            created_at: Utc::now(),
        };
        assert!(CreditData::try_from(record).is_err());
    }

    #[test]
    fn test_risk_bands() {
        assert_eq!(data(800, 5000, 500).risk_band(), RiskBand::Low);
        assert_eq!(data(600, 5000, 500).risk_band(), RiskBand::Medium);
        assert_eq!(data(800, 5000, 2000).risk_band(), RiskBand::Medium);
        assert_eq!(data(450, 5000, 500).risk_band(), RiskBand::High);
        assert_eq!(data(800, 0, 0).risk_band(), RiskBand::Unscorable);
    }

    #[test]
    fn test_summary_omits_ratio_for_zero_income() {
        assert_eq!(data(700, 5000, 1000).to_summary().debt_to_income_ratio, Some(0.2));
        assert_eq!(data(700, 0, 0).to_summary().debt_to_income_ratio, None);
    }

    #[test]
    fn test_record_patch_and_filter() {
        let mut record = CreditRecord::from(&data(600, 4000, 100));
        record.apply_patch(CreditRecordPatch {
            credit_score: Some(720),
            ..Default::default()
        });
        assert_eq!(record.credit_score, 720);
        assert_eq!(record.record_id(), "cust-1");
        assert!(record.matches(&CreditFilter::default()));
        assert!(record.matches(&CreditFilter {
            min_credit_score: Some(700)
        }));
        assert!(!record.matches(&CreditFilter {
            min_credit_score: Some(750)
        }));
    }
}
