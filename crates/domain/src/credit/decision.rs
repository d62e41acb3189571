//! Credit decision outcome.

use serde::{Deserialize, Serialize};

use super::CreditData;
use crate::value_objects::Money;

/// Approved limits are capped at this multiple of monthly income.
pub const APPROVED_LIMIT_INCOME_MULTIPLE: i64 = 10;

pub const REASON_CUSTOMER_NOT_FOUND: &str = "customer not found";
pub const REASON_INSUFFICIENT_CREDIT: &str = "insufficient credit or high debt-to-income ratio";

/// Result of applying the credit policy to a requested limit.
///
/// A denial is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditDecision {
    pub approved: bool,
    pub approved_limit: Money,
    pub reason: Option<String>,
}

impl CreditDecision {
    /// Applies the credit-worthiness policy to `requested_limit`.
    pub fn evaluate(credit: &CreditData, requested_limit: Money) -> Self {
        if credit.is_credit_worthy(requested_limit) {
            let cap = credit.monthly_income().times(APPROVED_LIMIT_INCOME_MULTIPLE);
            Self {
                approved: true,
                approved_limit: requested_limit.min(cap),
                reason: None,
            }
        } else {
            Self::denied(REASON_INSUFFICIENT_CREDIT)
        }
    }

    /// Denial for a customer with no credit record.
    pub fn customer_not_found() -> Self {
        Self::denied(REASON_CUSTOMER_NOT_FOUND)
    }

    fn denied(reason: &str) -> Self {
        Self {
            approved: false,
            approved_limit: Money::zero(),
            reason: Some(reason.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::value_objects::CustomerId;

    fn credit(score: u32, income: i64, debts: i64) -> CreditData {
        CreditData::new(
            CustomerId::new("c-1"),
            score,
            Money::from_dollars(income),
            Money::from_dollars(debts),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_approved_limit_is_capped_at_ten_months_income() {
        let decision = CreditDecision::evaluate(&credit(700, 5000, 1000), Money::from_dollars(55000));
        assert!(decision.approved);
        assert_eq!(decision.approved_limit, Money::from_dollars(50000));
        assert_eq!(decision.reason, None);
    }

    #[test]
    fn test_approved_limit_below_cap_is_granted_in_full() {
        let decision = CreditDecision::evaluate(&credit(700, 5000, 1000), Money::from_dollars(40000));
        assert_eq!(decision.approved_limit, Money::from_dollars(40000));
    }

    #[test]
    fn test_denial_has_zero_limit_and_reason() {
        let decision = CreditDecision::evaluate(&credit(450, 5000, 1000), Money::from_dollars(10000));
        assert!(!decision.approved);
        assert_eq!(decision.approved_limit, Money::zero());
        assert_eq!(decision.reason.as_deref(), Some(REASON_INSUFFICIENT_CREDIT));
    }

    #[test]
    fn test_customer_not_found() {
        let decision = CreditDecision::customer_not_found();
        assert!(!decision.approved);
        assert_eq!(decision.reason.as_deref(), Some(REASON_CUSTOMER_NOT_FOUND));
    }
}
