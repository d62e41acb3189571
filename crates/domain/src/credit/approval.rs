//! Credit limit approval use case.

use std::sync::Arc;

use crate::credit::{CreditData, CreditDecision, CreditRecord};
use crate::error::DomainError;
use crate::monitoring::Monitoring;
use crate::storage::DataReader;
use crate::value_objects::{CustomerId, Money};

/// Approves or denies credit limit requests against stored credit data.
pub struct CreditApprovalService<R: DataReader<CreditRecord>> {
    reader: R,
    monitoring: Arc<dyn Monitoring>,
}

impl<R: DataReader<CreditRecord>> CreditApprovalService<R> {
    /// Creates a new approval service.
    pub fn new(reader: R, monitoring: Arc<dyn Monitoring>) -> Self {
        Self { reader, monitoring }
    }

    /// Decides on a requested credit limit for a customer.
    ///
    /// An unknown customer yields a denial rather than an error; only
    /// storage failures and invalid stored data are returned as errors.
    #[tracing::instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn approve_credit_limit(
        &self,
        customer_id: &CustomerId,
        requested_limit: Money,
    ) -> Result<CreditDecision, DomainError> {
        let timer = self.monitoring.start_timer("credit_approval_process");
        let result = self.decide(customer_id, requested_limit).await;
        timer.end();

        if let Err(ref e) = result {
            self.monitoring.record_error("credit_approval_error", e);
        }
        result
    }

    async fn decide(
        &self,
        customer_id: &CustomerId,
        requested_limit: Money,
    ) -> Result<CreditDecision, DomainError> {
        let Some(record) = self.reader.read_item(customer_id.as_str()).await? else {
            self.monitoring
                .increment_counter("credit_approval_customer_not_found");
            return Ok(CreditDecision::customer_not_found());
        };

        let credit = CreditData::try_from(record)?;
        let decision = CreditDecision::evaluate(&credit, requested_limit);

        if decision.approved {
            self.monitoring.increment_counter("credit_approval_approved");
        } else {
            self.monitoring.increment_counter("credit_approval_denied");
        }
        tracing::info!(
            approved = decision.approved,
            approved_limit = %decision.approved_limit,
            "credit decision made"
        );

        Ok(decision)
    }
}
