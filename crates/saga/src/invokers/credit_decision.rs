//! Invokers for the credit-decision saga.

use std::sync::Arc;

use async_trait::async_trait;
use domain::{CreditData, CreditDecision, CreditRecord, CustomerId, DataReader, Notification, Notifier};

use crate::context::SagaContext;
use crate::definitions::keys;
use crate::error::StepError;
use crate::invoker::StepInvoker;

/// Loads the customer's credit record. An unknown customer is a permanent
/// failure: nothing downstream can decide without it.
pub struct FetchCreditInfo {
    reader: Arc<dyn DataReader<CreditRecord>>,
}

impl FetchCreditInfo {
    pub fn new(reader: Arc<dyn DataReader<CreditRecord>>) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl StepInvoker for FetchCreditInfo {
    #[tracing::instrument(name = "fetch_credit_info", skip_all)]
    async fn invoke(&self, context: SagaContext) -> Result<SagaContext, StepError> {
        let customer_id = context.get_text(keys::CUSTOMER_ID)?;
        let record = self
            .reader
            .read_item(&customer_id)
            .await?
            .ok_or_else(|| StepError::permanent(format!("customer {customer_id} not found")))?;

        tracing::debug!(%customer_id, credit_score = record.credit_score, "credit record loaded");
        Ok(SagaContext::new().with(keys::CREDIT, record))
    }
}

/// Derives the score figures from the credit record.
pub struct ComputeScore;

#[async_trait]
impl StepInvoker for ComputeScore {
    async fn invoke(&self, context: SagaContext) -> Result<SagaContext, StepError> {
        let credit = CreditData::try_from(context.get_credit(keys::CREDIT)?)?;

        let mut output = SagaContext::new()
            .with(keys::CREDIT_SCORE, i64::from(credit.credit_score()))
            .with(keys::RISK_BAND, credit.risk_band().as_str());
        if let Ok(ratio) = credit.debt_to_income_ratio() {
            output.insert(keys::DEBT_TO_INCOME_RATIO, ratio);
        }
        Ok(output)
    }
}

/// Applies the credit-worthiness policy to the requested limit.
///
/// A denial is a successful output with `approved = false`.
pub struct ApplyDecisionPolicy;

#[async_trait]
impl StepInvoker for ApplyDecisionPolicy {
    #[tracing::instrument(name = "apply_decision_policy", skip_all)]
    async fn invoke(&self, context: SagaContext) -> Result<SagaContext, StepError> {
        let credit = CreditData::try_from(context.get_credit(keys::CREDIT)?)?;
        let requested = context.get_money(keys::REQUESTED_LIMIT)?;
        if requested.is_negative() {
            return Err(StepError::permanent(format!(
                "requested limit must not be negative (got {requested})"
            )));
        }

        let decision = CreditDecision::evaluate(&credit, requested);
        tracing::info!(
            approved = decision.approved,
            approved_limit = %decision.approved_limit,
            "credit decision made"
        );

        Ok(SagaContext::new()
            .with(keys::APPROVED, decision.approved)
            .with(keys::APPROVED_LIMIT, decision.approved_limit)
            .with(keys::DECISION, decision))
    }
}

/// Tells the customer about the decision.
pub struct SendNotification {
    notifier: Arc<dyn Notifier>,
}

impl SendNotification {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl StepInvoker for SendNotification {
    #[tracing::instrument(name = "send_notification", skip_all)]
    async fn invoke(&self, context: SagaContext) -> Result<SagaContext, StepError> {
        let customer_id = CustomerId::new(context.get_text(keys::CUSTOMER_ID)?);
        let decision = context.get_decision(keys::DECISION)?;

        self.notifier
            .notify(Notification {
                customer_id,
                approved: decision.approved,
                approved_limit: decision.approved_limit,
                reason: decision.reason,
            })
            .await?;

        Ok(SagaContext::new().with(keys::NOTIFIED, true))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use domain::{
        InMemoryDataStore, InMemoryNotifier, Money, NotificationError, Operation, RiskBand,
        StorageError,
    };

    use super::*;
    use crate::error::ErrorKind;

    fn record(id: &str, score: u32, income: i64, debts: i64) -> CreditRecord {
        CreditRecord {
            customer_id: CustomerId::new(id),
            credit_score: score,
            monthly_income: Money::from_dollars(income),
            existing_debts: Money::from_dollars(debts),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_fetch_found_and_missing() {
        let store = InMemoryDataStore::with_items([record("c-1", 700, 5000, 1000)]).await;
        let fetch = FetchCreditInfo::new(Arc::new(store.clone()));

        let out = fetch
            .invoke(SagaContext::new().with(keys::CUSTOMER_ID, "c-1"))
            .await
            .unwrap();
        assert_eq!(out.get_credit(keys::CREDIT).unwrap().credit_score, 700);

        let missing = fetch
            .invoke(SagaContext::new().with(keys::CUSTOMER_ID, "c-2"))
            .await
            .unwrap_err();
        assert_eq!(missing.kind, ErrorKind::Permanent);
        assert!(missing.message.contains("c-2"));
    }

    #[tokio::test]
    async fn test_fetch_classifies_store_outages_as_transient() {
        let store: InMemoryDataStore<CreditRecord> = InMemoryDataStore::new();
        store
            .fail_next(Operation::Read, StorageError::Throttled, 1)
            .await;
        let fetch = FetchCreditInfo::new(Arc::new(store));

        let err = fetch
            .invoke(SagaContext::new().with(keys::CUSTOMER_ID, "c-1"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_compute_score() {
        let ctx = SagaContext::new().with(keys::CREDIT, record("c-1", 700, 5000, 1000));
        let out = ComputeScore.invoke(ctx).await.unwrap();

        assert_eq!(out.get_integer(keys::CREDIT_SCORE).unwrap(), 700);
        assert_eq!(out.get_text(keys::RISK_BAND).unwrap(), RiskBand::Low.as_str());
        assert!((out.get_decimal(keys::DEBT_TO_INCOME_RATIO).unwrap() - 0.2).abs() < 1e-9);

        let zero_income = SagaContext::new().with(keys::CREDIT, record("c-1", 700, 0, 0));
        let out = ComputeScore.invoke(zero_income).await.unwrap();
        assert!(!out.contains(keys::DEBT_TO_INCOME_RATIO));
    }

    #[tokio::test]
    async fn test_decision_policy_outputs() {
        let approve = SagaContext::new()
            .with(keys::CREDIT, record("c-1", 700, 5000, 1000))
            .with(keys::REQUESTED_LIMIT, Money::from_dollars(55_000));
        let out = ApplyDecisionPolicy.invoke(approve).await.unwrap();
        assert!(out.get_bool(keys::APPROVED).unwrap());
        // Capped at ten times monthly income.
        assert_eq!(
            out.get_money(keys::APPROVED_LIMIT).unwrap(),
            Money::from_dollars(50_000)
        );

        let deny = SagaContext::new()
            .with(keys::CREDIT, record("c-1", 450, 5000, 1000))
            .with(keys::REQUESTED_LIMIT, Money::from_dollars(10_000));
        let out = ApplyDecisionPolicy.invoke(deny).await.unwrap();
        assert!(!out.get_bool(keys::APPROVED).unwrap());
        assert!(out.get_decision(keys::DECISION).unwrap().reason.is_some());
    }

    #[tokio::test]
    async fn test_send_notification() {
        let notifier = InMemoryNotifier::new();
        let send = SendNotification::new(Arc::new(notifier.clone()));
        let ctx = SagaContext::new()
            .with(keys::CUSTOMER_ID, "c-1")
            .with(keys::DECISION, CreditDecision::customer_not_found());

        notifier
            .fail_next(NotificationError::Unavailable("down".into()), 1)
            .await;
        assert!(send.invoke(ctx.clone()).await.unwrap_err().is_transient());

        let out = send.invoke(ctx).await.unwrap();
        assert!(out.get_bool(keys::NOTIFIED).unwrap());

        let sent = notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].approved);
    }
}
