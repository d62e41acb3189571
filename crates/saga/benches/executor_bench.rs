use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use common::IdempotencyKey;
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{
    CreditLimitRow, CreditRecord, CustomerId, InMemoryDataStore, InMemoryNotifier, LedgerEntry,
    Money,
};
use instance_store::InMemoryInstanceStore;
use saga::definitions::{CREDIT_DECISION, DUAL_WRITE, keys};
use saga::{BuiltinServices, SagaContext, SagaExecutor, builtin_actions, builtin_definitions};

fn executor(rt: &tokio::runtime::Runtime) -> SagaExecutor<InMemoryInstanceStore> {
    let credit = rt.block_on(InMemoryDataStore::with_items([CreditRecord {
        customer_id: CustomerId::new("c-bench"),
        credit_score: 720,
        monthly_income: Money::from_dollars(6_000),
        existing_debts: Money::from_dollars(900),
        created_at: Utc::now(),
    }]));
    let actions = builtin_actions(&BuiltinServices {
        credit: Arc::new(credit),
        ledger: Arc::new(InMemoryDataStore::<LedgerEntry>::new()),
        wide_column: Arc::new(InMemoryDataStore::<CreditLimitRow>::new()),
        notifier: Arc::new(InMemoryNotifier::new()),
    });
    let definitions = builtin_definitions(&actions).unwrap();
    SagaExecutor::new(InMemoryInstanceStore::new(), definitions, actions)
}

fn bench_credit_decision(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let executor = executor(&rt);
    let seq = AtomicU64::new(0);

    c.bench_function("saga/credit_decision", |b| {
        b.iter(|| {
            let n = seq.fetch_add(1, Ordering::Relaxed);
            rt.block_on(async {
                let context = SagaContext::new()
                    .with(keys::CUSTOMER_ID, "c-bench")
                    .with(keys::REQUESTED_LIMIT, Money::from_dollars(20_000));
                executor
                    .start(CREDIT_DECISION, context, IdempotencyKey::new(format!("req-{n}")))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_dual_write(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let executor = executor(&rt);
    let seq = AtomicU64::new(0);

    c.bench_function("saga/dual_write", |b| {
        b.iter(|| {
            let n = seq.fetch_add(1, Ordering::Relaxed);
            rt.block_on(async {
                let context = SagaContext::new()
                    .with(keys::TRANSACTION_ID, format!("tx-{n}"))
                    .with(keys::CUSTOMER_ID, "c-bench")
                    .with(keys::AMOUNT, Money::from_cents(12_345));
                executor
                    .start(DUAL_WRITE, context, IdempotencyKey::new(format!("tx-{n}")))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_idempotent_resubmit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let executor = executor(&rt);
    let context = SagaContext::new()
        .with(keys::CUSTOMER_ID, "c-bench")
        .with(keys::REQUESTED_LIMIT, Money::from_dollars(20_000));
    rt.block_on(async {
        executor
            .start(CREDIT_DECISION, context.clone(), IdempotencyKey::new("req-once"))
            .await
            .unwrap()
    });

    c.bench_function("saga/idempotent_resubmit", |b| {
        b.iter(|| {
            rt.block_on(async {
                executor
                    .submit(CREDIT_DECISION, context.clone(), IdempotencyKey::new("req-once"))
                    .await
                    .unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_credit_decision,
    bench_dual_write,
    bench_idempotent_resubmit
);
criterion_main!(benches);
