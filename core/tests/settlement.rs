//! Settlement job integration tests: deferred and reserved transfers,
//! failure handling, and the periodic scheduler.

use chrono::{DateTime, Duration, TimeZone, Utc};
use ledger_core::{
    clock::{Clock, ManualClock},
    engine::LedgerEngine,
    error::LedgerError,
    model::{AccountRecord, AccountStatus, AccountType, TransactionStatus, UserRecord},
    requests::{ExternalBankDetails, ExternalTransferRequest, ScheduledTransferRequest},
    settlement_subsystem::{SettlementOutcome, SettlementScheduler, SweepReport},
    types::Money,
};
use rust_decimal_macros::dec;
use std::sync::Arc;

fn setup() -> (LedgerEngine, Arc<ManualClock>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 7, 15, 8, 0, 0).unwrap()));
    let engine = LedgerEngine::build_test(clock.clone()).unwrap();
    (engine, clock)
}

fn customer(
    engine: &LedgerEngine,
    name: &str,
    opening: Money,
    daily_limit: Option<Money>,
) -> (UserRecord, AccountRecord) {
    let user = engine.register_user(name, false).unwrap();
    let account = engine
        .open_account(&user.user_id, AccountType::Savings, daily_limit)
        .unwrap();
    if opening > Money::ZERO {
        engine.deposit(&user.user_id, opening).unwrap();
    }
    let account = engine.account(&account.account_number).unwrap();
    (user, account)
}

fn scheduled(
    sender: &UserRecord,
    receiver_account_number: &str,
    amount: Money,
    at: DateTime<Utc>,
) -> ScheduledTransferRequest {
    ScheduledTransferRequest {
        sender_id: sender.user_id.clone(),
        receiver_account_number: receiver_account_number.to_string(),
        amount,
        scheduled_date: at,
        description: "rent".into(),
    }
}

fn balance(engine: &LedgerEngine, account: &AccountRecord) -> Money {
    engine.account(&account.account_number).unwrap().balance
}

#[test]
fn scheduled_transfer_moves_nothing_until_due() {
    let (engine, clock) = setup();
    let (alice, alice_acc) = customer(&engine, "Alice", dec!(2000), None);
    let (_, bob_acc) = customer(&engine, "Bob", Money::ZERO, None);

    let due = clock.now() + Duration::days(1);
    let row = engine
        .scheduled_transfer(&scheduled(&alice, &bob_acc.account_number, dec!(750), due))
        .unwrap();
    assert_eq!(row.status, TransactionStatus::Pending);
    assert_eq!(balance(&engine, &alice_acc), dec!(2000));

    clock.advance(Duration::hours(23));
    assert_eq!(engine.sweep().unwrap(), SweepReport::default());
    assert_eq!(engine.settle_one(&row.transaction_id).unwrap(), SettlementOutcome::Skipped);
    assert_eq!(balance(&engine, &alice_acc), dec!(2000));

    clock.advance(Duration::hours(1));
    let report = engine.sweep().unwrap();
    assert_eq!(report.settled, 1);
    assert_eq!(report.total(), 1);
    assert_eq!(balance(&engine, &alice_acc), dec!(1250));
    assert_eq!(balance(&engine, &bob_acc), dec!(750));
    assert_eq!(
        engine.transaction(&row.transaction_id).unwrap().status,
        TransactionStatus::Completed
    );

    // Completed rows are never picked up again.
    clock.advance(Duration::hours(1));
    assert_eq!(engine.sweep().unwrap().total(), 0);
    assert_eq!(engine.settle_one(&row.transaction_id).unwrap(), SettlementOutcome::Skipped);
    assert_eq!(balance(&engine, &alice_acc), dec!(1250));

    let notices = engine.notifications_for_user(&alice.user_id).unwrap();
    assert!(notices.iter().any(|(kind, _)| kind == "transfer_settled"));
}

#[test]
fn insufficient_funds_at_settlement_fails_once() {
    let (engine, clock) = setup();
    let (alice, alice_acc) = customer(&engine, "Alice", dec!(1000), None);
    let (_, bob_acc) = customer(&engine, "Bob", Money::ZERO, None);

    let due = clock.now() + Duration::hours(4);
    let row = engine
        .scheduled_transfer(&scheduled(&alice, &bob_acc.account_number, dec!(500), due))
        .unwrap();
    engine.withdraw(&alice.user_id, dec!(800)).unwrap();

    clock.advance(Duration::hours(5));
    let report = engine.sweep().unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.settled, 0);

    let failed = engine.transaction(&row.transaction_id).unwrap();
    assert_eq!(failed.status, TransactionStatus::Failed);
    assert_eq!(balance(&engine, &alice_acc), dec!(200));
    assert_eq!(balance(&engine, &bob_acc), Money::ZERO);

    let notices = engine.notifications_for_user(&alice.user_id).unwrap();
    assert!(notices
        .iter()
        .any(|(kind, message)| kind == "transfer_failed" && message.contains("Insufficient funds")));

    // Failed is terminal.
    assert_eq!(engine.sweep().unwrap().total(), 0);
    assert!(engine.pending_transactions().unwrap().is_empty());
}

/// Two workers racing on one due row: one settles it, the other skips.
#[test]
fn racing_settlements_debit_once_and_report_skipped() {
    let (engine, clock) = setup();
    let (alice, alice_acc) = customer(&engine, "Alice", dec!(1000), None);
    let (_, bob_acc) = customer(&engine, "Bob", Money::ZERO, None);

    let due = clock.now() + Duration::hours(1);
    let row = engine
        .scheduled_transfer(&scheduled(&alice, &bob_acc.account_number, dec!(600), due))
        .unwrap();
    clock.advance(Duration::hours(1));

    let outcomes: Vec<SettlementOutcome> = std::thread::scope(|s| {
        let workers: Vec<_> = (0..2)
            .map(|_| s.spawn(|| engine.settle_one(&row.transaction_id).unwrap()))
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });
    assert_eq!(outcomes.iter().filter(|o| **o == SettlementOutcome::Settled).count(), 1);
    assert_eq!(outcomes.iter().filter(|o| **o == SettlementOutcome::Skipped).count(), 1);

    assert_eq!(balance(&engine, &alice_acc), dec!(400));
    assert_eq!(balance(&engine, &bob_acc), dec!(600));
    let failures = engine
        .notifications_for_user(&alice.user_id)
        .unwrap()
        .into_iter()
        .filter(|(kind, _)| kind == "transfer_failed")
        .count();
    assert_eq!(failures, 0);
}

#[test]
fn daily_limit_is_checked_on_settlement_day() {
    let (engine, clock) = setup();
    let (alice, alice_acc) = customer(&engine, "Alice", dec!(5000), Some(dec!(1000)));
    let (_, bob_acc) = customer(&engine, "Bob", Money::ZERO, None);

    let due = clock.now() + Duration::days(2);
    let first = engine
        .scheduled_transfer(&scheduled(&alice, &bob_acc.account_number, dec!(800), due))
        .unwrap();
    let second = engine
        .scheduled_transfer(&scheduled(&alice, &bob_acc.account_number, dec!(800), due))
        .unwrap();

    clock.advance(Duration::days(2));
    let report = engine.sweep().unwrap();
    assert_eq!(report, SweepReport { settled: 1, failed: 1, skipped: 0 });

    assert_eq!(
        engine.transaction(&first.transaction_id).unwrap().status,
        TransactionStatus::Completed
    );
    assert_eq!(
        engine.transaction(&second.transaction_id).unwrap().status,
        TransactionStatus::Failed
    );
    let account = engine.account(&alice_acc.account_number).unwrap();
    assert_eq!(account.balance, dec!(4200));
    assert_eq!(account.used_limit, dec!(800));
    assert_eq!(account.last_limit_reset_date, clock.now().date_naive());
}

#[test]
fn external_transfer_is_debited_once_and_completes_after_delay() {
    let (engine, clock) = setup();
    let (alice, alice_acc) = customer(&engine, "Alice", dec!(5000), None);

    let row = engine
        .external_bank_transfer(&ExternalTransferRequest {
            sender_id:   alice.user_id.clone(),
            bank:        ExternalBankDetails {
                account_holder: "Maria Lopez".into(),
                account_number: "ES9121000418450200051332".into(),
                bank_name:      "Banco Ejemplo".into(),
                routing_code:   "CAIXESBB".into(),
                country:        Some("ES".into()),
            },
            amount:      dec!(1000),
            description: "tuition".into(),
        })
        .unwrap();
    assert_eq!(row.status, TransactionStatus::Pending);
    assert_eq!(balance(&engine, &alice_acc), dec!(4000));

    clock.advance(Duration::minutes(60));
    assert_eq!(engine.sweep().unwrap().total(), 0);

    clock.advance(Duration::minutes(61));
    assert_eq!(engine.sweep().unwrap().settled, 1);
    assert_eq!(
        engine.transaction(&row.transaction_id).unwrap().status,
        TransactionStatus::Completed
    );
    assert_eq!(balance(&engine, &alice_acc), dec!(4000));
}

#[test]
fn unknown_receiver_settles_as_outbound_only() {
    let (engine, clock) = setup();
    let (alice, alice_acc) = customer(&engine, "Alice", dec!(3000), None);
    let total_before = engine.total_balance().unwrap();

    let due = clock.now() + Duration::hours(1);
    let row = engine
        .scheduled_transfer(&scheduled(&alice, "999999999999", dec!(300), due))
        .unwrap();
    clock.advance(Duration::hours(1));
    assert_eq!(engine.settle_one(&row.transaction_id).unwrap(), SettlementOutcome::Settled);

    assert_eq!(balance(&engine, &alice_acc), dec!(2700));
    assert_eq!(engine.total_balance().unwrap(), total_before - dec!(300));
    let statement = engine.account_statement(&alice_acc.account_number).unwrap();
    assert_eq!(statement.len(), 2);
}

#[test]
fn scheduling_rejects_past_dates_and_self_transfers() {
    let (engine, clock) = setup();
    let (alice, alice_acc) = customer(&engine, "Alice", dec!(1000), None);
    let (_, bob_acc) = customer(&engine, "Bob", Money::ZERO, None);

    let now = clock.now();
    let err = engine
        .scheduled_transfer(&scheduled(&alice, &bob_acc.account_number, dec!(10), now))
        .unwrap_err();
    assert!(matches!(err, LedgerError::ScheduledDateNotInFuture));

    let err = engine
        .scheduled_transfer(&scheduled(
            &alice,
            &alice_acc.account_number,
            dec!(10),
            now + Duration::days(1),
        ))
        .unwrap_err();
    assert!(matches!(err, LedgerError::SelfTransferRejected));
    assert!(engine.pending_transactions().unwrap().is_empty());
}

#[test]
fn frozen_parties_fail_at_settlement() {
    let (engine, clock) = setup();
    let (alice, alice_acc) = customer(&engine, "Alice", dec!(1000), None);
    let (_, bob_acc) = customer(&engine, "Bob", Money::ZERO, None);
    let (carol, carol_acc) = customer(&engine, "Carol", dec!(1000), None);

    let due = clock.now() + Duration::hours(2);
    let from_frozen = engine
        .scheduled_transfer(&scheduled(&alice, &bob_acc.account_number, dec!(100), due))
        .unwrap();
    let to_frozen = engine
        .scheduled_transfer(&scheduled(&carol, &alice_acc.account_number, dec!(100), due))
        .unwrap();
    engine
        .set_account_status("ops-1", &alice_acc.account_number, AccountStatus::Frozen)
        .unwrap();

    clock.advance(Duration::hours(2));
    let report = engine.sweep().unwrap();
    assert_eq!(report.failed, 2);

    for id in [&from_frozen.transaction_id, &to_frozen.transaction_id] {
        assert_eq!(engine.transaction(id).unwrap().status, TransactionStatus::Failed);
    }
    assert_eq!(balance(&engine, &alice_acc), dec!(1000));
    assert_eq!(balance(&engine, &carol_acc), dec!(1000));
    assert_eq!(balance(&engine, &bob_acc), Money::ZERO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduler_settles_due_rows_and_stops_cleanly() {
    let (engine, clock) = setup();
    let (alice, alice_acc) = customer(&engine, "Alice", dec!(1000), None);
    let (_, bob_acc) = customer(&engine, "Bob", Money::ZERO, None);

    let due = clock.now() + Duration::minutes(30);
    let row = engine
        .scheduled_transfer(&scheduled(&alice, &bob_acc.account_number, dec!(400), due))
        .unwrap();
    clock.advance(Duration::minutes(31));

    let engine = Arc::new(engine);
    let scheduler = SettlementScheduler::start_with_period(
        engine.clone(),
        std::time::Duration::from_millis(20),
    );

    let mut settled = false;
    for _ in 0..100 {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        if engine.transaction(&row.transaction_id).unwrap().status == TransactionStatus::Completed {
            settled = true;
            break;
        }
    }
    assert!(settled, "scheduler never settled the due transfer");

    let report = scheduler.shutdown().await.unwrap();
    assert_eq!(report.settled, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(balance(&engine, &alice_acc), dec!(600));
    assert_eq!(balance(&engine, &bob_acc), dec!(400));
}
