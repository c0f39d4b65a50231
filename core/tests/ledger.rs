//! Ledger integration tests: deposits, withdrawals, transfers, daily limits.

use chrono::{Duration, TimeZone, Utc};
use ledger_core::{
    clock::{Clock, ManualClock},
    engine::LedgerEngine,
    error::{ErrorKind, LedgerError},
    model::{AccountRecord, AccountStatus, AccountType, TransactionType, UserRecord},
    requests::{BillPaymentRequest, InvestmentRequest, TransferRequest},
    types::Money,
};
use rust_decimal_macros::dec;
use std::sync::Arc;

fn setup() -> (LedgerEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()));
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

fn transfer(sender: &UserRecord, to: &AccountRecord, amount: Money) -> TransferRequest {
    TransferRequest {
        sender_id:               sender.user_id.clone(),
        receiver_account_number: to.account_number.clone(),
        amount,
        description:             "rent".into(),
    }
}

/// Overdrawing fails and leaves the balance untouched.
#[test]
fn withdraw_more_than_balance_is_rejected() {
    let (engine, _) = setup();
    let (alice, account) = customer(&engine, "Alice", dec!(1000), None);

    let err = engine.withdraw(&alice.user_id, dec!(1500)).unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }), "got {err}");
    assert_eq!(err.kind(), ErrorKind::State);
    assert_eq!(engine.account(&account.account_number).unwrap().balance, dec!(1000));
    assert_eq!(engine.transaction_history(&alice.user_id, 10).unwrap().len(), 1);
}

/// Deposits credit the primary account and are not limited.
#[test]
fn deposit_credits_primary_account_without_limit() {
    let (engine, _) = setup();
    let (alice, account) = customer(&engine, "Alice", Money::ZERO, Some(dec!(100)));

    let row = engine.deposit(&alice.user_id, dec!(5000)).unwrap();
    assert_eq!(row.txn_type, TransactionType::Deposit);
    assert_eq!(row.amount, dec!(5000));

    let account = engine.account(&account.account_number).unwrap();
    assert_eq!(account.balance, dec!(5000));
    assert_eq!(account.used_limit, dec!(0));

    let kinds: Vec<_> = engine
        .notifications_for_user(&alice.user_id)
        .unwrap()
        .into_iter()
        .map(|(kind, _)| kind)
        .collect();
    assert_eq!(kinds, vec!["credit"]);
}

/// Deposits need an account to land in.
#[test]
fn deposit_without_account_fails() {
    let (engine, _) = setup();
    let user = engine.register_user("No Account", false).unwrap();
    let err = engine.deposit(&user.user_id, dec!(10)).unwrap_err();
    assert!(matches!(err, LedgerError::AccountNotFound { .. }));
}

/// Bad amounts are validation errors and never reach the store.
#[test]
fn invalid_amounts_are_validation_errors() {
    let (engine, _) = setup();
    let (alice, _) = customer(&engine, "Alice", dec!(100), None);
    for amount in [dec!(0), dec!(-5), dec!(1.005)] {
        let err = engine.withdraw(&alice.user_id, amount).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{amount}: {err}");
    }
}

/// Both legs match and the system-wide balance is conserved.
#[test]
fn internal_transfer_conserves_total_balance() {
    let (engine, _) = setup();
    let (alice, alice_acc) = customer(&engine, "Alice", dec!(5000), None);
    let (bob, bob_acc) = customer(&engine, "Bob", dec!(200), None);
    let total_before = engine.total_balance().unwrap();

    let receipt = engine
        .internal_transfer(&transfer(&alice, &bob_acc, dec!(1250.50)))
        .unwrap();
    assert_eq!(receipt.debit.amount, dec!(-1250.50));
    assert_eq!(receipt.credit.amount, dec!(1250.50));
    assert_eq!(receipt.debit.amount.abs(), receipt.credit.amount.abs());
    assert_eq!(receipt.debit.owner_id, alice.user_id);
    assert_eq!(receipt.credit.owner_id, bob.user_id);

    assert_eq!(engine.total_balance().unwrap(), total_before);
    let alice_acc = engine.account(&alice_acc.account_number).unwrap();
    let bob_acc = engine.account(&bob_acc.account_number).unwrap();
    assert_eq!(alice_acc.balance, dec!(3749.50));
    assert_eq!(alice_acc.used_limit, dec!(1250.50));
    assert_eq!(bob_acc.balance, dec!(1450.50));
    assert_eq!(bob_acc.used_limit, dec!(0));

    let bob_kinds: Vec<_> = engine
        .notifications_for_user(&bob.user_id)
        .unwrap()
        .into_iter()
        .map(|(kind, _)| kind)
        .collect();
    assert_eq!(bob_kinds, vec!["credit", "credit"]);
}

/// A transfer to the sender's own account is refused before anything is written.
#[test]
fn self_transfer_is_rejected() {
    let (engine, _) = setup();
    let (alice, alice_acc) = customer(&engine, "Alice", dec!(500), None);
    let err = engine
        .internal_transfer(&transfer(&alice, &alice_acc, dec!(10)))
        .unwrap_err();
    assert!(matches!(err, LedgerError::SelfTransferRejected));
    assert_eq!(err.kind(), ErrorKind::Validation);
}

/// Unknown receiver account numbers are reported as such.
#[test]
fn unknown_receiver_is_rejected() {
    let (engine, _) = setup();
    let (alice, _) = customer(&engine, "Alice", dec!(500), None);
    let req = TransferRequest {
        sender_id:               alice.user_id.clone(),
        receiver_account_number: "999999999999".into(),
        amount:                  dec!(10),
        description:             String::new(),
    };
    let err = engine.internal_transfer(&req).unwrap_err();
    assert!(matches!(err, LedgerError::ReceiverNotFound { .. }));
}

/// Frozen accounts cannot send or receive; dormant accounts can.
#[test]
fn frozen_blocks_and_dormant_allows() {
    let (engine, _) = setup();
    let (alice, alice_acc) = customer(&engine, "Alice", dec!(500), None);
    let (_, bob_acc) = customer(&engine, "Bob", dec!(0), None);

    engine
        .set_account_status("ops-1", &alice_acc.account_number, AccountStatus::Dormant)
        .unwrap();
    engine.internal_transfer(&transfer(&alice, &bob_acc, dec!(100))).unwrap();

    engine
        .set_account_status("ops-1", &bob_acc.account_number, AccountStatus::Frozen)
        .unwrap();
    let err = engine
        .internal_transfer(&transfer(&alice, &bob_acc, dec!(100)))
        .unwrap_err();
    assert!(matches!(err, LedgerError::AccountNotActive { .. }), "got {err}");

    engine
        .set_account_status("ops-1", &alice_acc.account_number, AccountStatus::Frozen)
        .unwrap();
    let err = engine.withdraw(&alice.user_id, dec!(10)).unwrap_err();
    assert!(matches!(err, LedgerError::AccountNotActive { .. }));
    assert_eq!(engine.account(&alice_acc.account_number).unwrap().balance, dec!(400));
}

/// Accounts close only when empty, and closing is final.
#[test]
fn closing_requires_zero_balance_and_is_terminal() {
    let (engine, _) = setup();
    let (alice, acc) = customer(&engine, "Alice", dec!(50), None);

    let err = engine
        .set_account_status("ops-1", &acc.account_number, AccountStatus::Closed)
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTransition(_)));

    engine.withdraw(&alice.user_id, dec!(50)).unwrap();
    engine
        .set_account_status("ops-1", &acc.account_number, AccountStatus::Closed)
        .unwrap();
    let err = engine
        .set_account_status("ops-1", &acc.account_number, AccountStatus::Active)
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTransition(_)));

    // Closed accounts are no longer anyone's primary account.
    let err = engine.deposit(&alice.user_id, dec!(10)).unwrap_err();
    assert!(matches!(err, LedgerError::AccountNotFound { .. }));

    let trail = engine.audit_trail(&acc.account_id).unwrap();
    let last = trail.last().unwrap();
    assert_eq!(last.action, "account_status_changed");
    assert_eq!(last.severity, "destructive");
}

/// Exceeding the daily limit reports what is left and changes nothing.
#[test]
fn daily_limit_exceeded_reports_remaining() {
    let (engine, _) = setup();
    let (alice, acc) = customer(&engine, "Alice", dec!(10000), Some(dec!(1000)));
    let (_, bob_acc) = customer(&engine, "Bob", dec!(0), None);

    engine.internal_transfer(&transfer(&alice, &bob_acc, dec!(600))).unwrap();
    let history_before = engine.transaction_history(&alice.user_id, 50).unwrap().len();

    let err = engine
        .internal_transfer(&transfer(&alice, &bob_acc, dec!(500)))
        .unwrap_err();
    match err {
        LedgerError::DailyLimitExceeded { remaining } => assert_eq!(remaining, dec!(400)),
        other => panic!("expected DailyLimitExceeded, got {other}"),
    }

    let acc = engine.account(&acc.account_number).unwrap();
    assert_eq!(acc.balance, dec!(9400));
    assert_eq!(acc.used_limit, dec!(600));
    assert_eq!(
        engine.transaction_history(&alice.user_id, 50).unwrap().len(),
        history_before
    );
    assert_eq!(engine.account(&bob_acc.account_number).unwrap().balance, dec!(600));
}

/// The first limited debit of a new day resets usage before checking.
#[test]
fn limit_resets_on_first_debit_of_new_day() {
    let (engine, clock) = setup();
    let (alice, acc) = customer(&engine, "Alice", dec!(10000), Some(dec!(1000)));

    engine.withdraw(&alice.user_id, dec!(1000)).unwrap();
    assert!(engine.withdraw(&alice.user_id, dec!(1)).is_err());

    clock.advance(Duration::days(1));
    engine.withdraw(&alice.user_id, dec!(700)).unwrap();

    let acc = engine.account(&acc.account_number).unwrap();
    assert_eq!(acc.used_limit, dec!(700));
    assert_eq!(acc.last_limit_reset_date, clock.today());
}

/// Concurrent debits never push usage past the limit or lose an update.
#[test]
fn concurrent_debits_respect_daily_limit() {
    let (engine, _) = setup();
    let (alice, acc) = customer(&engine, "Alice", dec!(100000), Some(dec!(5000)));
    let engine = Arc::new(engine);

    let successes: usize = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                let owner = alice.user_id.clone();
                s.spawn(move || {
                    (0..10)
                        .filter(|_| engine.withdraw(&owner, dec!(100)).is_ok())
                        .count()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    let acc = engine.account(&acc.account_number).unwrap();
    assert_eq!(successes, 50);
    assert_eq!(acc.used_limit, dec!(5000));
    assert!(acc.used_limit <= acc.daily_limit);
    assert_eq!(acc.balance, dec!(95000));
}

/// Bill payments and investments debit with a side record.
#[test]
fn purpose_debits_write_side_records() {
    let (engine, _) = setup();
    let (alice, acc) = customer(&engine, "Alice", dec!(3000), None);

    let bill = engine
        .pay_bill(&BillPaymentRequest {
            owner_id:     alice.user_id.clone(),
            biller_name:  "City Power".into(),
            consumer_ref: "CP-0091".into(),
            amount:       dec!(420.75),
        })
        .unwrap();
    let investment = engine
        .invest_deposit(&InvestmentRequest {
            owner_id:      alice.user_id.clone(),
            plan:          "Fixed Deposit 12M".into(),
            amount:        dec!(1000),
            tenure_months: 12,
        })
        .unwrap();

    assert_eq!(engine.bills_for_owner(&alice.user_id).unwrap(), vec![bill.clone()]);
    assert_eq!(engine.investments_for_owner(&alice.user_id).unwrap(), vec![investment.clone()]);
    assert_eq!(
        investment.maturity_date,
        chrono::NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
    );

    let bill_row = engine.transaction(&bill.transaction_id).unwrap();
    assert_eq!(bill_row.txn_type, TransactionType::BillPayment);
    assert_eq!(bill_row.amount, dec!(-420.75));
    assert_eq!(bill_row.counterpart_name.as_deref(), Some("City Power"));

    let acc = engine.account(&acc.account_number).unwrap();
    assert_eq!(acc.balance, dec!(1579.25));
    assert_eq!(acc.used_limit, dec!(1420.75));

    let statement = engine.account_statement(&acc.account_number).unwrap();
    let types: Vec<_> = statement.iter().map(|t| t.txn_type).collect();
    assert_eq!(
        types,
        vec![TransactionType::Deposit, TransactionType::BillPayment, TransactionType::Investment]
    );
}

/// Every balance change leaves an audit entry on the account.
#[test]
fn balance_changes_are_audited() {
    let (engine, _) = setup();
    let (alice, acc) = customer(&engine, "Alice", dec!(300), None);
    engine.withdraw(&alice.user_id, dec!(100)).unwrap();

    let actions: Vec<_> = engine
        .audit_trail(&acc.account_id)
        .unwrap()
        .into_iter()
        .map(|row| row.action)
        .collect();
    assert_eq!(actions, vec!["account_opened", "deposit", "withdrawal"]);
}
