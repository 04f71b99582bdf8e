//! Loan lifecycle tests - origination, confirmation, system borrowing, and
//! the lazy overdue transition, run against an in-memory SQLite ledger.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use loanbook::account;
use loanbook::config::LedgerConfig;
use loanbook::error::{ErrorKind, LedgerError};
use loanbook::loan::{store, Loan, LoanService, LoanStatus, SYSTEM_LENDER};

async fn setup() -> (SqlitePool, LoanService) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory pool");

    loanbook::db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    let service = LoanService::new(pool.clone(), &LedgerConfig::default());
    (pool, service)
}

async fn seed_account(pool: &SqlitePool, user_id: &str, coins: i64) {
    let mut conn = pool.acquire().await.unwrap();
    account::create(&mut conn, user_id, coins).await.unwrap();
}

async fn balance_of(pool: &SqlitePool, user_id: &str) -> i64 {
    let mut conn = pool.acquire().await.unwrap();
    account::balance(&mut conn, user_id).await.unwrap()
}

async fn peak_of(pool: &SqlitePool, user_id: &str) -> i64 {
    let mut conn = pool.acquire().await.unwrap();
    account::peak_balance(&mut conn, user_id).await.unwrap()
}

async fn loan_by_id(pool: &SqlitePool, loan_id: i64) -> Loan {
    let mut conn = pool.acquire().await.unwrap();
    store::get(&mut conn, loan_id).await.unwrap().unwrap()
}

async fn set_due_date(pool: &SqlitePool, loan_id: i64, due: DateTime<Utc>) {
    sqlx::query("UPDATE loans SET due_date = ? WHERE loan_id = ?")
        .bind(due)
        .bind(loan_id)
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_originate_creates_pending_loan_without_moving_funds() -> Result<()> {
    let (pool, service) = setup().await;
    seed_account(&pool, "alice", 1000).await;
    seed_account(&pool, "bob", 50).await;

    let loan = service.originate_loan("alice", "bob", 400, None).await?;

    assert_eq!(loan.status, LoanStatus::Pending);
    assert_eq!(loan.principal, 400);
    assert_eq!(loan.due_amount, 420); // 400 * 1.05
    assert_eq!(loan.repaid_amount, 0);
    assert!(loan.due_date.is_none());

    // No funds moved yet
    assert_eq!(balance_of(&pool, "alice").await, 1000);
    assert_eq!(balance_of(&pool, "bob").await, 50);
    Ok(())
}

#[tokio::test]
async fn test_originate_honours_custom_rate() -> Result<()> {
    let (pool, service) = setup().await;
    seed_account(&pool, "alice", 1000).await;
    seed_account(&pool, "bob", 0).await;

    let loan = service.originate_loan("alice", "bob", 200, Some(0.08)).await?;
    assert_eq!(loan.due_amount, 216);
    assert_eq!(loan.interest_rate, 0.08);
    Ok(())
}

#[tokio::test]
async fn test_originate_rejects_bad_input() {
    let (pool, service) = setup().await;
    seed_account(&pool, "alice", 1000).await;
    seed_account(&pool, "bob", 0).await;

    let err = service.originate_loan("alice", "alice", 100, None).await.unwrap_err();
    assert!(matches!(err, LedgerError::SelfLoan));
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = service.originate_loan("alice", "bob", 0, None).await.unwrap_err();
    assert!(matches!(err, LedgerError::NonPositiveAmount));

    let err = service.originate_loan("alice", "bob", 100, Some(-0.05)).await.unwrap_err();
    assert!(matches!(err, LedgerError::NegativeInterestRate));

    let err = service
        .originate_loan(SYSTEM_LENDER, "bob", 100, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ReservedAccount(_)));

    let err = service.originate_loan("alice", "ghost", 100, None).await.unwrap_err();
    assert!(matches!(err, LedgerError::AccountNotFound(_)));
    assert_eq!(err.kind(), ErrorKind::BusinessRule);
}

#[tokio::test]
async fn test_confirm_moves_principal_and_starts_the_clock() -> Result<()> {
    let (pool, service) = setup().await;
    seed_account(&pool, "alice", 1000).await;
    seed_account(&pool, "bob", 50).await;

    let pending = service.originate_loan("alice", "bob", 400, None).await?;
    let requested_at = pending.borrowed_at;

    let confirmed = service.confirm_loan(pending.loan_id, "bob").await?;

    assert_eq!(confirmed.status, LoanStatus::Active);
    assert!(confirmed.borrowed_at >= requested_at);
    assert_eq!(balance_of(&pool, "alice").await, 600);
    assert_eq!(balance_of(&pool, "bob").await, 450);
    // The credited borrower's peak follows the new balance
    assert_eq!(peak_of(&pool, "bob").await, 450);
    Ok(())
}

#[tokio::test]
async fn test_confirm_rejects_wrong_party_and_wrong_status() -> Result<()> {
    let (pool, service) = setup().await;
    seed_account(&pool, "alice", 1000).await;
    seed_account(&pool, "bob", 0).await;
    seed_account(&pool, "carol", 0).await;

    let pending = service.originate_loan("alice", "bob", 100, None).await?;

    let err = service.confirm_loan(pending.loan_id, "carol").await.unwrap_err();
    assert!(matches!(err, LedgerError::NotTheBorrower));

    let err = service.confirm_loan(999, "bob").await.unwrap_err();
    assert!(matches!(err, LedgerError::LoanNotFound(999)));

    service.confirm_loan(pending.loan_id, "bob").await?;
    let err = service.confirm_loan(pending.loan_id, "bob").await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InvalidStatus {
            status: LoanStatus::Active,
            expected: LoanStatus::Pending,
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn test_confirm_rechecks_lender_funds_and_leaves_no_trace_on_failure() -> Result<()> {
    let (pool, service) = setup().await;
    seed_account(&pool, "alice", 1000).await;
    seed_account(&pool, "bob", 0).await;
    seed_account(&pool, "carol", 0).await;

    let pending = service.originate_loan("alice", "bob", 800, None).await?;

    // Alice's funds drain between origination and confirmation
    let mut conn = pool.acquire().await?;
    account::adjust(&mut conn, "alice", -700).await?;
    drop(conn);

    let err = service.confirm_loan(pending.loan_id, "bob").await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientBalance {
            available: 300,
            required: 800
        }
    ));

    // Nothing changed: loan still pending, balances untouched
    let loan = loan_by_id(&pool, pending.loan_id).await;
    assert_eq!(loan.status, LoanStatus::Pending);
    assert_eq!(balance_of(&pool, "alice").await, 300);
    assert_eq!(balance_of(&pool, "bob").await, 0);
    Ok(())
}

#[tokio::test]
async fn test_system_borrow_defaults_to_the_credit_cap() -> Result<()> {
    let (pool, service) = setup().await;
    seed_account(&pool, "bob", 2000).await; // peak = 2000, cap = 200

    let loan = service.borrow_from_system("bob", None).await?;

    assert_eq!(loan.lender_id, SYSTEM_LENDER);
    assert_eq!(loan.status, LoanStatus::Active);
    assert_eq!(loan.principal, 200);
    assert_eq!(loan.due_amount, 210);
    assert!(loan.due_date.is_some());

    let due = loan.due_date.unwrap();
    assert!(due > Utc::now() + Duration::days(6));
    assert!(due < Utc::now() + Duration::days(8));

    assert_eq!(balance_of(&pool, "bob").await, 2200);
    // The system credit must not raise the borrower's peak
    assert_eq!(peak_of(&pool, "bob").await, 2000);
    // The system account never holds a balance
    assert_eq!(balance_of(&pool, SYSTEM_LENDER).await, 0);
    Ok(())
}

#[tokio::test]
async fn test_at_most_one_outstanding_system_loan() -> Result<()> {
    let (pool, service) = setup().await;
    seed_account(&pool, "bob", 2000).await;

    let first = service.borrow_from_system("bob", Some(100)).await?;

    let err = service.borrow_from_system("bob", Some(50)).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::OutstandingSystemLoan { remaining: 105 }
    ));

    let mut conn = pool.acquire().await?;
    let active = store::find_active_system_loan(&mut conn, "bob").await?;
    assert_eq!(active.map(|l| l.loan_id), Some(first.loan_id));
    Ok(())
}

#[tokio::test]
async fn test_overdue_system_loan_locks_borrowing_regardless_of_amount() -> Result<()> {
    let (pool, service) = setup().await;
    seed_account(&pool, "bob", 2000).await;

    let loan = service.borrow_from_system("bob", Some(100)).await?;
    set_due_date(&pool, loan.loan_id, Utc::now() - Duration::hours(1)).await;

    let err = service.borrow_from_system("bob", Some(1)).await.unwrap_err();
    assert!(matches!(err, LedgerError::OverdueSystemLoan));
    assert_eq!(err.kind(), ErrorKind::BusinessRule);

    // The eligibility check itself persisted the transition
    assert_eq!(loan_by_id(&pool, loan.loan_id).await.status, LoanStatus::Overdue);
    assert!(service.is_borrowing_restricted("bob").await?);
    Ok(())
}

#[tokio::test]
async fn test_system_borrow_cap_and_zero_credit() -> Result<()> {
    let (pool, service) = setup().await;
    seed_account(&pool, "bob", 1000).await; // cap = 100
    seed_account(&pool, "pauper", 0).await;

    let err = service.borrow_from_system("bob", Some(101)).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::CreditLimitExceeded {
            requested: 101,
            limit: 100
        }
    ));

    let err = service.borrow_from_system("pauper", None).await.unwrap_err();
    assert!(matches!(err, LedgerError::NoCreditAvailable { peak: 0 }));

    let err = service.borrow_from_system("bob", Some(0)).await.unwrap_err();
    assert!(matches!(err, LedgerError::NonPositiveAmount));
    Ok(())
}

#[tokio::test]
async fn test_overdue_transition_is_lazy_and_idempotent() -> Result<()> {
    let (pool, service) = setup().await;
    seed_account(&pool, "bob", 2000).await;

    let loan = service.borrow_from_system("bob", Some(100)).await?;
    set_due_date(&pool, loan.loan_id, Utc::now() - Duration::days(1)).await;

    // Still stored as active until a reader observes it
    assert_eq!(loan_by_id(&pool, loan.loan_id).await.status, LoanStatus::Active);

    let listed = service.list_active(Some("bob")).await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, LoanStatus::Overdue);

    let after_first = loan_by_id(&pool, loan.loan_id).await;

    // A second read produces no further writes and identical state
    let listed_again = service.list_active(Some("bob")).await?;
    assert_eq!(listed_again[0].status, LoanStatus::Overdue);
    let after_second = loan_by_id(&pool, loan.loan_id).await;
    assert_eq!(after_first.updated_at, after_second.updated_at);
    assert_eq!(after_first.repaid_amount, after_second.repaid_amount);
    Ok(())
}

#[tokio::test]
async fn test_is_borrowing_restricted_false_without_overdue_debt() -> Result<()> {
    let (pool, service) = setup().await;
    seed_account(&pool, "bob", 2000).await;

    assert!(!service.is_borrowing_restricted("bob").await?);

    service.borrow_from_system("bob", Some(100)).await?;
    // Outstanding but not overdue
    assert!(!service.is_borrowing_restricted("bob").await?);
    Ok(())
}

#[tokio::test]
async fn test_summary_and_total_debt() -> Result<()> {
    let (pool, service) = setup().await;
    seed_account(&pool, "alice", 1000).await;
    seed_account(&pool, "bob", 2000).await;

    let pending = service.originate_loan("alice", "bob", 400, None).await?;
    service.confirm_loan(pending.loan_id, "bob").await?;
    service.borrow_from_system("bob", Some(100)).await?;

    let summary = service.summary("bob").await?;
    assert_eq!(summary.borrowed.count, 2);
    assert_eq!(summary.borrowed.total_principal, 500);
    assert_eq!(summary.borrowed.total_outstanding, 420 + 105);
    assert_eq!(summary.lent.count, 0);

    let summary = service.summary("alice").await?;
    assert_eq!(summary.lent.count, 1);
    assert_eq!(summary.lent.total_outstanding, 420);

    assert_eq!(service.total_debt("bob").await?, 525);
    assert_eq!(service.total_debt("alice").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_list_active_excludes_pending_and_paid() -> Result<()> {
    let (pool, service) = setup().await;
    seed_account(&pool, "alice", 1000).await;
    seed_account(&pool, "bob", 2000).await;

    // Pending loan is not an outstanding debt
    service.originate_loan("alice", "bob", 100, None).await?;
    assert!(service.list_active(Some("bob")).await?.is_empty());

    let loan = service.borrow_from_system("bob", Some(100)).await?;
    assert_eq!(service.list_active(None).await?.len(), 1);

    service.repay("bob", SYSTEM_LENDER, 105).await?;
    assert!(service.list_active(Some("bob")).await?.is_empty());

    assert_eq!(loan_by_id(&pool, loan.loan_id).await.status, LoanStatus::Paid);
    Ok(())
}

#[tokio::test]
async fn test_store_lookups_by_side_and_status() -> Result<()> {
    let (pool, service) = setup().await;
    seed_account(&pool, "alice", 1000).await;
    seed_account(&pool, "bob", 500).await;

    let pending = service.originate_loan("alice", "bob", 100, None).await?;
    service.confirm_loan(pending.loan_id, "bob").await?;
    service.repay("bob", "alice", 105).await?;
    service.originate_loan("alice", "bob", 200, None).await?;

    let mut conn = pool.acquire().await?;
    let paid = store::find_by_borrower(&mut conn, "bob", Some(LoanStatus::Paid)).await?;
    assert_eq!(paid.len(), 1);
    assert_eq!(paid[0].loan_id, pending.loan_id);

    let all_lent = store::find_by_lender(&mut conn, "alice", None).await?;
    assert_eq!(all_lent.len(), 2);

    let pending_lent = store::find_by_lender(&mut conn, "alice", Some(LoanStatus::Pending)).await?;
    assert_eq!(pending_lent.len(), 1);

    let active = store::find_by_borrower(&mut conn, "bob", Some(LoanStatus::Active)).await?;
    assert!(active.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_pool_creation_and_health_check() -> Result<()> {
    let config = LedgerConfig::default();
    let pool = loanbook::db::create_pool(&config).await?;
    loanbook::db::run_migrations(&pool).await?;
    loanbook::db::check_health(&pool).await?;
    Ok(())
}

#[tokio::test]
async fn test_update_repayment_on_missing_row_returns_false() -> Result<()> {
    let (pool, _service) = setup().await;

    let mut conn = pool.acquire().await?;
    let found = store::update_repayment(&mut conn, 4242, 10, LoanStatus::Active).await?;
    assert!(!found);
    Ok(())
}

#[tokio::test]
async fn test_due_amount_is_immutable_after_creation() -> Result<()> {
    let (pool, service) = setup().await;
    seed_account(&pool, "alice", 1000).await;
    seed_account(&pool, "bob", 500).await;

    let pending = service.originate_loan("alice", "bob", 300, Some(0.05)).await?;
    assert_eq!(pending.due_amount, 315);

    service.confirm_loan(pending.loan_id, "bob").await?;
    service.repay("bob", "alice", 100).await?;

    let loan = loan_by_id(&pool, pending.loan_id).await;
    assert_eq!(loan.due_amount, 315);
    assert_eq!(loan.repaid_amount, 100);
    Ok(())
}
