//! Loan store - persistence operations for loan records
//!
//! Every function takes `&mut SqliteConnection` so it executes in whatever
//! transactional context the caller has open; the engines compose several of
//! these calls plus balance mutations into one atomic unit of work.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::error::LedgerResult;
use crate::loan::model::{Loan, LoanStatus, NewLoan, SYSTEM_LENDER};

/// Insert a loan and return the stored row with its assigned id.
pub async fn insert(conn: &mut SqliteConnection, new: &NewLoan) -> LedgerResult<Loan> {
    let now = Utc::now();
    let loan = sqlx::query_as::<_, Loan>(
        r#"
        INSERT INTO loans (
            lender_id, borrower_id, principal, interest_rate,
            borrowed_at, due_amount, repaid_amount, status,
            due_date, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&new.lender_id)
    .bind(&new.borrower_id)
    .bind(new.principal)
    .bind(new.interest_rate)
    .bind(new.borrowed_at)
    .bind(new.due_amount)
    .bind(new.status)
    .bind(new.due_date)
    .bind(now)
    .bind(now)
    .fetch_one(conn)
    .await?;

    Ok(loan)
}

/// Fetch a loan by id.
pub async fn get(conn: &mut SqliteConnection, loan_id: i64) -> LedgerResult<Option<Loan>> {
    let loan = sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE loan_id = ?")
        .bind(loan_id)
        .fetch_optional(conn)
        .await?;

    Ok(loan)
}

/// Outstanding loans between a specific lender/borrower pair, oldest first.
/// The ascending order backs the "earliest debt first" settlement walk.
pub async fn find_active_between(
    conn: &mut SqliteConnection,
    lender_id: &str,
    borrower_id: &str,
) -> LedgerResult<Vec<Loan>> {
    let loans = sqlx::query_as::<_, Loan>(
        r#"
        SELECT * FROM loans
        WHERE lender_id = ? AND borrower_id = ? AND status IN ('active', 'overdue')
        ORDER BY borrowed_at ASC, loan_id ASC
        "#,
    )
    .bind(lender_id)
    .bind(borrower_id)
    .fetch_all(conn)
    .await?;

    Ok(loans)
}

/// Loans where the user is the lender, optionally filtered by status.
pub async fn find_by_lender(
    conn: &mut SqliteConnection,
    lender_id: &str,
    status: Option<LoanStatus>,
) -> LedgerResult<Vec<Loan>> {
    let loans = match status {
        Some(status) => {
            sqlx::query_as::<_, Loan>(
                "SELECT * FROM loans WHERE lender_id = ? AND status = ? ORDER BY borrowed_at DESC",
            )
            .bind(lender_id)
            .bind(status)
            .fetch_all(conn)
            .await?
        }
        None => {
            sqlx::query_as::<_, Loan>(
                "SELECT * FROM loans WHERE lender_id = ? ORDER BY borrowed_at DESC",
            )
            .bind(lender_id)
            .fetch_all(conn)
            .await?
        }
    };

    Ok(loans)
}

/// Loans where the user is the borrower, optionally filtered by status.
pub async fn find_by_borrower(
    conn: &mut SqliteConnection,
    borrower_id: &str,
    status: Option<LoanStatus>,
) -> LedgerResult<Vec<Loan>> {
    let loans = match status {
        Some(status) => {
            sqlx::query_as::<_, Loan>(
                "SELECT * FROM loans WHERE borrower_id = ? AND status = ? ORDER BY borrowed_at DESC",
            )
            .bind(borrower_id)
            .bind(status)
            .fetch_all(conn)
            .await?
        }
        None => {
            sqlx::query_as::<_, Loan>(
                "SELECT * FROM loans WHERE borrower_id = ? ORDER BY borrowed_at DESC",
            )
            .bind(borrower_id)
            .fetch_all(conn)
            .await?
        }
    };

    Ok(loans)
}

/// All outstanding loans owed by a borrower across every lender.
pub async fn find_outstanding_by_borrower(
    conn: &mut SqliteConnection,
    borrower_id: &str,
) -> LedgerResult<Vec<Loan>> {
    let loans = sqlx::query_as::<_, Loan>(
        r#"
        SELECT * FROM loans
        WHERE borrower_id = ? AND status IN ('active', 'overdue')
        ORDER BY borrowed_at DESC
        "#,
    )
    .bind(borrower_id)
    .fetch_all(conn)
    .await?;

    Ok(loans)
}

/// All outstanding loans advanced by a lender.
pub async fn find_outstanding_by_lender(
    conn: &mut SqliteConnection,
    lender_id: &str,
) -> LedgerResult<Vec<Loan>> {
    let loans = sqlx::query_as::<_, Loan>(
        r#"
        SELECT * FROM loans
        WHERE lender_id = ? AND status IN ('active', 'overdue')
        ORDER BY borrowed_at DESC
        "#,
    )
    .bind(lender_id)
    .fetch_all(conn)
    .await?;

    Ok(loans)
}

/// Every outstanding loan in the ledger, newest first.
pub async fn find_all_outstanding(conn: &mut SqliteConnection) -> LedgerResult<Vec<Loan>> {
    let loans = sqlx::query_as::<_, Loan>(
        "SELECT * FROM loans WHERE status IN ('active', 'overdue') ORDER BY borrowed_at DESC",
    )
    .fetch_all(conn)
    .await?;

    Ok(loans)
}

/// The borrower's current active system loan, if any. Application logic
/// keeps this to at most one row; pending peer loans are exempt from the
/// invariant so it cannot be a uniqueness constraint.
pub async fn find_active_system_loan(
    conn: &mut SqliteConnection,
    borrower_id: &str,
) -> LedgerResult<Option<Loan>> {
    let loan = sqlx::query_as::<_, Loan>(
        r#"
        SELECT * FROM loans
        WHERE lender_id = ? AND borrower_id = ? AND status = 'active'
        ORDER BY borrowed_at DESC
        LIMIT 1
        "#,
    )
    .bind(SYSTEM_LENDER)
    .bind(borrower_id)
    .fetch_optional(conn)
    .await?;

    Ok(loan)
}

/// Whether the borrower has a system loan past its due date, regardless of
/// whether the lazy overdue transition has been persisted yet.
pub async fn has_overdue_system_loan(
    conn: &mut SqliteConnection,
    borrower_id: &str,
) -> LedgerResult<bool> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM loans
        WHERE lender_id = ?
          AND borrower_id = ?
          AND status IN ('active', 'overdue')
          AND due_date IS NOT NULL
          AND due_date < ?
        "#,
    )
    .bind(SYSTEM_LENDER)
    .bind(borrower_id)
    .bind(Utc::now())
    .fetch_one(conn)
    .await?;

    Ok(count > 0)
}

/// Update the two mutable settlement fields plus `updated_at`. Returns false
/// when the row does not exist; callers that assumed existence must treat
/// that as a persistence failure.
pub async fn update_repayment(
    conn: &mut SqliteConnection,
    loan_id: i64,
    repaid_amount: i64,
    status: LoanStatus,
) -> LedgerResult<bool> {
    let result = sqlx::query(
        "UPDATE loans SET repaid_amount = ?, status = ?, updated_at = ? WHERE loan_id = ?",
    )
    .bind(repaid_amount)
    .bind(status)
    .bind(Utc::now())
    .bind(loan_id)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// The confirmation write: `pending → active` with `borrowed_at` reset to the
/// confirmation instant. Same boolean-existence convention as
/// [`update_repayment`].
pub async fn activate_pending(
    conn: &mut SqliteConnection,
    loan_id: i64,
    borrowed_at: DateTime<Utc>,
) -> LedgerResult<bool> {
    let result = sqlx::query(
        "UPDATE loans SET status = 'active', borrowed_at = ?, updated_at = ? WHERE loan_id = ?",
    )
    .bind(borrowed_at)
    .bind(Utc::now())
    .bind(loan_id)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() > 0)
}
