//! Account ledger boundary - balances and the historical peak
//!
//! Every balance write in the crate routes through [`adjust`], a single
//! atomic adjust-and-clamp statement, so the non-negative-balance invariant
//! holds no matter which engine is writing. Like the loan store, every
//! function runs against the caller's connection so it joins the caller's
//! transaction.

use sqlx::SqliteConnection;

use crate::error::{LedgerError, LedgerResult};

/// Account record
#[derive(Debug, serde::Serialize, serde::Deserialize, sqlx::FromRow, Clone)]
pub struct Account {
    pub user_id: String,
    pub coins: i64,
    /// Highest balance ever held; sizes the system-loan credit limit
    pub max_coins: i64,
}

/// Create an account with an initial balance; the peak starts at the balance.
pub async fn create(conn: &mut SqliteConnection, user_id: &str, coins: i64) -> LedgerResult<Account> {
    let account = sqlx::query_as::<_, Account>(
        "INSERT INTO accounts (user_id, coins, max_coins) VALUES (?, ?, ?) RETURNING *",
    )
    .bind(user_id)
    .bind(coins)
    .bind(coins)
    .fetch_one(conn)
    .await?;

    Ok(account)
}

/// Fetch an account by id.
pub async fn get(conn: &mut SqliteConnection, user_id: &str) -> LedgerResult<Option<Account>> {
    let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(conn)
        .await?;

    Ok(account)
}

/// Current balance; the account must exist.
pub async fn balance(conn: &mut SqliteConnection, user_id: &str) -> LedgerResult<i64> {
    sqlx::query_scalar("SELECT coins FROM accounts WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| LedgerError::AccountNotFound(user_id.to_string()))
}

/// Historical peak balance; the account must exist.
pub async fn peak_balance(conn: &mut SqliteConnection, user_id: &str) -> LedgerResult<i64> {
    sqlx::query_scalar("SELECT max_coins FROM accounts WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| LedgerError::AccountNotFound(user_id.to_string()))
}

/// Adjust the balance by `delta`, clamped at zero on decrement, and return
/// the new balance. Does not touch the peak; credit paths that should raise
/// it call [`raise_peak_if_exceeded`] afterwards.
pub async fn adjust(conn: &mut SqliteConnection, user_id: &str, delta: i64) -> LedgerResult<i64> {
    sqlx::query_scalar(
        "UPDATE accounts SET coins = MAX(0, coins + ?) WHERE user_id = ? RETURNING coins",
    )
    .bind(delta)
    .bind(user_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| LedgerError::AccountNotFound(user_id.to_string()))
}

/// Raise the historical peak marker when the balance exceeds it.
pub async fn raise_peak_if_exceeded(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> LedgerResult<()> {
    sqlx::query("UPDATE accounts SET max_coins = coins WHERE user_id = ? AND coins > max_coins")
        .bind(user_id)
        .execute(conn)
        .await?;

    Ok(())
}
