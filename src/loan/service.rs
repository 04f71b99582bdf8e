//! Loan service layer - lifecycle, repayment allocation, and collection
//!
//! Each public operation is one atomic unit of work: it opens a sqlx
//! transaction, composes loan-store and account-ledger calls inside it, and
//! commits or rolls back as a whole. SQLite's single-writer serialization is
//! the isolation mechanism; every balance read and the delta it informs live
//! in the same transaction.
//!
//! Overdue state is derived lazily: there is no sweep job, so every read path
//! that touches a loan list syncs stale `active` system loans to `overdue`
//! before acting on the result.

use chrono::{Duration, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::account;
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::loan::allocation::{self, AllocationPlan};
use crate::loan::model::{
    CollectionOutcome, Loan, LoanAllocation, LoanStatus, LoanSummary, NewLoan, RepaymentOutcome,
    SideSummary, SYSTEM_LENDER,
};
use crate::loan::store;

/// Loan service for managing the loan ledger
#[derive(Clone)]
pub struct LoanService {
    pool: SqlitePool,
    default_interest_rate: f64,
    system_loan_ratio: f64,
    system_loan_period_days: i64,
}

impl LoanService {
    /// Create a new loan service instance
    pub fn new(pool: SqlitePool, config: &LedgerConfig) -> Self {
        Self {
            pool,
            default_interest_rate: config.default_interest_rate,
            system_loan_ratio: config.system_loan_ratio,
            system_loan_period_days: config.system_loan_period_days,
        }
    }

    /// Originate a peer loan. The loan enters `pending` and no funds move
    /// until the borrower confirms it.
    pub async fn originate_loan(
        &self,
        lender_id: &str,
        borrower_id: &str,
        principal: i64,
        interest_rate: Option<f64>,
    ) -> LedgerResult<Loan> {
        if lender_id == borrower_id {
            return Err(LedgerError::SelfLoan);
        }
        if lender_id == SYSTEM_LENDER || borrower_id == SYSTEM_LENDER {
            return Err(LedgerError::ReservedAccount(SYSTEM_LENDER.to_string()));
        }
        if principal <= 0 {
            return Err(LedgerError::NonPositiveAmount);
        }
        let rate = interest_rate.unwrap_or(self.default_interest_rate);
        if rate < 0.0 {
            return Err(LedgerError::NegativeInterestRate);
        }

        let mut tx = self.pool.begin().await?;

        for party in [lender_id, borrower_id] {
            if account::get(&mut tx, party).await?.is_none() {
                return Err(LedgerError::AccountNotFound(party.to_string()));
            }
        }

        let loan = store::insert(&mut tx, &NewLoan::peer(lender_id, borrower_id, principal, rate))
            .await?;

        tx.commit().await?;

        tracing::info!(
            loan_id = loan.loan_id,
            lender = %lender_id,
            borrower = %borrower_id,
            principal,
            "peer loan originated, awaiting confirmation"
        );

        Ok(loan)
    }

    /// Confirm a pending peer loan. Only the designated borrower may confirm;
    /// the principal moves lender to borrower atomically, and the loan's
    /// clock starts at the confirmation instant.
    pub async fn confirm_loan(&self, loan_id: i64, confirming_user: &str) -> LedgerResult<Loan> {
        let mut tx = self.pool.begin().await?;

        let loan = store::get(&mut tx, loan_id)
            .await?
            .ok_or(LedgerError::LoanNotFound(loan_id))?;

        if loan.borrower_id != confirming_user {
            return Err(LedgerError::NotTheBorrower);
        }
        if loan.status != LoanStatus::Pending {
            return Err(LedgerError::InvalidStatus {
                loan_id,
                status: loan.status,
                expected: LoanStatus::Pending,
            });
        }

        // The lender's funds may have changed since origination
        let lender_balance = account::balance(&mut tx, &loan.lender_id).await?;
        if lender_balance < loan.principal {
            return Err(LedgerError::InsufficientBalance {
                available: lender_balance,
                required: loan.principal,
            });
        }

        account::adjust(&mut tx, &loan.lender_id, -loan.principal).await?;
        account::adjust(&mut tx, &loan.borrower_id, loan.principal).await?;
        account::raise_peak_if_exceeded(&mut tx, &loan.borrower_id).await?;

        let now = Utc::now();
        if !store::activate_pending(&mut tx, loan_id, now).await? {
            return Err(LedgerError::MissingRecord(loan_id));
        }

        let confirmed = store::get(&mut tx, loan_id)
            .await?
            .ok_or(LedgerError::MissingRecord(loan_id))?;

        tx.commit().await?;

        tracing::info!(
            loan_id,
            lender = %confirmed.lender_id,
            borrower = %confirmed.borrower_id,
            principal = confirmed.principal,
            "peer loan confirmed, funds advanced"
        );

        Ok(confirmed)
    }

    /// Borrow from the system lender. The loan is active immediately, capped
    /// at a fraction of the borrower's historical peak balance, and carries a
    /// hard due date. At most one system loan may be outstanding per
    /// borrower, and borrowing is locked entirely while one is overdue.
    pub async fn borrow_from_system(
        &self,
        borrower_id: &str,
        amount: Option<i64>,
    ) -> LedgerResult<Loan> {
        if borrower_id == SYSTEM_LENDER {
            return Err(LedgerError::ReservedAccount(SYSTEM_LENDER.to_string()));
        }
        if let Some(requested) = amount {
            if requested <= 0 {
                return Err(LedgerError::NonPositiveAmount);
            }
        }

        let mut tx = self.pool.begin().await?;

        let peak = account::peak_balance(&mut tx, borrower_id).await?;

        let mut outstanding = store::find_active_between(&mut tx, SYSTEM_LENDER, borrower_id).await?;
        sync_overdue(&mut tx, &mut outstanding).await?;

        if store::has_overdue_system_loan(&mut tx, borrower_id).await? {
            // The lock rejection must not roll back the overdue sync above
            tx.commit().await?;
            return Err(LedgerError::OverdueSystemLoan);
        }
        if let Some(existing) = store::find_active_system_loan(&mut tx, borrower_id).await? {
            return Err(LedgerError::OutstandingSystemLoan {
                remaining: existing.remaining_amount(),
            });
        }

        let limit = (peak as f64 * self.system_loan_ratio).floor() as i64;
        if limit <= 0 {
            return Err(LedgerError::NoCreditAvailable { peak });
        }

        let principal = match amount {
            Some(requested) if requested > limit => {
                return Err(LedgerError::CreditLimitExceeded { requested, limit });
            }
            Some(requested) => requested,
            None => limit,
        };

        // The credit must not raise the peak, or the limit would feed itself
        account::adjust(&mut tx, borrower_id, principal).await?;

        let due_date = Utc::now() + Duration::days(self.system_loan_period_days);
        let loan = store::insert(
            &mut tx,
            &NewLoan::system(borrower_id, principal, self.default_interest_rate, due_date),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            loan_id = loan.loan_id,
            borrower = %borrower_id,
            principal,
            due_date = %due_date,
            "system loan issued"
        );

        Ok(loan)
    }

    /// Repay debt owed to one specific lender (including the system lender).
    /// Oldest debt is settled first; the amount in excess of the total debt
    /// is never charged.
    pub async fn repay(
        &self,
        borrower_id: &str,
        lender_id: &str,
        amount: i64,
    ) -> LedgerResult<RepaymentOutcome> {
        if amount <= 0 {
            return Err(LedgerError::NonPositiveAmount);
        }

        let mut tx = self.pool.begin().await?;

        let balance = account::balance(&mut tx, borrower_id).await?;
        if balance < amount {
            return Err(LedgerError::InsufficientBalance {
                available: balance,
                required: amount,
            });
        }

        let mut loans = store::find_active_between(&mut tx, lender_id, borrower_id).await?;
        sync_overdue(&mut tx, &mut loans).await?;

        if loans.is_empty() {
            tx.commit().await?;
            return Ok(RepaymentOutcome::no_debt(balance));
        }

        loans.sort_by(allocation::chronological_cmp);
        let total_debt: i64 = loans.iter().map(|l| l.remaining_amount()).sum();
        let plan = allocation::plan(&loans, amount);

        apply_loan_updates(&mut tx, &plan).await?;

        let balance_after = account::adjust(&mut tx, borrower_id, -plan.total_applied).await?;
        if lender_id != SYSTEM_LENDER && plan.total_applied > 0 {
            account::adjust(&mut tx, lender_id, plan.total_applied).await?;
            account::raise_peak_if_exceeded(&mut tx, lender_id).await?;
        }

        tx.commit().await?;

        tracing::info!(
            borrower = %borrower_id,
            lender = %lender_id,
            applied = plan.total_applied,
            loans = plan.allocations.len(),
            "repayment applied"
        );

        Ok(RepaymentOutcome {
            total_applied: plan.total_applied,
            remaining_debt: total_debt - plan.total_applied,
            balance_after,
            allocations: into_loan_allocations(&plan),
        })
    }

    /// Repay every outstanding debt the borrower's balance can cover. System
    /// loans are settled first, then higher interest rates, then the oldest
    /// debt; the entire balance is the budget ceiling.
    pub async fn repay_all(&self, borrower_id: &str) -> LedgerResult<RepaymentOutcome> {
        let mut tx = self.pool.begin().await?;

        let balance = account::balance(&mut tx, borrower_id).await?;
        if balance <= 0 {
            return Err(LedgerError::EmptyBalance);
        }

        let mut loans = store::find_outstanding_by_borrower(&mut tx, borrower_id).await?;
        sync_overdue(&mut tx, &mut loans).await?;

        if loans.is_empty() {
            tx.commit().await?;
            return Ok(RepaymentOutcome::no_debt(balance));
        }

        loans.sort_by(allocation::settlement_cmp);
        let total_debt: i64 = loans.iter().map(|l| l.remaining_amount()).sum();
        let plan = allocation::plan(&loans, balance);

        apply_loan_updates(&mut tx, &plan).await?;

        let balance_after = account::adjust(&mut tx, borrower_id, -plan.total_applied).await?;
        for alloc in &plan.allocations {
            if alloc.lender_id != SYSTEM_LENDER {
                account::adjust(&mut tx, &alloc.lender_id, alloc.amount).await?;
                account::raise_peak_if_exceeded(&mut tx, &alloc.lender_id).await?;
            }
        }

        tx.commit().await?;

        tracing::info!(
            borrower = %borrower_id,
            applied = plan.total_applied,
            loans = plan.allocations.len(),
            "repaid across all lenders"
        );

        Ok(RepaymentOutcome {
            total_applied: plan.total_applied,
            remaining_debt: total_debt - plan.total_applied,
            balance_after,
            allocations: into_loan_allocations(&plan),
        })
    }

    /// Lender-initiated collection from a specific borrower, bounded by the
    /// borrower's actual balance. Loans are drained oldest first; both
    /// balance legs commit together or not at all.
    pub async fn collect(
        &self,
        lender_id: &str,
        borrower_id: &str,
        amount: Option<i64>,
    ) -> LedgerResult<CollectionOutcome> {
        if lender_id == borrower_id {
            return Err(LedgerError::SelfLoan);
        }
        if lender_id == SYSTEM_LENDER || borrower_id == SYSTEM_LENDER {
            return Err(LedgerError::ReservedAccount(SYSTEM_LENDER.to_string()));
        }
        if let Some(requested) = amount {
            if requested <= 0 {
                return Err(LedgerError::NonPositiveAmount);
            }
        }

        let mut tx = self.pool.begin().await?;

        let mut loans = store::find_active_between(&mut tx, lender_id, borrower_id).await?;
        sync_overdue(&mut tx, &mut loans).await?;

        if loans.is_empty() {
            tx.commit().await?;
            return Ok(CollectionOutcome {
                total_collected: 0,
                allocations: Vec::new(),
                requested: 0,
                shortfall: 0,
                remaining_debt: 0,
            });
        }

        loans.sort_by(allocation::chronological_cmp);
        let total_debt: i64 = loans.iter().map(|l| l.remaining_amount()).sum();
        let requested = amount.map_or(total_debt, |a| a.min(total_debt));

        let borrower_balance = account::balance(&mut tx, borrower_id).await?;
        let actual = requested.min(borrower_balance);
        if actual <= 0 {
            tx.commit().await?;
            return Err(LedgerError::EmptyBalance);
        }

        let plan = allocation::plan(&loans, actual);

        apply_loan_updates(&mut tx, &plan).await?;

        account::adjust(&mut tx, borrower_id, -plan.total_applied).await?;
        // Collection credits do not raise the lender's peak
        account::adjust(&mut tx, lender_id, plan.total_applied).await?;

        tx.commit().await?;

        tracing::info!(
            lender = %lender_id,
            borrower = %borrower_id,
            collected = plan.total_applied,
            requested,
            "collection applied"
        );

        Ok(CollectionOutcome {
            total_collected: plan.total_applied,
            requested,
            shortfall: requested - plan.total_applied,
            remaining_debt: total_debt - plan.total_applied,
            allocations: into_loan_allocations(&plan),
        })
    }

    /// Per-side summary of a user's outstanding loans.
    pub async fn summary(&self, user_id: &str) -> LedgerResult<LoanSummary> {
        let mut tx = self.pool.begin().await?;

        let mut lent = store::find_outstanding_by_lender(&mut tx, user_id).await?;
        sync_overdue(&mut tx, &mut lent).await?;
        let mut borrowed = store::find_outstanding_by_borrower(&mut tx, user_id).await?;
        sync_overdue(&mut tx, &mut borrowed).await?;

        tx.commit().await?;

        Ok(LoanSummary {
            lent: side_summary(&lent),
            borrowed: side_summary(&borrowed),
        })
    }

    /// Outstanding loans for one user (both sides) or the whole ledger,
    /// newest first. Stale loans are marked overdue before being returned.
    pub async fn list_active(&self, user_id: Option<&str>) -> LedgerResult<Vec<Loan>> {
        let mut tx = self.pool.begin().await?;

        let mut loans = match user_id {
            Some(user) => {
                let mut loans = store::find_outstanding_by_lender(&mut tx, user).await?;
                loans.extend(store::find_outstanding_by_borrower(&mut tx, user).await?);
                loans
            }
            None => store::find_all_outstanding(&mut tx).await?,
        };
        sync_overdue(&mut tx, &mut loans).await?;

        tx.commit().await?;

        loans.sort_by(|a, b| b.borrowed_at.cmp(&a.borrowed_at).then(b.loan_id.cmp(&a.loan_id)));
        Ok(loans)
    }

    /// Whether the user is locked out of borrowing-gated features by an
    /// overdue system loan. Persists any pending overdue transition.
    pub async fn is_borrowing_restricted(&self, user_id: &str) -> LedgerResult<bool> {
        let mut tx = self.pool.begin().await?;

        let mut loans = store::find_active_between(&mut tx, SYSTEM_LENDER, user_id).await?;
        sync_overdue(&mut tx, &mut loans).await?;

        tx.commit().await?;

        Ok(loans.iter().any(|l| l.status == LoanStatus::Overdue))
    }

    /// Total outstanding remainder the user owes across all lenders.
    pub async fn total_debt(&self, user_id: &str) -> LedgerResult<i64> {
        let mut tx = self.pool.begin().await?;

        let mut loans = store::find_outstanding_by_borrower(&mut tx, user_id).await?;
        sync_overdue(&mut tx, &mut loans).await?;

        tx.commit().await?;

        Ok(loans.iter().map(|l| l.remaining_amount()).sum())
    }
}

/// Persist the lazy `active → overdue` transition for any stale system loan
/// in the slice, updating the in-memory copies to match. Idempotent: loans
/// already stored as overdue produce no writes.
async fn sync_overdue(conn: &mut SqliteConnection, loans: &mut [Loan]) -> LedgerResult<()> {
    for loan in loans.iter_mut() {
        if loan.status == LoanStatus::Active && loan.is_overdue() {
            if !store::update_repayment(conn, loan.loan_id, loan.repaid_amount, LoanStatus::Overdue)
                .await?
            {
                return Err(LedgerError::MissingRecord(loan.loan_id));
            }
            loan.status = LoanStatus::Overdue;
            tracing::warn!(
                loan_id = loan.loan_id,
                borrower = %loan.borrower_id,
                "system loan past due, marked overdue"
            );
        }
    }
    Ok(())
}

/// Write every allocation in the plan back to the store.
async fn apply_loan_updates(conn: &mut SqliteConnection, plan: &AllocationPlan) -> LedgerResult<()> {
    for alloc in &plan.allocations {
        if !store::update_repayment(conn, alloc.loan_id, alloc.new_repaid_amount, alloc.status_after)
            .await?
        {
            return Err(LedgerError::MissingRecord(alloc.loan_id));
        }
    }
    Ok(())
}

fn into_loan_allocations(plan: &AllocationPlan) -> Vec<LoanAllocation> {
    plan.allocations
        .iter()
        .map(|a| LoanAllocation {
            loan_id: a.loan_id,
            amount: a.amount,
            status_after: a.status_after,
        })
        .collect()
}

fn side_summary(loans: &[Loan]) -> SideSummary {
    SideSummary {
        count: loans.len(),
        total_principal: loans.iter().map(|l| l.principal).sum(),
        total_outstanding: loans.iter().map(|l| l.remaining_amount()).sum(),
    }
}
