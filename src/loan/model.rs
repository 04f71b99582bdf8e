//! Loan models and data structures

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};

/// Reserved identifier for the platform lender. The SYSTEM account holds no
/// balance; repayments toward it are debited from the borrower and credited
/// to no one.
pub const SYSTEM_LENDER: &str = "SYSTEM";

/// Loan status
///
/// `pending → active → {paid, overdue}; overdue → paid`. `paid` is terminal.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Pending, // Peer loan awaiting borrower confirmation; no funds moved
    Active,  // Funds advanced, repayment outstanding
    Overdue, // System loan past its due date
    Paid,    // Fully settled
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Active => "active",
            LoanStatus::Overdue => "overdue",
            LoanStatus::Paid => "paid",
        }
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Total amount owed for a principal at a flat rate, truncated to whole coins.
/// Computed once at origination and never recomputed afterwards.
pub fn due_amount_for(principal: i64, interest_rate: f64) -> i64 {
    (principal as f64 * (1.0 + interest_rate)).floor() as i64
}

/// Loan record
///
/// The store owns the authoritative copy; instances of this struct are
/// transient views valid only within one transaction.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Loan {
    pub loan_id: i64,
    pub lender_id: String,
    pub borrower_id: String,
    pub principal: i64,
    pub interest_rate: f64,
    /// When funds actually moved; reset to the confirmation instant for
    /// peer loans that went through `pending`.
    pub borrowed_at: DateTime<Utc>,
    pub due_amount: i64,
    pub repaid_amount: i64,
    pub status: LoanStatus,
    /// Hard deadline; populated only for system loans.
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    /// Outstanding remainder, floored at zero
    pub fn remaining_amount(&self) -> i64 {
        (self.due_amount - self.repaid_amount).max(0)
    }

    pub fn is_paid_off(&self) -> bool {
        self.repaid_amount >= self.due_amount
    }

    pub fn is_system_loan(&self) -> bool {
        self.lender_id == SYSTEM_LENDER
    }

    /// Computed overdue predicate, re-evaluated on every read path. Only
    /// system loans with a due date can go overdue. A reader that observes
    /// `is_overdue()` on a stored `active` loan must persist the transition
    /// before acting on the result.
    pub fn is_overdue(&self) -> bool {
        self.is_system_loan()
            && self.status != LoanStatus::Paid
            && self.due_date.is_some_and(|due| Utc::now() > due)
    }
}

/// Insert view of a loan; `loan_id` is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewLoan {
    pub lender_id: String,
    pub borrower_id: String,
    pub principal: i64,
    pub interest_rate: f64,
    pub borrowed_at: DateTime<Utc>,
    pub due_amount: i64,
    pub status: LoanStatus,
    pub due_date: Option<DateTime<Utc>>,
}

impl NewLoan {
    /// A peer loan request; no funds move until the borrower confirms.
    pub fn peer(lender_id: &str, borrower_id: &str, principal: i64, interest_rate: f64) -> Self {
        NewLoan {
            lender_id: lender_id.to_string(),
            borrower_id: borrower_id.to_string(),
            principal,
            interest_rate,
            borrowed_at: Utc::now(),
            due_amount: due_amount_for(principal, interest_rate),
            status: LoanStatus::Pending,
            due_date: None,
        }
    }

    /// A system loan; active immediately, funds move at creation.
    pub fn system(
        borrower_id: &str,
        principal: i64,
        interest_rate: f64,
        due_date: DateTime<Utc>,
    ) -> Self {
        NewLoan {
            lender_id: SYSTEM_LENDER.to_string(),
            borrower_id: borrower_id.to_string(),
            principal,
            interest_rate,
            borrowed_at: Utc::now(),
            due_amount: due_amount_for(principal, interest_rate),
            status: LoanStatus::Active,
            due_date: Some(due_date),
        }
    }
}

/// One loan's share of a settlement
#[derive(Debug, Serialize, Clone)]
pub struct LoanAllocation {
    pub loan_id: i64,
    pub amount: i64,
    pub status_after: LoanStatus,
}

/// Result of a repayment operation
#[derive(Debug, Serialize)]
pub struct RepaymentOutcome {
    /// Total actually charged; never more than the debt within scope
    pub total_applied: i64,
    pub allocations: Vec<LoanAllocation>,
    /// Debt left within the operation's counterparty scope
    pub remaining_debt: i64,
    pub balance_after: i64,
}

impl RepaymentOutcome {
    /// Outcome for a borrower with no debt in scope
    pub fn no_debt(balance: i64) -> Self {
        RepaymentOutcome {
            total_applied: 0,
            allocations: Vec::new(),
            remaining_debt: 0,
            balance_after: balance,
        }
    }
}

/// Result of a collection operation
#[derive(Debug, Serialize)]
pub struct CollectionOutcome {
    pub total_collected: i64,
    pub allocations: Vec<LoanAllocation>,
    /// What the lender asked for, capped at the total debt
    pub requested: i64,
    /// Portion of the request the borrower's balance could not cover
    pub shortfall: i64,
    pub remaining_debt: i64,
}

/// One side of a user's loan book
#[derive(Debug, Serialize, Default)]
pub struct SideSummary {
    pub count: usize,
    pub total_principal: i64,
    pub total_outstanding: i64,
}

/// Per-user loan book summary over outstanding loans
#[derive(Debug, Serialize)]
pub struct LoanSummary {
    pub lent: SideSummary,
    pub borrowed: SideSummary,
}
