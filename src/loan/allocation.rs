//! Settlement allocation - deterministic ordering and budget distribution
//!
//! Both settlement orders are fixed policy, implemented as explicit
//! comparators rather than inferred from storage order, so the walk is
//! reproducible under any backing store.

use std::cmp::Ordering;

use crate::loan::model::{Loan, LoanStatus};

/// Ordering for "repay everything": system loans first, then higher interest
/// rate, then earlier `borrowed_at`. Extinguishes the most punitive and
/// oldest debt first.
pub fn settlement_cmp(a: &Loan, b: &Loan) -> Ordering {
    b.is_system_loan()
        .cmp(&a.is_system_loan())
        .then(
            b.interest_rate
                .partial_cmp(&a.interest_rate)
                .unwrap_or(Ordering::Equal),
        )
        .then(a.borrowed_at.cmp(&b.borrowed_at))
        .then(a.loan_id.cmp(&b.loan_id))
}

/// Ordering for single-pair repayment and for collection: oldest debt first.
pub fn chronological_cmp(a: &Loan, b: &Loan) -> Ordering {
    a.borrowed_at
        .cmp(&b.borrowed_at)
        .then(a.loan_id.cmp(&b.loan_id))
}

/// One loan's planned share of a settlement
#[derive(Debug, Clone)]
pub struct Allocation {
    pub loan_id: i64,
    pub lender_id: String,
    pub amount: i64,
    pub new_repaid_amount: i64,
    pub status_after: LoanStatus,
}

/// The full plan for one settlement walk
#[derive(Debug)]
pub struct AllocationPlan {
    pub total_applied: i64,
    pub allocations: Vec<Allocation>,
}

/// Walk `loans` in the given order, allocating `min(budget left, remaining)`
/// to each until the budget is exhausted. A loan whose allocation reaches its
/// `due_amount` transitions to `paid`; a partially settled loan keeps its
/// current status, so an overdue loan stays overdue.
pub fn plan(loans: &[Loan], budget: i64) -> AllocationPlan {
    let mut left = budget.max(0);
    let mut total_applied = 0;
    let mut allocations = Vec::new();

    for loan in loans {
        if left <= 0 {
            break;
        }

        let share = left.min(loan.remaining_amount());
        if share <= 0 {
            continue;
        }

        // The stored value must never exceed due_amount
        let new_repaid = (loan.repaid_amount + share).min(loan.due_amount);
        let status_after = if new_repaid >= loan.due_amount {
            LoanStatus::Paid
        } else {
            loan.status
        };

        allocations.push(Allocation {
            loan_id: loan.loan_id,
            lender_id: loan.lender_id.clone(),
            amount: share,
            new_repaid_amount: new_repaid,
            status_after,
        });

        total_applied += share;
        left -= share;
    }

    AllocationPlan {
        total_applied,
        allocations,
    }
}
