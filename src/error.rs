//! Centralized error handling for the loan ledger
//!
//! Every engine operation returns a [`LedgerError`] on failure. Variants are
//! classified into three kinds: validation failures (malformed input, rejected
//! before any state change), business-rule violations (well-formed input the
//! ledger refuses, also without state change), and persistence failures (the
//! enclosing transaction is rolled back in full).

use thiserror::Error;

use crate::loan::LoanStatus;

/// Ledger error type
#[derive(Error, Debug)]
pub enum LedgerError {
    // Validation
    #[error("amount must be greater than zero")]
    NonPositiveAmount,

    #[error("lender and borrower must be different accounts")]
    SelfLoan,

    #[error("account id '{0}' is reserved")]
    ReservedAccount(String),

    #[error("interest rate must not be negative")]
    NegativeInterestRate,

    // Business rules
    #[error("account '{0}' does not exist")]
    AccountNotFound(String),

    #[error("loan #{0} does not exist")]
    LoanNotFound(i64),

    #[error("insufficient balance: {available} available, {required} required")]
    InsufficientBalance { available: i64, required: i64 },

    #[error("balance is empty, nothing can be settled")]
    EmptyBalance,

    #[error("only the designated borrower may confirm this loan")]
    NotTheBorrower,

    #[error("loan #{loan_id} is {status}, expected {expected}")]
    InvalidStatus {
        loan_id: i64,
        status: LoanStatus,
        expected: LoanStatus,
    },

    #[error("an unsettled system loan remains: {remaining} still owed")]
    OutstandingSystemLoan { remaining: i64 },

    #[error("borrowing is locked while a system loan is overdue")]
    OverdueSystemLoan,

    #[error("no credit available: historical peak balance is {peak}")]
    NoCreditAvailable { peak: i64 },

    #[error("requested {requested} exceeds the credit limit of {limit}")]
    CreditLimitExceeded { requested: i64, limit: i64 },

    // Persistence
    #[error("persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("loan #{0} disappeared mid-transaction")]
    MissingRecord(i64),
}

/// Coarse classification of a [`LedgerError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, rejected before any state change
    Validation,
    /// Well-formed input the ledger refuses; no state change
    BusinessRule,
    /// Store-level failure; the transaction was rolled back
    Persistence,
}

impl LedgerError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::NonPositiveAmount
            | LedgerError::SelfLoan
            | LedgerError::ReservedAccount(_)
            | LedgerError::NegativeInterestRate => ErrorKind::Validation,

            LedgerError::AccountNotFound(_)
            | LedgerError::LoanNotFound(_)
            | LedgerError::InsufficientBalance { .. }
            | LedgerError::EmptyBalance
            | LedgerError::NotTheBorrower
            | LedgerError::InvalidStatus { .. }
            | LedgerError::OutstandingSystemLoan { .. }
            | LedgerError::OverdueSystemLoan
            | LedgerError::NoCreditAvailable { .. }
            | LedgerError::CreditLimitExceeded { .. } => ErrorKind::BusinessRule,

            LedgerError::Persistence(_) | LedgerError::MissingRecord(_) => ErrorKind::Persistence,
        }
    }
}

/// Result type alias using LedgerError
pub type LedgerResult<T> = Result<T, LedgerError>;
