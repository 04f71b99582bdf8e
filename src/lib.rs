//! Loanbook - a micro-loan ledger and repayment allocation engine
//!
//! This library implements the loan lifecycle state machine, the transactional
//! balance-transfer protocol, and the multi-loan repayment/collection
//! allocation algorithm for a virtual-currency economy. Chat parsing and
//! message formatting are the caller's concern; every public operation takes
//! plain identifiers and amounts and returns typed outcomes.

pub mod account;
pub mod config;
pub mod db;
pub mod error;
pub mod loan;
