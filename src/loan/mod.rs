//! Loan domain module
//!
//! Contains the loan record model, the store, the allocation core, and the
//! service that ties them into atomic operations.

pub mod allocation;
mod model;
mod service;
pub mod store;

pub use model::*;
pub use service::LoanService;
