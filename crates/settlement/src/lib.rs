//! Settlement of paid orders.
//!
//! Paying an order moves money from one consumer to every merchant whose
//! products appear in it:
//! 1. Debit the consumer the order total
//! 2. Credit each merchant the sum of their lines
//!
//! If any credit fails, previously applied steps are compensated in reverse
//! order and the ledger is left as it was before the attempt.

pub mod coordinator;
pub mod error;
pub mod plan;
pub mod state;

pub use coordinator::SettlementCoordinator;
pub use error::{Result, SettlementError};
pub use plan::{SettlementPlan, SettlementReceipt, SettlementStep};
pub use state::SettlementState;
