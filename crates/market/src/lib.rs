//! Market service layer.
//!
//! [`Market`] owns the ledgers from the `domain` crate behind one lock,
//! persists every mutation through a [`store::Store`] and publishes
//! [`MarketEvent`]s. [`OrderLifecycleManager`] holds the order rules and
//! [`TimeoutSweeper`] expires abandoned orders in the background.

pub mod clock;
pub mod events;
pub mod lifecycle;
pub mod market;
pub mod state;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use events::MarketEvent;
pub use lifecycle::{OrderLifecycleManager, OrderSummary, Payment};
pub use market::{AccountView, CartLine, Market, ProductView};
pub use state::{MarketState, ReconcileReport};
pub use sweeper::TimeoutSweeper;
