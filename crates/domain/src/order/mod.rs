//! Orders and their status machine.

mod aggregate;
mod book;
mod state;

pub use aggregate::{ORDER_TTL_SECS, Order, OrderLine};
pub use book::OrderBook;
pub use state::OrderStatus;
