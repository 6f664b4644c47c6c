//! Domain layer for the marketplace engine.
//!
//! This crate provides the ledgers the market coordinates:
//! - [`InventoryLedger`] owns stock and frozen-stock counters
//! - [`AccountLedger`] owns balances behind the [`BalanceLedger`] trait
//! - [`CartBook`] keeps per-consumer carts
//! - [`Order`] and [`OrderBook`] track pending, paid and cancelled orders

pub mod accounts;
pub mod cart;
pub mod error;
pub mod inventory;
pub mod order;
pub mod value_objects;

pub use accounts::{
    Account, AccountLedger, BalanceLedger, MIN_PASSWORD_LEN, PasswordHasher, Role, Sha256Hasher,
};
pub use cart::{CartBook, CartItems, CartMap};
pub use error::{DomainError, Result};
pub use inventory::{
    Catalog, Category, DiscountTable, InventoryLedger, NewProduct, Product, ProductUpdate,
    SearchField, SearchQuery,
};
pub use order::{ORDER_TTL_SECS, Order, OrderBook, OrderLine, OrderStatus};
pub use value_objects::Money;
