//! Persistence for the marketplace engine.
//!
//! The [`Store`] trait is the only way the market reads or writes durable
//! state. Every save is a full overwrite of its collection.

pub mod error;
pub mod file;
pub mod memory;
pub mod store;

pub use error::{Result, StoreError};
pub use file::JsonFileStore;
pub use memory::InMemoryStore;
pub use store::Store;
