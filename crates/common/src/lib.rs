//! Identifier types shared by every marketplace crate.

mod types;

pub use types::{OrderId, ProductKey, Username};
