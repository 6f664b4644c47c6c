//! TCP front end for the marketplace engine.
//!
//! Clients exchange newline-delimited JSON messages with the server. Each
//! connection gets its own [`Dispatcher`] that routes actions to the shared
//! [`market::Market`].

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod protocol;

pub use client::{Client, ClientError};
pub use codec::JsonLineCodec;
pub use config::Config;
pub use connection::handle_connection;
pub use dispatcher::{Dispatcher, Session};
pub use error::{Result, ServerError};
pub use listener::serve;
pub use protocol::{Action, Request, Response, Status};
