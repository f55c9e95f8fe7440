//! Wire protocol for the lock server.
//!
//! Requests travel as signed [`Frame`]s. A [`Gateway`] checks and decodes
//! them, [`dispatch`] runs them against any [`cereal_core::LockServer`], and
//! [`Listener`] and [`Client`] carry them over TCP.

mod auth;
mod client;
mod error;
mod frame;
mod gateway;
mod listener;
mod request;
pub mod transport;

pub use auth::{Authenticator, KeyedDigest, Unauthenticated};
pub use client::Client;
pub use error::FrameError;
pub use frame::{Frame, HEADER_LEN, MAX_CONTEXT, MAX_PAYLOAD_LEN, PROTOCOL_VERSION};
pub use gateway::{Gateway, dispatch};
pub use listener::Listener;
pub use request::{Request, Response};
pub use transport::{TokioTransport, Transport};
