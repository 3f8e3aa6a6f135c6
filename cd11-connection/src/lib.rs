//! Async CD-1.1 station connection.
//!
//! A [`Connection`] owns one station's socket and exposes ordered sends, a continuous
//! receive stream, and an idempotent close. A [`CompositeHandler`] routes the received
//! frames to per-type handlers.

pub mod connection;
pub mod dispatch;
pub mod error;
pub mod state;
pub mod transport;

pub use connection::Connection;
pub use dispatch::{CompositeHandler, DispatchHandle, FrameGroup, GroupHandler, HandlerError};
pub use error::{ConnectionError, Result};
pub use state::{ConnectionConfig, ConnectionState};
pub use transport::{serve, serve_dispatch};
