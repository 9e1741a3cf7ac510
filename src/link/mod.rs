//! WebSocket link to the control backend.
//!
//! [`GcsLink`] owns the single connection: it dials the configured endpoint,
//! feeds decoded frames into the [`Store`](crate::store::Store), retries on a
//! fixed interval while the backend is away and encodes operator commands.

mod command;
mod session;


pub use session::{EndpointChange, GcsLink, LinkOptions, LinkState};
