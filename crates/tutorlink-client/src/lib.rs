//! # tutorlink-client
//!
//! Client-resident core of the Tutorlink messaging stack: the connection
//! session state machine, optimistic send reconciliation, unread counters
//! and the HTTP API wrapper. The crate is UI-agnostic; a frontend drives it
//! through [`session::ConnectionSession`], [`state::ChatState`] and
//! [`api::ApiClient`] and renders from the state it holds.

pub mod api;
pub mod events;
pub mod read_state;
pub mod reconcile;
pub mod session;
pub mod state;
pub mod transport;

pub use api::ApiClient;
pub use session::{ConnectionSession, SessionState};
pub use state::ChatState;
pub use transport::{Connection, Connector, WsConnector};
