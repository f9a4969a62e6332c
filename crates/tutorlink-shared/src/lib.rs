//! # tutorlink-shared
//!
//! Domain types, wire protocol and error taxonomy shared between the
//! Tutorlink messaging server and the client-resident core.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ChatError;
pub use protocol::{ClientAction, ServerEvent};
pub use types::*;
