//! # tutorlink-store
//!
//! Durable persistence for the Tutorlink messaging core, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection` with typed helpers for messages, read state and
//! group membership. Callers on the async side hold it behind a mutex.

pub mod database;
pub mod groups;
pub mod messages;
pub mod migrations;

mod error;

pub use database::Database;
pub use error::StoreError;
