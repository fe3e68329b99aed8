#![forbid(unsafe_code)]
//! In-process realtime data source implementing the `realtime_streams` source traits.
//!
//! [`MemoryDatabase`] keeps a JSON tree and notifies listeners synchronously:
//! - [`MemoryRef`] implements `Query` and `Reference`. Child listeners receive the existing
//!   children as added on registration, then added/changed/removed diffs in key order; value
//!   listeners receive the current value on registration and on every change.
//! - `MemoryDatabase` implements `AuthSource` with anonymous, OAuth-token and custom-token
//!   sign-in.
//! - Faults are injected with [`MemoryDatabase::cancel_listeners`],
//!   [`MemoryDatabase::fail_next_write`] and [`MemoryDatabase::go_offline`].
//!
//! ```rust
//! use realtime_memory::MemoryDatabase;
//! use serde_json::json;
//!
//! let db = MemoryDatabase::with_value(json!({"rooms": {"lobby": {"topic": "hi"}}}));
//! assert_eq!(db.value_at("rooms/lobby/topic"), json!("hi"));
//! assert_eq!(db.reference("rooms").child("lobby").key(), Some("lobby"));
//! ```

mod auth;
mod database;
mod error;
mod snapshot;
mod tree;

pub use auth::AuthData;
pub use database::{ListenerId, MemoryDatabase, MemoryRef};
pub use error::{MemoryError, MemoryErrorCode};
pub use snapshot::DataSnapshot;
