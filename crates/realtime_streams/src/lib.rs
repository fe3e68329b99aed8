//! Turns listener-based realtime data source APIs into async streams with explicit cleanup.
//!
//! A data source (realtime database, auth service) exposes callbacks through the traits in
//! [`source`]. The adapter wraps each registration in a [`futures_core::Stream`] whose items are
//! `Result<T, SourceError<E>>`: an `Err` is always the last item, `None` is completion, and
//! dropping the stream is cancellation.
//!
//! ## Lifecycle
//! - Streams are lazy. The listener is registered on the first poll, never at construction, and
//!   each stream owns its own registration.
//! - Exactly one deregistration per registration, whether the consumer drops the stream, the
//!   source cancels the listener, or a single-shot read finishes.
//! - After the terminal signal nothing else is forwarded, even if a misbehaving source keeps
//!   calling back.
//! - Writes and auth attempts run eagerly and return a [`Completion`] that replays the outcome to
//!   any number of observers, including ones attached after it settled.
//!
//! ```rust,no_run
//! use futures_util::StreamExt;
//! use realtime_streams::{source::Reference, StreamAdapter};
//!
//! async fn write_then_watch<R>(reference: &R, value: R::Value)
//! where
//!     R: Reference,
//!     R::Snapshot: std::fmt::Debug,
//!     R::Target: Clone,
//!     R::Error: Clone + std::fmt::Display,
//! {
//!     let adapter = StreamAdapter::builder().label("chat").build();
//!     if let Some(Err(err)) = adapter.set_value(reference, value).next().await {
//!         eprintln!("write rejected: {err}");
//!         return;
//!     }
//!     let mut values = adapter.observe_value(reference);
//!     while let Some(Ok(snapshot)) = values.next().await {
//!         println!("{snapshot:?}");
//!     }
//! }
//! ```
//!
//! Surfaces:
//! - [`StreamAdapter::observe_children`] plus the per-kind `observe_child_*` filters for child
//!   mutations ([`ChildEvent`]).
//! - [`StreamAdapter::observe_value`] and [`StreamAdapter::observe_single`] for whole values.
//! - [`StreamAdapter::set_value`] / [`StreamAdapter::update_children`] for acknowledged writes.
//! - [`StreamAdapter::observe_auth`] and the `auth_*` methods for authentication.
//! - [`SubscriptionBridge`], [`Completion`] and [`observe_stateful`] for sources that do not
//!   fit the traits in [`source`].
//!
//! Logging goes through `tracing`; every event carries the adapter `label` and the stream kind.

#![forbid(unsafe_code)]

mod adapter;
mod auth;
mod bridge;
mod child;
mod completion;
mod context;
mod defaults;
mod error;
mod single;
pub mod source;
mod stateful;
mod value;

#[cfg(test)]
mod test_support;

pub use adapter::{StreamAdapter, StreamAdapterBuilder};
pub use auth::AuthStates;
pub use bridge::{Emitter, Subscription, SubscriptionBridge};
pub use child::{ChildEvent, ChildEventKind, ChildEvents, OnlyKind};
pub use completion::{Completion, CompletionSink};
pub use error::SourceError;
pub use single::SingleValue;
pub use stateful::{observe_stateful, DistinctUntilChanged, StatefulStream};
pub use value::ValueEvents;
