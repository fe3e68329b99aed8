use std::sync::Arc;

use crate::{
    auth::{self, AuthStates},
    child::{ChildEvents, OnlyKind},
    completion::{self, Completion},
    context::StreamContext,
    defaults::default_label,
    single::{single_value, SingleValue},
    source::{AuthSource, Query, Reference},
    value::{value_events, ValueEvents},
};

/// Converts listener-based data source APIs into streams.
///
/// Every `observe_*` call opens its own listener registration when first polled and releases
/// it when the stream is dropped or terminates. Write and authentication calls start the
/// operation immediately and return a [`Completion`] that replays the outcome.
///
/// ```rust,no_run
/// use futures_util::StreamExt;
/// use realtime_streams::{source::Query, StreamAdapter};
///
/// async fn print_new_children<Q: Query>(rooms: &Q)
/// where
///     Q::Snapshot: std::fmt::Debug,
///     Q::Error: std::fmt::Display,
/// {
///     let adapter = StreamAdapter::builder().label("rooms").build();
///     let mut added = adapter.observe_child_added(rooms);
///     while let Some(event) = added.next().await {
///         match event {
///             Ok(event) => println!("{:?} after {:?}", event.snapshot(), event.previous_sibling_key()),
///             Err(err) => eprintln!("{err}"),
///         }
///     }
/// }
/// ```
#[derive(Clone, Debug)]
pub struct StreamAdapter {
    label: Arc<str>,
    trace_values: bool,
}

impl StreamAdapter {
    /// Adapter with the default label and value tracing disabled.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> StreamAdapterBuilder {
        StreamAdapterBuilder::default()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn context(&self, kind: &'static str) -> StreamContext {
        StreamContext::new(Arc::clone(&self.label), kind, self.trace_values)
    }

    /// Every child mutation of `query`, classified by kind, in arrival order.
    pub fn observe_children<'a, Q: Query>(
        &self,
        query: &'a Q,
    ) -> ChildEvents<'a, Q::Snapshot, Q::Error> {
        ChildEvents::register(query, self.context("children"))
    }

    pub fn observe_child_added<'a, Q: Query>(
        &self,
        query: &'a Q,
    ) -> OnlyKind<ChildEvents<'a, Q::Snapshot, Q::Error>> {
        ChildEvents::register(query, self.context("child_added")).only_added()
    }

    pub fn observe_child_changed<'a, Q: Query>(
        &self,
        query: &'a Q,
    ) -> OnlyKind<ChildEvents<'a, Q::Snapshot, Q::Error>> {
        ChildEvents::register(query, self.context("child_changed")).only_changed()
    }

    pub fn observe_child_moved<'a, Q: Query>(
        &self,
        query: &'a Q,
    ) -> OnlyKind<ChildEvents<'a, Q::Snapshot, Q::Error>> {
        ChildEvents::register(query, self.context("child_moved")).only_moved()
    }

    pub fn observe_child_removed<'a, Q: Query>(
        &self,
        query: &'a Q,
    ) -> OnlyKind<ChildEvents<'a, Q::Snapshot, Q::Error>> {
        ChildEvents::register(query, self.context("child_removed")).only_removed()
    }

    /// Every whole-value change of `query`.
    pub fn observe_value<'a, Q: Query>(&self, query: &'a Q) -> ValueEvents<'a, Q::Snapshot, Q::Error> {
        value_events(query, self.context("value"))
    }

    /// Reads `query` once: one value then the end of the stream, or one error.
    pub fn observe_single<'a, Q: Query>(
        &self,
        query: &'a Q,
    ) -> SingleValue<'a, Q::Snapshot, Q::Error> {
        single_value(query, self.context("single_value"))
    }

    /// Writes `value` now; the returned completion replays the acknowledgement.
    pub fn set_value<R>(&self, reference: &R, value: R::Value) -> Completion<R::Target, R::Error>
    where
        R: Reference,
        R::Target: Clone,
        R::Error: Clone,
    {
        completion::set_value(reference, value, self.context("set_value"))
    }

    /// Applies a partial update now; the returned completion replays the acknowledgement.
    pub fn update_children<R>(
        &self,
        reference: &R,
        update: R::Update,
    ) -> Completion<R::Target, R::Error>
    where
        R: Reference,
        R::Target: Clone,
        R::Error: Clone,
    {
        completion::update_children(reference, update, self.context("update_children"))
    }

    /// Current authentication state followed by every distinct change.
    pub fn observe_auth<'a, S>(&self, source: &'a S) -> AuthStates<'a, S::AuthData, S::Error>
    where
        S: AuthSource,
        S::AuthData: Clone + PartialEq,
    {
        auth::auth_states(source, self.context("auth_state"))
    }

    pub fn auth_anonymously<S>(&self, source: &S) -> Completion<S::AuthData, S::Error>
    where
        S: AuthSource,
        S::AuthData: Clone,
        S::Error: Clone,
    {
        auth::anonymously(source, self.context("auth_anonymously"))
    }

    pub fn auth_with_oauth_token<S>(
        &self,
        source: &S,
        provider: &str,
        token: &str,
    ) -> Completion<S::AuthData, S::Error>
    where
        S: AuthSource,
        S::AuthData: Clone,
        S::Error: Clone,
    {
        auth::with_oauth_token(source, provider, token, self.context("auth_oauth_token"))
    }

    pub fn auth_with_custom_token<S>(
        &self,
        source: &S,
        token: &str,
    ) -> Completion<S::AuthData, S::Error>
    where
        S: AuthSource,
        S::AuthData: Clone,
        S::Error: Clone,
    {
        auth::with_custom_token(source, token, self.context("auth_custom_token"))
    }
}

impl Default for StreamAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`StreamAdapter`].
#[derive(Clone, Debug)]
pub struct StreamAdapterBuilder {
    label: String,
    trace_values: bool,
}

impl StreamAdapterBuilder {
    /// Starts a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Label attached to every log event of streams built by the adapter.
    ///
    /// Defaults to `REALTIME_STREAMS_LABEL` when set, otherwise `realtime`. Blank labels are
    /// ignored.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        if !label.trim().is_empty() {
            self.label = label;
        }
        self
    }

    /// Emits a `trace` event for every forwarded value. Defaults to `false`.
    pub fn trace_values(mut self, enable: bool) -> Self {
        self.trace_values = enable;
        self
    }

    pub fn build(self) -> StreamAdapter {
        StreamAdapter {
            label: Arc::from(self.label),
            trace_values: self.trace_values,
        }
    }
}

impl Default for StreamAdapterBuilder {
    fn default() -> Self {
        Self {
            label: default_label(),
            trace_values: false,
        }
    }
}
