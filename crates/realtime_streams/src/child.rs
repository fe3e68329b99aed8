use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures_core::{stream::FusedStream, Stream};
use serde::{Deserialize, Serialize};

use crate::{
    bridge::{Emitter, SubscriptionBridge},
    context::StreamContext,
    source::{ChildEventListener, Query},
    SourceError,
};

/// Kind of child mutation carried by a [`ChildEvent`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildEventKind {
    Added,
    Changed,
    Removed,
    Moved,
}

/// Envelope for one child mutation.
///
/// `previous_sibling_key` is the key of the child ordered immediately before this one, or
/// `None` when the child is first. `Removed` events never carry one.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildEvent<S> {
    snapshot: S,
    kind: ChildEventKind,
    previous_sibling_key: Option<String>,
}

impl<S> ChildEvent<S> {
    pub fn added(snapshot: S, previous_sibling_key: Option<String>) -> Self {
        Self::new(snapshot, ChildEventKind::Added, previous_sibling_key)
    }

    pub fn changed(snapshot: S, previous_sibling_key: Option<String>) -> Self {
        Self::new(snapshot, ChildEventKind::Changed, previous_sibling_key)
    }

    pub fn removed(snapshot: S) -> Self {
        Self::new(snapshot, ChildEventKind::Removed, None)
    }

    pub fn moved(snapshot: S, previous_sibling_key: Option<String>) -> Self {
        Self::new(snapshot, ChildEventKind::Moved, previous_sibling_key)
    }

    fn new(snapshot: S, kind: ChildEventKind, previous_sibling_key: Option<String>) -> Self {
        Self {
            snapshot,
            kind,
            previous_sibling_key,
        }
    }

    pub fn snapshot(&self) -> &S {
        &self.snapshot
    }

    pub fn kind(&self) -> ChildEventKind {
        self.kind
    }

    pub fn previous_sibling_key(&self) -> Option<&str> {
        self.previous_sibling_key.as_deref()
    }

    pub fn into_snapshot(self) -> S {
        self.snapshot
    }
}

struct Classifier<S, E> {
    emitter: Emitter<ChildEvent<S>, E>,
}

impl<S, E> ChildEventListener<S, E> for Classifier<S, E>
where
    S: Send + 'static,
    E: Send + 'static,
{
    fn on_child_added(&self, snapshot: S, previous_sibling_key: Option<String>) {
        self.emitter
            .emit(ChildEvent::added(snapshot, previous_sibling_key));
    }

    fn on_child_changed(&self, snapshot: S, previous_sibling_key: Option<String>) {
        self.emitter
            .emit(ChildEvent::changed(snapshot, previous_sibling_key));
    }

    fn on_child_removed(&self, snapshot: S) {
        self.emitter.emit(ChildEvent::removed(snapshot));
    }

    fn on_child_moved(&self, snapshot: S, previous_sibling_key: Option<String>) {
        self.emitter
            .emit(ChildEvent::moved(snapshot, previous_sibling_key));
    }

    fn on_cancelled(&self, error: E) {
        self.emitter.fail(error);
    }
}

/// Classified child events of one query, backed by a single listener registration.
///
/// The `only_*` adapters filter this same registration; they do not open new ones.
#[derive(Debug)]
pub struct ChildEvents<'a, S, E> {
    inner: SubscriptionBridge<'a, ChildEvent<S>, E>,
}

impl<'a, S, E> ChildEvents<'a, S, E> {
    pub(crate) fn register<Q>(query: &'a Q, context: StreamContext) -> Self
    where
        Q: Query<Snapshot = S, Error = E>,
        S: Send + 'static,
        E: Send + 'static,
    {
        let inner = SubscriptionBridge::with_context(
            context,
            move |emitter| query.add_child_event_listener(Box::new(Classifier { emitter })),
            move |registration| query.remove_listener(registration),
        );
        Self { inner }
    }

    /// True while the underlying listener is registered.
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    pub fn only(self, kind: ChildEventKind) -> OnlyKind<Self> {
        OnlyKind::new(self, kind)
    }

    pub fn only_added(self) -> OnlyKind<Self> {
        self.only(ChildEventKind::Added)
    }

    pub fn only_changed(self) -> OnlyKind<Self> {
        self.only(ChildEventKind::Changed)
    }

    pub fn only_removed(self) -> OnlyKind<Self> {
        self.only(ChildEventKind::Removed)
    }

    pub fn only_moved(self) -> OnlyKind<Self> {
        self.only(ChildEventKind::Moved)
    }
}

impl<S, E> Stream for ChildEvents<'_, S, E> {
    type Item = Result<ChildEvent<S>, SourceError<E>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

impl<S, E> FusedStream for ChildEvents<'_, S, E> {
    fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}

/// Passes through events of one [`ChildEventKind`] plus any error.
#[derive(Debug)]
pub struct OnlyKind<St> {
    inner: St,
    kind: ChildEventKind,
}

impl<St> OnlyKind<St> {
    fn new(inner: St, kind: ChildEventKind) -> Self {
        Self { inner, kind }
    }

    pub fn kind(&self) -> ChildEventKind {
        self.kind
    }

    pub fn into_inner(self) -> St {
        self.inner
    }
}

impl<St, S, E> Stream for OnlyKind<St>
where
    St: Stream<Item = Result<ChildEvent<S>, SourceError<E>>> + Unpin,
{
    type Item = St::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) if event.kind() != this.kind => continue,
                other => return other,
            }
        }
    }
}

impl<St, S, E> FusedStream for OnlyKind<St>
where
    St: FusedStream<Item = Result<ChildEvent<S>, SourceError<E>>> + Unpin,
{
    fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}
