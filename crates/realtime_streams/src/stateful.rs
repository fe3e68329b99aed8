use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures_core::{stream::FusedStream, Stream};

use crate::{
    bridge::{Emitter, SubscriptionBridge},
    context::StreamContext,
    SourceError,
};

/// Suppresses values equal to the last one delivered. Errors pass through untouched.
#[derive(Debug)]
pub struct DistinctUntilChanged<St, T> {
    inner: St,
    last: Option<T>,
}

// `last` is never pinned.
impl<St: Unpin, T> Unpin for DistinctUntilChanged<St, T> {}

impl<St, T> DistinctUntilChanged<St, T> {
    pub fn new(inner: St) -> Self {
        Self { inner, last: None }
    }

    /// The most recently delivered value.
    pub fn last(&self) -> Option<&T> {
        self.last.as_ref()
    }

    pub fn into_inner(self) -> St {
        self.inner
    }
}

impl<St, T, E> Stream for DistinctUntilChanged<St, T>
where
    St: Stream<Item = Result<T, SourceError<E>>> + Unpin,
    T: Clone + PartialEq,
{
    type Item = St::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(value))) => {
                    if this.last.as_ref() == Some(&value) {
                        continue;
                    }
                    this.last = Some(value.clone());
                    return Poll::Ready(Some(Ok(value)));
                }
                other => return other,
            }
        }
    }
}

impl<St, T, E> FusedStream for DistinctUntilChanged<St, T>
where
    St: FusedStream<Item = Result<T, SourceError<E>>> + Unpin,
    T: Clone + PartialEq,
{
    fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}

/// Current value followed by its changes, consecutive duplicates collapsed.
pub type StatefulStream<'a, T, E> = DistinctUntilChanged<SubscriptionBridge<'a, T, E>, T>;

/// Adapts a "value now + changes later" source.
///
/// On first poll `current` is read and queued ahead of anything the change listener
/// delivers, then `register` installs the listener. A source that replays its current state
/// to new listeners therefore does not produce a duplicate.
pub fn observe_stateful<'a, T, E, C, R, U, Tok>(
    current: C,
    register: R,
    unregister: U,
) -> StatefulStream<'a, T, E>
where
    T: Clone + PartialEq + Send + 'a,
    E: Send + 'a,
    C: FnOnce() -> T + Send + 'a,
    R: FnOnce(Emitter<T, E>) -> Tok + Send + 'a,
    U: FnOnce(Tok) + Send + 'a,
    Tok: Send + 'a,
{
    stateful_with_context(
        StreamContext::standalone("stateful"),
        current,
        register,
        unregister,
    )
}

pub(crate) fn stateful_with_context<'a, T, E, C, R, U, Tok>(
    context: StreamContext,
    current: C,
    register: R,
    unregister: U,
) -> StatefulStream<'a, T, E>
where
    T: Clone + PartialEq + Send + 'a,
    E: Send + 'a,
    C: FnOnce() -> T + Send + 'a,
    R: FnOnce(Emitter<T, E>) -> Tok + Send + 'a,
    U: FnOnce(Tok) + Send + 'a,
    Tok: Send + 'a,
{
    let bridge = SubscriptionBridge::with_context(
        context,
        move |emitter: Emitter<T, E>| {
            emitter.emit(current());
            register(emitter)
        },
        unregister,
    );
    DistinctUntilChanged::new(bridge)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_util::{stream, FutureExt, StreamExt};
    use parking_lot::Mutex;

    use super::*;

    #[tokio::test]
    async fn seed_counts_as_the_previous_value() {
        let slot: Arc<Mutex<Option<Emitter<char, ()>>>> = Arc::new(Mutex::new(None));
        let register_slot = Arc::clone(&slot);
        let mut states = observe_stateful(
            || 'A',
            move |emitter| {
                *register_slot.lock() = Some(emitter);
            },
            |()| {},
        );
        assert_eq!(states.next().await, Some(Ok('A')));

        let emitter = slot.lock().clone().expect("registered");
        for state in ['A', 'A', 'B', 'B', 'A'] {
            emitter.emit(state);
        }
        emitter.complete();

        let rest: Vec<_> = states.by_ref().collect().await;
        assert_eq!(rest, vec![Ok('B'), Ok('A')]);
        assert_eq!(states.last(), Some(&'A'));
    }

    #[tokio::test]
    async fn errors_are_not_deduplicated() {
        let source = stream::iter(vec![
            Ok(1),
            Ok(1),
            Err(SourceError::new("boom")),
            Ok(2),
        ]);
        let items: Vec<_> = DistinctUntilChanged::new(source).collect().await;
        assert_eq!(items, vec![Ok(1), Err(SourceError::new("boom")), Ok(2)]);
    }

    #[tokio::test]
    async fn current_value_is_read_on_activation() {
        let reads = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&reads);
        let mut states = observe_stateful::<_, (), _, _, _, _>(
            move || {
                *counter.lock() += 1;
                "signed-out"
            },
            |emitter| emitter,
            |_emitter| {},
        );
        assert_eq!(*reads.lock(), 0);

        assert_eq!(states.next().now_or_never(), Some(Some(Ok("signed-out"))));
        assert_eq!(*reads.lock(), 1);
    }
}
