use crate::{
    bridge::{Emitter, SubscriptionBridge},
    context::StreamContext,
    source::{Query, ValueEventListener},
};

/// A read-once stream: exactly one value followed by the end of the stream, or one error.
pub type SingleValue<'a, S, E> = SubscriptionBridge<'a, S, E>;

struct SingleForwarder<S, E> {
    emitter: Emitter<S, E>,
}

impl<S, E> ValueEventListener<S, E> for SingleForwarder<S, E>
where
    S: Send + 'static,
    E: Send + 'static,
{
    fn on_data_change(&self, snapshot: S) {
        self.emitter.emit(snapshot);
        self.emitter.complete();
    }

    fn on_cancelled(&self, error: E) {
        self.emitter.fail(error);
    }
}

pub(crate) fn single_value<Q: Query>(
    query: &Q,
    context: StreamContext,
) -> SingleValue<'_, Q::Snapshot, Q::Error> {
    SubscriptionBridge::with_context(
        context,
        move |emitter| {
            query.add_single_value_event_listener(Box::new(SingleForwarder { emitter }))
        },
        move |registration| query.remove_listener(registration),
    )
}

#[cfg(test)]
mod tests {
    use futures_util::{FutureExt, StreamExt};

    use super::*;
    use crate::test_support::{FakeError, FakeQuery};

    fn context() -> StreamContext {
        StreamContext::standalone("single")
    }

    #[tokio::test]
    async fn emits_one_value_then_completes() {
        let query = FakeQuery::new();
        let mut single = single_value(&query, context());
        assert!(single.next().now_or_never().is_none());

        query.deliver_single("snapshot");

        let items: Vec<_> = single.by_ref().collect().await;
        assert_eq!(items, vec![Ok("snapshot".to_string())]);
        assert_eq!(query.removed_registrations(), vec![1]);

        drop(single);
        assert_eq!(query.removed_registrations(), vec![1]);
    }

    #[tokio::test]
    async fn failure_emits_one_error_without_completion_value() {
        let query = FakeQuery::new();
        let mut single = single_value(&query, context());
        assert!(single.next().now_or_never().is_none());

        query.fail_single(FakeError("permission denied"));

        let first = single.next().await.expect("error item");
        assert_eq!(
            first.map_err(|err| err.into_native()),
            Err(FakeError("permission denied"))
        );
        assert_eq!(single.next().await, None);
    }

    #[tokio::test]
    async fn dropping_before_delivery_deregisters() {
        let query = FakeQuery::new();
        let mut single = single_value(&query, context());
        assert!(single.next().now_or_never().is_none());
        assert_eq!(query.single_listener_count(), 1);

        drop(single);

        assert_eq!(query.single_listener_count(), 0);
        assert_eq!(query.removed_registrations(), vec![1]);
        query.deliver_single("nobody listening");
    }
}
