use crate::{
    bridge::{Emitter, SubscriptionBridge},
    context::StreamContext,
    source::{Query, ValueEventListener},
};

/// Every whole-value change of a query until dropped or cancelled by the source.
pub type ValueEvents<'a, S, E> = SubscriptionBridge<'a, S, E>;

struct ValueForwarder<S, E> {
    emitter: Emitter<S, E>,
}

impl<S, E> ValueEventListener<S, E> for ValueForwarder<S, E>
where
    S: Send + 'static,
    E: Send + 'static,
{
    fn on_data_change(&self, snapshot: S) {
        self.emitter.emit(snapshot);
    }

    fn on_cancelled(&self, error: E) {
        self.emitter.fail(error);
    }
}

pub(crate) fn value_events<Q: Query>(
    query: &Q,
    context: StreamContext,
) -> ValueEvents<'_, Q::Snapshot, Q::Error> {
    SubscriptionBridge::with_context(
        context,
        move |emitter| query.add_value_event_listener(Box::new(ValueForwarder { emitter })),
        move |registration| query.remove_listener(registration),
    )
}
