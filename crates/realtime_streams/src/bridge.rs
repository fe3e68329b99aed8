use std::{
    fmt, mem,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

use futures_core::{stream::FusedStream, Stream};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::{context::StreamContext, SourceError};

enum Signal<T, E> {
    Next(T),
    Error(SourceError<E>),
    Complete,
}

/// Push side of a [`SubscriptionBridge`], handed to the registration closure.
///
/// Native callbacks call [`Emitter::emit`] for every delivery and [`Emitter::fail`] when the
/// source cancels the listener. Once the stream has terminated every further call is ignored.
pub struct Emitter<T, E> {
    tx: mpsc::UnboundedSender<Signal<T, E>>,
    terminated: Arc<AtomicBool>,
    context: StreamContext,
}

impl<T, E> Clone for Emitter<T, E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            terminated: Arc::clone(&self.terminated),
            context: self.context.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Emitter<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("stream", &self.context.kind())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

impl<T, E> Emitter<T, E> {
    /// Forwards one value downstream.
    pub fn emit(&self, value: T) {
        if self.is_terminated() {
            debug!(
                label = self.context.label(),
                stream = self.context.kind(),
                "ignoring value emitted after termination"
            );
            return;
        }
        // Send only fails once the consumer dropped the stream.
        let _ = self.tx.send(Signal::Next(value));
    }

    /// Wraps `native` in a [`SourceError`] and terminates the stream with it.
    pub fn fail(&self, native: E) {
        self.terminate_with(Signal::Error(SourceError::new(native)), "error");
    }

    /// Ends the stream without an error.
    pub fn complete(&self) {
        self.terminate_with(Signal::Complete, "complete");
    }

    /// True once [`Emitter::fail`] or [`Emitter::complete`] was called on any clone.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    fn terminate_with(&self, signal: Signal<T, E>, signal_name: &'static str) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            debug!(
                label = self.context.label(),
                stream = self.context.kind(),
                signal = signal_name,
                "ignoring terminal signal after termination"
            );
            return;
        }
        let _ = self.tx.send(signal);
    }
}

/// Handle for one active listener registration.
///
/// Releasing runs the deregistration exactly once; dropping an active subscription releases it.
#[must_use = "dropping a subscription releases the listener immediately"]
pub struct Subscription<'a> {
    release: Option<Box<dyn FnOnce() + Send + 'a>>,
}

impl<'a> Subscription<'a> {
    /// Active subscription that runs `release` when released or dropped.
    pub fn new(release: impl FnOnce() + Send + 'a) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// True until the deregistration has run.
    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }

    /// Runs the deregistration if it has not run yet. Returns whether it ran.
    pub fn release(&mut self) -> bool {
        match self.release.take() {
            Some(release) => {
                release();
                true
            }
            None => false,
        }
    }
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

type Activate<'a, T, E> = Box<dyn FnOnce(Emitter<T, E>) -> Subscription<'a> + Send + 'a>;

enum Lifecycle<'a, T, E> {
    Dormant {
        activate: Activate<'a, T, E>,
        emitter: Emitter<T, E>,
    },
    Active(Subscription<'a>),
    Terminated,
}

/// Stream over a listener registration.
///
/// The listener is registered on first poll. Values arrive in the order the source delivered
/// them. The registration is released exactly once: when the stream terminates on its own
/// (error, completion, or the source dropping every [`Emitter`]) or when the stream is dropped,
/// whichever comes first.
pub struct SubscriptionBridge<'a, T, E> {
    lifecycle: Lifecycle<'a, T, E>,
    rx: mpsc::UnboundedReceiver<Signal<T, E>>,
    context: StreamContext,
    forwarded: u64,
}

// Nothing is ever pinned structurally.
impl<T, E> Unpin for SubscriptionBridge<'_, T, E> {}

impl<'a, T, E> SubscriptionBridge<'a, T, E>
where
    T: Send + 'a,
    E: Send + 'a,
{
    /// Builds a bridge from a `register(emitter) -> token` / `unregister(token)` pair.
    ///
    /// ```rust
    /// use futures_util::StreamExt;
    /// use realtime_streams::SubscriptionBridge;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let mut ticks = SubscriptionBridge::<u32, String>::new(
    ///     |emitter| {
    ///         emitter.emit(1);
    ///         emitter.emit(2);
    ///         emitter.complete();
    ///         "token-1"
    ///     },
    ///     |_token| {},
    /// );
    /// assert_eq!(ticks.next().await, Some(Ok(1)));
    /// assert_eq!(ticks.next().await, Some(Ok(2)));
    /// assert_eq!(ticks.next().await, None);
    /// # }
    /// ```
    pub fn new<R, U, Tok>(register: R, unregister: U) -> Self
    where
        R: FnOnce(Emitter<T, E>) -> Tok + Send + 'a,
        U: FnOnce(Tok) + Send + 'a,
        Tok: Send + 'a,
    {
        Self::with_context(StreamContext::standalone("bridge"), register, unregister)
    }

    /// Builds a bridge whose activation returns a ready-made [`Subscription`].
    pub fn from_subscription<F>(activate: F) -> Self
    where
        F: FnOnce(Emitter<T, E>) -> Subscription<'a> + Send + 'a,
    {
        Self::from_subscription_with_context(StreamContext::standalone("bridge"), activate)
    }

    pub(crate) fn with_context<R, U, Tok>(context: StreamContext, register: R, unregister: U) -> Self
    where
        R: FnOnce(Emitter<T, E>) -> Tok + Send + 'a,
        U: FnOnce(Tok) + Send + 'a,
        Tok: Send + 'a,
    {
        Self::from_subscription_with_context(context, move |emitter| {
            let token = register(emitter);
            Subscription::new(move || unregister(token))
        })
    }

    pub(crate) fn from_subscription_with_context<F>(context: StreamContext, activate: F) -> Self
    where
        F: FnOnce(Emitter<T, E>) -> Subscription<'a> + Send + 'a,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = Emitter {
            tx,
            terminated: Arc::new(AtomicBool::new(false)),
            context: context.clone(),
        };
        Self {
            lifecycle: Lifecycle::Dormant {
                activate: Box::new(activate),
                emitter,
            },
            rx,
            context,
            forwarded: 0,
        }
    }
}

impl<'a, T, E> SubscriptionBridge<'a, T, E> {
    /// True while a listener is registered.
    pub fn is_active(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Active(_))
    }

    fn activate(&mut self) {
        if !matches!(self.lifecycle, Lifecycle::Dormant { .. }) {
            return;
        }
        let Lifecycle::Dormant { activate, emitter } =
            mem::replace(&mut self.lifecycle, Lifecycle::Terminated)
        else {
            return;
        };
        debug!(
            label = self.context.label(),
            stream = self.context.kind(),
            "registering listener"
        );
        self.lifecycle = Lifecycle::Active(activate(emitter));
    }

    fn terminate(&mut self, reason: &'static str) {
        if let Lifecycle::Active(mut subscription) =
            mem::replace(&mut self.lifecycle, Lifecycle::Terminated)
        {
            subscription.release();
        }
        self.rx.close();
        debug!(
            label = self.context.label(),
            stream = self.context.kind(),
            reason,
            forwarded = self.forwarded,
            "stream terminated"
        );
    }
}

impl<T, E> Stream for SubscriptionBridge<'_, T, E> {
    type Item = Result<T, SourceError<E>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.activate();
        if matches!(this.lifecycle, Lifecycle::Terminated) {
            return Poll::Ready(None);
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(Signal::Next(value))) => {
                this.forwarded += 1;
                if this.context.trace_values() {
                    trace!(
                        label = this.context.label(),
                        stream = this.context.kind(),
                        sequence = this.forwarded,
                        "forwarding value"
                    );
                }
                Poll::Ready(Some(Ok(value)))
            }
            Poll::Ready(Some(Signal::Error(err))) => {
                this.terminate("error");
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(Some(Signal::Complete)) => {
                this.terminate("completed");
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                this.terminate("source released listener");
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T, E> FusedStream for SubscriptionBridge<'_, T, E> {
    fn is_terminated(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Terminated)
    }
}

impl<T, E> Drop for SubscriptionBridge<'_, T, E> {
    fn drop(&mut self) {
        if let Lifecycle::Active(subscription) = &mut self.lifecycle {
            debug!(
                label = self.context.label(),
                stream = self.context.kind(),
                forwarded = self.forwarded,
                "stream dropped; releasing listener"
            );
            subscription.release();
        }
    }
}

impl<T, E> fmt::Debug for SubscriptionBridge<'_, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.lifecycle {
            Lifecycle::Dormant { .. } => "dormant",
            Lifecycle::Active(_) => "active",
            Lifecycle::Terminated => "terminated",
        };
        f.debug_struct("SubscriptionBridge")
            .field("label", &self.context.label())
            .field("stream", &self.context.kind())
            .field("state", &state)
            .field("forwarded", &self.forwarded)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures_util::{FutureExt, StreamExt};
    use parking_lot::Mutex;

    use super::*;

    type Slot = Arc<Mutex<Option<Emitter<u32, &'static str>>>>;

    fn bridge_with_slot(
        unregistered: Arc<AtomicUsize>,
    ) -> (SubscriptionBridge<'static, u32, &'static str>, Slot) {
        let slot: Slot = Arc::new(Mutex::new(None));
        let register_slot = Arc::clone(&slot);
        let bridge = SubscriptionBridge::new(
            move |emitter| {
                *register_slot.lock() = Some(emitter);
                7u64
            },
            move |token| {
                assert_eq!(token, 7);
                unregistered.fetch_add(1, Ordering::SeqCst);
            },
        );
        (bridge, slot)
    }

    fn emitter(slot: &Slot) -> Emitter<u32, &'static str> {
        slot.lock().clone().expect("listener registered")
    }

    #[test]
    fn registration_waits_for_first_poll() {
        let registered = Arc::new(AtomicUsize::new(0));
        let unregistered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&registered);
        let release_counter = Arc::clone(&unregistered);
        let bridge = SubscriptionBridge::<u32, &str>::new(
            move |_emitter| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            move |()| {
                release_counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        drop(bridge);

        assert_eq!(registered.load(Ordering::SeqCst), 0);
        assert_eq!(unregistered.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn forwards_values_in_order_and_releases_once_on_drop() {
        let unregistered = Arc::new(AtomicUsize::new(0));
        let (mut bridge, slot) = bridge_with_slot(Arc::clone(&unregistered));

        assert!(bridge.next().now_or_never().is_none());
        assert!(bridge.is_active());

        let emitter = emitter(&slot);
        for value in [3, 1, 2] {
            emitter.emit(value);
        }
        assert_eq!(bridge.next().await, Some(Ok(3)));
        assert_eq!(bridge.next().await, Some(Ok(1)));
        assert_eq!(bridge.next().await, Some(Ok(2)));

        drop(bridge);
        assert_eq!(unregistered.load(Ordering::SeqCst), 1);

        emitter.emit(4);
        assert_eq!(unregistered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_terminates_and_ignores_later_signals() {
        let unregistered = Arc::new(AtomicUsize::new(0));
        let (mut bridge, slot) = bridge_with_slot(Arc::clone(&unregistered));
        assert!(bridge.next().now_or_never().is_none());

        let emitter = emitter(&slot);
        emitter.emit(1);
        emitter.fail("permission denied");
        emitter.emit(2);
        emitter.fail("second failure");
        emitter.complete();

        assert_eq!(bridge.next().await, Some(Ok(1)));
        let err = bridge
            .next()
            .await
            .expect("error item")
            .expect_err("stream failed");
        assert_eq!(*err.native(), "permission denied");
        assert_eq!(unregistered.load(Ordering::SeqCst), 1);

        assert_eq!(bridge.next().await, None);
        assert!(bridge.is_terminated());
        drop(bridge);
        assert_eq!(unregistered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn values_emitted_during_registration_are_delivered() {
        let mut bridge = SubscriptionBridge::<&str, ()>::new(
            |emitter| {
                emitter.emit("initial");
                emitter
            },
            |_emitter| {},
        );

        assert_eq!(bridge.next().await, Some(Ok("initial")));
        assert!(bridge.next().now_or_never().is_none());
    }

    #[tokio::test]
    async fn failure_during_registration_is_the_last_item() {
        let unregistered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&unregistered);
        let bridge = SubscriptionBridge::<u32, &str>::new(
            |emitter| {
                emitter.emit(1);
                emitter.fail("denied");
                emitter.emit(2);
                3u64
            },
            move |token| {
                assert_eq!(token, 3);
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        let items: Vec<_> = bridge.collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Ok(1));
        assert_eq!(*items[1].as_ref().expect_err("failed").native(), "denied");
        assert_eq!(unregistered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn completion_releases_the_listener() {
        let unregistered = Arc::new(AtomicUsize::new(0));
        let (mut bridge, slot) = bridge_with_slot(Arc::clone(&unregistered));
        assert!(bridge.next().now_or_never().is_none());

        let emitter = emitter(&slot);
        emitter.emit(9);
        emitter.complete();

        let items: Vec<_> = bridge.by_ref().collect().await;
        assert_eq!(items, vec![Ok(9)]);
        assert_eq!(unregistered.load(Ordering::SeqCst), 1);
        drop(bridge);
        assert_eq!(unregistered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stream_ends_when_source_drops_every_emitter() {
        let unregistered = Arc::new(AtomicUsize::new(0));
        let (mut bridge, slot) = bridge_with_slot(Arc::clone(&unregistered));
        assert!(bridge.next().now_or_never().is_none());

        emitter(&slot).emit(5);
        slot.lock().take();

        assert_eq!(bridge.next().await, Some(Ok(5)));
        assert_eq!(bridge.next().await, None);
        assert_eq!(unregistered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ready_made_subscription_is_released_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let mut bridge = SubscriptionBridge::<u32, ()>::from_subscription(move |emitter| {
            emitter.emit(1);
            Subscription::new(move || {
                drop(emitter);
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });

        assert_eq!(bridge.next().await, Some(Ok(1)));
        assert!(bridge.next().now_or_never().is_none());
        drop(bridge);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscription_release_runs_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let mut subscription = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(subscription.release());
        assert!(!subscription.release());
        drop(subscription);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
