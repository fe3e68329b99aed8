use std::{
    fmt,
    future::Future,
    mem,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures_core::{stream::FusedStream, Stream};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{
    context::StreamContext,
    source::{CompletionListener, Reference},
    SourceError,
};

/// `None` when the operation was abandoned without an outcome.
type Resolution<T, E> = Option<Result<T, SourceError<E>>>;

enum Outcome<T, E> {
    Pending(Vec<oneshot::Sender<Resolution<T, E>>>),
    Resolved(T),
    Failed(SourceError<E>),
    Abandoned,
}

impl<T, E> Outcome<T, E> {
    fn name(&self) -> &'static str {
        match self {
            Outcome::Pending(_) => "pending",
            Outcome::Resolved(_) => "resolved",
            Outcome::Failed(_) => "failed",
            Outcome::Abandoned => "abandoned",
        }
    }
}

struct Shared<T, E> {
    outcome: Mutex<Outcome<T, E>>,
    context: StreamContext,
}

impl<T, E> Shared<T, E> {
    fn take_waiters(&self, settled: Outcome<T, E>) -> Option<Vec<oneshot::Sender<Resolution<T, E>>>> {
        let mut outcome = self.outcome.lock();
        let Outcome::Pending(waiters) = &mut *outcome else {
            debug!(
                label = self.context.label(),
                stream = self.context.kind(),
                state = outcome.name(),
                "ignoring outcome reported after the operation settled"
            );
            return None;
        };
        let waiters = mem::take(waiters);
        debug!(
            label = self.context.label(),
            stream = self.context.kind(),
            state = settled.name(),
            observers = waiters.len(),
            "operation settled"
        );
        *outcome = settled;
        Some(waiters)
    }

    fn abandon(&self) {
        warn!(
            label = self.context.label(),
            stream = self.context.kind(),
            "completion callback dropped without reporting an outcome"
        );
        for waiter in self.take_waiters(Outcome::Abandoned).unwrap_or_default() {
            let _ = waiter.send(None);
        }
    }
}

impl<T: Clone, E: Clone> Shared<T, E> {
    fn settle(&self, result: Result<T, SourceError<E>>) {
        let settled = match &result {
            Ok(value) => Outcome::Resolved(value.clone()),
            Err(err) => Outcome::Failed(err.clone()),
        };
        for waiter in self.take_waiters(settled).unwrap_or_default() {
            let _ = waiter.send(Some(result.clone()));
        }
    }
}

/// One-time reporter of an operation's outcome.
///
/// Dropping a sink without reporting marks the operation abandoned: observers see the stream
/// end with no items.
pub struct CompletionSink<T, E> {
    shared: Option<Arc<Shared<T, E>>>,
}

impl<T: Clone, E: Clone> CompletionSink<T, E> {
    pub fn resolve(mut self, result: Result<T, E>) {
        if let Some(shared) = self.shared.take() {
            shared.settle(result.map_err(SourceError::new));
        }
    }

    pub fn succeed(self, value: T) {
        self.resolve(Ok(value));
    }

    pub fn fail(self, native: E) {
        self.resolve(Err(native));
    }
}

impl<T, E> Drop for CompletionSink<T, E> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.abandon();
        }
    }
}

impl<T, E> fmt::Debug for CompletionSink<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSink")
            .field("reported", &self.shared.is_none())
            .finish()
    }
}

enum Observer<T, E> {
    Detached,
    Waiting(oneshot::Receiver<Resolution<T, E>>),
    Finished,
}

/// Stream over an operation that was started eagerly and settles once.
///
/// The outcome is cached, so every observer (see [`Completion::observe`] or `clone`) sees the
/// value followed by the end of the stream, or the error, no matter when it starts polling.
pub struct Completion<T, E> {
    shared: Arc<Shared<T, E>>,
    observer: Observer<T, E>,
}

// Nothing is ever pinned structurally.
impl<T, E> Unpin for Completion<T, E> {}

impl<T: Clone, E: Clone> Completion<T, E> {
    /// Runs `operation` right away and caches whatever it reports through the sink.
    ///
    /// ```rust
    /// use futures_util::StreamExt;
    /// use realtime_streams::Completion;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let write = Completion::<&str, String>::start(|sink| sink.succeed("rooms/1"));
    /// let late: Vec<_> = write.observe().collect().await;
    /// assert_eq!(late, vec![Ok("rooms/1")]);
    /// # }
    /// ```
    pub fn start<F>(operation: F) -> Self
    where
        F: FnOnce(CompletionSink<T, E>),
    {
        Self::start_with_context(StreamContext::standalone("completion"), operation)
    }

    pub(crate) fn start_with_context<F>(context: StreamContext, operation: F) -> Self
    where
        F: FnOnce(CompletionSink<T, E>),
    {
        debug!(
            label = context.label(),
            stream = context.kind(),
            "starting operation"
        );
        let shared = Arc::new(Shared {
            outcome: Mutex::new(Outcome::Pending(Vec::new())),
            context,
        });
        operation(CompletionSink {
            shared: Some(Arc::clone(&shared)),
        });
        Self {
            shared,
            observer: Observer::Detached,
        }
    }

    /// The cached outcome, if the operation resolved or failed.
    pub fn outcome(&self) -> Option<Result<T, SourceError<E>>> {
        match &*self.shared.outcome.lock() {
            Outcome::Resolved(value) => Some(Ok(value.clone())),
            Outcome::Failed(err) => Some(Err(err.clone())),
            Outcome::Pending(_) | Outcome::Abandoned => None,
        }
    }
}

impl<T, E> Completion<T, E> {
    /// A fresh observer of the same operation.
    pub fn observe(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            observer: Observer::Detached,
        }
    }

    /// True once the operation resolved, failed, or was abandoned.
    pub fn is_settled(&self) -> bool {
        !matches!(*self.shared.outcome.lock(), Outcome::Pending(_))
    }
}

impl<T: Clone, E: Clone> Completion<T, E> {
    fn attach(&mut self) -> Option<Resolution<T, E>> {
        let mut outcome = self.shared.outcome.lock();
        match &mut *outcome {
            Outcome::Pending(waiters) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                self.observer = Observer::Waiting(rx);
                None
            }
            Outcome::Resolved(value) => Some(Some(Ok(value.clone()))),
            Outcome::Failed(err) => Some(Some(Err(err.clone()))),
            Outcome::Abandoned => Some(None),
        }
    }
}

impl<T, E> Clone for Completion<T, E> {
    fn clone(&self) -> Self {
        self.observe()
    }
}

impl<T: Clone, E: Clone> Stream for Completion<T, E> {
    type Item = Result<T, SourceError<E>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if matches!(this.observer, Observer::Detached) {
            if let Some(resolution) = this.attach() {
                this.observer = Observer::Finished;
                return Poll::Ready(resolution);
            }
        }

        let Observer::Waiting(rx) = &mut this.observer else {
            return Poll::Ready(None);
        };
        match Pin::new(rx).poll(cx) {
            Poll::Ready(resolution) => {
                this.observer = Observer::Finished;
                Poll::Ready(resolution.unwrap_or(None))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T: Clone, E: Clone> FusedStream for Completion<T, E> {
    fn is_terminated(&self) -> bool {
        matches!(self.observer, Observer::Finished)
    }
}

impl<T, E> fmt::Debug for Completion<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let observer = match self.observer {
            Observer::Detached => "detached",
            Observer::Waiting(_) => "waiting",
            Observer::Finished => "finished",
        };
        f.debug_struct("Completion")
            .field("stream", &self.shared.context.kind())
            .field("state", &self.shared.outcome.lock().name())
            .field("observer", &observer)
            .finish()
    }
}

fn acknowledgement<T, E>(sink: CompletionSink<T, E>) -> CompletionListener<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    Box::new(move |error, target| match error {
        None => sink.succeed(target),
        Some(error) => sink.fail(error),
    })
}

pub(crate) fn set_value<R>(
    reference: &R,
    value: R::Value,
    context: StreamContext,
) -> Completion<R::Target, R::Error>
where
    R: Reference,
    R::Target: Clone,
    R::Error: Clone,
{
    Completion::start_with_context(context, |sink| {
        reference.set_value(value, acknowledgement(sink));
    })
}

pub(crate) fn update_children<R>(
    reference: &R,
    update: R::Update,
    context: StreamContext,
) -> Completion<R::Target, R::Error>
where
    R: Reference,
    R::Target: Clone,
    R::Error: Clone,
{
    Completion::start_with_context(context, |sink| {
        reference.update_children(update, acknowledgement(sink));
    })
}
