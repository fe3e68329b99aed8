use crate::{
    bridge::Emitter,
    completion::{Completion, CompletionSink},
    context::StreamContext,
    source::{AuthResultHandler, AuthSource, AuthStateListener},
    stateful::{stateful_with_context, StatefulStream},
};

/// Authentication state (`None` when signed out) followed by every distinct change.
pub type AuthStates<'a, A, E> = StatefulStream<'a, Option<A>, E>;

struct AuthStateForwarder<A, E> {
    emitter: Emitter<Option<A>, E>,
}

impl<A, E> AuthStateListener<A> for AuthStateForwarder<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    fn on_auth_state_changed(&self, auth: Option<A>) {
        self.emitter.emit(auth);
    }
}

struct AuthAttempt<A, E> {
    sink: CompletionSink<A, E>,
}

impl<A, E> AuthResultHandler<A, E> for AuthAttempt<A, E>
where
    A: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn on_authenticated(self: Box<Self>, auth: A) {
        self.sink.succeed(auth);
    }

    fn on_authentication_error(self: Box<Self>, error: E) {
        self.sink.fail(error);
    }
}

fn attempt<A, E>(sink: CompletionSink<A, E>) -> Box<dyn AuthResultHandler<A, E>>
where
    A: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    Box::new(AuthAttempt { sink })
}

pub(crate) fn auth_states<S>(
    source: &S,
    context: StreamContext,
) -> AuthStates<'_, S::AuthData, S::Error>
where
    S: AuthSource,
    S::AuthData: Clone + PartialEq,
{
    stateful_with_context(
        context,
        move || source.current_auth(),
        move |emitter| source.add_auth_state_listener(Box::new(AuthStateForwarder { emitter })),
        move |registration| source.remove_auth_state_listener(registration),
    )
}

pub(crate) fn anonymously<S>(source: &S, context: StreamContext) -> Completion<S::AuthData, S::Error>
where
    S: AuthSource,
    S::AuthData: Clone,
    S::Error: Clone,
{
    Completion::start_with_context(context, |sink| source.auth_anonymously(attempt(sink)))
}

pub(crate) fn with_oauth_token<S>(
    source: &S,
    provider: &str,
    token: &str,
    context: StreamContext,
) -> Completion<S::AuthData, S::Error>
where
    S: AuthSource,
    S::AuthData: Clone,
    S::Error: Clone,
{
    Completion::start_with_context(context, |sink| {
        source.auth_with_oauth_token(provider, token, attempt(sink));
    })
}

pub(crate) fn with_custom_token<S>(
    source: &S,
    token: &str,
    context: StreamContext,
) -> Completion<S::AuthData, S::Error>
where
    S: AuthSource,
    S::AuthData: Clone,
    S::Error: Clone,
{
    Completion::start_with_context(context, |sink| {
        source.auth_with_custom_token(token, attempt(sink));
    })
}
