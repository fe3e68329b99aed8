//! Callback contracts a realtime data source exposes to the adapter.
//!
//! The adapter only ever talks to a source through these traits. Payloads (`Snapshot`, `Value`,
//! `Target`, `AuthData`) and errors stay opaque: they are routed, never inspected.

/// Receives child mutation events for a query. All callbacks are delivered serialized.
pub trait ChildEventListener<S, E>: Send + Sync + 'static {
    fn on_child_added(&self, snapshot: S, previous_sibling_key: Option<String>);
    fn on_child_changed(&self, snapshot: S, previous_sibling_key: Option<String>);
    fn on_child_removed(&self, snapshot: S);
    fn on_child_moved(&self, snapshot: S, previous_sibling_key: Option<String>);
    /// The source revoked the listener (permission loss, server-side cancel). No further
    /// callbacks follow.
    fn on_cancelled(&self, error: E);
}

/// Receives whole-value changes for a query.
pub trait ValueEventListener<S, E>: Send + Sync + 'static {
    fn on_data_change(&self, snapshot: S);
    fn on_cancelled(&self, error: E);
}

/// Receives authentication state changes. `None` means signed out.
pub trait AuthStateListener<A>: Send + Sync + 'static {
    fn on_auth_state_changed(&self, auth: Option<A>);
}

/// Receives the single outcome of an authentication attempt.
pub trait AuthResultHandler<A, E>: Send + 'static {
    fn on_authenticated(self: Box<Self>, auth: A);
    fn on_authentication_error(self: Box<Self>, error: E);
}

/// Write acknowledgement: `(None, target)` on success, `(Some(error), target)` on failure.
pub type CompletionListener<T, E> = Box<dyn FnOnce(Option<E>, T) + Send + 'static>;

/// A readable location or query of the data source.
pub trait Query: Send + Sync {
    type Snapshot: Send + 'static;
    type Error: Send + 'static;
    /// Token identifying one listener registration.
    type Registration: Send + 'static;

    fn add_child_event_listener(
        &self,
        listener: Box<dyn ChildEventListener<Self::Snapshot, Self::Error>>,
    ) -> Self::Registration;

    fn add_value_event_listener(
        &self,
        listener: Box<dyn ValueEventListener<Self::Snapshot, Self::Error>>,
    ) -> Self::Registration;

    /// Registers a listener that retires itself after its first callback.
    ///
    /// Removing the returned registration after the listener already fired must be a no-op.
    fn add_single_value_event_listener(
        &self,
        listener: Box<dyn ValueEventListener<Self::Snapshot, Self::Error>>,
    ) -> Self::Registration;

    fn remove_listener(&self, registration: Self::Registration);
}

/// A writable location of the data source.
pub trait Reference: Query {
    /// Payload accepted by [`Reference::set_value`].
    type Value: Send + 'static;
    /// Partial payload accepted by [`Reference::update_children`].
    type Update: Send + 'static;
    /// Post-write representation of the target reported with the acknowledgement.
    type Target: Send + 'static;

    fn set_value(
        &self,
        value: Self::Value,
        on_complete: CompletionListener<Self::Target, Self::Error>,
    );

    fn update_children(
        &self,
        update: Self::Update,
        on_complete: CompletionListener<Self::Target, Self::Error>,
    );
}

/// Authentication surface of the data source.
pub trait AuthSource: Send + Sync {
    type AuthData: Send + 'static;
    type Error: Send + 'static;
    type Registration: Send + 'static;

    /// Synchronously readable current state.
    fn current_auth(&self) -> Option<Self::AuthData>;

    fn add_auth_state_listener(
        &self,
        listener: Box<dyn AuthStateListener<Self::AuthData>>,
    ) -> Self::Registration;

    fn remove_auth_state_listener(&self, registration: Self::Registration);

    fn auth_anonymously(&self, handler: Box<dyn AuthResultHandler<Self::AuthData, Self::Error>>);

    /// Exchanges a third-party provider token (`provider` such as `"github"`) for a session.
    fn auth_with_oauth_token(
        &self,
        provider: &str,
        token: &str,
        handler: Box<dyn AuthResultHandler<Self::AuthData, Self::Error>>,
    );

    fn auth_with_custom_token(
        &self,
        token: &str,
        handler: Box<dyn AuthResultHandler<Self::AuthData, Self::Error>>,
    );
}
