use std::sync::Arc;

use parking_lot::Mutex;

use crate::source::{
    AuthResultHandler, AuthSource, AuthStateListener, ChildEventListener, CompletionListener,
    Query, Reference, ValueEventListener,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("fake source error: {0}")]
pub(crate) struct FakeError(pub(crate) &'static str);

type ChildListener = Arc<dyn ChildEventListener<String, FakeError>>;
type ValueListener = Arc<dyn ValueEventListener<String, FakeError>>;

#[derive(Default)]
struct QueryState {
    next_id: u64,
    children: Vec<(u64, ChildListener)>,
    values: Vec<(u64, ValueListener)>,
    singles: Vec<(u64, ValueListener)>,
    removed: Vec<u64>,
    pending_writes: Vec<CompletionListener<String, FakeError>>,
    writes: Vec<String>,
    fail_on_child_registration: Option<FakeError>,
}

impl QueryState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Query + reference double that records every registration and removal.
#[derive(Default)]
pub(crate) struct FakeQuery {
    state: Mutex<QueryState>,
}

impl FakeQuery {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn child_listeners(&self) -> Vec<ChildListener> {
        let state = self.state.lock();
        state.children.iter().map(|(_, l)| Arc::clone(l)).collect()
    }

    fn value_listeners(&self) -> Vec<ValueListener> {
        let state = self.state.lock();
        state.values.iter().map(|(_, l)| Arc::clone(l)).collect()
    }

    pub(crate) fn child_added(&self, key: &str, previous: Option<&str>) {
        for listener in self.child_listeners() {
            listener.on_child_added(key.to_string(), previous.map(str::to_string));
        }
    }

    pub(crate) fn child_changed(&self, key: &str, previous: Option<&str>) {
        for listener in self.child_listeners() {
            listener.on_child_changed(key.to_string(), previous.map(str::to_string));
        }
    }

    pub(crate) fn child_removed(&self, key: &str) {
        for listener in self.child_listeners() {
            listener.on_child_removed(key.to_string());
        }
    }

    pub(crate) fn child_moved(&self, key: &str, previous: Option<&str>) {
        for listener in self.child_listeners() {
            listener.on_child_moved(key.to_string(), previous.map(str::to_string));
        }
    }

    /// Fires `on_cancelled` but leaves the listeners registered, like a misbehaving source.
    pub(crate) fn fail_child_listeners_keeping_them(&self, error: FakeError) {
        for listener in self.child_listeners() {
            listener.on_cancelled(error);
        }
    }

    /// The next child registration delivers `early`, fails with `error`, then delivers `late`,
    /// all before it returns.
    pub(crate) fn fail_during_child_registration(&self, error: FakeError) {
        self.state.lock().fail_on_child_registration = Some(error);
    }

    pub(crate) fn value_changed(&self, value: &str) {
        for listener in self.value_listeners() {
            listener.on_data_change(value.to_string());
        }
    }

    /// Fires `on_cancelled` on every child and value listener and forgets them.
    pub(crate) fn cancel_all(&self, error: FakeError) {
        let (children, values) = {
            let mut state = self.state.lock();
            (
                std::mem::take(&mut state.children),
                std::mem::take(&mut state.values),
            )
        };
        for (_, listener) in children {
            listener.on_cancelled(error);
        }
        for (_, listener) in values {
            listener.on_cancelled(error);
        }
    }

    pub(crate) fn deliver_single(&self, value: &str) {
        let singles = std::mem::take(&mut self.state.lock().singles);
        for (_, listener) in singles {
            listener.on_data_change(value.to_string());
            // A buggy source firing twice must not produce a second value.
            listener.on_data_change(format!("{value}-again"));
        }
    }

    pub(crate) fn fail_single(&self, error: FakeError) {
        let singles = std::mem::take(&mut self.state.lock().singles);
        for (_, listener) in singles {
            listener.on_cancelled(error);
        }
    }

    pub(crate) fn acknowledge_next_write(&self, outcome: Result<&str, FakeError>) {
        let pending = {
            let mut state = self.state.lock();
            (!state.pending_writes.is_empty()).then(|| state.pending_writes.remove(0))
        };
        let Some(on_complete) = pending else {
            panic!("no pending write to acknowledge");
        };
        match outcome {
            Ok(target) => on_complete(None, target.to_string()),
            Err(error) => on_complete(Some(error), String::new()),
        }
    }

    pub(crate) fn drop_pending_writes(&self) {
        self.state.lock().pending_writes.clear();
    }

    pub(crate) fn writes(&self) -> Vec<String> {
        self.state.lock().writes.clone()
    }

    pub(crate) fn registration_count(&self) -> u64 {
        self.state.lock().next_id
    }

    pub(crate) fn removed_registrations(&self) -> Vec<u64> {
        self.state.lock().removed.clone()
    }

    pub(crate) fn child_listener_count(&self) -> usize {
        self.state.lock().children.len()
    }

    pub(crate) fn value_listener_count(&self) -> usize {
        self.state.lock().values.len()
    }

    pub(crate) fn single_listener_count(&self) -> usize {
        self.state.lock().singles.len()
    }
}

impl Query for FakeQuery {
    type Snapshot = String;
    type Error = FakeError;
    type Registration = u64;

    fn add_child_event_listener(
        &self,
        listener: Box<dyn ChildEventListener<String, FakeError>>,
    ) -> u64 {
        let listener: ChildListener = Arc::from(listener);
        let (id, failure) = {
            let mut state = self.state.lock();
            let id = state.next_id();
            state.children.push((id, Arc::clone(&listener)));
            (id, state.fail_on_child_registration.take())
        };
        if let Some(error) = failure {
            listener.on_child_added("early".to_string(), None);
            listener.on_cancelled(error);
            listener.on_child_added("late".to_string(), Some("early".to_string()));
        }
        id
    }

    fn add_value_event_listener(
        &self,
        listener: Box<dyn ValueEventListener<String, FakeError>>,
    ) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_id();
        state.values.push((id, Arc::from(listener)));
        id
    }

    fn add_single_value_event_listener(
        &self,
        listener: Box<dyn ValueEventListener<String, FakeError>>,
    ) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_id();
        state.singles.push((id, Arc::from(listener)));
        id
    }

    fn remove_listener(&self, registration: u64) {
        let mut state = self.state.lock();
        state.removed.push(registration);
        state.children.retain(|(id, _)| *id != registration);
        state.values.retain(|(id, _)| *id != registration);
        state.singles.retain(|(id, _)| *id != registration);
    }
}

impl Reference for FakeQuery {
    type Value = String;
    type Update = Vec<(String, String)>;
    type Target = String;

    fn set_value(&self, value: String, on_complete: CompletionListener<String, FakeError>) {
        let mut state = self.state.lock();
        state.writes.push(value);
        state.pending_writes.push(on_complete);
    }

    fn update_children(
        &self,
        update: Vec<(String, String)>,
        on_complete: CompletionListener<String, FakeError>,
    ) {
        let mut state = self.state.lock();
        state.writes.extend(
            update
                .into_iter()
                .map(|(key, value)| format!("{key}={value}")),
        );
        state.pending_writes.push(on_complete);
    }
}

type AuthListener = Arc<dyn AuthStateListener<String>>;

#[derive(Default)]
struct AuthState {
    next_id: u64,
    current: Option<String>,
    listeners: Vec<(u64, AuthListener)>,
    removed: Vec<u64>,
    pending: Vec<(String, Box<dyn AuthResultHandler<String, FakeError>>)>,
}

/// Auth double that, like real sources, replays the current state to new listeners.
#[derive(Default)]
pub(crate) struct FakeAuth {
    state: Mutex<AuthState>,
}

impl FakeAuth {
    pub(crate) fn signed_in(uid: &str) -> Self {
        let auth = Self::default();
        auth.state.lock().current = Some(uid.to_string());
        auth
    }

    pub(crate) fn change(&self, auth: Option<&str>) {
        let listeners: Vec<AuthListener> = {
            let mut state = self.state.lock();
            state.current = auth.map(str::to_string);
            state.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in listeners {
            listener.on_auth_state_changed(auth.map(str::to_string));
        }
    }

    pub(crate) fn pending_methods(&self) -> Vec<String> {
        let state = self.state.lock();
        state.pending.iter().map(|(method, _)| method.clone()).collect()
    }

    pub(crate) fn resolve_next(&self, outcome: Result<&str, FakeError>) {
        let pending = {
            let mut state = self.state.lock();
            (!state.pending.is_empty()).then(|| state.pending.remove(0))
        };
        let Some((_, handler)) = pending else {
            panic!("no pending auth attempt");
        };
        match outcome {
            Ok(uid) => handler.on_authenticated(uid.to_string()),
            Err(error) => handler.on_authentication_error(error),
        }
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    pub(crate) fn removed_registrations(&self) -> Vec<u64> {
        self.state.lock().removed.clone()
    }
}

impl AuthSource for FakeAuth {
    type AuthData = String;
    type Error = FakeError;
    type Registration = u64;

    fn current_auth(&self) -> Option<String> {
        self.state.lock().current.clone()
    }

    fn add_auth_state_listener(&self, listener: Box<dyn AuthStateListener<String>>) -> u64 {
        let listener: AuthListener = Arc::from(listener);
        let (id, current) = {
            let mut state = self.state.lock();
            state.next_id += 1;
            let id = state.next_id;
            state.listeners.push((id, Arc::clone(&listener)));
            (id, state.current.clone())
        };
        listener.on_auth_state_changed(current);
        id
    }

    fn remove_auth_state_listener(&self, registration: u64) {
        let mut state = self.state.lock();
        state.removed.push(registration);
        state.listeners.retain(|(id, _)| *id != registration);
    }

    fn auth_anonymously(&self, handler: Box<dyn AuthResultHandler<String, FakeError>>) {
        self.state
            .lock()
            .pending
            .push(("anonymous".to_string(), handler));
    }

    fn auth_with_oauth_token(
        &self,
        provider: &str,
        _token: &str,
        handler: Box<dyn AuthResultHandler<String, FakeError>>,
    ) {
        self.state
            .lock()
            .pending
            .push((format!("oauth:{provider}"), handler));
    }

    fn auth_with_custom_token(
        &self,
        _token: &str,
        handler: Box<dyn AuthResultHandler<String, FakeError>>,
    ) {
        self.state
            .lock()
            .pending
            .push(("custom".to_string(), handler));
    }
}
