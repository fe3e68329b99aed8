use std::{
    cell::Cell,
    collections::{BTreeMap, VecDeque},
    fmt,
    sync::Arc,
};

use parking_lot::{Mutex, ReentrantMutex};
use realtime_streams::source::{
    ChildEventListener, CompletionListener, Query, Reference, ValueEventListener,
};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::{
    auth::{AuthState, PendingAuth},
    error::{MemoryError, MemoryErrorCode},
    snapshot::DataSnapshot,
    tree,
};

/// Callback invocation prepared under the state lock and run after it is released.
pub(crate) type Delivery = Box<dyn FnOnce() + Send>;

type ChildListener = Arc<dyn ChildEventListener<DataSnapshot, MemoryError>>;
type ValueListener = Arc<dyn ValueEventListener<DataSnapshot, MemoryError>>;

/// Identifies one listener registration on a [`MemoryDatabase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

/// Work held back while the database is offline, flushed in request order.
pub(crate) enum Deferred {
    Write {
        path: Vec<String>,
        on_complete: CompletionListener<MemoryRef, MemoryError>,
        error: Option<MemoryError>,
    },
    Auth(PendingAuth),
    /// Single read still present in `pending_singles`; skipped if removed meanwhile.
    Single(ListenerId),
}

pub(crate) struct State {
    root: Value,
    next_id: u64,
    children: BTreeMap<ListenerId, (Vec<String>, ChildListener)>,
    values: BTreeMap<ListenerId, (Vec<String>, ValueListener)>,
    pending_singles: BTreeMap<ListenerId, (Vec<String>, ValueListener)>,
    failing_write: Option<MemoryError>,
    pub(crate) online: bool,
    pub(crate) deferred: Vec<Deferred>,
    pub(crate) auth: AuthState,
}

impl State {
    fn new(root: Value) -> Self {
        Self {
            root,
            next_id: 0,
            children: BTreeMap::new(),
            values: BTreeMap::new(),
            pending_singles: BTreeMap::new(),
            failing_write: None,
            online: true,
            deferred: Vec::new(),
            auth: AuthState::default(),
        }
    }

    pub(crate) fn next_id(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }

    /// Events for every listener whose location differs between `before` and the current tree.
    fn changes_since(&self, before: &Value) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        for (path, listener) in self.children.values() {
            let old = tree::read(before, path);
            let new = tree::read(&self.root, path);
            if old != new {
                deliveries.extend(
                    child_changes(&old, &new)
                        .into_iter()
                        .map(|change| change.delivery(listener)),
                );
            }
        }
        for (path, listener) in self.values.values() {
            let new = tree::read(&self.root, path);
            if tree::read(before, path) != new {
                let listener = Arc::clone(listener);
                let snapshot = DataSnapshot::at(path, new);
                deliveries.push(Box::new(move || listener.on_data_change(snapshot)));
            }
        }
        deliveries
    }

    fn listener_count(&self) -> usize {
        self.children.len()
            + self.values.len()
            + self.pending_singles.len()
            + self.auth.listeners.len()
    }
}

enum ChildChange {
    Added(DataSnapshot, Option<String>),
    Changed(DataSnapshot, Option<String>),
    Removed(DataSnapshot),
}

impl ChildChange {
    fn delivery(self, listener: &ChildListener) -> Delivery {
        let listener = Arc::clone(listener);
        Box::new(move || match self {
            Self::Added(snapshot, previous) => listener.on_child_added(snapshot, previous),
            Self::Changed(snapshot, previous) => listener.on_child_changed(snapshot, previous),
            Self::Removed(snapshot) => listener.on_child_removed(snapshot),
        })
    }
}

/// Removals first, then additions and changes in key order.
fn child_changes(old: &Value, new: &Value) -> Vec<ChildChange> {
    let before = tree::children(old);
    let after = tree::children(new);
    let mut changes = Vec::new();
    for (key, value) in &before {
        if !after.contains_key(key) {
            changes.push(ChildChange::Removed(child_snapshot(key, value)));
        }
    }
    let mut previous: Option<&str> = None;
    for (key, value) in &after {
        let previous_key = previous.map(str::to_string);
        match before.get(key) {
            None => changes.push(ChildChange::Added(child_snapshot(key, value), previous_key)),
            Some(old) if old != value => {
                changes.push(ChildChange::Changed(child_snapshot(key, value), previous_key))
            }
            Some(_) => {}
        }
        previous = Some(*key);
    }
    changes
}

fn child_snapshot(key: &str, value: &Value) -> DataSnapshot {
    DataSnapshot::new(Some(key.to_string()), value.clone())
}

struct Inner {
    state: Mutex<State>,
    // Deliveries not yet run, oldest first.
    queue: Mutex<VecDeque<Delivery>>,
    // Serializes callback delivery; reentrant so listeners may call back into the database.
    // The flag is set while the outermost dispatch drains the queue.
    delivery: ReentrantMutex<Cell<bool>>,
}

/// In-process realtime database holding a JSON tree.
///
/// Listener callbacks run synchronously on the thread that caused them, never while internal
/// locks are held, and in the order the mutations happened. Connectivity and failures can be
/// simulated with [`MemoryDatabase::go_offline`], [`MemoryDatabase::cancel_listeners`] and
/// [`MemoryDatabase::fail_next_write`].
#[derive(Clone)]
pub struct MemoryDatabase {
    inner: Arc<Inner>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::with_value(Value::Null)
    }

    /// Database seeded with `value` at the root.
    pub fn with_value(value: Value) -> Self {
        let mut root = Value::Null;
        tree::write(&mut root, &[], value);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::new(root)),
                queue: Mutex::new(VecDeque::new()),
                delivery: ReentrantMutex::new(Cell::new(false)),
            }),
        }
    }

    pub fn root(&self) -> MemoryRef {
        self.at(Vec::new())
    }

    /// Reference to a `/`-separated location. Empty segments are ignored.
    pub fn reference(&self, path: &str) -> MemoryRef {
        self.at(tree::split_path(path))
    }

    fn at(&self, path: Vec<String>) -> MemoryRef {
        MemoryRef {
            db: self.clone(),
            path,
        }
    }

    pub fn value_at(&self, path: &str) -> Value {
        tree::read(&self.inner.state.lock().root, &tree::split_path(path))
    }

    pub fn is_online(&self) -> bool {
        self.inner.state.lock().online
    }

    /// Holds back single-value reads and write/auth acknowledgements. Writes still apply
    /// locally and notify listeners.
    pub fn go_offline(&self) {
        let mut state = self.inner.state.lock();
        if state.online {
            state.online = false;
            debug!("memory database offline");
        }
    }

    /// Flushes everything held back while offline, in the order it was requested.
    pub fn go_online(&self) {
        self.dispatch(|state| {
            if state.online {
                return ((), Vec::new());
            }
            state.online = true;
            let deferred = std::mem::take(&mut state.deferred);
            debug!(deferred = deferred.len(), "memory database online");

            let mut deliveries: Vec<Delivery> = Vec::new();
            for entry in deferred {
                match entry {
                    Deferred::Write {
                        path,
                        on_complete,
                        error,
                    } => deliveries.extend(self.settle_write(state, path, on_complete, error)),
                    Deferred::Auth(attempt) => deliveries.extend(state.attempt_auth(attempt)),
                    Deferred::Single(id) => {
                        if let Some((path, listener)) = state.pending_singles.remove(&id) {
                            let snapshot = DataSnapshot::at(&path, tree::read(&state.root, &path));
                            deliveries.push(Box::new(move || listener.on_data_change(snapshot)));
                        }
                    }
                }
            }
            ((), deliveries)
        });
    }

    /// Revokes every child, value and pending single-value listener at or below `path`.
    ///
    /// Each revoked listener receives `on_cancelled(error)` and is forgotten. Returns how many
    /// listeners were revoked.
    pub fn cancel_listeners(&self, path: &str, error: MemoryError) -> usize {
        let scope = tree::split_path(path);
        self.dispatch(|state| {
            let mut deliveries: Vec<Delivery> = Vec::new();
            let children = drain_within(&mut state.children, &scope);
            for (_, listener) in children {
                let error = error.clone();
                deliveries.push(Box::new(move || listener.on_cancelled(error)));
            }
            let mut values = drain_within(&mut state.values, &scope);
            values.extend(drain_within(&mut state.pending_singles, &scope));
            for (_, listener) in values {
                let error = error.clone();
                deliveries.push(Box::new(move || listener.on_cancelled(error)));
            }
            debug!(
                path = %tree::display_path(&scope),
                revoked = deliveries.len(),
                code = %error.code(),
                "listeners cancelled"
            );
            (deliveries.len(), deliveries)
        })
    }

    /// Rejects the next `set_value`/`update_children` with `error` without applying it.
    pub fn fail_next_write(&self, error: MemoryError) {
        self.inner.state.lock().failing_write = Some(error);
    }

    /// Fails every write acknowledgement held back while offline with
    /// [`MemoryErrorCode::WriteCanceled`]. Returns how many were canceled.
    pub fn purge_outstanding_writes(&self) -> usize {
        self.dispatch(|state| {
            let (writes, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.deferred)
                .into_iter()
                .partition(|entry| matches!(entry, Deferred::Write { .. }));
            state.deferred = kept;

            let mut deliveries: Vec<Delivery> = Vec::new();
            for entry in writes {
                if let Deferred::Write {
                    path, on_complete, ..
                } = entry
                {
                    let target = self.at(path);
                    let error =
                        MemoryError::new(MemoryErrorCode::WriteCanceled, "write was purged");
                    deliveries.push(Box::new(move || on_complete(Some(error), target)));
                }
            }
            debug!(canceled = deliveries.len(), "outstanding writes purged");
            (deliveries.len(), deliveries)
        })
    }

    /// Registered listeners of every kind, auth state listeners included.
    pub fn listener_count(&self) -> usize {
        self.inner.state.lock().listener_count()
    }

    /// Runs `update` under the state lock, then the deliveries it produced with the lock
    /// released.
    ///
    /// A dispatch from inside a listener callback only queues its deliveries; the outermost
    /// dispatch runs them after everything queued before, so listeners see mutations in order.
    pub(crate) fn dispatch<R>(&self, update: impl FnOnce(&mut State) -> (R, Vec<Delivery>)) -> R {
        let draining = self.inner.delivery.lock();
        let (result, deliveries) = update(&mut *self.inner.state.lock());
        self.inner.queue.lock().extend(deliveries);
        if draining.replace(true) {
            return result;
        }
        let _reset = DrainGuard(&draining);
        loop {
            let next = self.inner.queue.lock().pop_front();
            match next {
                Some(deliver) => deliver(),
                None => break,
            }
        }
        result
    }

    pub(crate) fn remove(&self, id: ListenerId) {
        let mut state = self.inner.state.lock();
        let removed = state.children.remove(&id).is_some()
            || state.values.remove(&id).is_some()
            || state.pending_singles.remove(&id).is_some()
            || state.auth.listeners.remove(&id).is_some();
        if removed {
            debug!(id = id.0, "listener removed");
        } else {
            trace!(id = id.0, "listener already gone");
        }
    }

    fn settle_write(
        &self,
        state: &mut State,
        path: Vec<String>,
        on_complete: CompletionListener<MemoryRef, MemoryError>,
        error: Option<MemoryError>,
    ) -> Option<Delivery> {
        if !state.online {
            trace!(path = %tree::display_path(&path), "write acknowledgement deferred");
            state.deferred.push(Deferred::Write {
                path,
                on_complete,
                error,
            });
            return None;
        }
        let target = self.at(path);
        Some(Box::new(move || on_complete(error, target)))
    }

    fn write(
        &self,
        target: &[String],
        edits: Vec<(Vec<String>, Value)>,
        on_complete: CompletionListener<MemoryRef, MemoryError>,
    ) {
        self.dispatch(|state| {
            let mut deliveries = Vec::new();
            let error = match state.failing_write.take() {
                Some(error) => {
                    debug!(path = %tree::display_path(target), code = %error.code(), "write rejected");
                    Some(error)
                }
                None => {
                    let before = state.root.clone();
                    for (path, value) in edits {
                        tree::write(&mut state.root, &path, value);
                    }
                    deliveries = state.changes_since(&before);
                    trace!(
                        path = %tree::display_path(target),
                        events = deliveries.len(),
                        "write applied"
                    );
                    None
                }
            };
            deliveries.extend(self.settle_write(state, target.to_vec(), on_complete, error));
            ((), deliveries)
        });
    }

    fn reject_write(
        &self,
        target: &[String],
        on_complete: CompletionListener<MemoryRef, MemoryError>,
        error: MemoryError,
    ) {
        self.dispatch(|state| {
            let deliveries = self
                .settle_write(state, target.to_vec(), on_complete, Some(error))
                .into_iter()
                .collect();
            ((), deliveries)
        });
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("MemoryDatabase")
            .field("online", &state.online)
            .field("listeners", &state.listener_count())
            .field("deferred", &state.deferred.len())
            .finish()
    }
}

struct DrainGuard<'a>(&'a Cell<bool>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

fn drain_within<L>(
    listeners: &mut BTreeMap<ListenerId, (Vec<String>, L)>,
    scope: &[String],
) -> Vec<(Vec<String>, L)> {
    let ids: Vec<ListenerId> = listeners
        .iter()
        .filter(|(_, (path, _))| tree::is_within(path, scope))
        .map(|(id, _)| *id)
        .collect();
    ids.into_iter()
        .filter_map(|id| listeners.remove(&id))
        .collect()
}

/// A location in a [`MemoryDatabase`]. Cheap to clone.
#[derive(Clone)]
pub struct MemoryRef {
    db: MemoryDatabase,
    path: Vec<String>,
}

impl MemoryRef {
    /// Last path segment; `None` for the root.
    pub fn key(&self) -> Option<&str> {
        self.path.last().map(String::as_str)
    }

    pub fn path(&self) -> String {
        tree::display_path(&self.path)
    }

    pub fn child(&self, path: &str) -> Self {
        let mut child = self.path.clone();
        child.extend(tree::split_path(path));
        self.db.at(child)
    }

    pub fn parent(&self) -> Option<Self> {
        let (_, parent) = self.path.split_last()?;
        Some(self.db.at(parent.to_vec()))
    }

    pub fn database(&self) -> &MemoryDatabase {
        &self.db
    }

    /// Current value at this location.
    pub fn value(&self) -> Value {
        tree::read(&self.db.inner.state.lock().root, &self.path)
    }
}

impl PartialEq for MemoryRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.db.inner, &other.db.inner) && self.path == other.path
    }
}

impl Eq for MemoryRef {}

impl fmt::Debug for MemoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MemoryRef").field(&self.path()).finish()
    }
}

impl Query for MemoryRef {
    type Snapshot = DataSnapshot;
    type Error = MemoryError;
    type Registration = ListenerId;

    /// Existing children are reported as added right away.
    fn add_child_event_listener(
        &self,
        listener: Box<dyn ChildEventListener<DataSnapshot, MemoryError>>,
    ) -> ListenerId {
        let listener: ChildListener = Arc::from(listener);
        self.db.dispatch(|state| {
            let id = state.next_id();
            state
                .children
                .insert(id, (self.path.clone(), Arc::clone(&listener)));
            let current = tree::read(&state.root, &self.path);
            let deliveries: Vec<Delivery> = child_changes(&Value::Null, &current)
                .into_iter()
                .map(|change| change.delivery(&listener))
                .collect();
            debug!(path = %self.path(), id = id.0, existing = deliveries.len(), "child listener added");
            (id, deliveries)
        })
    }

    /// The current value is reported right away, even when nothing is stored.
    fn add_value_event_listener(
        &self,
        listener: Box<dyn ValueEventListener<DataSnapshot, MemoryError>>,
    ) -> ListenerId {
        let listener: ValueListener = Arc::from(listener);
        self.db.dispatch(|state| {
            let id = state.next_id();
            state
                .values
                .insert(id, (self.path.clone(), Arc::clone(&listener)));
            let snapshot = DataSnapshot::at(&self.path, tree::read(&state.root, &self.path));
            debug!(path = %self.path(), id = id.0, "value listener added");
            let delivery: Delivery = Box::new(move || listener.on_data_change(snapshot));
            (id, vec![delivery])
        })
    }

    fn add_single_value_event_listener(
        &self,
        listener: Box<dyn ValueEventListener<DataSnapshot, MemoryError>>,
    ) -> ListenerId {
        let listener: ValueListener = Arc::from(listener);
        self.db.dispatch(|state| {
            let id = state.next_id();
            if !state.online {
                trace!(path = %self.path(), id = id.0, "single read deferred");
                state.pending_singles.insert(id, (self.path.clone(), listener));
                state.deferred.push(Deferred::Single(id));
                return (id, Vec::new());
            }
            let snapshot = DataSnapshot::at(&self.path, tree::read(&state.root, &self.path));
            let delivery: Delivery = Box::new(move || listener.on_data_change(snapshot));
            (id, vec![delivery])
        })
    }

    fn remove_listener(&self, registration: ListenerId) {
        self.db.remove(registration);
    }
}

impl Reference for MemoryRef {
    type Value = Value;
    /// Keys are paths relative to this reference and may contain `/`.
    type Update = Map<String, Value>;
    type Target = MemoryRef;

    fn set_value(&self, value: Value, on_complete: CompletionListener<MemoryRef, MemoryError>) {
        self.db
            .write(&self.path, vec![(self.path.clone(), value)], on_complete);
    }

    fn update_children(
        &self,
        update: Map<String, Value>,
        on_complete: CompletionListener<MemoryRef, MemoryError>,
    ) {
        let mut edits = Vec::with_capacity(update.len());
        for (key, value) in update {
            let relative = tree::split_path(&key);
            if relative.is_empty() {
                let error = MemoryError::new(
                    MemoryErrorCode::OperationFailed,
                    format!("invalid update key {key:?}"),
                );
                self.db.reject_write(&self.path, on_complete, error);
                return;
            }
            let mut path = self.path.clone();
            path.extend(relative);
            edits.push((path, value));
        }
        self.db.write(&self.path, edits, on_complete);
    }
}
