use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use realtime_streams::source::{AuthResultHandler, AuthSource, AuthStateListener};
use serde::Serialize;
use tracing::debug;

use crate::{
    database::{Deferred, Delivery, ListenerId, MemoryDatabase, State},
    error::{MemoryError, MemoryErrorCode},
};

/// Identity of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AuthData {
    uid: String,
    provider: String,
}

impl AuthData {
    pub fn new(uid: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            provider: provider.into(),
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }
}

type AuthListener = Arc<dyn AuthStateListener<AuthData>>;
type ResultHandler = Box<dyn AuthResultHandler<AuthData, MemoryError>>;

pub(crate) enum AuthMethod {
    Anonymous,
    OAuth { provider: String, token: String },
    Custom { token: String },
}

impl AuthMethod {
    fn name(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::OAuth { .. } => "oauth",
            Self::Custom { .. } => "custom",
        }
    }
}

pub(crate) struct PendingAuth {
    method: AuthMethod,
    handler: ResultHandler,
}

#[derive(Default)]
pub(crate) struct AuthState {
    current: Option<AuthData>,
    pub(crate) listeners: BTreeMap<ListenerId, AuthListener>,
    anonymous_sessions: u64,
    oauth_identities: HashMap<(String, String), String>,
    custom_tokens: HashMap<String, String>,
    revoked_tokens: HashSet<String>,
}

fn invalid_token(message: impl Into<String>) -> MemoryError {
    MemoryError::new(MemoryErrorCode::InvalidToken, message)
}

impl AuthState {
    fn authenticate(&mut self, method: AuthMethod) -> Result<AuthData, MemoryError> {
        match method {
            AuthMethod::Anonymous => {
                self.anonymous_sessions += 1;
                Ok(AuthData::new(
                    format!("anon-{}", self.anonymous_sessions),
                    "anonymous",
                ))
            }
            AuthMethod::OAuth { provider, token } => {
                if token.trim().is_empty() {
                    return Err(invalid_token(format!("empty {provider} token")));
                }
                let next = self.oauth_identities.len() + 1;
                let uid = self
                    .oauth_identities
                    .entry((provider.clone(), token))
                    .or_insert_with(|| format!("{provider}-{next}"))
                    .clone();
                Ok(AuthData::new(uid, provider))
            }
            AuthMethod::Custom { token } => {
                if token.trim().is_empty() {
                    return Err(invalid_token("custom token is empty"));
                }
                if self.revoked_tokens.contains(&token) {
                    return Err(invalid_token("custom token was revoked"));
                }
                self.custom_tokens
                    .get(&token)
                    .map(|uid| AuthData::new(uid.clone(), "custom"))
                    .ok_or_else(|| invalid_token("unknown custom token"))
            }
        }
    }
}

impl State {
    /// Resolves `attempt` now, or holds it back while offline.
    pub(crate) fn attempt_auth(&mut self, attempt: PendingAuth) -> Vec<Delivery> {
        if !self.online {
            debug!(method = attempt.method.name(), "auth attempt deferred");
            self.deferred.push(Deferred::Auth(attempt));
            return Vec::new();
        }
        let PendingAuth { method, handler } = attempt;
        let method_name = method.name();
        match self.auth.authenticate(method) {
            Ok(auth) => {
                debug!(method = method_name, uid = auth.uid(), "authenticated");
                let mut deliveries = self.set_auth(Some(auth.clone()));
                deliveries.push(Box::new(move || handler.on_authenticated(auth)));
                deliveries
            }
            Err(error) => {
                debug!(method = method_name, %error, "authentication rejected");
                let delivery: Delivery = Box::new(move || handler.on_authentication_error(error));
                vec![delivery]
            }
        }
    }

    fn set_auth(&mut self, auth: Option<AuthData>) -> Vec<Delivery> {
        if self.auth.current == auth {
            return Vec::new();
        }
        self.auth.current = auth.clone();
        self.auth
            .listeners
            .values()
            .map(|listener| {
                let listener = Arc::clone(listener);
                let auth = auth.clone();
                Box::new(move || listener.on_auth_state_changed(auth)) as Delivery
            })
            .collect()
    }
}

impl MemoryDatabase {
    fn authenticate(&self, method: AuthMethod, handler: ResultHandler) {
        self.dispatch(|state| ((), state.attempt_auth(PendingAuth { method, handler })));
    }

    /// Signs out. Auth state listeners are told only if someone was signed in.
    pub fn unauth(&self) {
        self.dispatch(|state| ((), state.set_auth(None)));
    }

    /// Mints a token accepted by `auth_with_custom_token` for `uid`.
    pub fn issue_custom_token(&self, uid: &str) -> String {
        self.dispatch(|state| {
            let tokens = &mut state.auth.custom_tokens;
            let token = format!("custom-token-{}", tokens.len() + 1);
            tokens.insert(token.clone(), uid.to_string());
            (token, Vec::new())
        })
    }

    /// Makes later sign-ins with `token` fail. Existing sessions are unaffected.
    pub fn revoke_custom_token(&self, token: &str) {
        self.dispatch(|state| {
            state.auth.revoked_tokens.insert(token.to_string());
            ((), Vec::new())
        });
    }
}

impl AuthSource for MemoryDatabase {
    type AuthData = AuthData;
    type Error = MemoryError;
    type Registration = ListenerId;

    fn current_auth(&self) -> Option<AuthData> {
        self.dispatch(|state| (state.auth.current.clone(), Vec::new()))
    }

    /// The current state is reported right away.
    fn add_auth_state_listener(&self, listener: Box<dyn AuthStateListener<AuthData>>) -> ListenerId {
        let listener: AuthListener = Arc::from(listener);
        self.dispatch(|state| {
            let id = state.next_id();
            state.auth.listeners.insert(id, Arc::clone(&listener));
            let current = state.auth.current.clone();
            let delivery: Delivery = Box::new(move || listener.on_auth_state_changed(current));
            (id, vec![delivery])
        })
    }

    fn remove_auth_state_listener(&self, registration: ListenerId) {
        self.remove(registration);
    }

    fn auth_anonymously(&self, handler: ResultHandler) {
        self.authenticate(AuthMethod::Anonymous, handler);
    }

    fn auth_with_oauth_token(&self, provider: &str, token: &str, handler: ResultHandler) {
        self.authenticate(
            AuthMethod::OAuth {
                provider: provider.to_string(),
                token: token.to_string(),
            },
            handler,
        );
    }

    fn auth_with_custom_token(&self, token: &str, handler: ResultHandler) {
        self.authenticate(
            AuthMethod::Custom {
                token: token.to_string(),
            },
            handler,
        );
    }
}
