use thiserror::Error;

/// The single error kind surfaced by every adapted stream.
///
/// Wraps whatever the data source reported (a cancelled listener, a rejected write, a failed
/// authentication) without decoding it. Use [`SourceError::native`] or
/// [`SourceError::into_native`] to recover the underlying cause.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("data source error: {native}")]
pub struct SourceError<E> {
    #[source]
    native: E,
}

impl<E> SourceError<E> {
    pub(crate) fn new(native: E) -> Self {
        Self { native }
    }

    /// Borrows the error exactly as the data source reported it.
    pub fn native(&self) -> &E {
        &self.native
    }

    /// Unwraps the native error.
    pub fn into_native(self) -> E {
        self.native
    }
}
