use std::sync::Arc;

use crate::defaults::default_label;

/// Identity attached to every log event a stream produces.
#[derive(Clone, Debug)]
pub(crate) struct StreamContext {
    label: Arc<str>,
    kind: &'static str,
    trace_values: bool,
}

impl StreamContext {
    pub(crate) fn new(label: Arc<str>, kind: &'static str, trace_values: bool) -> Self {
        Self {
            label,
            kind,
            trace_values,
        }
    }

    /// Context for streams built outside a [`crate::StreamAdapter`].
    pub(crate) fn standalone(kind: &'static str) -> Self {
        Self::new(Arc::from(default_label()), kind, false)
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn kind(&self) -> &'static str {
        self.kind
    }

    pub(crate) fn trace_values(&self) -> bool {
        self.trace_values
    }
}
