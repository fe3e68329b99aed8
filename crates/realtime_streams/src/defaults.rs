use std::env;

pub(crate) const LABEL_ENV: &str = "REALTIME_STREAMS_LABEL";
pub(crate) const DEFAULT_LABEL: &str = "realtime";

pub(crate) fn default_label() -> String {
    env::var(LABEL_ENV)
        .ok()
        .filter(|label| !label.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LABEL.to_string())
}
