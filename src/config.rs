//! Application options and their environment overrides.

use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

const ENV_PREFIX: &str = "FERROUS_MODULES";

/// Options for building an [`ApplicationContext`](crate::ApplicationContext).
///
/// ```rust
/// use ferrous_modules::ApplicationOptions;
///
/// let options: ApplicationOptions = serde_json::from_str(r#"{"snapshot": true}"#).unwrap();
/// assert!(options.snapshot);
/// assert!(!options.preview);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationOptions {
    /// Record a serialized graph of modules and providers.
    pub snapshot: bool,
    /// Scan and wire the graph without constructing any instance.
    pub preview: bool,
    /// Exit the process with status 1 when bootstrap fails instead of
    /// returning the error.
    pub abort_on_error: bool,
}

impl ApplicationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `FERROUS_MODULES_SNAPSHOT`, `FERROUS_MODULES_PREVIEW`
    /// and `FERROUS_MODULES_ABORT_ON_ERROR`.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(value) = env_flag("SNAPSHOT") {
            self.snapshot = value;
        }
        if let Some(value) = env_flag("PREVIEW") {
            self.preview = value;
        }
        if let Some(value) = env_flag("ABORT_ON_ERROR") {
            self.abort_on_error = value;
        }
        self
    }

    pub fn snapshot(mut self, snapshot: bool) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn preview(mut self, preview: bool) -> Self {
        self.preview = preview;
        self
    }

    pub fn abort_on_error(mut self, abort: bool) -> Self {
        self.abort_on_error = abort;
        self
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let key = format!("{}_{}", ENV_PREFIX, name);
    let raw = env::var(&key).ok()?;
    let parsed = parse_flag(&raw);
    if parsed.is_none() {
        warn!(variable = %key, value = %raw, "ignoring unrecognized boolean");
    }
    parsed
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse_loosely() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" on "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn env_overrides_apply() {
        env::set_var("FERROUS_MODULES_PREVIEW", "yes");
        let options = ApplicationOptions::from_env();
        env::remove_var("FERROUS_MODULES_PREVIEW");
        assert!(options.preview);
        assert!(!options.abort_on_error);
    }

    #[test]
    fn builder_methods_chain() {
        let options = ApplicationOptions::new().snapshot(true).abort_on_error(true);
        assert!(options.snapshot && options.abort_on_error);
    }
}
