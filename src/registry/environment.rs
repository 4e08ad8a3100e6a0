//! Environment lookups used to discover installed engines.

use std::collections::HashMap;

/// Read-only view of environment markers.
pub trait EnvironmentProbe: Send + Sync {
    /// Value of `key`, or `None` when unset or empty.
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnvironment;

impl EnvironmentProbe for ProcessEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

impl EnvironmentProbe for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty()).cloned()
    }
}

/// Configured markers first, then the process environment.
#[derive(Debug, Clone, Default)]
pub struct LayeredEnvironment {
    overrides: HashMap<String, String>,
}

impl LayeredEnvironment {
    pub fn new(overrides: HashMap<String, String>) -> Self {
        Self { overrides }
    }
}

impl EnvironmentProbe for LayeredEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        self.overrides
            .var(key)
            .or_else(|| ProcessEnvironment.var(key))
    }
}
