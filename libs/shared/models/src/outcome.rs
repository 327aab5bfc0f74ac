use serde::Serialize;
use tracing::warn;

/// A best-effort side effect that failed without affecting the primary result.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Advisory {
    pub operation: String,
    pub message: String,
}

impl Advisory {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Primary result of an operation plus the advisory outcomes of its side
/// effects. Callers branch on `primary` only.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome<T> {
    pub primary: T,
    pub advisories: Vec<Advisory>,
}

impl<T> Outcome<T> {
    pub fn new(primary: T) -> Self {
        Self {
            primary,
            advisories: Vec::new(),
        }
    }

    pub fn advise(&mut self, advisory: Advisory) {
        warn!("{} failed: {}", advisory.operation, advisory.message);
        self.advisories.push(advisory);
    }

    /// Folds a side-effect result into the advisory list, discarding its value.
    pub fn absorb<V, E: std::fmt::Display>(&mut self, operation: &str, result: Result<V, E>) -> Option<V> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.advise(Advisory::new(operation, e.to_string()));
                None
            }
        }
    }

    pub fn into_primary(self) -> T {
        self.primary
    }
}
