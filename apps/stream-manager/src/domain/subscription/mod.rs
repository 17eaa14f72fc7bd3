//! Callback Subscriptions
//!
//! Ordered callback lists attached to a stream. Every registration carries
//! its own bound arguments and an identifier so it can be removed later.
//!
//! # Design
//!
//! - Insertion order is invocation order; registrations are not deduplicated
//! - A failing or panicking callback is isolated from its siblings
//! - Lists are cheap to clone (`Arc` per callback), so dispatch can run
//!   without holding the lock that guards the list

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::streaming::StreamKey;

// =============================================================================
// Bound Arguments
// =============================================================================

/// Immutable keyword arguments bound to a callback at registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BoundArgs(BTreeMap<String, Value>);

impl BoundArgs {
    /// Create an empty argument bundle.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Add an argument, returning the updated bundle.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Look up an argument.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Look up a string argument.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Number of bound arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no arguments are bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for BoundArgs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// =============================================================================
// Callbacks
// =============================================================================

/// Identifier handed out for each callback registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(Uuid);

impl CallbackId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallbackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A user callback receiving a message and its bound arguments.
pub type Callback<T> = Arc<dyn Fn(&T, &BoundArgs) -> anyhow::Result<()> + Send + Sync>;

/// A callback together with its bound arguments.
pub struct Registration<T> {
    id: CallbackId,
    callback: Callback<T>,
    args: Arc<BoundArgs>,
}

impl<T> Registration<T> {
    /// Wrap a callback and its arguments.
    #[must_use]
    pub fn new(callback: Callback<T>, args: BoundArgs) -> Self {
        Self {
            id: CallbackId::new(),
            callback,
            args: Arc::new(args),
        }
    }

    /// Registration identifier.
    #[must_use]
    pub const fn id(&self) -> CallbackId {
        self.id
    }

    /// Arguments bound to this callback.
    #[must_use]
    pub fn args(&self) -> &BoundArgs {
        &self.args
    }
}

impl<T> Clone for Registration<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            callback: Arc::clone(&self.callback),
            args: Arc::clone(&self.args),
        }
    }
}

impl<T> fmt::Debug for Registration<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Callback List
// =============================================================================

/// Result of dispatching one message to a callback list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Callbacks invoked.
    pub invoked: usize,
    /// Callbacks that returned an error or panicked.
    pub failed: usize,
}

/// Ordered callbacks for one stream.
#[derive(Debug)]
pub struct CallbackList<T> {
    entries: Vec<Registration<T>>,
}

impl<T> Default for CallbackList<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> Clone for CallbackList<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<T> CallbackList<T> {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback, returning its registration id.
    pub fn push(&mut self, callback: Callback<T>, args: BoundArgs) -> CallbackId {
        let registration = Registration::new(callback, args);
        let id = registration.id();
        self.entries.push(registration);
        id
    }

    /// Remove a registration. Returns `false` if it was not present.
    pub fn remove(&mut self, id: CallbackId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|r| r.id != id);
        self.entries.len() != before
    }

    /// Number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registrations in invocation order.
    pub fn iter(&self) -> impl Iterator<Item = &Registration<T>> {
        self.entries.iter()
    }

    /// Invoke every callback in order.
    ///
    /// Errors and panics are logged and counted; the remaining callbacks
    /// still run.
    pub fn dispatch(&self, message: &T, key: &StreamKey) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        for registration in &self.entries {
            outcome.invoked += 1;
            let result = catch_unwind(AssertUnwindSafe(|| {
                (registration.callback)(message, &registration.args)
            }));

            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    outcome.failed += 1;
                    tracing::warn!(
                        stream = %key,
                        callback = %registration.id,
                        error = %e,
                        "Callback returned an error"
                    );
                }
                Err(panic) => {
                    outcome.failed += 1;
                    tracing::error!(
                        stream = %key,
                        callback = %registration.id,
                        panic = panic_message(panic.as_ref()),
                        "Callback panicked"
                    );
                }
            }
        }

        outcome
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

// =============================================================================
// Tests
// =============================================================================
