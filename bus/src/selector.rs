//! Subscription selectors.
//!
//! Every criterion that is set must hold for a message to match. An empty
//! selector matches everything.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::envelope::Envelope;

type Filter = Arc<dyn Fn(&Envelope) -> bool + Send + Sync>;

#[derive(Clone, Default)]
pub struct Selector {
    kind: Option<String>,
    from: Option<String>,
    to: Option<String>,
    filter: Option<Filter>,
}

impl Selector {
    /// Match every message.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Match messages of exactly this type.
    #[must_use]
    pub fn kind(kind: impl Into<String>) -> Self {
        Self { kind: Some(kind.into()), ..Self::default() }
    }

    /// Require the source component.
    #[must_use]
    pub fn from(mut self, component: impl Into<String>) -> Self {
        self.from = Some(component.into());
        self
    }

    /// Require the target component.
    #[must_use]
    pub fn to(mut self, component: impl Into<String>) -> Self {
        self.to = Some(component.into());
        self
    }

    /// Require a custom predicate.
    #[must_use]
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Envelope) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(predicate));
        self
    }

    /// Test an envelope against this selector.
    ///
    /// A predicate that panics is logged and counts as a non-match.
    #[must_use]
    pub fn matches(&self, envelope: &Envelope) -> bool {
        if self.kind.as_deref().is_some_and(|k| k != envelope.kind) {
            return false;
        }
        if let Some(from) = &self.from {
            if envelope.source_component() != Some(from.as_str()) {
                return false;
            }
        }
        if let Some(to) = &self.to {
            if envelope.target_component() != Some(to.as_str()) {
                return false;
            }
        }
        let Some(filter) = &self.filter else {
            return true;
        };
        if let Ok(matched) = catch_unwind(AssertUnwindSafe(|| filter(envelope))) {
            matched
        } else {
            tracing::error!(kind = %envelope.kind, id = %envelope.id, "bus selector filter panicked");
            false
        }
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("kind", &self.kind)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("filter", &self.filter.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

#[cfg(test)]
#[path = "selector_test.rs"]
mod tests;
