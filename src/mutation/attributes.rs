//! Attribute mutations: timestamped `set` / `remove` deltas keyed by
//! attribute name.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// A single attribute edit.
///
/// Wire form: `{"action":"set","key":"k","value":…,"timestamp":…}` or
/// `{"action":"remove","key":"k","timestamp":…}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum AttributeMutation {
    Set {
        key: String,
        value: Value,
        /// Milliseconds since the Unix epoch when the edit was made.
        timestamp: i64,
    },
    Remove {
        key: String,
        timestamp: i64,
    },
}

impl AttributeMutation {
    pub fn set(key: impl Into<String>, value: Value, timestamp: i64) -> Self {
        Self::Set {
            key: key.into(),
            value,
            timestamp,
        }
    }

    pub fn remove(key: impl Into<String>, timestamp: i64) -> Self {
        Self::Remove {
            key: key.into(),
            timestamp,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } | Self::Remove { key, .. } => key,
        }
    }

    /// Collapse a list so that only the last mutation per key survives.
    ///
    /// Survivors keep the relative order of their last occurrence.
    pub fn collapse(mutations: &[AttributeMutation]) -> Vec<AttributeMutation> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut collapsed: Vec<AttributeMutation> = Vec::new();
        for mutation in mutations.iter().rev() {
            if seen.insert(mutation.key()) {
                collapsed.push(mutation.clone());
            }
        }
        collapsed.reverse();
        collapsed
    }
}

// ============================================================================
// AttributeEditor
// ============================================================================

/// Accumulates attribute edits and hands the collapsed list to `on_apply`.
pub struct AttributeEditor<'a> {
    now_ms: i64,
    mutations: Vec<AttributeMutation>,
    on_apply: Box<dyn FnOnce(Vec<AttributeMutation>) -> Result<()> + 'a>,
}

impl<'a> AttributeEditor<'a> {
    pub fn new(
        now_ms: i64,
        on_apply: impl FnOnce(Vec<AttributeMutation>) -> Result<()> + 'a,
    ) -> Self {
        Self {
            now_ms,
            mutations: Vec::new(),
            on_apply: Box::new(on_apply),
        }
    }

    pub fn set_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        if key.trim().is_empty() {
            tracing::warn!("ignoring attribute set with a blank key");
            return self;
        }
        self.mutations
            .push(AttributeMutation::set(key, value.into(), self.now_ms));
        self
    }

    pub fn remove_attribute(mut self, key: &str) -> Self {
        if key.trim().is_empty() {
            tracing::warn!("ignoring attribute removal with a blank key");
            return self;
        }
        self.mutations
            .push(AttributeMutation::remove(key, self.now_ms));
        self
    }

    /// Hand the collapsed edits to the owner. Nothing is enqueued when every
    /// edit was ignored.
    pub fn apply(self) -> Result<()> {
        let collapsed = AttributeMutation::collapse(&self.mutations);
        if collapsed.is_empty() {
            return Ok(());
        }
        (self.on_apply)(collapsed)
    }
}
