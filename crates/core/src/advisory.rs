//! Non-blocking warnings surfaced to interactive callers before commit.

use serde::Serialize;

/// A warning that mirrors a hard validation rule.
///
/// Advisories never block a command on their own; the rule they mirror is still
/// enforced when the change is committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Advisory {
    pub field: &'static str,
    pub title: String,
    pub message: String,
}

impl Advisory {
    pub fn new(field: &'static str, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field,
            title: title.into(),
            message: message.into(),
        }
    }
}
