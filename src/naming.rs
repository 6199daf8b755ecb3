//! Deployment-wide resource name prefixing.

use tracing::{info, warn};

/// Result of applying the deployment prefix to a resource name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransformedName {
    /// Final name to use with the provider.
    pub name: String,
    /// Set when the input already carried the prefix. The prefix is applied
    /// again regardless; the flag only mirrors the warning that was logged.
    pub already_prefixed: bool,
}

/// Applies an optional deployment prefix to resource names.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResourceNamer {
    prefix: Option<String>,
}

impl ResourceNamer {
    /// Creates a namer. Empty prefixes behave like no prefix at all.
    #[must_use]
    pub fn new(prefix: Option<String>) -> Self {
        Self {
            prefix: prefix.filter(|value| !value.is_empty()),
        }
    }

    /// Namer that leaves names untouched.
    #[must_use]
    pub const fn identity() -> Self {
        Self { prefix: None }
    }

    /// Returns the configured prefix.
    #[must_use]
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Prefixes `name`, warning when the prefix is already present.
    #[must_use]
    pub fn transform(&self, name: &str) -> TransformedName {
        let Some(prefix) = self.prefix.as_deref() else {
            return TransformedName {
                name: name.to_owned(),
                already_prefixed: false,
            };
        };

        let prefixed = format!("{prefix}{name}");
        let already_prefixed = name.starts_with(prefix);
        if already_prefixed {
            warn!(
                resource = name,
                prefix, "prefixing resource that already carries the prefix"
            );
        } else {
            info!(resource = name, transformed = %prefixed, "transformed resource name");
        }

        TransformedName {
            name: prefixed,
            already_prefixed,
        }
    }

    /// Convenience wrapper returning only the final name.
    #[must_use]
    pub fn apply(&self, name: &str) -> String {
        self.transform(name).name
    }
}
