use serde::{Deserialize, Serialize};

use super::meta::Labels;

/// Exposes dotted field paths (`spec.index`, `metadata.labels.site`) to selectors.
pub trait Fields {
    /// Returns the string value at `path`, if present.
    fn field(&self, path: &str) -> Option<String>;
}

impl Fields for Labels {
    fn field(&self, path: &str) -> Option<String> {
        self.get(path).cloned()
    }
}

/// Expression matcher keyed by dotted field paths.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    /// Every nested selector must match; an empty list matches everything.
    All(Vec<Selector>),
    /// Field must be present and equal to `value`.
    Equals {
        /// Dotted field path.
        path: String,
        /// Expected value.
        value: String,
    },
    /// Field must be present.
    Exists {
        /// Dotted field path.
        path: String,
    },
}

impl Selector {
    /// Selector matching every object.
    pub fn everything() -> Self {
        Selector::All(Vec::new())
    }

    /// Equality match on `path`.
    pub fn equals(path: impl Into<String>, value: impl Into<String>) -> Self {
        Selector::Equals {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Existence match on `path`.
    pub fn exists(path: impl Into<String>) -> Self {
        Selector::Exists { path: path.into() }
    }

    /// Records belonging to the pool `name` (`spec.index == name`) in `namespace`.
    pub fn pool(namespace: &str, name: &str) -> Self {
        Selector::All(vec![
            Selector::equals("metadata.namespace", namespace),
            Selector::equals("spec.index", name),
        ])
    }

    /// Evaluates the selector against `object`.
    pub fn matches<F: Fields + ?Sized>(&self, object: &F) -> bool {
        match self {
            Selector::All(all) => all.iter().all(|s| s.matches(object)),
            Selector::Equals { path, value } => {
                object.field(path).as_deref() == Some(value.as_str())
            }
            Selector::Exists { path } => object.field(path).is_some(),
        }
    }
}

impl Default for Selector {
    fn default() -> Self {
        Selector::everything()
    }
}
