//! Precomputed field and association selections.

use serde::{Deserialize, Serialize};

/// Fields to select and associations to track for one entity.
///
/// Selectors are computed outside the identity map from a requested output
/// shape. When one is registered for an entity, every query the map builds
/// for that entity starts from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Selector {
    pub select: Vec<String>,
    pub track: Vec<String>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select.extend(fields.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn track<I, S>(mut self, associations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.track.extend(associations.into_iter().map(Into::into));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_missing_parts() {
        let selector: Selector = serde_json::from_str(r#"{"track": ["address"]}"#).unwrap();
        assert!(selector.select.is_empty());
        assert_eq!(selector, Selector::new().track(["address"]));
    }
}
