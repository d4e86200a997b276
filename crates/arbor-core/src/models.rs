use std::sync::{PoisonError, RwLock};

use crate::config::ModelsConfig;
use crate::error::{Error, Result};

/// Source of the model list and the user's current selection.
pub trait ModelRegistry: Send + Sync {
    fn available_models(&self) -> Vec<String>;

    /// May contain empty strings for unfilled selector slots.
    fn selected_models(&self) -> Vec<String>;

    /// Replaces the selection, e.g. with the models a loaded chat was using.
    fn select_models(&self, selected: Vec<String>);
}

/// First non-empty selection, else the first available model.
pub fn resolve_model(registry: &dyn ModelRegistry) -> Result<String> {
    registry
        .selected_models()
        .into_iter()
        .map(|model| model.trim().to_string())
        .find(|model| !model.is_empty())
        .or_else(|| {
            registry
                .available_models()
                .into_iter()
                .find(|model| !model.trim().is_empty())
        })
        .ok_or(Error::NoModelSelected)
}

/// In-memory registry with a mutable selection.
#[derive(Debug, Default)]
pub struct StaticModelRegistry {
    available: Vec<String>,
    selected: RwLock<Vec<String>>,
}

impl StaticModelRegistry {
    pub fn new(available: Vec<String>) -> Self {
        Self {
            available,
            selected: RwLock::new(Vec::new()),
        }
    }

    /// Registry whose initial selection is the configured default.
    pub fn from_config(config: &ModelsConfig, available: Vec<String>) -> Self {
        Self::new(available).with_selection(config.default.clone())
    }

    pub fn with_selection(mut self, selected: Vec<String>) -> Self {
        self.selected = RwLock::new(selected);
        self
    }
}

impl ModelRegistry for StaticModelRegistry {
    fn available_models(&self) -> Vec<String> {
        self.available.clone()
    }

    fn selected_models(&self) -> Vec<String> {
        self.selected
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn select_models(&self, selected: Vec<String>) {
        *self.selected.write().unwrap_or_else(PoisonError::into_inner) = selected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    #[rstest]
    #[case::selection_wins(&["a", "b"], &["b"], Some("b"))]
    #[case::blank_slot_skipped(&["a"], &["", "c"], Some("c"))]
    #[case::falls_back_to_available(&["a", "b"], &[""], Some("a"))]
    #[case::no_selection(&["a"], &[], Some("a"))]
    #[case::nothing_at_all(&[], &[""], None)]
    #[case::whitespace_only(&[" "], &["  "], None)]
    fn resolves_model(
        #[case] available: &[&str],
        #[case] selected: &[&str],
        #[case] expected: Option<&str>,
    ) {
        let registry = StaticModelRegistry::new(names(available)).with_selection(names(selected));

        match (resolve_model(&registry), expected) {
            (Ok(model), Some(want)) => assert_eq!(model, want),
            (Err(Error::NoModelSelected), None) => {}
            (other, want) => panic!("got {other:?}, wanted {want:?}"),
        }
    }

    #[test]
    fn select_replaces_the_selection() {
        let registry = StaticModelRegistry::new(names(&["a", "b"]));
        registry.select_models(names(&["b"]));
        assert_eq!(registry.selected_models(), names(&["b"]));
        assert_eq!(resolve_model(&registry).unwrap(), "b");
    }

    #[test]
    fn configured_default_seeds_the_selection() {
        let config = ModelsConfig {
            default: names(&["b"]),
        };
        let registry = StaticModelRegistry::from_config(&config, names(&["a", "b"]));
        assert_eq!(resolve_model(&registry).unwrap(), "b");

        let unconfigured = StaticModelRegistry::from_config(&ModelsConfig::default(), names(&["a"]));
        assert!(unconfigured.selected_models().is_empty());
        assert_eq!(resolve_model(&unconfigured).unwrap(), "a");
    }
}
