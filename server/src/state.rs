use std::sync::Arc;

use model_registry::{LabelTable, ModelRegistry, PreprocessSelector};

use crate::{accounts::AccountStore, history::HistoryStore};

/// Everything the handlers share. Cloning only bumps reference counts.
#[derive(Debug, Clone)]
pub struct AppState {
    pub registry: Arc<ModelRegistry>,
    pub selector: Arc<PreprocessSelector>,
    pub labels: Arc<LabelTable>,
    /// The configured model names, the keys of mocked predictions.
    pub model_names: Arc<[String]>,
    pub history: Arc<HistoryStore>,
    pub accounts: Arc<AccountStore>,
}

impl AppState {
    /// Creates a new `AppState` with empty history and account stores.
    ///
    /// # Arguments
    /// * `registry` - The loaded models, possibly none.
    /// * `selector` - The preprocessing of each model.
    /// * `labels` - The class names.
    /// * `model_names` - The configured model names, loaded or not.
    pub fn new(
        registry: ModelRegistry,
        selector: PreprocessSelector,
        labels: LabelTable,
        model_names: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            selector: Arc::new(selector),
            labels: Arc::new(labels),
            model_names: model_names.into_iter().collect(),
            history: Arc::new(HistoryStore::new()),
            accounts: Arc::new(AccountStore::new()),
        }
    }

    /// Whether predictions are mocked because no model could be loaded.
    pub fn is_mock(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn mode(&self) -> &'static str {
        if self.is_mock() { "mock" } else { "models" }
    }
}
