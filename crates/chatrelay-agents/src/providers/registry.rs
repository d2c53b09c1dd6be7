use std::collections::HashMap;
use std::sync::Arc;

use super::LlmProvider;

/// A selectable model bound to the provider that serves it.
#[derive(Clone)]
pub struct ModelRoute {
    pub name: String,
    pub model_id: String,
    pub provider: Arc<dyn LlmProvider>,
    pub max_tokens: Option<u32>,
}

impl std::fmt::Debug for ModelRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRoute")
            .field("name", &self.name)
            .field("model_id", &self.model_id)
            .field("provider", &self.provider.provider_id())
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// Model id to provider mapping, built once at startup and passed by reference.
#[derive(Default, Clone)]
pub struct ModelRegistry {
    routes: HashMap<String, ModelRoute>,
    order: Vec<String>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route; a later route with the same model id replaces the earlier one.
    pub fn register(&mut self, route: ModelRoute) {
        if !self.routes.contains_key(&route.model_id) {
            self.order.push(route.model_id.clone());
        }
        self.routes.insert(route.model_id.clone(), route);
    }

    pub fn resolve(&self, model_id: &str) -> Option<&ModelRoute> {
        self.routes.get(model_id)
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.routes.contains_key(model_id)
    }

    /// Routes in registration order.
    pub fn routes(&self) -> impl Iterator<Item = &ModelRoute> {
        self.order.iter().filter_map(|id| self.routes.get(id))
    }

    pub fn model_ids(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chatrelay_common::Result;

    use super::*;
    use crate::providers::{LlmRequest, ProviderStream};

    struct NullProvider;

    #[async_trait]
    impl LlmProvider for NullProvider {
        fn provider_id(&self) -> &str {
            "null"
        }

        async fn stream(&self, _request: &LlmRequest) -> Result<ProviderStream> {
            Ok(ProviderStream::from_events(Vec::new()))
        }
    }

    fn route(id: &str, name: &str) -> ModelRoute {
        ModelRoute {
            name: name.to_string(),
            model_id: id.to_string(),
            provider: Arc::new(NullProvider),
            max_tokens: None,
        }
    }

    #[test]
    fn resolves_registered_models_in_order() {
        let mut registry = ModelRegistry::new();
        registry.register(route("gpt-4o", "GPT-4o"));
        registry.register(route("claude-3-opus-20240229", "Claude"));

        assert_eq!(registry.model_ids(), vec!["gpt-4o", "claude-3-opus-20240229"]);
        assert!(registry.contains("gpt-4o"));
        assert_eq!(
            registry.resolve("claude-3-opus-20240229").unwrap().provider.provider_id(),
            "null"
        );
        assert!(registry.resolve("gpt-5").is_none());
    }

    #[test]
    fn re_registering_replaces_without_duplicating() {
        let mut registry = ModelRegistry::new();
        registry.register(route("gpt-4o", "old"));
        registry.register(route("gpt-4o", "new"));
        assert_eq!(registry.model_ids().len(), 1);
        assert_eq!(registry.resolve("gpt-4o").unwrap().name, "new");
    }
}
