//! Filter factories and the name → factory registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::schema::FilterConfig;
use crate::error::ProxyError;
use crate::filter::builtin;
use crate::filter::manager::FilterChainBuilder;

/// Creates the filters one configured entry contributes to each new stream.
pub trait StreamFilterFactory: Send + Sync {
    fn create_filter_chain(&self, callbacks: &mut dyn FilterChainBuilder);
}

/// Parses a filter's config into a factory.
pub type FilterConstructor = fn(&FilterConfig) -> Result<Arc<dyn StreamFilterFactory>, ProxyError>;

#[derive(Clone, Default)]
pub struct FilterRegistry {
    constructors: HashMap<String, FilterConstructor>,
}

impl std::fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("filters", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FilterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `set_header`, `direct_response` and `response_header`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(builtin::SET_HEADER, builtin::set_header_factory);
        registry.register(builtin::DIRECT_RESPONSE, builtin::direct_response_factory);
        registry.register(builtin::RESPONSE_HEADER, builtin::response_header_factory);
        registry
    }

    /// Register a constructor, replacing any previous one with the same name.
    pub fn register(&mut self, name: impl Into<String>, constructor: FilterConstructor) {
        self.constructors.insert(name.into(), constructor);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn create(
        &self,
        config: &FilterConfig,
    ) -> Result<Arc<dyn StreamFilterFactory>, ProxyError> {
        let constructor = self
            .constructors
            .get(&config.name)
            .ok_or_else(|| ProxyError::UnknownFilter(config.name.clone()))?;
        constructor(config)
    }
}
