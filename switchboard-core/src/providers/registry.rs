//! Thread-safe provider registry
//!
//! The process-wide owner of provider instances and their factories.
//! Lookups take the shared side of the lock and run concurrently;
//! mutations take the exclusive side. Factories run with no lock held,
//! since construction may itself do network I/O.

use crate::providers::error::{ProviderError, ProviderResult};
use crate::providers::{Provider, ProviderConfig};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Builds a provider instance from its construction config.
pub type Factory = dyn Fn(ProviderConfig) -> ProviderResult<Arc<dyn Provider>> + Send + Sync;

/// Failures surfaced by registry operations. Expected misuse (duplicate or
/// missing names) is an error value, never a panic.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("provider {0} already registered")]
    ProviderExists(String),

    #[error("factory for provider {0} already registered")]
    FactoryExists(String),

    #[error("provider {0} not found")]
    ProviderNotFound(String),

    #[error("factory for provider {0} not found")]
    FactoryNotFound(String),

    /// A factory or a provider's own close failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// One or more providers failed to close during registry shutdown.
    #[error("failed to close {} provider(s)", failures.len())]
    Close {
        failures: Vec<(String, ProviderError)>,
    },
}

static GLOBAL: Lazy<Registry> = Lazy::new(Registry::new);

/// Named store of live providers and provider factories.
#[derive(Default)]
pub struct Registry {
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
    factories: RwLock<HashMap<String, Arc<Factory>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide instance. Tests should construct their own
    /// registries instead to avoid cross-test interference.
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    /// Register a factory under a name. Duplicate names are rejected.
    pub fn register_factory<F>(&self, name: &str, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(ProviderConfig) -> ProviderResult<Arc<dyn Provider>> + Send + Sync + 'static,
    {
        let mut factories = self.factories.write();
        if factories.contains_key(name) {
            return Err(RegistryError::FactoryExists(name.to_string()));
        }
        factories.insert(name.to_string(), Arc::new(factory));
        Ok(())
    }

    /// Register an already-built provider under a name. Duplicate names
    /// are rejected, never overwritten.
    pub fn register(&self, name: &str, provider: Arc<dyn Provider>) -> Result<(), RegistryError> {
        let mut providers = self.providers.write();
        if providers.contains_key(name) {
            return Err(RegistryError::ProviderExists(name.to_string()));
        }
        providers.insert(name.to_string(), provider);
        debug!(name, "registered provider");
        Ok(())
    }

    /// Look up a registered provider.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>, RegistryError> {
        self.providers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::ProviderNotFound(name.to_string()))
    }

    /// Build a provider through its registered factory and register the
    /// result. On a name collision the freshly built provider is closed
    /// before the error returns, so no connection leaks; the provider
    /// already registered under the name is untouched.
    pub async fn create(
        &self,
        name: &str,
        config: ProviderConfig,
    ) -> Result<Arc<dyn Provider>, RegistryError> {
        let factory = self
            .factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::FactoryNotFound(name.to_string()))?;

        // Factory construction may do network I/O; no lock held here.
        let provider = factory(config)?;

        let inserted = {
            let mut providers = self.providers.write();
            if providers.contains_key(name) {
                false
            } else {
                providers.insert(name.to_string(), provider.clone());
                true
            }
        };

        if !inserted {
            if let Err(err) = provider.close().await {
                warn!(name, %err, "failed to close provider after registration collision");
            }
            return Err(RegistryError::ProviderExists(name.to_string()));
        }

        debug!(name, "created provider");
        Ok(provider)
    }

    /// Names of all registered providers, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove a provider and close it.
    pub async fn unregister(&self, name: &str) -> Result<(), RegistryError> {
        let provider = self
            .providers
            .write()
            .remove(name)
            .ok_or_else(|| RegistryError::ProviderNotFound(name.to_string()))?;
        provider.close().await?;
        debug!(name, "unregistered provider");
        Ok(())
    }

    /// Close every registered provider. A failing close does not stop the
    /// shutdown; all failures are aggregated into one error.
    pub async fn close(&self) -> Result<(), RegistryError> {
        let drained: Vec<(String, Arc<dyn Provider>)> =
            self.providers.write().drain().collect();

        let mut failures = Vec::new();
        for (name, provider) in drained {
            if let Err(err) = provider.close().await {
                error!(name, %err, "failed to close provider");
                failures.push((name, err));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::Close { failures })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ChatRequest, ModelInfo, Response, StreamRequest};
    use crate::providers::EventStream;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio_util::sync::CancellationToken;

    struct MockProvider {
        name: String,
        closed: AtomicBool,
        fail_close: bool,
    }

    impl MockProvider {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                closed: AtomicBool::new(false),
                fail_close: false,
            })
        }

        fn failing_close(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                closed: AtomicBool::new(false),
                fail_close: true,
            })
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn chat(&self, _request: &ChatRequest) -> ProviderResult<Response> {
            Ok(Response {
                content: "mock response".to_string(),
                model: "mock-model".to_string(),
                provider: self.name.clone(),
                finish_reason: "stop".to_string(),
                usage: None,
                metadata: HashMap::new(),
                created_at: Utc::now(),
            })
        }

        async fn stream(
            &self,
            _request: &StreamRequest,
            _cancel: CancellationToken,
        ) -> ProviderResult<EventStream> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }

        async fn models(&self) -> ProviderResult<Vec<ModelInfo>> {
            Ok(vec![])
        }

        async fn close(&self) -> ProviderResult<()> {
            self.closed.store(true, Ordering::SeqCst);
            if self.fail_close {
                return Err(ProviderError::unavailable(&self.name, "close failed"));
            }
            Ok(())
        }
    }

    fn mock_factory(name: &'static str) -> impl Fn(ProviderConfig) -> ProviderResult<Arc<dyn Provider>> {
        move |_config| Ok(MockProvider::new(name) as Arc<dyn Provider>)
    }

    #[test]
    fn register_factory_rejects_duplicates() {
        let registry = Registry::new();
        registry.register_factory("mock", mock_factory("mock")).unwrap();

        let err = registry
            .register_factory("mock", mock_factory("mock"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::FactoryExists(_)));
    }

    #[test]
    fn register_rejects_duplicates() {
        let registry = Registry::new();
        registry.register("mock", MockProvider::new("first")).unwrap();

        let err = registry
            .register("mock", MockProvider::new("second"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::ProviderExists(_)));

        // The original registration survives.
        assert_eq!(registry.get("mock").unwrap().name(), "first");
    }

    #[test]
    fn get_missing_is_an_error() {
        let registry = Registry::new();
        let Err(err) = registry.get("nope") else {
            panic!("expected an error");
        };
        assert!(matches!(err, RegistryError::ProviderNotFound(_)));
    }

    #[tokio::test]
    async fn create_builds_and_registers() {
        let registry = Registry::new();
        registry.register_factory("mock", mock_factory("mock")).unwrap();

        let provider = registry
            .create("mock", ProviderConfig::new("key"))
            .await
            .unwrap();
        assert_eq!(provider.name(), "mock");

        // Auto-registered under the same name.
        let fetched = registry.get("mock").unwrap();
        assert!(Arc::ptr_eq(&provider, &fetched));
    }

    #[tokio::test]
    async fn create_without_factory_fails() {
        let registry = Registry::new();
        let Err(err) = registry.create("nope", ProviderConfig::new("key")).await else {
            panic!("expected an error");
        };
        assert!(matches!(err, RegistryError::FactoryNotFound(_)));
    }

    #[tokio::test]
    async fn create_propagates_factory_failure() {
        let registry = Registry::new();
        registry
            .register_factory("broken", |_config| {
                Err(ProviderError::authentication("broken", "no key"))
            })
            .unwrap();

        let Err(err) = registry.create("broken", ProviderConfig::new("key")).await else {
            panic!("expected an error");
        };
        assert!(matches!(err, RegistryError::Provider(_)));
    }

    #[tokio::test]
    async fn create_collision_keeps_first_provider_open() {
        let registry = Registry::new();
        let first = MockProvider::new("first");
        registry.register("mock", first.clone()).unwrap();
        registry.register_factory("mock", mock_factory("second")).unwrap();

        let Err(err) = registry.create("mock", ProviderConfig::new("key")).await else {
            panic!("expected an error");
        };
        assert!(matches!(err, RegistryError::ProviderExists(_)));

        // The first provider was not closed; the collision loser was.
        assert!(!first.closed.load(Ordering::SeqCst));
        assert_eq!(registry.get("mock").unwrap().name(), "first");
    }

    #[test]
    fn list_returns_sorted_names() {
        let registry = Registry::new();
        registry.register("zeta", MockProvider::new("zeta")).unwrap();
        registry.register("alpha", MockProvider::new("alpha")).unwrap();
        registry.register("mid", MockProvider::new("mid")).unwrap();

        assert_eq!(registry.list(), vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn unregister_closes_the_provider() {
        let registry = Registry::new();
        let provider = MockProvider::new("mock");
        registry.register("mock", provider.clone()).unwrap();

        registry.unregister("mock").await.unwrap();
        assert!(provider.closed.load(Ordering::SeqCst));
        assert!(registry.get("mock").is_err());
    }

    #[tokio::test]
    async fn unregister_missing_is_an_error() {
        let registry = Registry::new();
        let err = registry.unregister("nope").await.unwrap_err();
        assert!(matches!(err, RegistryError::ProviderNotFound(_)));
    }

    #[tokio::test]
    async fn close_aggregates_failures_but_closes_everything() {
        let registry = Registry::new();
        let ok1 = MockProvider::new("ok1");
        let bad = MockProvider::failing_close("bad");
        let ok2 = MockProvider::new("ok2");
        registry.register("ok1", ok1.clone()).unwrap();
        registry.register("bad", bad.clone()).unwrap();
        registry.register("ok2", ok2.clone()).unwrap();

        let err = registry.close().await.unwrap_err();
        match err {
            RegistryError::Close { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, "bad");
            }
            other => panic!("unexpected error: {other}"),
        }

        // Every provider saw its close call, including the failing one.
        assert!(ok1.closed.load(Ordering::SeqCst));
        assert!(bad.closed.load(Ordering::SeqCst));
        assert!(ok2.closed.load(Ordering::SeqCst));
        assert!(registry.list().is_empty());
    }

    #[tokio::test]
    async fn concurrent_reads_do_not_block_each_other() {
        let registry = Arc::new(Registry::new());
        registry.register("mock", MockProvider::new("mock")).unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.get("mock").unwrap().name().to_string()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), "mock");
        }
    }
}
