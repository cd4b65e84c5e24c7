//! Name -> constructor registry with a saved-config store.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use super::builtin::{BuyAndHold, MaCrossover};
use super::{Strategy, StrategyConfig, StrategyError};

/// Builds a fresh, uninitialized strategy.
pub type StrategyConstructor = Arc<dyn Fn() -> Box<dyn Strategy> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),
    #[error(transparent)]
    Strategy(#[from] StrategyError),
}

/// Strategy registry.
///
/// Many readers may create strategies concurrently; registration and
/// config saves take the write lock.
#[derive(Default)]
pub struct StrategyFactory {
    constructors: RwLock<BTreeMap<String, StrategyConstructor>>,
    configs: RwLock<BTreeMap<String, StrategyConfig>>,
}

static GLOBAL: OnceLock<StrategyFactory> = OnceLock::new();

impl StrategyFactory {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with `buy_and_hold` and `ma_crossover`.
    pub fn with_builtins() -> Self {
        let factory = Self::new();
        factory.register(BuyAndHold::NAME, || Box::new(BuyAndHold::default()));
        factory.register(MaCrossover::NAME, || Box::new(MaCrossover::default()));
        factory
    }

    /// The process-wide registry, created with the built-ins on first use.
    pub fn global() -> &'static StrategyFactory {
        GLOBAL.get_or_init(Self::with_builtins)
    }

    /// Register (or replace) a constructor under `name`.
    pub fn register<F>(&self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn Strategy> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(strategy = %name, "registering strategy");
        self.constructors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, Arc::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn save_config(&self, config: StrategyConfig) {
        self.configs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(config.name.clone(), config);
    }

    pub fn saved_config(&self, name: &str) -> Option<StrategyConfig> {
        self.configs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Instantiate and initialize `name`.
    ///
    /// Uses `config` when given, else the saved config for `name`, else an
    /// empty config.
    pub fn create(
        &self,
        name: &str,
        config: Option<&StrategyConfig>,
    ) -> Result<Box<dyn Strategy>, FactoryError> {
        let constructor = self
            .constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| FactoryError::UnknownStrategy(name.to_string()))?;

        let config = match config {
            Some(c) => c.clone(),
            None => self
                .saved_config(name)
                .unwrap_or_else(|| StrategyConfig::new(name)),
        };

        let mut strategy = constructor();
        strategy.initialize(&config)?;
        Ok(strategy)
    }
}
