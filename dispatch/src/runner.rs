//! Construct a scheduler from environment variables.

use std::sync::Arc;

use tracing::info;

use crate::client::OllamaClient;
use crate::config::{PoolConfig, SchedulerConfig};
use crate::model::CapabilityRegistry;
use crate::pool::BackendPool;
use crate::scheduler::Scheduler;
use crate::traits::DispatchError;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Backend URLs from `OLLAMA_URLS` (comma separated), falling back to
/// `OLLAMA_URL` and then the local default.
pub fn urls_from_env() -> Vec<String> {
    let urls = std::env::var("OLLAMA_URLS")
        .or_else(|_| std::env::var("OLLAMA_URL"))
        .unwrap_or_else(|_| DEFAULT_OLLAMA_URL.into());
    urls.split(',')
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(String::from)
        .collect()
}

/// Load the capability table named by `DISPATCH_CAPABILITIES`, or the
/// built-in Ollama defaults when unset.
pub fn registry_from_env() -> Result<CapabilityRegistry, DispatchError> {
    match std::env::var("DISPATCH_CAPABILITIES") {
        Ok(path) => {
            let registry = CapabilityRegistry::from_path(&path)?;
            info!(%path, models = registry.len(), "loaded capability table");
            Ok(registry)
        }
        Err(_) => Ok(CapabilityRegistry::ollama_defaults()),
    }
}

/// Create a [`BackendPool`] with one [`OllamaClient`] per configured URL.
pub fn pool_from_env() -> Result<BackendPool, DispatchError> {
    let mut pool = BackendPool::with_config(registry_from_env()?, PoolConfig::from_env()?);
    for url in urls_from_env() {
        let client = Arc::new(OllamaClient::new(&url)?);
        pool.add_backend(url, client);
    }
    Ok(pool)
}

/// Create a [`Scheduler`] from environment configuration. The caller still
/// has to [`spawn`](Scheduler::spawn) it.
pub fn scheduler_from_env() -> Result<Scheduler, DispatchError> {
    Ok(Scheduler::new(pool_from_env()?, SchedulerConfig::from_env()?))
}
