//! Backend bookkeeping and load-aware selection.
//!
//! A [`BackendPool`] owns every [`Backend`] together with the shared
//! [`CapabilityRegistry`]. Selection visits backends in ascending order of
//! `load + affinity penalty`, refreshes each one's model list under a timeout
//! and returns the first backend whose models satisfy the task.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::model::CapabilityRegistry;
use crate::selector::choose_model;
use crate::task::ModelConstraints;
use crate::traits::{BackendClient, Capability, DispatchError};

/// Success and failure history of a backend, per capability.
#[derive(Default, Debug, Clone, PartialEq, Serialize)]
pub struct AffinityProfile {
    successes: HashMap<Capability, usize>,
    failures: HashMap<Capability, usize>,
}

impl AffinityProfile {
    pub(crate) fn record(&mut self, capabilities: &BTreeSet<Capability>, success: bool) {
        let counts = if success {
            &mut self.successes
        } else {
            &mut self.failures
        };
        for cap in capabilities {
            *counts.entry(*cap).or_insert(0) += 1;
        }
    }

    /// Failures minus successes for each capability, floored at zero and summed.
    pub fn penalty(&self, capabilities: &BTreeSet<Capability>) -> usize {
        capabilities
            .iter()
            .map(|cap| {
                let failed = self.failures.get(cap).copied().unwrap_or(0);
                let succeeded = self.successes.get(cap).copied().unwrap_or(0);
                failed.saturating_sub(succeeded)
            })
            .sum()
    }
}

/// One remote endpoint plus the state the pool tracks for it.
pub struct Backend {
    name: String,
    client: Arc<dyn BackendClient>,
    models: RwLock<Vec<String>>,
    load: AtomicUsize,
    live: AtomicBool,
    profile: Mutex<AffinityProfile>,
}

impl Backend {
    pub fn new(name: impl Into<String>, client: Arc<dyn BackendClient>) -> Self {
        Self {
            name: name.into(),
            client,
            models: RwLock::new(Vec::new()),
            load: AtomicUsize::new(0),
            live: AtomicBool::new(true),
            profile: Mutex::new(AffinityProfile::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &dyn BackendClient {
        self.client.as_ref()
    }

    /// Tasks currently assigned to or executing on this backend.
    pub fn load(&self) -> usize {
        self.load.load(Ordering::SeqCst)
    }

    /// Whether the most recent model listing succeeded.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Last successfully listed models. May be stale.
    pub fn models(&self) -> Vec<String> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn profile(&self) -> AffinityProfile {
        self.profile
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn affinity_penalty(&self, capabilities: &BTreeSet<Capability>) -> usize {
        self.profile
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .penalty(capabilities)
    }

    pub(crate) fn record_outcome(&self, capabilities: &BTreeSet<Capability>, success: bool) {
        self.profile
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(capabilities, success);
    }

    /// Count one more task against this backend until the guard is dropped.
    pub fn begin(self: &Arc<Self>) -> LoadGuard {
        self.load.fetch_add(1, Ordering::SeqCst);
        LoadGuard {
            backend: Arc::clone(self),
        }
    }

    /// Fetch the model list, bounded by `timeout`, and store the snapshot.
    pub async fn refresh_models(&self, timeout: Duration) -> Result<Vec<String>, DispatchError> {
        let result = match tokio::time::timeout(timeout, self.client.list_models()).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::BackendTimeout {
                backend: self.name.clone(),
                after: timeout,
            }),
        };
        match &result {
            Ok(models) => {
                *self.models.write().unwrap_or_else(PoisonError::into_inner) = models.clone();
                self.live.store(true, Ordering::SeqCst);
            }
            Err(_) => self.live.store(false, Ordering::SeqCst),
        }
        result
    }
}

/// Releases one unit of backend load on drop.
pub struct LoadGuard {
    backend: Arc<Backend>,
}

impl LoadGuard {
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.backend.load.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Result of a successful [`BackendPool::select_backend`].
pub struct Selection {
    pub backend: Arc<Backend>,
    pub model: String,
    /// Backends passed over because listing their models failed.
    pub skipped: Vec<DispatchError>,
}

/// Liveness report produced by [`BackendPool::probe`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendHealth {
    pub name: String,
    pub live: bool,
    pub models: usize,
    pub load: usize,
    pub error: Option<String>,
}

/// Point-in-time view of a backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendSnapshot {
    pub name: String,
    pub load: usize,
    pub live: bool,
    pub models: Vec<String>,
    pub affinity: AffinityProfile,
}

pub struct BackendPool {
    backends: Vec<Arc<Backend>>,
    registry: Arc<CapabilityRegistry>,
    config: PoolConfig,
}

impl BackendPool {
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self::with_config(registry, PoolConfig::default())
    }

    pub fn with_config(registry: CapabilityRegistry, config: PoolConfig) -> Self {
        Self {
            backends: Vec::new(),
            registry: Arc::new(registry),
            config,
        }
    }

    pub fn add_backend(&mut self, name: impl Into<String>, client: Arc<dyn BackendClient>) {
        self.backends.push(Arc::new(Backend::new(name, client)));
    }

    /// Builder form of [`BackendPool::add_backend`].
    pub fn with_backend(mut self, name: impl Into<String>, client: Arc<dyn BackendClient>) -> Self {
        self.add_backend(name, client);
        self
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn backend(&self, name: &str) -> Option<&Arc<Backend>> {
        self.backends.iter().find(|b| b.name == name)
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Choose a backend and model for `constraints`.
    ///
    /// Backends named in `exclude` are not consulted. Among backends with the
    /// same score, those that failed their last listing are tried last. The
    /// search is first-fit in load order, not a global optimum. Fails with
    /// [`DispatchError::NoAvailableBackend`] when no backend answered and
    /// [`DispatchError::NoSuitableModel`] when none of the answers matched.
    pub async fn select_backend(
        &self,
        constraints: &ModelConstraints,
        exclude: &[String],
    ) -> Result<Selection, DispatchError> {
        let mut order: Vec<(usize, &Arc<Backend>)> = self
            .backends
            .iter()
            .filter(|b| !exclude.contains(&b.name))
            .map(|b| (b.load() + b.affinity_penalty(&constraints.required), b))
            .collect();
        // Backends whose last listing failed go after live ones of equal score.
        order.sort_by_key(|(score, b)| (*score, !b.is_live()));

        let timeout = self.config.list_models_timeout();
        let mut answered = false;
        let mut skipped = Vec::new();
        for (score, backend) in order {
            match backend.refresh_models(timeout).await {
                Ok(models) => {
                    answered = true;
                    if let Some(model) = choose_model(&self.registry, constraints, &models) {
                        debug!(backend = %backend.name, %model, score, "backend selected");
                        return Ok(Selection {
                            backend: Arc::clone(backend),
                            model,
                            skipped,
                        });
                    }
                    debug!(backend = %backend.name, "no suitable model on backend");
                }
                Err(e) => {
                    warn!(backend = %backend.name, error = %e, "skipping backend");
                    skipped.push(e);
                }
            }
        }

        if answered {
            Err(DispatchError::NoSuitableModel)
        } else {
            Err(DispatchError::NoAvailableBackend)
        }
    }

    /// List models on every backend concurrently and report liveness.
    pub async fn probe(&self) -> Vec<BackendHealth> {
        let timeout = self.config.list_models_timeout();
        let checks = self.backends.iter().map(|backend| async move {
            let result = backend.refresh_models(timeout).await;
            BackendHealth {
                name: backend.name.clone(),
                live: result.is_ok(),
                models: result.as_ref().map(Vec::len).unwrap_or(0),
                load: backend.load(),
                error: result.err().map(|e| e.to_string()),
            }
        });
        join_all(checks).await
    }

    pub fn snapshot(&self) -> Vec<BackendSnapshot> {
        self.backends
            .iter()
            .map(|b| BackendSnapshot {
                name: b.name.clone(),
                load: b.load(),
                live: b.is_live(),
                models: b.models(),
                affinity: b.profile(),
            })
            .collect()
    }
}
