//! Engine facade.
//!
//! `RagEngine` is the public contract surface: KB lifecycle, mode/enabled
//! switches, status, and the query entry point. All registry and state
//! mutations are serialized on a single mutex; anything that touches a
//! collaborator (filesystem, embedder) runs with the mutex released and
//! commits the result under a re-acquired critical section. Lifecycle
//! events are emitted inside the critical section, which is what gives
//! every listener the same global mutation order.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::builder;
use crate::chunker::Splitter;
use crate::config::EngineConfig;
use crate::embedder::{Embedder, EmbeddingAdapter};
use crate::error::{RagError, RagResult};
use crate::events::{EventBus, RagEvent, Subscription};
use crate::loader;
use crate::planner::{self, QueryResult};
use crate::registry::{KbOrigin, KbRegistry, KbSummary, KnowledgeBase};
use crate::state::{EngineMode, PersistedState, StateStore};

/// Per-query options. `mode` overrides the engine's configured mode for
/// this call only; `cancel` propagates into the embedder and the fan-out.
#[derive(Clone, Default)]
pub struct QueryOptions {
    pub mode: Option<EngineMode>,
    pub cancel: Option<CancellationToken>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub enabled: bool,
    pub mode: EngineMode,
    pub active_name: Option<String>,
    pub loaded_names: Vec<String>,
    /// Chunk count per loaded KB, in the same order as `loaded_names`
    /// (and `list_kbs`).
    pub kb_chunk_counts: Vec<(String, usize)>,
    pub total_chunks: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddedKb {
    pub name: String,
    pub chunk_count: usize,
}

struct EngineInner {
    registry: KbRegistry,
    enabled: bool,
    mode: EngineMode,
    /// A system-KB load attempt is in flight.
    system_loading: bool,
    /// A system-KB load attempt succeeded; the scan never re-runs.
    system_loaded: bool,
}

enum Plan {
    Single(Arc<KnowledgeBase>),
    Multi(Vec<Arc<KnowledgeBase>>),
}

pub struct RagEngine {
    config: EngineConfig,
    adapter: EmbeddingAdapter,
    splitter: Arc<dyn Splitter>,
    bus: EventBus,
    store: StateStore,
    inner: Mutex<EngineInner>,
    /// Bumped after every finished load attempt so waiters re-check.
    load_signal: watch::Sender<u64>,
}

impl RagEngine {
    /// Build the engine from persisted state. Restoring into
    /// `enabled && MULTI` counts as entering MULTI, so the system-KB load
    /// happens before this returns.
    pub async fn load(
        config: EngineConfig,
        embedder: Arc<dyn Embedder>,
        splitter: Arc<dyn Splitter>,
    ) -> RagResult<Arc<Self>> {
        config.validate()?;

        let store = StateStore::new(config.state_path.clone());
        let persisted = store.load();
        info!(
            enabled = persisted.enabled,
            mode = %persisted.mode,
            active = %persisted.active_name,
            "Engine state loaded"
        );

        let mut registry = KbRegistry::default();
        registry.restore_active(&persisted.active_name);

        let adapter = EmbeddingAdapter::new(embedder, &config);
        let (load_signal, _) = watch::channel(0u64);
        let engine = Arc::new(Self {
            adapter,
            splitter,
            bus: EventBus::new(),
            store,
            inner: Mutex::new(EngineInner {
                registry,
                enabled: persisted.enabled,
                mode: persisted.mode,
                system_loading: false,
                system_loaded: false,
            }),
            load_signal,
            config,
        });

        engine.bus.emit(&RagEvent::StateLoaded {
            enabled: persisted.enabled,
            mode: persisted.mode,
            active_name: if persisted.active_name.is_empty() {
                None
            } else {
                Some(persisted.active_name.clone())
            },
        });

        if persisted.enabled && persisted.mode == EngineMode::Multi {
            if let Err(err) = engine.ensure_system_kbs_loaded().await {
                warn!("System KB load during startup failed: {err}");
            }
        }

        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a lifecycle listener. See [`EventBus::subscribe`].
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&RagEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(listener)
    }

    /// Merged view in listing order: system entries first, then user
    /// entries, user shadowing system on name collisions.
    pub fn list_kbs(&self) -> Vec<KbSummary> {
        self.inner.lock().registry.list()
    }

    pub fn status(&self) -> EngineStatus {
        let inner = self.inner.lock();
        let merged = inner.registry.merged();
        EngineStatus {
            enabled: inner.enabled,
            mode: inner.mode,
            active_name: inner.registry.active_name().map(str::to_string),
            loaded_names: merged.iter().map(|kb| kb.name.clone()).collect(),
            kb_chunk_counts: merged
                .iter()
                .map(|kb| (kb.name.clone(), kb.index.chunk_count()))
                .collect(),
            total_chunks: merged.iter().map(|kb| kb.index.chunk_count()).sum(),
            chunk_size: self.config.chunk_size,
            chunk_overlap: self.config.chunk_overlap,
        }
    }

    /// Ingest a file as a user KB. Ingestion runs without the engine mutex;
    /// the commit re-checks the name so concurrent adds resolve first-wins.
    /// Adding into an empty registry activates the new KB.
    pub async fn add_kb(&self, path: impl AsRef<Path>) -> RagResult<AddedKb> {
        let path = path.as_ref();
        let name = builder::kb_name_from_path(&dunce::canonicalize(path)?)?;

        // Fail fast before paying for chunking and embedding. The authoritative
        // check is the one at commit time.
        if self.inner.lock().registry.has_user(&name) {
            return Err(RagError::AlreadyExists(name));
        }

        let kb = builder::build_kb(
            path,
            KbOrigin::User,
            &self.config,
            self.splitter.as_ref(),
            &self.adapter,
            None,
        )
        .await?;
        let chunk_count = kb.index.chunk_count();

        let state = {
            let mut inner = self.inner.lock();
            let was_empty = inner.registry.is_empty();
            let kb = inner.registry.insert_user(kb)?;
            self.bus.emit(&RagEvent::KbAdded {
                name: kb.name.clone(),
                path: kb.source_path.clone(),
                chunk_count,
                origin: KbOrigin::User,
            });
            if was_empty {
                inner.registry.restore_active(&kb.name);
                Some(snapshot_state(&inner))
            } else {
                None
            }
        };
        if let Some(state) = state {
            self.persist(&state);
        }

        Ok(AddedKb { name, chunk_count })
    }

    /// Remove a KB by name (user tier first). Removing the active KB clears
    /// the active pointer.
    pub fn remove_kb(&self, name: &str) -> RagResult<()> {
        let state = {
            let mut inner = self.inner.lock();
            let was_active = inner.registry.active_name() == Some(name);
            inner
                .registry
                .remove(name, self.config.allow_remove_system_kb)?;
            self.bus.emit(&RagEvent::KbRemoved {
                name: name.to_string(),
            });
            was_active.then(|| snapshot_state(&inner))
        };
        if let Some(state) = state {
            self.persist(&state);
        }
        Ok(())
    }

    pub fn switch_kb(&self, name: &str) -> RagResult<()> {
        let state = {
            let mut inner = self.inner.lock();
            let kb = inner.registry.set_active(name)?;
            self.bus.emit(&RagEvent::KbSwitched {
                name: kb.name.clone(),
                path: kb.source_path.clone(),
            });
            snapshot_state(&inner)
        };
        self.persist(&state);
        Ok(())
    }

    /// Flip the enabled switch. Flipping to `true` while the mode is MULTI
    /// triggers the lazy system-KB load and waits for it.
    pub async fn set_enabled(&self, enabled: bool) -> RagResult<()> {
        let (state, need_load) = {
            let mut inner = self.inner.lock();
            let old = inner.enabled;
            inner.enabled = enabled;
            self.bus.emit(&RagEvent::EnabledChanged { old, new: enabled });
            let need_load = enabled
                && !old
                && inner.mode == EngineMode::Multi
                && !inner.system_loaded;
            (snapshot_state(&inner), need_load)
        };
        self.persist(&state);
        if need_load {
            self.ensure_system_kbs_loaded().await?;
        }
        Ok(())
    }

    /// Switch the retrieval mode. Entering MULTI triggers the lazy system-KB
    /// load; the call returns only once that load is complete.
    pub async fn set_mode(&self, mode: EngineMode) -> RagResult<()> {
        let (state, need_load) = {
            let mut inner = self.inner.lock();
            let old = inner.mode;
            inner.mode = mode;
            self.bus.emit(&RagEvent::ModeChanged { old, new: mode });
            let need_load = mode == EngineMode::Multi && !inner.system_loaded;
            (snapshot_state(&inner), need_load)
        };
        self.persist(&state);
        if need_load {
            self.ensure_system_kbs_loaded().await?;
        }
        Ok(())
    }

    /// Run a retrieval query. Preconditions are checked against a snapshot
    /// taken in one critical section, and the embedder is only consulted
    /// after every precondition passed.
    pub async fn query(&self, text: &str, opts: QueryOptions) -> RagResult<QueryResult> {
        if text.trim().is_empty() {
            return Err(RagError::InvalidArgument(
                "query text must not be empty".into(),
            ));
        }

        let plan = {
            let inner = self.inner.lock();
            if !inner.enabled {
                return Err(RagError::Disabled);
            }
            match opts.mode.unwrap_or(inner.mode) {
                EngineMode::Single => {
                    let kb = inner.registry.active().cloned().ok_or(RagError::NoActiveKb)?;
                    Plan::Single(kb)
                }
                EngineMode::Multi => {
                    let kbs = inner.registry.merged();
                    if kbs.is_empty() {
                        return Err(RagError::NoKbLoaded);
                    }
                    Plan::Multi(kbs)
                }
            }
        };

        let cancel = opts.cancel.as_ref();
        let query_vec = self.adapter.embed_query(text, cancel).await?;

        match plan {
            Plan::Single(kb) => planner::single_mode(
                &kb,
                &query_vec,
                self.config.max_retrieved_docs,
                self.config.min_relevance_score,
            ),
            Plan::Multi(kbs) => {
                planner::multi_mode(
                    &kbs,
                    &query_vec,
                    self.config.max_retrieved_docs,
                    self.config.min_relevance_score,
                    cancel,
                )
                .await
            }
        }
    }

    /// One-shot lazy system-KB load. The first caller becomes the loader;
    /// concurrent callers wait on the load signal instead of duplicating
    /// work, and re-check so a failed attempt can be retried later.
    async fn ensure_system_kbs_loaded(&self) -> RagResult<()> {
        let was_empty = loop {
            let mut rx = {
                let mut inner = self.inner.lock();
                if inner.system_loaded {
                    return Ok(());
                }
                if !inner.system_loading {
                    inner.system_loading = true;
                    break inner.registry.is_empty();
                }
                self.load_signal.subscribe()
            };
            let _ = rx.changed().await;
        };

        let outcome = self.run_system_kb_load().await;

        let state = {
            let mut inner = self.inner.lock();
            inner.system_loading = false;
            match &outcome {
                Ok(count) => {
                    inner.system_loaded = true;
                    let state = if was_empty && inner.registry.active().is_none() {
                        inner.registry.first_name().map(|first| {
                            inner.registry.restore_active(&first);
                            snapshot_state(&inner)
                        })
                    } else {
                        None
                    };
                    self.bus.emit(&RagEvent::SystemKbsLoaded { count: *count });
                    state
                }
                Err(_) => None,
            }
        };
        if let Some(state) = state {
            self.persist(&state);
        }

        // Wake waiters whether the attempt succeeded or not.
        self.load_signal.send_modify(|v| *v += 1);
        outcome.map(|_| ())
    }

    /// Scan the KB directory and ingest every `.txt` file. A single failing
    /// file is logged and skipped; it never aborts the rest of the load.
    async fn run_system_kb_load(&self) -> RagResult<usize> {
        info!(dir = %self.config.kb_dir.display(), "Loading system knowledge bases");
        let files = loader::discover_kb_files(&self.config.kb_dir)?;

        let mut count = 0usize;
        for file in &files {
            match builder::build_kb(
                file,
                KbOrigin::System,
                &self.config,
                self.splitter.as_ref(),
                &self.adapter,
                None,
            )
            .await
            {
                Ok(kb) => {
                    let mut inner = self.inner.lock();
                    let name = kb.name.clone();
                    let path = kb.source_path.clone();
                    let chunk_count = kb.index.chunk_count();
                    if inner.registry.insert_system(kb) {
                        self.bus.emit(&RagEvent::KbAdded {
                            name,
                            path,
                            chunk_count,
                            origin: KbOrigin::System,
                        });
                        count += 1;
                    } else {
                        debug!(kb = %name, "Skipping system KB shadowed by a user KB");
                    }
                }
                Err(err) => {
                    warn!(
                        file = %file.display(),
                        "Failed to ingest system KB, skipping: {err}"
                    );
                }
            }
        }

        info!(count, "System knowledge bases loaded");
        Ok(count)
    }

    /// Best-effort durability: persistence failures are logged, never
    /// surfaced to the mutating caller.
    fn persist(&self, state: &PersistedState) {
        if let Err(err) = self.store.save(state) {
            warn!("Failed to persist engine state: {err}");
        }
    }
}

fn snapshot_state(inner: &EngineInner) -> PersistedState {
    PersistedState {
        enabled: inner.enabled,
        mode: inner.mode,
        active_name: inner.registry.active_name().unwrap_or("").to_string(),
    }
}
