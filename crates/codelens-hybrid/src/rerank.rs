//! Resource-gated cross-encoder reranking.
//!
//! Lifecycle: `Disabled -> Unloaded -> Loaded`. Feasibility (feature on, a
//! loader present, and enough free device memory or host fallback allowed)
//! is re-checked on every call; failing it drops the model and returns to
//! `Disabled`. Inference failures suspend reranking for the current
//! [`SearchSession`] only.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, info, warn};

use codelens_core::config::RerankerSettings;
use codelens_core::traits::{MemoryGauge, ModelLoader, RelevanceModel};
use codelens_core::types::{assign_ranks, SearchResult, SourceTag};
use codelens_core::Error;

use crate::context::SearchSession;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankerState {
    Disabled,
    Unloaded,
    Loaded,
}

impl RerankerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => RerankerState::Unloaded,
            2 => RerankerState::Loaded,
            _ => RerankerState::Disabled,
        }
    }
}

impl fmt::Display for RerankerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RerankerState::Disabled => "disabled",
            RerankerState::Unloaded => "unloaded",
            RerankerState::Loaded => "loaded",
        })
    }
}

enum Slot {
    Disabled,
    Unloaded,
    Loaded(Arc<dyn RelevanceModel>),
}

impl Slot {
    fn state(&self) -> RerankerState {
        match self {
            Slot::Disabled => RerankerState::Disabled,
            Slot::Unloaded => RerankerState::Unloaded,
            Slot::Loaded(_) => RerankerState::Loaded,
        }
    }
}

/// Collaborators a reranker needs; absent parts leave it disabled.
#[derive(Clone)]
pub struct RerankerParts {
    pub loader: Arc<dyn ModelLoader>,
    pub memory: Arc<dyn MemoryGauge>,
}

pub struct RerankingEngine {
    settings: RerankerSettings,
    parts: Option<RerankerParts>,
    slot: Mutex<Slot>,
    /// Last state written under the slot lock, readable while a load holds it.
    published: AtomicU8,
}

impl RerankingEngine {
    pub fn new(settings: RerankerSettings, parts: Option<RerankerParts>) -> Self {
        Self { settings, parts, slot: Mutex::new(Slot::Disabled), published: AtomicU8::new(RerankerState::Disabled as u8) }
    }

    pub fn disabled() -> Self {
        Self::new(RerankerSettings { enabled: false, ..Default::default() }, None)
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn is_feasible(&self) -> bool {
        let Some(parts) = &self.parts else { return false };
        if !self.settings.enabled {
            return false;
        }
        let enough = parts
            .memory
            .free_memory_bytes()
            .is_some_and(|free| free >= self.settings.min_free_memory_mb.saturating_mul(MIB));
        enough || self.settings.allow_host_fallback
    }

    fn publish(&self, slot: &Slot) {
        self.published.store(slot.state() as u8, Ordering::SeqCst);
    }

    /// Apply the feasibility check to the current slot.
    fn refresh(&self, slot: &mut Slot) -> bool {
        let feasible = self.is_feasible();
        match (&*slot, feasible) {
            (Slot::Disabled, true) => *slot = Slot::Unloaded,
            (Slot::Loaded(_), false) => {
                info!("reranker no longer feasible, unloading model");
                *slot = Slot::Disabled;
            }
            (Slot::Unloaded, false) => *slot = Slot::Disabled,
            _ => {}
        }
        self.publish(slot);
        feasible
    }

    /// Current state. Does not wait for a model load in progress; while one
    /// runs, the last published state (`Unloaded`) is reported.
    pub fn state(&self) -> RerankerState {
        let mut slot = match self.slot.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return RerankerState::from_u8(self.published.load(Ordering::SeqCst)),
        };
        self.refresh(&mut slot);
        slot.state()
    }

    /// Drop the model if loaded. The next feasible call loads it again.
    pub fn unload(&self) {
        let mut slot = self.lock();
        if matches!(*slot, Slot::Loaded(_)) {
            debug!("reranker model unloaded");
            *slot = Slot::Unloaded;
            self.publish(&slot);
        }
    }

    /// Loaded model, loading it under the state lock on first use.
    fn model(&self, cancel: Option<&AtomicBool>) -> Option<Arc<dyn RelevanceModel>> {
        let mut slot = self.lock();
        if !self.refresh(&mut slot) {
            return None;
        }
        if let Slot::Loaded(model) = &*slot {
            return Some(model.clone());
        }
        let parts = self.parts.as_ref()?;
        let started = Instant::now();
        match parts.loader.load() {
            Ok(model) => {
                if cancel.is_some_and(|c| c.load(Ordering::SeqCst)) {
                    debug!("reranker preload cancelled before commit");
                    return None;
                }
                info!(ms = started.elapsed().as_millis() as u64, "reranker model loaded");
                *slot = Slot::Loaded(model.clone());
                self.publish(&slot);
                Some(model)
            }
            Err(e) => {
                warn!(error = %e, "reranker model failed to load");
                None
            }
        }
    }

    /// Rescore the head of `candidates` with the cross-encoder.
    ///
    /// The top `top_k_candidates` are rescored and tagged `Reranked`; the rest
    /// follow in their prior order carrying the lowest rescored score. When
    /// the session is suspended, no model is available, or scoring fails, the
    /// input comes back unchanged (a failure also suspends the session).
    pub fn apply(&self, session: &SearchSession, query: &str, candidates: Vec<SearchResult>, k: usize) -> Vec<SearchResult> {
        if candidates.is_empty() || session.is_reranking_suspended() {
            return candidates;
        }
        let Some(model) = self.model(None) else { return candidates };

        let head_len = self.settings.top_k_candidates.min(candidates.len());
        let passages: Vec<&str> = candidates[..head_len].iter().map(|c| c.metadata.content.as_str()).collect();
        let scores = match model.score(query, &passages) {
            Ok(s) if s.len() == head_len && s.iter().all(|x| x.is_finite()) => s,
            Ok(s) => {
                let err = Error::ResourceExhausted(format!("reranker returned {} scores for {head_len} passages", s.len()));
                warn!(error = %err, "reranking suspended for this search");
                session.suspend_reranking();
                return candidates;
            }
            Err(e) => {
                let err = Error::ResourceExhausted(e.to_string());
                warn!(error = %err, "reranking suspended for this search");
                session.suspend_reranking();
                return candidates;
            }
        };

        let mut rest = candidates;
        let tail = rest.split_off(head_len);
        let mut head: Vec<SearchResult> = rest
            .into_iter()
            .zip(scores)
            .map(|(mut r, s)| {
                r.score = s;
                r.source = SourceTag::Reranked;
                r
            })
            .collect();
        head.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk_id.cmp(&b.chunk_id)));
        let floor = head.last().map(|r| r.score).unwrap_or(0.0);
        head.extend(tail.into_iter().map(|mut r| {
            r.score = floor;
            r
        }));
        head.truncate(k);
        assign_ranks(&mut head);
        head
    }

    /// Load the model on a background thread. Cancelling the handle before
    /// the load commits leaves the engine unloaded.
    pub fn preload_in_background(self: &Arc<Self>) -> PreloadHandle {
        let cancel = Arc::new(AtomicBool::new(false));
        let engine = Arc::clone(self);
        let flag = Arc::clone(&cancel);
        let spawned = std::thread::Builder::new().name("codelens-rerank-preload".to_string()).spawn(move || {
            if flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = engine.model(Some(&flag));
        });
        let thread = match spawned {
            Ok(t) => Some(t),
            Err(e) => {
                warn!(error = %e, "could not start reranker preload");
                None
            }
        };
        PreloadHandle { cancel, thread }
    }
}

/// Handle to a background model load. Dropping it cancels and joins.
pub struct PreloadHandle {
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PreloadHandle {
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Wait for the load to finish.
    pub fn join(mut self) {
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for PreloadHandle {
    fn drop(&mut self) {
        if let Some(t) = self.thread.take() {
            self.cancel.store(true, Ordering::SeqCst);
            let _ = t.join();
        }
    }
}
