//! Per-session rolling conversation window.

use std::{future::Future, sync::Arc};

use {
    dashmap::DashMap,
    tokio::sync::{Mutex, OwnedMutexGuard},
    tracing::debug,
};

use crate::{
    backend::HistoryBackend,
    error::Result,
    estimate::SizeEstimator,
    message::Turn,
};

type SessionLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// Keeps each session's history under a size ceiling.
///
/// Operations on one session are serialized through a per-session async
/// mutex; different sessions never contend. Each operation runs to
/// completion on its own task, so a caller that stops waiting cannot leave
/// a half-written history or a held lock behind.
pub struct ConversationStore {
    backend: Arc<dyn HistoryBackend>,
    estimator: Arc<dyn SizeEstimator>,
    max_size: usize,
    locks: SessionLocks,
}

impl ConversationStore {
    pub fn new(
        backend: Arc<dyn HistoryBackend>,
        estimator: Arc<dyn SizeEstimator>,
        max_size: usize,
    ) -> Self {
        Self {
            backend,
            estimator,
            max_size,
            locks: Arc::new(DashMap::new()),
        }
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Total estimated size of `turns`.
    #[must_use]
    pub fn size_of(&self, turns: &[Turn]) -> usize {
        self.estimator.total(turns)
    }

    /// Append a user turn, creating the session if needed, and return the
    /// full history. Never trims.
    pub async fn append_user(&self, session_id: &str, text: &str) -> Result<Vec<Turn>> {
        let turn = Turn::user(text);
        self.serialized(session_id, move |backend, id| async move {
            backend.append(&id, &turn).await?;
            backend.load(&id).await
        })
        .await
    }

    /// Append an assistant turn, then drop the oldest turns until the
    /// history fits the ceiling. A single turn larger than the ceiling is
    /// kept whole.
    pub async fn append_assistant_and_trim(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<Vec<Turn>> {
        let answer = Turn::assistant(text);
        let estimator = Arc::clone(&self.estimator);
        let max_size = self.max_size;
        self.serialized(session_id, move |backend, id| async move {
            let mut turns = backend.load(&id).await?;
            turns.push(answer.clone());

            let removed = trim_to_budget(&mut turns, estimator.as_ref(), max_size);
            if removed > 0 {
                debug!(session_id = %id, removed, remaining = turns.len(), "trimmed history");
                backend.store(&id, &turns).await?;
            } else {
                backend.append(&id, &answer).await?;
            }
            Ok(turns)
        })
        .await
    }

    /// Delete the session. Clearing an absent session is a no-op.
    pub async fn clear(&self, session_id: &str) -> Result<()> {
        self.serialized(session_id, |backend, id| async move {
            backend.remove(&id).await
        })
        .await
    }

    /// Current history without modifying it.
    pub async fn history(&self, session_id: &str) -> Result<Vec<Turn>> {
        self.serialized(session_id, |backend, id| async move { backend.load(&id).await })
            .await
    }

    /// Run `op` under the session's lock on a detached task.
    async fn serialized<T, F, Fut>(&self, session_id: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn HistoryBackend>, String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let locks = Arc::clone(&self.locks);
        let backend = Arc::clone(&self.backend);
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            let _guard = SessionGuard::acquire(locks, session_id.clone()).await;
            op(backend, session_id).await
        })
        .await?
    }
}

/// Holds one session's mutex and forgets it from the lock map on drop if
/// nobody else is waiting.
struct SessionGuard {
    locks: SessionLocks,
    session_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SessionGuard {
    async fn acquire(locks: SessionLocks, session_id: String) -> Self {
        let mutex = Arc::clone(locks.entry(session_id.clone()).or_default().value());
        let guard = mutex.lock_owned().await;
        Self {
            locks,
            session_id,
            guard: Some(guard),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // The count is checked under the shard lock, the same lock
        // `acquire` clones under, so a waiter can never be orphaned.
        self.locks
            .remove_if(&self.session_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Remove turns from the front until the total fits `max_size`, keeping at
/// least one turn. Returns how many were removed.
pub fn trim_to_budget(
    turns: &mut Vec<Turn>,
    estimator: &dyn SizeEstimator,
    max_size: usize,
) -> usize {
    let mut total = estimator.total(turns);
    let mut removed = 0;
    while total > max_size && removed + 1 < turns.len() {
        total -= estimator.turn_size(&turns[removed]);
        removed += 1;
    }
    turns.drain(..removed);
    removed
}
