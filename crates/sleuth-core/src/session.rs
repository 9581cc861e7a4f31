//! Parking lot for suspended runs awaiting a human reply.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::types::ExecutionState;

#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    pub ttl: Duration,
    pub max_entries: usize,
    pub sweep_interval: Duration,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60),
            max_entries: 1000,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub state: ExecutionState,
    pub created_at: DateTime<Utc>,
    pub last_touched: DateTime<Utc>,
    inserted: Instant,
}

impl Session {
    fn age(&self) -> Duration {
        self.inserted.elapsed()
    }
}

/// Suspension id -> paused run. One coarse lock guards every access.
#[derive(Debug)]
pub struct SessionStore {
    config: SessionStoreConfig,
    sessions: Mutex<HashMap<String, Session>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SessionStoreConfig::default())
    }
}

impl SessionStore {
    pub fn new(config: SessionStoreConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SessionStoreConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a snapshot under a fresh id and return the id.
    pub fn insert(&self, state: ExecutionState) -> String {
        let id = Uuid::new_v4().to_string();
        self.insert_with_id(id.clone(), state);
        id
    }

    pub fn insert_with_id(&self, id: impl Into<String>, mut state: ExecutionState) {
        let id = id.into();
        let now = Utc::now();
        state.suspension_id = Some(id.clone());
        let session = Session {
            id: id.clone(),
            state,
            created_at: now,
            last_touched: now,
            inserted: Instant::now(),
        };
        self.lock().insert(id, session);
    }

    /// Look up without consuming. Expired entries are deleted on sight.
    pub fn get(&self, id: &str) -> Option<Session> {
        let mut sessions = self.lock();
        let expired = sessions.get(id)?.age() > self.config.ttl;
        if expired {
            sessions.remove(id);
            log::debug!("[{}] session expired on lookup", id);
            return None;
        }
        let session = sessions.get_mut(id)?;
        session.last_touched = Utc::now();
        Some(session.clone())
    }

    /// Atomic lookup-and-delete. The only way to resume a suspended run,
    /// so each id can be consumed once.
    pub fn take(&self, id: &str) -> Option<Session> {
        let session = self.lock().remove(id)?;
        if session.age() > self.config.ttl {
            log::debug!("[{}] session expired on resume", id);
            return None;
        }
        Some(session)
    }

    pub fn remove(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop expired entries, then evict the oldest beyond `max_entries`.
    pub fn sweep(&self) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        let ttl = self.config.ttl;
        sessions.retain(|_, session| session.age() <= ttl);

        if sessions.len() > self.config.max_entries {
            let mut by_age: Vec<(Instant, String)> = sessions
                .values()
                .map(|session| (session.inserted, session.id.clone()))
                .collect();
            by_age.sort();
            let excess = sessions.len() - self.config.max_entries;
            for (_, id) in by_age.into_iter().take(excess) {
                sessions.remove(&id);
            }
        }

        before - sessions.len()
    }

    /// Periodic background sweep until `shutdown` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let period = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = store.sweep();
                        if removed > 0 {
                            log::info!("session sweep removed {} entries", removed);
                        }
                    }
                }
            }
            log::debug!("session sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(input: &str) -> ExecutionState {
        ExecutionState::new(input, Vec::new())
    }

    fn store(ttl: Duration, max_entries: usize) -> SessionStore {
        SessionStore::new(SessionStoreConfig {
            ttl,
            max_entries,
            sweep_interval: Duration::from_secs(60),
        })
    }

    #[tokio::test]
    async fn take_is_single_use() {
        let store = SessionStore::default();
        let id = store.insert(state("boom"));

        let session = store.take(&id).unwrap();
        assert_eq!(session.state.original_input, "boom");
        assert_eq!(session.state.suspension_id.as_deref(), Some(id.as_str()));
        assert!(store.take(&id).is_none());
    }

    #[tokio::test]
    async fn get_does_not_consume() {
        let store = SessionStore::default();
        let id = store.insert(state("boom"));

        assert!(store.get(&id).is_some());
        assert!(store.get(&id).is_some());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_unreachable_without_sweep() {
        let store = store(Duration::from_secs(10), 10);
        let id = store.insert(state("old"));

        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(store.get(&id).is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_cannot_be_resumed() {
        let store = store(Duration::from_secs(10), 10);
        let id = store.insert(state("old"));

        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(store.take(&id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_expired_then_oldest() {
        let store = store(Duration::from_secs(100), 2);
        let stale = store.insert(state("stale"));
        tokio::time::advance(Duration::from_secs(101)).await;

        let first = store.insert(state("first"));
        tokio::time::advance(Duration::from_secs(1)).await;
        let second = store.insert(state("second"));
        tokio::time::advance(Duration::from_secs(1)).await;
        let third = store.insert(state("third"));

        assert_eq!(store.sweep(), 2);
        assert!(store.get(&stale).is_none());
        assert!(store.get(&first).is_none());
        assert!(store.get(&second).is_some());
        assert!(store.get(&third).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_until_shutdown() {
        let store = Arc::new(SessionStore::new(SessionStoreConfig {
            ttl: Duration::from_secs(5),
            max_entries: 10,
            sweep_interval: Duration::from_secs(1),
        }));
        store.insert(state("x"));
        let shutdown = CancellationToken::new();
        let handle = store.spawn_sweeper(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(store.is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_takes_yield_one_winner() {
        let store = Arc::new(SessionStore::default());
        let id = store.insert(state("race"));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let id = id.clone();
                tokio::spawn(async move { store.take(&id).is_some() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
