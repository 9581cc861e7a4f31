//! Finished analyses keyed by their normalised request, so a repeated
//! question is answered without another run.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::time::Instant;

use crate::agent::events::AnalysisResult;
use crate::agent::types::ContextFile;

#[derive(Debug, Clone)]
pub struct ResultCacheConfig {
    pub enabled: bool,
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for ResultCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(60 * 60),
            max_entries: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStats {
    pub enabled: bool,
    pub size: usize,
    pub max_size: usize,
    pub ttl: u64,
    pub usage_percent: f64,
}

/// Cache key for an analysis request: the trimmed input plus every context
/// file with its path and content trimmed.
pub fn cache_key(input: &str, context_files: &[ContextFile]) -> String {
    let files: Vec<_> = context_files
        .iter()
        .map(|file| {
            json!({
                "type": file.kind,
                "path": file.path.as_deref().unwrap_or_default().trim(),
                "content": file.content.trim(),
                "line_start": file.line_start,
                "line_end": file.line_end,
            })
        })
        .collect();
    json!({ "input": input.trim(), "context_files": files }).to_string()
}

#[derive(Debug)]
struct Entry {
    result: AnalysisResult,
    inserted: Instant,
    last_used: Instant,
}

/// One coarse lock over the whole map, like the session store.
#[derive(Debug)]
pub struct ResultCache {
    config: ResultCacheConfig,
    entries: Mutex<HashMap<String, Entry>>,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(ResultCacheConfig::default())
    }
}

impl ResultCache {
    pub fn new(config: ResultCacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ResultCacheConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached result for `key`. Expired entries are deleted on sight.
    pub fn get(&self, key: &str) -> Option<AnalysisResult> {
        if !self.config.enabled {
            return None;
        }
        let mut entries = self.lock();
        let expired = entries.get(key)?.inserted.elapsed() > self.config.ttl;
        if expired {
            entries.remove(key);
            log::debug!("cache entry expired on lookup");
            return None;
        }
        let entry = entries.get_mut(key)?;
        entry.last_used = Instant::now();
        Some(entry.result.clone())
    }

    /// Store a finished result. Results without any confidence are not
    /// worth repeating and are skipped; returns whether it was stored.
    pub fn put(&self, key: impl Into<String>, result: AnalysisResult) -> bool {
        if !self.config.enabled || result.confidence <= 0.0 || self.config.max_entries == 0 {
            return false;
        }
        let key = key.into();
        let mut entries = self.lock();
        if !entries.contains_key(&key) && entries.len() >= self.config.max_entries {
            let ttl = self.config.ttl;
            entries.retain(|_, entry| entry.inserted.elapsed() <= ttl);
            if entries.len() >= self.config.max_entries {
                let least_used = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_used)
                    .map(|(key, _)| key.clone());
                if let Some(least_used) = least_used {
                    entries.remove(&least_used);
                }
            }
        }
        let now = Instant::now();
        entries.insert(
            key,
            Entry {
                result,
                inserted: now,
                last_used: now,
            },
        );
        true
    }

    /// Drop every entry and return how many there were.
    pub fn clear(&self) -> usize {
        let mut entries = self.lock();
        let removed = entries.len();
        entries.clear();
        log::info!("result cache cleared ({} entries)", removed);
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let size = self.len();
        let max_size = self.config.max_entries;
        CacheStats {
            enabled: self.config.enabled,
            size,
            max_size,
            ttl: self.config.ttl.as_secs(),
            usage_percent: if max_size > 0 {
                size as f64 / max_size as f64 * 100.0
            } else {
                0.0
            },
        }
    }
}
