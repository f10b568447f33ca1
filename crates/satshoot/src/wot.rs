//! Web-of-trust scoring over the follow graph.
//!
//! Scores come from a bounded breadth-first walk of kind-3 follow lists
//! starting at the user: every follow seen at hop `n` adds
//! `first_hop_weight * hop_attenuation^(n-1)` to the followed key. Each
//! recompute builds a fresh [`ScoreSnapshot`] that replaces the previous one
//! in a single swap, so readers only ever see whole snapshots.

use crate::config::WotConfig;
use crate::error::{Result, SyncError};
use crate::persistence::Persistence;
use crate::transport::{Transport, fetch_events};
use async_trait::async_trait;
use nostr::{CONTACT_LIST_KIND, ContactList, Event, Filter};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Immutable trust scores from one recompute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    root: String,
    computed_at: u64,
    scores: HashMap<String, f64>,
}

impl ScoreSnapshot {
    pub fn new(root: impl Into<String>, computed_at: u64, scores: HashMap<String, f64>) -> Self {
        Self {
            root: root.into(),
            computed_at,
            scores,
        }
    }

    /// The key the walk started from.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Unix seconds of the recompute that produced this snapshot.
    pub fn computed_at(&self) -> u64 {
        self.computed_at
    }

    pub fn score(&self, pubkey: &str) -> f64 {
        self.scores.get(pubkey).copied().unwrap_or(0.0)
    }

    /// The root is always trusted; anyone else needs a positive score of at
    /// least `min_score`.
    pub fn is_trusted(&self, pubkey: &str, min_score: f64) -> bool {
        if pubkey == self.root {
            return true;
        }
        let score = self.score(pubkey);
        score > 0.0 && score >= min_score
    }

    /// Every trusted key, the root included.
    pub fn trusted(&self, min_score: f64) -> HashSet<String> {
        self.scores
            .iter()
            .filter(|(_, score)| **score > 0.0 && **score >= min_score)
            .map(|(pubkey, _)| pubkey.clone())
            .chain(std::iter::once(self.root.clone()))
            .collect()
    }

    pub fn scores(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.scores.iter()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Source of follow lists for the walk.
#[async_trait]
pub trait GraphSource: Send + Sync {
    /// The most recent follow list of each of `authors` that has one.
    async fn follow_lists(&self, authors: &[String]) -> Result<Vec<ContactList>>;
}

/// Reads follow lists from relays in author batches.
pub struct RelayGraphSource {
    transport: Arc<dyn Transport>,
    timeout: Duration,
    batch_size: usize,
}

impl RelayGraphSource {
    pub fn new(transport: Arc<dyn Transport>, config: &WotConfig) -> Self {
        Self {
            transport,
            timeout: config.fetch_timeout(),
            batch_size: config.author_batch_size.max(1),
        }
    }
}

#[async_trait]
impl GraphSource for RelayGraphSource {
    async fn follow_lists(&self, authors: &[String]) -> Result<Vec<ContactList>> {
        let mut latest: HashMap<String, Event> = HashMap::new();

        for batch in authors.chunks(self.batch_size) {
            let filter = Filter::new().kinds([CONTACT_LIST_KIND]).authors(batch.iter().cloned());
            let events = fetch_events(self.transport.as_ref(), vec![filter], self.timeout).await?;
            debug!("Fetched {} follow lists for {} authors", events.len(), batch.len());

            for event in events {
                // Replaceable: keep the newest per author, ties to the lower id.
                match latest.get(&event.pubkey) {
                    Some(current)
                        if (current.created_at, &event.id) > (event.created_at, &current.id) => {}
                    _ => {
                        latest.insert(event.pubkey.clone(), event);
                    }
                }
            }
        }

        Ok(latest
            .values()
            .filter_map(|event| match ContactList::from_event(event) {
                Ok(list) => Some(list),
                Err(e) => {
                    debug!("Skipping follow list {}: {}", event.id, e);
                    None
                }
            })
            .collect())
    }
}

/// Walk the follow graph from `root` and sum attenuated weights per key.
pub async fn compute_scores(
    root: &str,
    source: &dyn GraphSource,
    config: &WotConfig,
) -> Result<HashMap<String, f64>> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    let mut visited: HashSet<String> = HashSet::from([root.to_string()]);
    let mut frontier: Vec<String> = vec![root.to_string()];

    for hop in 1..=config.max_hops {
        if frontier.is_empty() {
            break;
        }

        let lists = source.follow_lists(&frontier).await?;
        if hop == 1 && !lists.iter().any(|list| list.owner == root) {
            return Err(SyncError::WotUnavailable(format!(
                "no follow list found for {}",
                root
            )));
        }

        let expected: HashSet<&str> = frontier.iter().map(String::as_str).collect();
        let weight = config.first_hop_weight * config.hop_attenuation.powi(hop as i32 - 1);
        let mut next = Vec::new();

        for list in &lists {
            if !expected.contains(list.owner.as_str()) {
                continue;
            }
            for followed in list.pubkeys() {
                if followed == root {
                    continue;
                }
                *scores.entry(followed.to_string()).or_insert(0.0) += weight;
                if visited.insert(followed.to_string()) {
                    next.push(followed.to_string());
                }
            }
        }

        debug!(
            "Hop {}: {} lists, {} new keys, weight {}",
            hop,
            lists.len(),
            next.len(),
            weight
        );
        frontier = next;
    }

    Ok(scores)
}

fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Owns the current trust snapshot and its refresh policy.
pub struct WotEngine {
    config: WotConfig,
    snapshot: RwLock<Option<Arc<ScoreSnapshot>>>,
    refresh: tokio::sync::Mutex<()>,
    persistence: Option<Arc<dyn Persistence>>,
}

impl WotEngine {
    pub fn new(config: WotConfig) -> Self {
        Self {
            config,
            snapshot: RwLock::new(None),
            refresh: tokio::sync::Mutex::new(()),
            persistence: None,
        }
    }

    /// Persist every successful recompute and allow [`WotEngine::load_persisted`].
    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn config(&self) -> &WotConfig {
        &self.config
    }

    /// Current snapshot; callers keep the `Arc`, never a handle into the engine.
    pub fn scores(&self) -> Option<Arc<ScoreSnapshot>> {
        self.snapshot.read().clone()
    }

    pub fn is_trusted(&self, pubkey: &str) -> bool {
        self.scores()
            .is_some_and(|snapshot| snapshot.is_trusted(pubkey, self.config.min_score))
    }

    pub fn trusted_set(&self) -> HashSet<String> {
        self.scores()
            .map(|snapshot| snapshot.trusted(self.config.min_score))
            .unwrap_or_default()
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale_at(now_secs())
    }

    /// Stale when nothing was ever computed or more than the refresh interval
    /// has passed since the last successful recompute. An empty snapshot
    /// still counts as fresh.
    pub fn is_stale_at(&self, now: u64) -> bool {
        match self.snapshot.read().as_ref() {
            None => true,
            Some(snapshot) => {
                now.saturating_sub(snapshot.computed_at) > self.config.refresh_interval_secs
            }
        }
    }

    /// Recompute from `source` and swap the result in. On failure the previous
    /// snapshot stays.
    pub async fn update_scores(
        &self,
        root: &str,
        source: &dyn GraphSource,
    ) -> Result<Arc<ScoreSnapshot>> {
        let _guard = self.refresh.lock().await;
        self.recompute(root, source).await
    }

    /// Recompute only when stale. Concurrent callers share one recompute: the
    /// ones that waited find a fresh snapshot and return it.
    pub async fn refresh_if_stale(
        &self,
        root: &str,
        source: &dyn GraphSource,
    ) -> Result<Option<Arc<ScoreSnapshot>>> {
        if !self.needs_refresh(root) {
            return Ok(self.scores());
        }

        let _guard = self.refresh.lock().await;
        if !self.needs_refresh(root) {
            debug!("Trust scores refreshed by a concurrent caller");
            return Ok(self.scores());
        }

        match self.recompute(root, source).await {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) if self.scores().is_some() => {
                warn!("Keeping previous trust scores: {}", e);
                Ok(self.scores())
            }
            Err(e) => Err(e),
        }
    }

    fn needs_refresh(&self, root: &str) -> bool {
        self.is_stale()
            || self
                .scores()
                .is_some_and(|snapshot| snapshot.root() != root)
    }

    async fn recompute(&self, root: &str, source: &dyn GraphSource) -> Result<Arc<ScoreSnapshot>> {
        info!("Recomputing web of trust for {}", root);
        let scores = match compute_scores(root, source, &self.config).await {
            Ok(scores) => scores,
            Err(e) => {
                warn!("Web of trust recompute failed: {}", e);
                return Err(e);
            }
        };

        let snapshot = Arc::new(ScoreSnapshot::new(root, now_secs(), scores));
        *self.snapshot.write() = Some(Arc::clone(&snapshot));
        info!("Web of trust updated: {} scored keys", snapshot.len());

        if let Some(persistence) = &self.persistence
            && let Err(e) = persistence.store_scores(&snapshot)
        {
            warn!("Failed to persist trust scores: {}", e);
        }
        Ok(snapshot)
    }

    /// Install a snapshot directly (restored or computed elsewhere).
    pub fn install(&self, snapshot: ScoreSnapshot) {
        *self.snapshot.write() = Some(Arc::new(snapshot));
    }

    /// Restore the persisted snapshot, if any.
    pub fn load_persisted(&self) -> Result<bool> {
        let Some(persistence) = &self.persistence else {
            return Ok(false);
        };
        match persistence.load_scores()? {
            Some(snapshot) => {
                debug!("Restored {} persisted trust scores", snapshot.len());
                self.install(snapshot);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Forget the snapshot and its persisted copy.
    pub fn clear(&self) -> Result<()> {
        *self.snapshot.write() = None;
        if let Some(persistence) = &self.persistence {
            persistence.clear_scores()?;
        }
        Ok(())
    }
}
