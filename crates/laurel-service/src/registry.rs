//! Badge registry with a read-through TTL cache.
//!
//! Definitions change rarely and are read on every progress update, so the
//! active set is cached for `ttl` behind a `tokio::sync::RwLock`. A failed load
//! is reported as a retryable error, never as "badge does not exist".
//! `invalidate` bumps a generation counter; a load that started before it is
//! returned to its caller but never installed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use laurel_core::{BadgeCategory, BadgeDefinition, BadgeId};

use crate::blocking::StoreRunner;
use crate::error::{EngineError, Result};

/// Cached active definitions.
struct RegistryCache {
    /// Active badges ordered by category then milestone.
    badges: Option<Arc<Vec<BadgeDefinition>>>,
    /// When the cache was last filled.
    loaded_at: Instant,
    /// Bumped by every invalidation.
    generation: u64,
}

impl RegistryCache {
    fn fresh(&self, ttl: Duration) -> Option<Arc<Vec<BadgeDefinition>>> {
        self.badges
            .as_ref()
            .filter(|_| self.loaded_at.elapsed() < ttl)
            .map(Arc::clone)
    }
}

/// Read access to badge definitions.
pub struct BadgeRegistry {
    runner: StoreRunner,
    ttl: Duration,
    cache: RwLock<RegistryCache>,
}

impl BadgeRegistry {
    /// Create a registry that trusts its cache for `ttl`.
    #[must_use]
    pub fn new(runner: StoreRunner, ttl: Duration) -> Self {
        Self {
            runner,
            ttl,
            cache: RwLock::new(RegistryCache {
                badges: None,
                loaded_at: Instant::now(),
                generation: 0,
            }),
        }
    }

    /// All active badges, ordered by category then milestone.
    ///
    /// # Errors
    ///
    /// Returns a retryable error if the definitions cannot be loaded.
    pub async fn list_active(&self) -> Result<Arc<Vec<BadgeDefinition>>> {
        let generation = {
            let cache = self.cache.read().await;
            if let Some(badges) = cache.fresh(self.ttl) {
                return Ok(badges);
            }
            cache.generation
        };

        // Cache miss or expired
        let badges = self.load().await?;
        self.install(generation, &badges).await;
        Ok(badges)
    }

    async fn load(&self) -> Result<Arc<Vec<BadgeDefinition>>> {
        let mut badges = self.runner.run("list_badges", |s| s.list_badges()).await?;
        badges.retain(|b| b.is_active);
        badges.sort_by(|a, b| {
            a.category
                .cmp(&b.category)
                .then(a.milestone_count.cmp(&b.milestone_count))
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(Arc::new(badges))
    }

    /// Cache `badges` unless the registry was invalidated after `generation`.
    async fn install(&self, generation: u64, badges: &Arc<Vec<BadgeDefinition>>) {
        let mut cache = self.cache.write().await;
        if cache.generation != generation {
            tracing::debug!("Discarding badge snapshot loaded before invalidation");
            return;
        }
        cache.badges = Some(Arc::clone(badges));
        cache.loaded_at = Instant::now();
        tracing::debug!(count = badges.len(), "Badge registry loaded");
    }

    /// Look up an active badge by its unique name.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotFound` if no active badge has this name.
    pub async fn get_by_name(&self, name: &str) -> Result<BadgeDefinition> {
        self.list_active()
            .await?
            .iter()
            .find(|b| b.name == name)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("badge {name}")))
    }

    /// Look up an active badge by id.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotFound` if no active badge has this id.
    pub async fn get_by_id(&self, badge_id: &BadgeId) -> Result<BadgeDefinition> {
        self.list_active()
            .await?
            .iter()
            .find(|b| b.id == *badge_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("badge {badge_id}")))
    }

    /// Active badges in one category.
    ///
    /// # Errors
    ///
    /// Returns a retryable error if the definitions cannot be loaded.
    pub async fn by_category(&self, category: BadgeCategory) -> Result<Vec<BadgeDefinition>> {
        Ok(self
            .list_active()
            .await?
            .iter()
            .filter(|b| b.category == category)
            .cloned()
            .collect())
    }

    /// Drop the cache; the next read goes to the store.
    pub async fn invalidate(&self) {
        let mut cache = self.cache.write().await;
        cache.badges = None;
        cache.generation += 1;
        drop(cache);
        tracing::debug!("Badge registry invalidated");
    }

    /// Insert every definition in `catalog` whose name is not already stored.
    ///
    /// Returns how many were inserted.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidInput` for an invalid definition, or a store error.
    pub async fn seed(&self, catalog: Vec<BadgeDefinition>) -> Result<usize> {
        for badge in &catalog {
            badge
                .validate()
                .map_err(|e| EngineError::InvalidInput(e.to_string()))?;
        }

        let inserted = self
            .runner
            .run("seed_badges", move |s| {
                let existing: Vec<String> = s.list_badges()?.into_iter().map(|b| b.name).collect();
                let mut inserted = 0;
                for badge in catalog.iter().filter(|b| !existing.contains(&b.name)) {
                    s.put_badge(badge)?;
                    inserted += 1;
                }
                Ok(inserted)
            })
            .await?;

        if inserted > 0 {
            self.invalidate().await;
            tracing::info!(inserted, "Badge catalog seeded");
        }
        Ok(inserted)
    }
}
