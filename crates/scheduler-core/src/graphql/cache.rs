//! Small TTL caches for C2 (§3 "Caches"), per §9's "Caches" design note: a
//! concurrent map with per-entry expiry, opportunistic eviction on insert,
//! no background cleaner thread.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::graphql::types::Effect;

const EFFECT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const EFFECT_CACHE_MAX_SIZE: usize = 100;
const CAMPAIGN_ID_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

pub struct EffectCache {
    entries: DashMap<String, (Effect, DateTime<Utc>)>,
}

impl EffectCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, effect_id: &str) -> Option<Effect> {
        let entry = self.entries.get(effect_id)?;
        let (effect, expires_at) = entry.value();
        if *expires_at > Utc::now() {
            Some(effect.clone())
        } else {
            drop(entry);
            self.entries.remove(effect_id);
            None
        }
    }

    pub fn insert(&self, effect: Effect) {
        let expires_at = Utc::now() + chrono::Duration::from_std(EFFECT_CACHE_TTL).unwrap();
        self.entries.insert(effect.id.clone(), (effect, expires_at));
        if self.entries.len() > EFFECT_CACHE_MAX_SIZE {
            self.evict_expired();
        }
    }

    pub fn invalidate(&self, effect_id: &str) {
        self.entries.remove(effect_id);
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    fn evict_expired(&self) {
        let now = Utc::now();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
    }
}

impl Default for EffectCache {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CampaignIdCache {
    entry: DashMap<(), (Vec<String>, DateTime<Utc>)>,
}

impl CampaignIdCache {
    pub fn new() -> Self {
        Self {
            entry: DashMap::new(),
        }
    }

    pub fn get(&self) -> Option<Vec<String>> {
        let entry = self.entry.get(&())?;
        let (ids, expires_at) = entry.value();
        if *expires_at > Utc::now() {
            Some(ids.clone())
        } else {
            drop(entry);
            self.entry.clear();
            None
        }
    }

    pub fn insert(&self, ids: Vec<String>) {
        let expires_at = Utc::now() + chrono::Duration::from_std(CAMPAIGN_ID_CACHE_TTL).unwrap();
        self.entry.insert((), (ids, expires_at));
    }

    pub fn invalidate(&self) {
        self.entry.clear();
    }
}

impl Default for CampaignIdCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effect_cache_returns_none_after_invalidation() {
        let cache = EffectCache::new();
        cache.insert(Effect {
            id: "effect-1".to_string(),
            campaign_id: "campaign-1".to_string(),
            is_active: true,
        });
        assert!(cache.get("effect-1").is_some());
        cache.invalidate("effect-1");
        assert!(cache.get("effect-1").is_none());
    }

    #[test]
    fn campaign_id_cache_round_trips() {
        let cache = CampaignIdCache::new();
        assert!(cache.get().is_none());
        cache.insert(vec!["campaign-1".to_string(), "campaign-2".to_string()]);
        assert_eq!(cache.get().unwrap().len(), 2);
    }
}
