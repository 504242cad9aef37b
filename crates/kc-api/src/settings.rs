//! # Settings Cache
//!
//! Process-wide, read-mostly cache in front of the setting store. The store
//! of record is Postgres when connected; an in-process copy of it backs the
//! cache so that synchronous price computations never touch the database.
//!
//! Writes go database → backing map → cache invalidation, all before
//! [`SettingsCache::set`] returns, so the next read observes the new value.
//! A read already holding a value keeps it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use sqlx::PgPool;

use kc_core::{Money, PricingError, SettingsProvider, KIT_BASE_PRICE_KEY, KIT_SHIPPING_FEE_KEY};
use kc_state::SubscriptionTier;

/// Seed values applied at startup for keys the store does not yet hold.
pub fn default_settings() -> HashMap<String, Money> {
    let mut seed = HashMap::from([
        (KIT_BASE_PRICE_KEY.to_string(), Money::from_minor_units(35_000)),
        (KIT_SHIPPING_FEE_KEY.to_string(), Money::from_minor_units(12_000)),
    ]);
    for (tier, minor) in [
        (SubscriptionTier::OneTime, 47_000),
        (SubscriptionTier::AnnualModerate, 80_000),
        (SubscriptionTier::AnnualHigh, 150_000),
    ] {
        seed.insert(tier.price_setting_key(), Money::from_minor_units(minor));
    }
    seed
}

/// Read-through cache over the in-process setting store.
#[derive(Debug, Clone, Default)]
pub struct SettingsCache {
    backing: Arc<RwLock<HashMap<String, Money>>>,
    cache: Arc<RwLock<HashMap<String, Money>>>,
}

impl SettingsCache {
    pub fn new(seed: HashMap<String, Money>) -> Self {
        Self {
            backing: Arc::new(RwLock::new(seed)),
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Read a setting, filling the cache on a miss.
    pub fn get(&self, key: &str) -> Option<Money> {
        if let Some(value) = self.cache.read().get(key) {
            return Some(*value);
        }
        // Fill under the backing read lock so a concurrent `set` cannot
        // slip between the read and the cache insert.
        let backing = self.backing.read();
        let value = *backing.get(key)?;
        self.cache.write().insert(key.to_string(), value);
        Some(value)
    }

    /// Write a setting through to the database (if connected) and the
    /// backing map, then drop the cached entry.
    pub async fn set(&self, pool: Option<&PgPool>, key: &str, value: Money) -> Result<(), sqlx::Error> {
        if let Some(pool) = pool {
            crate::db::settings::upsert(pool, key, value).await?;
        }
        let mut backing = self.backing.write();
        backing.insert(key.to_string(), value);
        self.cache.write().remove(key);
        tracing::debug!(key, value = %value, "setting updated, cache entry invalidated");
        Ok(())
    }

    /// Replace backing values with rows loaded from the database and clear
    /// the cache.
    pub fn load(&self, entries: impl IntoIterator<Item = (String, Money)>) {
        let mut backing = self.backing.write();
        backing.extend(entries);
        self.cache.write().clear();
    }

    /// Read several settings under one lock, so they all come from the same
    /// version of the store. Missing keys are left out.
    pub fn read_together(&self, keys: &[&str]) -> HashMap<String, Money> {
        // `set` invalidates while holding the backing write lock, so cache
        // entries seen under the read lock match the backing map.
        let backing = self.backing.read();
        let mut cache = self.cache.write();
        keys.iter()
            .filter_map(|key| {
                let value = match cache.get(*key) {
                    Some(value) => *value,
                    None => {
                        let value = *backing.get(*key)?;
                        cache.insert(key.to_string(), value);
                        value
                    }
                };
                Some((key.to_string(), value))
            })
            .collect()
    }

    /// All settings, sorted by key.
    pub fn snapshot(&self) -> BTreeMap<String, Money> {
        self.backing
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Number of cached entries.
    pub fn cached_len(&self) -> usize {
        self.cache.read().len()
    }
}

impl SettingsProvider for SettingsCache {
    fn decimal(&self, key: &str) -> Result<Money, PricingError> {
        self.get(key)
            .ok_or_else(|| PricingError::MissingSetting(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kc_core::PriceCalculator;

    #[test]
    fn default_kit_price_is_470() {
        let cache = SettingsCache::new(default_settings());
        assert_eq!(PriceCalculator::kit_price(&cache).unwrap().to_string(), "470.00");
    }

    #[test]
    fn default_tier_prices() {
        let cache = SettingsCache::new(default_settings());
        let key = SubscriptionTier::AnnualModerate.price_setting_key();
        assert_eq!(cache.get(&key).unwrap().to_string(), "800.00");
    }

    #[test]
    fn reads_populate_cache() {
        let cache = SettingsCache::new(default_settings());
        assert_eq!(cache.cached_len(), 0);
        cache.get(KIT_BASE_PRICE_KEY);
        cache.get(KIT_BASE_PRICE_KEY);
        assert_eq!(cache.cached_len(), 1);
    }

    #[tokio::test]
    async fn set_invalidates_before_next_read() {
        let cache = SettingsCache::new(default_settings());
        assert_eq!(PriceCalculator::kit_price(&cache).unwrap().to_string(), "470.00");
        cache
            .set(None, KIT_SHIPPING_FEE_KEY, Money::parse("80.00").unwrap())
            .await
            .unwrap();
        assert_eq!(PriceCalculator::kit_price(&cache).unwrap().to_string(), "430.00");
    }

    #[tokio::test]
    async fn quote_components_add_up_across_updates() {
        let cache = SettingsCache::new(default_settings());
        let keys = [KIT_BASE_PRICE_KEY, KIT_SHIPPING_FEE_KEY];
        let writer = {
            let cache = cache.clone();
            tokio::spawn(async move {
                for minor in 0..200 {
                    cache
                        .set(None, KIT_SHIPPING_FEE_KEY, Money::from_minor_units(minor))
                        .await
                        .unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };
        for _ in 0..200 {
            let quote = PriceCalculator::kit_quote(&cache.read_together(&keys)).unwrap();
            assert_eq!(
                quote.base_price.checked_add(quote.shipping_fee).map(|m| m.round_currency()),
                Some(quote.total)
            );
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
    }

    #[test]
    fn missing_key_is_pricing_error() {
        let cache = SettingsCache::new(HashMap::new());
        assert_eq!(
            cache.decimal(KIT_BASE_PRICE_KEY),
            Err(PricingError::MissingSetting(KIT_BASE_PRICE_KEY.to_string()))
        );
    }

    #[test]
    fn load_overrides_seed() {
        let cache = SettingsCache::new(default_settings());
        cache.get(KIT_BASE_PRICE_KEY);
        cache.load([(KIT_BASE_PRICE_KEY.to_string(), Money::from_minor_units(40_000))]);
        assert_eq!(cache.get(KIT_BASE_PRICE_KEY).unwrap().to_string(), "400.00");
    }
}
