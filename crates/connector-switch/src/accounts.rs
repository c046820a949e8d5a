//! # Account Cache
//!
//! The switch resolves the source account of every packet. Lookups go
//! through [`CachingAccountProvider`], which keeps found accounts for a fixed
//! time-to-live. Misses and failures are not cached.

use std::sync::Arc;
use std::time::{Duration, Instant};

use connector_core::{AccountId, AccountProvider, AccountProviderError, AccountSettings};
use dashmap::DashMap;

/// Default time an account stays cached.
pub const DEFAULT_ACCOUNT_CACHE_TTL: Duration = Duration::from_secs(30);

/// TTL cache in front of another [`AccountProvider`].
pub struct CachingAccountProvider {
    inner: Arc<dyn AccountProvider>,
    ttl: Duration,
    cache: DashMap<AccountId, (AccountSettings, Instant)>,
}

impl std::fmt::Debug for CachingAccountProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingAccountProvider")
            .field("ttl", &self.ttl)
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl CachingAccountProvider {
    /// Cache lookups against `inner` for `ttl`.
    pub fn new(inner: Arc<dyn AccountProvider>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: DashMap::new(),
        }
    }

    /// Drop the cached entry for one account.
    pub fn invalidate(&self, account_id: &AccountId) {
        self.cache.remove(account_id);
    }

    /// Drop every cached entry.
    pub fn invalidate_all(&self) {
        self.cache.clear();
    }
}

impl AccountProvider for CachingAccountProvider {
    fn lookup(&self, account_id: &AccountId) -> Result<Option<AccountSettings>, AccountProviderError> {
        if let Some(entry) = self.cache.get(account_id) {
            let (settings, cached_at) = entry.value();
            if cached_at.elapsed() < self.ttl {
                return Ok(Some(settings.clone()));
            }
        }
        let found = self.inner.lookup(account_id)?;
        match &found {
            Some(settings) => {
                self.cache
                    .insert(account_id.clone(), (settings.clone(), Instant::now()));
            }
            None => {
                self.cache.remove(account_id);
            }
        }
        Ok(found)
    }
}
