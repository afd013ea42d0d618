//! One pool per database.
//!
//! SQL Server connections are bound to a database at login, so reaching a
//! second database on the same server means a second pool. [`PoolCache`]
//! opens those lazily, probes each before publishing it, and keeps it for
//! the life of the cache.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{info, warn};
use warden_core::Result;

/// Opens and checks pools. The seam between [`PoolCache`] and the network.
#[async_trait]
pub trait PoolFactory: Send + Sync + 'static {
    /// A cheaply cloneable handle to a pool.
    type Pool: Clone + Send + Sync + 'static;

    /// Create a pool for `database`. Implementations may defer connecting.
    async fn open(&self, database: &str) -> Result<Self::Pool>;

    /// Round-trip to the server through `pool`.
    async fn probe(&self, database: &str, pool: &Self::Pool) -> Result<()>;
}

/// Append-only map from database name to pool.
pub struct PoolCache<F: PoolFactory> {
    factory: F,
    default_database: String,
    default_pool: F::Pool,
    pools: Mutex<HashMap<String, F::Pool>>,
}

impl<F: PoolFactory> PoolCache<F> {
    /// Open and probe the pool for `default_database`.
    pub async fn connect(factory: F, default_database: &str) -> Result<Self> {
        let default_pool = factory.open(default_database).await?;
        factory.probe(default_database, &default_pool).await?;
        Ok(Self {
            factory,
            default_database: default_database.to_owned(),
            default_pool,
            pools: Mutex::new(HashMap::new()),
        })
    }

    /// The pool for `database`. Empty names and the default database share
    /// the pool opened by [`PoolCache::connect`].
    pub async fn get(&self, database: &str) -> Result<F::Pool> {
        if database.is_empty() || database == self.default_database {
            return Ok(self.default_pool.clone());
        }
        let cached = self.lock().get(database).cloned();
        if let Some(pool) = cached {
            return Ok(pool);
        }

        // The lock is released while the new pool is probed.
        info!("opening pool for database {database}");
        let pool = self.factory.open(database).await?;
        self.factory.probe(database, &pool).await?;

        match self.lock().entry(database.to_owned()) {
            Entry::Occupied(winner) => {
                warn!("discarding duplicate pool for database {database}");
                Ok(winner.get().clone())
            }
            Entry::Vacant(slot) => Ok(slot.insert(pool).clone()),
        }
    }

    /// The pool opened by [`PoolCache::connect`].
    pub fn default_pool(&self) -> &F::Pool {
        &self.default_pool
    }

    /// Name of the database the default pool is bound to.
    pub fn default_database(&self) -> &str {
        &self.default_database
    }

    /// Number of non-default pools published so far.
    pub fn cached(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, F::Pool>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use futures::future::join_all;
    use warden_core::{Error, ErrorKind, Scope};

    #[derive(Default)]
    struct CountingFactory {
        opened: AtomicUsize,
        unreachable: Vec<&'static str>,
    }

    #[async_trait]
    impl PoolFactory for CountingFactory {
        type Pool = Arc<String>;

        async fn open(&self, database: &str) -> Result<Self::Pool> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(database.to_owned()))
        }

        async fn probe(&self, database: &str, _pool: &Self::Pool) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.unreachable.contains(&database) {
                return Err(Error::connectivity(
                    Scope::database("fake:1433", database),
                    "login timeout expired",
                ));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn default_database_uses_the_default_pool() {
        let cache = PoolCache::connect(CountingFactory::default(), "master")
            .await
            .unwrap();
        let default = cache.get("").await.unwrap();
        assert!(Arc::ptr_eq(&default, cache.default_pool()));
        assert!(Arc::ptr_eq(&cache.get("master").await.unwrap(), &default));
        assert_eq!(cache.cached(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_use_publishes_one_pool() {
        let cache = Arc::new(
            PoolCache::connect(CountingFactory::default(), "master")
                .await
                .unwrap(),
        );
        let handles = join_all((0..16).map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get("db1").await.unwrap() })
        }))
        .await
        .into_iter()
        .map(|h| h.unwrap())
        .collect::<Vec<_>>();

        assert_eq!(cache.cached(), 1);
        let published = cache.get("db1").await.unwrap();
        for handle in &handles {
            assert!(Arc::ptr_eq(handle, &published));
        }
    }

    #[tokio::test]
    async fn cached_pools_are_not_reopened() {
        let cache = PoolCache::connect(CountingFactory::default(), "master")
            .await
            .unwrap();
        cache.get("db1").await.unwrap();
        cache.get("db1").await.unwrap();
        cache.get("db2").await.unwrap();
        // master, db1, db2
        assert_eq!(cache.factory.opened.load(Ordering::SeqCst), 3);
        assert_eq!(cache.cached(), 2);
    }

    #[tokio::test]
    async fn failed_probes_are_not_cached() {
        let factory = CountingFactory {
            unreachable: vec!["offline"],
            ..Default::default()
        };
        let cache = PoolCache::connect(factory, "master").await.unwrap();
        let err = cache.get("offline").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connectivity);
        assert_eq!(err.scope().database.as_deref(), Some("offline"));
        assert_eq!(cache.cached(), 0);
    }

    #[tokio::test]
    async fn unreachable_default_database_fails_connect() {
        let factory = CountingFactory {
            unreachable: vec!["master"],
            ..Default::default()
        };
        assert!(PoolCache::connect(factory, "master").await.is_err());
    }
}
