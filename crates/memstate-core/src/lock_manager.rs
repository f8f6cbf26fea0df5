//! Stripe-based per-fact exclusion
//!
//! Mutations on the same fact id are serialized by hashing lock keys to
//! stripes. Stripes are always acquired in ascending index order, so two
//! writers locking overlapping key sets cannot deadlock.

use crate::error::{MemstateError, Result};
use crate::observe;
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use xxhash_rust::xxh3::xxh3_64;

/// Default lock acquisition timeout (5 seconds)
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

fn stripe_indices<K: AsRef<[u8]>>(keys: &[K], num_stripes: usize) -> BTreeSet<usize> {
    keys.iter()
        .map(|k| (xxh3_64(k.as_ref()) as usize) % num_stripes)
        .collect()
}

/// Lock manager for threaded stores
///
/// # Example
///
/// ```
/// use memstate_core::LockManager;
/// use std::time::Duration;
///
/// let lm = LockManager::new(64, Duration::from_secs(1));
/// // order of keys does not matter, stripes are sorted before locking
/// let _guard = lm.acquire_keys(&[b"fact:b", b"fact:a"]).unwrap();
/// ```
pub struct LockManager {
    stripes: Vec<Mutex<()>>,
    default_timeout: Duration,
}

/// Guard holding every stripe of one acquisition
///
/// Released in reverse order when dropped.
pub struct MultiLockGuard<'a> {
    _guards: Vec<MutexGuard<'a, ()>>,
}

impl LockManager {
    /// Create a lock manager with `num_stripes` stripes
    ///
    /// # Panics
    ///
    /// Panics if `num_stripes` is 0.
    pub fn new(num_stripes: usize, default_timeout: Duration) -> Self {
        assert!(num_stripes > 0, "num_stripes must be positive");
        Self {
            stripes: (0..num_stripes).map(|_| Mutex::new(())).collect(),
            default_timeout,
        }
    }

    pub fn with_stripes(num_stripes: usize) -> Self {
        Self::new(num_stripes, Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS))
    }

    /// Acquire exclusive locks on all keys, deadlock-free
    ///
    /// Returns `LockTimeout` if any stripe cannot be acquired in time; stripes
    /// already taken are released before returning.
    pub fn acquire_keys<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<MultiLockGuard<'_>> {
        self.acquire_keys_with_timeout(keys, self.default_timeout)
    }

    pub fn acquire_keys_with_timeout<K: AsRef<[u8]>>(
        &self,
        keys: &[K],
        timeout: Duration,
    ) -> Result<MultiLockGuard<'_>> {
        let started = Instant::now();
        let indices = stripe_indices(keys, self.stripes.len());
        let mut guards = Vec::with_capacity(indices.len());

        for idx in indices {
            match self.stripes[idx].try_lock_for(timeout) {
                Some(guard) => guards.push(guard),
                None => {
                    return Err(MemstateError::LockTimeout {
                        timeout_ms: timeout.as_millis() as u64,
                    })
                }
            }
        }

        observe::record_lock_wait(started.elapsed());
        Ok(MultiLockGuard { _guards: guards })
    }

    pub fn num_stripes(&self) -> usize {
        self.stripes.len()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}

/// Lock manager for cooperatively scheduled stores
///
/// Guards are owned so they can be moved into a spawned task and held
/// across suspend points.
pub struct AsyncLockManager {
    stripes: Vec<Arc<tokio::sync::Mutex<()>>>,
    default_timeout: Duration,
}

/// Owned guard set returned by [`AsyncLockManager::acquire_keys`]
pub struct OwnedMultiLockGuard {
    _guards: Vec<tokio::sync::OwnedMutexGuard<()>>,
}

impl AsyncLockManager {
    /// # Panics
    ///
    /// Panics if `num_stripes` is 0.
    pub fn new(num_stripes: usize, default_timeout: Duration) -> Self {
        assert!(num_stripes > 0, "num_stripes must be positive");
        Self {
            stripes: (0..num_stripes)
                .map(|_| Arc::new(tokio::sync::Mutex::new(())))
                .collect(),
            default_timeout,
        }
    }

    pub fn with_stripes(num_stripes: usize) -> Self {
        Self::new(num_stripes, Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS))
    }

    /// Acquire exclusive locks on all keys in sorted stripe order
    ///
    /// The whole acquisition shares one deadline.
    pub async fn acquire_keys<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<OwnedMultiLockGuard> {
        let timeout = self.default_timeout;
        let started = Instant::now();
        let indices = stripe_indices(keys, self.stripes.len());

        let acquire = async {
            let mut guards = Vec::with_capacity(indices.len());
            for idx in indices {
                guards.push(self.stripes[idx].clone().lock_owned().await);
            }
            guards
        };

        match tokio::time::timeout(timeout, acquire).await {
            Ok(guards) => {
                observe::record_lock_wait(started.elapsed());
                Ok(OwnedMultiLockGuard { _guards: guards })
            }
            Err(_) => Err(MemstateError::LockTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    pub fn num_stripes(&self) -> usize {
        self.stripes.len()
    }
}
