//! Signing token cache
//!
//! Process-wide store of single-use signing tokens, keyed by the
//! (signer, document) pair they bind. Every pair has its own async mutex:
//! issuing, redeeming and revoking for a pair are serialized, which is what
//! keeps "one unused token per pair" and "redeemed exactly once" true under
//! concurrent requests. Different pairs never wait on each other.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::model::SigningToken;

/// The pair a token binds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenKey {
    pub signer_id: String,
    pub document_id: String,
}

impl TokenKey {
    pub fn new(signer_id: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            signer_id: signer_id.into(),
            document_id: document_id.into(),
        }
    }
}

/// Tokens ever issued for one pair that have not been purged yet.
#[derive(Debug, Default)]
pub struct PairTokens {
    tokens: Vec<SigningToken>,
}

/// In-memory token store with per-pair serialization
pub struct TokenCache {
    pairs: DashMap<TokenKey, Arc<Mutex<PairTokens>>>,

    /// Token string lookup
    by_token: DashMap<String, TokenKey>,

    /// How long redeemed tokens are kept so replays are recognised
    used_retention: Duration,

    /// Last purge timestamp (unix seconds)
    last_purge: AtomicI64,

    purge_interval: Duration,
}

impl TokenCache {
    pub fn new(used_retention: Duration, purge_interval: Duration) -> Self {
        Self {
            pairs: DashMap::new(),
            by_token: DashMap::new(),
            used_retention,
            last_purge: AtomicI64::new(Utc::now().timestamp()),
            purge_interval,
        }
    }

    /// Lock the token slot of a pair, creating it if needed
    ///
    /// The lock owns a handle on the cache, so it can move into a spawned task.
    pub async fn lock_pair(self: &Arc<Self>, key: &TokenKey) -> PairLock {
        let slot = self
            .pairs
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(PairTokens::default())))
            .clone();
        PairLock {
            cache: Arc::clone(self),
            key: key.clone(),
            tokens: slot.lock_owned().await,
        }
    }

    /// Lock the pair a token belongs to
    pub async fn lock_token(self: &Arc<Self>, token: &str) -> Result<PairLock> {
        let key = self
            .by_token
            .get(token)
            .map(|k| k.clone())
            .ok_or(EngineError::TokenNotFound)?;
        let lock = self.lock_pair(&key).await;
        // Revoked or purged while we waited
        if lock.find(token).is_none() {
            return Err(EngineError::TokenNotFound);
        }
        Ok(lock)
    }

    /// Drop every token of a pair whose signer no longer exists
    pub async fn forget_pair(self: &Arc<Self>, key: &TokenKey) -> usize {
        let Some(slot) = self.pairs.get(key).map(|s| s.clone()) else {
            return 0;
        };
        let removed = {
            let mut lock = PairLock {
                cache: Arc::clone(self),
                key: key.clone(),
                tokens: slot.lock_owned().await,
            };
            lock.clear()
        };
        self.pairs.remove_if(key, |_, slot| Arc::strong_count(slot) == 1);
        debug!(signer_id = %key.signer_id, removed, "Forgot token pair");
        removed
    }

    /// Unused token of a pair without minting one
    pub async fn peek_unused(&self, key: &TokenKey) -> Option<SigningToken> {
        let slot = self.pairs.get(key).map(|s| s.clone())?;
        let tokens = slot.lock().await;
        tokens.tokens.iter().find(|t| !t.used).cloned()
    }

    pub fn stats(&self) -> TokenCacheStats {
        let mut stats = TokenCacheStats {
            pairs: self.pairs.len(),
            ..Default::default()
        };
        for slot in self.pairs.iter() {
            if let Ok(tokens) = slot.try_lock() {
                for t in &tokens.tokens {
                    if t.used {
                        stats.used_tokens += 1;
                    } else {
                        stats.unused_tokens += 1;
                    }
                }
            }
        }
        stats
    }

    /// Purge if the interval has elapsed. Only one caller wins the race.
    ///
    /// Used after a redeem; the background ticker calls `purge_used` directly.
    pub fn maybe_purge(&self) {
        let now = Utc::now().timestamp();
        let last = self.last_purge.load(Ordering::Relaxed);
        if now - last < self.purge_interval.as_secs() as i64 {
            return;
        }
        if self
            .last_purge
            .compare_exchange(last, now, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            self.purge_used();
        }
    }

    /// Drop redeemed tokens older than the retention period.
    ///
    /// Pairs that are locked right now are skipped and picked up next time.
    pub fn purge_used(&self) -> usize {
        self.last_purge.store(Utc::now().timestamp(), Ordering::Relaxed);
        let retention = chrono::Duration::from_std(self.used_retention)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let cutoff = Utc::now() - retention;
        let mut purged = Vec::new();

        self.pairs.retain(|_, slot| {
            let Ok(mut tokens) = slot.try_lock() else {
                return true;
            };
            tokens.tokens.retain(|t| {
                let expired = t.used_at.is_some_and(|at| at <= cutoff);
                if expired {
                    purged.push(t.token.clone());
                }
                !expired
            });
            // Someone may hold a clone and be about to lock it
            !tokens.tokens.is_empty() || Arc::strong_count(slot) > 1
        });

        for token in &purged {
            self.by_token.remove(token);
        }
        if !purged.is_empty() {
            info!("Purged {} redeemed signing tokens", purged.len());
        }
        purged.len()
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(7 * 24 * 3600), Duration::from_secs(300))
    }
}

/// Exclusive access to the tokens of one pair
pub struct PairLock {
    cache: Arc<TokenCache>,
    key: TokenKey,
    tokens: OwnedMutexGuard<PairTokens>,
}

impl PairLock {
    pub fn key(&self) -> &TokenKey {
        &self.key
    }

    pub fn find(&self, token: &str) -> Option<&SigningToken> {
        self.tokens.tokens.iter().find(|t| t.token == token)
    }

    /// The pair's outstanding token, if any
    pub fn unused(&self) -> Option<&SigningToken> {
        self.tokens.tokens.iter().find(|t| !t.used)
    }

    /// Return the outstanding token or mint a new one
    pub fn issue(&mut self) -> SigningToken {
        if let Some(existing) = self.unused() {
            debug!(signer_id = %self.key.signer_id, "Reusing outstanding signing token");
            return existing.clone();
        }

        let token = SigningToken {
            token: uuid::Uuid::new_v4().simple().to_string(),
            signer_id: self.key.signer_id.clone(),
            document_id: self.key.document_id.clone(),
            used: false,
            issued_at: Utc::now(),
            used_at: None,
        };
        self.cache.by_token.insert(token.token.clone(), self.key.clone());
        self.tokens.tokens.push(token.clone());

        info!(
            signer_id = %self.key.signer_id,
            document_id = %self.key.document_id,
            "Issued signing token"
        );
        token
    }

    /// Fail unless `token` is known to this pair and still unused
    pub fn ensure_unused(&self, token: &str) -> Result<&SigningToken> {
        let found = self.find(token).ok_or(EngineError::TokenNotFound)?;
        if found.used {
            return Err(EngineError::TokenAlreadyUsed);
        }
        Ok(found)
    }

    pub fn mark_used(&mut self, token: &str) -> Result<()> {
        self.ensure_unused(token)?;
        if let Some(t) = self.tokens.tokens.iter_mut().find(|t| t.token == token) {
            t.used = true;
            t.used_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Delete an unused token
    pub fn revoke(&mut self, token: &str) -> Result<()> {
        self.ensure_unused(token)?;
        self.tokens.tokens.retain(|t| t.token != token);
        self.cache.by_token.remove(token);
        info!(signer_id = %self.key.signer_id, "Revoked signing token");
        Ok(())
    }

    /// Delete the outstanding token, if any
    pub fn revoke_unused(&mut self) -> Option<SigningToken> {
        let pos = self.tokens.tokens.iter().position(|t| !t.used)?;
        let token = self.tokens.tokens.remove(pos);
        self.cache.by_token.remove(&token.token);
        info!(signer_id = %self.key.signer_id, "Revoked outstanding signing token");
        Some(token)
    }

    /// Delete every token of the pair, used or not
    pub fn clear(&mut self) -> usize {
        let removed = self.tokens.tokens.len();
        for t in self.tokens.tokens.drain(..) {
            self.cache.by_token.remove(&t.token);
        }
        removed
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenCacheStats {
    pub pairs: usize,
    pub unused_tokens: usize,
    pub used_tokens: usize,
}
