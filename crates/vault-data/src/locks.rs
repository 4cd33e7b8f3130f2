//! The per-user exclusive lock registry (§5): one `tokio::sync::Mutex` per
//! user id, created lazily and never evicted. Each process (Gateway, Worker)
//! holds its own registry — there is no cross-process coordination, which is
//! consistent with the last-writer-wins, no-strong-read-your-writes contract.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

#[derive(Default)]
pub struct UserLockRegistry {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl UserLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, user_id: &str) -> Arc<Mutex<()>> {
        if let Some(existing) = self.locks.read().await.get(user_id) {
            return existing.clone();
        }
        let mut write = self.locks.write().await;
        write
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the exclusive lock for `user_id`, waiting if another task
    /// already holds it. Dropping the returned guard releases the lock.
    pub async fn lock(&self, user_id: &str) -> OwnedMutexGuard<()> {
        self.entry(user_id).await.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn serializes_access_for_same_user() {
        let registry = Arc::new(UserLockRegistry::new());
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let r1 = registry.clone();
        let o1 = order.clone();
        let t1 = tokio::spawn(async move {
            let _guard = r1.lock("alice").await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            o1.lock().await.push(1);
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        let r2 = registry.clone();
        let o2 = order.clone();
        let t2 = tokio::spawn(async move {
            let _guard = r2.lock("alice").await;
            o2.lock().await.push(2);
        });

        t1.await.unwrap();
        t2.await.unwrap();
        assert_eq!(*order.lock().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn different_users_do_not_contend() {
        let registry = UserLockRegistry::new();
        let _a = registry.lock("alice").await;
        let _b = tokio::time::timeout(Duration::from_millis(50), registry.lock("bob"))
            .await
            .expect("bob's lock should not wait on alice's");
        drop(_b);
    }
}
