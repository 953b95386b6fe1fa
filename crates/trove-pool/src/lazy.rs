use std::fmt;
use std::sync::Weak;

use trove_types::Pid;

use crate::error::{PoolError, PoolResult};
use crate::node::ObjectRef;
use crate::pool::{ObjectPool, PoolShared};

/// Placeholder for a stored object that has not been loaded yet.
///
/// Produced when a pointer is decoded. Holds only the pid and a weak
/// handle to the pool; nothing is fetched until
/// [`materialize`](LazyProxy::materialize) is called, usually through
/// [`Node::resolve`](crate::Node::resolve).
#[derive(Clone)]
pub struct LazyProxy {
    pid: Pid,
    pool: Weak<PoolShared>,
}

impl LazyProxy {
    pub(crate) fn new(pid: Pid, pool: Weak<PoolShared>) -> Self {
        Self { pid, pool }
    }

    pub fn pid(&self) -> &Pid {
        &self.pid
    }

    /// Load the referenced object, or return the already-materialized
    /// instance for this pid.
    pub async fn materialize(&self) -> PoolResult<ObjectRef> {
        let pool = ObjectPool::from_weak(&self.pool).ok_or(PoolError::PoolClosed)?;
        pool.load(&self.pid).await
    }

    /// The materialized object for this pid, if one is live. Never fetches.
    pub fn peek(&self) -> Option<ObjectRef> {
        ObjectPool::from_weak(&self.pool)?.lookup(&self.pid)
    }
}

impl fmt::Debug for LazyProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LazyProxy({})", self.pid.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{memory_pool, NOTE};

    #[tokio::test]
    async fn materialize_after_pool_drop_fails() {
        let (pool, _) = memory_pool();
        let proxy = LazyProxy::new(Pid::generate(), pool.downgrade());
        drop(pool);
        assert!(matches!(
            proxy.materialize().await,
            Err(PoolError::PoolClosed)
        ));
        assert!(proxy.peek().is_none());
    }

    #[tokio::test]
    async fn missing_record_is_dangling() {
        let (pool, store) = memory_pool();
        let pid = Pid::generate();
        let proxy = LazyProxy::new(pid.clone(), pool.downgrade());
        let err = proxy.materialize().await.unwrap_err();
        assert!(matches!(err, PoolError::DanglingReference { pid: p } if p == pid));
        assert_eq!(store.get_count(pid.as_str()), 1);
    }

    #[tokio::test]
    async fn peek_sees_live_objects_only() {
        let (pool, _) = memory_pool();
        let note = pool.create(&NOTE).unwrap();
        let pid = pool.allocate_pid(&note);
        let proxy = LazyProxy::new(pid, pool.downgrade());
        assert!(proxy.peek().is_some());

        drop(note);
        assert!(proxy.peek().is_none());
    }
}
