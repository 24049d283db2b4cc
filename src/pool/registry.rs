use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::{
    pool::PoolState,
    types::{EngineError, PoolId, Result},
};

/// One pool behind its state lock and its commit gate.
///
/// Quotes take the read lock; commits hold the gate for their whole lifetime
/// (including a settlement round trip) and take the write lock only to apply.
pub struct PoolHandle {
    pool_id: PoolId,
    state: RwLock<PoolState>,
    gate: Mutex<()>,
}

impl PoolHandle {
    pub fn new(state: PoolState) -> Self {
        Self {
            pool_id: state.pool_id().clone(),
            state: RwLock::new(state),
            gate: Mutex::new(()),
        }
    }

    pub fn pool_id(&self) -> &PoolId {
        &self.pool_id
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, PoolState>> {
        self.state
            .read()
            .map_err(|_| EngineError::invariant(format!("pool {} lock poisoned", self.pool_id)))
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, PoolState>> {
        self.state
            .write()
            .map_err(|_| EngineError::invariant(format!("pool {} lock poisoned", self.pool_id)))
    }

    pub fn snapshot(&self) -> Result<PoolState> {
        Ok(self.read()?.clone())
    }

    pub fn version(&self) -> Result<u64> {
        Ok(self.read()?.version())
    }

    /// Take the commit gate without waiting
    pub fn try_gate(&self) -> Result<MutexGuard<'_, ()>> {
        self.gate
            .try_lock()
            .map_err(|_| EngineError::PoolBusy(self.pool_id.clone()))
    }

    /// Wait for the commit gate
    pub async fn gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }
}

/// Pools by id. Pools are never removed.
#[derive(Default)]
pub struct PoolRegistry {
    pools: RwLock<BTreeMap<PoolId, Arc<PoolHandle>>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, state: PoolState) -> Result<Arc<PoolHandle>> {
        let pool_id = state.pool_id().clone();
        let mut pools = self
            .pools
            .write()
            .map_err(|_| EngineError::invariant("pool registry lock poisoned"))?;

        if pools.contains_key(&pool_id) {
            return Err(EngineError::PoolExists(pool_id));
        }

        let handle = Arc::new(PoolHandle::new(state));
        pools.insert(pool_id.clone(), handle.clone());
        info!("Registered pool: {}", pool_id);
        Ok(handle)
    }

    pub fn get(&self, pool_id: &str) -> Result<Arc<PoolHandle>> {
        self.pools
            .read()
            .map_err(|_| EngineError::invariant("pool registry lock poisoned"))?
            .get(pool_id)
            .cloned()
            .ok_or_else(|| EngineError::PoolNotFound(pool_id.to_string()))
    }

    pub fn contains(&self, pool_id: &str) -> bool {
        self.get(pool_id).is_ok()
    }

    /// Pool ids in lock order
    pub fn pool_ids(&self) -> Vec<PoolId> {
        self.pools
            .read()
            .map(|pools| pools.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.pools.read().map(|pools| pools.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handles for `pool_ids`, sorted into lock order
    pub fn handles(&self, pool_ids: &[PoolId]) -> Result<Vec<Arc<PoolHandle>>> {
        let mut ids = pool_ids.to_vec();
        ids.sort();
        ids.dedup();
        ids.iter().map(|pool_id| self.get(pool_id)).collect()
    }
}

/// Take every gate without waiting, in the order given
pub fn try_gates(handles: &[Arc<PoolHandle>]) -> Result<Vec<MutexGuard<'_, ()>>> {
    handles.iter().map(|handle| handle.try_gate()).collect()
}

/// Wait for every gate, in the order given
pub async fn lock_gates(handles: &[Arc<PoolHandle>]) -> Vec<MutexGuard<'_, ()>> {
    let mut guards = Vec::with_capacity(handles.len());
    for handle in handles {
        guards.push(handle.gate().await);
        debug!("Acquired commit gate for {}", handle.pool_id());
    }
    guards
}

pub fn read_all(handles: &[Arc<PoolHandle>]) -> Result<Vec<RwLockReadGuard<'_, PoolState>>> {
    handles.iter().map(|handle| handle.read()).collect()
}

pub fn write_all(handles: &[Arc<PoolHandle>]) -> Result<Vec<RwLockWriteGuard<'_, PoolState>>> {
    handles.iter().map(|handle| handle.write()).collect()
}
