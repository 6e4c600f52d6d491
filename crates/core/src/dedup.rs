//! Bounded in-memory dedup decorator.
//!
//! A small LRU of identity hash to index future sitting above the queue (and
//! above the persistent antispam layer when both are configured). Unlike the
//! queue's in-flight map, which mirrors the batch window, this cache is
//! explicitly bounded to cap memory.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::{
    append::{Add, AddDecorator, AddDelegate},
    Entry, IdentityHash, IndexFuture,
};

struct CacheSlot {
    future: IndexFuture,
    tick: u64,
}

#[derive(Default)]
struct LruState {
    slots: HashMap<IdentityHash, CacheSlot>,
    // (tick, key) pairs in access order; stale pairs are skipped on eviction
    order: VecDeque<(u64, IdentityHash)>,
    tick: u64,
}

impl LruState {
    fn touch(&mut self, key: IdentityHash) -> u64 {
        self.tick += 1;
        self.order.push_back((self.tick, key));
        self.tick
    }

    fn evict_beyond(&mut self, capacity: usize) {
        while self.slots.len() > capacity {
            let Some((tick, key)) = self.order.pop_front() else {
                return;
            };

            // only evict if this pair is the key's latest access
            let current = self.slots.get(&key).map(|slot| slot.tick);
            if current == Some(tick) {
                self.slots.remove(&key);
                debug!(identity = %hex::encode(key), "evicted dedup cache slot");
            }
        }
    }
}

pub struct MemoryDedup {
    inner: Add,
    capacity: usize,
    state: Mutex<LruState>,
}

impl MemoryDedup {
    pub fn new(capacity: usize, inner: Add) -> Self {
        Self {
            inner,
            capacity,
            state: Mutex::new(LruState::default()),
        }
    }

    fn cached(&self, identity: &IdentityHash) -> Option<IndexFuture> {
        let mut state = self.state.lock().unwrap();

        let slot = state.slots.get(identity)?;
        let future = slot.future.clone();

        // a future that already failed is not worth handing out again
        if matches!(future.peek(), Some(Err(_))) {
            state.slots.remove(identity);
            return None;
        }

        let tick = state.touch(*identity);
        if let Some(slot) = state.slots.get_mut(identity) {
            slot.tick = tick;
        }

        Some(future)
    }

    fn insert(&self, identity: IdentityHash, future: IndexFuture) {
        let mut state = self.state.lock().unwrap();

        let tick = state.touch(identity);
        state.slots.insert(identity, CacheSlot { future, tick });
        state.evict_beyond(self.capacity);
    }
}

#[async_trait::async_trait]
impl AddDelegate for MemoryDedup {
    async fn add(&self, entry: Entry) -> IndexFuture {
        let identity = *entry.identity();

        if let Some(cached) = self.cached(&identity) {
            return cached.as_dup();
        }

        let future = self.inner.add(entry).await;
        self.insert(identity, future.clone());

        future
    }
}

/// Decorator constructor for the assembly options.
pub fn decorator(capacity: usize) -> AddDecorator {
    Box::new(move |inner| Arc::new(MemoryDedup::new(capacity, inner)))
}
