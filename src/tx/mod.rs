//! Write serialization.
//!
//! Per-node writes (`upsert`, `freeze`, `unfreeze`, `remove`, evict) hold a
//! per-id lock for their whole read-validate-write sequence, so two writers
//! on the same id never interleave. Locks are striped: ids hash onto a fixed
//! set of mutexes, so unrelated ids rarely contend and nothing grows with the
//! number of nodes.

use std::hash::{BuildHasher, Hash, Hasher};

use hashbrown::DefaultHashBuilder;
use parking_lot::{Mutex, MutexGuard};

/// Default number of lock stripes.
pub const DEFAULT_STRIPES: usize = 64;

/// Held for the duration of one per-id write.
pub type WriteGuard<'a> = MutexGuard<'a, ()>;

/// Striped per-id write locks.
pub struct WriteLocks {
    stripes: Box<[Mutex<()>]>,
    hasher: DefaultHashBuilder,
}

impl WriteLocks {
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        Self {
            stripes: (0..stripes).map(|_| Mutex::new(())).collect(),
            hasher: DefaultHashBuilder::default(),
        }
    }

    fn stripe(&self, id: &str) -> usize {
        let mut h = self.hasher.build_hasher();
        id.hash(&mut h);
        (h.finish() as usize) % self.stripes.len()
    }

    /// Block until no other writer holds `id`'s stripe.
    pub fn lock(&self, id: &str) -> WriteGuard<'_> {
        self.stripes[self.stripe(id)].lock()
    }
}

impl Default for WriteLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}
