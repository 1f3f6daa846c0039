use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Advisory record of which workers are currently executing a task.
///
/// `get` followed by `set` is not an atomic test-and-set. A dispatcher that
/// loses the race only ends up issuing a call that the peer may reject or
/// serve twice, which the retry loop already tolerates.
#[derive(Debug, Default)]
pub struct BusySet {
    inner: Mutex<HashMap<String, bool>>,
}

impl BusySet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, bool>> {
        // A panicking holder cannot leave the map half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether `addr` is marked busy. Unknown addresses are free.
    pub fn get(&self, addr: &str) -> bool {
        self.lock().get(addr).copied().unwrap_or(false)
    }

    pub fn set(&self, addr: &str, busy: bool) {
        self.lock().insert(addr.to_string(), busy);
    }

    /// Point-in-time copy of the whole map.
    pub fn snapshot(&self) -> HashMap<String, bool> {
        self.lock().clone()
    }
}
