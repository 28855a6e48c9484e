//! Per-container operation locks.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// One mutex per container ID. Lifecycle calls on the same ID run one at a
/// time; calls on different IDs do not contend.
#[derive(Debug, Default)]
pub struct ContainerLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ContainerLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock for `id`, created on first use.
    pub fn get(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    /// Drop the entry for a removed container. Holders of the lock keep
    /// their handle.
    pub fn forget(&self, id: &str) {
        self.locks.lock().remove(id);
    }

    /// Number of tracked IDs.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    /// Whether no IDs are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_same_id_shares_lock() {
        let locks = ContainerLocks::new();
        assert!(Arc::ptr_eq(&locks.get("a"), &locks.get("a")));
        assert!(!Arc::ptr_eq(&locks.get("a"), &locks.get("b")));
        assert_eq!(locks.len(), 2);

        locks.forget("a");
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn test_serializes_same_id() {
        let locks = Arc::new(ContainerLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                std::thread::spawn(move || {
                    let lock = locks.get("c1");
                    let _guard = lock.lock();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(2));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }
}
