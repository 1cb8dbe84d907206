//! Snapshot store of configured PModes

use super::{ReceivingPMode, SendingPMode};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Immutable set of PModes shared by in-flight resolutions
#[derive(Debug, Clone, Default)]
pub struct PModeSet {
    pub receiving: Vec<ReceivingPMode>,
    sending: HashMap<String, SendingPMode>,
}

impl PModeSet {
    pub fn new(receiving: Vec<ReceivingPMode>, sending: Vec<SendingPMode>) -> Self {
        Self {
            receiving,
            sending: sending.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    pub fn sending(&self, id: &str) -> Option<&SendingPMode> {
        self.sending.get(id)
    }

    pub fn sending_count(&self) -> usize {
        self.sending.len()
    }
}

/// Holder of the current PMode snapshot
///
/// Readers clone the `Arc` and keep resolving against it even if a reload
/// swaps in a new set concurrently.
#[derive(Debug, Default)]
pub struct PModeStore {
    current: RwLock<Arc<PModeSet>>,
}

impl PModeStore {
    pub fn new(set: PModeSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(set)),
        }
    }

    pub fn snapshot(&self) -> Arc<PModeSet> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn replace(&self, set: PModeSet) {
        info!(
            receiving = set.receiving.len(),
            sending = set.sending_count(),
            "PMode set replaced"
        );
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(set);
    }

    pub fn sending(&self, id: &str) -> Option<SendingPMode> {
        self.snapshot().sending(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_survives_replace() {
        let store = PModeStore::new(PModeSet::new(
            vec![ReceivingPMode::new("r1")],
            vec![SendingPMode::new("s1")],
        ));
        let before = store.snapshot();

        store.replace(PModeSet::new(vec![], vec![SendingPMode::new("s2")]));

        assert_eq!(before.receiving.len(), 1);
        assert!(before.sending("s1").is_some());
        assert!(store.sending("s1").is_none());
        assert!(store.sending("s2").is_some());
    }
}
