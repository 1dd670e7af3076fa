//! Per-chat timestamp of the last delivered message.

use std::collections::HashMap;
use std::sync::RwLock;

/// Thread-safe map of chat ID to the newest message timestamp seen.
///
/// `set` overwrites unconditionally; callers only advance it.
#[derive(Debug, Default)]
pub struct Ledger {
    map: RwLock<HashMap<String, i64>>,
}

impl Ledger {
    pub fn get(&self, chat_id: &str) -> Option<i64> {
        self.map
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(chat_id)
            .copied()
    }

    pub fn set(&self, chat_id: &str, timestamp: i64) {
        self.map
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(chat_id.to_string(), timestamp);
    }

    /// Store `timestamp` if it is newer than what is recorded. Returns
    /// whether the ledger changed.
    pub fn advance(&self, chat_id: &str, timestamp: i64) -> bool {
        let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
        match map.get(chat_id) {
            Some(&prev) if prev >= timestamp => false,
            _ => {
                map.insert(chat_id.to_string(), timestamp);
                true
            }
        }
    }

    /// Deep copy for persistence.
    pub fn snapshot(&self) -> HashMap<String, i64> {
        self.map.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the whole map, e.g. with a restored session's copy.
    pub fn swap(&self, map: HashMap<String, i64>) {
        *self.map.write().unwrap_or_else(|e| e.into_inner()) = map;
    }

    pub fn len(&self) -> usize {
        self.map.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_is_monotonic() {
        let ledger = Ledger::default();
        assert!(ledger.advance("a", 10));
        assert!(!ledger.advance("a", 5));
        assert!(!ledger.advance("a", 10));
        assert!(ledger.advance("a", 11));
        assert_eq!(ledger.get("a"), Some(11));
    }

    #[test]
    fn test_swap_and_snapshot() {
        let ledger = Ledger::default();
        assert!(ledger.is_empty());
        ledger.set("a", 1);
        ledger.swap(HashMap::from([("b".to_string(), 2)]));
        assert_eq!(ledger.get("a"), None);
        assert_eq!(ledger.len(), 1);

        let mut snap = ledger.snapshot();
        snap.insert("c".into(), 3);
        assert_eq!(ledger.len(), 1, "snapshot is a copy");
    }
}
